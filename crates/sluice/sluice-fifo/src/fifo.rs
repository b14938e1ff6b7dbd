//! Lock-free single-producer, single-consumer ring index allocator.
//!
//! The `Fifo` owns no element storage. It only hands out index windows into a
//! buffer that lives elsewhere, using a two-phase protocol on each side:
//!
//! **Writer:** `prepare_to_write(n)` → copy into the windows → `finished_write(k)`
//!
//! **Reader:** `prepare_to_read(n)` → consume the windows → `finished_read(k)`
//!
//! Both cursors are monotonically increasing `u64` sequence numbers. The
//! difference `write_seq - read_seq` is the number of ready slots, so the full
//! capacity is usable and "empty" and "full" never look alike.
//!
//! # Memory Ordering
//! Each side stores its own cursor with `Release` after touching the buffer and
//! loads the other side's cursor with `Acquire` before touching it. That pairs
//! the writer's copy with the reader's view of it, and the reader's release of
//! a region with the writer's reuse of it.

use crate::ring::{RingConfig, Windows};
use std::sync::atomic::{AtomicU64, Ordering};

/// A cursor on its own cache line so the producer and consumer don't
/// invalidate each other's line on every commit.
#[repr(C, align(64))]
#[derive(Debug, Default)]
struct Cursor(AtomicU64);

/// Index allocator for one channel of a circular buffer.
///
/// # Thread Safety
/// `Fifo` is `Sync`. At most one thread may call the writer-side methods and
/// at most one (other) thread the reader-side methods at any instant.
/// `reset` and `set_capacity` take `&mut self` and so exclude both.
#[derive(Debug)]
pub struct Fifo {
    ring: RingConfig,
    write_seq: Cursor,
    read_seq: Cursor,
}

impl Fifo {
    /// Creates an empty allocator over `capacity` slots.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RingConfig::new(capacity),
            write_seq: Cursor::default(),
            read_seq: Cursor::default(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }

    /// Number of slots written and not yet consumed.
    #[inline]
    pub fn num_ready(&self) -> usize {
        // Read cursor first: it never passes the write cursor, so loading the
        // write cursor afterwards cannot observe `w < r`.
        let r = self.read_seq.0.load(Ordering::Acquire);
        let w = self.write_seq.0.load(Ordering::Acquire);
        w.saturating_sub(r) as usize
    }

    /// Number of slots the writer may still fill.
    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity() - self.num_ready()
    }

    /// Reserves up to `len` slots for writing.
    ///
    /// Returns fewer than `len` slots when the ring doesn't have that much free
    /// space; the caller decides what to do with the excess.
    #[inline]
    pub fn prepare_to_write(&self, len: usize) -> Windows {
        let r = self.read_seq.0.load(Ordering::Acquire);
        let w = self.write_seq.0.load(Ordering::Relaxed);
        let free = self.capacity() - (w - r) as usize;
        self.ring.windows(w, len.min(free))
    }

    /// Publishes `written` slots to the reader.
    ///
    /// `written` must not exceed the total of the preceding `prepare_to_write`.
    #[inline]
    pub fn finished_write(&self, written: usize) {
        let w = self.write_seq.0.load(Ordering::Relaxed);
        debug_assert!(written <= self.free_space(), "write commit exceeds free space");
        self.write_seq.0.store(w + written as u64, Ordering::Release);
    }

    /// Reserves up to `len` ready slots for reading.
    #[inline]
    pub fn prepare_to_read(&self, len: usize) -> Windows {
        let w = self.write_seq.0.load(Ordering::Acquire);
        let r = self.read_seq.0.load(Ordering::Relaxed);
        let ready = (w - r) as usize;
        self.ring.windows(r, len.min(ready))
    }

    /// Returns `consumed` slots to the writer.
    ///
    /// `consumed` must not exceed the total of the preceding `prepare_to_read`.
    #[inline]
    pub fn finished_read(&self, consumed: usize) {
        let r = self.read_seq.0.load(Ordering::Relaxed);
        debug_assert!(consumed <= self.num_ready(), "read commit exceeds ready slots");
        self.read_seq.0.store(r + consumed as u64, Ordering::Release);
    }

    /// Empties the ring. Any unread slots are discarded.
    pub fn reset(&mut self) {
        *self.write_seq.0.get_mut() = 0;
        *self.read_seq.0.get_mut() = 0;
    }

    /// Changes the capacity and empties the ring.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.ring = RingConfig::new(capacity);
        self.reset();
    }
}
