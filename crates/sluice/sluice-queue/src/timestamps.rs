//! Per-block timestamp table and the arithmetic that maps it to read windows.
//!
//! Timestamps are kept at block granularity: slot `i` holds the timestamp of
//! the first sample at ring position `i * block_size`. Time advances by one
//! unit per sample, so any sample's timestamp can be derived from the nearest
//! stamped block start.
//!
//! ```text
//! block_size = 4, write of 6 samples at ts=100 starting at ring index 2
//!
//! ring index   0   1   2   3 | 4   5   6   7
//!                      ^100    ^102
//!                              └─ slot 1 := 102
//! ```

use sluice_fifo::{Window, Windows};
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug)]
pub(crate) struct TimestampTable {
    block_size: usize,
    slots: Box<[AtomicI64]>,
}

impl TimestampTable {
    pub(crate) fn new(block_size: usize, num_blocks: usize) -> Self {
        Self {
            block_size,
            slots: (0..num_blocks).map(|_| AtomicI64::new(0)).collect(),
        }
    }

    /// Resizes to `num_blocks` slots, zeroing every entry.
    pub(crate) fn resize(&mut self, num_blocks: usize) {
        *self = Self::new(self.block_size, num_blocks);
    }

    /// Stamped value of slot `block`. Panics if `block` is out of range.
    #[inline]
    pub(crate) fn slot(&self, block: usize) -> i64 {
        self.slots[block].load(Ordering::Relaxed)
    }

    /// Distance from `index` to the next block boundary (0 when on one).
    #[inline(always)]
    fn offset_to_boundary(&self, index: usize) -> usize {
        match index % self.block_size {
            0 => 0,
            m => self.block_size - m,
        }
    }

    #[inline(always)]
    fn slot_for(&self, position: usize) -> usize {
        (position / self.block_size) % self.slots.len()
    }

    /// Records the start time of every block that begins inside `window`.
    ///
    /// `timestamp` belongs to the sample at `window.start`. A block that began
    /// before the window is left alone; the write that covered its start
    /// already stamped it.
    #[inline]
    pub(crate) fn stamp(&self, window: Window, timestamp: i64) {
        let offset = self.offset_to_boundary(window.start);
        let mut position = window.start + offset;
        let mut ts = timestamp.wrapping_add(offset as i64);
        while position < window.end() {
            // Relaxed: the fifo's Release on `finished_write` publishes it.
            self.slots[self.slot_for(position)].store(ts, Ordering::Relaxed);
            position += self.block_size;
            ts = ts.wrapping_add(self.block_size as i64);
        }
    }

    /// Timestamp of the first sample in `windows`, plus the timestamp that
    /// follows the last one.
    ///
    /// When a stamped block boundary falls inside the read, the table value is
    /// projected back to the first sample. Otherwise `last_read` (the end of the
    /// previous read) is carried forward.
    #[inline]
    pub(crate) fn reconcile(&self, windows: Windows, last_read: i64) -> (i64, i64) {
        let consumed = windows.total();
        let offset = self.offset_to_boundary(windows.first.start);
        let ts = if offset < consumed {
            let block = self.slot_for(windows.first.start + offset);
            self.slot(block).wrapping_sub(offset as i64)
        } else {
            last_read
        };
        (ts, ts.wrapping_add(consumed as i64))
    }
}
