//! Ring geometry and index arithmetic.
//!
//! This module provides the primitives the [`Fifo`](crate::Fifo) is built on:
//! - Configuration with capacity validation
//! - Sequence-to-index mapping (bitmask fast path for power-of-two capacities)
//! - Splitting a run of sequence numbers into at most two contiguous windows

/// Configuration for a ring of `capacity` slots.
///
/// Unlike a pure power-of-two ring, the capacity here is whatever the caller
/// needs (`block_size × num_blocks` in practice). Power-of-two capacities keep
/// the cheap `seq & mask` mapping; anything else falls back to `seq % capacity`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingConfig {
    /// Number of slots in the ring. Never zero.
    pub capacity: usize,
    /// `capacity - 1` when the capacity is a power of two.
    mask: Option<u64>,
}

impl RingConfig {
    /// Creates a new ring configuration with the specified capacity.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    ///
    /// # Example
    /// ```
    /// use sluice_fifo::RingConfig;
    /// let cfg = RingConfig::new(1024);
    /// assert_eq!(cfg.index(1025), 1);
    /// let odd = RingConfig::new(1000);
    /// assert_eq!(odd.index(1025), 25);
    /// ```
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be non-zero");
        let mask = capacity
            .is_power_of_two()
            .then(|| (capacity as u64) - 1);
        Self { capacity, mask }
    }

    /// Maps a monotonically increasing sequence number to a slot index.
    ///
    /// ```text
    /// capacity = 8 (mask = 0b111)     capacity = 6 (modulo)
    /// seq =  5 → 5                    seq =  5 → 5
    /// seq =  8 → 0                    seq =  8 → 2
    /// seq = 15 → 7                    seq = 12 → 0
    /// ```
    #[inline(always)]
    pub fn index(&self, seq: u64) -> usize {
        match self.mask {
            Some(mask) => (seq & mask) as usize,
            None => (seq % self.capacity as u64) as usize,
        }
    }

    /// Splits `len` slots starting at sequence `seq` into contiguous windows.
    ///
    /// The caller guarantees `len <= capacity`. The second window is only
    /// non-empty when the run crosses the end of the ring.
    #[inline]
    pub fn windows(&self, seq: u64, len: usize) -> Windows {
        debug_assert!(len <= self.capacity);
        let start = self.index(seq);
        let first_len = len.min(self.capacity - start);
        Windows {
            first: Window {
                start,
                len: first_len,
            },
            second: Window {
                start: 0,
                len: len - first_len,
            },
        }
    }
}

/// A contiguous run of ring slots `[start, start + len)`.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub len: usize,
}

impl Window {
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The one or two windows covering a prepared read or write.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Windows {
    pub first: Window,
    /// Starts at slot 0; empty unless the run wrapped.
    pub second: Window,
}

impl Windows {
    /// Total number of slots covered by both windows.
    #[inline]
    pub fn total(&self) -> usize {
        self.first.len + self.second.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    #[inline]
    pub fn is_wrapped(&self) -> bool {
        !self.second.is_empty()
    }
}
