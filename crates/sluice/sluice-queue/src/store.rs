//! Multi-channel contiguous sample storage.
//!
//! # Memory Layout
//!
//! ```text
//! ┌──────────────────────────────┬──────────────────────────────┬─────┐
//! │ channel 0: [0, channel_len)  │ channel 1: [0, channel_len)  │ ... │
//! └──────────────────────────────┴──────────────────────────────┴─────┘
//! ```
//!
//! The producer copies into windows it reserved from a channel's `Fifo` while
//! the consumer reads other windows of the same row in place. Every element is
//! an `UnsafeCell` so both can work through shared references; the `Fifo`
//! guarantees the windows never overlap.

use sluice_fifo::Window;
use std::cell::UnsafeCell;
use std::fmt;
use std::ptr;

pub(crate) struct SampleStore {
    samples: Box<[UnsafeCell<f32>]>,
    channels: usize,
    channel_len: usize,
}

// SAFETY: all access to `samples` goes through `write`/`slice`, whose callers
// only pass windows reserved from the channel's `Fifo`. Write windows and read
// windows are disjoint at every instant, so no element is ever read and written
// concurrently. Reallocation takes `&mut self`.
unsafe impl Sync for SampleStore {}

impl SampleStore {
    /// `channels * channel_len` must not overflow; `DataQueue` checks it first.
    pub(crate) fn new(channels: usize, channel_len: usize) -> Self {
        Self {
            samples: zeroed(channels * channel_len),
            channels,
            channel_len,
        }
    }

    /// Reallocates to the new geometry. Previous contents are discarded.
    pub(crate) fn resize(&mut self, channels: usize, channel_len: usize) {
        if channels * channel_len != self.samples.len() {
            self.samples = zeroed(channels * channel_len);
        } else {
            for s in self.samples.iter_mut() {
                *s.get_mut() = 0.0;
            }
        }
        self.channels = channels;
        self.channel_len = channel_len;
    }

    #[inline(always)]
    fn ptr(&self, channel: usize, window: Window) -> *mut f32 {
        assert!(channel < self.channels && window.end() <= self.channel_len);
        let offset = channel * self.channel_len + window.start;
        // SAFETY: offset <= samples.len() by the assert above.
        UnsafeCell::raw_get(unsafe { self.samples.as_ptr().add(offset) })
    }

    /// Copies `src` into `window` of `channel`.
    ///
    /// # Safety
    /// `window` must be reserved for writing on `channel` by the caller, and no
    /// other thread may be accessing it.
    #[inline(always)]
    pub(crate) unsafe fn write(&self, channel: usize, window: Window, src: &[f32]) {
        debug_assert_eq!(src.len(), window.len);
        let dst = self.ptr(channel, window);
        // SAFETY: dst points at window.len in-bounds elements that nobody else
        // touches (caller contract); src is a distinct allocation.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, window.len) };
    }

    /// Borrows `window` of `channel` in place.
    ///
    /// # Safety
    /// `window` must be reserved for reading on `channel` for at least `'a`, so
    /// the writer cannot reuse it while the slice is alive.
    #[inline(always)]
    pub(crate) unsafe fn slice<'a>(&'a self, channel: usize, window: Window) -> &'a [f32] {
        let src = self.ptr(channel, window);
        // SAFETY: in-bounds, initialised, and not mutated for 'a (caller contract).
        unsafe { std::slice::from_raw_parts(src, window.len) }
    }
}

fn zeroed(len: usize) -> Box<[UnsafeCell<f32>]> {
    (0..len).map(|_| UnsafeCell::new(0.0)).collect()
}

impl fmt::Debug for SampleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleStore")
            .field("channels", &self.channels)
            .field("channel_len", &self.channel_len)
            .finish()
    }
}
