//! Scoped read sessions.
//!
//! A [`ReadSession`] is the consumer's exclusive window onto the queue. While
//! it lives, the regions it reserved cannot be reused by the producer, so the
//! samples can be borrowed in place instead of copied out. Dropping the
//! session (or calling [`ReadSession::stop_read`]) commits the reads and frees
//! those regions; the borrow checker keeps any [`SampleView`] from outliving it.

use crate::queue::DataQueue;
use sluice_fifo::Windows;

/// What one channel handed over in a read session.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ChannelRead {
    /// Ring regions reserved for this read; `second` is empty unless wrapped.
    pub windows: Windows,
    /// Timestamp of the first sample in `windows.first`.
    pub timestamp: i64,
}

impl ChannelRead {
    #[inline]
    pub fn len(&self) -> usize {
        self.windows.total()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[derive(Debug)]
pub struct ReadSession<'a> {
    queue: &'a DataQueue,
    reads: Vec<ChannelRead>,
}

impl<'a> ReadSession<'a> {
    pub(crate) fn new(queue: &'a DataQueue, reads: Vec<ChannelRead>) -> Self {
        Self { queue, reads }
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.reads.len()
    }

    #[inline]
    pub fn channel(&self, channel: usize) -> Option<&ChannelRead> {
        self.reads.get(channel)
    }

    /// Every channel's read, in channel order.
    #[inline]
    pub fn channels(&self) -> &[ChannelRead] {
        &self.reads
    }

    /// Samples reserved across all channels.
    pub fn total_samples(&self) -> usize {
        self.reads.iter().map(ChannelRead::len).sum()
    }

    /// In-place view of the reserved samples.
    #[inline]
    pub fn samples(&self) -> SampleView<'_> {
        SampleView { session: self }
    }

    /// Commits the session's reads and returns the space to the producer.
    pub fn stop_read(self) {
        drop(self);
    }
}

impl Drop for ReadSession<'_> {
    fn drop(&mut self) {
        self.queue.finish_read();
    }
}

/// Borrowed, read-only access to the sample regions of a [`ReadSession`].
#[derive(Debug, Copy, Clone)]
pub struct SampleView<'s> {
    session: &'s ReadSession<'s>,
}

impl<'s> SampleView<'s> {
    /// The two reserved slices of `channel`, in time order.
    pub fn channel(&self, channel: usize) -> Option<(&'s [f32], &'s [f32])> {
        let read = self.session.reads.get(channel)?;
        let store = self.session.queue.store();
        // SAFETY: both windows stay reserved for reading until the session is
        // dropped, and 's cannot outlive the session.
        unsafe {
            Some((
                store.slice(channel, read.windows.first),
                store.slice(channel, read.windows.second),
            ))
        }
    }

    /// Iterates the reserved samples of `channel` in time order.
    pub fn iter_channel(&self, channel: usize) -> impl Iterator<Item = f32> + 's {
        let (first, second) = self.channel(channel).unwrap_or((&[], &[]));
        first.iter().chain(second).copied()
    }
}
