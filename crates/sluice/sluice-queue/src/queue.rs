//! The `DataQueue`: producer path, control interface, and read session setup.
//!
//! # Thread Safety
//! `DataQueue` is `Sync` and is meant to be shared through an `Arc` by exactly
//! two steady-state contexts:
//! - one producer calling [`DataQueue::write_channel`] (per channel),
//! - one consumer calling [`DataQueue::start_read`].
//!
//! Neither path takes a lock or waits. Reconfiguration needs `&mut self`, so it
//! can only happen once both sides have let go of the queue.

use crate::error::QueueError;
use crate::session::{ChannelRead, ReadSession};
use crate::store::SampleStore;
use crate::timestamps::TimestampTable;
use sluice_fifo::Fifo;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, trace, warn};

/// Geometry and rate of a [`DataQueue`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Samples per timestamped block. Fixed for the life of the queue.
    pub block_size: usize,
    /// Ring depth in blocks.
    pub num_blocks: usize,
    /// Channels allocated at construction.
    pub channels: usize,
    /// Sample rate in Hz, reported back to collaborators.
    pub sample_rate: u32,
}

/// Result of a single [`DataQueue::write_channel`] call.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Samples copied into the ring.
    pub written: usize,
    /// Samples refused because the ring was full.
    pub dropped: usize,
}

impl WriteOutcome {
    #[inline]
    pub fn is_overflow(&self) -> bool {
        self.dropped > 0
    }
}

/// Per-channel cursors and bookkeeping.
#[derive(Debug)]
struct Channel {
    fifo: Fifo,
    timestamps: TimestampTable,
    /// Length reserved by the open read session, committed on stop.
    read_samples: AtomicUsize,
    /// Timestamp just past the end of the previous read.
    last_read_timestamp: AtomicI64,
    writer_active: AtomicBool,
}

impl Channel {
    fn new(max_size: usize, block_size: usize, num_blocks: usize) -> Self {
        Self {
            fifo: Fifo::new(max_size),
            timestamps: TimestampTable::new(block_size, num_blocks),
            read_samples: AtomicUsize::new(0),
            last_read_timestamp: AtomicI64::new(0),
            writer_active: AtomicBool::new(false),
        }
    }
}

/// Releases a channel's writer flag when the write path exits.
struct WriterClaim<'a>(&'a AtomicBool);

impl Drop for WriterClaim<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct DataQueue {
    block_size: usize,
    num_blocks: usize,
    max_size: usize,
    sample_rate: u32,
    channels: Vec<Channel>,
    store: SampleStore,
    read_in_progress: AtomicBool,
    overflow_events: AtomicU64,
    dropped_samples: AtomicU64,
}

impl DataQueue {
    /// Builds a queue of `config.channels` empty channels.
    ///
    /// # Errors
    /// `InvalidConfig` if the block size or depth is zero, or the ring
    /// capacity doesn't fit in `usize`.
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        if config.block_size == 0 {
            return Err(QueueError::InvalidConfig("block_size must be non-zero"));
        }
        let max_size = ring_capacity(config.block_size, config.num_blocks)?;
        let mut queue = Self {
            block_size: config.block_size,
            num_blocks: config.num_blocks,
            max_size,
            sample_rate: config.sample_rate,
            channels: Vec::new(),
            store: SampleStore::new(0, max_size),
            read_in_progress: AtomicBool::new(false),
            overflow_events: AtomicU64::new(0),
            dropped_samples: AtomicU64::new(0),
        };
        queue.set_channels(config.channels)?;
        Ok(queue)
    }

    /// Replaces every channel with `num_channels` fresh, empty ones.
    ///
    /// # Errors
    /// `ReadInProgress` if a read session was opened and never closed; nothing
    /// is changed in that case.
    pub fn set_channels(&mut self, num_channels: usize) -> Result<(), QueueError> {
        self.ensure_idle()?;
        store_len(num_channels, self.max_size)?;
        self.channels = (0..num_channels)
            .map(|_| Channel::new(self.max_size, self.block_size, self.num_blocks))
            .collect();
        self.store.resize(num_channels, self.max_size);
        debug!(
            channels = num_channels,
            capacity = self.max_size,
            "data queue channels reset"
        );
        Ok(())
    }

    /// Changes the ring depth of every channel. Unread samples are discarded.
    ///
    /// # Errors
    /// `ReadInProgress` as for [`set_channels`](Self::set_channels);
    /// `InvalidConfig` for a zero or overflowing depth.
    pub fn resize(&mut self, num_blocks: usize) -> Result<(), QueueError> {
        self.ensure_idle()?;
        let max_size = ring_capacity(self.block_size, num_blocks)?;
        store_len(self.channels.len(), max_size)?;

        for chan in self.channels.iter_mut() {
            chan.fifo.set_capacity(max_size);
            chan.timestamps.resize(num_blocks);
            *chan.read_samples.get_mut() = 0;
            *chan.last_read_timestamp.get_mut() = 0;
        }
        self.store.resize(self.channels.len(), max_size);
        self.num_blocks = num_blocks;
        self.max_size = max_size;

        debug!(
            channels = self.channels.len(),
            num_blocks,
            capacity = max_size,
            "data queue resized"
        );
        Ok(())
    }

    fn ensure_idle(&mut self) -> Result<(), QueueError> {
        if *self.read_in_progress.get_mut() {
            warn!("data queue reconfiguration refused: read session still open");
            return Err(QueueError::ReadInProgress);
        }
        Ok(())
    }

    #[inline]
    fn channel(&self, channel: usize) -> Result<&Channel, QueueError> {
        self.channels
            .get(channel)
            .ok_or(QueueError::ChannelOutOfRange {
                channel,
                num_channels: self.channels.len(),
            })
    }

    /// Appends `block` to `channel`; `timestamp` belongs to `block[0]`.
    ///
    /// Never blocks and never allocates. If the ring can't take the whole
    /// block, the tail is dropped and reported in the returned
    /// [`WriteOutcome`]; samples already queued are never overwritten.
    ///
    /// # Errors
    /// `ChannelOutOfRange`, or `ConcurrentWrite` if another thread is in the
    /// middle of writing the same channel.
    pub fn write_channel(
        &self,
        channel: usize,
        block: &[f32],
        timestamp: i64,
    ) -> Result<WriteOutcome, QueueError> {
        let chan = self.channel(channel)?;
        if chan.writer_active.swap(true, Ordering::Acquire) {
            return Err(QueueError::ConcurrentWrite { channel });
        }
        let _claim = WriterClaim(&chan.writer_active);

        let windows = chan.fifo.prepare_to_write(block.len());
        let (head, rest) = block.split_at(windows.first.len);
        let tail = &rest[..windows.second.len];

        // SAFETY: both windows were just reserved on this channel's fifo and we
        // hold the channel's writer claim.
        unsafe {
            self.store.write(channel, windows.first, head);
            self.store.write(channel, windows.second, tail);
        }
        chan.timestamps.stamp(windows.first, timestamp);
        chan.timestamps
            .stamp(windows.second, timestamp.wrapping_add(windows.first.len as i64));
        chan.fifo.finished_write(windows.total());

        let outcome = WriteOutcome {
            written: windows.total(),
            dropped: block.len() - windows.total(),
        };
        if outcome.is_overflow() {
            self.overflow_events.fetch_add(1, Ordering::Relaxed);
            self.dropped_samples
                .fetch_add(outcome.dropped as u64, Ordering::Relaxed);
            warn!(
                channel,
                requested = block.len(),
                written = outcome.written,
                dropped = outcome.dropped,
                "data queue overflow"
            );
        }
        Ok(outcome)
    }

    /// Opens a read session over everything ready on every channel, capped
    /// at `max_samples` per channel when given (`Some(0)` means no cap).
    ///
    /// # Errors
    /// `ReadInProgress` if a session is already open. This never waits.
    pub fn start_read(&self, max_samples: Option<usize>) -> Result<ReadSession<'_>, QueueError> {
        if self
            .read_in_progress
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(QueueError::ReadInProgress);
        }

        let cap = max_samples.filter(|&m| m > 0);
        let reads = self
            .channels
            .iter()
            .map(|chan| {
                let ready = chan.fifo.num_ready();
                let windows = chan
                    .fifo
                    .prepare_to_read(cap.map_or(ready, |m| ready.min(m)));
                chan.read_samples.store(windows.total(), Ordering::Relaxed);

                let last = chan.last_read_timestamp.load(Ordering::Relaxed);
                let (timestamp, next) = chan.timestamps.reconcile(windows, last);
                chan.last_read_timestamp.store(next, Ordering::Relaxed);
                ChannelRead { windows, timestamp }
            })
            .collect::<Vec<_>>();

        trace!(channels = reads.len(), "read session opened");
        Ok(ReadSession::new(self, reads))
    }

    /// Commits the reserved reads back to every channel and closes the session.
    pub(crate) fn finish_read(&self) {
        for chan in &self.channels {
            let consumed = chan.read_samples.swap(0, Ordering::Relaxed);
            chan.fifo.finished_read(consumed);
        }
        self.read_in_progress.store(false, Ordering::Release);
        trace!("read session closed");
    }

    /// Closes a session whose [`ReadSession`] guard was leaked.
    ///
    /// Returns `false` (and does nothing) when no session is open.
    pub fn stop_read(&mut self) -> bool {
        if !*self.read_in_progress.get_mut() {
            return false;
        }
        self.finish_read();
        true
    }

    pub(crate) fn store(&self) -> &SampleStore {
        &self.store
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Ring capacity per channel, in samples.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn is_reading(&self) -> bool {
        self.read_in_progress.load(Ordering::Acquire)
    }

    pub fn ready_to_read(&self, channel: usize) -> Result<usize, QueueError> {
        Ok(self.channel(channel)?.fifo.num_ready())
    }

    pub fn free_space(&self, channel: usize) -> Result<usize, QueueError> {
        Ok(self.channel(channel)?.fifo.free_space())
    }

    /// Number of writes that had to drop samples.
    pub fn overflow_events(&self) -> u64 {
        self.overflow_events.load(Ordering::Relaxed)
    }

    /// Total samples dropped across all channels.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed)
    }

    /// Raw stamped timestamp at ring block `block`, one entry per channel.
    pub fn timestamps_for_block(&self, block: usize) -> Result<Vec<i64>, QueueError> {
        if block >= self.num_blocks {
            return Err(QueueError::BlockOutOfRange {
                block,
                num_blocks: self.num_blocks,
            });
        }
        Ok(self
            .channels
            .iter()
            .map(|chan| chan.timestamps.slot(block))
            .collect())
    }
}

fn ring_capacity(block_size: usize, num_blocks: usize) -> Result<usize, QueueError> {
    if num_blocks == 0 {
        return Err(QueueError::InvalidConfig("num_blocks must be non-zero"));
    }
    block_size
        .checked_mul(num_blocks)
        .ok_or(QueueError::InvalidConfig("ring capacity overflows usize"))
}

fn store_len(channels: usize, max_size: usize) -> Result<usize, QueueError> {
    channels
        .checked_mul(max_size)
        .ok_or(QueueError::InvalidConfig("sample store size overflows usize"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(block_size: usize, num_blocks: usize, channels: usize) -> DataQueue {
        DataQueue::new(QueueConfig {
            block_size,
            num_blocks,
            channels,
            sample_rate: 30_000,
        })
        .expect("valid config")
    }

    fn ramp(start: f32, len: usize) -> Vec<f32> {
        (0..len).map(|i| start + i as f32).collect()
    }

    #[test]
    fn rejects_degenerate_geometry() {
        let cfg = QueueConfig {
            block_size: 0,
            num_blocks: 4,
            channels: 1,
            sample_rate: 1,
        };
        assert!(matches!(DataQueue::new(cfg), Err(QueueError::InvalidConfig(_))));
        let cfg = QueueConfig {
            block_size: 4,
            num_blocks: 0,
            ..cfg
        };
        assert!(matches!(DataQueue::new(cfg), Err(QueueError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_store_size_that_overflows() {
        let cfg = QueueConfig {
            block_size: 1 << 62,
            num_blocks: 1,
            channels: 4,
            sample_rate: 1,
        };
        assert_eq!(
            DataQueue::new(cfg).err(),
            Some(QueueError::InvalidConfig("sample store size overflows usize"))
        );

        let mut q = DataQueue::new(QueueConfig { channels: 0, ..cfg }).unwrap();
        assert!(matches!(q.set_channels(4), Err(QueueError::InvalidConfig(_))));
        assert_eq!(q.num_channels(), 0);

        let mut q = queue(4, 2, 3);
        q.write_channel(2, &ramp(0.0, 5), 0).unwrap();
        assert!(matches!(q.resize(usize::MAX / 4), Err(QueueError::InvalidConfig(_))));
        assert_eq!(q.capacity(), 8);
        assert_eq!(q.num_blocks(), 2);
        assert_eq!(q.ready_to_read(2), Ok(5));
    }

    #[test]
    fn write_near_i64_max_does_not_panic() {
        let q = queue(4, 2, 1);
        let start = i64::MAX - 1;
        q.write_channel(0, &ramp(0.0, 6), start).unwrap();
        q.start_read(Some(2)).unwrap().stop_read();
        // Wraps into the second window starting at ring index 0.
        q.write_channel(0, &ramp(6.0, 4), start.wrapping_add(6)).unwrap();
        assert_eq!(q.timestamps_for_block(0), Ok(vec![start.wrapping_add(8)]));

        let s = q.start_read(None).unwrap();
        assert_eq!(s.channel(0).unwrap().timestamp, start.wrapping_add(2));
        assert_eq!(s.channel(0).unwrap().len(), 8);
    }

    #[test]
    fn set_channels_leaves_every_channel_empty() {
        let mut q = queue(8, 4, 1);
        q.write_channel(0, &ramp(0.0, 8), 0).unwrap();
        for c in [0, 1, 3, 16] {
            q.set_channels(c).unwrap();
            assert_eq!(q.num_channels(), c);
            for chan in 0..c {
                assert_eq!(q.ready_to_read(chan), Ok(0));
                assert_eq!(q.free_space(chan), Ok(32));
            }
        }
    }

    #[test]
    fn reports_configuration() {
        let q = queue(16, 8, 2);
        assert_eq!(q.sample_rate(), 30_000);
        assert_eq!(q.block_size(), 16);
        assert_eq!(q.num_blocks(), 8);
        assert_eq!(q.capacity(), 128);
        assert!(!q.is_reading());
    }

    #[test]
    fn aligned_round_trip_keeps_timestamp() {
        let q = queue(4, 4, 1);
        let src = ramp(1.0, 10);
        let out = q.write_channel(0, &src, 5_000).unwrap();
        assert_eq!(out, WriteOutcome { written: 10, dropped: 0 });

        let session = q.start_read(None).unwrap();
        let read = session.channel(0).unwrap();
        assert_eq!(read.len(), 10);
        assert!(!read.windows.is_wrapped());
        assert_eq!(read.timestamp, 5_000);
        assert_eq!(session.samples().channel(0).unwrap().0, src.as_slice());
        session.stop_read();

        assert_eq!(q.ready_to_read(0), Ok(0));
        assert_eq!(q.free_space(0), Ok(16));
    }

    #[test]
    fn capped_reads_carry_timestamp_forward() {
        let q = queue(8, 4, 1);
        q.write_channel(0, &ramp(0.0, 24), 1_000).unwrap();

        let mut expected = 1_000;
        let mut prev: Option<(i64, usize)> = None;
        for _ in 0..6 {
            let session = q.start_read(Some(3)).unwrap();
            let read = *session.channel(0).unwrap();
            assert_eq!(read.timestamp, expected);
            if let Some((ts, len)) = prev {
                assert_eq!(read.timestamp, ts + len as i64);
            }
            prev = Some((read.timestamp, read.len()));
            expected += read.len() as i64;
            session.stop_read();
        }
    }

    #[test]
    fn read_without_boundary_extrapolates() {
        let q = queue(10, 2, 1);
        q.write_channel(0, &ramp(0.0, 4), 700).unwrap();
        // First read starts on a boundary: stamped.
        let s = q.start_read(Some(2)).unwrap();
        assert_eq!(s.channel(0).unwrap().timestamp, 700);
        drop(s);
        // Second read covers indices 2..4, nowhere near the boundary at 10.
        let s = q.start_read(None).unwrap();
        assert_eq!(s.channel(0).unwrap().timestamp, 702);
        s.stop_read();
    }

    #[test]
    fn overflow_drops_tail_and_counts() {
        let q = queue(4, 2, 1);
        let out = q.write_channel(0, &ramp(0.0, 8 + 5), 0).unwrap();
        assert_eq!(out, WriteOutcome { written: 8, dropped: 5 });
        assert!(out.is_overflow());
        assert_eq!(q.free_space(0), Ok(0));
        assert_eq!(q.overflow_events(), 1);
        assert_eq!(q.dropped_samples(), 5);

        let s = q.start_read(None).unwrap();
        assert_eq!(s.samples().channel(0).unwrap().0, ramp(0.0, 8).as_slice());
    }

    #[test]
    fn full_ring_refuses_everything_without_corrupting() {
        let q = queue(4, 1, 1);
        q.write_channel(0, &[1.0; 4], 10).unwrap();
        let out = q.write_channel(0, &[9.0; 3], 14).unwrap();
        assert_eq!(out.written, 0);
        let s = q.start_read(None).unwrap();
        assert_eq!(s.samples().channel(0).unwrap().0, &[1.0; 4]);
        assert_eq!(s.channel(0).unwrap().timestamp, 10);
    }

    #[test]
    fn second_start_read_fails_fast() {
        let q = queue(4, 2, 1);
        let s = q.start_read(None).unwrap();
        assert!(q.is_reading());
        assert_eq!(q.start_read(None).err(), Some(QueueError::ReadInProgress));
        s.stop_read();
        assert!(!q.is_reading());
        assert!(q.start_read(None).is_ok());
    }

    #[test]
    fn leaked_session_blocks_reconfiguration() {
        let mut q = queue(4, 2, 2);
        q.write_channel(1, &ramp(0.0, 3), 0).unwrap();
        std::mem::forget(q.start_read(Some(1)).unwrap());

        assert_eq!(q.set_channels(5), Err(QueueError::ReadInProgress));
        assert_eq!(q.resize(16), Err(QueueError::ReadInProgress));
        assert_eq!(q.num_channels(), 2);
        assert_eq!(q.capacity(), 8);
        assert_eq!(q.ready_to_read(1), Ok(3));

        assert!(q.stop_read());
        assert_eq!(q.ready_to_read(1), Ok(2));
        assert!(!q.stop_read());
        assert!(q.resize(16).is_ok());
    }

    #[test]
    fn stop_read_without_session_is_noop() {
        let mut q = queue(4, 2, 1);
        q.write_channel(0, &[1.0; 3], 0).unwrap();
        assert!(!q.stop_read());
        assert_eq!(q.ready_to_read(0), Ok(3));
    }

    #[test]
    fn wraparound_yields_two_windows_matching_source() {
        let q = queue(4, 2, 1);
        q.write_channel(0, &ramp(0.0, 6), 0).unwrap();
        q.start_read(None).unwrap().stop_read();

        let src = ramp(100.0, 6);
        q.write_channel(0, &src, 6).unwrap();
        let s = q.start_read(None).unwrap();
        let read = s.channel(0).unwrap();
        assert_eq!(read.windows.first, sluice_fifo::Window { start: 6, len: 2 });
        assert_eq!(read.windows.second, sluice_fifo::Window { start: 0, len: 4 });
        let (a, b) = s.samples().channel(0).unwrap();
        assert_eq!(a, &src[..2]);
        assert_eq!(b, &src[2..]);
        assert_eq!(read.timestamp, 6);
    }

    #[test]
    fn misaligned_write_stamps_next_block() {
        let q = queue(10, 2, 1);
        q.write_channel(0, &[0.0; 3], 97).unwrap();
        q.start_read(None).unwrap().stop_read();

        q.write_channel(0, &[0.0; 10], 100).unwrap();
        assert_eq!(q.timestamps_for_block(1), Ok(vec![107]));
    }

    #[test]
    fn misaligned_write_that_wraps_stamps_slot_zero() {
        let q = queue(10, 1, 1);
        q.write_channel(0, &[0.0; 3], 97).unwrap();
        q.start_read(None).unwrap().stop_read();

        q.write_channel(0, &[0.0; 10], 100).unwrap();
        assert_eq!(q.timestamps_for_block(0), Ok(vec![107]));
    }

    #[test]
    fn timestamps_for_block_checks_range() {
        let q = queue(4, 2, 3);
        assert_eq!(q.timestamps_for_block(1), Ok(vec![0, 0, 0]));
        assert_eq!(
            q.timestamps_for_block(2),
            Err(QueueError::BlockOutOfRange { block: 2, num_blocks: 2 })
        );
    }

    #[test]
    fn channel_out_of_range() {
        let q = queue(4, 2, 1);
        assert_eq!(
            q.write_channel(1, &[0.0], 0),
            Err(QueueError::ChannelOutOfRange { channel: 1, num_channels: 1 })
        );
        assert!(q.ready_to_read(2).is_err());
    }

    #[test]
    fn writer_claim_is_released_after_write() {
        let q = queue(4, 2, 1);
        q.channels[0].writer_active.store(true, Ordering::Relaxed);
        assert_eq!(
            q.write_channel(0, &[0.0], 0),
            Err(QueueError::ConcurrentWrite { channel: 0 })
        );
        q.channels[0].writer_active.store(false, Ordering::Relaxed);
        q.write_channel(0, &[0.0], 0).unwrap();
        assert!(!q.channels[0].writer_active.load(Ordering::Relaxed));
    }

    #[test]
    fn resize_discards_unread_and_resets_timestamps() {
        let mut q = queue(4, 2, 2);
        q.write_channel(0, &ramp(0.0, 8), 40).unwrap();
        q.start_read(Some(2)).unwrap().stop_read();

        q.resize(4).unwrap();
        assert_eq!(q.capacity(), 16);
        assert_eq!(q.num_blocks(), 4);
        assert_eq!(q.ready_to_read(0), Ok(0));
        assert_eq!(q.timestamps_for_block(3), Ok(vec![0, 0]));

        q.write_channel(0, &ramp(0.0, 2), 500).unwrap();
        let s = q.start_read(None).unwrap();
        let read = s.channel(0).unwrap();
        assert_eq!(read.windows.first.start, 0);
        assert_eq!(read.timestamp, 500);
    }

    #[test]
    fn resize_rejects_zero_depth() {
        let mut q = queue(4, 2, 1);
        assert!(matches!(q.resize(0), Err(QueueError::InvalidConfig(_))));
        assert_eq!(q.capacity(), 8);
    }

    #[test]
    fn channels_are_independent() {
        let q = queue(4, 4, 2);
        q.write_channel(0, &ramp(0.0, 5), 10).unwrap();
        q.write_channel(1, &ramp(50.0, 2), 90).unwrap();

        let s = q.start_read(None).unwrap();
        assert_eq!(s.channel(0).unwrap().len(), 5);
        assert_eq!(s.channel(1).unwrap().len(), 2);
        assert_eq!(s.channel(0).unwrap().timestamp, 10);
        assert_eq!(s.channel(1).unwrap().timestamp, 90);
        assert_eq!(s.total_samples(), 7);
    }
}
