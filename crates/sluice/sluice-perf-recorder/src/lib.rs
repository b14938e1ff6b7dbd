//! Per-stage latency recorder for the queue's producer and consumer loops.
//!
//! With the `record` feature **off** (the default), `PerfRecorder` is a
//! zero-sized type and every method is an `#[inline(always)]` no-op.
//!
//! With `record` **on**, each stage owns a buffer of `MAX_SAMPLES` slots
//! allocated up front, and `begin`/`end` pairs store elapsed nanoseconds read
//! from `clock_gettime(CLOCK_MONOTONIC)`. Nothing allocates after `new()`, so
//! the recorder can sit inside the acquisition loop.
//!
//! A recorder is owned by one thread; the producer and consumer each keep
//! their own.

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PerfStage {
    WriteChannel = 0,
    StartRead = 1,
    Drain = 2,
    StopRead = 3,
    ProducerTotal = 4,
    ConsumerTotal = 5,
}

pub const NUM_STAGES: usize = 6;
pub const MAX_SAMPLES: usize = 262_144;

impl PerfStage {
    pub const ALL: [PerfStage; NUM_STAGES] = [
        PerfStage::WriteChannel,
        PerfStage::StartRead,
        PerfStage::Drain,
        PerfStage::StopRead,
        PerfStage::ProducerTotal,
        PerfStage::ConsumerTotal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PerfStage::WriteChannel => "WriteChannel",
            PerfStage::StartRead => "StartRead",
            PerfStage::Drain => "Drain",
            PerfStage::StopRead => "StopRead",
            PerfStage::ProducerTotal => "ProducerTotal",
            PerfStage::ConsumerTotal => "ConsumerTotal",
        }
    }
}

// ─── Feature: record ON ─────────────────────────────────────────────────────

#[cfg(feature = "record")]
mod inner {
    use super::*;

    #[inline(always)]
    pub fn now_ns() -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: ts is a valid, writable timespec.
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
    }

    struct StageBuf {
        samples: Box<[u64]>,
        count: usize,
        pending: u64,
    }

    impl StageBuf {
        fn new() -> Self {
            Self {
                samples: vec![0u64; MAX_SAMPLES].into_boxed_slice(),
                count: 0,
                pending: 0,
            }
        }

        #[inline(always)]
        fn push(&mut self, ns: u64) {
            if let Some(slot) = self.samples.get_mut(self.count) {
                *slot = ns;
                self.count += 1;
            }
        }
    }

    pub struct PerfRecorder {
        stages: [StageBuf; NUM_STAGES],
    }

    impl PerfRecorder {
        pub fn new() -> Self {
            Self {
                stages: std::array::from_fn(|_| StageBuf::new()),
            }
        }

        #[inline(always)]
        pub fn begin(&mut self, stage: PerfStage) {
            self.stages[stage as usize].pending = now_ns();
        }

        #[inline(always)]
        pub fn end(&mut self, stage: PerfStage) {
            let buf = &mut self.stages[stage as usize];
            let elapsed = now_ns().saturating_sub(buf.pending);
            buf.push(elapsed);
        }

        #[inline(always)]
        pub fn record(&mut self, stage: PerfStage, duration_ns: u64) {
            self.stages[stage as usize].push(duration_ns);
        }

        pub fn samples(&self, stage: PerfStage) -> &[u64] {
            let buf = &self.stages[stage as usize];
            &buf.samples[..buf.count]
        }

        pub fn count(&self, stage: PerfStage) -> usize {
            self.stages[stage as usize].count
        }

        pub fn reset(&mut self) {
            for buf in self.stages.iter_mut() {
                buf.count = 0;
            }
        }
    }

    impl Default for PerfRecorder {
        fn default() -> Self {
            Self::new()
        }
    }
}

// ─── Feature: record OFF (zero-cost stubs) ──────────────────────────────────

#[cfg(not(feature = "record"))]
mod inner {
    use super::*;

    #[inline(always)]
    pub fn now_ns() -> u64 {
        0
    }

    #[derive(Default)]
    pub struct PerfRecorder;

    impl PerfRecorder {
        #[inline(always)]
        pub fn new() -> Self {
            Self
        }
        #[inline(always)]
        pub fn begin(&mut self, _stage: PerfStage) {}
        #[inline(always)]
        pub fn end(&mut self, _stage: PerfStage) {}
        #[inline(always)]
        pub fn record(&mut self, _stage: PerfStage, _duration_ns: u64) {}
        #[inline(always)]
        pub fn samples(&self, _stage: PerfStage) -> &[u64] {
            &[]
        }
        #[inline(always)]
        pub fn count(&self, _stage: PerfStage) -> usize {
            0
        }
        #[inline(always)]
        pub fn reset(&mut self) {}
    }
}

pub use inner::{PerfRecorder, now_ns};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_discriminants_index_all() {
        for (i, stage) in PerfStage::ALL.iter().enumerate() {
            assert_eq!(*stage as usize, i);
        }
    }

    #[cfg(not(feature = "record"))]
    #[test]
    fn disabled_recorder_is_zero_sized_and_empty() {
        assert_eq!(std::mem::size_of::<PerfRecorder>(), 0);
        let mut rec = PerfRecorder::new();
        rec.begin(PerfStage::WriteChannel);
        rec.end(PerfStage::WriteChannel);
        assert_eq!(rec.count(PerfStage::WriteChannel), 0);
        assert!(rec.samples(PerfStage::WriteChannel).is_empty());
    }

    #[cfg(feature = "record")]
    #[test]
    fn enabled_recorder_keeps_samples_per_stage() {
        let mut rec = PerfRecorder::new();
        rec.record(PerfStage::Drain, 42);
        rec.begin(PerfStage::StopRead);
        rec.end(PerfStage::StopRead);
        assert_eq!(rec.samples(PerfStage::Drain), &[42]);
        assert_eq!(rec.count(PerfStage::StopRead), 1);
        assert_eq!(rec.count(PerfStage::StartRead), 0);
        rec.reset();
        assert_eq!(rec.count(PerfStage::Drain), 0);
    }
}
