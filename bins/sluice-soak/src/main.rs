use anyhow::{Context, anyhow};
use sluice_config::{SluiceConfig, SoakSection};
use sluice_perf_recorder::{PerfRecorder, PerfStage};
use sluice_queue::{DataQueue, QueueConfig, ReadSession};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// What the acquisition thread pushed.
#[derive(Debug, Default)]
struct ProducerReport {
    blocks: u64,
    written: u64,
    dropped: u64,
}

/// What the drain thread saw.
#[derive(Debug, Default)]
struct ConsumerReport {
    sessions: u64,
    samples: u64,
    /// Reads whose timestamp jumped forward (samples lost to overflow).
    gaps: u64,
    /// Reads whose timestamp went backwards. Always a bug.
    regressions: u64,
    energy: f64,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Pushes one sine tone per channel at the configured sample rate, one
/// `write_block_len` block per channel per tick.
fn acquire(queue: &DataQueue, soak: &SoakSection, running: &AtomicBool) -> ProducerReport {
    let mut report = ProducerReport::default();
    let mut perf = PerfRecorder::new();
    let channels = queue.num_channels();
    let rate = queue.sample_rate() as f64;
    let len = soak.write_block_len;
    let period = Duration::from_secs_f64(len as f64 / rate);

    let mut block = vec![0f32; len];
    let mut timestamp: i64 = 0;
    let mut next_tick = Instant::now();

    while running.load(Ordering::Relaxed) {
        perf.begin(PerfStage::ProducerTotal);
        for chan in 0..channels {
            let freq = 50.0 * (chan + 1) as f64;
            for (i, s) in block.iter_mut().enumerate() {
                let t = (timestamp + i as i64) as f64 / rate;
                *s = (std::f64::consts::TAU * freq * t).sin() as f32;
            }
            perf.begin(PerfStage::WriteChannel);
            let outcome = queue.write_channel(chan, &block, timestamp);
            perf.end(PerfStage::WriteChannel);
            match outcome {
                Ok(out) => {
                    report.written += out.written as u64;
                    report.dropped += out.dropped as u64;
                }
                Err(err) => warn!(channel = chan, %err, "write rejected"),
            }
        }
        perf.end(PerfStage::ProducerTotal);
        timestamp += len as i64;
        report.blocks += 1;

        next_tick += period;
        if let Some(wait) = next_tick.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }

    log_stages("producer", &perf, &[PerfStage::WriteChannel, PerfStage::ProducerTotal]);
    report
}

/// Opens a read session, timing it. A refused open closes both stages it began.
fn open_session<'q>(
    queue: &'q DataQueue,
    perf: &mut PerfRecorder,
    read_max: Option<usize>,
) -> Option<ReadSession<'q>> {
    perf.begin(PerfStage::ConsumerTotal);
    perf.begin(PerfStage::StartRead);
    let session = queue.start_read(read_max);
    perf.end(PerfStage::StartRead);
    match session {
        Ok(session) => Some(session),
        Err(err) => {
            perf.end(PerfStage::ConsumerTotal);
            warn!(%err, "read session refused");
            None
        }
    }
}

/// Opens read sessions until the producer has stopped and the queue is empty,
/// checking that every channel's timestamps pick up where the last read ended.
fn drain(queue: &DataQueue, soak: &SoakSection, producer_done: &AtomicBool) -> ConsumerReport {
    let mut report = ConsumerReport::default();
    let mut perf = PerfRecorder::new();
    let mut expected: Vec<Option<i64>> = vec![None; queue.num_channels()];
    let poll = Duration::from_micros(soak.poll_interval_us);
    let read_max = Some(soak.read_max);

    loop {
        // Sample the flag before reading so nothing written after it is missed.
        let finished = producer_done.load(Ordering::Acquire);

        let Some(session) = open_session(queue, &mut perf, read_max) else {
            std::thread::sleep(poll);
            continue;
        };

        perf.begin(PerfStage::Drain);
        let view = session.samples();
        for (chan, read) in session.channels().iter().enumerate() {
            if read.is_empty() {
                continue;
            }
            if let Some(want) = expected[chan] {
                if read.timestamp > want {
                    report.gaps += 1;
                    debug!(channel = chan, lost = read.timestamp.wrapping_sub(want), "timestamp gap");
                } else if read.timestamp < want {
                    report.regressions += 1;
                    warn!(channel = chan, expected = want, got = read.timestamp, "timestamp went backwards");
                }
            }
            expected[chan] = Some(read.timestamp.wrapping_add(read.len() as i64));
            report.energy += view
                .iter_channel(chan)
                .map(|s| (s as f64) * (s as f64))
                .sum::<f64>();
        }
        let drained = session.total_samples();
        perf.end(PerfStage::Drain);

        perf.begin(PerfStage::StopRead);
        session.stop_read();
        perf.end(PerfStage::StopRead);
        perf.end(PerfStage::ConsumerTotal);

        report.sessions += 1;
        report.samples += drained as u64;
        if drained == 0 {
            if finished {
                break;
            }
            std::thread::sleep(poll);
        }
    }

    log_stages(
        "consumer",
        &perf,
        &[
            PerfStage::StartRead,
            PerfStage::Drain,
            PerfStage::StopRead,
            PerfStage::ConsumerTotal,
        ],
    );
    report
}

fn log_stages(side: &str, perf: &PerfRecorder, stages: &[PerfStage]) {
    for &stage in stages {
        let mut samples = perf.samples(stage).to_vec();
        if samples.is_empty() {
            continue;
        }
        samples.sort_unstable();
        let pct = |p: usize| samples[(samples.len() - 1) * p / 100];
        info!(
            side,
            stage = stage.name(),
            count = samples.len(),
            p50_ns = pct(50),
            p99_ns = pct(99),
            max_ns = samples[samples.len() - 1],
            "stage latency"
        );
    }
}

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            SluiceConfig::load(path.as_str()).with_context(|| format!("loading config {path}"))?
        }
        None => SluiceConfig::default(),
    };
    init_tracing(&config.log_level);

    let q = &config.queue;
    let queue = Arc::new(
        DataQueue::new(QueueConfig {
            block_size: q.block_size,
            num_blocks: q.num_blocks,
            channels: q.channels,
            sample_rate: q.sample_rate,
        })
        .context("building data queue")?,
    );
    info!(
        channels = queue.num_channels(),
        block_size = queue.block_size(),
        num_blocks = queue.num_blocks(),
        capacity = queue.capacity(),
        sample_rate = queue.sample_rate(),
        duration_secs = config.soak.duration_secs,
        "SLUICE: soak starting"
    );

    let running = Arc::new(AtomicBool::new(true));
    let producer_done = Arc::new(AtomicBool::new(false));

    let producer = {
        let (queue, running, soak) = (Arc::clone(&queue), Arc::clone(&running), config.soak.clone());
        std::thread::Builder::new()
            .name("sluice-acquire".into())
            .spawn(move || acquire(&queue, &soak, &running))
            .context("spawning acquisition thread")?
    };
    let consumer = {
        let (queue, done, soak) = (Arc::clone(&queue), Arc::clone(&producer_done), config.soak.clone());
        std::thread::Builder::new()
            .name("sluice-drain".into())
            .spawn(move || drain(&queue, &soak, &done))
            .context("spawning drain thread")?
    };

    std::thread::sleep(Duration::from_secs(config.soak.duration_secs));
    running.store(false, Ordering::Relaxed);
    let produced = producer
        .join()
        .map_err(|_| anyhow!("acquisition thread panicked"))?;
    producer_done.store(true, Ordering::Release);
    let consumed = consumer
        .join()
        .map_err(|_| anyhow!("drain thread panicked"))?;

    let rms = if consumed.samples > 0 {
        (consumed.energy / consumed.samples as f64).sqrt()
    } else {
        0.0
    };
    info!(
        blocks = produced.blocks,
        written = produced.written,
        dropped = produced.dropped,
        overflow_events = queue.overflow_events(),
        sessions = consumed.sessions,
        drained = consumed.samples,
        gaps = consumed.gaps,
        rms,
        "SLUICE: soak finished"
    );

    if consumed.samples != produced.written {
        anyhow::bail!(
            "drained {} samples but {} were written",
            consumed.samples,
            produced.written
        );
    }
    if consumed.regressions > 0 {
        anyhow::bail!("{} reads went back in time", consumed.regressions);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_session_closes_its_stages() {
        let queue = DataQueue::new(QueueConfig {
            block_size: 4,
            num_blocks: 2,
            channels: 1,
            sample_rate: 1_000,
        })
        .unwrap();
        let held = queue.start_read(None).unwrap();

        let mut perf = PerfRecorder::new();
        assert!(open_session(&queue, &mut perf, None).is_none());
        assert_eq!(
            perf.count(PerfStage::StartRead),
            perf.count(PerfStage::ConsumerTotal)
        );

        held.stop_read();
        let session = open_session(&queue, &mut perf, None).unwrap();
        assert_eq!(session.total_samples(), 0);
    }
}
