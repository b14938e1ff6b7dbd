pub mod report;

use sluice_queue::{DataQueue, QueueConfig};
use std::time::Instant;

// ─── Statistics ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub p999: u64,
    pub count: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BenchResult {
    pub name: String,
    pub unit: String,
    pub stats: Stats,
}

/// Sorts `samples` in place and summarises them.
///
/// # Panics
/// Panics on an empty slice.
pub fn compute_stats(samples: &mut [u64]) -> Stats {
    assert!(!samples.is_empty(), "cannot compute stats on empty samples");
    samples.sort_unstable();
    let count = samples.len();
    let mean = samples.iter().sum::<u64>() as f64 / count as f64;

    Stats {
        min: samples[0],
        max: samples[count - 1],
        mean,
        p50: percentile_sorted(samples, 50.0),
        p90: percentile_sorted(samples, 90.0),
        p99: percentile_sorted(samples, 99.0),
        p999: percentile_sorted(samples, 99.9),
        count,
    }
}

/// Nearest-rank percentile of an already sorted slice.
pub fn percentile_sorted(sorted: &[u64], pct: f64) -> u64 {
    let rank = (pct / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

// ─── Measurement Harness ────────────────────────────────────────────────────

/// Times `f` in `batches` batches of `batch_size` calls, after `warmup`
/// untimed batches, and reports per-call nanoseconds.
pub fn measure_batched<F: FnMut()>(
    name: &str,
    batches: usize,
    batch_size: usize,
    warmup: usize,
    mut f: F,
) -> BenchResult {
    for _ in 0..warmup * batch_size {
        f();
    }

    let mut samples = Vec::with_capacity(batches);
    for _ in 0..batches {
        let start = Instant::now();
        for _ in 0..batch_size {
            f();
        }
        let per_op = start.elapsed().as_nanos() / batch_size as u128;
        samples.push((per_op as u64).max(1));
    }

    BenchResult {
        name: name.to_string(),
        unit: "ns/op".to_string(),
        stats: compute_stats(&mut samples),
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────────────

/// A queue at the default acquisition geometry: 1024-sample blocks.
pub fn make_queue(channels: usize, num_blocks: usize) -> DataQueue {
    DataQueue::new(QueueConfig {
        block_size: 1024,
        num_blocks,
        channels,
        sample_rate: 30_000,
    })
    .expect("valid bench geometry")
}

/// A recognisable non-constant block.
pub fn make_block(len: usize) -> Vec<f32> {
    (0..len).map(|i| (i % 97) as f32 * 0.01).collect()
}

// ─── Output ─────────────────────────────────────────────────────────────────

pub fn format_count(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        format!("{}", n)
    }
}

pub fn print_table_header() {
    println!(
        "  {:<34} {:>8} {:>8} {:>8} {:>8} {:>8}  unit",
        "Benchmark", "min", "p50", "p90", "p99", "max",
    );
    println!("  {}", "─".repeat(90));
}

pub fn print_result_row(r: &BenchResult) {
    println!(
        "  {:<34} {:>8} {:>8} {:>8} {:>8} {:>8}  {}",
        r.name, r.stats.min, r.stats.p50, r.stats.p90, r.stats.p99, r.stats.max, r.unit,
    );
}

pub fn section_header(title: &str) {
    println!("\n{}", "─".repeat(90));
    println!("  {title}");
    println!("{}\n", "─".repeat(90));
}
