use crate::{BenchResult, compute_stats};
use sluice_perf_recorder::{PerfRecorder, PerfStage};

/// Producer (acquisition) side stages.
pub const PRODUCER_STAGES: [PerfStage; 2] = [PerfStage::WriteChannel, PerfStage::ProducerTotal];

/// Consumer (drain) side stages.
pub const CONSUMER_STAGES: [PerfStage; 4] = [
    PerfStage::StartRead,
    PerfStage::Drain,
    PerfStage::StopRead,
    PerfStage::ConsumerTotal,
];

/// Converts every non-empty stage of `recorder` into a `BenchResult`.
pub fn stage_results(recorder: &PerfRecorder, prefix: &str) -> Vec<BenchResult> {
    PerfStage::ALL
        .iter()
        .filter_map(|&stage| {
            let mut samples = recorder.samples(stage).to_vec();
            if samples.is_empty() {
                return None;
            }
            Some(BenchResult {
                name: format!("{prefix}/{}", stage.name()),
                unit: "ns".to_string(),
                stats: compute_stats(&mut samples),
            })
        })
        .collect()
}

fn p50_of(recorder: &PerfRecorder, stage: PerfStage) -> u64 {
    let mut v = recorder.samples(stage).to_vec();
    if v.is_empty() {
        return 0;
    }
    v.sort_unstable();
    v[v.len() / 2]
}

pub fn print_stage_table(recorder: &PerfRecorder, stages: &[PerfStage], total_stage: PerfStage) {
    println!(
        "  {:<16} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}  {:>6}",
        "Stage", "p50", "p90", "p99", "p99.9", "max", "count", "% tot"
    );
    println!("  {}", "\u{2500}".repeat(84));

    let total_p50 = p50_of(recorder, total_stage);
    for &stage in stages {
        let mut v = recorder.samples(stage).to_vec();
        if v.is_empty() {
            continue;
        }
        let stats = compute_stats(&mut v);
        let share = if stage == total_stage {
            "100%".to_string()
        } else if total_p50 > 0 {
            format!("{:.0}%", stats.p50 as f64 / total_p50 as f64 * 100.0)
        } else {
            "-".to_string()
        };
        println!(
            "  {:<16} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}  {:>6}",
            stage.name(),
            stats.p50,
            stats.p90,
            stats.p99,
            stats.p999,
            stats.max,
            stats.count,
            share
        );
    }
}

pub fn print_producer_report(recorder: &PerfRecorder) {
    println!("\n  Producer per-stage timing (ns):\n");
    print_stage_table(recorder, &PRODUCER_STAGES, PerfStage::ProducerTotal);
}

pub fn print_consumer_report(recorder: &PerfRecorder) {
    println!("\n  Consumer per-stage timing (ns):\n");
    print_stage_table(recorder, &CONSUMER_STAGES, PerfStage::ConsumerTotal);
}
