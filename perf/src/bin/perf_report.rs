use std::hint::black_box;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Instant;

use sluice_fifo::Fifo;
use sluice_perf::report::{print_consumer_report, print_producer_report, stage_results};
use sluice_perf::*;
use sluice_perf_recorder::{PerfRecorder, PerfStage};

const CHANNELS: usize = 16;
const NUM_BLOCKS: usize = 64;
const WRITE_LEN: usize = 1024;
const PIPELINE_BLOCKS: u64 = 20_000;

fn main() {
    let mut results: Vec<BenchResult> = Vec::new();

    let bar = "\u{2550}".repeat(90);
    println!("\n{bar}");
    println!("  SLUICE PERFORMANCE REPORT");
    println!("  single-thread micro + cross-thread pipeline");
    println!("{bar}");

    section_micro(&mut results);
    section_pipeline(&mut results);
    save_results(&results);
}

fn section_micro(results: &mut Vec<BenchResult>) {
    section_header("Single-thread micro benchmarks");
    print_table_header();

    let fifo = Fifo::new(NUM_BLOCKS * WRITE_LEN);
    let r = measure_batched("fifo prepare+finish (w/r)", 200, 1_000, 5, || {
        let w = fifo.prepare_to_write(black_box(WRITE_LEN));
        fifo.finished_write(w.total());
        let r = fifo.prepare_to_read(WRITE_LEN);
        fifo.finished_read(r.total());
    });
    print_result_row(&r);
    results.push(r);

    let queue = make_queue(1, NUM_BLOCKS);
    let block = make_block(WRITE_LEN);
    let mut ts = 0i64;
    let r = measure_batched("write_channel 1024 + read cycle", 200, 200, 5, || {
        let out = queue.write_channel(0, black_box(&block), ts).expect("write");
        ts += out.written as i64;
        if let Ok(session) = queue.start_read(None) {
            black_box(session.channel(0).map(|c| c.timestamp));
            session.stop_read();
        }
    });
    print_result_row(&r);
    results.push(r);

    let queue = make_queue(CHANNELS, NUM_BLOCKS);
    let r = measure_batched("start_read+stop_read (empty, 16ch)", 200, 1_000, 5, || {
        if let Ok(session) = queue.start_read(None) {
            black_box(session.total_samples());
            session.stop_read();
        }
    });
    print_result_row(&r);
    results.push(r);
}

fn section_pipeline(results: &mut Vec<BenchResult>) {
    section_header(&format!(
        "Cross-thread pipeline: {} blocks x {CHANNELS} channels x {WRITE_LEN} samples",
        format_count(PIPELINE_BLOCKS)
    ));

    let queue = Arc::new(make_queue(CHANNELS, NUM_BLOCKS));
    let start_line = Arc::new(Barrier::new(2));
    let producer_done = Arc::new(AtomicBool::new(false));

    let producer = {
        let (queue, start_line, done) = (
            Arc::clone(&queue),
            Arc::clone(&start_line),
            Arc::clone(&producer_done),
        );
        std::thread::spawn(move || {
            let mut perf = PerfRecorder::new();
            let block = make_block(WRITE_LEN);
            let mut dropped = 0u64;
            start_line.wait();
            for i in 0..PIPELINE_BLOCKS {
                perf.begin(PerfStage::ProducerTotal);
                for chan in 0..CHANNELS {
                    while queue.free_space(chan).unwrap_or(0) < WRITE_LEN {
                        std::hint::spin_loop();
                    }
                    perf.begin(PerfStage::WriteChannel);
                    let out = queue
                        .write_channel(chan, &block, (i as usize * WRITE_LEN) as i64)
                        .expect("write");
                    perf.end(PerfStage::WriteChannel);
                    dropped += out.dropped as u64;
                }
                perf.end(PerfStage::ProducerTotal);
            }
            done.store(true, Ordering::Release);
            (perf, dropped)
        })
    };

    let mut perf = PerfRecorder::new();
    let mut drained = 0u64;
    start_line.wait();
    let started = Instant::now();
    loop {
        let finished = producer_done.load(Ordering::Acquire);
        perf.begin(PerfStage::ConsumerTotal);
        perf.begin(PerfStage::StartRead);
        let Ok(session) = queue.start_read(None) else {
            perf.end(PerfStage::StartRead);
            perf.end(PerfStage::ConsumerTotal);
            continue;
        };
        perf.end(PerfStage::StartRead);

        perf.begin(PerfStage::Drain);
        let view = session.samples();
        let mut sum = 0f32;
        for chan in 0..session.num_channels() {
            sum += view.iter_channel(chan).sum::<f32>();
        }
        black_box(sum);
        let n = session.total_samples();
        perf.end(PerfStage::Drain);

        perf.begin(PerfStage::StopRead);
        session.stop_read();
        perf.end(PerfStage::StopRead);
        perf.end(PerfStage::ConsumerTotal);

        drained += n as u64;
        if n == 0 && finished {
            break;
        }
    }
    let elapsed = started.elapsed();
    let (producer_perf, dropped) = producer.join().expect("producer panicked");

    let rate = drained as f64 / elapsed.as_secs_f64();
    println!(
        "  drained {} samples in {elapsed:?} ({}/s), dropped {dropped}",
        format_count(drained),
        format_count(rate as u64)
    );

    print_producer_report(&producer_perf);
    print_consumer_report(&perf);

    results.extend(stage_results(&producer_perf, "producer"));
    results.extend(stage_results(&perf, "consumer"));
}

fn save_results(results: &[BenchResult]) {
    // CARGO_MANIFEST_DIR = perf/, reports land next to criterion's in <workspace>/target
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("target")
        .join("sluice_perf_report.json");
    let json = match serde_json::to_string_pretty(results) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("  failed to serialise results: {e}");
            return;
        }
    };
    if let Some(dir) = path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    match std::fs::write(&path, json) {
        Ok(()) => println!("\n  results written to {}", path.display()),
        Err(e) => eprintln!("\n  failed to write {}: {e}", path.display()),
    }
}
