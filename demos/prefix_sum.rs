//! Prefix sum on the GPU versus the CPU.
//!
//! Scans arrays of random 32-bit floats in `[-1, 1)` with the default
//! engine (256 lanes of 256 items) for every power-of-two length the
//! engine accepts (or the `start_log..=end_log` subrange given on the
//! command line), then compares the time per pass against a sequential
//! CPU scan.  Every size is first checked against the CPU result.
//!
//! ```text
//! cargo run --release --example prefix_sum -- [--no-transfer] [iterations [start_log [end_log]]]
//! ```
//!
//! With `--no-transfer` the data stays resident on the device and only the
//! scan itself is timed; otherwise every pass includes the upload and the
//! readback, which is what a one-shot caller pays.

use std::time::{Duration, Instant};

use rand::Rng;
use wgpu_scan::reference::inclusive_scan;
use wgpu_scan::{scan_blocking, scan_in_place_blocking, AddF32, GpuBuffer, GpuContext, ScanEngine};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut transfer = true;
    let mut numbers = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--no-transfer" => transfer = false,
            other => numbers.push(other.parse::<u32>()?),
        }
    }
    let iterations = numbers.first().copied().unwrap_or(10);

    let context = GpuContext::new_blocking()?;
    let engine = ScanEngine::with_defaults(&context.device)?;
    let min_log = engine.min_items().trailing_zeros();
    let max_log = engine.max_items().ilog2();
    // Sizes outside the engine's contract are clamped to it.
    let start_log = numbers.get(1).copied().unwrap_or(min_log).clamp(min_log, max_log);
    let end_log = numbers.get(2).copied().unwrap_or(max_log).clamp(start_log, max_log);

    println!(
        "Inclusive f32 scan, {} items per group, {} iterations per size ({})",
        engine.items_per_group(),
        iterations,
        if transfer { "including transfers" } else { "resident data" }
    );
    println!("{:>10} {:>12} {:>12} {:>10} {:>12}", "n", "GPU/pass", "CPU/pass", "GFLOP/s", "max |err|");

    let mut rng = rand::thread_rng();
    for log_n in start_log..=end_log {
        let n = 1usize << log_n;
        let input: Vec<f32> = (0..n).map(|_| rng.gen_range(-1.0f32..1.0)).collect();

        let expected = inclusive_scan::<AddF32>(&input);
        let actual = scan_blocking(&context, &engine, &input)?;
        let max_error = expected
            .iter()
            .zip(&actual)
            .map(|(e, a)| (e - a).abs())
            .fold(0.0f32, f32::max);

        let gpu = if transfer {
            let start = Instant::now();
            for _ in 0..iterations {
                scan_blocking(&context, &engine, &input)?;
            }
            start.elapsed()
        } else {
            // Repeated in-place scans overflow eventually; only the timing matters here.
            let data = GpuBuffer::from_slice(&context, &input, wgpu::BufferUsages::empty());
            let work = GpuBuffer::<f32>::new_storage(&context, n, wgpu::BufferUsages::empty());
            let start = Instant::now();
            for _ in 0..iterations {
                scan_in_place_blocking(&context, &engine, &data, n as u64, Some(&work.buffer))?;
            }
            let elapsed = start.elapsed();
            data.buffer.destroy();
            work.buffer.destroy();
            elapsed
        };

        let start = Instant::now();
        for _ in 0..iterations {
            std::hint::black_box(inclusive_scan::<AddF32>(std::hint::black_box(&input)));
        }
        let cpu = start.elapsed();

        let gpu_pass = gpu / iterations.max(1);
        let cpu_pass = cpu / iterations.max(1);
        println!(
            "{:>10} {:>12.3?} {:>12.3?} {:>10.2} {:>12.3e}",
            n,
            gpu_pass,
            cpu_pass,
            gflops(n, gpu_pass),
            max_error
        );
    }
    Ok(())
}

/// A scan performs roughly `2n` additions (up-sweep plus down-sweep).
fn gflops(n: usize, per_pass: Duration) -> f64 {
    let seconds = per_pass.as_secs_f64();
    if seconds == 0.0 {
        return 0.0;
    }
    2.0 * n as f64 / seconds / 1e9
}
