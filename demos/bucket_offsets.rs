//! Turning bucket counts into bucket offsets, the way a particle simulation
//! builds its spatial hash grid every step.
//!
//! Random particles are hashed into a table with one bucket per particle.
//! The per-bucket particle counts and a second table of per-particle contact
//! counts are uploaded once; one `u32` engine then records an exclusive scan
//! of each into the same command encoder.  The resulting offsets are used to
//! sort the particles by bucket, and every bucket is checked to be
//! contiguous.

use rand::Rng;
use wgpu_scan::reference::exclusive_scan;
use wgpu_scan::{AddU32, GpuBuffer, GpuContext, ScanConfig, ScanEngine, ScanKind};

const NUM_PARTICLES: usize = 16_384;
const TABLE_SIZE: usize = NUM_PARTICLES;
const GRID_SPACING: f32 = 0.05;
const MAX_CONTACTS: u32 = 16;

fn bucket_hash(cell: [i32; 3]) -> usize {
    let side = (TABLE_SIZE as f64).cbrt().ceil() as i64;
    let h = i64::from(cell[0]) + i64::from(cell[1]) * side + i64::from(cell[2]) * side * side;
    h.rem_euclid(TABLE_SIZE as i64) as usize
}

fn cell_of(position: [f32; 3]) -> [i32; 3] {
    position.map(|x| (x / GRID_SPACING).floor() as i32)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let context = GpuContext::new_blocking()?;
    let config = ScanConfig::new(256, 4).with_kind(ScanKind::Exclusive);
    let engine = ScanEngine::<AddU32>::new(&context.device, config)?;

    let mut rng = rand::thread_rng();
    let positions: Vec<[f32; 3]> = (0..NUM_PARTICLES)
        .map(|_| [rng.gen_range(-1.0..1.0), rng.gen_range(0.0..2.0), rng.gen_range(-1.0..1.0)])
        .collect();
    let buckets: Vec<usize> = positions.iter().map(|&p| bucket_hash(cell_of(p))).collect();

    let mut grid_counts = vec![0u32; TABLE_SIZE];
    for &bucket in &buckets {
        grid_counts[bucket] += 1;
    }
    let contact_counts: Vec<u32> = (0..TABLE_SIZE).map(|_| rng.gen_range(0..=MAX_CONTACTS)).collect();

    let grid = GpuBuffer::from_slice(&context, &grid_counts, wgpu::BufferUsages::empty());
    let contacts = GpuBuffer::from_slice(&context, &contact_counts, wgpu::BufferUsages::empty());
    let grid_pass = engine.create_pass(TABLE_SIZE as u64, &grid.buffer, None)?;
    let contact_pass = engine.create_pass(TABLE_SIZE as u64, &contacts.buffer, None)?;

    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("bucket_offsets_encoder"),
        });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("bucket_offsets_pass"),
            timestamp_writes: None,
        });
        grid_pass.run(&mut pass);
        contact_pass.run(&mut pass);
    }
    context.queue.submit([encoder.finish()]);

    let grid_offsets = grid.download(&context)?;
    let contact_offsets = contacts.download(&context)?;
    grid_pass.destroy();
    contact_pass.destroy();

    assert_eq!(grid_offsets, exclusive_scan::<AddU32>(&grid_counts));
    assert_eq!(contact_offsets, exclusive_scan::<AddU32>(&contact_counts));

    // Counting sort of the particles by bucket.
    let mut cursor = grid_offsets.clone();
    let mut sorted = vec![usize::MAX; NUM_PARTICLES];
    for (particle, &bucket) in buckets.iter().enumerate() {
        sorted[cursor[bucket] as usize] = particle;
        cursor[bucket] += 1;
    }
    for bucket in 0..TABLE_SIZE {
        let start = grid_offsets[bucket] as usize;
        let end = start + grid_counts[bucket] as usize;
        assert!(sorted[start..end].iter().all(|&p| buckets[p] == bucket));
    }

    let occupied = grid_counts.iter().filter(|&&c| c > 0).count();
    let fullest = grid_counts.iter().copied().max().unwrap_or(0);
    println!(
        "OK: {NUM_PARTICLES} particles sorted into {occupied} occupied buckets (fullest holds {fullest}), {} contacts",
        contact_offsets[TABLE_SIZE - 1] + contact_counts[TABLE_SIZE - 1]
    );

    engine.destroy();
    Ok(())
}
