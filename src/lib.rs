//! A work-efficient parallel prefix sum (scan) for the GPU, built on
//! [wgpu](https://github.com/gfx-rs/wgpu) compute shaders.
//!
//! The scan runs in three phases.  Each group of lanes scans its own block
//! of the input with a bank-conflict-aware Blelloch up-/down-sweep and
//! publishes the block total; a single group scans those totals; a final
//! pass adds each block's predecessor total back in.  An array of exactly
//! one block skips straight to a single in-place group scan.
//!
//! The engine is generic over the element type and the associative
//! operator ([`ScanOp`]), so the same machinery turns `f32` samples into
//! running sums and `u32` bucket counts into bucket offsets.
//!
//! ```no_run
//! use wgpu_scan::{scan_blocking, GpuContext, ScanConfig, ScanEngine, AddF32};
//!
//! let context = GpuContext::new_blocking()?;
//! let engine = ScanEngine::<AddF32>::new(&context.device, ScanConfig::new(64, 4))?;
//! let input = vec![1.0f32; 4 * 256];
//! let output = scan_blocking(&context, &engine, &input)?;
//! assert_eq!(output[1023], 1024.0);
//! # Ok::<(), wgpu_scan::ScanError>(())
//! ```

pub mod buffer;
pub mod compute;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod op;
pub mod pass;
pub mod reference;
pub mod shader;

// Re-export the most common types at the crate root so that users can
// simply `use wgpu_scan::*;`.
pub use buffer::GpuBuffer;
pub use compute::{scan_blocking, scan_in_place_blocking};
pub use config::{ScanConfig, ScanKind, MAX_BUFFER_SIZE, MAX_THREADS_PER_GROUP};
pub use context::GpuContext;
pub use engine::ScanEngine;
pub use error::{Result, ScanError};
pub use op::{AddF32, AddI32, AddU32, MaxF32, MinU32, ScanOp};
pub use pass::ScanPass;
pub use shader::{conflict_free_offset, Stage, LOG_NUM_BANKS};
