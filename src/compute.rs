//! Blocking helpers for running a scan end to end.
//!
//! These encapsulate the wgpu boilerplate of uploading data, recording a
//! pass, copying the result to a host-visible buffer and waiting for it.
//! Both block the current thread until the GPU has finished.  Applications
//! that record scans into their own frame use [`crate::ScanPass::run`]
//! directly instead.

use wgpu::BufferUsages;

use crate::buffer::GpuBuffer;
use crate::context::GpuContext;
use crate::engine::ScanEngine;
use crate::error::Result;
use crate::op::ScanOp;

/// Upload `input`, scan it and return the result.
///
/// `input.len()` must satisfy the engine's length contract; otherwise the
/// call fails before any GPU work is scheduled.
pub fn scan_blocking<Op: ScanOp>(
    context: &GpuContext,
    engine: &ScanEngine<Op>,
    input: &[Op::Element],
) -> Result<Vec<Op::Element>> {
    engine
        .config()
        .groups_for(input.len() as u64, ScanEngine::<Op>::stride())?;
    let data = GpuBuffer::<Op::Element>::from_slice(context, input, BufferUsages::empty());
    let pass = engine.create_pass(input.len() as u64, &data.buffer, None)?;
    let download = GpuBuffer::<Op::Element>::new_download(context, input.len());

    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("scan_encoder"),
        });
    pass.encode(&mut encoder);
    encoder.copy_buffer_to_buffer(&data.buffer, 0, &download.buffer, 0, data.size());
    context.queue.submit([encoder.finish()]);

    let result = download.read_to_vec(context);
    pass.destroy();
    data.buffer.destroy();
    download.buffer.destroy();
    result
}

/// Scan the first `n` elements of a resident buffer in place and wait for
/// completion.  `work` is forwarded to [`ScanEngine::create_pass`].
pub fn scan_in_place_blocking<Op: ScanOp>(
    context: &GpuContext,
    engine: &ScanEngine<Op>,
    data: &GpuBuffer<Op::Element>,
    n: u64,
    work: Option<&wgpu::Buffer>,
) -> Result<()> {
    let pass = engine.create_pass(n, &data.buffer, work)?;
    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("scan_in_place_encoder"),
        });
    pass.encode(&mut encoder);
    context.queue.submit([encoder.finish()]);
    let waited = context.wait_idle();
    pass.destroy();
    waited
}
