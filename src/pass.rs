//! Per-invocation scan passes.

use wgpu::{BindGroup, Buffer, CommandEncoder, ComputePass};

use crate::engine::ScanEngine;
use crate::op::ScanOp;
use crate::shader::Stage;

/// Where a multi-group pass keeps its locally scanned groups.
pub(crate) enum WorkBuffer {
    /// Single-group pass: no work buffer is bound.
    Unused,
    /// Caller-supplied; the pass never destroys it.
    Supplied,
    /// Allocated by the pass and destroyed with it.
    Owned(Buffer),
}

impl WorkBuffer {
    pub(crate) const fn is_owned(&self) -> bool {
        matches!(self, WorkBuffer::Owned(_))
    }
}

/// A prepared scan of one data buffer.
///
/// A pass is ready as soon as it is created and may be recorded any number
/// of times.  It borrows its engine, so the engine's pipelines and
/// auxiliary buffer stay alive for as long as the pass does.  Calling
/// [`ScanPass::destroy`] consumes the pass, so it cannot be run afterwards.
pub struct ScanPass<'engine, Op: ScanOp> {
    engine: &'engine ScanEngine<Op>,
    n: u64,
    num_groups: u32,
    data_bind_group: BindGroup,
    work: WorkBuffer,
}

impl<'engine, Op: ScanOp> ScanPass<'engine, Op> {
    pub(crate) fn new(
        engine: &'engine ScanEngine<Op>,
        n: u64,
        num_groups: u32,
        data_bind_group: BindGroup,
        work: WorkBuffer,
    ) -> Self {
        Self {
            engine,
            n,
            num_groups,
            data_bind_group,
            work,
        }
    }

    /// Number of elements scanned.
    pub const fn item_count(&self) -> u64 {
        self.n
    }

    /// Number of groups the data spans.
    pub const fn num_groups(&self) -> u32 {
        self.num_groups
    }

    /// Whether the pass takes the single-group shortcut.
    pub const fn is_single_group(&self) -> bool {
        self.num_groups == 1
    }

    /// Whether the pass allocated its own work buffer.
    pub const fn owns_work_buffer(&self) -> bool {
        self.work.is_owned()
    }

    /// The work buffer the pass allocated, if any.
    pub const fn owned_work_buffer(&self) -> Option<&Buffer> {
        match &self.work {
            WorkBuffer::Owned(buffer) => Some(buffer),
            WorkBuffer::Unused | WorkBuffer::Supplied => None,
        }
    }

    /// Record the scan into an open compute pass.
    ///
    /// Multi-group passes record [`Stage::Local`], [`Stage::Aux`] and
    /// [`Stage::Distribute`] as three dispatches, in that order; each
    /// dispatch boundary makes the previous stage's writes visible to the
    /// next.  Single-group passes record one [`Stage::Single`] dispatch.
    /// Bind groups 0 and 1 of `pass` are overwritten.
    ///
    /// The engine's auxiliary buffer is shared by all its passes: do not let
    /// passes of one engine execute concurrently from different queues.
    pub fn run(&self, pass: &mut ComputePass<'_>) {
        log::trace!("recording scan of {} items over {} groups", self.n, self.num_groups);
        if self.is_single_group() {
            pass.set_bind_group(0, &self.data_bind_group, &[]);
            pass.set_pipeline(self.engine.pipeline(Stage::Single));
            pass.dispatch_workgroups(1, 1, 1);
            return;
        }

        pass.set_bind_group(0, self.engine.aux_bind_group(), &[]);
        pass.set_bind_group(1, &self.data_bind_group, &[]);
        pass.set_pipeline(self.engine.pipeline(Stage::Local));
        pass.dispatch_workgroups(self.num_groups, 1, 1);
        pass.set_pipeline(self.engine.pipeline(Stage::Aux));
        pass.dispatch_workgroups(1, 1, 1);
        pass.set_pipeline(self.engine.pipeline(Stage::Distribute));
        pass.dispatch_workgroups(self.num_groups, 1, 1);
    }

    /// Open a compute pass on `encoder` and record the scan into it.
    pub fn encode(&self, encoder: &mut CommandEncoder) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("scan_pass"),
            timestamp_writes: None,
        });
        self.run(&mut pass);
    }

    /// Release the pass.  An owned work buffer is destroyed immediately; a
    /// supplied one is left to its owner.
    ///
    /// Only call this after the command buffers recording the pass have been
    /// submitted.  Merely dropping a pass frees an owned work buffer once
    /// the device no longer uses it.
    pub fn destroy(self) {
        if let WorkBuffer::Owned(buffer) = &self.work {
            buffer.destroy();
        }
    }
}
