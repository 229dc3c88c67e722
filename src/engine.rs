//! The scan engine: configuration, auxiliary storage and compiled stages.
//!
//! A [`ScanEngine`] is built once per configuration and operator.  It owns
//! the auxiliary buffer that holds one group's worth of group totals, the
//! two bind group layouts every pass binds against and the four compute
//! pipelines generated from one WGSL module.  Passes are cheap: they only
//! create bind groups (and, when asked to, a work buffer).
//!
//! # Sharing the auxiliary buffer
//!
//! Every pass created from an engine scans its group totals in the engine's
//! single auxiliary buffer.  Recording several passes one after another into
//! the same command stream is fine, since each dispatch boundary orders them.
//! Submitting passes of one engine from independent queues so that they
//! overlap on the device is a data race on that buffer and must be avoided
//! by the caller; use one engine per concurrent stream instead.

use std::marker::PhantomData;
use std::num::NonZeroU64;

use wgpu::util::DeviceExt;
use wgpu::{BindGroup, BindGroupLayout, Buffer, BufferUsages, ComputePipeline, Device};

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::op::{AddF32, ScanOp};
use crate::pass::{ScanPass, WorkBuffer};
use crate::shader::{self, Stage};

/// A reusable work-efficient scan over buffers of `Op::Element`.
pub struct ScanEngine<Op: ScanOp = AddF32> {
    device: Device,
    config: ScanConfig,
    aux: Buffer,
    aux_layout: BindGroupLayout,
    data_layout: BindGroupLayout,
    aux_bind_group: BindGroup,
    local: ComputePipeline,
    aux_scan: ComputePipeline,
    distribute: ComputePipeline,
    single: ComputePipeline,
    _op: PhantomData<fn() -> Op>,
}

impl ScanEngine<AddF32> {
    /// Engine with the default configuration: 32-bit float addition,
    /// 256 lanes of 256 items, inclusive output.
    pub fn with_defaults(device: &Device) -> Result<Self> {
        Self::new(device, ScanConfig::default())
    }
}

impl<Op: ScanOp> ScanEngine<Op> {
    /// Build an engine for `config`.
    ///
    /// Rejects invalid group shapes before touching the device, then
    /// compiles the scan module inside a validation error scope so that a
    /// bad operator expression surfaces as [`ScanError::Shader`] rather than
    /// through the device's uncaptured-error handler.
    pub fn new(device: &Device, config: ScanConfig) -> Result<Self> {
        let stride = Self::stride();
        config.validate(stride)?;
        check_device_limits(device, &config, stride)?;

        let group_bytes = NonZeroU64::new(config.items_per_group() * stride)
            .ok_or_else(|| ScanError::Config("a group must span at least one byte".into()))?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("scan_shader"),
            source: wgpu::ShaderSource::Wgsl(shader::scan_wgsl::<Op>(&config).into()),
        });

        let aux_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scan_aux_layout"),
            entries: &[storage_entry(0, group_bytes)],
        });
        let data_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scan_data_layout"),
            entries: &[storage_entry(0, group_bytes), storage_entry(1, group_bytes)],
        });

        let common_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("scan_common_layout"),
            bind_group_layouts: &[&aux_layout, &data_layout],
            push_constant_ranges: &[],
        });
        let single_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("scan_single_layout"),
            bind_group_layouts: &[&aux_layout],
            push_constant_ranges: &[],
        });

        let pipeline = |stage: Stage, layout: &wgpu::PipelineLayout| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(stage.label()),
                layout: Some(layout),
                module: &module,
                entry_point: Some(stage.entry_point()),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        };
        let local = pipeline(Stage::Local, &common_layout);
        let aux_scan = pipeline(Stage::Aux, &common_layout);
        let distribute = pipeline(Stage::Distribute, &common_layout);
        let single = pipeline(Stage::Single, &single_layout);

        // Identity-filled so the buffer never holds undefined totals.
        let identity = vec![Op::identity(); config.items_per_group() as usize];
        let aux = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("scan_aux"),
            contents: bytemuck::cast_slice(&identity),
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
        });
        let aux_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scan_aux_bind_group"),
            layout: &aux_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: aux.as_entire_binding(),
            }],
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(ScanError::Shader(error.to_string()));
        }

        log::debug!(
            "scan engine ready: {} lanes x {} items ({} per group, {:?}, {}), up to {} items",
            config.threads_per_group,
            config.items_per_thread,
            config.items_per_group(),
            config.kind,
            Op::WGSL_TYPE,
            config.max_items(stride),
        );

        Ok(Self {
            device: device.clone(),
            config,
            aux,
            aux_layout,
            data_layout,
            aux_bind_group,
            local,
            aux_scan,
            distribute,
            single,
            _op: PhantomData,
        })
    }

    /// Bytes per element.
    pub const fn stride() -> u64 {
        std::mem::size_of::<Op::Element>() as u64
    }

    /// The validated configuration.
    pub const fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Elements scanned by one group.
    pub const fn items_per_group(&self) -> u64 {
        self.config.items_per_group()
    }

    /// Smallest valid pass length: exactly one group.
    pub const fn min_items(&self) -> u64 {
        self.config.min_items()
    }

    /// Largest valid pass length.
    pub fn max_items(&self) -> u64 {
        self.config.max_items(Self::stride())
    }

    /// Byte size of [`Self::min_items`] elements.
    pub const fn min_size(&self) -> u64 {
        self.config.min_size(Self::stride())
    }

    /// Byte size of [`Self::max_items`] elements.
    pub fn max_size(&self) -> u64 {
        self.config.max_size(Self::stride())
    }

    /// The engine-owned buffer of group totals.
    pub const fn aux_buffer(&self) -> &Buffer {
        &self.aux
    }

    /// Prepare a scan of the first `n` elements of `data`, in place.
    ///
    /// `n` must be a multiple of [`Self::items_per_group`] within
    /// `[min_items, max_items]`; anything else is rejected before any
    /// resource is created.  When `n` spans several groups a work buffer of
    /// `n` elements is needed: pass one in to reuse it (the pass never
    /// destroys it) or pass `None` to have the pass allocate and own one.
    /// A single-group pass ignores `work`.
    ///
    /// `data` and a supplied `work` need the `STORAGE` usage; without it
    /// the call fails with [`ScanError::BufferUsage`].
    pub fn create_pass(&self, n: u64, data: &Buffer, work: Option<&Buffer>) -> Result<ScanPass<'_, Op>> {
        let num_groups = self.config.groups_for(n, Self::stride())?;
        let bytes = n * Self::stride();
        check_usage(data)?;
        check_capacity(data, bytes)?;
        let binding_size = NonZeroU64::new(bytes);

        if num_groups == 1 {
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("scan_data_single_bind_group"),
                layout: &self.aux_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: data,
                        offset: 0,
                        size: binding_size,
                    }),
                }],
            });
            log::debug!("scan pass over {n} items (single group)");
            return Ok(ScanPass::new(self, n, num_groups, bind_group, WorkBuffer::Unused));
        }

        let (bind_group, work) = match work {
            Some(buffer) => {
                check_usage(buffer)?;
                check_capacity(buffer, bytes)?;
                (self.data_bind_group(data, buffer, binding_size), WorkBuffer::Supplied)
            }
            None => {
                let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("scan_work"),
                    size: bytes,
                    usage: BufferUsages::STORAGE,
                    mapped_at_creation: false,
                });
                (self.data_bind_group(data, &buffer, binding_size), WorkBuffer::Owned(buffer))
            }
        };
        log::debug!(
            "scan pass over {n} items ({num_groups} groups, {} work buffer)",
            if work.is_owned() { "owned" } else { "supplied" }
        );
        Ok(ScanPass::new(self, n, num_groups, bind_group, work))
    }

    /// Release the auxiliary buffer now instead of when the engine drops.
    ///
    /// Consumes the engine; passes borrow it, so none can outlive this call.
    pub fn destroy(self) {
        self.aux.destroy();
    }

    fn data_bind_group(&self, data: &Buffer, work: &Buffer, size: Option<NonZeroU64>) -> BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scan_data_bind_group"),
            layout: &self.data_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding { buffer: data, offset: 0, size }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding { buffer: work, offset: 0, size }),
                },
            ],
        })
    }

    pub(crate) fn pipeline(&self, stage: Stage) -> &ComputePipeline {
        match stage {
            Stage::Local => &self.local,
            Stage::Aux => &self.aux_scan,
            Stage::Distribute => &self.distribute,
            Stage::Single => &self.single,
        }
    }

    pub(crate) const fn aux_bind_group(&self) -> &BindGroup {
        &self.aux_bind_group
    }
}

fn storage_entry(binding: u32, min_binding_size: NonZeroU64) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: Some(min_binding_size),
        },
        count: None,
    }
}

fn check_usage(buffer: &Buffer) -> Result<()> {
    let missing = BufferUsages::STORAGE.difference(buffer.usage());
    if !missing.is_empty() {
        return Err(ScanError::BufferUsage { missing });
    }
    Ok(())
}

fn check_capacity(buffer: &Buffer, needed: u64) -> Result<()> {
    let actual = buffer.size();
    if actual < needed {
        return Err(ScanError::BufferTooSmall { needed, actual });
    }
    Ok(())
}

/// Reject configurations the device cannot execute, so they fail here
/// rather than as validation errors at dispatch time.
fn check_device_limits(device: &Device, config: &ScanConfig, stride: u64) -> Result<()> {
    let limits = device.limits();
    if config.threads_per_group > limits.max_compute_workgroup_size_x
        || config.threads_per_group > limits.max_compute_invocations_per_workgroup
    {
        return Err(ScanError::Unsupported(format!(
            "device allows {} invocations per workgroup, configuration needs {}",
            limits.max_compute_invocations_per_workgroup, config.threads_per_group
        )));
    }
    let shared_bytes = u64::from(shader::shared_len(config.threads_per_group)) * stride;
    if shared_bytes > u64::from(limits.max_compute_workgroup_storage_size) {
        return Err(ScanError::Unsupported(format!(
            "scan tree needs {shared_bytes} bytes of workgroup memory, device allows {}",
            limits.max_compute_workgroup_storage_size
        )));
    }
    let max_groups = config.max_items(stride) / config.items_per_group();
    if max_groups > u64::from(limits.max_compute_workgroups_per_dimension) {
        return Err(ScanError::Unsupported(format!(
            "up to {max_groups} groups per dispatch, device allows {}",
            limits.max_compute_workgroups_per_dimension
        )));
    }
    let max_bytes = config.max_size(stride);
    if max_bytes > u64::from(limits.max_storage_buffer_binding_size) {
        return Err(ScanError::Unsupported(format!(
            "storage bindings of {max_bytes} bytes exceed the device limit of {}",
            limits.max_storage_buffer_binding_size
        )));
    }
    Ok(())
}
