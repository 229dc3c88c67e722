//! GPU context initialization.
//!
//! This module provides a thin wrapper around wgpu's instance, adapter,
//! device and queue objects.  The scan engine itself only needs a
//! `wgpu::Device` (plus a queue for uploads), so applications that already
//! own a device can skip this type entirely; it exists for headless use in
//! the demos, benches and tests.  The `new_blocking` constructor hides the
//! asynchronous nature of requesting an adapter and device by using the
//! [`pollster`] crate.

use wgpu::{Adapter, Device, Instance, Queue};

use crate::error::{Result, ScanError};

/// A GPU context encapsulates all state needed to submit compute work.
///
/// The context holds on to the `Instance`, `Adapter`, `Device` and
/// `Queue`.  Those types have internal reference counting so they can
/// cheaply be cloned if you need multiple references.
pub struct GpuContext {
    /// The global GPU instance.  Still required in headless use to request
    /// an adapter.
    pub instance: Instance,
    /// The physical device selected for computation.
    pub adapter: Adapter,
    /// Logical device used to create resources and command encoders.
    pub device: Device,
    /// Command submission queue.
    pub queue: Queue,
}

impl GpuContext {
    /// Create a new GPU context synchronously.
    ///
    /// Blocks the current thread while the adapter and device requests
    /// finish.  See [`Self::new_async`] for the non-blocking form.
    pub fn new_blocking() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    /// Create a new GPU context asynchronously.
    ///
    /// Picks the default adapter, checks that it can run compute shaders and
    /// requests a device with the downlevel default limits.  Those limits
    /// allow 256 invocations per workgroup and 128 MiB storage bindings,
    /// which is exactly what the largest scan configuration needs.
    pub async fn new_async() -> Result<Self> {
        let instance = Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .map_err(|_| ScanError::NoAdapter)?;

        let info = adapter.get_info();
        log::info!("using adapter {} ({:?})", info.name, info.backend);
        if info.device_type == wgpu::DeviceType::Cpu {
            log::warn!("{} is a software adapter; scans will be slow", info.name);
        }

        let capabilities = adapter.get_downlevel_capabilities();
        if !capabilities.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            return Err(ScanError::Unsupported(format!(
                "{} does not support compute shaders",
                info.name
            )));
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("wgpu_scan_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| ScanError::Device(e.to_string()))?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    /// Block until all submitted work has finished.
    pub fn wait_idle(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| ScanError::Poll(e.to_string()))
    }
}
