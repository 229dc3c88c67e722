//! Typed GPU buffers and host readback utilities.
//!
//! This module defines a [`GpuBuffer`] wrapper around [`wgpu::Buffer`]
//! that tracks the number of typed elements stored in the buffer and
//! provides convenience methods for uploading and downloading data.
//! Scan data buffers are storage buffers that can also be copied from and
//! to, so a single buffer can be uploaded, scanned in place and read back.

use std::marker::PhantomData;
use std::sync::mpsc;

use bytemuck::{cast_slice, Pod};
use wgpu::{Buffer, BufferDescriptor, BufferUsages};

use crate::error::{Result, ScanError};
use crate::GpuContext;

/// A typed GPU buffer.
///
/// The length records how many elements of type `T` the buffer holds; its
/// byte size is `len * size_of::<T>()`.
pub struct GpuBuffer<T: Pod> {
    /// The underlying wgpu buffer.
    pub buffer: Buffer,
    /// Number of `T` elements.
    pub len: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> GpuBuffer<T> {
    /// Usages every scan data buffer carries: bindable as storage and
    /// copyable in both directions.
    pub const SCAN_USAGES: BufferUsages = BufferUsages::STORAGE
        .union(BufferUsages::COPY_DST)
        .union(BufferUsages::COPY_SRC);

    /// Create a storage buffer holding a copy of `data`.
    ///
    /// The buffer has [`Self::SCAN_USAGES`] plus any extra `usage`.  The
    /// contents are written through the queue, which avoids the `MAP_WRITE`
    /// usage.
    pub fn from_slice(context: &GpuContext, data: &[T], usage: BufferUsages) -> Self {
        let this = Self::new_storage(context, data.len(), usage);
        context.queue.write_buffer(&this.buffer, 0, cast_slice(data));
        this
    }

    /// Create an uninitialised storage buffer of `len` elements with
    /// [`Self::SCAN_USAGES`] plus any extra `usage`.
    pub fn new_storage(context: &GpuContext, len: usize, usage: BufferUsages) -> Self {
        let buffer = context.device.create_buffer(&BufferDescriptor {
            label: Some("scan_data"),
            size: Self::byte_len(len),
            usage: Self::SCAN_USAGES | usage,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            len,
            _marker: PhantomData,
        }
    }

    /// Create a download buffer sized to hold `len` elements.  It has
    /// usages `COPY_DST | MAP_READ` and cannot be bound to a shader.
    pub fn new_download(context: &GpuContext, len: usize) -> Self {
        let buffer = context.device.create_buffer(&BufferDescriptor {
            label: Some("scan_download"),
            size: Self::byte_len(len),
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            len,
            _marker: PhantomData,
        }
    }

    /// Byte size of `len` elements.
    pub const fn byte_len(len: usize) -> u64 {
        (len * std::mem::size_of::<T>()) as u64
    }

    /// Byte size of this buffer's elements.
    pub const fn size(&self) -> u64 {
        Self::byte_len(self.len)
    }

    /// Overwrite the buffer's leading elements with `data` through the queue.
    ///
    /// Fails with [`ScanError::BufferTooSmall`] when `data` holds more
    /// elements than the buffer.
    pub fn write(&self, context: &GpuContext, data: &[T]) -> Result<()> {
        let needed = Self::byte_len(data.len());
        if data.len() > self.len {
            return Err(ScanError::BufferTooSmall {
                needed,
                actual: self.size(),
            });
        }
        context.queue.write_buffer(&self.buffer, 0, cast_slice(data));
        Ok(())
    }

    /// Copy the buffer into a fresh download buffer and read it back.
    ///
    /// Blocks until every previously submitted command has completed.
    pub fn download(&self, context: &GpuContext) -> Result<Vec<T>> {
        Self::readback_blocking(&context.device, &context.queue, &self.buffer, self.len)
    }

    /// Read the contents of a `MAP_READ` buffer back to the CPU.
    ///
    /// Blocks until the GPU has finished writing the buffer, then unmaps
    /// it.
    pub fn read_to_vec(&self, context: &GpuContext) -> Result<Vec<T>> {
        map_and_read(&context.device, &self.buffer, self.len)
    }

    /// Read the first `len` elements of any `COPY_SRC` buffer.
    ///
    /// A staging buffer is created, the copy is submitted and the staging
    /// buffer is mapped once the device is idle.
    pub fn readback_blocking(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        source: &Buffer,
        len: usize,
    ) -> Result<Vec<T>> {
        let size = Self::byte_len(len);
        let staging = device.create_buffer(&BufferDescriptor {
            label: Some("scan_readback_staging"),
            size,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("scan_readback_encoder"),
        });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        queue.submit([encoder.finish()]);
        let result = map_and_read(device, &staging, len);
        staging.destroy();
        result
    }
}

fn map_and_read<T: Pod>(device: &wgpu::Device, buffer: &Buffer, len: usize) -> Result<Vec<T>> {
    let slice = buffer.slice(..GpuBuffer::<T>::byte_len(len));
    let (sender, receiver) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |outcome| {
        // The receiver outlives the poll below.
        let _ = sender.send(outcome);
    });
    device
        .poll(wgpu::PollType::Wait)
        .map_err(|e| ScanError::Poll(e.to_string()))?;
    receiver
        .recv()
        .map_err(|e| ScanError::Map(e.to_string()))?
        .map_err(|e| ScanError::Map(e.to_string()))?;

    let data = slice.get_mapped_range();
    let result: Vec<T> = cast_slice(&data).to_vec();
    // The mapped view must be dropped before unmapping.
    drop(data);
    buffer.unmap();
    Ok(result)
}
