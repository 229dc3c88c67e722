//! Error type shared by every fallible operation in the crate.

use thiserror::Error;

/// Errors raised while acquiring a device, building a scan engine, creating
/// a pass or reading results back.
///
/// Every variant is reported synchronously by the call that triggered it.
/// Nothing is left half-constructed: a failed [`crate::ScanEngine::new`]
/// returns no engine and a failed [`crate::ScanEngine::create_pass`]
/// allocates no buffers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// No adapter could be found on this system.
    #[error("unable to find a suitable GPU adapter")]
    NoAdapter,

    /// The adapter exists but lacks a capability the engine needs.
    #[error("adapter is unsupported: {0}")]
    Unsupported(String),

    /// Logical device creation failed.
    #[error("failed to create GPU device: {0}")]
    Device(String),

    /// The engine configuration was rejected.
    #[error("invalid scan configuration: {0}")]
    Config(String),

    /// The generated WGSL failed to compile or validate.
    #[error("scan shader failed validation: {0}")]
    Shader(String),

    /// A pass was requested for an element count the engine cannot scan.
    #[error("invalid item count {n}: must be a multiple of {multiple} in [{min}, {max}]")]
    InvalidLength {
        /// Requested element count.
        n: u64,
        /// Smallest accepted count.
        min: u64,
        /// Largest accepted count.
        max: u64,
        /// Required divisor.
        multiple: u64,
    },

    /// A caller-supplied buffer cannot hold the requested elements.
    #[error("buffer too small: need {needed} bytes, buffer has {actual}")]
    BufferTooSmall {
        /// Bytes required by the pass.
        needed: u64,
        /// Size of the supplied buffer in bytes.
        actual: u64,
    },

    /// A caller-supplied buffer lacks a usage the scan binds it with.
    #[error("buffer is missing usages {missing:?}")]
    BufferUsage {
        /// Usages the buffer must additionally carry.
        missing: wgpu::BufferUsages,
    },

    /// Mapping a buffer for readback failed.
    #[error("buffer mapping failed: {0}")]
    Map(String),

    /// Waiting on the device failed.
    #[error("device polling failed: {0}")]
    Poll(String),
}

/// Shorthand used throughout the crate.
pub type Result<T, E = ScanError> = std::result::Result<T, E>;
