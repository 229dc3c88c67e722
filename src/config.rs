//! Engine configuration and the sizing contract.
//!
//! All capacity queries here are pure functions of the configuration and
//! the element stride; they never touch the device.

use crate::error::{Result, ScanError};

/// Largest lane count a group may have.  Bounded by the workgroup
/// invocation limit of the downlevel wgpu profile.
pub const MAX_THREADS_PER_GROUP: u32 = 256;

/// Platform ceiling on the byte size of a single buffer (128 MiB).
pub const MAX_BUFFER_SIZE: u64 = 134_217_728;

/// Whether element `i` of the output includes input element `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanKind {
    /// `out[i] = in[0] ⊕ … ⊕ in[i]`
    #[default]
    Inclusive,
    /// `out[i] = in[0] ⊕ … ⊕ in[i - 1]`, with `out[0]` the identity.
    Exclusive,
}

/// Host-side configuration of a [`crate::ScanEngine`].
///
/// The defaults scan with 256 lanes folding 256 items each, i.e. 65536
/// elements per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Lanes cooperating in one group's intra-group scan, in `[1, 256]`.
    pub threads_per_group: u32,
    /// Elements each lane folds sequentially, at least 1.
    pub items_per_thread: u32,
    /// Inclusive or exclusive output.
    pub kind: ScanKind,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            threads_per_group: MAX_THREADS_PER_GROUP,
            items_per_thread: 256,
            kind: ScanKind::Inclusive,
        }
    }
}

impl ScanConfig {
    /// Configuration with the given group shape and an inclusive scan.
    pub const fn new(threads_per_group: u32, items_per_thread: u32) -> Self {
        Self {
            threads_per_group,
            items_per_thread,
            kind: ScanKind::Inclusive,
        }
    }

    /// Replace the lane count.
    pub const fn with_threads_per_group(mut self, threads_per_group: u32) -> Self {
        self.threads_per_group = threads_per_group;
        self
    }

    /// Replace the per-lane item count.
    pub const fn with_items_per_thread(mut self, items_per_thread: u32) -> Self {
        self.items_per_thread = items_per_thread;
        self
    }

    /// Replace the scan kind.
    pub const fn with_kind(mut self, kind: ScanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Elements one group scans: `threads_per_group * items_per_thread`.
    pub const fn items_per_group(&self) -> u64 {
        self.threads_per_group as u64 * self.items_per_thread as u64
    }

    /// Check the configuration for elements of `stride` bytes.
    pub fn validate(&self, stride: u64) -> Result<()> {
        if self.threads_per_group < 1 || self.threads_per_group > MAX_THREADS_PER_GROUP {
            return Err(ScanError::Config(format!(
                "threads per group must be between 1 and {MAX_THREADS_PER_GROUP}, got {}",
                self.threads_per_group
            )));
        }
        if self.items_per_thread < 1 {
            return Err(ScanError::Config("items per thread must be at least 1".into()));
        }
        if stride == 0 {
            return Err(ScanError::Config("element type must not be zero-sized".into()));
        }
        let group_bytes = self.items_per_group().saturating_mul(stride);
        if group_bytes > MAX_BUFFER_SIZE {
            return Err(ScanError::Config(format!(
                "one group spans {group_bytes} bytes, over the {MAX_BUFFER_SIZE} byte buffer limit"
            )));
        }
        Ok(())
    }

    /// Smallest valid element count: exactly one group.
    pub const fn min_items(&self) -> u64 {
        self.items_per_group()
    }

    /// Largest valid element count for elements of `stride` bytes.
    ///
    /// The group totals are scanned by a single group, so there can be at
    /// most `items_per_group` groups.  The data buffer must also fit under
    /// [`MAX_BUFFER_SIZE`], rounded down to whole groups.
    pub fn max_items(&self, stride: u64) -> u64 {
        let per_group = self.items_per_group();
        let group_bytes = per_group.saturating_mul(stride);
        if group_bytes == 0 {
            return 0;
        }
        let by_levels = per_group.saturating_mul(per_group);
        let by_bytes = (MAX_BUFFER_SIZE / group_bytes) * per_group;
        by_levels.min(by_bytes)
    }

    /// Byte size of [`Self::min_items`].
    pub const fn min_size(&self, stride: u64) -> u64 {
        self.min_items() * stride
    }

    /// Byte size of [`Self::max_items`].
    pub fn max_size(&self, stride: u64) -> u64 {
        self.max_items(stride) * stride
    }

    /// Validate an element count and return the number of groups it spans.
    pub fn groups_for(&self, n: u64, stride: u64) -> Result<u32> {
        let min = self.min_items();
        let max = self.max_items(stride);
        let multiple = self.items_per_group();
        if n < min || n > max || n % multiple != 0 {
            return Err(ScanError::InvalidLength { n, min, max, multiple });
        }
        // max_items caps the group count at items_per_group, which fits in u32
        // once validate has bounded a group to MAX_BUFFER_SIZE bytes.
        u32::try_from(n / multiple).map_err(|_| ScanError::InvalidLength { n, min, max, multiple })
    }
}
