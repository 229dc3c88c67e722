//! WGSL generation for the scan kernels.
//!
//! The kernels are written once in [`KERNELS`] against a handful of module
//! constants, an `Elem` alias and `combine`/`identity` functions.  The
//! prelude that defines those is generated per engine from the
//! [`ScanConfig`] and the [`ScanOp`], so every configuration compiles to a
//! fully specialised module with no runtime branching on group shape or
//! operator.
//!
//! Shared-memory layout: the lane totals of a group form the leaves of a
//! binary tree of [`tree_size`] slots.  Every slot index goes through
//! [`conflict_free_offset`] before it touches workgroup memory, which
//! spreads the power-of-two strides of the up- and down-sweep across
//! memory banks.

use crate::config::{ScanConfig, ScanKind};
use crate::op::ScanOp;

/// Log2 of the number of shared-memory banks assumed by the padding.
pub const LOG_NUM_BANKS: u32 = 5;

/// Pad a shared-memory slot index by one slot per bank-width of indices.
///
/// Strictly increasing, hence injective: no two logical slots share a
/// physical slot.
pub const fn conflict_free_offset(index: u32) -> u32 {
    index + (index >> LOG_NUM_BANKS)
}

/// Number of leaves in the intra-group scan tree for `threads_per_group`
/// lanes.  Leaves past the lane count hold the identity.
pub const fn tree_size(threads_per_group: u32) -> u32 {
    threads_per_group.next_power_of_two()
}

/// Length of the workgroup array holding the padded tree.
pub const fn shared_len(threads_per_group: u32) -> u32 {
    conflict_free_offset(tree_size(threads_per_group) - 1) + 1
}

/// The compute stages built from one scan module.
///
/// Stages run in separate dispatches.  A dispatch boundary is the only
/// barrier across groups, so everything a stage writes is visible to the
/// next stage recorded after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Per-group scan of `data` into `work`, publishing group totals to `aux`.
    Local,
    /// Single-group inclusive scan of the group totals in `aux`.
    Aux,
    /// Adds each group's predecessor total to `work`, writing `data`.
    Distribute,
    /// Whole scan of a one-group `data` buffer bound in place of `aux`.
    Single,
}

impl Stage {
    /// Every stage, in declaration order.
    pub const ALL: [Stage; 4] = [Stage::Local, Stage::Aux, Stage::Distribute, Stage::Single];

    /// WGSL entry point implementing the stage.
    pub const fn entry_point(self) -> &'static str {
        match self {
            Stage::Local => "scan_local",
            Stage::Aux => "scan_aux",
            Stage::Distribute => "scan_distribute",
            Stage::Single => "scan_single",
        }
    }

    /// Debug label used for pipelines and passes.
    pub const fn label(self) -> &'static str {
        match self {
            Stage::Local => "scan_local_pipeline",
            Stage::Aux => "scan_aux_pipeline",
            Stage::Distribute => "scan_distribute_pipeline",
            Stage::Single => "scan_single_pipeline",
        }
    }
}

/// Build the complete WGSL module for `config` and `Op`.
pub fn scan_wgsl<Op: ScanOp>(config: &ScanConfig) -> String {
    let threads = config.threads_per_group;
    let items = config.items_per_thread;
    let exclusive = config.kind == ScanKind::Exclusive;
    format!(
        "{header}

alias Elem = {ty};

const THREADS_PER_GROUP: u32 = {threads}u;
const ITEMS_PER_THREAD: u32 = {items}u;
const ITEMS_PER_GROUP: u32 = {per_group}u;
const TREE_SIZE: u32 = {tree}u;
const LANE_SUMS_LEN: u32 = {shared}u;
const LOG_NUM_BANKS: u32 = {LOG_NUM_BANKS}u;
const EXCLUSIVE: bool = {exclusive};

fn combine(a: Elem, b: Elem) -> Elem {{
    return {combine};
}}

fn identity() -> Elem {{
    return {identity};
}}
{KERNELS}",
        header = Op::WGSL_HEADER,
        ty = Op::WGSL_TYPE,
        per_group = config.items_per_group(),
        tree = tree_size(threads),
        shared = shared_len(threads),
        combine = Op::WGSL_COMBINE,
        identity = Op::WGSL_IDENTITY,
    )
}

/// Kernel bodies shared by every configuration.
const KERNELS: &str = r#"
@group(0) @binding(0) var<storage, read_write> aux: array<Elem>;
@group(1) @binding(0) var<storage, read_write> data: array<Elem>;
@group(1) @binding(1) var<storage, read_write> work: array<Elem>;

var<workgroup> lane_sums: array<Elem, LANE_SUMS_LEN>;

fn conflict_free_offset(index: u32) -> u32 {
    return index + (index >> LOG_NUM_BANKS);
}

// Publish a lane total as a tree leaf. Leaves past the lane count are
// seeded with the identity by the low lanes.
fn seed_lane_sums(local_id: u32, total: Elem) {
    lane_sums[conflict_free_offset(local_id)] = total;
    if (local_id < TREE_SIZE - THREADS_PER_GROUP) {
        lane_sums[conflict_free_offset(THREADS_PER_GROUP + local_id)] = identity();
    }
}

// Work-efficient exclusive scan of the tree leaves. Returns the combined
// totals of all lanes before `local_id`.
fn scan_lane_sums(local_id: u32) -> Elem {
    var offset = 1u;
    for (var d = TREE_SIZE >> 1u; d > 0u; d = d >> 1u) {
        if (local_id < d) {
            let ai = conflict_free_offset(offset * (2u * local_id + 1u) - 1u);
            let bi = conflict_free_offset(offset * (2u * local_id + 2u) - 1u);
            lane_sums[bi] = combine(lane_sums[ai], lane_sums[bi]);
        }
        offset = offset * 2u;
        workgroupBarrier();
    }

    if (local_id == 0u) {
        lane_sums[conflict_free_offset(TREE_SIZE - 1u)] = identity();
    }
    workgroupBarrier();

    for (var d = 1u; d < TREE_SIZE; d = d * 2u) {
        offset = offset >> 1u;
        if (local_id < d) {
            let ai = conflict_free_offset(offset * (2u * local_id + 1u) - 1u);
            let bi = conflict_free_offset(offset * (2u * local_id + 2u) - 1u);
            let left = lane_sums[ai];
            let prefix = lane_sums[bi];
            lane_sums[ai] = prefix;
            lane_sums[bi] = combine(prefix, left);
        }
        workgroupBarrier();
    }

    return lane_sums[conflict_free_offset(local_id)];
}

// One-group scan of `aux` in place. Slots at or past `live` read as the
// identity so stale totals never leak into the result.
fn scan_aux_in_place(local_id: u32, live: u32, exclusive: bool) {
    let base = local_id * ITEMS_PER_THREAD;
    var acc = identity();
    var values: array<Elem, ITEMS_PER_THREAD>;
    for (var i = 0u; i < ITEMS_PER_THREAD; i = i + 1u) {
        var x = identity();
        if (base + i < live) {
            x = aux[base + i];
        }
        if (exclusive) {
            values[i] = acc;
            acc = combine(acc, x);
        } else {
            acc = combine(acc, x);
            values[i] = acc;
        }
    }
    seed_lane_sums(local_id, acc);
    workgroupBarrier();

    let prefix = scan_lane_sums(local_id);
    for (var i = 0u; i < ITEMS_PER_THREAD; i = i + 1u) {
        aux[base + i] = combine(prefix, values[i]);
    }
}

@compute @workgroup_size(THREADS_PER_GROUP, 1, 1)
fn scan_local(
    @builtin(workgroup_id) group_vec: vec3<u32>,
    @builtin(local_invocation_id) local_vec: vec3<u32>) {
    let group_id = group_vec.x;
    let local_id = local_vec.x;
    let base = group_id * ITEMS_PER_GROUP + local_id * ITEMS_PER_THREAD;

    var acc = identity();
    var values: array<Elem, ITEMS_PER_THREAD>;
    for (var i = 0u; i < ITEMS_PER_THREAD; i = i + 1u) {
        let x = data[base + i];
        if (EXCLUSIVE) {
            values[i] = acc;
            acc = combine(acc, x);
        } else {
            acc = combine(acc, x);
            values[i] = acc;
        }
    }
    seed_lane_sums(local_id, acc);
    workgroupBarrier();

    let prefix = scan_lane_sums(local_id);
    for (var i = 0u; i < ITEMS_PER_THREAD; i = i + 1u) {
        work[base + i] = combine(prefix, values[i]);
    }
    if (local_id == THREADS_PER_GROUP - 1u) {
        aux[group_id] = combine(prefix, acc);
    }
}

@compute @workgroup_size(THREADS_PER_GROUP, 1, 1)
fn scan_aux(@builtin(local_invocation_id) local_vec: vec3<u32>) {
    let live = arrayLength(&work) / ITEMS_PER_GROUP;
    scan_aux_in_place(local_vec.x, live, false);
}

@compute @workgroup_size(THREADS_PER_GROUP, 1, 1)
fn scan_distribute(
    @builtin(workgroup_id) group_vec: vec3<u32>,
    @builtin(local_invocation_id) local_vec: vec3<u32>) {
    let group_id = group_vec.x;
    let base = group_id * ITEMS_PER_GROUP + local_vec.x * ITEMS_PER_THREAD;
    if (group_id == 0u) {
        for (var i = 0u; i < ITEMS_PER_THREAD; i = i + 1u) {
            data[base + i] = work[base + i];
        }
    } else {
        let offset = aux[group_id - 1u];
        for (var i = 0u; i < ITEMS_PER_THREAD; i = i + 1u) {
            data[base + i] = combine(offset, work[base + i]);
        }
    }
}

@compute @workgroup_size(THREADS_PER_GROUP, 1, 1)
fn scan_single(@builtin(local_invocation_id) local_vec: vec3<u32>) {
    scan_aux_in_place(local_vec.x, ITEMS_PER_GROUP, EXCLUSIVE);
}
"#;
