//! CPU implementations used as test oracles.
//!
//! [`inclusive_scan`] and [`exclusive_scan`] are the trivial sequential
//! running folds that every GPU result is checked against.
//! [`HostScan`] replays the three kernels lane by lane on the host, with
//! the same padded shared-memory layout, tree rounds and auxiliary buffer
//! handling.  It lets the algorithm be checked exhaustively without a
//! device, including odd lane counts and stale auxiliary slots.

use crate::config::{ScanConfig, ScanKind};
use crate::error::Result;
use crate::op::ScanOp;
use crate::shader::{conflict_free_offset, shared_len, tree_size};

/// Sequential inclusive scan: `out[i] = in[0] ⊕ … ⊕ in[i]`.
pub fn inclusive_scan<Op: ScanOp>(input: &[Op::Element]) -> Vec<Op::Element> {
    let mut acc = Op::identity();
    input
        .iter()
        .map(|&x| {
            acc = Op::combine(acc, x);
            acc
        })
        .collect()
}

/// Sequential exclusive scan: `out[i] = in[0] ⊕ … ⊕ in[i - 1]`.
pub fn exclusive_scan<Op: ScanOp>(input: &[Op::Element]) -> Vec<Op::Element> {
    let mut acc = Op::identity();
    input
        .iter()
        .map(|&x| {
            let before = acc;
            acc = Op::combine(acc, x);
            before
        })
        .collect()
}

/// Sequential scan of the requested kind.
pub fn scan<Op: ScanOp>(input: &[Op::Element], kind: ScanKind) -> Vec<Op::Element> {
    match kind {
        ScanKind::Inclusive => inclusive_scan::<Op>(input),
        ScanKind::Exclusive => exclusive_scan::<Op>(input),
    }
}

/// Host replay of the GPU engine, including its persistent auxiliary
/// buffer.
pub struct HostScan<Op: ScanOp> {
    config: ScanConfig,
    aux: Vec<Op::Element>,
}

impl<Op: ScanOp> HostScan<Op> {
    /// Validate `config` exactly as the engine does and identity-fill the
    /// auxiliary buffer.
    pub fn new(config: ScanConfig) -> Result<Self> {
        config.validate(std::mem::size_of::<Op::Element>() as u64)?;
        Ok(Self {
            config,
            aux: vec![Op::identity(); config.items_per_group() as usize],
        })
    }

    /// The auxiliary buffer as the last run left it.
    pub fn aux(&self) -> &[Op::Element] {
        &self.aux
    }

    /// Overwrite the auxiliary buffer, e.g. with garbage to check that
    /// unused slots never leak into a result.
    pub fn aux_mut(&mut self) -> &mut [Op::Element] {
        &mut self.aux
    }

    /// Scan `data` in place, subject to the same length contract as
    /// [`crate::ScanEngine::create_pass`].
    pub fn run(&mut self, data: &mut [Op::Element]) -> Result<()> {
        let stride = std::mem::size_of::<Op::Element>() as u64;
        let num_groups = self.config.groups_for(data.len() as u64, stride)? as usize;
        let exclusive = self.config.kind == ScanKind::Exclusive;

        if num_groups == 1 {
            let live = data.len();
            group_scan::<Op>(&self.config, data, live, exclusive);
            return Ok(());
        }

        let per_group = self.config.items_per_group() as usize;
        let mut work = vec![Op::identity(); data.len()];

        // Local: every group scans its slice into `work` and publishes its total.
        for group in 0..num_groups {
            let range = group * per_group..(group + 1) * per_group;
            work[range.clone()].copy_from_slice(&data[range]);
            let slice = &mut work[group * per_group..(group + 1) * per_group];
            self.aux[group] = group_scan::<Op>(&self.config, slice, per_group, exclusive);
        }

        // Aux: inclusive scan of the live totals; dead slots read as identity.
        group_scan::<Op>(&self.config, &mut self.aux, num_groups, false);

        // Distribute.
        for group in 0..num_groups {
            for i in group * per_group..(group + 1) * per_group {
                data[i] = if group == 0 {
                    work[i]
                } else {
                    Op::combine(self.aux[group - 1], work[i])
                };
            }
        }
        Ok(())
    }
}

/// One group's scan of `values` in place, as one workgroup executes it.
/// Elements at or past `live` read as the identity.  Returns the group's
/// inclusive total.
fn group_scan<Op: ScanOp>(config: &ScanConfig, values: &mut [Op::Element], live: usize, exclusive: bool) -> Op::Element {
    let threads = config.threads_per_group;
    let items = config.items_per_thread as usize;
    let tree = tree_size(threads);

    // Each lane folds its items sequentially.
    let mut lane_values = Vec::with_capacity(threads as usize);
    let mut lane_sums = vec![Op::identity(); shared_len(threads) as usize];
    for lane in 0..threads {
        let base = lane as usize * items;
        let mut acc = Op::identity();
        let mut prefixes = Vec::with_capacity(items);
        for i in base..base + items {
            let x = if i < live { values[i] } else { Op::identity() };
            if exclusive {
                prefixes.push(acc);
                acc = Op::combine(acc, x);
            } else {
                acc = Op::combine(acc, x);
                prefixes.push(acc);
            }
        }
        lane_sums[slot(lane)] = acc;
        lane_values.push((prefixes, acc));
    }
    for leaf in threads..tree {
        lane_sums[slot(leaf)] = Op::identity();
    }

    scan_lane_sums::<Op>(&mut lane_sums, tree);

    let mut total = Op::identity();
    for (lane, (prefixes, acc)) in lane_values.into_iter().enumerate() {
        let prefix = lane_sums[slot(lane as u32)];
        let base = lane * items;
        for (i, value) in prefixes.into_iter().enumerate() {
            values[base + i] = Op::combine(prefix, value);
        }
        total = Op::combine(prefix, acc);
    }
    total
}

/// Up-sweep, root reset and down-sweep over the padded tree, one round at a
/// time.  Within a round no two active lanes touch the same slot, so
/// iterating lanes sequentially matches the parallel execution.
fn scan_lane_sums<Op: ScanOp>(lane_sums: &mut [Op::Element], tree: u32) {
    let mut offset = 1;
    let mut d = tree >> 1;
    while d > 0 {
        for lane in 0..d {
            let ai = slot(offset * (2 * lane + 1) - 1);
            let bi = slot(offset * (2 * lane + 2) - 1);
            lane_sums[bi] = Op::combine(lane_sums[ai], lane_sums[bi]);
        }
        offset *= 2;
        d >>= 1;
    }

    lane_sums[slot(tree - 1)] = Op::identity();

    let mut d = 1;
    while d < tree {
        offset >>= 1;
        for lane in 0..d {
            let ai = slot(offset * (2 * lane + 1) - 1);
            let bi = slot(offset * (2 * lane + 2) - 1);
            let left = lane_sums[ai];
            let prefix = lane_sums[bi];
            lane_sums[ai] = prefix;
            lane_sums[bi] = Op::combine(prefix, left);
        }
        d *= 2;
    }
}

fn slot(index: u32) -> usize {
    conflict_free_offset(index) as usize
}
