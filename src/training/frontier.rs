//! Frontier: breadth-first tree induction over index sets.
//!
//! Each level holds the currently unsplit nodes as disjoint ranges over the
//! bagged sample positions. The split scheduler proposes and scores
//! candidates; winners branch the pre-tree, replay their partition through
//! the branch-sense bits and emit two successor sets. Nodes without an
//! admissible split retire their samples to a pre-tree terminal.

use rand_xoshiro::Xoshiro256PlusPlus;

use crate::data::RankedFrame;
use crate::training::partition::{singleton, BranchSense, ObsPart};
use crate::training::path::{IdxPath, PathT};
use crate::training::pretree::PreTree;
use crate::training::sample::{Sample, SumCount};
use crate::training::splitting::{SplitFrontier, SplitNux, SplitOutcome};
use crate::training::TreeParams;
use crate::utils::{IdxRange, Parallelism};

/// One unsplit frontier node.
pub struct IndexSet {
    /// Positions owned within the bag layout.
    pub range: IdxRange,
    pub sum: f64,
    pub s_count: u32,
    /// Node-only impurity numerator; splits must improve on it.
    pub pre_bias: f64,
    /// Information floor inherited from the parent split.
    pub min_info: f64,
    pub pt_id: usize,
    /// Reaching path from the root.
    pub path: PathT,
    /// Classification: per-category response sums.
    pub ctg_sum: Vec<f64>,
    pub splittable: bool,
}

/// Staged layout of one (node, predictor) pair.
#[derive(Clone, Copy, Debug, Default)]
pub struct StageState {
    /// Region-relative start of the explicit segment.
    pub start: usize,
    /// Explicit cell count.
    pub expl: usize,
    /// Distinct explicit ranks; conservative at the root.
    pub rank_count: u32,
    pub singleton: bool,
}

/// Per-tree induction state.
pub struct Frontier<'a> {
    ranked: &'a RankedFrame,
    params: &'a TreeParams,
    sample: &'a Sample,
    parallelism: Parallelism,
    obs_part: ObsPart,
    idx_path: IdxPath,
    branch_sense: BranchSense,
    /// Bag position to sample index; partitioned in place as nodes split.
    rel2sample: Vec<u32>,
    scratch: Vec<u32>,
    pretree: PreTree,
}

impl<'a> Frontier<'a> {
    /// Grow one tree over a sampled response.
    pub fn one_tree(
        ranked: &'a RankedFrame,
        params: &'a TreeParams,
        sample: &'a Sample,
        rng: &mut Xoshiro256PlusPlus,
        parallelism: Parallelism,
    ) -> PreTree {
        let bag_count = sample.bag_count;
        let mut frontier = Self {
            ranked,
            params,
            sample,
            parallelism,
            obs_part: ObsPart::new(ranked, bag_count),
            idx_path: IdxPath::new(bag_count),
            branch_sense: BranchSense::new(bag_count),
            rel2sample: (0..bag_count as u32).collect(),
            scratch: Vec::with_capacity(bag_count),
            pretree: PreTree::new(bag_count, 2 * bag_count + 1),
        };
        frontier.grow(rng);
        frontier.pretree
    }

    fn grow(&mut self, rng: &mut Xoshiro256PlusPlus) {
        let n_pred = self.ranked.n_pred();

        // Root staging: buffer zero, every predictor.
        let mut stage: Vec<StageState> = (0..n_pred)
            .map(|pred| {
                let sc = self.obs_part.stage(self.ranked, self.sample, pred);
                StageState {
                    start: 0,
                    expl: sc.expl,
                    rank_count: self.ranked.rank_count(pred),
                    singleton: sc.singleton,
                }
            })
            .collect();

        let mut level = vec![self.root_init()];
        let split_frontier = SplitFrontier::new(self.ranked, self.params);
        let mut buf_idx = 0usize;
        let mut depth = 0usize;

        loop {
            self.node_stats(&mut level, depth);

            let (mut cands, node_cands) =
                split_frontier.preschedule(&level, &stage, buf_idx, rng);
            split_frontier.split_all(&self.obs_part, &level, &mut cands, self.parallelism);
            let winners = split_frontier.arg_max(&level, &cands, &node_cands, self.parallelism);

            self.branch_sense.clear();
            let mut next_level: Vec<IndexSet> = Vec::new();
            let mut split_parents: Vec<usize> = Vec::new();
            for (node_idx, winner) in winners.iter().enumerate() {
                let iset = &level[node_idx];
                match winner {
                    Some(cand_idx) => {
                        let (lh, rh) = self.consume_split(iset, &cands[*cand_idx]);
                        next_level.push(lh);
                        next_level.push(rh);
                        split_parents.push(node_idx);
                    }
                    None => self.retire(iset),
                }
            }
            if next_level.is_empty() {
                break;
            }

            // Restage each split parent's segments into the opposite buffer.
            let mut next_stage = vec![StageState::default(); next_level.len() * n_pred];
            for (parent_ord, &node_idx) in split_parents.iter().enumerate() {
                for pred in 0..n_pred {
                    let st = stage[node_idx * n_pred + pred];
                    let source = IdxRange::new(st.start, st.expl);
                    if st.singleton {
                        // Sticky: offspring stay singletons; only the index
                        // partition is maintained.
                        let counts =
                            self.obs_part
                                .index_restage(&self.idx_path, pred, buf_idx, source);
                        let starts = [st.start, st.start + counts[0]];
                        for child in 0..2 {
                            next_stage[(2 * parent_ord + child) * n_pred + pred] = StageState {
                                start: starts[child],
                                expl: counts[child],
                                rank_count: 1,
                                singleton: true,
                            };
                        }
                    } else {
                        let stats =
                            self.obs_part
                                .rank_restage(&self.idx_path, pred, buf_idx, source);
                        for (child, ps) in stats.iter().enumerate() {
                            let extent = next_level[2 * parent_ord + child].range.extent;
                            let implicit = extent - ps.expl;
                            next_stage[(2 * parent_ord + child) * n_pred + pred] = StageState {
                                start: ps.start,
                                expl: ps.expl,
                                rank_count: ps.rank_count,
                                singleton: singleton(ps.rank_count, implicit),
                            };
                        }
                    }
                }
            }

            stage = next_stage;
            level = next_level;
            buf_idx = 1 - buf_idx;
            depth += 1;
        }
    }

    fn root_init(&self) -> IndexSet {
        let s_count: u32 = self.sample.nux.iter().map(|n| n.s_count).sum();
        IndexSet {
            range: IdxRange::new(0, self.sample.bag_count),
            sum: self.sample.bag_sum,
            s_count,
            pre_bias: 0.0,
            min_info: 0.0,
            pt_id: 0,
            path: 0,
            ctg_sum: Vec::new(),
            splittable: true,
        }
    }

    /// Per-node statistics for the level: splittability, pre-bias and (for
    /// classification) category sums.
    fn node_stats(&self, level: &mut [IndexSet], depth: usize) {
        let n_ctg = self.params.n_ctg;
        let min_node = self.params.min_node;
        let depth_open = self.params.tot_levels == 0 || depth < self.params.tot_levels;
        let rel2sample = &self.rel2sample;
        let sample = self.sample;

        self.parallelism.maybe_par_for_each_mut(level, |iset| {
            iset.splittable = depth_open && iset.range.extent >= min_node && iset.range.extent >= 2;
            if n_ctg == 0 {
                iset.pre_bias = iset.sum * iset.sum / iset.s_count as f64;
            } else {
                let (ctg_sum, sum_squares) = sums_and_squares(iset.range, rel2sample, sample, n_ctg);
                iset.pre_bias = sum_squares / iset.sum;
                iset.ctg_sum = ctg_sum;
            }
        });
    }

    /// Retire a terminal node: record its samples' pre-tree node and mark
    /// their paths extinct.
    fn retire(&mut self, iset: &IndexSet) {
        for pos in iset.range.iter() {
            let s_idx = self.rel2sample[pos];
            self.pretree.set_terminal(s_idx, iset.pt_id);
            self.idx_path.set_extinct(s_idx as usize);
        }
    }

    /// Apply a winning candidate: branch the pre-tree, commit the partition
    /// through block replay, repartition the bag layout and emit the two
    /// successor sets.
    fn consume_split(&mut self, iset: &IndexSet, nux: &SplitNux) -> (IndexSet, IndexSet) {
        let pred = nux.coord.pred;
        let n_ctg = self.params.n_ctg;
        let mut ctg_expl = (n_ctg > 0).then(|| vec![SumCount::default(); n_ctg]);

        let info;
        let lh_extent;
        let lh_s_count;
        // Whether the replayed (explicit) block is the left branch: the
        // residual, having no recorded indices, must ride the unreplayed side.
        let sense_left;
        let mut sum_expl = 0.0;
        let lh_pt;
        let rh_pt;

        match &nux.outcome {
            SplitOutcome::Cut(cut) => {
                let (l, r) = self.pretree.branch_cut(
                    iset.pt_id,
                    pred as u32,
                    cut.rank_lo,
                    cut.rank_hi,
                    cut.info,
                );
                lh_pt = l as usize;
                rh_pt = r as usize;
                info = cut.info;
                lh_extent = cut.rh_inf + cut.lh_implicit;
                lh_s_count = cut.lh_s_count;
                sense_left = cut.lh_implicit == 0;
                let replay = if sense_left {
                    IdxRange::new(nux.range.start, cut.rh_inf)
                } else {
                    IdxRange::new(nux.range.start + cut.rh_inf, nux.range.extent - cut.rh_inf)
                };
                sum_expl = self.obs_part.block_replay(
                    pred,
                    nux.buf_idx,
                    replay,
                    &mut self.branch_sense,
                    ctg_expl.as_deref_mut(),
                );
            }
            SplitOutcome::Runs { split, set } => {
                let cardinality = self.params.cardinality[pred - self.ranked.n_pred_num()];
                let (l, r) =
                    self.pretree
                        .branch_bits(iset.pt_id, pred as u32, cardinality, split.info);
                lh_pt = l as usize;
                rh_pt = r as usize;
                for code in set.lh_runs().map(|run| run.code).collect::<Vec<_>>() {
                    self.pretree.set_left_bit(iset.pt_id, code);
                }
                info = split.info;
                lh_extent = split.lh_extent;
                lh_s_count = split.lh_s_count;
                sense_left = !set.implicit_left();
                let replay_runs: Vec<IdxRange> = if sense_left {
                    set.lh_runs()
                        .filter(|run| !run.is_implicit())
                        .map(|run| IdxRange::new(run.start, run.extent))
                        .collect()
                } else {
                    set.rh_runs()
                        .filter(|run| !run.is_implicit())
                        .map(|run| IdxRange::new(run.start, run.extent))
                        .collect()
                };
                for range in replay_runs {
                    sum_expl += self.obs_part.block_replay(
                        pred,
                        nux.buf_idx,
                        range,
                        &mut self.branch_sense,
                        ctg_expl.as_deref_mut(),
                    );
                }
            }
            SplitOutcome::None => unreachable!("winner carries a split"),
        }

        let sum_l = if sense_left {
            sum_expl
        } else {
            iset.sum - sum_expl
        };

        // Stable partition of the bag layout: left block first.
        let range = iset.range;
        self.scratch.clear();
        let mut write = range.start;
        for pos in range.iter() {
            let s_idx = self.rel2sample[pos];
            let goes_left = self.branch_sense.is_explicit(s_idx) == sense_left;
            if goes_left {
                self.rel2sample[write] = s_idx;
                write += 1;
            } else {
                self.scratch.push(s_idx);
            }
        }
        debug_assert_eq!(write - range.start, lh_extent);
        self.rel2sample[write..range.end()].copy_from_slice(&self.scratch);

        // Successor paths and front positions.
        let lh_path = IdxPath::path_next(iset.path, true);
        let rh_path = IdxPath::path_next(iset.path, false);
        let lh_start = range.start;
        let rh_start = range.start + lh_extent;
        for pos in lh_start..rh_start {
            let s_idx = self.rel2sample[pos];
            let nd_off = (pos - lh_start).min(u16::MAX as usize) as u16;
            self.idx_path.set_live(s_idx as usize, lh_path, pos as u32, nd_off);
        }
        for pos in rh_start..range.end() {
            let s_idx = self.rel2sample[pos];
            let nd_off = (pos - rh_start).min(u16::MAX as usize) as u16;
            self.idx_path.set_live(s_idx as usize, rh_path, pos as u32, nd_off);
        }

        let min_info = self.params.min_ratio * info;
        let lh = IndexSet {
            range: IdxRange::new(lh_start, lh_extent),
            sum: sum_l,
            s_count: lh_s_count,
            pre_bias: 0.0,
            min_info,
            pt_id: lh_pt,
            path: lh_path,
            ctg_sum: Vec::new(),
            splittable: true,
        };
        let rh = IndexSet {
            range: IdxRange::new(rh_start, range.extent - lh_extent),
            sum: iset.sum - sum_l,
            s_count: iset.s_count - lh_s_count,
            pre_bias: 0.0,
            min_info,
            pt_id: rh_pt,
            path: rh_path,
            ctg_sum: Vec::new(),
            splittable: true,
        };
        (lh, rh)
    }
}

/// Classification node sums: per-category response totals and their sum of
/// squares.
pub fn sums_and_squares(
    range: IdxRange,
    rel2sample: &[u32],
    sample: &Sample,
    n_ctg: usize,
) -> (Vec<f64>, f64) {
    let mut ctg_sum = vec![0.0; n_ctg];
    for pos in range.iter() {
        let nux = &sample.nux[rel2sample[pos] as usize];
        ctg_sum[nux.ctg as usize] += nux.y_sum;
    }
    let sum_squares = ctg_sum.iter().map(|&s| s * s).sum();
    (ctg_sum, sum_squares)
}
