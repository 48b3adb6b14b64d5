//! Double-buffered, per-predictor partitions of sampled observations.
//!
//! Each predictor owns a region of a pair of buffers, located by a
//! conservative offset from the ranked layout. Staging fills buffer zero in
//! rank order; restaging partitions a parent node's segment into its
//! children in the opposite buffer, following each sample's reaching path;
//! block replay commits a chosen split into the branch-sense bit row.

use fixedbitset::FixedBitSet;

use crate::data::{RankedFrame, NO_RANK};
use crate::training::path::{IdxPath, PathT, NO_PATH};
use crate::training::sample::{Sample, SumCount, NO_SAMPLE};
use crate::utils::IdxRange;

/// One sampled observation in per-predictor rank order.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ObsCell {
    pub rank: u32,
    pub s_count: u32,
    pub y_sum: f64,
    pub ctg: u32,
    /// Rank equals the preceding cell's rank within the segment.
    pub tied: bool,
}

/// Summary of staging one predictor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageCount {
    pub expl: usize,
    pub singleton: bool,
}

/// Per-path result of restaging one (node, predictor) segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PathStats {
    /// Region-relative start of the child segment.
    pub start: usize,
    /// Explicit cells reaching the child.
    pub expl: usize,
    /// Distinct explicit ranks reaching the child.
    pub rank_count: u32,
}

/// Bit row over sample indices marking the explicit side of each committed
/// split for the current level.
pub struct BranchSense {
    bits: FixedBitSet,
}

impl BranchSense {
    pub fn new(bag_count: usize) -> Self {
        Self {
            bits: FixedBitSet::with_capacity(bag_count),
        }
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }

    #[inline]
    pub fn set_explicit(&mut self, sample_idx: u32) {
        self.bits.insert(sample_idx as usize);
    }

    #[inline]
    pub fn is_explicit(&self, sample_idx: u32) -> bool {
        self.bits.contains(sample_idx as usize)
    }
}

/// Double-buffered partition of sampled observations, all predictors.
pub struct ObsPart {
    bag_count: usize,
    buf_size: usize,
    /// Observation cells, two buffers.
    obs: Vec<ObsCell>,
    /// Sample indices parallel to `obs`.
    sample_idx: Vec<u32>,
    /// Reaching path per staged position, scratch for restaging.
    path_idx: Vec<PathT>,
    stage_offset: Vec<usize>,
    stage_extent: Vec<usize>,
}

impl ObsPart {
    pub fn new(ranked: &RankedFrame, bag_count: usize) -> Self {
        let n_pred = ranked.n_pred();
        let buf_size = ranked.safe_size(bag_count);
        let mut stage_offset = Vec::with_capacity(n_pred);
        let mut stage_extent = Vec::with_capacity(n_pred);
        for pred in 0..n_pred {
            let (offset, extent) = ranked.safe_offset(pred, bag_count);
            stage_offset.push(offset);
            stage_extent.push(extent);
        }
        Self {
            bag_count,
            buf_size,
            obs: vec![ObsCell::default(); 2 * buf_size],
            sample_idx: vec![0; 2 * buf_size],
            path_idx: vec![NO_PATH; buf_size],
            stage_offset,
            stage_extent,
        }
    }

    #[inline]
    pub fn bag_count(&self) -> usize {
        self.bag_count
    }

    #[inline]
    fn base(&self, pred: usize, buf_idx: usize) -> usize {
        buf_idx * self.buf_size + self.stage_offset[pred]
    }

    /// Observation cells and sample indices of one predictor segment.
    pub fn pred_slice(&self, pred: usize, buf_idx: usize, range: IdxRange) -> (&[ObsCell], &[u32]) {
        let base = self.base(pred, buf_idx);
        (
            &self.obs[base + range.start..base + range.end()],
            &self.sample_idx[base + range.start..base + range.end()],
        )
    }

    /// Stage one predictor into buffer zero: walk the ranked runs and
    /// append each sampled row's cell in rank order.
    pub fn stage(&mut self, ranked: &RankedFrame, sample: &Sample, pred: usize) -> StageCount {
        let base = self.base(pred, 0);
        let mut expl = 0usize;
        let mut rank_count = 0u32;
        let mut rank_prev = NO_RANK;

        for run in ranked.runs(pred) {
            for row in run.row..run.row + run.run_length {
                let s_idx = sample.row2sample[row as usize];
                if s_idx == NO_SAMPLE {
                    continue;
                }
                let nux = &sample.nux[s_idx as usize];
                let tied = expl > 0 && rank_prev == run.rank;
                if !tied {
                    rank_count += 1;
                }
                self.obs[base + expl] = ObsCell {
                    rank: run.rank,
                    s_count: nux.s_count,
                    y_sum: nux.y_sum,
                    ctg: nux.ctg,
                    tied,
                };
                self.sample_idx[base + expl] = s_idx;
                rank_prev = run.rank;
                expl += 1;
            }
        }
        debug_assert!(expl <= self.stage_extent[pred]);

        let implicit = self.bag_count - expl;
        StageCount {
            expl,
            singleton: singleton(rank_count, implicit),
        }
    }

    /// Restage a parent segment into its two children in the opposite
    /// buffer, tallying per-path rank changes for singleton detection.
    ///
    /// Children pack at the parent's start, left first. Extinct paths drop.
    pub fn rank_restage(
        &mut self,
        idx_path: &IdxPath,
        pred: usize,
        buf_idx: usize,
        source: IdxRange,
    ) -> [PathStats; 2] {
        let path_count = self.prepath(idx_path, pred, buf_idx, source);

        let src = self.base(pred, buf_idx);
        let targ = self.base(pred, 1 - buf_idx);
        let region = self.stage_offset[pred];

        let mut stats = [
            PathStats {
                start: source.start,
                ..Default::default()
            },
            PathStats {
                start: source.start + path_count[0],
                ..Default::default()
            },
        ];
        let mut reach = [stats[0].start, stats[1].start];
        let mut rank_prev = [NO_RANK; 2];

        for idx in source.iter() {
            let path = self.path_idx[region + idx];
            if path == NO_PATH {
                continue;
            }
            let p = (path & 1) as usize;
            let mut cell = self.obs[src + idx];
            let tied = stats[p].expl > 0 && rank_prev[p] == cell.rank;
            if !tied {
                stats[p].rank_count += 1;
            }
            cell.tied = tied;
            rank_prev[p] = cell.rank;

            self.obs[targ + reach[p]] = cell;
            self.sample_idx[targ + reach[p]] = self.sample_idx[src + idx];
            reach[p] += 1;
            stats[p].expl += 1;
        }
        stats
    }

    /// Restage indices only, without rank bookkeeping. Applicable where the
    /// partition is needed but rank information is not, as for segments
    /// whose predictor cannot be scheduled again.
    pub fn index_restage(
        &mut self,
        idx_path: &IdxPath,
        pred: usize,
        buf_idx: usize,
        source: IdxRange,
    ) -> [usize; 2] {
        let path_count = self.prepath(idx_path, pred, buf_idx, source);

        let src = self.base(pred, buf_idx);
        let targ = self.base(pred, 1 - buf_idx);
        let region = self.stage_offset[pred];

        let mut reach = [source.start, source.start + path_count[0]];
        for idx in source.iter() {
            let path = self.path_idx[region + idx];
            if path == NO_PATH {
                continue;
            }
            let p = (path & 1) as usize;
            self.sample_idx[targ + reach[p]] = self.sample_idx[src + idx];
            reach[p] += 1;
        }
        path_count
    }

    /// Record each position's reaching path; returns live counts per path.
    fn prepath(
        &mut self,
        idx_path: &IdxPath,
        pred: usize,
        buf_idx: usize,
        source: IdxRange,
    ) -> [usize; 2] {
        let src = self.base(pred, buf_idx);
        let region = self.stage_offset[pred];
        let mut path_count = [0usize; 2];
        for idx in source.iter() {
            let mut s_idx = self.sample_idx[src + idx];
            let path = idx_path.update(&mut s_idx, 1, None, false);
            self.path_idx[region + idx] = path;
            if path != NO_PATH {
                path_count[(path & 1) as usize] += 1;
            }
        }
        path_count
    }

    /// Commit the explicit block of a chosen split: set the branch-sense bit
    /// of each sample in `range` and return the explicit response sum, with
    /// a per-category decomposition when requested.
    ///
    /// Idempotent within a level: bits only accumulate.
    pub fn block_replay(
        &mut self,
        pred: usize,
        buf_idx: usize,
        range: IdxRange,
        branch_sense: &mut BranchSense,
        mut ctg_expl: Option<&mut [SumCount]>,
    ) -> f64 {
        let base = self.base(pred, buf_idx);
        let mut sum_expl = 0.0;
        for idx in range.iter() {
            let cell = self.obs[base + idx];
            sum_expl += cell.y_sum;
            if let Some(ctg_expl) = ctg_expl.as_deref_mut() {
                ctg_expl[cell.ctg as usize].accum(cell.y_sum, cell.s_count);
            }
            branch_sense.set_explicit(self.sample_idx[base + idx]);
        }
        sum_expl
    }
}

/// Singleton iff the staged set plus any implicit block holds a single
/// value: a fully residual segment, or a single explicit rank with no
/// residual.
#[inline]
pub fn singleton(rank_count: u32, implicit: usize) -> bool {
    rank_count + u32::from(implicit > 0) <= 1
}
