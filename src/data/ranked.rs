//! Pre-sorted predictor layout.
//!
//! Computed once per training and read-only thereafter. Each predictor is
//! stable-sorted and rank-encoded, ties sharing a rank; maximal blocks of
//! consecutive equal-rank rows compress into a single [`RankedRun`]. A
//! predictor whose plurality rank is populous enough is given a *dense rank*:
//! those rows are dropped from the explicit run list and reconstructed by the
//! splitter as a residual.

use crate::data::frame::RLEFrame;
use crate::error::{TrainError, TrainResult};

/// Inattainable rank, marking the absence of a dense rank.
pub const NO_RANK: u32 = u32::MAX;

/// One or more consecutive equal-rank rows of a single predictor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RankedRun {
    pub row: u32,
    pub rank: u32,
    pub run_length: u32,
}

/// Rank orderings of all predictors.
pub struct RankedFrame {
    n_row: usize,
    n_pred_num: usize,
    n_pred: usize,
    /// Explicit runs, concatenated over predictors.
    runs: Vec<RankedRun>,
    /// Per-predictor offset into `runs`.
    rr_start: Vec<usize>,
    /// Per-predictor count of explicitly represented rows.
    explicit_count: Vec<usize>,
    /// Per-predictor dense rank, `NO_RANK` if none.
    dense_rank: Vec<u32>,
    /// Rows covered by the dense rank.
    dense_count: Vec<usize>,
    /// Distinct rank count per predictor.
    rank_count: Vec<u32>,
    /// Offsets for conservative partition sizing; see [`Self::safe_offset`].
    safe_offset: Vec<usize>,
    noncompact: usize,
    accum_compact: usize,
    /// Numeric predictors: per-rank representative values.
    num_offset: Vec<usize>,
    num_val: Vec<f64>,
}

impl RankedFrame {
    /// Pre-sort every predictor of `frame`.
    ///
    /// `auto_compress` in `[0, 1]` governs dense-rank election: the plurality
    /// rank of a predictor is residualized iff its population exceeds
    /// `(1 - auto_compress) * n_row`. Zero disables compression everywhere;
    /// one residualizes each predictor's densest rank.
    pub fn new(frame: &RLEFrame<'_>, auto_compress: f64) -> TrainResult<Self> {
        if !(0.0..=1.0).contains(&auto_compress) {
            return Err(TrainError::Config(format!(
                "autoCompress must lie in [0, 1], got {auto_compress}"
            )));
        }
        let n_row = frame.n_row();
        let n_pred = frame.n_pred();
        let n_pred_num = frame.n_pred_num();

        let mut ranked = Self {
            n_row,
            n_pred_num,
            n_pred,
            runs: Vec::new(),
            rr_start: Vec::with_capacity(n_pred),
            explicit_count: Vec::with_capacity(n_pred),
            dense_rank: Vec::with_capacity(n_pred),
            dense_count: Vec::with_capacity(n_pred),
            rank_count: Vec::with_capacity(n_pred),
            safe_offset: vec![0; n_pred],
            noncompact: 0,
            accum_compact: 0,
            num_offset: Vec::with_capacity(n_pred_num),
            num_val: Vec::new(),
        };

        for num_idx in 0..n_pred_num {
            let col = frame.num_col(num_idx);
            ranked.num_offset.push(ranked.num_val.len());
            let ordered = sort_numeric(&col);
            ranked.push_pred(ordered, auto_compress, true);
        }
        for fac_idx in 0..frame.n_pred_fac() {
            let ordered = sort_factor(frame, fac_idx);
            ranked.push_pred(ordered, auto_compress, false);
        }

        ranked.mode_offsets();
        Ok(ranked)
    }

    /// Rank-encode one predictor's sorted `(row, rank, value)` stream and
    /// elect its dense rank.
    fn push_pred(&mut self, ordered: Vec<(u32, u32, f64)>, auto_compress: f64, numeric: bool) {
        let pred_runs_start = self.runs.len();
        self.rr_start.push(pred_runs_start);

        let n_rank = ordered.last().map_or(0, |&(_, rank, _)| rank + 1);
        self.rank_count.push(n_rank);

        if numeric {
            // One representative value per rank.
            let mut next_rank = 0u32;
            for &(_, rank, val) in &ordered {
                if rank == next_rank {
                    self.num_val.push(val);
                    next_rank += 1;
                }
            }
        }

        // Compress maximal blocks of consecutive equal-rank rows.
        let mut rank_pop = vec![0usize; n_rank as usize];
        for &(row, rank, _) in &ordered {
            rank_pop[rank as usize] += 1;
            let extends = self.runs.len() > pred_runs_start
                && self
                    .runs
                    .last()
                    .is_some_and(|run| run.rank == rank && run.row + run.run_length == row);
            if extends {
                self.runs.last_mut().unwrap().run_length += 1;
            } else {
                self.runs.push(RankedRun {
                    row,
                    rank,
                    run_length: 1,
                });
            }
        }

        // Dense election: plurality rank, lowest rank winning ties.
        let dense = rank_pop
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
            .filter(|&(_, &pop)| pop as f64 > (1.0 - auto_compress) * self.n_row as f64)
            .map(|(rank, &pop)| (rank as u32, pop));

        match dense {
            Some((rank, pop)) => {
                // Drop the dense rank's runs from the explicit list.
                let kept: Vec<RankedRun> = self.runs[pred_runs_start..]
                    .iter()
                    .copied()
                    .filter(|run| run.rank != rank)
                    .collect();
                self.runs.truncate(pred_runs_start);
                self.runs.extend(kept);
                self.dense_rank.push(rank);
                self.dense_count.push(pop);
                self.explicit_count.push(self.n_row - pop);
            }
            None => {
                self.dense_rank.push(NO_RANK);
                self.dense_count.push(0);
                self.explicit_count.push(self.n_row);
            }
        }
    }

    /// Assign conservative per-predictor partition offsets: noncompact
    /// predictors receive strided slots, compact predictors pack at the tail.
    fn mode_offsets(&mut self) {
        let mut noncompact = 0usize;
        let mut accum_compact = 0usize;
        for pred in 0..self.n_pred {
            if self.dense_rank[pred] == NO_RANK {
                self.safe_offset[pred] = noncompact;
                noncompact += 1;
            } else {
                self.safe_offset[pred] = accum_compact;
                accum_compact += self.explicit_count[pred];
            }
        }
        self.noncompact = noncompact;
        self.accum_compact = accum_compact;
    }

    #[inline]
    pub fn n_row(&self) -> usize {
        self.n_row
    }

    #[inline]
    pub fn n_pred(&self) -> usize {
        self.n_pred
    }

    #[inline]
    pub fn n_pred_num(&self) -> usize {
        self.n_pred_num
    }

    /// Numerics precede factors in predictor order.
    #[inline]
    pub fn is_factor(&self, pred: usize) -> bool {
        pred >= self.n_pred_num
    }

    /// Explicit runs of a predictor, ascending by rank.
    pub fn runs(&self, pred: usize) -> &[RankedRun] {
        let lo = self.rr_start[pred];
        let hi = if pred + 1 < self.n_pred {
            self.rr_start[pred + 1]
        } else {
            self.runs.len()
        };
        &self.runs[lo..hi]
    }

    #[inline]
    pub fn dense_rank(&self, pred: usize) -> u32 {
        self.dense_rank[pred]
    }

    #[inline]
    pub fn dense_count(&self, pred: usize) -> usize {
        self.dense_count[pred]
    }

    #[inline]
    pub fn has_dense(&self, pred: usize) -> bool {
        self.dense_rank[pred] != NO_RANK
    }

    #[inline]
    pub fn explicit_count(&self, pred: usize) -> usize {
        self.explicit_count[pred]
    }

    #[inline]
    pub fn rank_count(&self, pred: usize) -> u32 {
        self.rank_count[pred]
    }

    /// Conservative buffer size: strided access for noncompact predictors,
    /// full explicit width for compact ones.
    #[inline]
    pub fn safe_size(&self, stride: usize) -> usize {
        self.noncompact * stride + self.accum_compact
    }

    /// Per-predictor offset and extent within a buffer sized by
    /// [`Self::safe_size`].
    #[inline]
    pub fn safe_offset(&self, pred: usize, stride: usize) -> (usize, usize) {
        if self.dense_rank[pred] == NO_RANK {
            (self.safe_offset[pred] * stride, stride)
        } else {
            (
                self.noncompact * stride + self.safe_offset[pred],
                self.explicit_count[pred],
            )
        }
    }

    /// Representative value at a numeric predictor's rank.
    #[inline]
    pub fn num_val(&self, pred: usize, rank: u32) -> f64 {
        debug_assert!(pred < self.n_pred_num);
        self.num_val[self.num_offset[pred] + rank as usize]
    }

    /// Derive a cut value between two ranks by synthesizing a fractional
    /// intermediate rank and interpolating.
    pub fn quant_rank(&self, pred: usize, rank_low: u32, rank_high: u32, split_quant: f64) -> f64 {
        let rank_num = rank_low as f64 + split_quant * (rank_high as f64 - rank_low as f64);
        let rank_floor = rank_num.floor();
        let rank_ceil = rank_num.ceil();
        let val_floor = self.num_val(pred, rank_floor as u32);
        let val_ceil = self.num_val(pred, rank_ceil as u32);
        val_floor + (rank_num - rank_floor) * (val_ceil - val_floor)
    }
}

/// Stable sort of a numeric column into `(row, rank, value)`, ties sharing
/// a rank.
fn sort_numeric(col: &[f64]) -> Vec<(u32, u32, f64)> {
    let mut order: Vec<u32> = (0..col.len() as u32).collect();
    order.sort_by(|&a, &b| {
        col[a as usize]
            .partial_cmp(&col[b as usize])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut out = Vec::with_capacity(col.len());
    let mut rank = 0u32;
    for (pos, &row) in order.iter().enumerate() {
        if pos > 0 && col[row as usize] != col[order[pos - 1] as usize] {
            rank += 1;
        }
        out.push((row, rank, col[row as usize]));
    }
    out
}

/// Factor codes double as ranks.
fn sort_factor(frame: &RLEFrame<'_>, fac_idx: usize) -> Vec<(u32, u32, f64)> {
    let n_row = frame.n_row();
    let mut order: Vec<u32> = (0..n_row as u32).collect();
    order.sort_by_key(|&row| frame.fac_code(row as usize, fac_idx));
    order
        .into_iter()
        .map(|row| (row, frame.fac_code(row as usize, fac_idx), 0.0))
        .collect()
}
