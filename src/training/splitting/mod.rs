//! Per-level scheduling and scoring of split candidates.
//!
//! Each level proposes one candidate per (node, sampled predictor) pair,
//! skipping singletons. Candidates are scored in parallel, each writing only
//! its own slot; the per-node argmax then resolves with a stable tie-break
//! on predictor index.

pub mod cut;
pub mod runs;

use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::data::RankedFrame;
use crate::training::frontier::{IndexSet, StageState};
use crate::training::partition::{ObsCell, ObsPart};
use crate::training::sample::SumCount;
use crate::training::TreeParams;
use crate::utils::{IdxRange, Parallelism};

use self::cut::{find_cut, CtgKernel, CutResult, RegKernel};
use self::runs::{RunSet, RunSplit, MAX_WIDTH};

/// Candidate coordinates: frontier node by predictor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SplitCoord {
    pub node_idx: usize,
    pub pred: usize,
}

/// Outcome of scoring one candidate.
pub enum SplitOutcome {
    /// No admissible split improved on the node bias.
    None,
    Cut(CutResult),
    Runs { split: RunSplit, set: RunSet },
}

impl SplitOutcome {
    /// Information gain, when a split was found.
    pub fn info(&self) -> Option<f64> {
        match self {
            SplitOutcome::None => None,
            SplitOutcome::Cut(cut) => Some(cut.info),
            SplitOutcome::Runs { split, .. } => Some(split.info),
        }
    }
}

/// One split candidate, populated in two phases: coordinates and buffer at
/// prescheduling, ranges and node statistics once restaging has fixed them.
pub struct SplitNux {
    pub coord: SplitCoord,
    pub buf_idx: usize,
    /// Explicit segment of the candidate, region-relative.
    pub range: IdxRange,
    /// Implicit (residual) samples reaching the node on this predictor.
    pub implicit: usize,
    pub sum: f64,
    pub s_count: u32,
    pub pre_bias: f64,
    /// Monotone gate drawn for this candidate: -1, 0 or +1.
    pub mono_mode: i8,
    /// Pre-drawn variates for wide-run subsampling.
    pub rv_wide: Vec<f64>,
    pub outcome: SplitOutcome,
}

/// Per-level split scheduler.
pub struct SplitFrontier<'a> {
    ranked: &'a RankedFrame,
    params: &'a TreeParams,
}

impl<'a> SplitFrontier<'a> {
    pub fn new(ranked: &'a RankedFrame, params: &'a TreeParams) -> Self {
        Self { ranked, params }
    }

    /// Propose and initialize candidates for every splittable node.
    ///
    /// All randomness — predictor sampling, monotone gating, wide-run
    /// variates — draws here, sequentially, so forests reproduce under a
    /// fixed per-tree seed regardless of scoring parallelism. Returns the
    /// candidates with each node's slice of them.
    pub fn preschedule(
        &self,
        level: &[IndexSet],
        stage: &[StageState],
        buf_idx: usize,
        rng: &mut Xoshiro256PlusPlus,
    ) -> (Vec<SplitNux>, Vec<IdxRange>) {
        let n_pred = self.ranked.n_pred();
        let mut cands = Vec::new();
        let mut node_cands = Vec::with_capacity(level.len());

        for (node_idx, iset) in level.iter().enumerate() {
            let cand_start = cands.len();
            if iset.splittable {
                for pred in self.sample_preds(rng) {
                    let st = &stage[node_idx * n_pred + pred];
                    if st.singleton {
                        continue;
                    }
                    let implicit = iset.range.extent - st.expl;
                    let mono_mode = self.mono_mode(pred, rng);
                    let rv_wide = self.draw_wide(pred, st, implicit, rng);
                    cands.push(SplitNux {
                        coord: SplitCoord { node_idx, pred },
                        buf_idx,
                        range: IdxRange::new(st.start, st.expl),
                        implicit,
                        sum: iset.sum,
                        s_count: iset.s_count,
                        pre_bias: iset.pre_bias,
                        mono_mode,
                        rv_wide,
                        outcome: SplitOutcome::None,
                    });
                }
            }
            node_cands.push(IdxRange::new(cand_start, cands.len() - cand_start));
        }
        (cands, node_cands)
    }

    /// Predictors proposed for one node, ascending.
    fn sample_preds(&self, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
        let n_pred = self.ranked.n_pred();
        if self.params.pred_fixed > 0 {
            let mut indices: Vec<usize> = (0..n_pred).collect();
            for i in 0..self.params.pred_fixed.min(n_pred) {
                let j = rng.gen_range(i..n_pred);
                indices.swap(i, j);
            }
            indices.truncate(self.params.pred_fixed.min(n_pred));
            indices.sort_unstable();
            indices
        } else {
            (0..n_pred)
                .filter(|&pred| {
                    let u: f64 = rng.gen();
                    u < self.params.pred_prob[pred]
                })
                .collect()
        }
    }

    /// Monotone gate for a numeric candidate: the signed constraint applies
    /// with its configured probability.
    fn mono_mode(&self, pred: usize, rng: &mut Xoshiro256PlusPlus) -> i8 {
        if self.ranked.is_factor(pred) || self.params.reg_mono.is_empty() {
            return 0;
        }
        let mono_prob = self.params.reg_mono[pred];
        let sign = if mono_prob > 0.0 {
            1
        } else if mono_prob < 0.0 {
            -1
        } else {
            return 0;
        };
        let u: f64 = rng.gen();
        if sign as f64 * u < mono_prob.abs() {
            sign
        } else {
            0
        }
    }

    /// Pre-draw subsampling variates for wide multiclass factor candidates.
    fn draw_wide(
        &self,
        pred: usize,
        st: &StageState,
        implicit: usize,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Vec<f64> {
        if !self.ranked.is_factor(pred) || self.params.n_ctg <= 2 {
            return Vec::new();
        }
        let safe_runs = st.rank_count as usize + usize::from(implicit > 0);
        if safe_runs <= MAX_WIDTH {
            return Vec::new();
        }
        (0..safe_runs).map(|_| rng.gen()).collect()
    }

    /// Score all candidates; each writes only its own outcome slot.
    pub fn split_all(
        &self,
        obs_part: &ObsPart,
        level: &[IndexSet],
        cands: &mut [SplitNux],
        parallelism: Parallelism,
    ) {
        parallelism.maybe_par_for_each_mut(cands, |nux| {
            nux.outcome = self.split_cand(obs_part, &level[nux.coord.node_idx], nux);
        });
    }

    fn split_cand(&self, obs_part: &ObsPart, iset: &IndexSet, nux: &SplitNux) -> SplitOutcome {
        let pred = nux.coord.pred;
        let (cells, _) = obs_part.pred_slice(pred, nux.buf_idx, nux.range);
        if self.ranked.is_factor(pred) {
            self.split_fac(cells, iset, nux)
        } else {
            self.split_num(cells, iset, nux)
        }
    }

    fn split_fac(&self, cells: &[ObsCell], iset: &IndexSet, nux: &SplitNux) -> SplitOutcome {
        let n_ctg = self.params.n_ctg;
        let mut set = RunSet::accumulate(cells, nux.range.start, n_ctg);
        if nux.implicit > 0 {
            set.write_implicit(
                self.ranked.dense_rank(nux.coord.pred),
                nux.s_count,
                nux.sum,
                nux.implicit,
                &iset.ctg_sum,
            );
        }
        if set.run_count() < 2 {
            return SplitOutcome::None;
        }
        let split = if n_ctg == 0 {
            set.split_reg(nux.s_count, nux.sum, nux.pre_bias)
        } else if n_ctg == 2 {
            set.split_binary(&iset.ctg_sum, nux.pre_bias)
        } else {
            set.split_wide(&iset.ctg_sum, nux.pre_bias, &nux.rv_wide)
        };
        match split {
            Some(split) => SplitOutcome::Runs { split, set },
            None => SplitOutcome::None,
        }
    }

    fn split_num(&self, cells: &[ObsCell], iset: &IndexSet, nux: &SplitNux) -> SplitOutcome {
        let n_ctg = self.params.n_ctg;
        let dense = (nux.implicit > 0)
            .then(|| (self.ranked.dense_rank(nux.coord.pred), nux.implicit));

        // Residualize node totals against the explicit cells.
        let (residual, residual_ctg) = if nux.implicit > 0 {
            let mut expl = SumCount::default();
            let mut expl_ctg = vec![0.0; n_ctg];
            for cell in cells {
                expl.accum(cell.y_sum, cell.s_count);
                if n_ctg > 0 {
                    expl_ctg[cell.ctg as usize] += cell.y_sum;
                }
            }
            let residual = SumCount {
                sum: nux.sum - expl.sum,
                s_count: nux.s_count - expl.s_count,
            };
            let residual_ctg = iset
                .ctg_sum
                .iter()
                .zip(&expl_ctg)
                .map(|(&tot, &e)| tot - e)
                .collect();
            (residual, residual_ctg)
        } else {
            (SumCount::default(), Vec::new())
        };

        let result = if n_ctg == 0 {
            let mut kernel = RegKernel::new(nux.sum, nux.s_count, residual, nux.mono_mode);
            find_cut(&mut kernel, cells, dense, nux.pre_bias)
        } else {
            let mut kernel = CtgKernel::new(
                nux.sum,
                nux.s_count,
                iset.ctg_sum.clone(),
                residual,
                residual_ctg,
            );
            find_cut(&mut kernel, cells, dense, nux.pre_bias)
        };
        match result {
            Some(cut) => SplitOutcome::Cut(cut),
            None => SplitOutcome::None,
        }
    }

    /// Per-node argmax over each node's candidate slice.
    ///
    /// Ties resolve to the lower predictor index: candidates arrive in
    /// ascending predictor order and only a strictly greater information
    /// value displaces the incumbent. A winner must also clear the node's
    /// information floor.
    pub fn arg_max(
        &self,
        level: &[IndexSet],
        cands: &[SplitNux],
        node_cands: &[IdxRange],
        parallelism: Parallelism,
    ) -> Vec<Option<usize>> {
        parallelism.maybe_par_map(0..level.len(), |node_idx| {
            let iset = &level[node_idx];
            let mut winner: Option<(usize, f64)> = None;
            for cand_idx in node_cands[node_idx].iter() {
                if let Some(info) = cands[cand_idx].outcome.info() {
                    if info > iset.min_info && winner.map_or(true, |(_, best)| info > best) {
                        winner = Some((cand_idx, info));
                    }
                }
            }
            winner.map(|(cand_idx, _)| cand_idx)
        })
    }
}
