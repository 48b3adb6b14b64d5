//! Factor-run accumulation and subset enumeration.
//!
//! A candidate's staged cells group into runs of equal code; a predictor
//! compressing within the node contributes one implicit run by
//! residualization. Regression and binary classification order the runs
//! (by mean response and category-one concentration respectively) and scan
//! boundary cuts; multiclass responses enumerate subsets outright, first
//! subsampling down to [`MAX_WIDTH`] slots when the run count is wide.

use crate::training::partition::ObsCell;
use crate::training::splitting::cut::MIN_DENOM;

/// Start marker of the implicit run.
pub const NO_START: usize = usize::MAX;

/// Widest run count enumerated exactly.
pub const MAX_WIDTH: usize = 10;

/// Binary advance guard: slots with equal sample counts are treated as
/// distinct only when their category-one cells differ beyond the response
/// jitter.
const BINARY_GUARD: f64 = 0.9;

/// One factor run at a frontier node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunNux {
    /// Factor code; doubles as the staging rank.
    pub code: u32,
    pub s_count: u32,
    pub sum: f64,
    /// Segment-relative start; `NO_START` marks the implicit run.
    pub start: usize,
    pub extent: usize,
}

impl RunNux {
    #[inline]
    pub fn is_implicit(&self) -> bool {
        self.start == NO_START
    }
}

/// Chosen factor split.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunSplit {
    /// Gain above the node's pre-bias.
    pub info: f64,
    pub lh_s_count: u32,
    /// Left extent, implicit samples included.
    pub lh_extent: usize,
}

/// Runs of one (node, predictor) candidate, with output ordering.
pub struct RunSet {
    n_ctg: usize,
    runs: Vec<RunNux>,
    /// Run-by-category response checkerboard.
    ctg_sum: Vec<f64>,
    /// Slot indices in output order; the first `runs_lh` fall left.
    out: Vec<usize>,
    runs_lh: usize,
}

impl RunSet {
    /// Group a candidate's cells into runs. Cells arrive in ascending code
    /// order, so equal codes are adjacent.
    pub fn accumulate(cells: &[ObsCell], seg_start: usize, n_ctg: usize) -> Self {
        let mut runs: Vec<RunNux> = Vec::new();
        let mut ctg_sum: Vec<f64> = Vec::new();
        for (idx, cell) in cells.iter().enumerate() {
            match runs.last_mut() {
                Some(run) if run.code == cell.rank => {
                    run.s_count += cell.s_count;
                    run.sum += cell.y_sum;
                    run.extent += 1;
                }
                _ => {
                    runs.push(RunNux {
                        code: cell.rank,
                        s_count: cell.s_count,
                        sum: cell.y_sum,
                        start: seg_start + idx,
                        extent: 1,
                    });
                    ctg_sum.extend(std::iter::repeat(0.0).take(n_ctg));
                }
            }
            if n_ctg > 0 {
                let slot = runs.len() - 1;
                ctg_sum[slot * n_ctg + cell.ctg as usize] += cell.y_sum;
            }
        }
        Self {
            n_ctg,
            runs,
            ctg_sum,
            out: Vec::new(),
            runs_lh: 0,
        }
    }

    /// Append the implicit run by residualizing node totals against the
    /// explicit accumulation.
    pub fn write_implicit(
        &mut self,
        code: u32,
        node_s_count: u32,
        node_sum: f64,
        implicit: usize,
        node_ctg: &[f64],
    ) {
        let mut s_count = node_s_count;
        let mut sum = node_sum;
        let mut ctg_resid = node_ctg.to_vec();
        for (slot, run) in self.runs.iter().enumerate() {
            s_count -= run.s_count;
            sum -= run.sum;
            for (ctg, r) in ctg_resid.iter_mut().enumerate() {
                *r -= self.ctg_sum[slot * self.n_ctg + ctg];
            }
        }
        self.runs.push(RunNux {
            code,
            s_count,
            sum,
            start: NO_START,
            extent: implicit,
        });
        self.ctg_sum.extend(ctg_resid);
    }

    #[inline]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    #[inline]
    pub fn runs_lh(&self) -> usize {
        self.runs_lh
    }

    #[inline]
    fn sum_ctg(&self, slot: usize, ctg: usize) -> f64 {
        self.ctg_sum[slot * self.n_ctg + ctg]
    }

    /// Runs branching left, in output order.
    pub fn lh_runs(&self) -> impl Iterator<Item = &RunNux> {
        self.out[..self.runs_lh].iter().map(|&slot| &self.runs[slot])
    }

    /// Runs branching right, in output order.
    pub fn rh_runs(&self) -> impl Iterator<Item = &RunNux> {
        self.out[self.runs_lh..].iter().map(|&slot| &self.runs[slot])
    }

    /// Whether an implicit run branches left, forcing right-side replay.
    pub fn implicit_left(&self) -> bool {
        self.lh_runs().any(|run| run.is_implicit())
    }

    /// Regression: order runs by mean response and scan boundary cuts.
    pub fn split_reg(&mut self, node_s_count: u32, node_sum: f64, pre_bias: f64) -> Option<RunSplit> {
        self.order_by(|set, slot| set.runs[slot].sum / set.runs[slot].s_count as f64);

        let mut max_info = pre_bias;
        let mut cut = None;
        let mut sum_l = 0.0;
        let mut s_count_l = 0u32;
        for out_pos in 0..self.runs.len() - 1 {
            let run = &self.runs[self.out[out_pos]];
            sum_l += run.sum;
            s_count_l += run.s_count;
            let s_count_r = node_s_count - s_count_l;
            let sum_r = node_sum - sum_l;
            let gini =
                sum_l * sum_l / s_count_l as f64 + sum_r * sum_r / s_count_r as f64;
            if gini > max_info {
                max_info = gini;
                cut = Some(out_pos);
            }
        }
        cut.map(|cut| self.lh_slots(cut, max_info - pre_bias))
    }

    /// Binary classification: order runs by category-one concentration and
    /// scan boundary cuts, advancing only across significantly distinct
    /// slots.
    pub fn split_binary(&mut self, node_ctg: &[f64], pre_bias: f64) -> Option<RunSplit> {
        self.order_by(|set, slot| set.sum_ctg(slot, 1) / set.runs[slot].sum);

        let tot0 = node_ctg[0];
        let tot1 = node_ctg[1];
        let node_sum = tot0 + tot1;
        let mut max_info = pre_bias;
        let mut cut = None;
        let mut sum_l0 = 0.0;
        let mut sum_l1 = 0.0;
        for out_pos in 0..self.runs.len() - 1 {
            let slot = self.out[out_pos];
            let cell0 = self.sum_ctg(slot, 0);
            let cell1 = self.sum_ctg(slot, 1);
            sum_l0 += cell0;
            sum_l1 += cell1;

            // Equal sample counts cannot witness a real response difference
            // unless the category cells differ beyond the proxy jitter.
            let next = self.out[out_pos + 1];
            let splitable = self.runs[slot].s_count != self.runs[next].s_count
                || self.sum_ctg(next, 1) - cell1 > BINARY_GUARD;

            let sum_l = sum_l0 + sum_l1;
            let sum_r = node_sum - sum_l;
            if splitable && sum_l > MIN_DENOM && sum_r > MIN_DENOM {
                let ss_l = sum_l0 * sum_l0 + sum_l1 * sum_l1;
                let ss_r = (tot0 - sum_l0) * (tot0 - sum_l0) + (tot1 - sum_l1) * (tot1 - sum_l1);
                let gini = ss_r / sum_r + ss_l / sum_l;
                if gini > max_info {
                    max_info = gini;
                    cut = Some(out_pos);
                }
            }
        }
        cut.map(|cut| self.lh_slots(cut, max_info - pre_bias))
    }

    /// Multiclass: enumerate nonempty proper subsets of the (possibly
    /// subsampled) run slots. `rv` supplies pre-drawn uniform variates for
    /// reproducible wide-run subsampling.
    pub fn split_wide(&mut self, node_ctg: &[f64], pre_bias: f64, rv: &[f64]) -> Option<RunSplit> {
        let eff_count = self.de_wide(rv);
        let node_sum: f64 = node_ctg.iter().sum();

        let slot_sup = eff_count - 1;
        let left_full: u32 = (1u32 << slot_sup) - 1;
        let mut max_info = pre_bias;
        let mut lh_bits = 0u32;
        for subset in 1..=left_full {
            let mut sum_l = 0.0;
            let mut ss_l = 0.0;
            let mut ss_r = 0.0;
            for ctg in 0..self.n_ctg {
                let mut sum_ctg = 0.0;
                for slot in 0..slot_sup {
                    if subset & (1 << slot) != 0 {
                        sum_ctg += self.sum_ctg(slot, ctg);
                    }
                }
                let tot_sum = node_ctg[ctg];
                sum_l += sum_ctg;
                ss_l += sum_ctg * sum_ctg;
                ss_r += (tot_sum - sum_ctg) * (tot_sum - sum_ctg);
            }
            let sum_r = node_sum - sum_l;
            if sum_l > MIN_DENOM && sum_r > MIN_DENOM {
                let gini = ss_r / sum_r + ss_l / sum_l;
                if gini > max_info {
                    max_info = gini;
                    lh_bits = subset;
                }
            }
        }

        if lh_bits == 0 {
            return None;
        }
        Some(self.lh_bits(lh_bits, eff_count, max_info - pre_bias))
    }

    /// Order slots by a key, ascending; ties resolve on slot index.
    fn order_by(&mut self, key: impl Fn(&Self, usize) -> f64) {
        let mut keyed: Vec<(f64, usize)> = (0..self.runs.len())
            .map(|slot| (key(self, slot), slot))
            .collect();
        keyed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));
        self.out = keyed.into_iter().map(|(_, slot)| slot).collect();
    }

    /// Hammer the run list down to [`MAX_WIDTH`] randomly chosen slots.
    ///
    /// Category cell sums reorder alongside. Deterministic under the
    /// caller-supplied variates.
    fn de_wide(&mut self, rv: &[f64]) -> usize {
        let run_count = self.runs.len();
        if run_count <= MAX_WIDTH {
            self.out = (0..run_count).collect();
            return run_count;
        }
        debug_assert!(rv.len() >= run_count);

        let mut keyed: Vec<(f64, usize)> = (0..run_count).map(|slot| (rv[slot], slot)).collect();
        keyed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));

        let chosen: Vec<usize> = keyed[..MAX_WIDTH].iter().map(|&(_, slot)| slot).collect();
        let runs: Vec<RunNux> = chosen.iter().map(|&slot| self.runs[slot]).collect();
        let mut ctg_sum = Vec::with_capacity(MAX_WIDTH * self.n_ctg);
        for &slot in &chosen {
            ctg_sum.extend_from_slice(&self.ctg_sum[slot * self.n_ctg..(slot + 1) * self.n_ctg]);
        }
        self.runs = runs;
        self.ctg_sum = ctg_sum;
        self.out = (0..MAX_WIDTH).collect();
        MAX_WIDTH
    }

    /// Retain the ordered prefix `0..=cut` as the left-hand side.
    fn lh_slots(&mut self, cut: usize, info: f64) -> RunSplit {
        self.runs_lh = cut + 1;
        let mut lh_s_count = 0;
        let mut lh_extent = 0;
        for run in self.lh_runs() {
            lh_s_count += run.s_count;
            lh_extent += run.extent;
        }
        RunSplit {
            info,
            lh_s_count,
            lh_extent,
        }
    }

    /// Decode a subset bit pattern into the output vector: set bits fall
    /// left; when the implicit run falls left, the right-hand slots are
    /// exposed after the left block for replay.
    fn lh_bits(&mut self, lh_bits: u32, eff_count: usize, info: f64) -> RunSplit {
        let slot_sup = eff_count - 1;
        self.out.clear();
        let mut lh_s_count = 0;
        let mut lh_extent = 0;
        for slot in 0..slot_sup {
            if lh_bits & (1 << slot) != 0 {
                self.out.push(slot);
                lh_s_count += self.runs[slot].s_count;
                lh_extent += self.runs[slot].extent;
            }
        }
        self.runs_lh = self.out.len();
        // The final slot's bit never sets, so it always lands right.
        for slot in 0..eff_count {
            if lh_bits & (1 << slot) == 0 {
                self.out.push(slot);
            }
        }
        RunSplit {
            info,
            lh_s_count,
            lh_extent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cell(code: u32, y_sum: f64, s_count: u32, ctg: u32) -> ObsCell {
        ObsCell {
            rank: code,
            s_count,
            y_sum,
            ctg,
            tied: false,
        }
    }

    #[test]
    fn test_accumulate_groups_codes() {
        let cells = [
            cell(0, 1.0, 1, 0),
            cell(0, 2.0, 2, 0),
            cell(3, 5.0, 1, 0),
        ];
        let set = RunSet::accumulate(&cells, 10, 0);
        assert_eq!(set.run_count(), 2);
        assert_eq!(
            set.runs[0],
            RunNux {
                code: 0,
                s_count: 3,
                sum: 3.0,
                start: 10,
                extent: 2
            }
        );
        assert_eq!(set.runs[1].code, 3);
        assert_eq!(set.runs[1].start, 12);
    }

    #[test]
    fn test_write_implicit_residualizes() {
        let cells = [cell(0, 1.0, 1, 0), cell(2, 2.0, 1, 1)];
        let mut set = RunSet::accumulate(&cells, 0, 2);
        set.write_implicit(1, 5, 10.0, 3, &[4.0, 6.0]);

        let implicit = &set.runs[2];
        assert!(implicit.is_implicit());
        assert_eq!(implicit.code, 1);
        assert_eq!(implicit.s_count, 3);
        assert_relative_eq!(implicit.sum, 7.0);
        assert_eq!(implicit.extent, 3);
        assert_relative_eq!(set.sum_ctg(2, 0), 3.0);
        assert_relative_eq!(set.sum_ctg(2, 1), 4.0);
    }

    #[test]
    fn test_split_reg_orders_by_mean() {
        // Means: code0 -> 1.0, code1 -> 9.0, code2 -> 1.5. The cut isolates
        // {code0, code2} from code1.
        let cells = [
            cell(0, 2.0, 2, 0),
            cell(1, 18.0, 2, 0),
            cell(2, 3.0, 2, 0),
        ];
        let mut set = RunSet::accumulate(&cells, 0, 0);
        let node_sum = 23.0;
        let pre_bias = node_sum * node_sum / 6.0;
        let split = set.split_reg(6, node_sum, pre_bias).unwrap();

        assert_eq!(set.runs_lh(), 2);
        let lh_codes: Vec<u32> = set.lh_runs().map(|r| r.code).collect();
        assert_eq!(lh_codes, [0, 2]);
        assert_eq!(split.lh_s_count, 4);
        assert_eq!(split.lh_extent, 2);
        let expect = 5.0f64 * 5.0 / 4.0 + 18.0 * 18.0 / 2.0 - pre_bias;
        assert_relative_eq!(split.info, expect, max_relative = 1e-12);
    }

    #[test]
    fn test_split_reg_no_gain() {
        let cells = [cell(0, 2.0, 2, 0), cell(1, 2.0, 2, 0)];
        let mut set = RunSet::accumulate(&cells, 0, 0);
        let pre_bias = 16.0 / 4.0;
        assert!(set.split_reg(4, 4.0, pre_bias).is_none());
    }

    #[test]
    fn test_split_binary_guard_blocks_jitter_ties() {
        // Both codes hold one sample of each class: cells match to within
        // jitter, so no advance is significant and the node stays whole.
        let cells = [
            cell(0, 1.0, 1, 0),
            cell(0, 1.0, 1, 1),
            cell(1, 1.0, 1, 0),
            cell(1, 1.0, 1, 1),
        ];
        let mut set = RunSet::accumulate(&cells, 0, 2);
        let node_ctg = [2.0, 2.0];
        let pre_bias = (4.0 + 4.0) / 4.0;
        assert!(set.split_binary(&node_ctg, pre_bias).is_none());
    }

    #[test]
    fn test_split_binary_separates_classes() {
        let cells = [
            cell(0, 2.0, 2, 0),
            cell(1, 2.0, 2, 1),
        ];
        let mut set = RunSet::accumulate(&cells, 0, 2);
        let node_ctg = [2.0, 2.0];
        let pre_bias = 8.0 / 4.0;
        let split = set.split_binary(&node_ctg, pre_bias).unwrap();

        assert_eq!(set.runs_lh(), 1);
        assert_eq!(set.lh_runs().next().unwrap().code, 0);
        assert_eq!(split.lh_s_count, 2);
        assert_relative_eq!(split.info, 2.0 + 2.0 - pre_bias, max_relative = 1e-12);
    }

    #[test]
    fn test_split_wide_enumerates_subsets() {
        // Three codes, three classes, each code pure in one class.
        let cells = [
            cell(0, 2.0, 2, 0),
            cell(1, 2.0, 2, 1),
            cell(2, 2.0, 2, 2),
        ];
        let mut set = RunSet::accumulate(&cells, 0, 3);
        let node_ctg = [2.0, 2.0, 2.0];
        let node_sum = 6.0;
        let pre_bias = 12.0 / node_sum;
        let split = set.split_wide(&node_ctg, pre_bias, &[]).unwrap();

        assert!(split.info > 0.0);
        // Any single-code side is optimal here; the first such subset wins.
        assert_eq!(set.runs_lh(), 1);
        assert_eq!(split.lh_s_count, 2);
    }

    #[test]
    fn test_de_wide_reduces_and_is_deterministic() {
        let cells: Vec<ObsCell> = (0..12).map(|c| cell(c, 1.0, 1, (c % 3) as u32)).collect();
        let rv: Vec<f64> = (0..12).map(|i| ((i * 7) % 12) as f64 / 12.0).collect();

        let mut a = RunSet::accumulate(&cells, 0, 3);
        let eff_a = a.de_wide(&rv);
        let mut b = RunSet::accumulate(&cells, 0, 3);
        let eff_b = b.de_wide(&rv);

        assert_eq!(eff_a, MAX_WIDTH);
        assert_eq!(eff_b, MAX_WIDTH);
        assert_eq!(
            a.runs.iter().map(|r| r.code).collect::<Vec<_>>(),
            b.runs.iter().map(|r| r.code).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_implicit_left_exposes_right_runs() {
        let cells = [cell(0, 1.0, 1, 0), cell(2, 20.0, 2, 0)];
        let mut set = RunSet::accumulate(&cells, 0, 0);
        // Implicit run mean 5.0 sits between code 0 (1.0) and code 2 (10.0).
        set.write_implicit(1, 6, 36.0, 3, &[]);
        let pre_bias = 36.0 * 36.0 / 6.0;
        let split = set.split_reg(6, 36.0, pre_bias).unwrap();

        // Mean order: code0 (1.0), implicit (5.0), code2 (10.0); the cut
        // isolates code2, leaving the implicit run on the left.
        assert!(split.info > 0.0);
        assert!(set.implicit_left());
        let rh_codes: Vec<u32> = set.rh_runs().map(|r| r.code).collect();
        assert_eq!(rh_codes, [2]);
        assert_eq!(split.lh_s_count, 4);
        assert_eq!(split.lh_extent, 4);
    }
}
