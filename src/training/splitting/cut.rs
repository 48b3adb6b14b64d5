//! Numeric cut accumulation.
//!
//! Candidates scan their staged cells right-to-left, moving one cell at a
//! time from the left to the right side and scoring the boundary wherever
//! adjacent ranks differ. Weighted variance (regression) and Gini
//! (classification) share the scan skeleton through [`CutKernel`]; they
//! differ only in the running statistics each shift maintains. Predictors
//! with an implicit rank interleave a residual block: the scan descends to
//! the block, evaluates its boundary, then shifts the block right and
//! continues.

use crate::training::partition::ObsCell;
use crate::training::sample::SumCount;

/// Denominator floor guarding degenerate sums under case weighting.
pub const MIN_DENOM: f64 = 1e-5;

/// Winning cut of one candidate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CutResult {
    /// Gain above the node's pre-bias.
    pub info: f64,
    /// Sample count left of the cut, residual included.
    pub lh_s_count: u32,
    /// Rank bounding the cut from the left.
    pub rank_lo: u32,
    /// Rank bounding the cut from the right.
    pub rank_hi: u32,
    /// Cell-relative position of the first explicit cell right of the cut.
    pub rh_inf: usize,
    /// Residual samples branching left.
    pub lh_implicit: usize,
}

/// Running statistics of a right-to-left cut scan.
pub trait CutKernel {
    /// Move one explicit cell from the left side to the right.
    fn shift_cell(&mut self, cell: &ObsCell);
    /// Move the residual block from the left side to the right.
    fn shift_residual(&mut self);
    /// Score the current partition; `None` if gated or unstable.
    fn try_score(&self) -> Option<f64>;
    /// Samples currently on the left side.
    fn s_count_l(&self) -> u32;
}

/// Regression: weighted-variance criterion with optional monotone gating.
pub struct RegKernel {
    sum: f64,
    s_count: u32,
    sum_l: f64,
    s_count_l: u32,
    residual: SumCount,
    /// Monotone gate: +1 non-decreasing, -1 non-increasing, 0 off.
    mono: i8,
}

impl RegKernel {
    pub fn new(sum: f64, s_count: u32, residual: SumCount, mono: i8) -> Self {
        Self {
            sum,
            s_count,
            sum_l: sum,
            s_count_l: s_count,
            residual,
            mono,
        }
    }
}

impl CutKernel for RegKernel {
    #[inline]
    fn shift_cell(&mut self, cell: &ObsCell) {
        self.sum_l -= cell.y_sum;
        self.s_count_l -= cell.s_count;
    }

    fn shift_residual(&mut self) {
        self.sum_l -= self.residual.sum;
        self.s_count_l -= self.residual.s_count;
    }

    fn try_score(&self) -> Option<f64> {
        let s_count_r = self.s_count - self.s_count_l;
        if self.s_count_l == 0 || s_count_r == 0 {
            return None;
        }
        let sum_r = self.sum - self.sum_l;
        if self.mono != 0 {
            let up = self.sum_l * s_count_r as f64 <= sum_r * self.s_count_l as f64;
            if (self.mono > 0) != up {
                return None;
            }
        }
        Some(
            self.sum_l * self.sum_l / self.s_count_l as f64
                + sum_r * sum_r / s_count_r as f64,
        )
    }

    #[inline]
    fn s_count_l(&self) -> u32 {
        self.s_count_l
    }
}

/// Classification: Gini criterion over per-category running sums.
pub struct CtgKernel {
    sum: f64,
    s_count: u32,
    sum_l: f64,
    s_count_l: u32,
    ss_l: f64,
    ss_r: f64,
    /// Node totals per category.
    ctg_sum: Vec<f64>,
    /// Sums accumulated onto the right side, per category.
    ctg_acc: Vec<f64>,
    residual: SumCount,
    residual_ctg: Vec<f64>,
}

impl CtgKernel {
    pub fn new(
        sum: f64,
        s_count: u32,
        ctg_sum: Vec<f64>,
        residual: SumCount,
        residual_ctg: Vec<f64>,
    ) -> Self {
        let ss_l = ctg_sum.iter().map(|&s| s * s).sum();
        let n_ctg = ctg_sum.len();
        Self {
            sum,
            s_count,
            sum_l: sum,
            s_count_l: s_count,
            ss_l,
            ss_r: 0.0,
            ctg_sum,
            ctg_acc: vec![0.0; n_ctg],
            residual,
            residual_ctg,
        }
    }

    /// Move a `(y_sum, ctg)` contribution to the right side, maintaining
    /// both sums of squares incrementally.
    #[inline]
    fn shift_ctg(&mut self, y_sum: f64, ctg: usize) {
        let sum_r_ctg = self.ctg_acc[ctg];
        self.ss_r += y_sum * (y_sum + 2.0 * sum_r_ctg);
        let sum_l_ctg = self.ctg_sum[ctg] - sum_r_ctg;
        self.ss_l += y_sum * (y_sum - 2.0 * sum_l_ctg);
        self.ctg_acc[ctg] += y_sum;
    }
}

impl CutKernel for CtgKernel {
    fn shift_cell(&mut self, cell: &ObsCell) {
        self.shift_ctg(cell.y_sum, cell.ctg as usize);
        self.sum_l -= cell.y_sum;
        self.s_count_l -= cell.s_count;
    }

    fn shift_residual(&mut self) {
        for ctg in 0..self.residual_ctg.len() {
            let y_sum = self.residual_ctg[ctg];
            self.shift_ctg(y_sum, ctg);
        }
        self.sum_l -= self.residual.sum;
        self.s_count_l -= self.residual.s_count;
    }

    fn try_score(&self) -> Option<f64> {
        let sum_r = self.sum - self.sum_l;
        if self.sum_l <= MIN_DENOM || sum_r <= MIN_DENOM {
            return None;
        }
        Some(self.ss_l / self.sum_l + self.ss_r / sum_r)
    }

    #[inline]
    fn s_count_l(&self) -> u32 {
        self.s_count_l
    }
}

/// Accumulator over one scan, retaining the argmax cut.
struct CutArgMax {
    pre_bias: f64,
    max_info: f64,
    best: Option<CutResult>,
}

impl CutArgMax {
    fn new(pre_bias: f64) -> Self {
        Self {
            pre_bias,
            max_info: pre_bias,
            best: None,
        }
    }

    fn consider<K: CutKernel>(
        &mut self,
        kernel: &K,
        rank_lo: u32,
        rank_hi: u32,
        rh_inf: usize,
        lh_implicit: usize,
    ) {
        if let Some(info) = kernel.try_score() {
            if info > self.max_info {
                self.max_info = info;
                self.best = Some(CutResult {
                    info: info - self.pre_bias,
                    lh_s_count: kernel.s_count_l(),
                    rank_lo,
                    rank_hi,
                    rh_inf,
                    lh_implicit,
                });
            }
        }
    }
}

/// Find the maximum-information cut over a candidate's staged cells.
///
/// `cells` is the node's explicit segment in ascending rank order.
/// `dense` supplies the implicit rank and residual count when the predictor
/// compresses within this node.
pub fn find_cut<K: CutKernel>(
    kernel: &mut K,
    cells: &[ObsCell],
    dense: Option<(u32, usize)>,
    pre_bias: f64,
) -> Option<CutResult> {
    let mut arg_max = CutArgMax::new(pre_bias);
    match dense {
        None => scan_block(kernel, cells, 0, None, &mut arg_max, 0),
        Some((rank_dense, implicit)) => {
            // Explicit ranks never equal the dense rank, so the residual
            // block sits between the two partitions.
            let dense_cut = cells.partition_point(|c| c.rank < rank_dense);
            if dense_cut == cells.len() {
                // Residual holds the highest rank: shift it first, then an
                // ordinary scan with the residual bounding from the right.
                kernel.shift_residual();
                scan_block(kernel, cells, 0, Some(rank_dense), &mut arg_max, 0);
            } else {
                // Scan the block above the residual, then evaluate the
                // boundary against the residual itself.
                scan_block(kernel, &cells[dense_cut..], dense_cut, None, &mut arg_max, implicit);
                arg_max.consider(
                    kernel,
                    rank_dense,
                    cells[dense_cut].rank,
                    dense_cut,
                    implicit,
                );
                if dense_cut > 0 {
                    // Shift the residual right and walk the block below.
                    kernel.shift_residual();
                    scan_block(
                        kernel,
                        &cells[..dense_cut],
                        0,
                        Some(rank_dense),
                        &mut arg_max,
                        0,
                    );
                }
            }
        }
    }
    arg_max.best
}

/// Right-to-left walk of one contiguous block.
///
/// `bound_rank` names the rank immediately right of the block, when the
/// block does not end the segment; `base` converts block positions into
/// segment positions; `lh_implicit` tags cuts whose left side holds the
/// residual.
fn scan_block<K: CutKernel>(
    kernel: &mut K,
    cells: &[ObsCell],
    base: usize,
    bound_rank: Option<u32>,
    arg_max: &mut CutArgMax,
    lh_implicit: usize,
) {
    let mut rank_right = bound_rank;
    for (idx, cell) in cells.iter().enumerate().rev() {
        if let Some(rank_hi) = rank_right {
            if cell.rank != rank_hi {
                arg_max.consider(kernel, cell.rank, rank_hi, base + idx + 1, lh_implicit);
            }
        }
        rank_right = Some(cell.rank);
        kernel.shift_cell(cell);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cell(rank: u32, y_sum: f64, s_count: u32) -> ObsCell {
        ObsCell {
            rank,
            s_count,
            y_sum,
            ctg: 0,
            tied: false,
        }
    }

    fn ctg_cell(rank: u32, y_sum: f64, s_count: u32, ctg: u32) -> ObsCell {
        ObsCell {
            rank,
            s_count,
            y_sum,
            ctg,
            tied: false,
        }
    }

    fn reg_kernel(cells: &[ObsCell], mono: i8) -> RegKernel {
        let sum: f64 = cells.iter().map(|c| c.y_sum).sum();
        let s_count: u32 = cells.iter().map(|c| c.s_count).sum();
        RegKernel::new(sum, s_count, SumCount::default(), mono)
    }

    fn pre_bias(cells: &[ObsCell]) -> f64 {
        let sum: f64 = cells.iter().map(|c| c.y_sum).sum();
        let s_count: u32 = cells.iter().map(|c| c.s_count).sum();
        sum * sum / s_count as f64
    }

    #[test]
    fn test_reg_cut_between_separated_blocks() {
        // y jumps between ranks 2 and 3: the cut lands there.
        let cells: Vec<ObsCell> = (0..6)
            .map(|i| cell(i, if i < 3 { 1.0 } else { 10.0 }, 1))
            .collect();
        let mut kernel = reg_kernel(&cells, 0);
        let cut = find_cut(&mut kernel, &cells, None, pre_bias(&cells)).unwrap();

        assert_eq!(cut.rank_lo, 2);
        assert_eq!(cut.rank_hi, 3);
        assert_eq!(cut.rh_inf, 3);
        assert_eq!(cut.lh_s_count, 3);
        assert_eq!(cut.lh_implicit, 0);
        // info = 9/3 + 900/3 - 1089/6*2 ... checked against the closed form.
        let expect = (3.0f64 * 3.0 / 3.0) + (30.0 * 30.0 / 3.0) - pre_bias(&cells);
        assert_relative_eq!(cut.info, expect, max_relative = 1e-12);
    }

    #[test]
    fn test_reg_no_cut_on_constant_response() {
        let cells: Vec<ObsCell> = (0..4).map(|i| cell(i, 2.0, 1)).collect();
        let mut kernel = reg_kernel(&cells, 0);
        assert!(find_cut(&mut kernel, &cells, None, pre_bias(&cells)).is_none());
    }

    #[test]
    fn test_cut_never_lands_between_tied_ranks() {
        // Response orders perfectly, but the middle ranks tie: the only
        // admissible cuts are outside the tie.
        let cells = [
            cell(0, 1.0, 1),
            cell(1, 1.0, 1),
            cell(1, 10.0, 1),
            cell(2, 10.0, 1),
        ];
        let mut kernel = reg_kernel(&cells, 0);
        let cut = find_cut(&mut kernel, &cells, None, pre_bias(&cells)).unwrap();
        assert_ne!(cut.rank_lo, cut.rank_hi);
        assert!(cut.rh_inf == 1 || cut.rh_inf == 3);
    }

    #[test]
    fn test_mono_gate_rejects_decreasing() {
        // Response strictly decreases in rank: a non-decreasing constraint
        // forbids every cut.
        let cells: Vec<ObsCell> = (0..4).map(|i| cell(i, (4 - i) as f64, 1)).collect();
        let mut kernel = reg_kernel(&cells, 1);
        assert!(find_cut(&mut kernel, &cells, None, pre_bias(&cells)).is_none());

        // The opposite sign admits them.
        let mut kernel = reg_kernel(&cells, -1);
        assert!(find_cut(&mut kernel, &cells, None, pre_bias(&cells)).is_some());
    }

    #[test]
    fn test_dense_residual_rightmost() {
        // Explicit cells all rank below the dense rank; residual bounds from
        // the right.
        let cells = [cell(0, 1.0, 1), cell(1, 1.0, 1)];
        let residual = SumCount {
            sum: 20.0,
            s_count: 2,
        };
        let sum = 22.0;
        let mut kernel = RegKernel::new(sum, 4, residual, 0);
        let node_bias = sum * sum / 4.0;
        let cut = find_cut(&mut kernel, &cells, Some((5, 2)), node_bias).unwrap();

        // Best separation: explicit block left, residual right.
        assert_eq!(cut.rank_lo, 1);
        assert_eq!(cut.rank_hi, 5);
        assert_eq!(cut.rh_inf, 2);
        assert_eq!(cut.lh_implicit, 0);
        assert_eq!(cut.lh_s_count, 2);
    }

    #[test]
    fn test_dense_residual_between_blocks() {
        // Value 1 below the residual block (eight samples of rank 1),
        // value 9 above. The boundary cut {1, residual} | {9} and the low
        // cut {1} | {residual, 9} score identically here; the boundary is
        // evaluated first and a later tie never displaces it.
        let cells = [cell(0, 1.0, 1), cell(2, 9.0, 1)];
        let residual = SumCount {
            sum: 40.0,
            s_count: 8,
        };
        let sum = 50.0;
        let mut kernel = RegKernel::new(sum, 10, residual, 0);
        let node_bias = sum * sum / 10.0;
        let cut = find_cut(&mut kernel, &cells, Some((1, 8)), node_bias).unwrap();

        assert_eq!(cut.rank_lo, 1);
        assert_eq!(cut.rank_hi, 2);
        assert_eq!(cut.rh_inf, 1);
        assert_eq!(cut.lh_implicit, 8);
        assert_eq!(cut.lh_s_count, 9);
    }

    #[test]
    fn test_dense_boundary_takes_residual_left() {
        // Residual mean matches the low block: boundary against the high
        // block wins and the residual branches left.
        let cells = [cell(0, 1.0, 1), cell(2, 50.0, 1)];
        let residual = SumCount {
            sum: 3.0,
            s_count: 3,
        };
        let sum = 54.0;
        let mut kernel = RegKernel::new(sum, 5, residual, 0);
        let node_bias = sum * sum / 5.0;
        let cut = find_cut(&mut kernel, &cells, Some((1, 3)), node_bias).unwrap();

        assert_eq!(cut.rank_lo, 1);
        assert_eq!(cut.rank_hi, 2);
        assert_eq!(cut.lh_implicit, 3);
        assert_eq!(cut.lh_s_count, 4);
        assert_eq!(cut.rh_inf, 1);
    }

    #[test]
    fn test_ctg_gini_prefers_pure_split() {
        // Categories separate exactly at the rank boundary.
        let cells = [
            ctg_cell(0, 1.0, 1, 0),
            ctg_cell(1, 1.0, 1, 0),
            ctg_cell(2, 1.0, 1, 1),
            ctg_cell(3, 1.0, 1, 1),
        ];
        let ctg_sum = vec![2.0, 2.0];
        let sum = 4.0;
        let bias = ctg_sum.iter().map(|s| s * s).sum::<f64>() / sum;
        let mut kernel = CtgKernel::new(sum, 4, ctg_sum, SumCount::default(), vec![]);
        let cut = find_cut(&mut kernel, &cells, None, bias).unwrap();

        assert_eq!(cut.rank_lo, 1);
        assert_eq!(cut.rank_hi, 2);
        // Pure split: ssL/sumL + ssR/sumR = 2 + 2; bias = 8/4 = 2.
        assert_relative_eq!(cut.info, 2.0, max_relative = 1e-12);
    }

    #[test]
    fn test_ctg_no_gain_when_mixed_evenly() {
        let cells = [
            ctg_cell(0, 1.0, 1, 0),
            ctg_cell(1, 1.0, 1, 1),
            ctg_cell(2, 1.0, 1, 0),
            ctg_cell(3, 1.0, 1, 1),
        ];
        let ctg_sum = vec![2.0, 2.0];
        let bias = ctg_sum.iter().map(|s| s * s).sum::<f64>() / 4.0;
        let mut kernel = CtgKernel::new(4.0, 4, ctg_sum, SumCount::default(), vec![]);
        // Interior cuts exist but none improves on the node bias.
        assert!(find_cut(&mut kernel, &cells, None, bias).is_none());
    }

    #[test]
    fn test_ctg_unstable_denominator_skipped() {
        // Left sum vanishes under extreme weighting: the cut is skipped
        // rather than scored against a degenerate denominator.
        let cells = [ctg_cell(0, 1e-9, 1, 0), ctg_cell(1, 5.0, 1, 1)];
        let ctg_sum = vec![1e-9, 5.0];
        let sum = 5.0 + 1e-9;
        let bias = ctg_sum.iter().map(|s| s * s).sum::<f64>() / sum;
        let mut kernel = CtgKernel::new(sum, 2, ctg_sum, SumCount::default(), vec![]);
        assert!(find_cut(&mut kernel, &cells, None, bias).is_none());
    }

    #[test]
    fn test_ctg_dense_residual_participates() {
        // Residual block is pure category 1; explicit cells pure category 0.
        let cells = [ctg_cell(0, 1.0, 1, 0), ctg_cell(1, 1.0, 1, 0)];
        let residual = SumCount {
            sum: 3.0,
            s_count: 3,
        };
        let ctg_sum = vec![2.0, 3.0];
        let sum = 5.0;
        let bias = ctg_sum.iter().map(|s| s * s).sum::<f64>() / sum;
        let mut kernel = CtgKernel::new(sum, 5, ctg_sum, residual, vec![0.0, 3.0]);
        let cut = find_cut(&mut kernel, &cells, Some((2, 3)), bias).unwrap();

        // Boundary between explicit block and residual: pure children.
        assert_eq!(cut.rank_lo, 1);
        assert_eq!(cut.rank_hi, 2);
        assert_eq!(cut.rh_inf, 2);
        assert_eq!(cut.lh_implicit, 0);
        assert_relative_eq!(cut.info, 2.0 + 3.0 - bias, max_relative = 1e-12);
    }
}
