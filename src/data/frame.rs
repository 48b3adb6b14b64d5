//! Input observation frame.
//!
//! Training consumes an [`RLEFrame`]: numeric predictors either as a dense
//! row-major block or in run-length-encoded column form, and factor
//! predictors as dense zero-based integer codes. Predictors are indexed with
//! numerics first, factors after.

use ndarray::ArrayView2;

use crate::error::{TrainError, TrainResult};

/// Numeric observation block.
#[derive(Clone, Debug)]
pub enum NumBlock<'a> {
    /// No numeric predictors.
    None,
    /// Dense `n_row x n_pred_num` block.
    Dense(ArrayView2<'a, f64>),
    /// Run-length-encoded columns.
    Rle(RleBlock<'a>),
}

/// Run-length-encoded numeric columns.
///
/// Column `p` occupies entries `pred_start[p] .. pred_start[p + 1]` (the last
/// column is terminated by `val_num.len()`). Entry `j` states that rows
/// `row_start[j] .. row_start[j] + run_length[j]` all hold `val_num[j]`.
#[derive(Clone, Copy, Debug)]
pub struct RleBlock<'a> {
    pub val_num: &'a [f64],
    pub row_start: &'a [u32],
    pub run_length: &'a [u32],
    pub pred_start: &'a [usize],
}

/// Mixed numeric/factor observation frame.
///
/// Borrowed view over caller-owned storage; the frame is immutable for the
/// duration of training.
#[derive(Debug)]
pub struct RLEFrame<'a> {
    n_row: usize,
    num: NumBlock<'a>,
    n_pred_num: usize,
    /// Dense `n_row x n_pred_fac` zero-based factor codes.
    fac: Option<ArrayView2<'a, u32>>,
    /// Per-factor cardinality.
    cardinality: Vec<u32>,
}

impl<'a> RLEFrame<'a> {
    /// Assemble and validate a frame.
    ///
    /// Fails on shape mismatches, zero cardinalities, out-of-range factor
    /// codes and RLE columns that do not cover `0 .. n_row` exactly.
    pub fn new(
        n_row: usize,
        num: NumBlock<'a>,
        fac: Option<ArrayView2<'a, u32>>,
        cardinality: Vec<u32>,
    ) -> TrainResult<Self> {
        if n_row == 0 {
            return Err(TrainError::Data("frame has no rows".into()));
        }

        let n_pred_num = match &num {
            NumBlock::None => 0,
            NumBlock::Dense(block) => {
                if block.nrows() != n_row {
                    return Err(TrainError::Data(format!(
                        "numeric block has {} rows, frame has {}",
                        block.nrows(),
                        n_row
                    )));
                }
                block.ncols()
            }
            NumBlock::Rle(rle) => Self::validate_rle(rle, n_row)?,
        };

        let n_pred_fac = fac.as_ref().map_or(0, |f| f.ncols());
        if let Some(fac) = &fac {
            if fac.nrows() != n_row {
                return Err(TrainError::Data(format!(
                    "factor block has {} rows, frame has {}",
                    fac.nrows(),
                    n_row
                )));
            }
        }
        if cardinality.len() != n_pred_fac {
            return Err(TrainError::Data(format!(
                "{} cardinalities supplied for {} factor predictors",
                cardinality.len(),
                n_pred_fac
            )));
        }
        if let Some(fac) = &fac {
            for (fac_idx, &card) in cardinality.iter().enumerate() {
                if card == 0 {
                    return Err(TrainError::Data(format!(
                        "factor predictor {fac_idx} has zero cardinality"
                    )));
                }
                for row in 0..n_row {
                    let code = fac[[row, fac_idx]];
                    if code >= card {
                        return Err(TrainError::Data(format!(
                            "factor predictor {fac_idx}, row {row}: code {code} >= cardinality {card}"
                        )));
                    }
                }
            }
        }
        if n_pred_num + n_pred_fac == 0 {
            return Err(TrainError::Data("frame has no predictors".into()));
        }

        Ok(Self {
            n_row,
            num,
            n_pred_num,
            fac,
            cardinality,
        })
    }

    fn validate_rle(rle: &RleBlock<'a>, n_row: usize) -> TrainResult<usize> {
        let n_pred_num = rle.pred_start.len();
        let len = rle.val_num.len();
        if rle.row_start.len() != len || rle.run_length.len() != len {
            return Err(TrainError::Data(
                "RLE numeric block: value/row/length arrays differ in length".into(),
            ));
        }
        for p in 0..n_pred_num {
            let lo = rle.pred_start[p];
            let hi = if p + 1 < n_pred_num {
                rle.pred_start[p + 1]
            } else {
                len
            };
            if lo > hi || hi > len {
                return Err(TrainError::Data(format!(
                    "RLE numeric predictor {p}: malformed column bounds"
                )));
            }
            let covered: usize = rle.run_length[lo..hi].iter().map(|&r| r as usize).sum();
            if covered != n_row {
                return Err(TrainError::Data(format!(
                    "RLE numeric predictor {p}: runs cover {covered} rows, frame has {n_row}"
                )));
            }
        }
        Ok(n_pred_num)
    }

    #[inline]
    pub fn n_row(&self) -> usize {
        self.n_row
    }

    #[inline]
    pub fn n_pred_num(&self) -> usize {
        self.n_pred_num
    }

    #[inline]
    pub fn n_pred_fac(&self) -> usize {
        self.cardinality.len()
    }

    #[inline]
    pub fn n_pred(&self) -> usize {
        self.n_pred_num + self.n_pred_fac()
    }

    /// Numerics precede factors in predictor order.
    #[inline]
    pub fn is_factor(&self, pred: usize) -> bool {
        pred >= self.n_pred_num
    }

    /// Position of a factor predictor within the factor block.
    #[inline]
    pub fn fac_idx(&self, pred: usize) -> usize {
        debug_assert!(self.is_factor(pred));
        pred - self.n_pred_num
    }

    #[inline]
    pub fn cardinality(&self, pred: usize) -> u32 {
        self.cardinality[self.fac_idx(pred)]
    }

    pub fn cardinalities(&self) -> &[u32] {
        &self.cardinality
    }

    /// Materialize a numeric column in row order.
    pub fn num_col(&self, num_idx: usize) -> Vec<f64> {
        match &self.num {
            NumBlock::None => Vec::new(),
            NumBlock::Dense(block) => block.column(num_idx).to_vec(),
            NumBlock::Rle(rle) => {
                let lo = rle.pred_start[num_idx];
                let hi = if num_idx + 1 < rle.pred_start.len() {
                    rle.pred_start[num_idx + 1]
                } else {
                    rle.val_num.len()
                };
                let mut col = vec![0.0; self.n_row];
                for j in lo..hi {
                    let start = rle.row_start[j] as usize;
                    for r in 0..rle.run_length[j] as usize {
                        col[start + r] = rle.val_num[j];
                    }
                }
                col
            }
        }
    }

    /// Factor code for `(row, fac_idx)`.
    #[inline]
    pub fn fac_code(&self, row: usize, fac_idx: usize) -> u32 {
        self.fac.as_ref().expect("factor block present")[[row, fac_idx]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_dense_frame_shapes() {
        let num = arr2(&[[1.0], [2.0], [3.0]]);
        let frame = RLEFrame::new(3, NumBlock::Dense(num.view()), None, vec![]).unwrap();
        assert_eq!(frame.n_pred(), 1);
        assert_eq!(frame.n_pred_num(), 1);
        assert!(!frame.is_factor(0));
        assert_eq!(frame.num_col(0), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_factor_code_out_of_range() {
        let fac = arr2(&[[0u32], [2], [1]]);
        let err = RLEFrame::new(3, NumBlock::None, Some(fac.view()), vec![2]).unwrap_err();
        assert!(err.to_string().contains("cardinality"));
    }

    #[test]
    fn test_rle_column_roundtrip() {
        // Column: rows 0..3 hold 5.0, rows 3..5 hold 7.0.
        let val = [5.0, 7.0];
        let row_start = [0u32, 3];
        let run_length = [3u32, 2];
        let pred_start = [0usize];
        let frame = RLEFrame::new(
            5,
            NumBlock::Rle(RleBlock {
                val_num: &val,
                row_start: &row_start,
                run_length: &run_length,
                pred_start: &pred_start,
            }),
            None,
            vec![],
        )
        .unwrap();
        assert_eq!(frame.num_col(0), vec![5.0, 5.0, 5.0, 7.0, 7.0]);
    }

    #[test]
    fn test_rle_coverage_mismatch() {
        let val = [5.0];
        let row_start = [0u32];
        let run_length = [3u32];
        let pred_start = [0usize];
        let err = RLEFrame::new(
            5,
            NumBlock::Rle(RleBlock {
                val_num: &val,
                row_start: &row_start,
                run_length: &run_length,
                pred_start: &pred_start,
            }),
            None,
            vec![],
        )
        .unwrap_err();
        assert!(err.to_string().contains("cover"));
    }

    #[test]
    fn test_mixed_frame_predictor_order() {
        let num = arr2(&[[1.0], [2.0]]);
        let fac = arr2(&[[0u32], [1]]);
        let frame =
            RLEFrame::new(2, NumBlock::Dense(num.view()), Some(fac.view()), vec![2]).unwrap();
        assert_eq!(frame.n_pred(), 2);
        assert!(!frame.is_factor(0));
        assert!(frame.is_factor(1));
        assert_eq!(frame.fac_idx(1), 0);
        assert_eq!(frame.cardinality(1), 2);
    }
}
