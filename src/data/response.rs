//! Training response: continuous or categorical.
//!
//! Classification trains on a weighted proxy response so that class
//! weighting flows through the same sum-based scoring kernels as
//! regression. The proxy carries a vanishing per-row jitter; run scans
//! guard against splitting on jitter-scale differences.

use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::error::{TrainError, TrainResult};

/// Relative magnitude of the classification proxy jitter.
const PROXY_JITTER: f64 = 1e-9;

/// Class-weighting regime for classification.
#[derive(Clone, Debug, Default)]
pub enum ClassWeight {
    /// Unit weight per class.
    #[default]
    Unit,
    /// Weight each class by the inverse of its population.
    Balanced,
    /// Explicit nonnegative weights, normalized internally to unit mean.
    Explicit(Vec<f64>),
}

/// Response input supplied by the caller.
pub enum ResponseInput<'a> {
    /// Continuous response, one value per row.
    Reg { y: &'a [f64] },
    /// Categorical response: zero-based codes in `[0, n_ctg)`.
    Ctg {
        y_ctg: &'a [u32],
        n_ctg: u32,
        class_weight: ClassWeight,
    },
}

/// Validated training response.
#[derive(Debug)]
pub enum Response {
    Reg(ResponseReg),
    Ctg(ResponseCtg),
}

/// Regression response.
#[derive(Debug)]
pub struct ResponseReg {
    y: Vec<f64>,
    /// Response ranking by row, for per-tree quantile records.
    row2rank: Vec<u32>,
}

/// Classification response.
#[derive(Debug)]
pub struct ResponseCtg {
    y_ctg: Vec<u32>,
    n_ctg: u32,
    /// Normalized class weights (unit mean).
    weight: Vec<f64>,
    /// Weighted, jittered proxy driving the sum-based split kernels.
    proxy: Vec<f64>,
}

impl Response {
    /// Validate the input and build the internal response representation.
    ///
    /// `seed` feeds the proxy jitter; the same seed reproduces the same
    /// proxy and hence the same forest.
    pub fn from_input(input: ResponseInput<'_>, n_row: usize, seed: u64) -> TrainResult<Self> {
        match input {
            ResponseInput::Reg { y } => {
                if y.len() != n_row {
                    return Err(TrainError::Data(format!(
                        "response has {} values, frame has {} rows",
                        y.len(),
                        n_row
                    )));
                }
                Ok(Response::Reg(ResponseReg::new(y.to_vec())))
            }
            ResponseInput::Ctg {
                y_ctg,
                n_ctg,
                class_weight,
            } => {
                if y_ctg.len() != n_row {
                    return Err(TrainError::Data(format!(
                        "response has {} values, frame has {} rows",
                        y_ctg.len(),
                        n_row
                    )));
                }
                if n_ctg < 2 {
                    return Err(TrainError::Config(format!(
                        "classification requires at least two categories, got {n_ctg}"
                    )));
                }
                if let Some(&bad) = y_ctg.iter().find(|&&c| c >= n_ctg) {
                    return Err(TrainError::Data(format!(
                        "category code {bad} >= nCtg {n_ctg}"
                    )));
                }
                let weight = normalize_weights(class_weight, y_ctg, n_ctg)?;
                Ok(Response::Ctg(ResponseCtg::new(
                    y_ctg.to_vec(),
                    n_ctg,
                    weight,
                    seed,
                )))
            }
        }
    }

    /// Category count: zero for regression.
    #[inline]
    pub fn n_ctg(&self) -> u32 {
        match self {
            Response::Reg(_) => 0,
            Response::Ctg(ctg) => ctg.n_ctg,
        }
    }

    /// Response value driving split scoring: the raw response for
    /// regression, the weighted proxy for classification.
    #[inline]
    pub fn y_proxy(&self, row: usize) -> f64 {
        match self {
            Response::Reg(reg) => reg.y[row],
            Response::Ctg(ctg) => ctg.proxy[row],
        }
    }

    /// Category code; zero for regression.
    #[inline]
    pub fn ctg(&self, row: usize) -> u32 {
        match self {
            Response::Reg(_) => 0,
            Response::Ctg(ctg) => ctg.y_ctg[row],
        }
    }

    /// Response ranking by row; regression only.
    pub fn row2rank(&self) -> Option<&[u32]> {
        match self {
            Response::Reg(reg) => Some(&reg.row2rank),
            Response::Ctg(_) => None,
        }
    }
}

impl ResponseReg {
    fn new(y: Vec<f64>) -> Self {
        let row2rank = rank_rows(&y);
        Self { y, row2rank }
    }

    #[inline]
    pub fn y(&self) -> &[f64] {
        &self.y
    }
}

impl ResponseCtg {
    fn new(y_ctg: Vec<u32>, n_ctg: u32, weight: Vec<f64>, seed: u64) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let proxy = y_ctg
            .iter()
            .map(|&ctg| {
                let u: f64 = rng.gen();
                weight[ctg as usize] * (1.0 + PROXY_JITTER * (u - 0.5))
            })
            .collect();
        Self {
            y_ctg,
            n_ctg,
            weight,
            proxy,
        }
    }

    #[inline]
    pub fn weight(&self) -> &[f64] {
        &self.weight
    }
}

/// Normalize class weights to unit mean; fail on all-zero input.
fn normalize_weights(
    class_weight: ClassWeight,
    y_ctg: &[u32],
    n_ctg: u32,
) -> TrainResult<Vec<f64>> {
    let raw = match class_weight {
        ClassWeight::Unit => vec![1.0; n_ctg as usize],
        ClassWeight::Balanced => {
            let mut counts = vec![0usize; n_ctg as usize];
            for &ctg in y_ctg {
                counts[ctg as usize] += 1;
            }
            counts
                .iter()
                .map(|&c| if c > 0 { 1.0 / c as f64 } else { 0.0 })
                .collect()
        }
        ClassWeight::Explicit(w) => {
            if w.len() != n_ctg as usize {
                return Err(TrainError::Config(format!(
                    "{} class weights supplied for {} categories",
                    w.len(),
                    n_ctg
                )));
            }
            if w.iter().any(|&x| x < 0.0 || !x.is_finite()) {
                return Err(TrainError::Config(
                    "class weights must be finite and nonnegative".into(),
                ));
            }
            w
        }
    };

    let total: f64 = raw.iter().sum();
    if total <= 0.0 {
        return Err(TrainError::Config("class weights sum to zero".into()));
    }
    let scale = n_ctg as f64 / total;
    Ok(raw.iter().map(|&w| w * scale).collect())
}

/// Ascending rank of each row's response, ties sharing a rank.
fn rank_rows(y: &[f64]) -> Vec<u32> {
    let mut order: Vec<usize> = (0..y.len()).collect();
    order.sort_by(|&a, &b| y[a].partial_cmp(&y[b]).unwrap_or(std::cmp::Ordering::Equal));

    let mut row2rank = vec![0u32; y.len()];
    let mut rank = 0u32;
    for (pos, &row) in order.iter().enumerate() {
        if pos > 0 && y[row] != y[order[pos - 1]] {
            rank += 1;
        }
        row2rank[row] = rank;
    }
    row2rank
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reg_response_ranks_ties() {
        let resp = Response::from_input(
            ResponseInput::Reg {
                y: &[3.0, 1.0, 3.0, 2.0],
            },
            4,
            42,
        )
        .unwrap();
        assert_eq!(resp.row2rank(), Some(&[2u32, 0, 2, 1][..]));
        assert_eq!(resp.n_ctg(), 0);
        assert_relative_eq!(resp.y_proxy(0), 3.0);
    }

    #[test]
    fn test_reg_length_mismatch() {
        let err = Response::from_input(ResponseInput::Reg { y: &[1.0, 2.0] }, 3, 42).unwrap_err();
        assert!(err.to_string().contains("rows"));
    }

    #[test]
    fn test_ctg_unit_weights_near_one() {
        let resp = Response::from_input(
            ResponseInput::Ctg {
                y_ctg: &[0, 1, 0, 1],
                n_ctg: 2,
                class_weight: ClassWeight::Unit,
            },
            4,
            42,
        )
        .unwrap();
        assert_eq!(resp.n_ctg(), 2);
        for row in 0..4 {
            assert_relative_eq!(resp.y_proxy(row), 1.0, max_relative = 1e-8);
        }
    }

    #[test]
    fn test_ctg_balanced_weights() {
        // Three of class 0, one of class 1: balanced weighting upweights class 1.
        match Response::from_input(
            ResponseInput::Ctg {
                y_ctg: &[0, 0, 0, 1],
                n_ctg: 2,
                class_weight: ClassWeight::Balanced,
            },
            4,
            42,
        )
        .unwrap()
        {
            Response::Ctg(ctg) => {
                let w = ctg.weight();
                assert!(w[1] > w[0]);
                assert_relative_eq!(w[0] + w[1], 2.0, max_relative = 1e-12);
            }
            Response::Reg(_) => unreachable!(),
        }
    }

    #[test]
    fn test_ctg_zero_weights_rejected() {
        let err = Response::from_input(
            ResponseInput::Ctg {
                y_ctg: &[0, 1],
                n_ctg: 2,
                class_weight: ClassWeight::Explicit(vec![0.0, 0.0]),
            },
            2,
            42,
        )
        .unwrap_err();
        assert!(err.to_string().contains("zero"));
    }

    #[test]
    fn test_ctg_code_out_of_range() {
        let err = Response::from_input(
            ResponseInput::Ctg {
                y_ctg: &[0, 2],
                n_ctg: 2,
                class_weight: ClassWeight::Unit,
            },
            2,
            42,
        )
        .unwrap_err();
        assert!(err.to_string().contains("nCtg"));
    }

    #[test]
    fn test_proxy_deterministic_under_seed() {
        let make = || {
            Response::from_input(
                ResponseInput::Ctg {
                    y_ctg: &[0, 1, 1, 0],
                    n_ctg: 2,
                    class_weight: ClassWeight::Unit,
                },
                4,
                7,
            )
            .unwrap()
        };
        let (a, b) = (make(), make());
        for row in 0..4 {
            assert_eq!(a.y_proxy(row), b.y_proxy(row));
        }
    }
}
