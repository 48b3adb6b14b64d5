//! Per-tree response sampling.
//!
//! Each tree draws `n_samp` rows, with or without replacement, optionally
//! weighted. The distinct drawn rows form the tree's bag; multiplicities are
//! carried per sample. Samples are emitted in row order, which is also the
//! staging order of the root node.

use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::data::Response;
use crate::error::{TrainError, TrainResult};
use crate::repr::SampleRecord;

/// Sentinel for rows absent from the bag.
pub const NO_SAMPLE: u32 = u32::MAX;

/// Row count at which sampled indices are bucketed before counting, to
/// localize the increments of the count scan.
const BIN_ROWS: usize = 1 << 16;
/// Bucket width for binned counting.
const BIN_WIDTH: usize = 1 << 12;

/// Response sum and sample count.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SumCount {
    pub sum: f64,
    pub s_count: u32,
}

impl SumCount {
    #[inline]
    pub fn accum(&mut self, sum: f64, s_count: u32) {
        self.sum += sum;
        self.s_count += s_count;
    }
}

/// One bagged observation: multiplicity, response contribution and (for
/// classification) the category code.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleNux {
    pub s_count: u32,
    pub y_sum: f64,
    pub ctg: u32,
}

/// Per-tree sample: bag membership, multiplicities and response summaries.
pub struct Sample {
    /// Bagged observations, in row order.
    pub nux: Vec<SampleNux>,
    /// Row to sample index; `NO_SAMPLE` off-bag.
    pub row2sample: Vec<u32>,
    /// Sample index to row; ascending by construction.
    pub sample2row: Vec<u32>,
    pub bag_count: usize,
    /// Sum of `y_sum` over the bag.
    pub bag_sum: f64,
    /// Classification: per-category root sums; empty for regression.
    pub ctg_root: Vec<SumCount>,
    /// Compressed `(del_row, s_count, rank)` records.
    pub records: Vec<SampleRecord>,
}

/// Row-sampling engine; per-tree state is the caller's RNG.
pub struct Sampler {
    n_samp: usize,
    with_repl: bool,
    /// Per-row sampling weights, normalized to sum one.
    weights: Option<Vec<f64>>,
}

impl Sampler {
    pub fn new(
        n_row: usize,
        n_samp: usize,
        with_repl: bool,
        sample_weight: Option<&[f64]>,
    ) -> TrainResult<Self> {
        if n_samp == 0 {
            return Err(TrainError::Config("nSamp must be positive".into()));
        }
        if !with_repl && n_samp > n_row {
            return Err(TrainError::Config(format!(
                "sampling {n_samp} of {n_row} rows without replacement"
            )));
        }
        let weights = match sample_weight {
            None => None,
            Some(w) => {
                if w.len() != n_row {
                    return Err(TrainError::Config(format!(
                        "{} sampling weights supplied for {} rows",
                        w.len(),
                        n_row
                    )));
                }
                if w.iter().any(|&x| x < 0.0 || !x.is_finite()) {
                    return Err(TrainError::Config(
                        "sampling weights must be finite and nonnegative".into(),
                    ));
                }
                let total: f64 = w.iter().sum();
                if total <= 0.0 {
                    return Err(TrainError::Config("sampling weights sum to zero".into()));
                }
                Some(w.iter().map(|&x| x / total).collect())
            }
        };
        Ok(Self {
            n_samp,
            with_repl,
            weights,
        })
    }

    #[inline]
    pub fn n_samp(&self) -> usize {
        self.n_samp
    }

    /// Draw the row multiset for one tree.
    pub fn sample_rows(&self, n_row: usize, rng: &mut Xoshiro256PlusPlus) -> Vec<u32> {
        match (&self.weights, self.with_repl) {
            (None, true) => (0..self.n_samp)
                .map(|_| rng.gen_range(0..n_row as u32))
                .collect(),
            (None, false) => {
                // Partial Fisher-Yates shuffle.
                let mut indices: Vec<u32> = (0..n_row as u32).collect();
                for i in 0..self.n_samp {
                    let j = rng.gen_range(i..n_row);
                    indices.swap(i, j);
                }
                indices.truncate(self.n_samp);
                indices
            }
            (Some(weights), true) => {
                let cum = cumulative(weights);
                (0..self.n_samp)
                    .map(|_| {
                        let u: f64 = rng.gen();
                        search_cumulative(&cum, u)
                    })
                    .collect()
            }
            (Some(weights), false) => {
                // Weighted reservoir keys: retain the n_samp largest
                // u^(1/w); zero-weight rows draw key zero and lose to any
                // positive-weight row.
                let mut keyed: Vec<(f64, u32)> = weights
                    .iter()
                    .enumerate()
                    .map(|(row, &w)| {
                        let u: f64 = rng.gen();
                        let key = if w > 0.0 { u.powf(1.0 / w) } else { 0.0 };
                        (key, row as u32)
                    })
                    .collect();
                keyed.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap().then(a.1.cmp(&b.1)));
                keyed.truncate(self.n_samp);
                keyed.into_iter().map(|(_, row)| row).collect()
            }
        }
    }

    /// Sample the response for one tree.
    pub fn sample_tree(
        &self,
        response: &Response,
        n_row: usize,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Sample {
        let rows = self.sample_rows(n_row, rng);
        let s_count_row = count_rows(&rows, n_row);

        let n_ctg = response.n_ctg() as usize;
        let mut nux = Vec::new();
        let mut row2sample = vec![NO_SAMPLE; n_row];
        let mut sample2row = Vec::new();
        let mut ctg_root = vec![SumCount::default(); n_ctg];
        let mut records = Vec::new();
        let mut bag_sum = 0.0;
        let mut row_prev = 0u32;

        let row2rank = response.row2rank();
        for (row, &s_count) in s_count_row.iter().enumerate() {
            if s_count == 0 {
                continue;
            }
            let y_sum = response.y_proxy(row) * s_count as f64;
            let ctg = response.ctg(row);
            row2sample[row] = nux.len() as u32;
            sample2row.push(row as u32);
            nux.push(SampleNux { s_count, y_sum, ctg });
            bag_sum += y_sum;
            if n_ctg > 0 {
                ctg_root[ctg as usize].accum(y_sum, s_count);
            }
            records.push(SampleRecord {
                del_row: row as u32 - row_prev,
                s_count,
                rank: row2rank.map_or(0, |r| r[row]),
            });
            row_prev = row as u32;
        }

        Sample {
            bag_count: nux.len(),
            nux,
            row2sample,
            sample2row,
            bag_sum,
            ctg_root,
            records,
        }
    }
}

/// Multiplicity of each row in the drawn multiset.
///
/// For large frames the draws are bucketed first so the increment scan
/// touches one cache-sized stripe at a time; the multiset is unchanged.
fn count_rows(rows: &[u32], n_row: usize) -> Vec<u32> {
    let mut s_count_row = vec![0u32; n_row];
    if n_row >= BIN_ROWS {
        let n_bins = n_row.div_ceil(BIN_WIDTH);
        let mut bins: Vec<Vec<u32>> = vec![Vec::new(); n_bins];
        for &row in rows {
            bins[row as usize / BIN_WIDTH].push(row);
        }
        for bin in bins {
            for row in bin {
                s_count_row[row as usize] += 1;
            }
        }
    } else {
        for &row in rows {
            s_count_row[row as usize] += 1;
        }
    }
    s_count_row
}

fn cumulative(weights: &[f64]) -> Vec<f64> {
    let mut cum = Vec::with_capacity(weights.len());
    let mut acc = 0.0;
    for &w in weights {
        acc += w;
        cum.push(acc);
    }
    cum
}

/// First index whose cumulative weight exceeds `u * total`.
fn search_cumulative(cum: &[f64], u: f64) -> u32 {
    let target = u * cum[cum.len() - 1];
    match cum.binary_search_by(|x| x.partial_cmp(&target).unwrap()) {
        Ok(idx) | Err(idx) => (idx.min(cum.len() - 1)) as u32,
    }
}
