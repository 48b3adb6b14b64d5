//! Training entry point.
//!
//! Validates the configuration, computes the ranked layout once, then
//! trains trees in chunks: each chunk's trees grow independently (in
//! parallel when allowed), after which their pre-trees merge into the
//! forest in tree order, keeping the output layout deterministic.

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::data::{RLEFrame, RankedFrame, Response, ResponseInput};
use crate::error::{Diagnostics, TrainResult};
use crate::repr::Forest;
use crate::training::frontier::Frontier;
use crate::training::logger::{TrainingLogger, Verbosity};
use crate::training::sample::Sampler;
use crate::training::TreeParams;
use crate::utils::run_with_threads;

/// Training configuration.
#[derive(Clone, Debug)]
pub struct TrainParams {
    /// Trees per forest.
    pub n_tree: u32,
    /// Rows drawn per tree; defaults to the row count.
    pub n_samp: Option<u32>,
    /// Sample with replacement.
    pub with_repl: bool,
    /// Per-row sampling weights.
    pub sample_weight: Option<Vec<f64>>,
    /// Fixed per-node predictor count; zero defers to `pred_prob`.
    pub pred_fixed: u32,
    /// Per-predictor inclusion probability; defaults to one everywhere.
    pub pred_prob: Option<Vec<f64>>,
    /// Minimum splittable node size.
    pub min_node: u32,
    /// Information floor relative to the parent split.
    pub min_ratio: f64,
    /// Depth cap; zero for unlimited.
    pub tot_levels: u32,
    /// Post-merge leaf cap; zero for none.
    pub leaf_max: u32,
    /// Cut-interpolation quantile per predictor; defaults to one half.
    pub split_quant: Option<Vec<f64>>,
    /// Dense-rank election threshold.
    pub auto_compress: f64,
    /// Signed monotone probability per predictor; numeric predictors only.
    pub reg_mono: Option<Vec<f64>>,
    /// Thread count; zero for auto.
    pub n_thread: u32,
    /// Trees grouped per forest commit.
    pub train_block: u32,
    pub seed: u64,
    pub verbosity: Verbosity,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            n_tree: 500,
            n_samp: None,
            with_repl: true,
            sample_weight: None,
            pred_fixed: 0,
            pred_prob: None,
            min_node: 2,
            min_ratio: 0.0,
            tot_levels: 0,
            leaf_max: 0,
            split_quant: None,
            auto_compress: 0.25,
            reg_mono: None,
            n_thread: 0,
            train_block: 128,
            seed: 42,
            verbosity: Verbosity::Silent,
        }
    }
}

impl TrainParams {
    /// Validate against a frame, accumulating every complaint.
    fn validate(&self, frame: &RLEFrame<'_>) -> TrainResult<()> {
        let n_pred = frame.n_pred();
        let mut diag = Diagnostics::new();

        if self.n_tree == 0 {
            diag.push("nTree must be positive");
        }
        if self.min_node == 0 {
            diag.push("minNode must be positive");
        }
        if !(0.0..=1.0).contains(&self.min_ratio) {
            diag.push(format!("minRatio must lie in [0, 1], got {}", self.min_ratio));
        }
        if !(0.0..=1.0).contains(&self.auto_compress) {
            diag.push(format!(
                "autoCompress must lie in [0, 1], got {}",
                self.auto_compress
            ));
        }
        if self.pred_fixed as usize > n_pred {
            diag.push(format!(
                "predFixed {} exceeds predictor count {n_pred}",
                self.pred_fixed
            ));
        }
        if let Some(prob) = &self.pred_prob {
            if prob.len() != n_pred {
                diag.push(format!(
                    "{} predictor probabilities supplied for {n_pred} predictors",
                    prob.len()
                ));
            } else if prob.iter().any(|&p| !(0.0..=1.0).contains(&p)) {
                diag.push("predProb entries must lie in [0, 1]");
            }
        }
        if let Some(quant) = &self.split_quant {
            if quant.len() != n_pred {
                diag.push(format!(
                    "{} split quantiles supplied for {n_pred} predictors",
                    quant.len()
                ));
            } else if quant.iter().any(|&q| !(0.0..=1.0).contains(&q)) {
                diag.push("splitQuant entries must lie in [0, 1]");
            }
        }
        if let Some(mono) = &self.reg_mono {
            if mono.len() != n_pred {
                diag.push(format!(
                    "{} monotone probabilities supplied for {n_pred} predictors",
                    mono.len()
                ));
            } else {
                if mono.iter().any(|&m| !(-1.0..=1.0).contains(&m)) {
                    diag.push("regMono entries must lie in [-1, 1]");
                }
                if (frame.n_pred_num()..n_pred).any(|pred| mono[pred] != 0.0) {
                    diag.push("regMono applies to numeric predictors only");
                }
            }
        }

        diag.into_result()
    }

    /// Resolve the per-tree parameter block.
    fn tree_params(&self, frame: &RLEFrame<'_>, n_ctg: u32) -> TreeParams {
        let n_pred = frame.n_pred();
        TreeParams {
            n_ctg: n_ctg as usize,
            min_node: self.min_node as usize,
            min_ratio: self.min_ratio,
            tot_levels: self.tot_levels as usize,
            leaf_max: self.leaf_max as usize,
            pred_fixed: self.pred_fixed as usize,
            pred_prob: self
                .pred_prob
                .clone()
                .unwrap_or_else(|| vec![1.0; n_pred]),
            reg_mono: match &self.reg_mono {
                Some(mono) if mono.iter().any(|&m| m != 0.0) => mono.clone(),
                _ => Vec::new(),
            },
            split_quant: self
                .split_quant
                .clone()
                .unwrap_or_else(|| vec![0.5; n_pred]),
            cardinality: frame.cardinalities().to_vec(),
        }
    }
}

/// Trained forest plus per-predictor information contributions.
pub struct TrainedForest {
    pub forest: Forest,
    /// Sum of realized split information per predictor.
    pub pred_info: Vec<f64>,
}

/// Train a forest over a frame and response.
pub fn train(
    frame: &RLEFrame<'_>,
    response: ResponseInput<'_>,
    params: &TrainParams,
) -> TrainResult<TrainedForest> {
    params.validate(frame)?;

    let n_row = frame.n_row();
    let response = Response::from_input(response, n_row, params.seed)?;
    let ranked = RankedFrame::new(frame, params.auto_compress)?;

    let n_samp = params.n_samp.map_or(n_row, |n| n as usize);
    let sampler = Sampler::new(
        n_row,
        n_samp,
        params.with_repl,
        params.sample_weight.as_deref(),
    )?;

    let tree_params = params.tree_params(frame, response.n_ctg());
    let n_tree = params.n_tree as usize;
    let train_block = (params.train_block as usize).max(1);

    let mut logger = TrainingLogger::new(params.verbosity);
    logger.start_training(n_tree, n_row, frame.n_pred());

    let mut forest = Forest::new(n_row);
    let mut pred_info = vec![0.0; frame.n_pred()];

    run_with_threads(params.n_thread as usize, |parallelism| {
        let mut tree_start = 0;
        while tree_start < n_tree {
            let tree_end = (tree_start + train_block).min(n_tree);

            // Produce: grow the chunk's trees, independently per tree.
            let block = parallelism.maybe_par_map(tree_start..tree_end, |t_idx| {
                let mut rng =
                    Xoshiro256PlusPlus::seed_from_u64(params.seed.wrapping_add(t_idx as u64));
                let sample = sampler.sample_tree(&response, n_row, &mut rng);
                let pretree =
                    Frontier::one_tree(&ranked, &tree_params, &sample, &mut rng, parallelism);
                (t_idx, pretree, sample)
            });

            // Consume: merge into the forest in tree order.
            for (t_idx, pretree, sample) in block {
                logger.tree_done(t_idx, pretree.height(), pretree.leaf_count());
                let bundle = pretree.consume(
                    &ranked,
                    &tree_params.split_quant,
                    &sample,
                    tree_params.n_ctg,
                    tree_params.leaf_max,
                    &mut pred_info,
                );
                forest.append_tree(bundle);
            }
            logger.chunk_done(tree_end, n_tree);
            tree_start = tree_end;
        }
    });

    logger.finish(format!("{} trees", forest.n_tree()));
    Ok(TrainedForest { forest, pred_info })
}
