//! Crescent per-tree structure.
//!
//! The pre-tree records splits as they are chosen: numeric splits keep their
//! rank range until consumption, when the ranked frame interpolates the cut
//! value; factor splits write left-branch codes into a per-tree bit vector.
//! Consumption finalizes the tree into a [`TreeBundle`], optionally merging
//! lowest-information splits to satisfy a leaf cap.

use fixedbitset::FixedBitSet;

use crate::data::RankedFrame;
use crate::repr::{Leaf, SplitValue, TreeBundle, TreeNode};
use crate::training::sample::Sample;

const NO_LEAF: u32 = u32::MAX;

/// Split payload while the tree is under construction.
#[derive(Clone, Copy, Debug, PartialEq)]
enum PTPayload {
    Terminal,
    /// Numeric cut, pending value interpolation.
    Cut { rank_lo: u32, rank_hi: u32 },
    /// Factor split holding an offset into the tree's bit vector.
    Bits { bit_offset: usize },
}

/// Pre-tree node.
///
/// The payload decides terminality; `lh_del` records offspring linkage and
/// survives a merge, so samples retired below a merged split can still be
/// pooled into its leaf.
#[derive(Clone, Copy, Debug)]
struct PTNode {
    pred: u32,
    lh_del: u32,
    payload: PTPayload,
    info: f64,
}

impl PTNode {
    fn terminal() -> Self {
        Self {
            pred: 0,
            lh_del: 0,
            payload: PTPayload::Terminal,
            info: 0.0,
        }
    }

    #[inline]
    fn is_nonterminal(&self) -> bool {
        !matches!(self.payload, PTPayload::Terminal)
    }
}

/// Crescent tree for a single training pass.
pub struct PreTree {
    nodes: Vec<PTNode>,
    leaf_count: usize,
    /// Next free slot in the factor bit vector.
    bit_end: usize,
    split_bits: FixedBitSet,
    /// Terminal pre-tree node per sample index.
    term_st: Vec<u32>,
}

impl PreTree {
    /// Root-only tree. `height_est` pre-sizes the node vector.
    pub fn new(bag_count: usize, height_est: usize) -> Self {
        let mut nodes = Vec::with_capacity(height_est.max(1));
        nodes.push(PTNode::terminal());
        Self {
            nodes,
            leaf_count: 1,
            bit_end: 0,
            split_bits: FixedBitSet::new(),
            term_st: vec![0; bag_count],
        }
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Append two terminal offspring and mark `pt_id` nonterminal.
    fn offspring(&mut self, pt_id: usize) -> (u32, u32) {
        let lh = self.nodes.len() as u32;
        self.nodes.push(PTNode::terminal());
        self.nodes.push(PTNode::terminal());
        self.nodes[pt_id].lh_del = lh - pt_id as u32;
        self.leaf_count += 1; // two leaves gained, one lost
        (lh, lh + 1)
    }

    /// Record a numeric cut split.
    pub fn branch_cut(
        &mut self,
        pt_id: usize,
        pred: u32,
        rank_lo: u32,
        rank_hi: u32,
        info: f64,
    ) -> (u32, u32) {
        let ids = self.offspring(pt_id);
        let node = &mut self.nodes[pt_id];
        node.pred = pred;
        node.payload = PTPayload::Cut { rank_lo, rank_hi };
        node.info = info;
        ids
    }

    /// Record a factor split, reserving `cardinality` bits.
    pub fn branch_bits(&mut self, pt_id: usize, pred: u32, cardinality: u32, info: f64) -> (u32, u32) {
        let bit_offset = self.bit_end;
        self.bit_end += cardinality as usize;
        self.split_bits.grow(self.bit_end);

        let ids = self.offspring(pt_id);
        let node = &mut self.nodes[pt_id];
        node.pred = pred;
        node.payload = PTPayload::Bits { bit_offset };
        node.info = info;
        ids
    }

    /// Send a factor code left at the split owning `pt_id`.
    pub fn set_left_bit(&mut self, pt_id: usize, code: u32) {
        match self.nodes[pt_id].payload {
            PTPayload::Bits { bit_offset } => {
                self.split_bits.insert(bit_offset + code as usize);
            }
            _ => debug_assert!(false, "left bit on non-factor node"),
        }
    }

    /// Record the terminal node reached by a retired sample.
    #[inline]
    pub fn set_terminal(&mut self, sample_idx: u32, pt_id: usize) {
        self.term_st[sample_idx as usize] = pt_id as u32;
    }

    /// Merge lowest-information mergeable splits until at most `leaf_max`
    /// leaves remain. A split is mergeable iff both children are terminal.
    pub fn leaf_merge(&mut self, leaf_max: usize) {
        while self.leaf_count > leaf_max {
            let mut best: Option<(usize, f64)> = None;
            for (pt_id, node) in self.nodes.iter().enumerate() {
                if !node.is_nonterminal() {
                    continue;
                }
                let lh = pt_id + node.lh_del as usize;
                if self.nodes[lh].is_nonterminal() || self.nodes[lh + 1].is_nonterminal() {
                    continue;
                }
                match best {
                    Some((_, info)) if node.info >= info => {}
                    _ => best = Some((pt_id, node.info)),
                }
            }
            let Some((pt_id, _)) = best else { break };
            let node = &mut self.nodes[pt_id];
            node.payload = PTPayload::Terminal;
            node.info = 0.0;
            self.leaf_count -= 1;
        }
    }

    /// Finalize into a forest-ready bundle: re-pack reachable nodes,
    /// interpolate cut values, assign leaves and accumulate predictor info.
    pub fn consume(
        mut self,
        ranked: &RankedFrame,
        split_quant: &[f64],
        sample: &Sample,
        n_ctg: usize,
        leaf_max: usize,
        pred_info: &mut [f64],
    ) -> TreeBundle {
        if leaf_max > 0 {
            self.leaf_merge(leaf_max);
        }

        let mut nodes: Vec<TreeNode> = Vec::with_capacity(self.nodes.len());
        let mut leaf_map = vec![NO_LEAF; self.nodes.len()];
        let mut n_leaves = 0u32;
        nodes.push(TreeNode::leaf(0));
        self.emit(0, 0, ranked, split_quant, &mut nodes, &mut leaf_map, &mut n_leaves, pred_info);

        // Aggregate leaf statistics from retired samples.
        let mut leaves = vec![
            Leaf {
                score: 0.0,
                extent: 0,
                ctg_weight: vec![0.0; n_ctg],
            };
            n_leaves as usize
        ];
        let mut s_counts = vec![0u32; n_leaves as usize];
        let mut sums = vec![0.0f64; n_leaves as usize];
        for (s_idx, nux) in sample.nux.iter().enumerate() {
            let leaf_idx = leaf_map[self.term_st[s_idx] as usize] as usize;
            let leaf = &mut leaves[leaf_idx];
            leaf.extent += 1;
            s_counts[leaf_idx] += nux.s_count;
            sums[leaf_idx] += nux.y_sum;
            if n_ctg > 0 {
                leaf.ctg_weight[nux.ctg as usize] += nux.y_sum;
            }
        }
        for (leaf_idx, leaf) in leaves.iter_mut().enumerate() {
            if n_ctg == 0 {
                leaf.score = if s_counts[leaf_idx] > 0 {
                    sums[leaf_idx] / s_counts[leaf_idx] as f64
                } else {
                    0.0
                };
            } else {
                let total: f64 = leaf.ctg_weight.iter().sum();
                let mut arg_max = 0usize;
                for (ctg, &w) in leaf.ctg_weight.iter().enumerate() {
                    if w > leaf.ctg_weight[arg_max] {
                        arg_max = ctg;
                    }
                }
                leaf.score = arg_max as f64;
                if total > 0.0 {
                    for w in leaf.ctg_weight.iter_mut() {
                        *w /= total;
                    }
                }
            }
        }

        let mut fac_bits = self.split_bits;
        fac_bits.grow(self.bit_end);

        TreeBundle {
            nodes,
            fac_bits,
            leaves,
            bag_rows: sample.sample2row.clone(),
            samples: sample.records.clone(),
        }
    }

    /// Emit `pt_id` into `nodes[out_idx]`, recursing into children.
    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        pt_id: usize,
        out_idx: usize,
        ranked: &RankedFrame,
        split_quant: &[f64],
        nodes: &mut Vec<TreeNode>,
        leaf_map: &mut [u32],
        n_leaves: &mut u32,
        pred_info: &mut [f64],
    ) {
        let node = &self.nodes[pt_id];
        if !node.is_nonterminal() {
            let leaf_idx = *n_leaves;
            *n_leaves += 1;
            nodes[out_idx] = TreeNode::leaf(leaf_idx);
            self.map_subtree(pt_id, leaf_idx, leaf_map);
            return;
        }

        let split = match node.payload {
            PTPayload::Cut { rank_lo, rank_hi } => SplitValue::Cut {
                value: ranked.quant_rank(
                    node.pred as usize,
                    rank_lo,
                    rank_hi,
                    split_quant[node.pred as usize],
                ),
            },
            PTPayload::Bits { bit_offset } => SplitValue::Bits { offset: bit_offset },
            PTPayload::Terminal => unreachable!("nonterminal carries a split payload"),
        };
        pred_info[node.pred as usize] += node.info;

        let child_base = nodes.len();
        nodes.push(TreeNode::leaf(0));
        nodes.push(TreeNode::leaf(0));
        nodes[out_idx] = TreeNode {
            pred: node.pred,
            lh_del: (child_base - out_idx) as u32,
            split,
            info: node.info,
        };

        let lh = pt_id + node.lh_del as usize;
        self.emit(lh, child_base, ranked, split_quant, nodes, leaf_map, n_leaves, pred_info);
        self.emit(lh + 1, child_base + 1, ranked, split_quant, nodes, leaf_map, n_leaves, pred_info);
    }

    /// Map every pre-tree node of a terminal subtree to its leaf: samples
    /// retired below a merged split pool into the merged ancestor's leaf.
    fn map_subtree(&self, pt_id: usize, leaf_idx: u32, leaf_map: &mut [u32]) {
        leaf_map[pt_id] = leaf_idx;
        let lh_del = self.nodes[pt_id].lh_del;
        if lh_del != 0 {
            let lh = pt_id + lh_del as usize;
            self.map_subtree(lh, leaf_idx, leaf_map);
            self.map_subtree(lh + 1, leaf_idx, leaf_map);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::{NumBlock, RLEFrame};
    use crate::data::response::{Response, ResponseInput};
    use crate::training::sample::Sampler;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn fixture(y: &[f64]) -> (RankedFrame, Sample) {
        let n = y.len();
        let col: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let arr = ndarray::Array2::from_shape_vec((n, 1), col).unwrap();
        let frame = RLEFrame::new(n, NumBlock::Dense(arr.view()), None, vec![]).unwrap();
        let ranked = RankedFrame::new(&frame, 0.0).unwrap();
        let response = Response::from_input(ResponseInput::Reg { y }, n, 42).unwrap();
        let sampler = Sampler::new(n, n, false, None).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let sample = sampler.sample_tree(&response, n, &mut rng);
        (ranked, sample)
    }

    #[test]
    fn test_single_leaf_consume() {
        let (ranked, sample) = fixture(&[2.0, 4.0]);
        let mut tree = PreTree::new(2, 8);
        tree.set_terminal(0, 0);
        tree.set_terminal(1, 0);

        let mut pred_info = vec![0.0];
        let bundle = tree.consume(&ranked, &[0.5], &sample, 0, 0, &mut pred_info);

        assert_eq!(bundle.nodes.len(), 1);
        assert!(bundle.nodes[0].is_terminal());
        assert_eq!(bundle.leaves.len(), 1);
        assert_eq!(bundle.leaves[0].score, 3.0);
        assert_eq!(bundle.leaves[0].extent, 2);
        assert_eq!(pred_info[0], 0.0);
    }

    #[test]
    fn test_cut_split_interpolates() {
        let (ranked, sample) = fixture(&[1.0, 1.0, 10.0, 10.0]);
        let mut tree = PreTree::new(4, 8);
        let (lh, rh) = tree.branch_cut(0, 0, 1, 2, 5.0);
        tree.set_terminal(0, lh as usize);
        tree.set_terminal(1, lh as usize);
        tree.set_terminal(2, rh as usize);
        tree.set_terminal(3, rh as usize);

        let mut pred_info = vec![0.0];
        let bundle = tree.consume(&ranked, &[0.5], &sample, 0, 0, &mut pred_info);

        assert_eq!(bundle.nodes.len(), 3);
        let root = bundle.nodes[0];
        assert!(!root.is_terminal());
        // Predictor values are 0..4: midpoint of ranks 1 and 2 is 1.5.
        assert_eq!(root.split, SplitValue::Cut { value: 1.5 });
        assert_eq!(pred_info[0], 5.0);
        assert_eq!(bundle.leaves.len(), 2);
        assert_eq!(bundle.leaves[0].score, 1.0);
        assert_eq!(bundle.leaves[1].score, 10.0);
    }

    #[test]
    fn test_factor_bits_round_trip() {
        let (ranked, sample) = fixture(&[1.0, 2.0]);
        let mut tree = PreTree::new(2, 8);
        let (lh, rh) = tree.branch_bits(0, 0, 4, 1.0);
        tree.set_left_bit(0, 1);
        tree.set_left_bit(0, 3);
        tree.set_terminal(0, lh as usize);
        tree.set_terminal(1, rh as usize);

        let mut pred_info = vec![0.0];
        let bundle = tree.consume(&ranked, &[0.5], &sample, 0, 0, &mut pred_info);

        assert_eq!(bundle.fac_bits.len(), 4);
        assert!(!bundle.fac_bits.contains(0));
        assert!(bundle.fac_bits.contains(1));
        assert!(!bundle.fac_bits.contains(2));
        assert!(bundle.fac_bits.contains(3));
    }

    #[test]
    fn test_leaf_merge_collapses_lowest_info() {
        let (ranked, sample) = fixture(&[1.0, 2.0, 10.0, 20.0]);
        let mut tree = PreTree::new(4, 16);
        // Root splits with high info; the right child re-splits with low info.
        let (lh, rh) = tree.branch_cut(0, 0, 1, 2, 100.0);
        let (rlh, rrh) = tree.branch_cut(rh as usize, 0, 2, 3, 1.0);
        tree.set_terminal(0, lh as usize);
        tree.set_terminal(1, lh as usize);
        tree.set_terminal(2, rlh as usize);
        tree.set_terminal(3, rrh as usize);
        assert_eq!(tree.leaf_count(), 3);

        let mut pred_info = vec![0.0];
        let bundle = tree.consume(&ranked, &[0.5], &sample, 0, 2, &mut pred_info);

        // The low-info split merged away; its samples pool in one leaf.
        assert_eq!(bundle.leaves.len(), 2);
        assert_eq!(bundle.nodes.len(), 3);
        assert_eq!(bundle.leaves[1].extent, 2);
        assert_eq!(bundle.leaves[1].score, 15.0);
        // Only the surviving split contributes info.
        assert_eq!(pred_info[0], 100.0);
    }
}
