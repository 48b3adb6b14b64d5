//! Trained forest: concatenated per-tree blocks with origin offsets.

use fixedbitset::FixedBitSet;
use serde::{Deserialize, Serialize};

use crate::repr::node::TreeNode;

/// Leaf summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Leaf {
    /// Mean response (regression) or plurality category (classification).
    pub score: f64,
    /// Sampled indices reaching the leaf.
    pub extent: u32,
    /// Classification: normalized per-category sample weight; empty for
    /// regression.
    pub ctg_weight: Vec<f64>,
}

/// Compressed in-bag record: row delta from the previous in-bag row, sample
/// multiplicity, and (regression) the response rank of the row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub del_row: u32,
    pub s_count: u32,
    pub rank: u32,
}

/// Per-tree payload handed to the forest at chunk commit.
pub struct TreeBundle {
    pub nodes: Vec<TreeNode>,
    /// Factor-split bit vector; each factor split occupies `cardinality`
    /// consecutive bits.
    pub fac_bits: FixedBitSet,
    pub leaves: Vec<Leaf>,
    /// In-bag rows, ascending.
    pub bag_rows: Vec<u32>,
    pub samples: Vec<SampleRecord>,
}

/// Concatenation of per-tree node and factor-split blocks, plus per-tree
/// origin offsets, leaf summaries and bagged-row records.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Forest {
    n_row: usize,
    nodes: Vec<TreeNode>,
    origins: Vec<usize>,
    #[serde(with = "bitset_serde")]
    fac_bits: FixedBitSet,
    fac_origins: Vec<usize>,
    leaves: Vec<Leaf>,
    leaf_origins: Vec<usize>,
    /// Bagged-row bit matrix, one `n_row` stripe per tree.
    #[serde(with = "bitset_serde")]
    bag_bits: FixedBitSet,
    samples: Vec<SampleRecord>,
    sample_origins: Vec<usize>,
}

impl Forest {
    pub fn new(n_row: usize) -> Self {
        Self {
            n_row,
            ..Default::default()
        }
    }

    #[inline]
    pub fn n_tree(&self) -> usize {
        self.origins.len()
    }

    /// Append one finalized tree. Trees commit in index order at chunk
    /// boundaries, which keeps the layout deterministic.
    pub fn append_tree(&mut self, bundle: TreeBundle) {
        self.origins.push(self.nodes.len());
        self.nodes.extend(bundle.nodes);

        self.fac_origins.push(self.fac_bits.len());
        self.fac_bits.grow(self.fac_bits.len() + bundle.fac_bits.len());
        let base = *self.fac_origins.last().unwrap();
        for bit in bundle.fac_bits.ones() {
            self.fac_bits.insert(base + bit);
        }

        self.leaf_origins.push(self.leaves.len());
        self.leaves.extend(bundle.leaves);

        let bag_base = self.bag_bits.len();
        self.bag_bits.grow(bag_base + self.n_row);
        for &row in &bundle.bag_rows {
            self.bag_bits.insert(bag_base + row as usize);
        }

        self.sample_origins.push(self.samples.len());
        self.samples.extend(bundle.samples);
    }

    /// Node block of one tree.
    pub fn tree_nodes(&self, t_idx: usize) -> &[TreeNode] {
        let lo = self.origins[t_idx];
        let hi = if t_idx + 1 < self.n_tree() {
            self.origins[t_idx + 1]
        } else {
            self.nodes.len()
        };
        &self.nodes[lo..hi]
    }

    /// Leaf block of one tree.
    pub fn tree_leaves(&self, t_idx: usize) -> &[Leaf] {
        let lo = self.leaf_origins[t_idx];
        let hi = if t_idx + 1 < self.n_tree() {
            self.leaf_origins[t_idx + 1]
        } else {
            self.leaves.len()
        };
        &self.leaves[lo..hi]
    }

    /// Factor-split bit within a tree: set iff `code` branches left at the
    /// split owning `offset`.
    #[inline]
    pub fn fac_bit(&self, t_idx: usize, offset: usize, code: u32) -> bool {
        self.fac_bits
            .contains(self.fac_origins[t_idx] + offset + code as usize)
    }

    /// Width of a tree's factor bit vector.
    pub fn fac_width(&self, t_idx: usize) -> usize {
        let lo = self.fac_origins[t_idx];
        let hi = if t_idx + 1 < self.n_tree() {
            self.fac_origins[t_idx + 1]
        } else {
            self.fac_bits.len()
        };
        hi - lo
    }

    /// Whether `row` was in-bag for tree `t_idx`.
    #[inline]
    pub fn in_bag(&self, t_idx: usize, row: usize) -> bool {
        self.bag_bits.contains(t_idx * self.n_row + row)
    }

    /// Compressed sample records of one tree.
    pub fn tree_samples(&self, t_idx: usize) -> &[SampleRecord] {
        let lo = self.sample_origins[t_idx];
        let hi = if t_idx + 1 < self.n_tree() {
            self.sample_origins[t_idx + 1]
        } else {
            self.samples.len()
        };
        &self.samples[lo..hi]
    }
}

/// Bit-block serialization for [`FixedBitSet`].
mod bitset_serde {
    use fixedbitset::FixedBitSet;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bits: &FixedBitSet, ser: S) -> Result<S::Ok, S::Error> {
        let ones: Vec<usize> = bits.ones().collect();
        (bits.len(), ones).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<FixedBitSet, D::Error> {
        let (len, ones): (usize, Vec<usize>) = Deserialize::deserialize(de)?;
        let mut bits = FixedBitSet::with_capacity(len);
        for idx in ones {
            if idx < len {
                bits.insert(idx);
            }
        }
        Ok(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::node::SplitValue;

    fn tiny_bundle(score: f64, bag_row: u32) -> TreeBundle {
        TreeBundle {
            nodes: vec![TreeNode::leaf(0)],
            fac_bits: FixedBitSet::with_capacity(0),
            leaves: vec![Leaf {
                score,
                extent: 1,
                ctg_weight: vec![],
            }],
            bag_rows: vec![bag_row],
            samples: vec![SampleRecord {
                del_row: bag_row,
                s_count: 1,
                rank: 0,
            }],
        }
    }

    #[test]
    fn test_append_and_origins() {
        let mut forest = Forest::new(4);
        forest.append_tree(tiny_bundle(1.0, 0));
        forest.append_tree(tiny_bundle(2.0, 3));

        assert_eq!(forest.n_tree(), 2);
        assert_eq!(forest.tree_nodes(0).len(), 1);
        assert_eq!(forest.tree_leaves(1)[0].score, 2.0);
        assert!(forest.in_bag(0, 0));
        assert!(!forest.in_bag(0, 3));
        assert!(forest.in_bag(1, 3));
        assert_eq!(forest.tree_samples(1)[0].del_row, 3);
    }

    #[test]
    fn test_fac_bits_concatenate() {
        let mut forest = Forest::new(2);
        let mut bits = FixedBitSet::with_capacity(3);
        bits.insert(1);
        let mut bundle = tiny_bundle(0.0, 0);
        bundle.fac_bits = bits;
        bundle.nodes = vec![TreeNode {
            pred: 0,
            lh_del: 0,
            split: SplitValue::Bits { offset: 0 },
            info: 0.0,
        }];
        forest.append_tree(bundle);
        forest.append_tree(tiny_bundle(0.0, 1));

        assert_eq!(forest.fac_width(0), 3);
        assert_eq!(forest.fac_width(1), 0);
        assert!(!forest.fac_bit(0, 0, 0));
        assert!(forest.fac_bit(0, 0, 1));
        assert!(!forest.fac_bit(0, 0, 2));
    }

}
