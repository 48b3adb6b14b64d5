//! Trained forest representation.

pub mod forest;
pub mod node;

pub use forest::{Forest, Leaf, SampleRecord, TreeBundle};
pub use node::{SplitValue, TreeNode};
