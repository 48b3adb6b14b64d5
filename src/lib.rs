//! canopy: a random-forest training engine.
//!
//! Trains ensembles of binary decision trees over mixed numeric/factor
//! observation frames, for continuous or categorical responses. The engine
//! is built around a dense, cache-conscious representation: per-predictor
//! pre-sorted rank runs computed once per training, double-buffered index
//! partitions restaged level by level, and run/cut accumulators that score
//! candidate splits in parallel.
//!
//! # Example
//!
//! ```
//! use canopy::data::{NumBlock, RLEFrame, ResponseInput};
//! use canopy::training::{train, TrainParams};
//!
//! let values = ndarray::arr2(&[[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]]);
//! let frame = RLEFrame::new(6, NumBlock::Dense(values.view()), None, vec![]).unwrap();
//!
//! let y = [1.0, 1.0, 1.0, 10.0, 10.0, 10.0];
//! let params = TrainParams {
//!     n_tree: 4,
//!     with_repl: false,
//!     ..TrainParams::default()
//! };
//! let trained = train(&frame, ResponseInput::Reg { y: &y }, &params).unwrap();
//! assert_eq!(trained.forest.n_tree(), 4);
//! ```

pub mod data;
pub mod error;
pub mod repr;
pub mod training;
pub mod utils;

pub use data::{ClassWeight, NumBlock, RLEFrame, RankedFrame, ResponseInput, RleBlock};
pub use error::{TrainError, TrainResult};
pub use repr::{Forest, Leaf, SampleRecord, SplitValue, TreeNode};
pub use training::{train, TrainParams, TrainedForest, Verbosity};
