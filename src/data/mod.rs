//! Observation frame, response, and the pre-sorted rank layout.

pub mod frame;
pub mod ranked;
pub mod response;

pub use frame::{NumBlock, RLEFrame, RleBlock};
pub use ranked::{RankedFrame, RankedRun, NO_RANK};
pub use response::{ClassWeight, Response, ResponseInput};
