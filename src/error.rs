//! Error types for training.
//!
//! Configuration and data errors are fatal and surface as a [`TrainError`]
//! carrying one or more diagnostics. Degenerate runtime conditions (no
//! positive-info split, single-rank nodes, empty candidate sets) are not
//! errors; they terminate the affected node locally.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type TrainResult<T> = Result<T, TrainError>;

/// Fatal training errors.
#[derive(Debug, Error)]
pub enum TrainError {
    /// Invalid training configuration (bad parameter values).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed input data (shape mismatches, out-of-range codes).
    #[error("invalid data: {0}")]
    Data(String),

    /// Several validation failures, reported together.
    #[error("training aborted:\n{}", .0.join("\n"))]
    Diagnostics(Vec<String>),
}

/// Collects validation diagnostics before training begins.
///
/// All configuration complaints are gathered before aborting, so a caller
/// sees every problem at once rather than one per attempt.
#[derive(Debug, Default)]
pub struct Diagnostics {
    messages: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a complaint.
    pub fn push(&mut self, msg: impl Into<String>) {
        self.messages.push(msg.into());
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Convert into a result: `Ok` if nothing was recorded.
    pub fn into_result(self) -> TrainResult<()> {
        if self.messages.is_empty() {
            Ok(())
        } else if self.messages.len() == 1 {
            Err(TrainError::Config(self.messages.into_iter().next().unwrap()))
        } else {
            Err(TrainError::Diagnostics(self.messages))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_empty_is_ok() {
        assert!(Diagnostics::new().into_result().is_ok());
    }

    #[test]
    fn test_diagnostics_single_message() {
        let mut diag = Diagnostics::new();
        diag.push("nSamp must be positive");
        let err = diag.into_result().unwrap_err();
        assert!(matches!(err, TrainError::Config(_)));
        assert!(err.to_string().contains("nSamp"));
    }

    #[test]
    fn test_diagnostics_accumulates() {
        let mut diag = Diagnostics::new();
        diag.push("first");
        diag.push("second");
        let err = diag.into_result().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("first") && text.contains("second"));
    }

    #[test]
    fn test_error_kinds_render() {
        let config = TrainError::Config("minNode must be positive".into());
        assert!(config.to_string().starts_with("invalid configuration"));
        let data = TrainError::Data("response has 3 values".into());
        assert!(data.to_string().starts_with("invalid data"));
    }
}
