//! Error taxonomy for the analysis core.
//!
//! Orchestration layers (`io`, `train`, the binaries) wrap these in
//! `anyhow` with the subject / clip / epoch that was being processed.
use thiserror::Error;

/// Failures raised by the numeric core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// A window boundary TR is not present in the clip's table.
    #[error("clip {clip}: TR {tick} not found in activation table")]
    MissingIndex {
        /// Clip label being windowed.
        clip: String,
        /// The absent TR.
        tick: i64,
    },

    /// Window bounds with `stop <= start`.
    #[error("invalid window: start {start} must be below stop {stop}")]
    InvalidWindow { start: i64, stop: i64 },

    /// Operands of incompatible dimensions.
    #[error("shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        got: String,
    },

    /// Zero-variance column handed to the checked z-score.
    #[error("column {column} has zero variance")]
    DegenerateColumn { column: String },

    /// A scoring partition with no samples.
    #[error("empty group during scoring: {what}")]
    EmptyGroup { what: String },

    /// An input that must be non-empty was empty.
    #[error("empty input: {what}")]
    Empty { what: &'static str },

    /// Row label that is neither a class id nor a catalogued clip.
    #[error("label '{0}' is not a known clip or class id")]
    UnknownLabel(String),

    /// Condition mode string outside the known set.
    #[error("unknown mode '{0}'")]
    UnknownMode(String),
}

/// Result alias for the analysis core.
pub type Result<T> = std::result::Result<T, AnalysisError>;

impl AnalysisError {
    pub(crate) fn shape(context: &'static str, expected: impl ToString, got: impl ToString) -> Self {
        AnalysisError::ShapeMismatch {
            context,
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}
