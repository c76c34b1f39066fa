use thiserror::Error;

/// Errors returned by the estimators in this crate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Input dataset or table is empty.
    #[error("empty input")]
    EmptyInput,

    /// Vectors that must share a length do not.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected length.
        expected: usize,
        /// Length actually supplied.
        found: usize,
    },

    /// A configuration value violates a precondition.
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Human-readable explanation.
        message: String,
    },

    /// A choice task does not have exactly one chosen alternative.
    #[error("task (respondent {respondent}, task {task}) has {chosen} chosen alternatives, expected 1")]
    InvalidChoiceTask {
        respondent: u32,
        task: u32,
        chosen: usize,
    },

    /// A choice task has a different number of alternatives than the others.
    #[error("task (respondent {respondent}, task {task}) has {found} alternatives, expected {expected}")]
    UnequalAlternatives {
        respondent: u32,
        task: u32,
        expected: usize,
        found: usize,
    },

    /// A raw chosen flag was neither 0 nor 1.
    #[error("chosen flag must be 0 or 1, got {value}")]
    InvalidChoiceFlag { value: u8 },

    /// A categorical value is not one of the coder's levels.
    #[error("unknown level {level:?} in column {column}")]
    UnknownLevel { column: &'static str, level: String },

    /// A fit finished without a usable optimum or curvature estimate.
    #[error("fitting failure: {0}")]
    FittingFailure(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidParameter`].
    pub fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            message: message.into(),
        }
    }
}

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;
