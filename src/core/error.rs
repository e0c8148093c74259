use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("invalid horizon: {0}")]
    InvalidHorizon(String),

    #[error("length mismatch: expected {expected} periods, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("cannot summarize an empty set of runs")]
    EmptyResultSet,

    #[error("invalid tax bracket table: {0}")]
    InvalidTaxTable(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("value out of range: {0}")]
    OutOfRange(String),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

pub type ProjectionResult<T> = Result<T, ProjectionError>;
