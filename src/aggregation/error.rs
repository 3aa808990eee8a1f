//! Error types for plan compilation and payload merging

use crate::error::AppError;

/// Result type for aggregation operations
pub type AggregationResult<T> = std::result::Result<T, AggregationError>;

/// Errors raised while compiling field specs or merging items
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    /// Field specs cannot be compiled into a plan
    #[error("Invalid field spec: {0}")]
    InvalidFieldSpec(String),

    /// An item does not fit the plan it was delivered against
    #[error("Malformed item: {0}")]
    MalformedItem(String),
}

impl From<AggregationError> for AppError {
    fn from(err: AggregationError) -> Self {
        match err {
            AggregationError::InvalidFieldSpec(msg) => AppError::Validation(msg),
            AggregationError::MalformedItem(msg) => AppError::Processing(msg),
        }
    }
}
