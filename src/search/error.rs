//! Error types for result store operations

use crate::aggregation::AggregationError;
use crate::error::AppError;

/// Result type for search operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Errors that can occur while running or polling a search
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    /// Request cannot be served as given
    #[error("Invalid search request: {0}")]
    InvalidRequest(String),

    /// The underlying search failed
    #[error("Search execution failed: {0}")]
    SearchExecutionFailed(String),

    /// No result store is registered under the key, or it was torn down
    #[error("Unknown search key: {0}")]
    UnknownKey(String),

    /// The search process was stopped before it finished
    #[error("Search terminated")]
    Terminated,

    /// Plan compilation or merge failure
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidRequest(msg) => AppError::Validation(msg),
            SearchError::UnknownKey(key) => AppError::NotFound(format!("Result store {}", key)),
            SearchError::Aggregation(err) => err.into(),
            _ => AppError::Internal(err.to_string()),
        }
    }
}
