//! Search error types.

use thiserror::Error;

use reindex_types::EngineError;

/// Errors that can occur during search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Tantivy index error
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    /// Query parse error
    #[error("Query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema mismatch
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Index is locked (another process has it open)
    #[error("Index is locked: {0}")]
    IndexLocked(String),

    /// Failure injected by a test double
    #[error("Injected failure: {0}")]
    Injected(String),
}

impl From<SearchError> for EngineError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::IndexLocked(_) | SearchError::Injected(_) => {
                EngineError::Unavailable(err.to_string())
            }
            SearchError::QueryParse(_) => EngineError::Rejected(err.to_string()),
            other => EngineError::Backend(other.to_string()),
        }
    }
}
