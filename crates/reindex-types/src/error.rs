//! Error types shared across the reindex workspace.

use thiserror::Error;

/// Errors raised while building or validating shared domain types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A type name that the catalog does not know
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// Broken parent links or cycles in the type hierarchy
    #[error("Invalid type hierarchy: {0}")]
    InvalidHierarchy(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Errors reported by a search engine client.
///
/// These are treated as transient by every caller: the affected document,
/// batch, group or commit is logged and left to be retried.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be reached or timed out
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    /// The engine refused the request
    #[error("Engine rejected request: {0}")]
    Rejected(String),

    /// Any other backend failure
    #[error("Engine backend error: {0}")]
    Backend(String),
}
