//! Error types for change propagation and reindexing.

use reindex_schema::{SchemaError, StoreError};
use reindex_scheduler::SchedulerError;
use reindex_types::EngineError;
use reindex_variants::VariantError;
use thiserror::Error;

/// Errors that can occur while propagating changes or reindexing
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Index definition problem
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Entity store operation failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Variant state could not be activated
    #[error("Variant error: {0}")]
    Variant(#[from] VariantError),

    /// Job queue or commit coordination failed
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Search engine call failed
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// No index registered under this name
    #[error("Unknown index: {0}")]
    UnknownIndex(String),

    /// Queued processing requested without a job queue
    #[error("No job queue configured")]
    NoQueue,

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for IndexingError {
    fn from(err: serde_json::Error) -> Self {
        IndexingError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexingError::UnknownIndex("Main".to_string());
        assert_eq!(err.to_string(), "Unknown index: Main");

        let err: IndexingError = EngineError::Unavailable("timeout".into()).into();
        assert_eq!(err.to_string(), "Engine error: Engine unavailable: timeout");
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let indexing_err: IndexingError = json_err.into();
        assert!(matches!(indexing_err, IndexingError::Serialization(_)));
    }
}
