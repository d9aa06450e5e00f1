//! Error types for variant dimensions.

use thiserror::Error;

use reindex_types::TypesError;

/// Errors that can occur while registering or activating dimensions.
#[derive(Debug, Error)]
pub enum VariantError {
    /// A state vector named a dimension nobody registered
    #[error("Unknown dimension: {0}")]
    UnknownDimension(String),

    /// Two dimensions registered under the same identifier
    #[error("Dimension already registered: {0}")]
    DuplicateDimension(String),

    /// A dimension was asked to activate a value it does not understand
    #[error("Invalid value {value} for dimension {dimension}")]
    InvalidValue { dimension: String, value: String },

    /// Shared types error
    #[error("Types error: {0}")]
    Types(#[from] TypesError),
}
