//! Error types for index definitions and the entity store.

use thiserror::Error;

use reindex_types::TypesError;
use reindex_variants::VariantError;

/// Errors raised while constructing an index definition.
///
/// All of these indicate a structurally wrong index and are returned at
/// construction time.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A field path resolved against none of the index's types
    #[error("Cannot resolve field '{path}' on any of [{types}]")]
    UnresolvableField { path: String, types: String },

    /// `add_type` called after a field was added
    #[error("Cannot add type {0} after fields have been defined")]
    TypesAfterFields(String),

    /// Type not present in the catalog
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// Index declares no types
    #[error("Index {0} covers no types")]
    NoTypes(String),

    /// Variant dimension error
    #[error("Variant error: {0}")]
    Variant(#[from] VariantError),

    /// Shared types error
    #[error("Types error: {0}")]
    Types(#[from] TypesError),
}

/// Errors reported by an entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Unknown relation {relation} on {type_name}")]
    UnknownRelation { type_name: String, relation: String },

    /// A derived accessor failed for one entity
    #[error("Accessor {type_name}.{accessor} failed: {message}")]
    Accessor {
        type_name: String,
        accessor: String,
        message: String,
    },

    /// Variant activation failed while querying
    #[error("Variant error: {0}")]
    Variant(#[from] VariantError),

    /// Storage backend failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchemaError::UnresolvableField {
            path: "Author.Nmae".to_string(),
            types: "Page".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot resolve field 'Author.Nmae' on any of [Page]"
        );

        let err = SchemaError::TypesAfterFields("File".to_string());
        assert_eq!(
            err.to_string(),
            "Cannot add type File after fields have been defined"
        );

        let err = StoreError::UnknownRelation {
            type_name: "Page".to_string(),
            relation: "Tags".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown relation Tags on Page");
    }

    #[test]
    fn test_from_variant_error() {
        let err: SchemaError = VariantError::UnknownDimension("locale".to_string()).into();
        assert!(matches!(err, SchemaError::Variant(_)));
    }
}
