//! # reindex-types
//!
//! Shared domain types for keeping search indexes consistent with a
//! mutable entity store across variant states.
//!
//! This crate defines the data that flows between the other crates:
//! - Variant state vectors: one value per state dimension
//! - Write descriptors: one logical entity write folded from table deltas
//! - Dirty sets: deduplicated (index, root type, id, state) work items
//! - Index documents and their stable identity
//! - The entity catalog (type hierarchy + relation metadata)
//! - The search engine collaborator trait
//! - Settings: layered configuration

pub mod catalog;
pub mod config;
pub mod dirty;
pub mod document;
pub mod engine;
pub mod error;
pub mod variant;
pub mod write;

pub use catalog::{
    EntityCatalog, FieldDef, JoinTable, RelationDef, RelationKind, SchemaCatalog, TypeDef,
    ValueType,
};
pub use config::{
    CommitSettings, ProcessorPolicy, ProcessorSettings, ReindexHandlerKind, ReindexSettings,
    Settings,
};
pub use dirty::{DirtyGroup, DirtySet, DirtyTuple};
pub use document::{document_id, DocumentField, FieldRole, FieldValue, IndexDocument};
pub use engine::{
    DeleteQuery, FilterValue, SearchEngine, SearchHit, SearchQuery, SearchResults, Stripe,
};
pub use error::{EngineError, TypesError};
pub use variant::{StateValue, VariantStateVector};
pub use write::{field_key, Mutation, TableDelta, WriteCommand, WriteDescriptor};

/// Primary key of a persisted entity.
///
/// Numeric so that full reindexing can stripe by `id % group_count`.
pub type EntityId = u64;
