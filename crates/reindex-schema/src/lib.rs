//! # reindex-schema
//!
//! Index declarations and the entity store they are evaluated against.
//!
//! ## Key Components
//!
//! - [`FieldPathResolver`]: compiles dotted field paths into lookup chains
//! - [`IndexDefinition`]: covered types, resolved fields, dependency list
//!   and derived-field groups, all computed at build time
//! - [`EntityStore`]: the persisted-entity collaborator
//! - [`InMemoryEntityStore`]: in-process store for fixtures and tests
//! - Document extraction along lookup chains

pub mod definition;
pub mod error;
pub mod extract;
pub mod field;
pub mod lookup;
pub mod memory_store;
pub mod resolver;
pub mod store;

pub use definition::{add_unique_by_ancestor, FieldMap, IndexDefinition, IndexDefinitionBuilder};
pub use error::{SchemaError, StoreError};
pub use extract::field_values;
pub use field::{DerivedFieldGroup, FieldSpec};
pub use lookup::{derivation_chain, LookupStep};
pub use memory_store::{AccessorFn, InMemoryEntityStore};
pub use resolver::{FieldPathResolver, TypeOptions};
pub use store::{Entity, EntityStore};
