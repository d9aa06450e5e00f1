//! # reindex-search
//!
//! Search engine clients for reindexed documents.
//!
//! ## Features
//! - Embedded Tantivy index with MmapDirectory for persistence
//! - One fixed schema for every index; declared fields fold into
//!   fulltext, filter and state tokens
//! - Scoped and ID-striped bulk deletes for full reindexing
//! - In-memory engine with an operation log for tests

pub mod document;
pub mod error;
pub mod index;
pub mod memory_engine;
pub mod schema;
pub mod tantivy_engine;

pub use document::to_tantivy_doc;
pub use error::SearchError;
pub use index::{open_or_create_index, SearchIndex, SearchIndexConfig};
pub use memory_engine::{EngineOp, InMemorySearchEngine};
pub use schema::{build_document_schema, DocumentSchema};
pub use tantivy_engine::TantivySearchEngine;
