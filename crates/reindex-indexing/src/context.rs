//! Registered indexes and the collaborators every component shares.

use std::collections::BTreeMap;
use std::sync::Arc;

use reindex_schema::{EntityStore, IndexDefinition};
use reindex_scheduler::CommitCoordinator;
use reindex_types::{EntityCatalog, SearchEngine};
use reindex_variants::VariantRegistry;

use crate::error::IndexingError;

/// An index definition with the engine that stores its documents.
#[derive(Clone)]
pub struct RegisteredIndex {
    pub definition: Arc<IndexDefinition>,
    pub engine: Arc<dyn SearchEngine>,
}

/// Every index known to the process, by name.
#[derive(Clone, Default)]
pub struct IndexRegistry {
    entries: BTreeMap<String, RegisteredIndex>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: IndexDefinition, engine: Arc<dyn SearchEngine>) {
        self.entries.insert(
            definition.name().to_string(),
            RegisteredIndex {
                definition: Arc::new(definition),
                engine,
            },
        );
    }

    pub fn with_index(mut self, definition: IndexDefinition, engine: Arc<dyn SearchEngine>) -> Self {
        self.register(definition, engine);
        self
    }

    pub fn get(&self, name: &str) -> Result<&RegisteredIndex, IndexingError> {
        self.entries
            .get(name)
            .ok_or_else(|| IndexingError::UnknownIndex(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RegisteredIndex)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared handles passed to capture, resolution, processing and
/// reindexing.
#[derive(Clone)]
pub struct IndexingContext {
    pub variants: Arc<VariantRegistry>,
    pub indexes: Arc<IndexRegistry>,
    pub store: Arc<dyn EntityStore>,
    pub commits: Arc<CommitCoordinator>,
}

impl IndexingContext {
    /// Bundle the collaborators and register every index engine with the
    /// commit coordinator.
    pub fn new(
        variants: Arc<VariantRegistry>,
        indexes: Arc<IndexRegistry>,
        store: Arc<dyn EntityStore>,
        commits: Arc<CommitCoordinator>,
    ) -> Self {
        for (name, entry) in indexes.iter() {
            commits.register_engine(name.clone(), entry.engine.clone());
        }
        Self {
            variants,
            indexes,
            store,
            commits,
        }
    }

    pub fn catalog(&self) -> &dyn EntityCatalog {
        self.variants.catalog().as_ref()
    }

    pub fn index(&self, name: &str) -> Result<&RegisteredIndex, IndexingError> {
        self.indexes.get(name)
    }
}
