//! Tantivy index management.
//!
//! Handles index creation, opening, and lifecycle.

use std::path::{Path, PathBuf};

use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::{debug, info};

use crate::error::SearchError;
use crate::schema::{build_document_schema, DocumentSchema};

/// Default memory budget for IndexWriter (50MB)
const DEFAULT_WRITER_MEMORY_MB: usize = 50;

/// Search index configuration
#[derive(Debug, Clone)]
pub struct SearchIndexConfig {
    /// Path to index directory; `None` keeps the index in RAM
    pub index_path: Option<PathBuf>,
    /// Memory budget for writer in MB
    pub writer_memory_mb: usize,
}

impl Default for SearchIndexConfig {
    fn default() -> Self {
        Self {
            index_path: None,
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }
}

impl SearchIndexConfig {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: Some(index_path.into()),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }

    pub fn in_ram() -> Self {
        Self::default()
    }

    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }

    /// Config for one named index below `root`.
    pub fn for_index(root: &Path, index_name: &str) -> Self {
        Self::new(root.join(index_name))
    }
}

/// Wrapper for Tantivy index with schema access.
pub struct SearchIndex {
    index: Index,
    schema: DocumentSchema,
    config: SearchIndexConfig,
}

impl SearchIndex {
    /// Open existing index or create new one.
    pub fn open_or_create(config: SearchIndexConfig) -> Result<Self, SearchError> {
        let index = match &config.index_path {
            Some(path) => open_or_create_index(path)?,
            None => Index::create_in_ram(build_document_schema().schema().clone()),
        };
        let schema = DocumentSchema::from_schema(index.schema())?;
        info!(path = ?config.index_path, "Opened search index");

        Ok(Self {
            index,
            schema,
            config,
        })
    }

    pub fn schema(&self) -> &DocumentSchema {
        &self.schema
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Create an IndexWriter with configured memory budget
    pub fn writer(&self) -> Result<IndexWriter, SearchError> {
        let memory_budget = self.config.writer_memory_mb * 1024 * 1024;
        let writer = self.index.writer(memory_budget)?;
        debug!(
            memory_mb = self.config.writer_memory_mb,
            "Created index writer"
        );
        Ok(writer)
    }

    /// Create an IndexReader with OnCommit reload policy
    pub fn reader(&self) -> Result<IndexReader, SearchError> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        debug!("Created index reader");
        Ok(reader)
    }

    pub fn path(&self) -> Option<&Path> {
        self.config.index_path.as_deref()
    }

    /// Check if a persistent index exists at the configured path
    pub fn exists(&self) -> bool {
        self.config
            .index_path
            .as_ref()
            .map(|p| p.join("meta.json").exists())
            .unwrap_or(false)
    }
}

/// Open an existing index or create a new one.
///
/// Uses MmapDirectory for persistence.
pub fn open_or_create_index(path: &Path) -> Result<Index, SearchError> {
    if path.join("meta.json").exists() {
        debug!(path = ?path, "Opening existing index");
        let index = Index::open_in_dir(path)?;
        Ok(index)
    } else {
        info!(path = ?path, "Creating new index");
        std::fs::create_dir_all(path)?;
        let schema = build_document_schema();
        let index = Index::create_in_dir(path, schema.schema().clone())?;
        Ok(index)
    }
}
