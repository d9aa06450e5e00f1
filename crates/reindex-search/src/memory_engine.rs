//! In-memory [`SearchEngine`] used by tests and dry runs.
//!
//! Keeps a working set that adds and deletes modify immediately and a
//! visible set that `commit` replaces with a copy of the working set.
//! Every call is logged so tests can assert on the exact operations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use tracing::debug;

use reindex_types::{
    DeleteQuery, EngineError, IndexDocument, SearchEngine, SearchHit, SearchQuery, SearchResults,
};

use crate::error::SearchError;

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOp {
    Add(String),
    Delete(String),
    DeleteByQuery(DeleteQuery),
    Commit,
}

pub struct InMemorySearchEngine {
    name: String,
    working: RwLock<BTreeMap<String, IndexDocument>>,
    visible: RwLock<BTreeMap<String, IndexDocument>>,
    ops: Mutex<Vec<EngineOp>>,
    commits: AtomicU64,
    fail_adds: AtomicBool,
    fail_commits: AtomicBool,
}

impl InMemorySearchEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            working: RwLock::new(BTreeMap::new()),
            visible: RwLock::new(BTreeMap::new()),
            ops: Mutex::new(Vec::new()),
            commits: AtomicU64::new(0),
            fail_adds: AtomicBool::new(false),
            fail_commits: AtomicBool::new(false),
        }
    }

    pub fn set_fail_adds(&self, fail: bool) {
        self.fail_adds.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Successful commits so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn operations(&self) -> Vec<EngineOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn added_ids(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                EngineOp::Add(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                EngineOp::Delete(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn clear_operations(&self) {
        self.ops.lock().unwrap().clear();
    }

    /// Committed document by id.
    pub fn document(&self, document_id: &str) -> Option<IndexDocument> {
        self.visible.read().unwrap().get(document_id).cloned()
    }

    /// Committed document ids in order.
    pub fn document_ids(&self) -> Vec<String> {
        self.visible.read().unwrap().keys().cloned().collect()
    }

    /// Uncommitted view, including pending changes.
    pub fn working_ids(&self) -> Vec<String> {
        self.working.read().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.visible.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, op: EngineOp) {
        self.ops.lock().unwrap().push(op);
    }

    fn matches_terms(query: &SearchQuery, doc: &IndexDocument) -> bool {
        let text = doc.fulltext().to_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        query
            .terms
            .iter()
            .all(|term| words.contains(&term.to_lowercase().as_str()))
    }
}

impl SearchEngine for InMemorySearchEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&self, doc: IndexDocument) -> Result<(), EngineError> {
        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(SearchError::Injected(format!("add {}", doc.id)).into());
        }
        self.record(EngineOp::Add(doc.id.clone()));
        debug!(index = %self.name, doc_id = %doc.id, "Indexed document");
        self.working.write().unwrap().insert(doc.id.clone(), doc);
        Ok(())
    }

    fn delete(&self, document_id: &str) -> Result<(), EngineError> {
        self.record(EngineOp::Delete(document_id.to_string()));
        self.working.write().unwrap().remove(document_id);
        Ok(())
    }

    fn delete_by_query(&self, query: &DeleteQuery) -> Result<u64, EngineError> {
        self.record(EngineOp::DeleteByQuery(query.clone()));
        let mut working = self.working.write().unwrap();
        let before = working.len();
        working.retain(|_, doc| !query.matches(doc));
        Ok((before - working.len()) as u64)
    }

    fn commit(&self) -> Result<(), EngineError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(SearchError::Injected(format!("commit {}", self.name)).into());
        }
        self.record(EngineOp::Commit);
        let snapshot = self.working.read().unwrap().clone();
        *self.visible.write().unwrap() = snapshot;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn search(
        &self,
        query: &SearchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<SearchResults, EngineError> {
        let visible = self.visible.read().unwrap();
        let matching: Vec<&IndexDocument> = visible
            .values()
            .filter(|doc| query.matches_filters(doc) && Self::matches_terms(query, doc))
            .collect();

        Ok(SearchResults {
            total_found: matching.len() as u64,
            hits: matching
                .into_iter()
                .skip(offset)
                .take(limit)
                .map(|doc| SearchHit {
                    document_id: doc.id.clone(),
                    entity_id: doc.entity_id,
                    root_type: doc.root_type.clone(),
                    class_name: doc.class_name.clone(),
                    score: 1.0,
                })
                .collect(),
        })
    }
}
