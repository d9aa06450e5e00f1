//! Search engine collaborator interface.
//!
//! The engine stores [`IndexDocument`]s under their document id and makes
//! them visible on `commit`. Query structures here describe *what* to match;
//! translating them into an engine's wire syntax is the engine's concern.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::IndexDocument;
use crate::error::EngineError;
use crate::variant::VariantStateVector;
use crate::EntityId;

/// An id stripe: entities with `id % group_count == group_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stripe {
    pub group_count: u64,
    pub group_index: u64,
}

impl Stripe {
    pub fn new(group_count: u64, group_index: u64) -> Self {
        Self {
            group_count,
            group_index,
        }
    }

    pub fn contains(&self, entity_id: EntityId) -> bool {
        self.group_count > 0 && entity_id % self.group_count == self.group_index
    }
}

/// Bulk delete expressions used by full reindexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteQuery {
    /// Documents whose class hierarchy contains none of these types.
    NotAnyType(Vec<String>),
    /// Documents of `class` (hierarchy match) in `state`, optionally one stripe.
    ///
    /// A document matches the state when, for every dimension in `state`,
    /// the document either has the same value or lacks the dimension.
    Scoped {
        class: String,
        state: VariantStateVector,
        stripe: Option<Stripe>,
    },
}

impl DeleteQuery {
    /// Reference matching semantics; engines must agree with this.
    pub fn matches(&self, doc: &IndexDocument) -> bool {
        match self {
            DeleteQuery::NotAnyType(types) => !types.iter().any(|t| doc.is_a(t)),
            DeleteQuery::Scoped {
                class,
                state,
                stripe,
            } => {
                doc.is_a(class)
                    && state
                        .iter()
                        .all(|(dim, value)| doc.state.get(dim).map_or(true, |v| v == value))
                    && stripe.map_or(true, |s| s.contains(doc.entity_id))
            }
        }
    }
}

/// One accepted value of a filter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FilterValue {
    Value(String),
    /// The document has no value for the field
    Missing,
}

impl FilterValue {
    pub fn value(v: impl Into<String>) -> Self {
        FilterValue::Value(v.into())
    }
}

/// Structured read query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Fulltext terms; every term must match
    pub terms: Vec<String>,
    /// Field -> accepted values (any of)
    pub filters: BTreeMap<String, Vec<FilterValue>>,
    /// Field -> rejected values
    pub excludes: BTreeMap<String, Vec<FilterValue>>,
    /// Restrict to documents of these types (hierarchy match, any of)
    pub classes: Vec<String>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.terms.push(term.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    /// Add (or replace) a filter on `field`.
    pub fn filter(&mut self, field: impl Into<String>, values: Vec<FilterValue>) {
        self.filters.insert(field.into(), values);
    }

    pub fn exclude(&mut self, field: impl Into<String>, values: Vec<FilterValue>) {
        self.excludes.insert(field.into(), values);
    }

    pub fn is_filtered(&self) -> bool {
        !self.filters.is_empty() || !self.excludes.is_empty()
    }

    /// Reference filter semantics; engines must agree with this.
    pub fn matches_filters(&self, doc: &IndexDocument) -> bool {
        let accepts = |field: &str, values: &[FilterValue]| {
            let present: Vec<String> = doc
                .fields
                .get(field)
                .map(|f| f.values.iter().map(|v| v.as_text()).collect())
                .unwrap_or_default();
            values.iter().any(|wanted| match wanted {
                FilterValue::Missing => present.is_empty(),
                FilterValue::Value(v) => present.iter().any(|p| p == v),
            })
        };

        let classes_ok = self.classes.is_empty() || self.classes.iter().any(|c| doc.is_a(c));
        classes_ok
            && self.filters.iter().all(|(f, v)| accepts(f, v))
            && !self.excludes.iter().any(|(f, v)| accepts(f, v))
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: String,
    pub entity_id: EntityId,
    pub root_type: String,
    pub class_name: String,
    pub score: f32,
}

/// A page of search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    /// Total matches, ignoring offset/limit
    pub total_found: u64,
}

/// Client for one external search index.
///
/// Adds and deletes are buffered until [`commit`](Self::commit). Every
/// method takes `&self`; implementations handle their own synchronisation.
pub trait SearchEngine: Send + Sync {
    /// Name of the index this engine serves (for logging).
    fn name(&self) -> &str;

    /// Add or replace a document (keyed by `doc.id`).
    fn add(&self, doc: IndexDocument) -> Result<(), EngineError>;

    /// Delete one document by id.
    fn delete(&self, document_id: &str) -> Result<(), EngineError>;

    /// Delete every document matching `query`; returns how many matched.
    fn delete_by_query(&self, query: &DeleteQuery) -> Result<u64, EngineError>;

    /// Make buffered changes visible and durable.
    fn commit(&self) -> Result<(), EngineError>;

    fn search(
        &self,
        query: &SearchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<SearchResults, EngineError>;
}
