//! Tantivy-backed [`SearchEngine`].
//!
//! The writer is shared behind a mutex. Adds and deletes are buffered by
//! Tantivy and become visible on `commit`, which also reloads the reader.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tantivy::collector::{Collector, Count, SegmentCollector, TopDocs};
use tantivy::columnar::Column;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{
    DocId, IndexReader, IndexWriter, Score, SegmentOrdinal, SegmentReader, TantivyDocument, Term,
};
use tracing::{debug, info};

use reindex_types::{
    DeleteQuery, EngineError, EntityId, FilterValue, IndexDocument, SearchEngine, SearchHit,
    SearchQuery, SearchResults, Stripe, VariantStateVector,
};

use crate::document::to_tantivy_doc;
use crate::error::SearchError;
use crate::index::{SearchIndex, SearchIndexConfig};
use crate::schema::{pair_token, DocumentSchema, ENTITY_ID};

/// Search engine client over one Tantivy index.
pub struct TantivySearchEngine {
    name: String,
    schema: DocumentSchema,
    writer: Arc<Mutex<IndexWriter>>,
    reader: IndexReader,
    query_parser: QueryParser,
}

impl TantivySearchEngine {
    pub fn open(name: impl Into<String>, config: SearchIndexConfig) -> Result<Self, SearchError> {
        let index = SearchIndex::open_or_create(config)?;
        Self::from_index(name, &index)
    }

    pub fn from_index(name: impl Into<String>, index: &SearchIndex) -> Result<Self, SearchError> {
        let schema = index.schema().clone();
        let writer = index.writer()?;
        let reader = index.reader()?;
        let query_parser = QueryParser::for_index(index.index(), vec![schema.text]);

        Ok(Self {
            name: name.into(),
            schema,
            writer: Arc::new(Mutex::new(writer)),
            reader,
            query_parser,
        })
    }

    /// Committed document count.
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, IndexWriter>, SearchError> {
        self.writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))
    }

    fn term(field: Field, text: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_text(field, text),
            IndexRecordOption::Basic,
        ))
    }

    fn lacks(field: Field, text: &str) -> Box<dyn Query> {
        Box::new(BooleanQuery::new(vec![
            (Occur::Must, Box::new(AllQuery) as Box<dyn Query>),
            (Occur::MustNot, Self::term(field, text)),
        ]))
    }

    /// Every dimension of `state` equals the document's value or is absent.
    fn state_query(&self, state: &VariantStateVector) -> Box<dyn Query> {
        if state.is_empty() {
            return Box::new(AllQuery);
        }
        let clauses = state
            .iter()
            .map(|(dimension, value)| {
                let either: Box<dyn Query> = Box::new(BooleanQuery::new(vec![
                    (
                        Occur::Should,
                        Self::term(self.schema.state, &pair_token(dimension, &value.as_text())),
                    ),
                    (Occur::Should, Self::lacks(self.schema.state_dims, dimension)),
                ]));
                (Occur::Must, either)
            })
            .collect();
        Box::new(BooleanQuery::new(clauses))
    }

    fn filter_query(&self, field: &str, values: &[FilterValue]) -> Box<dyn Query> {
        let clauses = values
            .iter()
            .map(|value| {
                let q = match value {
                    FilterValue::Value(v) => Self::term(self.schema.filter, &pair_token(field, v)),
                    FilterValue::Missing => Self::lacks(self.schema.filter_fields, field),
                };
                (Occur::Should, q)
            })
            .collect();
        Box::new(BooleanQuery::new(clauses))
    }

    fn any_class(&self, classes: &[String]) -> Box<dyn Query> {
        Box::new(BooleanQuery::new(
            classes
                .iter()
                .map(|c| (Occur::Should, Self::term(self.schema.class_hierarchy, c)))
                .collect(),
        ))
    }

    fn build_search_query(&self, query: &SearchQuery) -> Result<Box<dyn Query>, SearchError> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, Box::new(AllQuery))];

        for term in query.terms.iter().filter(|t| !t.trim().is_empty()) {
            clauses.push((Occur::Must, self.query_parser.parse_query(term)?));
        }
        if !query.classes.is_empty() {
            clauses.push((Occur::Must, self.any_class(&query.classes)));
        }
        for (field, values) in &query.filters {
            clauses.push((Occur::Must, self.filter_query(field, values)));
        }
        for (field, values) in &query.excludes {
            clauses.push((Occur::MustNot, self.filter_query(field, values)));
        }

        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    fn build_delete_query(&self, query: &DeleteQuery) -> Box<dyn Query> {
        match query {
            DeleteQuery::NotAnyType(types) => {
                let mut clauses: Vec<(Occur, Box<dyn Query>)> =
                    vec![(Occur::Must, Box::new(AllQuery))];
                for t in types {
                    clauses.push((Occur::MustNot, Self::term(self.schema.class_hierarchy, t)));
                }
                Box::new(BooleanQuery::new(clauses))
            }
            DeleteQuery::Scoped { class, state, .. } => Box::new(BooleanQuery::new(vec![
                (Occur::Must, Self::term(self.schema.class_hierarchy, class)),
                (Occur::Must, self.state_query(state)),
            ])),
        }
    }

    fn delete_matching(&self, query: &DeleteQuery) -> Result<u64, SearchError> {
        let tantivy_query = self.build_delete_query(query);
        let searcher = self.reader.searcher();

        let stripe = match query {
            DeleteQuery::Scoped {
                stripe: Some(stripe),
                ..
            } => *stripe,
            _ => {
                let count = searcher.search(tantivy_query.as_ref(), &Count)? as u64;
                self.lock_writer()?.delete_query(tantivy_query)?;
                return Ok(count);
            }
        };

        // Stripes depend on the group count, so they cannot be indexed up
        // front. Match them on the entity id column while collecting.
        let ids = searcher.search(tantivy_query.as_ref(), &StripeCollector { stripe })?;
        if ids.is_empty() {
            return Ok(0);
        }
        let deleted = ids.values().sum();
        let any_id: Box<dyn Query> = Box::new(BooleanQuery::new(
            ids.keys()
                .map(|id| {
                    let q: Box<dyn Query> = Box::new(TermQuery::new(
                        Term::from_field_u64(self.schema.entity_id, *id),
                        IndexRecordOption::Basic,
                    ));
                    (Occur::Should, q)
                })
                .collect(),
        ));
        let scoped = BooleanQuery::new(vec![
            (Occur::Must, tantivy_query),
            (Occur::Must, any_id),
        ]);
        self.lock_writer()?.delete_query(Box::new(scoped))?;
        Ok(deleted)
    }

    fn run_search(
        &self,
        query: &SearchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<SearchResults, SearchError> {
        let tantivy_query = self.build_search_query(query)?;
        let searcher = self.reader.searcher();
        let collector = (TopDocs::with_limit(limit.max(1)).and_offset(offset), Count);
        let (top_docs, total) = searcher.search(tantivy_query.as_ref(), &collector)?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs.into_iter().take(limit) {
            let doc: TantivyDocument = searcher.doc(address)?;
            let text = |field: Field| {
                doc.get_first(field)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string()
            };
            hits.push(SearchHit {
                document_id: text(self.schema.doc_id),
                entity_id: doc
                    .get_first(self.schema.entity_id)
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
                root_type: text(self.schema.root_type),
                class_name: text(self.schema.class_name),
                score,
            });
        }

        debug!(index = %self.name, results = hits.len(), total, "Search complete");
        Ok(SearchResults {
            hits,
            total_found: total as u64,
        })
    }
}

impl SearchEngine for TantivySearchEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&self, doc: IndexDocument) -> Result<(), EngineError> {
        let tdoc = to_tantivy_doc(&self.schema, &doc);
        let writer = self.lock_writer()?;
        writer.delete_term(Term::from_field_text(self.schema.doc_id, &doc.id));
        writer.add_document(tdoc).map_err(SearchError::from)?;
        debug!(index = %self.name, doc_id = %doc.id, "Indexed document");
        Ok(())
    }

    fn delete(&self, document_id: &str) -> Result<(), EngineError> {
        let writer = self.lock_writer()?;
        writer.delete_term(Term::from_field_text(self.schema.doc_id, document_id));
        debug!(index = %self.name, doc_id = document_id, "Deleted document");
        Ok(())
    }

    fn delete_by_query(&self, query: &DeleteQuery) -> Result<u64, EngineError> {
        let deleted = self.delete_matching(query)?;
        debug!(index = %self.name, ?query, deleted, "Deleted by query");
        Ok(deleted)
    }

    fn commit(&self) -> Result<(), EngineError> {
        let opstamp = self.lock_writer()?.commit().map_err(SearchError::from)?;
        self.reader.reload().map_err(SearchError::from)?;
        info!(index = %self.name, opstamp, "Committed index changes");
        Ok(())
    }

    fn search(
        &self,
        query: &SearchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<SearchResults, EngineError> {
        Ok(self.run_search(query, offset, limit)?)
    }
}

/// Collects entity ids inside one stripe, with their document counts.
struct StripeCollector {
    stripe: Stripe,
}

struct StripeSegmentCollector {
    stripe: Stripe,
    entity_ids: Column<u64>,
    found: BTreeMap<EntityId, u64>,
}

impl Collector for StripeCollector {
    type Fruit = BTreeMap<EntityId, u64>;
    type Child = StripeSegmentCollector;

    fn for_segment(
        &self,
        _segment_local_id: SegmentOrdinal,
        segment: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        Ok(StripeSegmentCollector {
            stripe: self.stripe,
            entity_ids: segment.fast_fields().u64(ENTITY_ID)?,
            found: BTreeMap::new(),
        })
    }

    fn requires_scoring(&self) -> bool {
        false
    }

    fn merge_fruits(
        &self,
        segment_fruits: Vec<BTreeMap<EntityId, u64>>,
    ) -> tantivy::Result<Self::Fruit> {
        let mut merged = BTreeMap::new();
        for fruit in segment_fruits {
            for (id, count) in fruit {
                *merged.entry(id).or_insert(0) += count;
            }
        }
        Ok(merged)
    }
}

impl SegmentCollector for StripeSegmentCollector {
    type Fruit = BTreeMap<EntityId, u64>;

    fn collect(&mut self, doc: DocId, _score: Score) {
        if let Some(id) = self.entity_ids.first(doc) {
            if self.stripe.contains(id) {
                *self.found.entry(id).or_insert(0) += 1;
            }
        }
    }

    fn harvest(self) -> Self::Fruit {
        self.found
    }
}
