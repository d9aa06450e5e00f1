//! End-to-end test infrastructure for reindex.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering the write-to-index pipeline: change capture, dirty
//! resolution, batch processing, commits and full reindexing.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use reindex_indexing::{
    ChangeCapture, DirtyResolver, IndexRegistry, IndexingContext, ReindexOrchestrator,
    SearchUpdater,
};
use reindex_schema::{Entity, IndexDefinition, InMemoryEntityStore, TypeOptions};
use reindex_scheduler::{CommitCoordinator, CooldownPolicy, InMemoryJobQueue};
use reindex_search::{InMemorySearchEngine, SearchIndexConfig, TantivySearchEngine};
use reindex_types::{
    DirtySet, DirtyTuple, EntityId, Mutation, ProcessorPolicy, ProcessorSettings, SchemaCatalog,
    SearchEngine, TableDelta, TypeDef, ValueType, VariantStateVector, WriteCommand,
};
use reindex_variants::{PartitionDimension, StageDimension, VariantRegistry};

pub const CONTAINERS: &str = "Containers";
pub const ARTICLES: &str = "Articles";

/// Entity types used across the scenarios.
///
/// - `Container` (plain) with `Field1`, an `Owner` (has-one `Person`), a
///   `Parent` container and `Items` (has-many `Item`, each with a has-one
///   `Label`)
/// - `SpecialContainer` extends `Container`
/// - `Article`, versioned and partitioned, with an `Owner`
pub fn catalog() -> SchemaCatalog {
    SchemaCatalog::new(vec![
        TypeDef::new("Container")
            .field("Field1", ValueType::Text)
            .has_one("Owner", "Person")
            .has_one("Parent", "Container")
            .has_many("Items", "Item", "ContainerID"),
        TypeDef::new("SpecialContainer")
            .extends("Container")
            .field("Extra", ValueType::Text),
        TypeDef::new("Person")
            .field("Name", ValueType::String)
            .field("Email", ValueType::String),
        TypeDef::new("Item")
            .field("Body", ValueType::Text)
            .has_one("Label", "Label"),
        TypeDef::new("Label").field("Title", ValueType::String),
        TypeDef::new("Article")
            .field("Title", ValueType::Text)
            .has_one("Owner", "Person")
            .marker("versioned")
            .marker("partitioned"),
    ])
    .expect("valid catalog")
}

/// Stage (`Stage`/`Live`) and partition (`0`, `1`, `2`) dimensions.
pub fn variants() -> Arc<VariantRegistry> {
    Arc::new(
        VariantRegistry::new(Arc::new(catalog()))
            .with_dimension(Arc::new(StageDimension::new()))
            .and_then(|r| r.with_dimension(Arc::new(PartitionDimension::new(vec![1, 2]))))
            .expect("valid dimensions"),
    )
}

pub fn container_index(variants: Arc<VariantRegistry>) -> IndexDefinition {
    IndexDefinition::builder(CONTAINERS, variants)
        .add_type("Container", TypeOptions::with_children())
        .and_then(|b| b.add_fulltext_field("Field1"))
        .and_then(|b| b.add_fulltext_field("Items.Body"))
        .and_then(|b| b.add_fulltext_field("Items.Label.Title"))
        .and_then(|b| b.add_filter_field("Owner.Name"))
        .and_then(|b| b.build())
        .expect("valid container index")
}

pub fn article_index(variants: Arc<VariantRegistry>) -> IndexDefinition {
    IndexDefinition::builder(ARTICLES, variants)
        .add_type("Article", TypeOptions::default())
        .and_then(|b| b.add_fulltext_field("Title"))
        .and_then(|b| b.add_filter_field("Owner.Name"))
        .and_then(|b| b.build())
        .expect("valid article index")
}

pub fn stage() -> VariantStateVector {
    VariantStateVector::new().with("stage", "Stage")
}

pub fn live() -> VariantStateVector {
    VariantStateVector::new().with("stage", "Live")
}

/// Article state: stage plus partition.
pub fn article_state(stage: &str, partition: i64) -> VariantStateVector {
    VariantStateVector::new()
        .with("stage", stage)
        .with("partition", partition)
}

/// Shared test harness for E2E tests.
///
/// Both indexes use in-memory engines so tests can assert on the exact
/// engine calls; [`TestHarness::with_tantivy`] swaps in Tantivy engines
/// stored in the temp directory.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub variants: Arc<VariantRegistry>,
    pub store: Arc<InMemoryEntityStore>,
    pub commits: Arc<CommitCoordinator>,
    pub queue: Arc<InMemoryJobQueue>,
    pub ctx: IndexingContext,
    /// Set when the harness uses in-memory engines
    pub containers: Option<Arc<InMemorySearchEngine>>,
    pub articles: Option<Arc<InMemorySearchEngine>>,
    /// Root directory for Tantivy indexes
    pub index_path: PathBuf,
}

impl TestHarness {
    /// Harness with in-memory engines.
    pub fn new() -> Self {
        let containers = Arc::new(InMemorySearchEngine::new(CONTAINERS));
        let articles = Arc::new(InMemorySearchEngine::new(ARTICLES));
        let mut harness = Self::build(containers.clone(), articles.clone(), None);
        harness.containers = Some(containers);
        harness.articles = Some(articles);
        harness
    }

    /// Harness with Tantivy engines below the temp directory.
    pub fn with_tantivy() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let open = |name: &str| -> Arc<dyn SearchEngine> {
            let config = SearchIndexConfig::for_index(temp_dir.path(), name).with_memory_mb(15);
            Arc::new(TantivySearchEngine::open(name, config).expect("Failed to open tantivy index"))
        };
        let containers = open(CONTAINERS);
        let articles = open(ARTICLES);
        Self::build(containers, articles, Some(temp_dir))
    }

    fn build(
        containers: Arc<dyn SearchEngine>,
        articles: Arc<dyn SearchEngine>,
        temp_dir: Option<tempfile::TempDir>,
    ) -> Self {
        let temp_dir = match temp_dir {
            Some(dir) => dir,
            None => tempfile::TempDir::new().expect("Failed to create temp dir"),
        };
        let index_path = temp_dir.path().to_path_buf();

        let variants = variants();
        let store = Arc::new(InMemoryEntityStore::new(variants.catalog().clone()));
        let commits = Arc::new(CommitCoordinator::new(CooldownPolicy::new(30)));
        let indexes = IndexRegistry::new()
            .with_index(container_index(variants.clone()), containers)
            .with_index(article_index(variants.clone()), articles);
        let ctx = IndexingContext::new(
            variants.clone(),
            Arc::new(indexes),
            store.clone(),
            commits.clone(),
        );

        Self {
            _temp_dir: temp_dir,
            variants,
            store,
            commits,
            queue: Arc::new(InMemoryJobQueue::new()),
            ctx,
            containers: None,
            articles: None,
            index_path,
        }
    }

    /// In-memory Containers engine.
    pub fn containers(&self) -> &Arc<InMemorySearchEngine> {
        self.containers.as_ref().expect("harness uses in-memory engines")
    }

    /// In-memory Articles engine.
    pub fn articles(&self) -> &Arc<InMemorySearchEngine> {
        self.articles.as_ref().expect("harness uses in-memory engines")
    }

    pub fn engine(&self, index: &str) -> Arc<dyn SearchEngine> {
        self.ctx
            .index(index)
            .expect("registered index")
            .engine
            .clone()
    }

    pub fn capture(&self) -> ChangeCapture {
        ChangeCapture::new(self.variants.clone())
    }

    pub fn resolver(&self) -> DirtyResolver {
        DirtyResolver::new(self.ctx.clone())
    }

    pub fn updater(&self, policy: ProcessorPolicy) -> SearchUpdater {
        SearchUpdater::new(
            self.ctx.clone(),
            ProcessorSettings {
                policy,
                ..ProcessorSettings::default()
            },
        )
        .with_queue(self.queue.clone())
    }

    pub fn orchestrator(&self, batch_size: u64) -> Arc<ReindexOrchestrator> {
        Arc::new(ReindexOrchestrator::new(self.ctx.clone(), batch_size))
    }

    /// Capture and resolve a mutation without processing it.
    pub fn dirty_for(&self, mutation: &Mutation) -> DirtySet {
        let resolver = self.resolver();
        let mut dirty = DirtySet::new();
        for write in self.capture().capture(mutation) {
            dirty.merge(resolver.resolve(&write));
        }
        dirty
    }

    pub fn put(&self, entity: Entity) {
        self.store.put(entity, VariantStateVector::new());
    }

    pub fn put_in(&self, entity: Entity, state: VariantStateVector) {
        self.store.put(entity, state);
    }

    /// A container owned by `owner`.
    pub fn put_container(&self, id: EntityId, field1: &str, owner: EntityId) {
        self.put(
            Entity::new(id, "Container")
                .with("Field1", field1)
                .with("OwnerID", owner),
        );
    }

    pub fn put_person(&self, id: EntityId, name: &str) {
        self.put(Entity::new(id, "Person").with("Name", name));
    }

    /// An item of `container` labelled `label`.
    pub fn put_item(&self, id: EntityId, container: EntityId, body: &str, label: EntityId) {
        self.put(
            Entity::new(id, "Item")
                .with("ContainerID", container)
                .with("Body", body)
                .with("LabelID", label),
        );
    }

    pub fn put_label(&self, id: EntityId, title: &str) {
        self.put(Entity::new(id, "Label").with("Title", title));
    }

    /// An article stored in both stages of `partition`.
    pub fn put_article(&self, id: EntityId, title: &str, partition: i64) {
        for stage in ["Stage", "Live"] {
            self.put_in(
                Entity::new(id, "Article")
                    .with("Title", title)
                    .with("PartitionID", partition),
                article_state(stage, partition),
            );
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A single-table write touching `fields`.
pub fn table_write(
    table: &str,
    id: EntityId,
    command: WriteCommand,
    fields: &[(&str, Value)],
) -> Mutation {
    let delta = fields
        .iter()
        .fold(TableDelta::new(table, id, command), |delta, (field, value)| {
            delta.with_field(*field, value.clone())
        });
    Mutation::new().with_delta(delta)
}

/// Every tuple of `dirty`, sorted.
pub fn tuples(dirty: &DirtySet) -> Vec<DirtyTuple> {
    let mut tuples: Vec<DirtyTuple> = dirty.tuples().collect();
    tuples.sort();
    tuples
}

/// Entity ids dirtied for `index`.
pub fn dirty_ids(dirty: &DirtySet, index: &str) -> BTreeSet<EntityId> {
    dirty
        .tuples()
        .filter(|t| t.index_name == index)
        .map(|t| t.entity_id)
        .collect()
}

/// Ids `1..=count` shuffled, for order-independence checks.
pub fn shuffled_ids(count: u64) -> Vec<EntityId> {
    use rand::seq::SliceRandom;
    let mut ids: Vec<EntityId> = (1..=count).collect();
    ids.shuffle(&mut rand::thread_rng());
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_creation() {
        let harness = TestHarness::new();
        assert!(harness.store.is_empty());
        assert_eq!(harness.ctx.indexes.len(), 2);
        assert!(harness.index_path.exists());
    }

    #[test]
    fn test_article_reindex_states() {
        let harness = TestHarness::new();
        let states: Vec<_> = harness
            .variants
            .reindex_states(Some("Article"), false)
            .collect();
        assert_eq!(states.len(), 6);
    }

    #[test]
    fn test_table_write() {
        let mutation = table_write(
            "Container",
            1,
            WriteCommand::Update,
            &[("Field1", Value::from("x"))],
        );
        assert!(!mutation.is_empty());
    }
}
