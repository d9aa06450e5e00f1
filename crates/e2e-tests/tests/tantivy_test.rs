//! End-to-end tests against real Tantivy indexes.
//!
//! Builds indexes through the full pipeline, then queries them the way a
//! reader would: variant filters applied from the current state, filter
//! fields keyed by their declaring type.

use std::io::Write;

use pretty_assertions::assert_eq;
use serde_json::Value;

use e2e_tests::{article_state, table_write, TestHarness, ARTICLES, CONTAINERS};
use reindex_cli::{run_full, run_search, run_trigger, Fixture, Workspace};
use reindex_indexing::{FlushOutcome, NoOpProgressCallback};
use reindex_types::{
    FilterValue, ProcessorPolicy, ReindexHandlerKind, SearchQuery, SearchResults, Settings,
    VariantStateVector, WriteCommand,
};

const OWNER_NAME: &str = "Container_Owner_Name";

fn search(harness: &TestHarness, index: &str, mut query: SearchQuery) -> SearchResults {
    let classes = harness.ctx.index(index).unwrap().definition.class_names();
    harness.variants.alter_query(&mut query, &classes);
    harness.engine(index).search(&query, 0, 20).unwrap()
}

fn entity_ids(results: &SearchResults) -> Vec<u64> {
    let mut ids: Vec<u64> = results.hits.iter().map(|h| h.entity_id).collect();
    ids.sort();
    ids
}

fn seed(harness: &TestHarness) {
    harness.put_person(9, "Jo");
    harness.put_person(10, "Sam");
    harness.put_container(1, "pantry", 9);
    harness.put_container(2, "cellar", 10);
    harness.put_label(30, "fragile");
    harness.put_item(20, 1, "apples", 30);
    harness.put_item(21, 2, "turnips", 30);
}

fn full(harness: &TestHarness, index: &str) {
    harness
        .orchestrator(10)
        .run_full(&[index.to_string()], None, &NoOpProgressCallback)
        .unwrap();
}

#[test]
fn test_fulltext_over_related_fields() {
    let harness = TestHarness::with_tantivy();
    seed(&harness);
    full(&harness, CONTAINERS);

    let results = search(&harness, CONTAINERS, SearchQuery::new().with_term("apples"));
    assert_eq!(entity_ids(&results), vec![1]);

    let results = search(&harness, CONTAINERS, SearchQuery::new().with_term("fragile"));
    assert_eq!(entity_ids(&results), vec![1, 2]);
    assert_eq!(results.total_found, 2);
}

#[test]
fn test_filter_and_exclude() {
    let harness = TestHarness::with_tantivy();
    seed(&harness);
    harness.put(reindex_schema::Entity::new(3, "Container").with("Field1", "attic"));
    full(&harness, CONTAINERS);

    let mut query = SearchQuery::new();
    query.filter(OWNER_NAME, vec![FilterValue::value("Sam")]);
    assert_eq!(entity_ids(&search(&harness, CONTAINERS, query)), vec![2]);

    let mut query = SearchQuery::new();
    query.filter(OWNER_NAME, vec![FilterValue::value("Jo"), FilterValue::Missing]);
    assert_eq!(entity_ids(&search(&harness, CONTAINERS, query)), vec![1, 3]);

    let mut query = SearchQuery::new();
    query.exclude(OWNER_NAME, vec![FilterValue::value("Jo")]);
    assert_eq!(entity_ids(&search(&harness, CONTAINERS, query)), vec![2, 3]);
}

/// A change to a related entity reaches the committed index through the
/// immediate processor.
#[test]
fn test_related_change_is_searchable() {
    let harness = TestHarness::with_tantivy();
    seed(&harness);
    full(&harness, CONTAINERS);

    harness.put_person(10, "Samantha");
    let mut updater = harness.updater(ProcessorPolicy::Immediate);
    updater.on_mutation(&table_write(
        "Person",
        10,
        WriteCommand::Update,
        &[("Name", Value::from("Samantha"))],
    ));
    assert!(matches!(updater.flush().unwrap(), FlushOutcome::Processed(_)));

    let mut query = SearchQuery::new();
    query.filter(OWNER_NAME, vec![FilterValue::value("Samantha")]);
    assert_eq!(entity_ids(&search(&harness, CONTAINERS, query)), vec![2]);

    let mut query = SearchQuery::new();
    query.filter(OWNER_NAME, vec![FilterValue::value("Sam")]);
    assert!(search(&harness, CONTAINERS, query).hits.is_empty());
}

#[test]
fn test_delete_removes_document() {
    let harness = TestHarness::with_tantivy();
    seed(&harness);
    full(&harness, CONTAINERS);

    harness.store.remove("Container", 1, &VariantStateVector::new());
    let mut updater = harness.updater(ProcessorPolicy::Immediate);
    updater.on_delete("Container", 1);
    updater.flush().unwrap();

    let results = search(&harness, CONTAINERS, SearchQuery::new());
    assert_eq!(entity_ids(&results), vec![2]);
}

/// Readers only see documents of the current stage and partition.
#[test]
fn test_articles_scoped_to_current_state() {
    let harness = TestHarness::with_tantivy();
    harness.put_article(1, "harvest report", 1);
    harness.put_article(2, "harvest notes", 2);
    full(&harness, ARTICLES);

    {
        let _guard = harness
            .variants
            .activate_scoped(&article_state("Live", 1))
            .unwrap();
        let results = search(&harness, ARTICLES, SearchQuery::new().with_term("harvest"));
        assert_eq!(entity_ids(&results), vec![1]);
    }
    {
        let _guard = harness
            .variants
            .activate_scoped(&article_state("Stage", 2))
            .unwrap();
        let results = search(&harness, ARTICLES, SearchQuery::new().with_term("harvest"));
        assert_eq!(entity_ids(&results), vec![2]);
    }
}

/// Rerunning a full reindex against a persisted index leaves one document
/// per entity.
#[test]
fn test_full_reindex_twice_keeps_one_document_each() {
    let harness = TestHarness::with_tantivy();
    seed(&harness);
    full(&harness, CONTAINERS);
    full(&harness, CONTAINERS);

    let results = search(&harness, CONTAINERS, SearchQuery::new());
    assert_eq!(results.total_found, 2);
}

const FIXTURE: &str = r#"{
    "types": [
        { "name": "Member", "fields": [{ "name": "Name" }] },
        { "name": "SiteTree", "markers": ["versioned"],
          "fields": [{ "name": "Title", "value_type": "text" }],
          "relations": [{ "name": "Author", "kind": "has_one", "target": "Member",
                          "foreign_key": "AuthorID" }] },
        { "name": "Page", "parent": "SiteTree" }
    ],
    "dimensions": [{ "kind": "stage" }],
    "indexes": [{
        "name": "Main",
        "classes": [{ "type": "SiteTree", "include_children": true }],
        "fulltext": ["Title"],
        "filter": ["Author.Name"]
    }],
    "entities": [
        { "id": 5, "type_name": "Member", "values": { "Name": "Ana" } },
        { "id": 1, "type_name": "Page", "values": { "Title": "Welcome", "AuthorID": 5 },
          "states": [{ "stage": "Stage" }, { "stage": "Live" }] },
        { "id": 2, "type_name": "Page", "values": { "Title": "Unpublished plans", "AuthorID": 5 },
          "states": [{ "stage": "Stage" }] }
    ]
}"#;

/// A fixture file on disk drives the same commands the binary runs.
#[test]
fn test_cli_workspace_from_fixture_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("site.json");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(FIXTURE.as_bytes()).unwrap();

    let fixture = Fixture::load(&path).unwrap();
    let settings = Settings {
        search_index_path: dir.path().join("indexes").to_string_lossy().to_string(),
        ..Settings::default()
    };
    let ws = Workspace::open(settings, &fixture).unwrap();

    let progress = run_full(&ws, &[], &[], ReindexHandlerKind::Queued, Some(1)).unwrap();
    assert!(progress.completed);
    assert_eq!(progress.groups_done, progress.groups_total);

    let stage = VariantStateVector::new().with("stage", "Stage");
    let live = VariantStateVector::new().with("stage", "Live");

    let results = run_search(&ws, "Main", SearchQuery::new(), Some(&stage), 0, 10).unwrap();
    assert_eq!(results.total_found, 2);
    let results = run_search(&ws, "Main", SearchQuery::new(), Some(&live), 0, 10).unwrap();
    assert_eq!(entity_ids(&results), vec![1]);

    let mut query = SearchQuery::new();
    query.filter("SiteTree_Author_Name", vec![FilterValue::value("Ana")]);
    let results = run_search(&ws, "Main", query, Some(&stage), 0, 10).unwrap();
    assert_eq!(entity_ids(&results), vec![1, 2]);

    // A page trigger rewrites the page in the current stage
    let outcome = run_trigger(&ws, "Page", 1, false).unwrap();
    assert!(matches!(outcome, FlushOutcome::Processed(_)));
    let results = run_search(&ws, "Main", SearchQuery::new().with_term("welcome"), Some(&stage), 0, 10)
        .unwrap();
    assert_eq!(entity_ids(&results), vec![1]);
}
