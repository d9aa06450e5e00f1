//! End-to-end tests for change propagation.
//!
//! Covers the write-to-dirty-tuple path: direct membership, backward
//! closure over derived fields, unrelated field changes, dependency list
//! minimality, and the create/update/delete lifecycle of one container.

use std::collections::BTreeSet;

use pretty_assertions::assert_eq;
use serde_json::Value;

use e2e_tests::{
    dirty_ids, table_write, tuples, TestHarness, ARTICLES, CONTAINERS,
};
use reindex_indexing::FlushOutcome;
use reindex_schema::{Entity, IndexDefinition, TypeOptions};
use reindex_types::{
    document_id, DirtyTuple, Mutation, ProcessorPolicy, TableDelta, VariantStateVector,
    WriteCommand,
};

fn default_state() -> VariantStateVector {
    VariantStateVector::new()
}

/// Two containers, each with one item carrying its own label.
fn seed_items(harness: &TestHarness) {
    harness.put_person(9, "Jo");
    harness.put_container(1, "first", 9);
    harness.put_container(2, "second", 9);
    harness.put_label(30, "red");
    harness.put_label(31, "blue");
    harness.put_item(20, 1, "apples", 30);
    harness.put_item(21, 2, "pears", 31);
}

/// Container create, update and delete each produce the expected tuple,
/// and the delete reaches the engine as a delete without an add.
#[test]
fn test_container_lifecycle() {
    let harness = TestHarness::new();
    let engine = harness.containers();
    let expected = vec![DirtyTuple {
        index_name: CONTAINERS.to_string(),
        root_type: "Container".to_string(),
        entity_id: 1,
        variant_state: default_state(),
    }];

    // Create
    harness.put_container(1, "x", 9);
    let created = table_write("Container", 1, WriteCommand::Insert, &[("Field1", Value::from("x"))]);
    assert_eq!(tuples(&harness.dirty_for(&created)), expected);

    let mut updater = harness.updater(ProcessorPolicy::Immediate);
    updater.on_mutation(&created);
    assert!(matches!(updater.flush().unwrap(), FlushOutcome::Processed(_)));
    let doc_id = document_id(1, "Container", &default_state());
    assert!(engine.document(&doc_id).unwrap().fulltext().contains('x'));

    // Update
    harness.put_container(1, "y", 9);
    let updated = table_write("Container", 1, WriteCommand::Update, &[("Field1", Value::from("y"))]);
    assert_eq!(tuples(&harness.dirty_for(&updated)), expected);
    updater.on_mutation(&updated);
    updater.flush().unwrap();
    assert!(engine.document(&doc_id).unwrap().fulltext().contains('y'));

    // Delete
    engine.clear_operations();
    harness.store.remove("Container", 1, &default_state());
    updater.on_delete("Container", 1);
    assert_eq!(tuples(updater.dirty()), expected);
    updater.flush().unwrap();

    assert_eq!(engine.deleted_ids(), vec![doc_id.clone()]);
    assert!(engine.added_ids().is_empty());
    assert!(engine.document(&doc_id).is_none());
}

/// Changing `Label.Title` dirties exactly the container whose item
/// carries that label.
#[test]
fn test_backward_closure_through_has_many_and_has_one() {
    let harness = TestHarness::new();
    seed_items(&harness);

    let mutation = table_write("Label", 30, WriteCommand::Update, &[("Title", Value::from("green"))]);
    let dirty = harness.dirty_for(&mutation);

    assert_eq!(dirty_ids(&dirty, CONTAINERS), BTreeSet::from([1]));
    assert!(dirty_ids(&dirty, ARTICLES).is_empty());
    assert_eq!(
        tuples(&dirty),
        vec![DirtyTuple {
            index_name: CONTAINERS.to_string(),
            root_type: "Container".to_string(),
            entity_id: 1,
            variant_state: default_state(),
        }]
    );
}

/// The rebuilt document carries the new label once the store has it.
#[test]
fn test_backward_closure_updates_document() {
    let harness = TestHarness::new();
    seed_items(&harness);
    let mut updater = harness.updater(ProcessorPolicy::Immediate);

    harness.put_label(30, "green");
    updater.on_mutation(&table_write(
        "Label",
        30,
        WriteCommand::Update,
        &[("Title", Value::from("green"))],
    ));
    updater.flush().unwrap();

    let doc = harness
        .containers()
        .document(&document_id(1, "Container", &default_state()))
        .unwrap();
    assert!(doc.fulltext().contains("green"));
    assert!(doc.fulltext().contains("apples"));
    assert_eq!(harness.containers().len(), 1);
}

/// A has-one target's unrelated field changing produces no tuples.
#[test]
fn test_unrelated_has_one_field_change() {
    let harness = TestHarness::new();
    seed_items(&harness);

    let mutation = table_write("Person", 9, WriteCommand::Update, &[("Email", Value::from("jo@example.com"))]);
    assert!(harness.dirty_for(&mutation).is_empty());

    let mutation = table_write("Person", 9, WriteCommand::Update, &[("Name", Value::from("Joanne"))]);
    assert_eq!(
        dirty_ids(&harness.dirty_for(&mutation), CONTAINERS),
        BTreeSet::from([1, 2])
    );
}

/// Item writes dirty their container through `Items.Body`, but only when
/// the body changed.
#[test]
fn test_has_many_child_write() {
    let harness = TestHarness::new();
    seed_items(&harness);

    let body = table_write("Item", 21, WriteCommand::Update, &[("Body", Value::from("plums"))]);
    assert_eq!(dirty_ids(&harness.dirty_for(&body), CONTAINERS), BTreeSet::from([2]));

    let unrelated = table_write("Item", 21, WriteCommand::Update, &[("Sort", Value::from(3))]);
    assert!(harness.dirty_for(&unrelated).is_empty());
}

/// Deleting a related entity dirties its dependents even without fields.
#[test]
fn test_related_delete_dirties_dependents() {
    let harness = TestHarness::new();
    seed_items(&harness);

    let mut updater = harness.updater(ProcessorPolicy::Immediate);
    updater.on_delete("Label", 31);
    assert_eq!(dirty_ids(updater.dirty(), CONTAINERS), BTreeSet::from([2]));
}

/// Subclass writes fold into one write under the base type, and the
/// most specific type is kept whichever table comes first.
#[test]
fn test_subclass_tables_fold() {
    let harness = TestHarness::new();
    let mutation = Mutation::new()
        .with_delta(TableDelta::new("SpecialContainer", 5, WriteCommand::Insert).with_field("Extra", "e"))
        .with_delta(TableDelta::new("Container", 5, WriteCommand::Insert).with_field("Field1", "f"));

    let writes = harness.capture().capture(&mutation);
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].declared_type, "SpecialContainer");
    assert_eq!(writes[0].root_type, "Container");

    let dirty = harness.dirty_for(&mutation);
    assert_eq!(dirty_ids(&dirty, CONTAINERS), BTreeSet::from([5]));
}

/// A write that touched a table but changed nothing is dropped.
#[test]
fn test_untouched_write_is_dropped() {
    let harness = TestHarness::new();
    let mutation = table_write("Container", 1, WriteCommand::Update, &[]);
    assert!(harness.capture().capture(&mutation).is_empty());
    assert!(harness.dirty_for(&mutation).is_empty());
}

/// Versioned writes land in the state of the table they were written to.
#[test]
fn test_live_table_write_dirties_live_state() {
    let harness = TestHarness::new();
    let mutation = table_write(
        "Article_Live",
        40,
        WriteCommand::Update,
        &[("Title", Value::from("t")), ("PartitionID", Value::from(2))],
    );
    let dirty = harness.dirty_for(&mutation);

    let states: Vec<VariantStateVector> = dirty
        .tuples()
        .filter(|t| t.index_name == ARTICLES)
        .map(|t| t.variant_state)
        .collect();
    assert_eq!(
        states,
        vec![VariantStateVector::new().with("stage", "Live").with("partition", 2)]
    );
}

/// Adding a type and a field reached through a relation to its subclass
/// (or super class) never lists both in the dependency list.
#[test]
fn test_dependency_list_minimality() {
    let harness = TestHarness::new();

    let on_base = IndexDefinition::builder("OnBase", harness.variants.clone())
        .add_type("Container", TypeOptions::with_children())
        .unwrap()
        .add_fulltext_field("Parent.Extra")
        .unwrap()
        .build()
        .unwrap();
    let on_subclass = IndexDefinition::builder("OnSubclass", harness.variants.clone())
        .add_type("SpecialContainer", TypeOptions::default())
        .unwrap()
        .add_fulltext_field("Parent.Field1")
        .unwrap()
        .build()
        .unwrap();

    for definition in [&on_base, &on_subclass] {
        let list = definition.dependency_list();
        assert!(
            !(list.contains(&"Container".to_string())
                && list.contains(&"SpecialContainer".to_string())),
            "{} lists both Container and SpecialContainer: {:?}",
            definition.name(),
            list
        );
    }
    assert_eq!(on_subclass.dependency_list(), &["Container".to_string()]);
    assert!(on_subclass.depends_on("SpecialContainer"));
}

/// Types after fields are a configuration error.
#[test]
fn test_type_after_field_is_rejected() {
    let harness = TestHarness::new();
    let result = IndexDefinition::builder("Late", harness.variants.clone())
        .add_type("Container", TypeOptions::default())
        .unwrap()
        .add_fulltext_field("Field1")
        .unwrap()
        .add_type("Article", TypeOptions::default());
    assert!(result.is_err());
}

/// Entities that are not covered by any index are ignored entirely.
#[test]
fn test_related_write_without_dependents() {
    let harness = TestHarness::new();
    harness.put(Entity::new(50, "Label").with("Title", "orphan"));
    let mutation = table_write("Label", 50, WriteCommand::Update, &[("Title", Value::from("x"))]);
    assert!(harness.dirty_for(&mutation).is_empty());
}
