//! Shared fixture for unit tests: a small versioned site tree.

use std::sync::Arc;

use reindex_schema::{IndexDefinition, InMemoryEntityStore, TypeOptions};
use reindex_scheduler::{CommitCoordinator, CooldownPolicy};
use reindex_search::InMemorySearchEngine;
use reindex_types::{SchemaCatalog, TypeDef, ValueType, VariantStateVector};
use reindex_variants::{StageDimension, VariantRegistry};

use crate::context::{IndexRegistry, IndexingContext};

pub struct Fixture {
    pub variants: Arc<VariantRegistry>,
    pub store: Arc<InMemoryEntityStore>,
    pub engine: Arc<InMemorySearchEngine>,
    pub commits: Arc<CommitCoordinator>,
    pub ctx: IndexingContext,
}

pub fn catalog() -> SchemaCatalog {
    SchemaCatalog::new(vec![
        TypeDef::new("SiteTree")
            .field("Title", ValueType::Text)
            .field("Content", ValueType::Text)
            .accessor("Summary", None)
            .has_one("Author", "Member")
            .has_one("Parent", "SiteTree")
            .marker("versioned"),
        TypeDef::new("Page")
            .extends("SiteTree")
            .has_many("Comments", "Comment", "PageID")
            .many_many("Tags", "Tag", "Page_Tags"),
        TypeDef::new("Member")
            .field("Name", ValueType::String)
            .field("Email", ValueType::String),
        TypeDef::new("Comment").field("Body", ValueType::Text),
        TypeDef::new("Tag").field("Title", ValueType::String),
        TypeDef::new("File").field("Name", ValueType::String),
    ])
    .unwrap()
}

pub fn variants() -> Arc<VariantRegistry> {
    Arc::new(
        VariantRegistry::new(Arc::new(catalog()))
            .with_dimension(Arc::new(StageDimension::new()))
            .unwrap(),
    )
}

pub fn main_index(variants: Arc<VariantRegistry>) -> IndexDefinition {
    IndexDefinition::builder("Main", variants)
        .add_type("SiteTree", TypeOptions::with_children())
        .unwrap()
        .add_fulltext_field("Title")
        .unwrap()
        .add_fulltext_field("Content")
        .unwrap()
        .add_fulltext_field("Summary")
        .unwrap()
        .add_filter_field("Author.Name")
        .unwrap()
        .add_fulltext_field("Comments.Body")
        .unwrap()
        .add_fulltext_field("Tags.Title")
        .unwrap()
        .build()
        .unwrap()
}

pub fn fixture() -> Fixture {
    let variants = variants();
    let store = Arc::new(InMemoryEntityStore::new(variants.catalog().clone()));
    let engine = Arc::new(InMemorySearchEngine::new("Main"));
    let commits = Arc::new(CommitCoordinator::new(CooldownPolicy::none()));
    let indexes = IndexRegistry::new().with_index(main_index(variants.clone()), engine.clone());
    let ctx = IndexingContext::new(
        variants.clone(),
        Arc::new(indexes),
        store.clone(),
        commits.clone(),
    );
    Fixture {
        variants,
        store,
        engine,
        commits,
        ctx,
    }
}

pub fn stage() -> VariantStateVector {
    VariantStateVector::new().with("stage", "Stage")
}

pub fn live() -> VariantStateVector {
    VariantStateVector::new().with("stage", "Live")
}
