//! JSON fixtures: catalog, dimensions, index declarations and entities.
//!
//! The entity store is an external collaborator; the CLI stands it in
//! with an [`InMemoryEntityStore`] populated from a fixture file:
//!
//! ```json
//! {
//!   "types": [{ "name": "SiteTree", "markers": ["versioned"], "fields": [...] }],
//!   "dimensions": [{ "kind": "stage" }],
//!   "indexes": [{
//!     "name": "Main",
//!     "classes": [{ "type": "SiteTree", "include_children": true }],
//!     "fulltext": ["Title", "Comments.Body"],
//!     "filter": ["Author.Name"]
//!   }],
//!   "entities": [{ "id": 1, "type_name": "Page", "values": { "Title": "Home" },
//!                  "states": [{ "stage": "Stage" }, { "stage": "Live" }] }],
//!   "links": [{ "table": "Page_Tags", "local": 1, "remote": 7 }],
//!   "accessors": [{ "type": "SiteTree", "name": "Summary", "template": "{Title}: {Content}" }]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use reindex_schema::{Entity, IndexDefinition, InMemoryEntityStore, SchemaError, TypeOptions};
use reindex_types::{EntityId, SchemaCatalog, TypeDef, VariantStateVector};
use reindex_variants::{Dimension, PartitionDimension, StageDimension, VariantRegistry};

/// A state dimension to register, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DimensionDecl {
    Stage {
        #[serde(default)]
        marker: Option<String>,
    },
    Partition {
        #[serde(default)]
        partitions: Vec<i64>,
        #[serde(default)]
        marker: Option<String>,
        #[serde(default)]
        column: Option<String>,
    },
}

impl DimensionDecl {
    pub fn build(&self) -> Arc<dyn Dimension> {
        match self {
            DimensionDecl::Stage { marker } => {
                let mut dimension = StageDimension::new();
                if let Some(marker) = marker {
                    dimension = dimension.with_marker(marker.clone());
                }
                Arc::new(dimension)
            }
            DimensionDecl::Partition {
                partitions,
                marker,
                column,
            } => {
                let mut dimension = PartitionDimension::new(partitions.iter().copied());
                if let Some(marker) = marker {
                    dimension = dimension.with_marker(marker.clone());
                }
                if let Some(column) = column {
                    dimension = dimension.with_column(column.clone());
                }
                Arc::new(dimension)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDecl {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub include_children: bool,
}

/// Declaration of one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDecl {
    pub name: String,
    pub classes: Vec<ClassDecl>,
    #[serde(default)]
    pub fulltext: Vec<String>,
    #[serde(default)]
    pub filter: Vec<String>,
    #[serde(default)]
    pub sort: Vec<String>,
    /// Partial state vectors never stored in this index
    #[serde(default)]
    pub exclude_states: Vec<VariantStateVector>,
}

impl IndexDecl {
    /// Build the definition; classes are added before any field.
    pub fn build(&self, variants: Arc<VariantRegistry>) -> Result<IndexDefinition, SchemaError> {
        let mut builder = IndexDefinition::builder(self.name.clone(), variants);
        for class in &self.classes {
            let options = TypeOptions {
                include_children: class.include_children,
            };
            builder = builder.add_type(&class.type_name, options)?;
        }
        for path in &self.fulltext {
            builder = builder.add_fulltext_field(path)?;
        }
        for path in &self.filter {
            builder = builder.add_filter_field(path)?;
        }
        for path in &self.sort {
            builder = builder.add_sort_field(path)?;
        }
        for state in &self.exclude_states {
            builder = builder.exclude_variant_state(state.clone());
        }
        builder.build()
    }
}

/// An entity and the states it exists in (none: visible in every state).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(flatten)]
    pub entity: Entity,
    #[serde(default)]
    pub states: Vec<VariantStateVector>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub table: String,
    pub local: EntityId,
    pub remote: EntityId,
}

/// Computed field rendered from a `{Field}` template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessorDecl {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    pub template: String,
}

impl AccessorDecl {
    /// Substitute `{Field}` placeholders; unknown fields are an error.
    pub fn render(template: &str, entity: &Entity) -> Result<Value, String> {
        let mut out = String::new();
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after
                .find('}')
                .ok_or_else(|| format!("unterminated placeholder in {:?}", template))?;
            let field = &after[..end];
            match entity.get(field) {
                Some(Value::String(s)) => out.push_str(s),
                Some(Value::Null) => {}
                Some(other) => out.push_str(&other.to_string()),
                None => return Err(format!("{} has no field {}", entity.type_name, field)),
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(Value::String(out))
    }
}

/// Parsed fixture file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub dimensions: Vec<DimensionDecl>,
    #[serde(default)]
    pub indexes: Vec<IndexDecl>,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub links: Vec<LinkRecord>,
    #[serde(default)]
    pub accessors: Vec<AccessorDecl>,
}

impl Fixture {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse fixture")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {:?}", path))?;
        Self::from_json(&json)
    }

    /// Validate the catalog and register every dimension.
    pub fn variants(&self) -> Result<Arc<VariantRegistry>> {
        let catalog =
            SchemaCatalog::new(self.types.clone()).context("Invalid type declarations")?;
        let mut registry = VariantRegistry::new(Arc::new(catalog));
        for decl in &self.dimensions {
            registry
                .register(decl.build())
                .context("Failed to register dimension")?;
        }
        Ok(Arc::new(registry))
    }

    /// Build every declared index definition.
    pub fn index_definitions(&self, variants: &Arc<VariantRegistry>) -> Result<Vec<IndexDefinition>> {
        self.indexes
            .iter()
            .map(|decl| {
                decl.build(variants.clone())
                    .with_context(|| format!("Invalid index declaration {}", decl.name))
            })
            .collect()
    }

    /// A store holding every entity, link and accessor of the fixture.
    pub fn store(&self, variants: &VariantRegistry) -> InMemoryEntityStore {
        let store = InMemoryEntityStore::new(variants.catalog().clone());
        for record in &self.entities {
            if record.states.is_empty() {
                store.put(record.entity.clone(), VariantStateVector::new());
            }
            for state in &record.states {
                store.put(record.entity.clone(), state.clone());
            }
        }
        for link in &self.links {
            store.link(&link.table, link.local, link.remote);
        }
        for accessor in &self.accessors {
            let template = accessor.template.clone();
            store.register_accessor(&accessor.type_name, &accessor.name, move |entity| {
                AccessorDecl::render(&template, entity)
            });
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use reindex_schema::EntityStore;

    const SITE: &str = r#"{
        "types": [
            { "name": "SiteTree", "markers": ["versioned"],
              "fields": [{ "name": "Title", "value_type": "text" },
                         { "name": "Summary", "derived": true }] },
            { "name": "Page", "parent": "SiteTree" }
        ],
        "dimensions": [{ "kind": "stage" }],
        "indexes": [{
            "name": "Main",
            "classes": [{ "type": "SiteTree", "include_children": true }],
            "fulltext": ["Title", "Summary"],
            "exclude_states": [{ "stage": "Stage" }]
        }],
        "entities": [
            { "id": 1, "type_name": "Page", "values": { "Title": "Home" },
              "states": [{ "stage": "Stage" }, { "stage": "Live" }] },
            { "id": 2, "type_name": "Page", "values": { "Title": "Draft only" },
              "states": [{ "stage": "Stage" }] }
        ],
        "accessors": [{ "type": "SiteTree", "name": "Summary", "template": "About {Title}" }]
    }"#;

    #[test]
    fn test_parse_fixture() {
        let fixture = Fixture::from_json(SITE).unwrap();
        assert_eq!(fixture.types.len(), 2);
        assert_eq!(fixture.dimensions, vec![DimensionDecl::Stage { marker: None }]);
        assert_eq!(fixture.indexes[0].classes[0].type_name, "SiteTree");
        assert_eq!(fixture.entities[0].entity.type_name, "Page");
        assert_eq!(fixture.entities[0].states.len(), 2);
    }

    #[test]
    fn test_build_definitions_and_store() {
        let fixture = Fixture::from_json(SITE).unwrap();
        let variants = fixture.variants().unwrap();
        let definitions = fixture.index_definitions(&variants).unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name(), "Main");
        assert!(definitions[0].is_excluded(&VariantStateVector::new().with("stage", "Stage")));

        let store = fixture.store(&variants);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_same_id_in_different_tables() {
        let fixture = Fixture::from_json(
            r#"{
                "types": [
                    { "name": "Member", "fields": [{ "name": "Name" }] },
                    { "name": "Container", "fields": [{ "name": "Label" }] }
                ],
                "entities": [
                    { "id": 1, "type_name": "Member", "values": { "Name": "Ana" } },
                    { "id": 1, "type_name": "Container", "values": { "Label": "pantry" } }
                ]
            }"#,
        )
        .unwrap();
        let variants = fixture.variants().unwrap();
        let store = fixture.store(&variants);
        let empty = VariantStateVector::new();

        assert_eq!(store.len(), 2);
        assert_eq!(store.count("Member", &empty).unwrap(), 1);
        assert_eq!(store.count("Container", &empty).unwrap(), 1);
        let member = store.get_by_id("Member", 1, &empty).unwrap().unwrap();
        assert_eq!(member.get("Name"), Some(&Value::from("Ana")));
    }

    #[test]
    fn test_unknown_parent_is_rejected() {
        let fixture =
            Fixture::from_json(r#"{ "types": [{ "name": "Page", "parent": "Missing" }] }"#)
                .unwrap();
        assert!(fixture.variants().is_err());
    }

    #[test]
    fn test_render_template() {
        let entity = Entity::new(1, "Page").with("Title", "Home").with("Sort", 3);
        assert_eq!(
            AccessorDecl::render("{Title} #{Sort}", &entity).unwrap(),
            Value::String("Home #3".to_string())
        );
        assert!(AccessorDecl::render("{Missing}", &entity).is_err());
        assert!(AccessorDecl::render("{Title", &entity).is_err());
    }
}
