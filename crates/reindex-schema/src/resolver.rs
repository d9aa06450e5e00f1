//! Compiles dotted field paths into lookup chains.
//!
//! A path without dots names a field on the root types. A dotted path
//! crosses one relation per segment before the last. Resolution runs once
//! per root type and produces one [`FieldSpec`] per distinct origin.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use reindex_types::{EntityCatalog, RelationDef, RelationKind, ValueType};

use crate::field::FieldSpec;
use crate::lookup::LookupStep;

/// Per-type options of an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeOptions {
    /// Also index subtypes of the type
    pub include_children: bool,
}

impl TypeOptions {
    pub fn with_children() -> Self {
        Self {
            include_children: true,
        }
    }
}

/// A partially resolved path: where traversal currently stands.
#[derive(Debug, Clone)]
struct Source {
    type_name: String,
    options: TypeOptions,
    root_type: String,
    origin: Option<String>,
    chain: Vec<LookupStep>,
    multi_valued: bool,
}

/// Resolves field paths against the entity catalog.
pub struct FieldPathResolver {
    catalog: Arc<dyn EntityCatalog>,
}

impl FieldPathResolver {
    pub fn new(catalog: Arc<dyn EntityCatalog>) -> Self {
        Self { catalog }
    }

    /// Resolve `path` against every root type.
    ///
    /// Returns specs keyed by full field name. An unresolvable relation
    /// segment or terminal field yields an empty map; turning that into an
    /// error is the caller's decision.
    pub fn resolve(
        &self,
        root_types: &[(String, TypeOptions)],
        path: &str,
        forced_type: Option<ValueType>,
        extra_options: &BTreeMap<String, Value>,
    ) -> BTreeMap<String, FieldSpec> {
        let mut sources: Vec<Source> = root_types
            .iter()
            .map(|(type_name, options)| Source {
                type_name: type_name.clone(),
                options: *options,
                root_type: self.catalog.base_type(type_name),
                origin: None,
                chain: Vec::new(),
                multi_valued: false,
            })
            .collect();

        let mut segments: Vec<&str> = path.split('.').collect();
        let field = segments.pop().unwrap_or_default();

        for segment in segments {
            sources = self.follow(&sources, segment);
            if sources.is_empty() {
                debug!(path, segment, "Relation segment did not resolve");
                return BTreeMap::new();
            }
        }

        let full_path = path.replace('.', "_");
        let mut found = BTreeMap::new();
        for source in &sources {
            for spec in self.terminal(source, field, &full_path, forced_type, extra_options) {
                found.insert(spec.full_field_name.clone(), spec);
            }
        }
        found
    }

    /// Cross one relation segment from every source.
    ///
    /// Only relations declared directly on a type contribute, so an
    /// inherited declaration is not walked a second time.
    fn follow(&self, sources: &[Source], segment: &str) -> Vec<Source> {
        let mut next: BTreeMap<(String, String, String), Source> = BTreeMap::new();

        for source in sources {
            let hierarchy = self
                .catalog
                .hierarchy(&source.type_name, source.options.include_children);
            for dataclass in hierarchy {
                let relation = match self.catalog.declared_relation(&dataclass, segment) {
                    Some(r) => r,
                    None => continue,
                };

                let mut chain = source.chain.clone();
                chain.push(relation_step(&dataclass, relation));

                let key = (
                    source.root_type.clone(),
                    relation.target.clone(),
                    dataclass.clone(),
                );
                next.entry(key).or_insert_with(|| Source {
                    type_name: relation.target.clone(),
                    options: source.options,
                    root_type: source.root_type.clone(),
                    origin: Some(source.origin.clone().unwrap_or_else(|| dataclass.clone())),
                    chain,
                    multi_valued: source.multi_valued || relation.kind != RelationKind::HasOne,
                });
            }
        }

        next.into_values().collect()
    }

    /// Resolve the terminal field on one source.
    ///
    /// Walks the hierarchy base first. Once a type exposes the field, its
    /// subtypes are not examined for it.
    fn terminal(
        &self,
        source: &Source,
        field: &str,
        full_path: &str,
        forced_type: Option<ValueType>,
        extra_options: &BTreeMap<String, Value>,
    ) -> Vec<FieldSpec> {
        let mut specs = Vec::new();
        let mut skipped: BTreeSet<String> = BTreeSet::new();

        for dataclass in self
            .catalog
            .hierarchy(&source.type_name, source.options.include_children)
        {
            if skipped.contains(&dataclass) {
                continue;
            }
            let (owner, def) = match self.catalog.field(&dataclass, field) {
                Some(found) => found,
                None => continue,
            };

            skipped.extend(self.catalog.subtypes_of(&dataclass));

            let step = if def.derived {
                LookupStep::DerivedAccessor {
                    type_name: owner.clone(),
                    accessor: field.to_string(),
                }
            } else {
                LookupStep::Property {
                    type_name: owner.clone(),
                    field: field.to_string(),
                }
            };
            let mut chain = source.chain.clone();
            chain.push(step);

            let origin = source.origin.clone().unwrap_or_else(|| owner.clone());
            let full_field_name = format!("{}_{}", origin, full_path);
            specs.push(FieldSpec {
                name: full_field_name.clone(),
                source_field: field.to_string(),
                full_field_name,
                root_type: source.root_type.clone(),
                origin_type: origin,
                entity_type: owner,
                lookup_chain: chain,
                value_type: forced_type.or(def.value_type).unwrap_or_default(),
                multi_valued: source.multi_valued,
                extra_options: extra_options.clone(),
            });
        }

        specs
    }
}

fn relation_step(owner: &str, relation: &RelationDef) -> LookupStep {
    match relation.kind {
        RelationKind::HasOne => LookupStep::SingularRelation {
            owner: owner.to_string(),
            relation: relation.name.clone(),
            foreign_key: relation.foreign_key.clone(),
            target: relation.target.clone(),
        },
        RelationKind::HasMany | RelationKind::ManyMany => LookupStep::CollectionRelation {
            owner: owner.to_string(),
            relation: relation.name.clone(),
            kind: relation.kind,
            foreign_key: relation.foreign_key.clone(),
            join: relation.join.clone(),
            target: relation.target.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use reindex_types::{SchemaCatalog, TypeDef};

    fn resolver() -> FieldPathResolver {
        let catalog = SchemaCatalog::new(vec![
            TypeDef::new("SiteTree")
                .field("Title", ValueType::Text)
                .has_one("Author", "Member"),
            TypeDef::new("Page")
                .extends("SiteTree")
                .field("Content", ValueType::Text)
                .has_many("Comments", "Comment", "PageID"),
            TypeDef::new("RedirectPage")
                .extends("Page")
                .field("Content", ValueType::String),
            TypeDef::new("Member")
                .field("Name", ValueType::String)
                .accessor("DisplayName", None),
            TypeDef::new("Comment")
                .field("Body", ValueType::Text)
                .has_one("Author", "Member"),
        ])
        .unwrap();
        FieldPathResolver::new(Arc::new(catalog))
    }

    fn roots(types: &[(&str, bool)]) -> Vec<(String, TypeOptions)> {
        types
            .iter()
            .map(|(t, c)| {
                (
                    t.to_string(),
                    TypeOptions {
                        include_children: *c,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_direct_field_on_ancestor() {
        let found = resolver().resolve(&roots(&[("Page", false)]), "Title", None, &BTreeMap::new());
        let spec = &found["SiteTree_Title"];
        assert_eq!(spec.root_type, "SiteTree");
        assert_eq!(spec.origin_type, "SiteTree");
        assert_eq!(spec.entity_type, "SiteTree");
        assert_eq!(spec.value_type, ValueType::Text);
        assert_eq!(spec.lookup_chain.len(), 1);
    }

    #[test]
    fn test_first_match_wins_no_subclass_search() {
        // RedirectPage redeclares Content; the Page match stops the search.
        let found = resolver().resolve(
            &roots(&[("SiteTree", true)]),
            "Content",
            None,
            &BTreeMap::new(),
        );
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["Page_Content"]);
        assert_eq!(found["Page_Content"].value_type, ValueType::Text);
    }

    #[test]
    fn test_relation_path() {
        let found = resolver().resolve(
            &roots(&[("Page", false)]),
            "Author.Name",
            None,
            &BTreeMap::new(),
        );
        let spec = &found["SiteTree_Author_Name"];
        assert_eq!(spec.origin_type, "SiteTree");
        assert_eq!(spec.entity_type, "Member");
        assert_eq!(spec.source_field, "Name");
        assert!(!spec.multi_valued);
        assert_eq!(
            spec.lookup_chain[0].relation(),
            Some(("SiteTree", "Author", "Member"))
        );
    }

    #[test]
    fn test_collection_path_is_multi_valued() {
        let found = resolver().resolve(
            &roots(&[("Page", false)]),
            "Comments.Author.Name",
            None,
            &BTreeMap::new(),
        );
        let spec = &found["Page_Comments_Author_Name"];
        assert!(spec.multi_valued);
        assert_eq!(spec.lookup_chain.len(), 3);
        assert_eq!(spec.root_type, "SiteTree");
    }

    #[test]
    fn test_unresolvable_segment_is_empty() {
        let r = resolver();
        assert!(r
            .resolve(&roots(&[("Page", false)]), "Nope.Name", None, &BTreeMap::new())
            .is_empty());
        assert!(r
            .resolve(&roots(&[("Page", false)]), "Author.Nope", None, &BTreeMap::new())
            .is_empty());
    }

    #[test]
    fn test_accessor_defaults_to_string_and_forced_type() {
        let r = resolver();
        let found = r.resolve(
            &roots(&[("Member", false)]),
            "DisplayName",
            None,
            &BTreeMap::new(),
        );
        let spec = &found["Member_DisplayName"];
        assert_eq!(spec.value_type, ValueType::String);
        assert!(matches!(
            spec.lookup_chain[0],
            LookupStep::DerivedAccessor { .. }
        ));

        let forced = r.resolve(
            &roots(&[("Member", false)]),
            "Name",
            Some(ValueType::Text),
            &BTreeMap::new(),
        );
        assert_eq!(forced["Member_Name"].value_type, ValueType::Text);
    }

    #[test]
    fn test_inherited_relation_not_walked_twice() {
        // Author is declared on SiteTree only; with children included the
        // Page and RedirectPage branches must not add duplicate chains.
        let found = resolver().resolve(
            &roots(&[("SiteTree", true)]),
            "Author.Name",
            None,
            &BTreeMap::new(),
        );
        assert_eq!(found.len(), 1);
    }
}
