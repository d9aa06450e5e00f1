//! Resolved index fields and derived-field groups.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use reindex_types::{field_key, ValueType};

use crate::lookup::LookupStep;

/// A declared index field resolved against one root type.
///
/// Identity is `(root_type, full_field_name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Index field name; equal to `full_field_name`
    pub name: String,
    /// Terminal field name (last path segment)
    pub source_field: String,
    /// `origin + "_" + path with dots as underscores`
    pub full_field_name: String,
    /// Base type of the root entities this field lives on
    pub root_type: String,
    /// Type the path starts from (first relation owner, or the field's type)
    pub origin_type: String,
    /// Type that exposes the terminal field
    pub entity_type: String,
    pub lookup_chain: Vec<LookupStep>,
    pub value_type: ValueType,
    /// True once the chain crosses a to-many relation
    pub multi_valued: bool,
    #[serde(default)]
    pub extra_options: BTreeMap<String, Value>,
}

impl FieldSpec {
    /// `(root_type, full_field_name)`
    pub fn identity(&self) -> (&str, &str) {
        (&self.root_type, &self.full_field_name)
    }

    /// `"Type:field"` key compared against a write's changed fields.
    pub fn changed_key(&self) -> String {
        field_key(&self.entity_type, &self.source_field)
    }

    /// True when the chain crosses at least one relation.
    pub fn is_relation_derived(&self) -> bool {
        self.lookup_chain.iter().any(LookupStep::is_relation)
    }
}

/// Fields sharing one relation path from one root type.
///
/// Used to answer "which root entities are affected when type X field F
/// changes" by walking [`derivation_chain`](Self::derivation_chain)
/// backward from the changed entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedFieldGroup {
    /// Base type of the root entities
    pub root_type: String,
    /// Shared chain, terminal step removed, root to leaf
    pub chain: Vec<LookupStep>,
    /// Reversed `chain`: walks from the changed entity to the root
    pub derivation_chain: Vec<LookupStep>,
    /// `"Type:field"` keys of every field in the group
    pub fields: BTreeSet<String>,
    /// Types exposing those fields, no type listed with its ancestor
    pub entity_types: Vec<String>,
}

impl DerivedFieldGroup {
    /// Key the group is stored under.
    pub fn key(&self) -> (String, Vec<LookupStep>) {
        (self.root_type.clone(), self.chain.clone())
    }

    /// True when any changed `"Type:field"` key belongs to this group.
    pub fn intersects<'a>(&self, changed: impl IntoIterator<Item = &'a String>) -> bool {
        changed.into_iter().any(|k| self.fields.contains(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(chain: Vec<LookupStep>) -> FieldSpec {
        FieldSpec {
            name: "Page_Author_Name".to_string(),
            source_field: "Name".to_string(),
            full_field_name: "Page_Author_Name".to_string(),
            root_type: "SiteTree".to_string(),
            origin_type: "Page".to_string(),
            entity_type: "Member".to_string(),
            lookup_chain: chain,
            value_type: ValueType::String,
            multi_valued: false,
            extra_options: BTreeMap::new(),
        }
    }

    #[test]
    fn test_changed_key_uses_entity_type() {
        let s = spec(Vec::new());
        assert_eq!(s.changed_key(), "Member:Name");
        assert_eq!(s.identity(), ("SiteTree", "Page_Author_Name"));
    }

    #[test]
    fn test_relation_derived() {
        let direct = spec(vec![LookupStep::Property {
            type_name: "Page".to_string(),
            field: "Title".to_string(),
        }]);
        assert!(!direct.is_relation_derived());

        let derived = spec(vec![
            LookupStep::SingularRelation {
                owner: "Page".to_string(),
                relation: "Author".to_string(),
                foreign_key: "AuthorID".to_string(),
                target: "Member".to_string(),
            },
            LookupStep::Property {
                type_name: "Member".to_string(),
                field: "Name".to_string(),
            },
        ]);
        assert!(derived.is_relation_derived());
    }

    #[test]
    fn test_group_intersects() {
        let group = DerivedFieldGroup {
            root_type: "SiteTree".to_string(),
            chain: Vec::new(),
            derivation_chain: Vec::new(),
            fields: ["Member:Name".to_string()].into_iter().collect(),
            entity_types: vec!["Member".to_string()],
        };
        let changed = ["Member:Email".to_string(), "Member:Name".to_string()];
        assert!(group.intersects(changed.iter()));
        assert!(!group.intersects(["Member:Email".to_string()].iter()));
    }
}
