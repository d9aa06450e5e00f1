//! Index documents and document identity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::variant::VariantStateVector;
use crate::EntityId;

/// Stable search-engine primary key for an entity in one state.
///
/// Format: `"{id}-{root_type}-{canonical state json}"`. Equal inputs always
/// yield byte-identical ids, which is what lets an add and a later delete
/// target the same document.
pub fn document_id(entity_id: EntityId, root_type: &str, state: &VariantStateVector) -> String {
    format!("{}-{}-{}", entity_id, root_type, state.canonical_json())
}

/// Role a field plays in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    Fulltext,
    Filter,
    Sort,
}

/// A single extracted field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Convert a JSON value, flattening arrays and dropping nulls.
    pub fn from_json(value: &Value) -> Vec<FieldValue> {
        match value {
            Value::Null => Vec::new(),
            Value::Bool(b) => vec![FieldValue::Bool(*b)],
            Value::Number(n) => match n.as_i64() {
                Some(i) => vec![FieldValue::Int(i)],
                None => n.as_f64().map(FieldValue::Float).into_iter().collect(),
            },
            Value::String(s) => vec![FieldValue::Text(s.clone())],
            Value::Array(items) => items.iter().flat_map(FieldValue::from_json).collect(),
            Value::Object(_) => vec![FieldValue::Text(value.to_string())],
        }
    }

    /// Textual form used for fulltext and filter matching.
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Text(s) => s.clone(),
        }
    }
}

/// Values of one declared field on one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentField {
    pub role: FieldRole,
    pub values: Vec<FieldValue>,
}

/// A document ready to be handed to a search engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// See [`document_id`]
    pub id: String,
    pub entity_id: EntityId,
    pub root_type: String,
    /// Concrete type of the entity
    pub class_name: String,
    /// Base-first ancestry of `class_name`
    pub class_hierarchy: Vec<String>,
    pub state: VariantStateVector,
    /// Declared field name -> values
    pub fields: BTreeMap<String, DocumentField>,
}

impl IndexDocument {
    pub fn new(
        entity_id: EntityId,
        root_type: impl Into<String>,
        class_name: impl Into<String>,
        class_hierarchy: Vec<String>,
        state: VariantStateVector,
    ) -> Self {
        let root_type = root_type.into();
        Self {
            id: document_id(entity_id, &root_type, &state),
            entity_id,
            root_type,
            class_name: class_name.into(),
            class_hierarchy,
            state,
            fields: BTreeMap::new(),
        }
    }

    /// Append values to a field, creating it on first use.
    pub fn push_values(&mut self, name: &str, role: FieldRole, values: Vec<FieldValue>) {
        self.fields
            .entry(name.to_string())
            .or_insert_with(|| DocumentField {
                role,
                values: Vec::new(),
            })
            .values
            .extend(values);
    }

    /// True when the document's hierarchy contains `type_name`.
    pub fn is_a(&self, type_name: &str) -> bool {
        self.class_hierarchy.iter().any(|t| t == type_name)
    }

    /// Concatenated text of every fulltext field.
    pub fn fulltext(&self) -> String {
        self.fields
            .values()
            .filter(|f| f.role == FieldRole::Fulltext)
            .flat_map(|f| f.values.iter().map(FieldValue::as_text))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_document_id_is_stable() {
        let a = VariantStateVector::new().with("stage", "Live").with("partition", 0);
        let b = VariantStateVector::new().with("partition", 0).with("stage", "Live");
        assert_eq!(document_id(12, "SiteTree", &a), document_id(12, "SiteTree", &b));
        assert_eq!(
            document_id(12, "SiteTree", &a),
            r#"12-SiteTree-{"partition":0,"stage":"Live"}"#
        );
    }

    #[test]
    fn test_document_id_default_state() {
        assert_eq!(document_id(1, "File", &VariantStateVector::new()), "1-File-{}");
    }

    #[test]
    fn test_from_json_flattens() {
        let values = FieldValue::from_json(&serde_json::json!(["a", 2, null, true]));
        assert_eq!(
            values,
            vec![
                FieldValue::Text("a".to_string()),
                FieldValue::Int(2),
                FieldValue::Bool(true)
            ]
        );
    }

    #[test]
    fn test_fulltext_only_uses_fulltext_fields() {
        let mut doc = IndexDocument::new(
            1,
            "SiteTree",
            "Page",
            vec!["SiteTree".to_string(), "Page".to_string()],
            VariantStateVector::new(),
        );
        doc.push_values("SiteTree_Title", FieldRole::Fulltext, vec![FieldValue::Text("Hello".into())]);
        doc.push_values("SiteTree_Sort", FieldRole::Sort, vec![FieldValue::Int(3)]);
        doc.push_values("Page_Body", FieldRole::Fulltext, vec![FieldValue::Text("world".into())]);

        assert_eq!(doc.fulltext(), "world Hello");
        assert!(doc.is_a("SiteTree"));
        assert!(!doc.is_a("File"));
    }
}
