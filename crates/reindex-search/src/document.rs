//! Mapping [`IndexDocument`]s onto the Tantivy schema.

use tantivy::TantivyDocument;

use reindex_types::{FieldRole, IndexDocument};

use crate::schema::{pair_token, DocumentSchema};

/// Convert an index document to a Tantivy document.
///
/// Fulltext fields are concatenated into `_text`. Filter and sort fields
/// become `name=value` tokens; fulltext fields are not filterable here.
pub fn to_tantivy_doc(schema: &DocumentSchema, doc: &IndexDocument) -> TantivyDocument {
    let mut out = TantivyDocument::default();

    out.add_text(schema.doc_id, &doc.id);
    out.add_u64(schema.entity_id, doc.entity_id);
    out.add_text(schema.root_type, &doc.root_type);
    out.add_text(schema.class_name, &doc.class_name);
    for class in &doc.class_hierarchy {
        out.add_text(schema.class_hierarchy, class);
    }

    out.add_text(schema.state_key, doc.state.state_key());
    for (dimension, value) in doc.state.iter() {
        out.add_text(schema.state, pair_token(dimension, &value.as_text()));
        out.add_text(schema.state_dims, dimension);
    }

    out.add_text(schema.text, doc.fulltext());

    for (name, field) in &doc.fields {
        if field.role == FieldRole::Fulltext || field.values.is_empty() {
            continue;
        }
        out.add_text(schema.filter_fields, name);
        for value in &field.values {
            out.add_text(schema.filter, pair_token(name, &value.as_text()));
        }
    }

    out
}
