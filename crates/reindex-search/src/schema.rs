//! Tantivy schema for reindexed documents.
//!
//! Every index shares one fixed schema. Declared index fields are folded
//! into three generic fields:
//! - `_text`: all fulltext values, tokenized
//! - `_filter`: `name=value` tokens for filter and sort fields
//! - `_filter_fields`: names of the filter fields a document has a value for
//!
//! Variant state is stored the same way (`_state` holds `dim=value`,
//! `_state_dims` holds dimension names) so "same value or dimension
//! absent" can be expressed as a boolean query.

use tantivy::schema::{Field, Schema, FAST, INDEXED, STORED, STRING, TEXT};

use crate::SearchError;

pub const DOC_ID: &str = "_doc_id";
pub const ENTITY_ID: &str = "_entity_id";
pub const ROOT_TYPE: &str = "_root_type";
pub const CLASS_NAME: &str = "_class_name";
pub const CLASS_HIERARCHY: &str = "_class_hierarchy";
pub const STATE_KEY: &str = "_state_key";
pub const STATE: &str = "_state";
pub const STATE_DIMS: &str = "_state_dims";
pub const TEXT_FIELD: &str = "_text";
pub const FILTER: &str = "_filter";
pub const FILTER_FIELDS: &str = "_filter_fields";

/// `name=value` token used by `_filter` and `_state`.
pub fn pair_token(name: &str, value: &str) -> String {
    format!("{}={}", name, value)
}

/// Schema field handles for efficient access
#[derive(Debug, Clone)]
pub struct DocumentSchema {
    schema: Schema,
    /// Primary key (STRING | STORED)
    pub doc_id: Field,
    /// Entity id (INDEXED | STORED | FAST), used for stripe deletes
    pub entity_id: Field,
    pub root_type: Field,
    pub class_name: Field,
    /// Multi-valued: every type in the class hierarchy (STRING)
    pub class_hierarchy: Field,
    pub state_key: Field,
    pub state: Field,
    pub state_dims: Field,
    /// Searchable text (TEXT)
    pub text: Field,
    pub filter: Field,
    pub filter_fields: Field,
}

impl DocumentSchema {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Recover field handles from an existing index schema.
    pub fn from_schema(schema: Schema) -> Result<Self, SearchError> {
        let get = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| SearchError::SchemaMismatch(format!("missing {} field", name)))
        };
        Ok(Self {
            doc_id: get(DOC_ID)?,
            entity_id: get(ENTITY_ID)?,
            root_type: get(ROOT_TYPE)?,
            class_name: get(CLASS_NAME)?,
            class_hierarchy: get(CLASS_HIERARCHY)?,
            state_key: get(STATE_KEY)?,
            state: get(STATE)?,
            state_dims: get(STATE_DIMS)?,
            text: get(TEXT_FIELD)?,
            filter: get(FILTER)?,
            filter_fields: get(FILTER_FIELDS)?,
            schema,
        })
    }
}

/// Build the document schema.
pub fn build_document_schema() -> DocumentSchema {
    let mut builder = Schema::builder();

    let doc_id = builder.add_text_field(DOC_ID, STRING | STORED);
    let entity_id = builder.add_u64_field(ENTITY_ID, INDEXED | STORED | FAST);
    let root_type = builder.add_text_field(ROOT_TYPE, STRING | STORED);
    let class_name = builder.add_text_field(CLASS_NAME, STRING | STORED);
    let class_hierarchy = builder.add_text_field(CLASS_HIERARCHY, STRING);
    let state_key = builder.add_text_field(STATE_KEY, STRING | STORED);
    let state = builder.add_text_field(STATE, STRING);
    let state_dims = builder.add_text_field(STATE_DIMS, STRING);
    let text = builder.add_text_field(TEXT_FIELD, TEXT);
    let filter = builder.add_text_field(FILTER, STRING);
    let filter_fields = builder.add_text_field(FILTER_FIELDS, STRING);

    let schema = builder.build();

    DocumentSchema {
        schema,
        doc_id,
        entity_id,
        root_type,
        class_name,
        class_hierarchy,
        state_key,
        state,
        state_dims,
        text,
        filter,
        filter_fields,
    }
}
