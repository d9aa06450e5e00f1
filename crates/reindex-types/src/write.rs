//! Raw mutations and folded write descriptors.
//!
//! The persistence layer reports one [`Mutation`] per durable write, made of
//! per-physical-table [`TableDelta`]s. Change capture folds the deltas that
//! belong to the same logical entity into a single [`WriteDescriptor`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::variant::VariantStateVector;
use crate::EntityId;

/// Kind of write applied by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteCommand {
    Insert,
    Update,
    Delete,
}

/// Build the `"Type:field"` key used in [`WriteDescriptor::fields`].
pub fn field_key(type_name: &str, field: &str) -> String {
    format!("{}:{}", type_name, field)
}

/// Changes applied to one physical table for one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDelta {
    /// Physical table name (may differ from the logical type, e.g. `Page_Live`)
    pub table: String,

    /// Row id; deltas without one are ignored
    pub id: Option<EntityId>,

    pub command: WriteCommand,

    /// Logical type of the row, when the persistence layer knows it
    #[serde(default)]
    pub declared_type: Option<String>,

    /// Changed column values
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,

    /// Dimension values inferred during capture (filled by dimensions)
    #[serde(default)]
    pub state: VariantStateVector,
}

impl TableDelta {
    pub fn new(table: impl Into<String>, id: EntityId, command: WriteCommand) -> Self {
        Self {
            table: table.into(),
            id: Some(id),
            command,
            declared_type: None,
            fields: BTreeMap::new(),
            state: VariantStateVector::new(),
        }
    }

    pub fn with_declared_type(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_type = Some(declared_type.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }
}

/// One raw mutation event, in the order tables were written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mutation {
    pub deltas: Vec<TableDelta>,
}

impl Mutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delta(mut self, delta: TableDelta) -> Self {
        self.deltas.push(delta);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

/// One logical entity write.
///
/// Invariant: `declared_type` is the most specific type seen among the
/// folded deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteDescriptor {
    /// Base type of the entity's hierarchy
    pub root_type: String,
    /// Most specific type seen
    pub declared_type: String,
    pub entity_id: EntityId,
    /// State the write itself landed in
    pub variant_state: VariantStateVector,
    /// Explicit states this write must be reindexed under.
    ///
    /// Starts as `[variant_state]`; dimensions may expand it.
    pub states: Vec<VariantStateVector>,
    /// Changed values keyed `"Type:field"`
    pub fields: BTreeMap<String, Value>,
    pub command: WriteCommand,
}

impl WriteDescriptor {
    pub fn new(
        root_type: impl Into<String>,
        declared_type: impl Into<String>,
        entity_id: EntityId,
        variant_state: VariantStateVector,
        command: WriteCommand,
    ) -> Self {
        Self {
            root_type: root_type.into(),
            declared_type: declared_type.into(),
            entity_id,
            states: vec![variant_state.clone()],
            variant_state,
            fields: BTreeMap::new(),
            command,
        }
    }

    /// Key used to fold table deltas: `(id, root type, canonical state)`.
    pub fn fold_key(&self) -> (EntityId, String, String) {
        (
            self.entity_id,
            self.root_type.clone(),
            self.variant_state.state_key(),
        )
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Changed `"Type:field"` keys.
    pub fn changed_fields(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn is_delete(&self) -> bool {
        self.command == WriteCommand::Delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_key_format() {
        assert_eq!(field_key("Page", "Title"), "Page:Title");
    }

    #[test]
    fn test_write_descriptor_initial_states() {
        let state = VariantStateVector::new().with("stage", "Stage");
        let write = WriteDescriptor::new("SiteTree", "Page", 4, state.clone(), WriteCommand::Update);

        assert_eq!(write.states, vec![state.clone()]);
        assert_eq!(
            write.fold_key(),
            (4, "SiteTree".to_string(), state.state_key())
        );
        assert!(!write.is_delete());
    }

    #[test]
    fn test_delta_builder() {
        let delta = TableDelta::new("Page_Live", 9, WriteCommand::Update)
            .with_declared_type("Page")
            .with_field("Title", "Hello");

        assert_eq!(delta.id, Some(9));
        assert_eq!(delta.declared_type.as_deref(), Some("Page"));
        assert_eq!(delta.fields.get("Title"), Some(&Value::from("Hello")));
    }

    #[test]
    fn test_command_serialization() {
        let json = serde_json::to_string(&WriteCommand::Delete).unwrap();
        assert_eq!(json, "\"delete\"");
    }
}
