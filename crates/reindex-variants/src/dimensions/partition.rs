//! Tenant partition dimension.
//!
//! Partitioned types carry a partition column (`PartitionID` by default).
//! Partition `0` is the shared default. A write that does not tell us its
//! partition may be visible from any of them, so it is expanded into every
//! known partition.

use std::collections::BTreeSet;
use std::sync::Mutex;

use reindex_types::{
    EntityCatalog, SearchQuery, StateValue, TableDelta, ValueType, VariantStateVector,
    WriteDescriptor,
};

use crate::dimension::{current_or_missing, Dimension, VariantField};
use crate::error::VariantError;

pub const DEFAULT_PARTITION: i64 = 0;

/// Partition dimension over a fixed set of partition ids.
pub struct PartitionDimension {
    id: String,
    marker: String,
    column: String,
    field: String,
    partitions: BTreeSet<i64>,
    current: Mutex<i64>,
}

impl PartitionDimension {
    /// Known partitions; the default partition is always included.
    pub fn new(partitions: impl IntoIterator<Item = i64>) -> Self {
        let mut partitions: BTreeSet<i64> = partitions.into_iter().collect();
        partitions.insert(DEFAULT_PARTITION);
        Self {
            id: "partition".to_string(),
            marker: "partitioned".to_string(),
            column: "PartitionID".to_string(),
            field: "_partition".to_string(),
            partitions,
            current: Mutex::new(DEFAULT_PARTITION),
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    fn current(&self) -> i64 {
        match self.current.lock() {
            Ok(id) => *id,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn partition_in(&self, write: &WriteDescriptor) -> Option<i64> {
        let suffix = format!(":{}", self.column);
        write
            .fields
            .iter()
            .find(|(key, _)| key.ends_with(&suffix))
            .and_then(|(_, value)| value.as_i64())
    }
}

impl Dimension for PartitionDimension {
    fn id(&self) -> &str {
        &self.id
    }

    fn applies_to(
        &self,
        catalog: &dyn EntityCatalog,
        type_name: &str,
        include_subtypes: bool,
    ) -> bool {
        catalog.has_marker(type_name, &self.marker, include_subtypes)
    }

    fn current_value(&self) -> StateValue {
        StateValue::Int(self.current())
    }

    fn all_values_for_reindex(&self) -> Vec<StateValue> {
        self.partitions.iter().map(|p| StateValue::Int(*p)).collect()
    }

    fn activate(&self, value: &StateValue) -> Result<(), VariantError> {
        let partition = match value {
            StateValue::Int(p) if self.partitions.contains(p) => *p,
            other => {
                return Err(VariantError::InvalidValue {
                    dimension: self.id.clone(),
                    value: other.to_string(),
                })
            }
        };
        match self.current.lock() {
            Ok(mut current) => *current = partition,
            Err(poisoned) => *poisoned.into_inner() = partition,
        }
        Ok(())
    }

    fn alter_definition(
        &self,
        catalog: &dyn EntityCatalog,
        type_name: &str,
        include_subtypes: bool,
    ) -> Option<VariantField> {
        self.applies_to(catalog, type_name, include_subtypes)
            .then(|| VariantField {
                name: self.field.clone(),
                dimension: self.id.clone(),
                value_type: ValueType::Int,
            })
    }

    fn alter_read_query(&self, query: &mut SearchQuery) {
        current_or_missing(query, &self.field, &self.current_value());
    }

    fn alter_write_extraction(&self, catalog: &dyn EntityCatalog, delta: &mut TableDelta) {
        let type_name = match delta
            .declared_type
            .clone()
            .or_else(|| catalog.type_for_table(&delta.table))
        {
            Some(t) => t,
            None => return,
        };
        if !self.applies_to(catalog, &type_name, false) {
            return;
        }
        if let Some(partition) = delta.fields.get(&self.column).and_then(|v| v.as_i64()) {
            delta.state.insert(self.id.clone(), partition);
        }
    }

    fn expand_write_states(&self, catalog: &dyn EntityCatalog, write: &mut WriteDescriptor) {
        if !self.applies_to(catalog, &write.declared_type, false) {
            return;
        }

        let values: Vec<i64> = match self.partition_in(write) {
            Some(partition) => vec![partition],
            None => self.partitions.iter().copied().collect(),
        };

        let mut expanded: Vec<VariantStateVector> = Vec::new();
        for state in &write.states {
            if state.contains(&self.id) {
                if !expanded.contains(state) {
                    expanded.push(state.clone());
                }
                continue;
            }
            for value in &values {
                let next = state.clone().with(self.id.clone(), *value);
                if !expanded.contains(&next) {
                    expanded.push(next);
                }
            }
        }
        write.states = expanded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use reindex_types::{field_key, SchemaCatalog, TypeDef, WriteCommand};

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(vec![
            TypeDef::new("SiteTree").marker("partitioned"),
            TypeDef::new("Member"),
        ])
        .unwrap()
    }

    #[test]
    fn test_default_partition_always_present() {
        let dim = PartitionDimension::new(vec![3, 1]);
        assert_eq!(
            dim.all_values_for_reindex(),
            vec![StateValue::Int(0), StateValue::Int(1), StateValue::Int(3)]
        );
    }

    #[test]
    fn test_write_without_partition_expands_to_all() {
        let catalog = catalog();
        let dim = PartitionDimension::new(vec![1, 2]);
        let mut write = WriteDescriptor::new(
            "SiteTree",
            "SiteTree",
            7,
            VariantStateVector::new().with("stage", "Stage"),
            WriteCommand::Update,
        )
        .with_field(field_key("SiteTree", "Title"), "x");

        dim.expand_write_states(&catalog, &mut write);

        assert_eq!(write.states.len(), 3);
        assert!(write
            .states
            .iter()
            .all(|s| s.get("stage") == Some(&StateValue::from("Stage"))));
    }

    #[test]
    fn test_write_with_partition_field_stays_narrow() {
        let catalog = catalog();
        let dim = PartitionDimension::new(vec![1, 2]);
        let mut write = WriteDescriptor::new(
            "SiteTree",
            "SiteTree",
            7,
            VariantStateVector::new(),
            WriteCommand::Update,
        )
        .with_field(field_key("SiteTree", "PartitionID"), 2);

        dim.expand_write_states(&catalog, &mut write);

        assert_eq!(
            write.states,
            vec![VariantStateVector::new().with("partition", 2)]
        );
    }

    #[test]
    fn test_unpartitioned_type_untouched() {
        let catalog = catalog();
        let dim = PartitionDimension::new(vec![1]);
        let mut write =
            WriteDescriptor::new("Member", "Member", 1, VariantStateVector::new(), WriteCommand::Insert);
        dim.expand_write_states(&catalog, &mut write);
        assert_eq!(write.states, vec![VariantStateVector::new()]);
    }

    #[test]
    fn test_extraction_reads_partition_column() {
        let catalog = catalog();
        let dim = PartitionDimension::new(vec![4]);
        let mut delta =
            TableDelta::new("SiteTree", 1, WriteCommand::Update).with_field("PartitionID", 4);
        dim.alter_write_extraction(&catalog, &mut delta);
        assert_eq!(delta.state.get("partition"), Some(&StateValue::Int(4)));
    }

    #[test]
    fn test_activate_unknown_partition() {
        let dim = PartitionDimension::new(vec![1]);
        assert!(dim.activate(&StateValue::Int(9)).is_err());
        dim.activate(&StateValue::Int(1)).unwrap();
        assert_eq!(dim.current_value(), StateValue::Int(1));
    }
}
