//! Draft/published dimension for versioned types.
//!
//! Versioned types keep two copies of every row: the draft in the base
//! table and the published copy in a `_Live` suffixed table. A write to
//! `Page_Live` is a write to `Page` in the `Live` stage.

use std::sync::Mutex;

use reindex_types::{
    EntityCatalog, SearchQuery, StateValue, TableDelta, ValueType,
};

use crate::dimension::{current_or_missing, Dimension, VariantField};
use crate::error::VariantError;

pub const STAGE_DRAFT: &str = "Stage";
pub const STAGE_LIVE: &str = "Live";

const LIVE_SUFFIX: &str = "_Live";

/// Stage dimension: `Stage` (draft) or `Live` (published).
pub struct StageDimension {
    id: String,
    marker: String,
    field: String,
    current: Mutex<String>,
}

impl StageDimension {
    /// Applies to types carrying the `versioned` marker; starts in `Stage`.
    pub fn new() -> Self {
        Self {
            id: "stage".to_string(),
            marker: "versioned".to_string(),
            field: "_versionedstage".to_string(),
            current: Mutex::new(STAGE_DRAFT.to_string()),
        }
    }

    /// Use a different marker to decide which types are versioned.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    fn current(&self) -> String {
        match self.current.lock() {
            Ok(stage) => stage.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Default for StageDimension {
    fn default() -> Self {
        Self::new()
    }
}

impl Dimension for StageDimension {
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
        StateValue::from(self.current())
    }

    fn all_values_for_reindex(&self) -> Vec<StateValue> {
        vec![StateValue::from(STAGE_DRAFT), StateValue::from(STAGE_LIVE)]
    }

    fn activate(&self, value: &StateValue) -> Result<(), VariantError> {
        let stage = match value {
            StateValue::Str(s) if s == STAGE_DRAFT || s == STAGE_LIVE => s.clone(),
            other => {
                return Err(VariantError::InvalidValue {
                    dimension: self.id.clone(),
                    value: other.to_string(),
                })
            }
        };
        match self.current.lock() {
            Ok(mut current) => *current = stage,
            Err(poisoned) => *poisoned.into_inner() = stage,
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
                value_type: ValueType::String,
            })
    }

    fn alter_read_query(&self, query: &mut SearchQuery) {
        current_or_missing(query, &self.field, &self.current_value());
    }

    fn alter_write_extraction(&self, catalog: &dyn EntityCatalog, delta: &mut TableDelta) {
        let (base_table, stage) = match delta.table.strip_suffix(LIVE_SUFFIX) {
            Some(base) => (base.to_string(), STAGE_LIVE),
            None => (delta.table.clone(), STAGE_DRAFT),
        };

        let type_name = match delta
            .declared_type
            .clone()
            .or_else(|| catalog.type_for_table(&base_table))
        {
            Some(t) => t,
            None => return,
        };
        if !self.applies_to(catalog, &type_name, false) {
            return;
        }

        delta.declared_type = Some(type_name);
        delta.state.insert(self.id.clone(), stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reindex_types::{FilterValue, SchemaCatalog, TypeDef, WriteCommand};

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(vec![
            TypeDef::new("SiteTree").marker("versioned"),
            TypeDef::new("Page").extends("SiteTree"),
            TypeDef::new("File"),
        ])
        .unwrap()
    }

    #[test]
    fn test_live_table_sets_stage_and_type() {
        let catalog = catalog();
        let stage = StageDimension::new();
        let mut delta = TableDelta::new("Page_Live", 3, WriteCommand::Update);

        stage.alter_write_extraction(&catalog, &mut delta);

        assert_eq!(delta.declared_type.as_deref(), Some("Page"));
        assert_eq!(delta.state.get("stage"), Some(&StateValue::from("Live")));
    }

    #[test]
    fn test_draft_table_sets_stage() {
        let catalog = catalog();
        let stage = StageDimension::new();
        let mut delta = TableDelta::new("SiteTree", 3, WriteCommand::Update);

        stage.alter_write_extraction(&catalog, &mut delta);

        assert_eq!(delta.state.get("stage"), Some(&StateValue::from("Stage")));
    }

    #[test]
    fn test_unversioned_table_untouched() {
        let catalog = catalog();
        let stage = StageDimension::new();
        let mut delta = TableDelta::new("File", 3, WriteCommand::Insert);

        stage.alter_write_extraction(&catalog, &mut delta);

        assert!(delta.state.is_empty());
        assert!(delta.declared_type.is_none());
    }

    #[test]
    fn test_activate_rejects_unknown_stage() {
        let stage = StageDimension::new();
        assert!(stage.activate(&StateValue::from("Archive")).is_err());
        assert!(stage.activate(&StateValue::Int(1)).is_err());

        stage.activate(&StateValue::from("Live")).unwrap();
        assert_eq!(stage.current_value(), StateValue::from("Live"));
    }

    #[test]
    fn test_read_query_filter() {
        let stage = StageDimension::new();
        stage.activate(&StateValue::from("Live")).unwrap();
        let mut query = SearchQuery::new();
        stage.alter_read_query(&mut query);
        assert_eq!(
            query.filters["_versionedstage"],
            vec![FilterValue::value("Live"), FilterValue::Missing]
        );
    }
}
