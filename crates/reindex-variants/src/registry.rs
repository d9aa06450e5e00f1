//! Registry of active state dimensions.
//!
//! The registry is the only way callers touch global variant state. Code
//! that must read or write under a specific state takes a [`StateGuard`],
//! which restores the previously current state when dropped.

use std::sync::Arc;

use tracing::{debug, warn};

use reindex_types::{EntityCatalog, SearchQuery, TableDelta, VariantStateVector, WriteDescriptor};

use crate::combinations::Combinations;
use crate::dimension::{Dimension, VariantField};
use crate::error::VariantError;

/// Explicitly populated set of [`Dimension`] plugins.
pub struct VariantRegistry {
    catalog: Arc<dyn EntityCatalog>,
    dimensions: Vec<Arc<dyn Dimension>>,
}

impl VariantRegistry {
    pub fn new(catalog: Arc<dyn EntityCatalog>) -> Self {
        Self {
            catalog,
            dimensions: Vec::new(),
        }
    }

    /// Register a dimension. Identifiers must be unique.
    pub fn register(&mut self, dimension: Arc<dyn Dimension>) -> Result<(), VariantError> {
        if self.dimensions.iter().any(|d| d.id() == dimension.id()) {
            return Err(VariantError::DuplicateDimension(dimension.id().to_string()));
        }
        debug!(dimension = dimension.id(), "Registered variant dimension");
        self.dimensions.push(dimension);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_dimension(mut self, dimension: Arc<dyn Dimension>) -> Result<Self, VariantError> {
        self.register(dimension)?;
        Ok(self)
    }

    pub fn catalog(&self) -> &Arc<dyn EntityCatalog> {
        &self.catalog
    }

    pub fn dimension(&self, id: &str) -> Result<&Arc<dyn Dimension>, VariantError> {
        self.dimensions
            .iter()
            .find(|d| d.id() == id)
            .ok_or_else(|| VariantError::UnknownDimension(id.to_string()))
    }

    /// Dimensions active in this environment, optionally limited to those
    /// applying to `type_name`.
    pub fn active_dimensions(
        &self,
        type_name: Option<&str>,
        include_subtypes: bool,
    ) -> Vec<Arc<dyn Dimension>> {
        self.dimensions
            .iter()
            .filter(|d| d.applies_to_environment())
            .filter(|d| match type_name {
                Some(t) => d.applies_to(self.catalog.as_ref(), t, include_subtypes),
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Current value of every dimension relevant to `type_name` (all
    /// active dimensions when `None`).
    pub fn current_state(&self, type_name: Option<&str>) -> VariantStateVector {
        self.active_dimensions(type_name, true)
            .iter()
            .map(|d| (d.id().to_string(), d.current_value()))
            .collect()
    }

    /// Make every entry of `state` current.
    ///
    /// Dimensions missing from `state` keep their value. Pair every call
    /// with a restore; prefer [`activate_scoped`](Self::activate_scoped).
    pub fn activate_state(&self, state: &VariantStateVector) -> Result<(), VariantError> {
        for (id, value) in state.iter() {
            let dimension = self.dimension(id)?;
            if dimension.applies_to_environment() {
                dimension.activate(value)?;
            }
        }
        Ok(())
    }

    /// Save the full current state; it is restored when the guard drops.
    pub fn scoped(&self) -> StateGuard<'_> {
        StateGuard {
            registry: self,
            saved: self.current_state(None),
        }
    }

    /// Save the current state, then activate `state`.
    pub fn activate_scoped(
        &self,
        state: &VariantStateVector,
    ) -> Result<StateGuard<'_>, VariantError> {
        let guard = self.scoped();
        self.activate_state(state)?;
        Ok(guard)
    }

    /// Every state combination a full reindex of `type_name` must visit.
    pub fn reindex_states(&self, type_name: Option<&str>, include_subtypes: bool) -> Combinations {
        let axes = self
            .active_dimensions(type_name, include_subtypes)
            .iter()
            .map(|d| (d.id().to_string(), d.all_values_for_reindex()))
            .collect();
        Combinations::new(axes)
    }

    /// Filter fields contributed to an index covering `type_name`.
    pub fn variant_fields(&self, type_name: &str, include_subtypes: bool) -> Vec<VariantField> {
        self.dimensions
            .iter()
            .filter(|d| d.applies_to_environment())
            .filter_map(|d| d.alter_definition(self.catalog.as_ref(), type_name, include_subtypes))
            .collect()
    }

    /// Let every dimension relevant to `classes` restrict a read query.
    pub fn alter_query(&self, query: &mut SearchQuery, classes: &[String]) {
        for dimension in self.active_dimensions(None, true) {
            if classes
                .iter()
                .any(|c| dimension.applies_to(self.catalog.as_ref(), c, true))
            {
                dimension.alter_read_query(query);
            }
        }
    }

    pub fn alter_write_extraction(&self, delta: &mut TableDelta) {
        for dimension in self.active_dimensions(None, true) {
            dimension.alter_write_extraction(self.catalog.as_ref(), delta);
        }
    }

    pub fn expand_write_states(&self, write: &mut WriteDescriptor) {
        for dimension in self.active_dimensions(None, true) {
            dimension.expand_write_states(self.catalog.as_ref(), write);
        }
    }
}

/// Restores a saved variant state on drop.
///
/// Restore failures are logged; they can only happen if a dimension
/// rejects its own previous value.
#[must_use = "the previous state is restored as soon as the guard is dropped"]
pub struct StateGuard<'a> {
    registry: &'a VariantRegistry,
    saved: VariantStateVector,
}

impl StateGuard<'_> {
    /// State that will be restored.
    pub fn saved(&self) -> &VariantStateVector {
        &self.saved
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.registry.activate_state(&self.saved) {
            warn!(state = %self.saved, error = %e, "Failed to restore variant state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::{PartitionDimension, StageDimension};
    use pretty_assertions::assert_eq;
    use reindex_types::{FilterValue, SchemaCatalog, TypeDef, ValueType};

    fn registry() -> VariantRegistry {
        let catalog = SchemaCatalog::new(vec![
            TypeDef::new("SiteTree")
                .field("Title", ValueType::Text)
                .marker("versioned")
                .marker("partitioned"),
            TypeDef::new("Page").extends("SiteTree"),
            TypeDef::new("File").field("Name", ValueType::String),
        ])
        .unwrap();
        VariantRegistry::new(Arc::new(catalog))
            .with_dimension(Arc::new(StageDimension::new()))
            .unwrap()
            .with_dimension(Arc::new(PartitionDimension::new(vec![1, 2])))
            .unwrap()
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = registry();
        let err = registry
            .register(Arc::new(StageDimension::new()))
            .unwrap_err();
        assert!(matches!(err, VariantError::DuplicateDimension(_)));
    }

    #[test]
    fn test_reindex_states_cartesian() {
        let registry = registry();
        let states: Vec<_> = registry.reindex_states(Some("Page"), false).collect();
        // 2 stages x (partitions 1, 2 and default 0)
        assert_eq!(states.len(), 6);

        let file_states: Vec<_> = registry.reindex_states(Some("File"), false).collect();
        assert_eq!(file_states, vec![VariantStateVector::new()]);
    }

    #[test]
    fn test_scoped_guard_restores() {
        let registry = registry();
        let before = registry.current_state(None);

        {
            let live = VariantStateVector::new().with("stage", "Live").with("partition", 2);
            let _guard = registry.activate_scoped(&live).unwrap();
            assert_eq!(registry.current_state(None), live);
        }

        assert_eq!(registry.current_state(None), before);
    }

    #[test]
    fn test_nested_guards_restore_in_order() {
        let registry = registry();
        let before = registry.current_state(None);
        {
            let _outer = registry
                .activate_scoped(&VariantStateVector::new().with("stage", "Live"))
                .unwrap();
            {
                let _inner = registry
                    .activate_scoped(&VariantStateVector::new().with("partition", 1))
                    .unwrap();
            }
            assert_eq!(
                registry.current_state(None).get("stage"),
                Some(&reindex_types::StateValue::from("Live"))
            );
            assert_eq!(registry.current_state(None).get("partition"), before.get("partition"));
        }
        assert_eq!(registry.current_state(None), before);
    }

    #[test]
    fn test_unknown_dimension_in_state() {
        let registry = registry();
        let err = registry
            .activate_state(&VariantStateVector::new().with("locale", "en"))
            .unwrap_err();
        assert!(matches!(err, VariantError::UnknownDimension(d) if d == "locale"));
    }

    #[test]
    fn test_current_state_for_unrelated_type_is_empty() {
        let registry = registry();
        assert!(registry.current_state(Some("File")).is_empty());
        assert_eq!(registry.current_state(Some("Page")).len(), 2);
    }

    #[test]
    fn test_alter_query_only_for_relevant_classes() {
        let registry = registry();
        let mut query = SearchQuery::new();
        registry.alter_query(&mut query, &["File".to_string()]);
        assert!(!query.is_filtered());

        registry.alter_query(&mut query, &["SiteTree".to_string()]);
        assert_eq!(
            query.filters["_versionedstage"],
            vec![FilterValue::value("Stage"), FilterValue::Missing]
        );
        assert!(query.filters.contains_key("_partition"));
    }

    #[test]
    fn test_variant_fields() {
        let registry = registry();
        let names: Vec<_> = registry
            .variant_fields("Page", false)
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["_versionedstage", "_partition"]);
        assert!(registry.variant_fields("File", true).is_empty());
    }
}
