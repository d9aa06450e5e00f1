//! The `Dimension` plugin interface.
//!
//! A dimension is one orthogonal axis of entity state (draft/live,
//! tenant partition, ...). Each dimension owns a slice of process-global
//! "current state" and knows how to enumerate, activate and infer it.

use reindex_types::{
    EntityCatalog, FilterValue, SearchQuery, StateValue, TableDelta, ValueType, WriteDescriptor,
};

use crate::error::VariantError;

/// Filter field a dimension contributes to index definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantField {
    /// Index field name (e.g. `_versionedstage`)
    pub name: String,
    /// Dimension whose current value the field projects
    pub dimension: String,
    pub value_type: ValueType,
}

/// One pluggable axis of entity state.
///
/// Implementations are registered explicitly with a
/// [`VariantRegistry`](crate::VariantRegistry) at startup. Everything takes
/// `&self`; implementations keep their current value behind interior
/// mutability because activation is process-global.
pub trait Dimension: Send + Sync {
    /// Key of this dimension inside a state vector.
    fn id(&self) -> &str;

    /// Whether the dimension is usable in the running environment at all.
    fn applies_to_environment(&self) -> bool {
        true
    }

    /// Whether entities of `type_name` (or, optionally, its subtypes) vary
    /// along this dimension.
    fn applies_to(&self, catalog: &dyn EntityCatalog, type_name: &str, include_subtypes: bool)
        -> bool;

    fn current_value(&self) -> StateValue;

    /// Every value a full reindex must visit.
    fn all_values_for_reindex(&self) -> Vec<StateValue>;

    /// Make `value` the current value.
    fn activate(&self, value: &StateValue) -> Result<(), VariantError>;

    /// Filter field added to indexes covering `type_name`, if any.
    fn alter_definition(
        &self,
        _catalog: &dyn EntityCatalog,
        _type_name: &str,
        _include_subtypes: bool,
    ) -> Option<VariantField> {
        None
    }

    /// Restrict a read query to documents visible in the current state.
    fn alter_read_query(&self, _query: &mut SearchQuery) {}

    /// Annotate a raw table delta with this dimension's value and normalize
    /// its declared type when the physical table differs from the type.
    fn alter_write_extraction(&self, _catalog: &dyn EntityCatalog, _delta: &mut TableDelta) {}

    /// Expand a folded write's states into every state it must be
    /// reindexed under.
    fn expand_write_states(&self, _catalog: &dyn EntityCatalog, _write: &mut WriteDescriptor) {}
}

/// Accept the current value or documents that lack the field.
pub(crate) fn current_or_missing(query: &mut SearchQuery, field: &str, current: &StateValue) {
    query.filter(
        field,
        vec![FilterValue::value(current.as_text()), FilterValue::Missing],
    );
}
