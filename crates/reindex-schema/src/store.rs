//! Entity store collaborator interface.
//!
//! Every query takes the variant state it runs under explicitly. Stores
//! that depend on ambient state are expected to activate it themselves
//! through a [`StateGuard`](reindex_variants::StateGuard).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use reindex_types::{EntityCatalog, EntityId, Stripe, VariantStateVector};

use crate::error::StoreError;

/// A persisted entity as seen in one variant state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Concrete type
    pub type_name: String,
    /// Column values, including foreign keys (`AuthorID`, ...)
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

impl Entity {
    pub fn new(id: EntityId, type_name: impl Into<String>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }
}

/// Queryable persisted-entity store.
pub trait EntityStore: Send + Sync {
    fn catalog(&self) -> &dyn EntityCatalog;

    /// Entities of `type_name` (or a subtype) with the given ids that exist
    /// in `state`. Missing ids are simply absent from the result.
    fn get_by_ids(
        &self,
        type_name: &str,
        ids: &BTreeSet<EntityId>,
        state: &VariantStateVector,
    ) -> Result<Vec<Entity>, StoreError>;

    fn get_by_id(
        &self,
        type_name: &str,
        id: EntityId,
        state: &VariantStateVector,
    ) -> Result<Option<Entity>, StoreError> {
        let ids = BTreeSet::from([id]);
        Ok(self.get_by_ids(type_name, &ids, state)?.into_iter().next())
    }

    /// Ids of `owner_type` entities whose `relation` points at any of
    /// `target_ids`.
    fn query_ids_by_relation(
        &self,
        owner_type: &str,
        relation: &str,
        target_ids: &BTreeSet<EntityId>,
        state: &VariantStateVector,
    ) -> Result<BTreeSet<EntityId>, StoreError>;

    /// Entities `relation` of `entity` points at.
    fn follow_relation(
        &self,
        entity: &Entity,
        relation: &str,
        state: &VariantStateVector,
    ) -> Result<Vec<Entity>, StoreError>;

    /// Evaluate a computed accessor on `entity`.
    fn call_accessor(
        &self,
        entity: &Entity,
        accessor: &str,
        state: &VariantStateVector,
    ) -> Result<Value, StoreError>;

    /// Number of `type_name` entities (subtypes included) in `state`.
    fn count(&self, type_name: &str, state: &VariantStateVector) -> Result<u64, StoreError>;

    /// Entities of `type_name` in `state` whose id falls in `stripe`,
    /// ordered by id.
    fn iterate_striped(
        &self,
        type_name: &str,
        stripe: Stripe,
        state: &VariantStateVector,
    ) -> Result<Vec<Entity>, StoreError>;
}
