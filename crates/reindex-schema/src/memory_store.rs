//! In-memory entity store.
//!
//! Each record is stored under the partial state it exists in (e.g.
//! `{stage: Live}`); a record is visible from a query state when every
//! dimension the record carries either matches or is absent from the
//! query. Records are keyed by base type, so a `Member` and a `File`
//! may share an id. Used by the CLI fixtures and throughout the tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use reindex_types::{EntityCatalog, EntityId, RelationKind, Stripe, VariantStateVector};

use crate::error::StoreError;
use crate::store::{Entity, EntityStore};

/// Computed accessor: entity -> value, or an error message.
pub type AccessorFn = Arc<dyn Fn(&Entity) -> Result<Value, String> + Send + Sync>;

#[derive(Debug, Clone)]
struct Record {
    entity: Entity,
    state: VariantStateVector,
}

fn visible(record: &VariantStateVector, query: &VariantStateVector) -> bool {
    record
        .iter()
        .all(|(dim, value)| query.get(dim).map_or(true, |v| v == value))
}

/// `(base type, id, state key)`
type RecordKey = (String, EntityId, String);

/// Thread-safe in-memory [`EntityStore`].
pub struct InMemoryEntityStore {
    catalog: Arc<dyn EntityCatalog>,
    records: RwLock<BTreeMap<RecordKey, Record>>,
    joins: RwLock<BTreeMap<String, BTreeSet<(EntityId, EntityId)>>>,
    accessors: RwLock<BTreeMap<(String, String), AccessorFn>>,
    /// Base type -> state key (`None` for every state) that fails queries
    unavailable: RwLock<BTreeMap<String, Option<String>>>,
    relation_queries: AtomicUsize,
}

impl InMemoryEntityStore {
    pub fn new(catalog: Arc<dyn EntityCatalog>) -> Self {
        Self {
            catalog,
            records: RwLock::new(BTreeMap::new()),
            joins: RwLock::new(BTreeMap::new()),
            accessors: RwLock::new(BTreeMap::new()),
            unavailable: RwLock::new(BTreeMap::new()),
            relation_queries: AtomicUsize::new(0),
        }
    }

    /// Insert or replace `entity` in `state`.
    pub fn put(&self, entity: Entity, state: VariantStateVector) {
        let key = (
            self.catalog.base_type(&entity.type_name),
            entity.id,
            state.state_key(),
        );
        self.records
            .write()
            .unwrap()
            .insert(key, Record { entity, state });
    }

    /// Remove the `type_name` #`id` copy stored in exactly `state`.
    pub fn remove(&self, type_name: &str, id: EntityId, state: &VariantStateVector) -> bool {
        let key = (self.catalog.base_type(type_name), id, state.state_key());
        self.records.write().unwrap().remove(&key).is_some()
    }

    /// Remove every copy of `type_name` #`id`.
    pub fn remove_all(&self, type_name: &str, id: EntityId) -> usize {
        let base = self.catalog.base_type(type_name);
        let mut records = self.records.write().unwrap();
        let before = records.len();
        records.retain(|(rbase, rid, _), _| !(*rid == id && *rbase == base));
        before - records.len()
    }

    /// Fail every query for `type_name`'s base type, in `state` only or in
    /// all states.
    pub fn set_unavailable(&self, type_name: &str, state: Option<&VariantStateVector>) {
        self.unavailable.write().unwrap().insert(
            self.catalog.base_type(type_name),
            state.map(VariantStateVector::state_key),
        );
    }

    pub fn clear_unavailable(&self) {
        self.unavailable.write().unwrap().clear();
    }

    fn check_available(&self, type_name: &str, state: &VariantStateVector) -> Result<(), StoreError> {
        let base = self.catalog.base_type(type_name);
        match self.unavailable.read().unwrap().get(&base) {
            Some(None) => Err(StoreError::Backend(format!("{} unavailable", base))),
            Some(Some(key)) if *key == state.state_key() => Err(StoreError::Backend(format!(
                "{} unavailable in {}",
                base, state
            ))),
            _ => Ok(()),
        }
    }

    /// Add a row to a many-many join table.
    pub fn link(&self, join_table: &str, local: EntityId, remote: EntityId) {
        self.joins
            .write()
            .unwrap()
            .entry(join_table.to_string())
            .or_default()
            .insert((local, remote));
    }

    pub fn unlink(&self, join_table: &str, local: EntityId, remote: EntityId) {
        if let Some(rows) = self.joins.write().unwrap().get_mut(join_table) {
            rows.remove(&(local, remote));
        }
    }

    /// Register a computed accessor for `type_name` and its subtypes.
    pub fn register_accessor(
        &self,
        type_name: &str,
        accessor: &str,
        f: impl Fn(&Entity) -> Result<Value, String> + Send + Sync + 'static,
    ) {
        self.accessors
            .write()
            .unwrap()
            .insert((type_name.to_string(), accessor.to_string()), Arc::new(f));
    }

    /// Number of relation queries served so far.
    pub fn relation_query_count(&self) -> usize {
        self.relation_queries.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(
        &self,
        type_name: &str,
        state: &VariantStateVector,
        filter: impl Fn(&Entity) -> bool,
    ) -> Vec<Entity> {
        let records = self.records.read().unwrap();
        let mut seen = BTreeSet::new();
        records
            .iter()
            .filter(|(_, r)| visible(&r.state, state))
            .filter(|(_, r)| self.catalog.is_a(&r.entity.type_name, type_name))
            .filter(|(_, r)| filter(&r.entity))
            .filter(|((base, id, _), _)| seen.insert((base.clone(), *id)))
            .map(|(_, r)| r.entity.clone())
            .collect()
    }

    fn join_rows(&self, table: &str) -> BTreeSet<(EntityId, EntityId)> {
        self.joins
            .read()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn relation_def(
        &self,
        type_name: &str,
        relation: &str,
    ) -> Result<reindex_types::RelationDef, StoreError> {
        self.catalog
            .relation(type_name, relation)
            .map(|(_, def)| def.clone())
            .ok_or_else(|| StoreError::UnknownRelation {
                type_name: type_name.to_string(),
                relation: relation.to_string(),
            })
    }
}

fn id_of(value: Option<&Value>) -> Option<EntityId> {
    value.and_then(Value::as_u64)
}

impl EntityStore for InMemoryEntityStore {
    fn catalog(&self) -> &dyn EntityCatalog {
        self.catalog.as_ref()
    }

    fn get_by_ids(
        &self,
        type_name: &str,
        ids: &BTreeSet<EntityId>,
        state: &VariantStateVector,
    ) -> Result<Vec<Entity>, StoreError> {
        if !self.catalog.contains(type_name) {
            return Err(StoreError::UnknownType(type_name.to_string()));
        }
        self.check_available(type_name, state)?;
        Ok(self.select(type_name, state, |e| ids.contains(&e.id)))
    }

    fn query_ids_by_relation(
        &self,
        owner_type: &str,
        relation: &str,
        target_ids: &BTreeSet<EntityId>,
        state: &VariantStateVector,
    ) -> Result<BTreeSet<EntityId>, StoreError> {
        self.relation_queries.fetch_add(1, Ordering::SeqCst);
        self.check_available(owner_type, state)?;
        let def = self.relation_def(owner_type, relation)?;

        let ids = match def.kind {
            RelationKind::HasOne => self
                .select(owner_type, state, |e| {
                    id_of(e.get(&def.foreign_key)).map_or(false, |t| target_ids.contains(&t))
                })
                .into_iter()
                .map(|e| e.id)
                .collect(),
            RelationKind::HasMany => {
                let candidates: BTreeSet<EntityId> = self
                    .select(&def.target, state, |e| target_ids.contains(&e.id))
                    .iter()
                    .filter_map(|e| id_of(e.get(&def.foreign_key)))
                    .collect();
                self.get_by_ids(owner_type, &candidates, state)?
                    .into_iter()
                    .map(|e| e.id)
                    .collect()
            }
            RelationKind::ManyMany => {
                let table = def.join.as_ref().map(|j| j.table.as_str()).unwrap_or_default();
                let candidates: BTreeSet<EntityId> = self
                    .join_rows(table)
                    .into_iter()
                    .filter(|(_, remote)| target_ids.contains(remote))
                    .map(|(local, _)| local)
                    .collect();
                self.get_by_ids(owner_type, &candidates, state)?
                    .into_iter()
                    .map(|e| e.id)
                    .collect()
            }
        };
        Ok(ids)
    }

    fn follow_relation(
        &self,
        entity: &Entity,
        relation: &str,
        state: &VariantStateVector,
    ) -> Result<Vec<Entity>, StoreError> {
        let def = self.relation_def(&entity.type_name, relation)?;
        match def.kind {
            RelationKind::HasOne => match id_of(entity.get(&def.foreign_key)) {
                Some(target) => self.get_by_ids(&def.target, &BTreeSet::from([target]), state),
                None => Ok(Vec::new()),
            },
            RelationKind::HasMany => Ok(self.select(&def.target, state, |e| {
                id_of(e.get(&def.foreign_key)) == Some(entity.id)
            })),
            RelationKind::ManyMany => {
                let table = def.join.as_ref().map(|j| j.table.as_str()).unwrap_or_default();
                let targets: BTreeSet<EntityId> = self
                    .join_rows(table)
                    .into_iter()
                    .filter(|(local, _)| *local == entity.id)
                    .map(|(_, remote)| remote)
                    .collect();
                self.get_by_ids(&def.target, &targets, state)
            }
        }
    }

    fn call_accessor(
        &self,
        entity: &Entity,
        accessor: &str,
        _state: &VariantStateVector,
    ) -> Result<Value, StoreError> {
        let accessors = self.accessors.read().unwrap();
        let f = self
            .catalog
            .ancestry(&entity.type_name)
            .into_iter()
            .rev()
            .find_map(|t| accessors.get(&(t, accessor.to_string())).cloned());

        match f {
            Some(f) => f(entity).map_err(|message| StoreError::Accessor {
                type_name: entity.type_name.clone(),
                accessor: accessor.to_string(),
                message,
            }),
            // Unregistered accessors fall back to a stored value
            None => Ok(entity.get(accessor).cloned().unwrap_or(Value::Null)),
        }
    }

    fn count(&self, type_name: &str, state: &VariantStateVector) -> Result<u64, StoreError> {
        self.check_available(type_name, state)?;
        Ok(self.select(type_name, state, |_| true).len() as u64)
    }

    fn iterate_striped(
        &self,
        type_name: &str,
        stripe: Stripe,
        state: &VariantStateVector,
    ) -> Result<Vec<Entity>, StoreError> {
        self.check_available(type_name, state)?;
        let mut entities = self.select(type_name, state, |e| stripe.contains(e.id));
        entities.sort_by_key(|e| e.id);
        Ok(entities)
    }
}
