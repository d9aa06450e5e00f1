//! Dirty tuples and their deduplicated accumulation.
//!
//! Work is grouped by `(root type, canonical state)`; within a group each
//! entity id carries the *set* of index names that need it, so a tuple
//! referenced by many indexes is stored once.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::variant::VariantStateVector;
use crate::EntityId;

/// One unit of required reindex work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DirtyTuple {
    pub index_name: String,
    pub root_type: String,
    pub entity_id: EntityId,
    pub variant_state: VariantStateVector,
}

/// All dirty ids of one root type in one state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyGroup {
    pub root_type: String,
    pub state: VariantStateVector,
    /// Entity id -> names of the indexes that need it
    pub ids: BTreeMap<EntityId, BTreeSet<String>>,
}

impl DirtyGroup {
    pub fn new(root_type: impl Into<String>, state: VariantStateVector) -> Self {
        Self {
            root_type: root_type.into(),
            state,
            ids: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Request-scoped accumulation of dirty work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtySet {
    groups: BTreeMap<(String, String), DirtyGroup>,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `index_name` needs `(root_type, entity_id, state)`.
    pub fn add(
        &mut self,
        index_name: &str,
        root_type: &str,
        entity_id: EntityId,
        state: &VariantStateVector,
    ) {
        let group = self
            .groups
            .entry((root_type.to_string(), state.state_key()))
            .or_insert_with(|| DirtyGroup::new(root_type, state.clone()));
        group
            .ids
            .entry(entity_id)
            .or_default()
            .insert(index_name.to_string());
    }

    /// Record many ids sharing one root type and state.
    pub fn add_ids(
        &mut self,
        index_name: &str,
        root_type: &str,
        state: &VariantStateVector,
        ids: impl IntoIterator<Item = EntityId>,
    ) {
        for id in ids {
            self.add(index_name, root_type, id, state);
        }
    }

    pub fn add_tuple(&mut self, tuple: &DirtyTuple) {
        self.add(
            &tuple.index_name,
            &tuple.root_type,
            tuple.entity_id,
            &tuple.variant_state,
        );
    }

    /// Union `other` into `self`.
    pub fn merge(&mut self, other: DirtySet) {
        for (key, group) in other.groups {
            let target = self
                .groups
                .entry(key)
                .or_insert_with(|| DirtyGroup::new(group.root_type.clone(), group.state.clone()));
            for (id, indexes) in group.ids {
                target.ids.entry(id).or_default().extend(indexes);
            }
        }
    }

    /// Groups in canonical `(root type, state key)` order.
    pub fn groups(&self) -> impl Iterator<Item = &DirtyGroup> {
        self.groups.values()
    }

    /// Number of distinct `(root type, state, id)` entries.
    pub fn id_count(&self) -> usize {
        self.groups.values().map(DirtyGroup::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(DirtyGroup::is_empty)
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }

    /// Move the accumulated work out, leaving `self` empty.
    pub fn take(&mut self) -> DirtySet {
        std::mem::take(self)
    }

    /// Every index name mentioned anywhere in the set.
    pub fn index_names(&self) -> BTreeSet<String> {
        self.groups
            .values()
            .flat_map(|g| g.ids.values())
            .flat_map(|names| names.iter().cloned())
            .collect()
    }

    /// Expand into one tuple per `(index, id, state)`.
    pub fn tuples(&self) -> impl Iterator<Item = DirtyTuple> + '_ {
        self.groups.values().flat_map(|group| {
            group.ids.iter().flat_map(move |(id, indexes)| {
                indexes.iter().map(move |index| DirtyTuple {
                    index_name: index.clone(),
                    root_type: group.root_type.clone(),
                    entity_id: *id,
                    variant_state: group.state.clone(),
                })
            })
        })
    }

    /// View as `index -> root type -> tuples`.
    pub fn by_index(&self) -> BTreeMap<String, BTreeMap<String, BTreeSet<DirtyTuple>>> {
        let mut out: BTreeMap<String, BTreeMap<String, BTreeSet<DirtyTuple>>> = BTreeMap::new();
        for tuple in self.tuples() {
            out.entry(tuple.index_name.clone())
                .or_default()
                .entry(tuple.root_type.clone())
                .or_default()
                .insert(tuple);
        }
        out
    }
}
