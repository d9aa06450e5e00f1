//! Size-bounded batches of dirty work.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use reindex_types::{DirtySet, EntityId, VariantStateVector};

/// Ids of one `(root type, state)` group inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPart {
    pub root_type: String,
    pub state: VariantStateVector,
    /// Entity id -> names of the indexes that need it
    pub ids: BTreeMap<EntityId, BTreeSet<String>>,
}

impl BatchPart {
    /// Put this part's tuples back into `dirty`.
    pub fn restore_into(&self, dirty: &mut DirtySet) {
        for (id, index_names) in &self.ids {
            for name in index_names {
                dirty.add(name, &self.root_type, *id, &self.state);
            }
        }
    }
}

/// One unit of processing work. Never rebalanced once created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub parts: Vec<BatchPart>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total ids across all parts.
    pub fn len(&self) -> usize {
        self.parts.iter().map(|p| p.ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(
        &mut self,
        root_type: &str,
        state: &VariantStateVector,
        ids: impl IntoIterator<Item = (EntityId, BTreeSet<String>)>,
    ) {
        let ids: BTreeMap<_, _> = ids.into_iter().collect();
        if ids.is_empty() {
            return;
        }
        self.parts.push(BatchPart {
            root_type: root_type.to_string(),
            state: state.clone(),
            ids,
        });
    }
}

/// Slice `dirty` into batches of `bound` ids.
///
/// Groups are visited in `(root type, state key)` order and a batch may
/// span groups. When what is left of a group fits in the current batch
/// plus `soft_cap`, it is absorbed instead of starting a near-empty
/// trailing batch. A `bound` of 0 yields a single batch.
pub fn segment_batches(dirty: &DirtySet, bound: usize, soft_cap: usize) -> Vec<Batch> {
    if bound == 0 {
        let mut batch = Batch::new();
        for group in dirty.groups() {
            batch.push(&group.root_type, &group.state, group.ids.clone());
        }
        return if batch.is_empty() { Vec::new() } else { vec![batch] };
    }

    let mut batches = Vec::new();
    let mut current = Batch::new();

    for group in dirty.groups() {
        let mut rest: Vec<(EntityId, BTreeSet<String>)> =
            group.ids.iter().map(|(id, names)| (*id, names.clone())).collect();

        while !rest.is_empty() {
            let room = bound.saturating_sub(current.len());
            let take = if rest.len() <= room + soft_cap {
                rest.len()
            } else {
                room
            };
            current.push(&group.root_type, &group.state, rest.drain(..take));
            if current.len() >= bound {
                batches.push(std::mem::take(&mut current));
            }
        }
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
