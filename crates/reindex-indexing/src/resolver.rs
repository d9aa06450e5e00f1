//! Dirty resolution: which documents a write invalidates.
//!
//! Direct membership marks the written entity itself in every index that
//! covers its type. Derived membership walks each matching derived-field
//! group's chain backward from the written entity to the root entities
//! whose documents embed the changed values, once per reindex state of
//! the written type.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace, warn};

use reindex_schema::{DerivedFieldGroup, IndexDefinition};
use reindex_types::{DirtySet, DirtyTuple, EntityId, VariantStateVector, WriteDescriptor};

use crate::context::IndexingContext;
use crate::error::IndexingError;

/// Default number of ids sent to the store in one relation query.
pub const DEFAULT_PAGE_SIZE: usize = 500;

pub struct DirtyResolver {
    ctx: IndexingContext,
    page_size: usize,
}

impl DirtyResolver {
    pub fn new(ctx: IndexingContext) -> Self {
        Self {
            ctx,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Split relation queries into pages of at most `page_size` ids.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Every dirty tuple caused by `write`, across all indexes.
    ///
    /// Store failures during backward traversal are logged and only drop
    /// the affected state's contribution.
    pub fn resolve(&self, write: &WriteDescriptor) -> DirtySet {
        let mut dirty = DirtySet::new();
        let catalog = self.ctx.catalog();
        if !catalog.contains(&write.declared_type) {
            warn!(declared_type = %write.declared_type, "Write for unknown type ignored");
            return dirty;
        }

        for (_, entry) in self.ctx.indexes.iter() {
            let definition = entry.definition.as_ref();
            if !definition.depends_on(&write.declared_type) {
                continue;
            }

            self.direct_membership(definition, write, &mut dirty);

            for group in definition.derived_field_groups() {
                if !catalog.is_a_any(&write.declared_type, &group.entity_types) {
                    continue;
                }
                if !write.is_delete() && !group.intersects(write.changed_fields()) {
                    continue;
                }
                self.derived_membership(definition, group, write, &mut dirty);
            }
        }

        debug!(
            declared_type = %write.declared_type,
            entity_id = write.entity_id,
            dirty = dirty.id_count(),
            "Resolved dirty tuples"
        );
        dirty
    }

    /// [`resolve`](Self::resolve) viewed as `index -> root type -> tuples`.
    pub fn resolve_by_index(
        &self,
        write: &WriteDescriptor,
    ) -> BTreeMap<String, BTreeMap<String, BTreeSet<DirtyTuple>>> {
        self.resolve(write).by_index()
    }

    fn direct_membership(
        &self,
        definition: &IndexDefinition,
        write: &WriteDescriptor,
        dirty: &mut DirtySet,
    ) {
        if definition.covering_class(&write.declared_type).is_none() {
            return;
        }
        for state in &write.states {
            if definition.is_excluded(state) {
                trace!(index = %definition.name(), state = %state, "Excluded state skipped");
                continue;
            }
            dirty.add(definition.name(), &write.root_type, write.entity_id, state);
        }
    }

    /// Walk `group` backward once per reindex state of the written type.
    /// A failing state is logged and skipped; the others still count.
    fn derived_membership(
        &self,
        definition: &IndexDefinition,
        group: &DerivedFieldGroup,
        write: &WriteDescriptor,
        dirty: &mut DirtySet,
    ) {
        let variants = &self.ctx.variants;

        for state in variants.reindex_states(Some(write.declared_type.as_str()), false) {
            match self.walk_in_state(group, write, &state) {
                Ok(Some((root_state, ids))) => {
                    if definition.is_excluded(&root_state) {
                        continue;
                    }
                    trace!(
                        index = %definition.name(),
                        root_type = %group.root_type,
                        state = %root_state,
                        count = ids.len(),
                        "Derived dirty ids"
                    );
                    dirty.add_ids(definition.name(), &group.root_type, &root_state, ids);
                }
                Ok(None) => {}
                Err(e) => warn!(
                    index = %definition.name(),
                    root_type = %group.root_type,
                    entity_id = write.entity_id,
                    state = %state,
                    error = %e,
                    "Backward traversal failed"
                ),
            }
        }
    }

    /// Root ids reached from the written entity in `state`, paired with
    /// the root type's state during the walk.
    fn walk_in_state(
        &self,
        group: &DerivedFieldGroup,
        write: &WriteDescriptor,
        state: &VariantStateVector,
    ) -> Result<Option<(VariantStateVector, BTreeSet<EntityId>)>, IndexingError> {
        let variants = &self.ctx.variants;
        let _guard = variants.activate_scoped(state)?;
        let query_state = variants.current_state(None);

        let mut ids = BTreeSet::from([write.entity_id]);
        for step in &group.derivation_chain {
            let Some((owner, relation, _)) = step.relation() else {
                continue;
            };
            ids = self.query_paged(owner, relation, &ids, &query_state)?;
            if ids.is_empty() {
                return Ok(None);
            }
        }
        if ids.is_empty() {
            return Ok(None);
        }
        let root_state = variants.current_state(Some(group.root_type.as_str()));
        Ok(Some((root_state, ids)))
    }

    fn query_paged(
        &self,
        owner: &str,
        relation: &str,
        ids: &BTreeSet<EntityId>,
        state: &VariantStateVector,
    ) -> Result<BTreeSet<EntityId>, IndexingError> {
        let all: Vec<EntityId> = ids.iter().copied().collect();
        let mut found = BTreeSet::new();
        for page in all.chunks(self.page_size) {
            let page: BTreeSet<EntityId> = page.iter().copied().collect();
            found.extend(
                self.ctx
                    .store
                    .query_ids_by_relation(owner, relation, &page, state)?,
            );
        }
        Ok(found)
    }
}
