//! Change capture: raw table deltas to folded write descriptors.
//!
//! The persistence layer reports one [`Mutation`] per durable write. A
//! single logical entity write usually touches several physical tables
//! (one per class in its hierarchy, plus `_Live` copies for versioned
//! types). Capture lets every dimension annotate each delta, then folds
//! the deltas of one entity into one [`WriteDescriptor`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, trace};

use reindex_types::{
    field_key, EntityCatalog, EntityId, Mutation, StateValue, TableDelta, WriteCommand,
    WriteDescriptor,
};
use reindex_variants::VariantRegistry;

/// Folds mutations into write descriptors.
pub struct ChangeCapture {
    variants: Arc<VariantRegistry>,
}

impl ChangeCapture {
    pub fn new(variants: Arc<VariantRegistry>) -> Self {
        Self { variants }
    }

    /// Turn one mutation into the logical writes it represents.
    ///
    /// Deltas without an id or with an unknown type are ignored. Writes
    /// that are not deletes and changed no fields are dropped. The result
    /// is ordered by `(id, root type, state key)`.
    pub fn capture(&self, mutation: &Mutation) -> Vec<WriteDescriptor> {
        let catalog = self.variants.catalog().as_ref();
        let mut annotated: Vec<AnnotatedDelta> = Vec::with_capacity(mutation.deltas.len());

        for raw in &mutation.deltas {
            let mut delta = raw.clone();
            self.variants.alter_write_extraction(&mut delta);

            let Some(id) = delta.id else {
                trace!(table = %delta.table, "Skipping delta without id");
                continue;
            };
            let type_name = match delta
                .declared_type
                .clone()
                .or_else(|| catalog.type_for_table(&delta.table))
            {
                Some(t) if catalog.contains(&t) => t,
                _ => {
                    trace!(table = %delta.table, "Skipping delta for unknown type");
                    continue;
                }
            };
            annotated.push(AnnotatedDelta {
                id,
                root_type: catalog.base_type(&type_name),
                type_name,
                delta,
            });
        }
        share_entity_state(&mut annotated);

        let mut folded: BTreeMap<(EntityId, String, String), WriteDescriptor> = BTreeMap::new();
        for AnnotatedDelta {
            id,
            type_name,
            root_type,
            delta,
        } in annotated
        {
            let key = (id, root_type.clone(), delta.state.state_key());
            let write = folded.entry(key).or_insert_with(|| {
                WriteDescriptor::new(
                    root_type,
                    type_name.clone(),
                    id,
                    delta.state.clone(),
                    delta.command,
                )
            });

            if type_name != write.declared_type && catalog.is_a(&type_name, &write.declared_type) {
                write.declared_type = type_name.clone();
            }
            write.command = fold_command(write.command, delta.command);

            for (field, value) in delta.fields {
                let owner = catalog
                    .field(&type_name, &field)
                    .map(|(owner, _)| owner)
                    .unwrap_or_else(|| type_name.clone());
                write.fields.insert(field_key(&owner, &field), value);
            }
        }

        let mut writes = Vec::with_capacity(folded.len());
        for (_, mut write) in folded {
            if !write.is_delete() && write.fields.is_empty() {
                trace!(
                    entity_id = write.entity_id,
                    root_type = %write.root_type,
                    "Dropping write with no changed fields"
                );
                continue;
            }
            self.variants.expand_write_states(&mut write);
            writes.push(write);
        }

        debug!(
            deltas = mutation.deltas.len(),
            writes = writes.len(),
            "Captured mutation"
        );
        writes
    }

    pub fn catalog(&self) -> &dyn EntityCatalog {
        self.variants.catalog().as_ref()
    }
}

/// A delta after dimension annotation, with its resolved id and types.
struct AnnotatedDelta {
    id: EntityId,
    type_name: String,
    root_type: String,
    delta: TableDelta,
}

/// Copy dimension values between the tables of one entity.
///
/// A dimension column often lives on one table of the hierarchy only (a
/// partition id on the base table). Deltas of the same `(id, root type)`
/// that lack a dimension take it from their siblings, provided every
/// sibling that carries it agrees on the value.
fn share_entity_state(deltas: &mut [AnnotatedDelta]) {
    let mut seen: BTreeMap<(EntityId, String), BTreeMap<String, BTreeSet<StateValue>>> =
        BTreeMap::new();
    for annotated in deltas.iter() {
        let dimensions = seen
            .entry((annotated.id, annotated.root_type.clone()))
            .or_default();
        for (dimension, value) in annotated.delta.state.iter() {
            dimensions
                .entry(dimension.clone())
                .or_default()
                .insert(value.clone());
        }
    }

    for annotated in deltas.iter_mut() {
        let Some(dimensions) = seen.get(&(annotated.id, annotated.root_type.clone())) else {
            continue;
        };
        for (dimension, values) in dimensions {
            if annotated.delta.state.contains(dimension) || values.len() != 1 {
                continue;
            }
            if let Some(value) = values.iter().next() {
                annotated.delta.state.insert(dimension.clone(), value.clone());
            }
        }
    }
}

/// Delete dominates; an insert seen anywhere in the fold wins over update.
fn fold_command(current: WriteCommand, next: WriteCommand) -> WriteCommand {
    match (current, next) {
        (WriteCommand::Delete, _) | (_, WriteCommand::Delete) => WriteCommand::Delete,
        (WriteCommand::Insert, _) | (_, WriteCommand::Insert) => WriteCommand::Insert,
        _ => WriteCommand::Update,
    }
}
