//! Turning entities into index documents.

use serde_json::Value;
use tracing::warn;

use reindex_types::{FieldRole, FieldValue, IndexDocument, VariantStateVector};

use crate::definition::IndexDefinition;
use crate::error::StoreError;
use crate::field::FieldSpec;
use crate::lookup::LookupStep;
use crate::store::{Entity, EntityStore};

/// Walk `spec`'s lookup chain forward from `entity`.
///
/// Relation steps fan out; an empty relation ends the walk with no values.
pub fn field_values(
    store: &dyn EntityStore,
    entity: &Entity,
    spec: &FieldSpec,
    state: &VariantStateVector,
) -> Result<Vec<Value>, StoreError> {
    let mut current = vec![entity.clone()];

    for step in &spec.lookup_chain {
        match step {
            LookupStep::Property { field, .. } => {
                return Ok(current.iter().filter_map(|e| e.get(field).cloned()).collect());
            }
            LookupStep::DerivedAccessor { accessor, .. } => {
                let mut values = Vec::with_capacity(current.len());
                for e in &current {
                    values.push(store.call_accessor(e, accessor, state)?);
                }
                return Ok(values);
            }
            LookupStep::SingularRelation { relation, .. }
            | LookupStep::CollectionRelation { relation, .. } => {
                let mut next = Vec::new();
                for e in &current {
                    next.extend(store.follow_relation(e, relation, state)?);
                }
                if next.is_empty() {
                    return Ok(Vec::new());
                }
                current = next;
            }
            LookupStep::VariantProjection { dimension } => {
                return Ok(state.get(dimension).cloned().map(Value::from).into_iter().collect());
            }
        }
    }

    Ok(Vec::new())
}

impl IndexDefinition {
    /// Fields that apply to an entity of `class_name` under `root_type`.
    pub fn applicable_fields<'a>(
        &'a self,
        class_name: &'a str,
        root_type: &'a str,
    ) -> impl Iterator<Item = (FieldRole, &'a FieldSpec)> + 'a {
        self.all_fields().filter(move |(_, spec)| {
            spec.root_type == root_type && self.catalog().is_a(class_name, &spec.origin_type)
        })
    }

    /// Build the document for `entity` in `state`.
    ///
    /// A field whose traversal fails is logged and left out; the rest of
    /// the document is still produced.
    pub fn build_document(
        &self,
        store: &dyn EntityStore,
        entity: &Entity,
        state: &VariantStateVector,
    ) -> IndexDocument {
        let catalog = self.catalog();
        let root_type = catalog.base_type(&entity.type_name);
        let mut doc = IndexDocument::new(
            entity.id,
            root_type.clone(),
            entity.type_name.clone(),
            catalog.ancestry(&entity.type_name),
            state.clone(),
        );

        for (role, spec) in self.applicable_fields(&entity.type_name, &root_type) {
            match field_values(store, entity, spec, state) {
                Ok(values) => {
                    let values: Vec<FieldValue> =
                        values.iter().flat_map(FieldValue::from_json).collect();
                    if !values.is_empty() {
                        doc.push_values(&spec.name, role, values);
                    }
                }
                Err(e) => {
                    warn!(
                        index = %self.name(),
                        field = %spec.name,
                        entity_id = entity.id,
                        error = %e,
                        "Field extraction failed, leaving field out"
                    );
                }
            }
        }

        doc
    }
}
