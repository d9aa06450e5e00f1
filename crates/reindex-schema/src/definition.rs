//! Index definitions.
//!
//! An index is declared through [`IndexDefinitionBuilder`]: types first,
//! then fields. [`build`](IndexDefinitionBuilder::build) adds the variant
//! filter fields and computes the dependency list and derived-field groups
//! once; the resulting [`IndexDefinition`] is immutable.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use reindex_types::{EntityCatalog, FieldRole, ValueType, VariantStateVector};
use reindex_variants::VariantRegistry;

use crate::error::SchemaError;
use crate::field::{DerivedFieldGroup, FieldSpec};
use crate::lookup::{derivation_chain, LookupStep};
use crate::resolver::{FieldPathResolver, TypeOptions};

/// Fields keyed by identity `(root_type, full_field_name)`.
pub type FieldMap = BTreeMap<(String, String), FieldSpec>;

/// Add `type_name` to `list` unless an ancestor is already present,
/// removing any listed subtypes of it.
pub fn add_unique_by_ancestor(list: &mut Vec<String>, type_name: &str, catalog: &dyn EntityCatalog) {
    if list.iter().any(|t| catalog.is_a(type_name, t)) {
        return;
    }
    list.retain(|t| !catalog.is_a(t, type_name));
    list.push(type_name.to_string());
}

/// Builder for [`IndexDefinition`].
pub struct IndexDefinitionBuilder {
    name: String,
    registry: Arc<VariantRegistry>,
    resolver: FieldPathResolver,
    classes: Vec<(String, TypeOptions)>,
    fields: BTreeMap<FieldRole, FieldMap>,
    excluded_states: Vec<VariantStateVector>,
}

impl IndexDefinitionBuilder {
    pub fn new(name: impl Into<String>, registry: Arc<VariantRegistry>) -> Self {
        let resolver = FieldPathResolver::new(registry.catalog().clone());
        Self {
            name: name.into(),
            registry,
            resolver,
            classes: Vec::new(),
            fields: BTreeMap::new(),
            excluded_states: Vec::new(),
        }
    }

    /// Cover `type_name`. Rejected once any field has been added.
    pub fn add_type(mut self, type_name: &str, options: TypeOptions) -> Result<Self, SchemaError> {
        if self.fields.values().any(|f| !f.is_empty()) {
            return Err(SchemaError::TypesAfterFields(type_name.to_string()));
        }
        if !self.registry.catalog().contains(type_name) {
            return Err(SchemaError::UnknownType(type_name.to_string()));
        }
        if !self.classes.iter().any(|(t, _)| t == type_name) {
            self.classes.push((type_name.to_string(), options));
        }
        Ok(self)
    }

    pub fn add_fulltext_field(self, path: &str) -> Result<Self, SchemaError> {
        self.add_field(FieldRole::Fulltext, path, None, BTreeMap::new())
    }

    pub fn add_filter_field(self, path: &str) -> Result<Self, SchemaError> {
        self.add_field(FieldRole::Filter, path, None, BTreeMap::new())
    }

    pub fn add_sort_field(self, path: &str) -> Result<Self, SchemaError> {
        self.add_field(FieldRole::Sort, path, None, BTreeMap::new())
    }

    /// Resolve `path` against the covered types and add it under `role`.
    pub fn add_field(
        mut self,
        role: FieldRole,
        path: &str,
        forced_type: Option<ValueType>,
        extra_options: BTreeMap<String, Value>,
    ) -> Result<Self, SchemaError> {
        let found = self
            .resolver
            .resolve(&self.classes, path, forced_type, &extra_options);
        if found.is_empty() {
            return Err(SchemaError::UnresolvableField {
                path: path.to_string(),
                types: self
                    .classes
                    .iter()
                    .map(|(t, _)| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        let target = self.fields.entry(role).or_default();
        for spec in found.into_values() {
            let identity = (spec.root_type.clone(), spec.full_field_name.clone());
            target.insert(identity, spec);
        }
        Ok(self)
    }

    /// Add every stored text field visible on the covered types.
    pub fn add_all_fulltext_fields(mut self) -> Result<Self, SchemaError> {
        let catalog = self.registry.catalog().clone();
        let mut names: Vec<String> = Vec::new();
        for (class, options) in &self.classes {
            for type_name in catalog.hierarchy(class, options.include_children) {
                let def = match catalog.type_def(&type_name) {
                    Some(def) => def,
                    None => continue,
                };
                for field in &def.fields {
                    let texty = matches!(field.value_type, Some(ValueType::Text | ValueType::String));
                    if !field.derived && texty && !names.contains(&field.name) {
                        names.push(field.name.clone());
                    }
                }
            }
        }
        for name in names {
            self = self.add_field(FieldRole::Fulltext, &name, None, BTreeMap::new())?;
        }
        Ok(self)
    }

    /// Never store documents in states matching `partial`.
    pub fn exclude_variant_state(mut self, partial: VariantStateVector) -> Self {
        self.excluded_states.push(partial);
        self
    }

    pub fn build(mut self) -> Result<IndexDefinition, SchemaError> {
        if self.classes.is_empty() {
            return Err(SchemaError::NoTypes(self.name));
        }
        let catalog = self.registry.catalog().clone();

        for (class, options) in &self.classes {
            let root_type = catalog.base_type(class);
            for variant in self.registry.variant_fields(class, options.include_children) {
                let spec = FieldSpec {
                    name: variant.name.clone(),
                    source_field: variant.name.clone(),
                    full_field_name: variant.name.clone(),
                    root_type: root_type.clone(),
                    origin_type: class.clone(),
                    entity_type: class.clone(),
                    lookup_chain: vec![LookupStep::VariantProjection {
                        dimension: variant.dimension.clone(),
                    }],
                    value_type: variant.value_type,
                    multi_valued: false,
                    extra_options: BTreeMap::new(),
                };
                self.fields
                    .entry(FieldRole::Filter)
                    .or_default()
                    .entry((root_type.clone(), variant.name))
                    .or_insert(spec);
            }
        }

        let dependency_list = dependency_list(catalog.as_ref(), &self.classes, &self.fields);
        let derived_groups = derived_groups(catalog.as_ref(), &self.fields);

        debug!(
            index = %self.name,
            types = self.classes.len(),
            dependencies = ?dependency_list,
            derived_groups = derived_groups.len(),
            "Built index definition"
        );

        Ok(IndexDefinition {
            name: self.name,
            catalog,
            classes: self.classes,
            fields: self.fields,
            excluded_states: self.excluded_states,
            dependency_list,
            derived_groups,
        })
    }
}

fn dependency_list(
    catalog: &dyn EntityCatalog,
    classes: &[(String, TypeOptions)],
    fields: &BTreeMap<FieldRole, FieldMap>,
) -> Vec<String> {
    let mut list = Vec::new();
    for (class, _) in classes {
        add_unique_by_ancestor(&mut list, class, catalog);
    }
    for spec in fields.values().flat_map(|f| f.values()) {
        if spec.is_relation_derived() {
            add_unique_by_ancestor(&mut list, &spec.entity_type, catalog);
        }
    }
    list
}

fn derived_groups(
    catalog: &dyn EntityCatalog,
    fields: &BTreeMap<FieldRole, FieldMap>,
) -> Vec<DerivedFieldGroup> {
    let mut groups: Vec<DerivedFieldGroup> = Vec::new();
    for spec in fields.values().flat_map(|f| f.values()) {
        if spec.lookup_chain.len() < 2 {
            continue;
        }
        let chain = spec.lookup_chain[..spec.lookup_chain.len() - 1].to_vec();
        let position = groups
            .iter()
            .position(|g| g.root_type == spec.root_type && g.chain == chain);
        let group = match position {
            Some(i) => &mut groups[i],
            None => {
                groups.push(DerivedFieldGroup {
                    root_type: spec.root_type.clone(),
                    derivation_chain: derivation_chain(&spec.lookup_chain),
                    chain,
                    fields: BTreeSet::new(),
                    entity_types: Vec::new(),
                });
                let last = groups.len() - 1;
                &mut groups[last]
            }
        };
        group.fields.insert(spec.changed_key());
        add_unique_by_ancestor(&mut group.entity_types, &spec.entity_type, catalog);
    }
    groups
}

/// An immutable, fully resolved index declaration.
pub struct IndexDefinition {
    name: String,
    catalog: Arc<dyn EntityCatalog>,
    classes: Vec<(String, TypeOptions)>,
    fields: BTreeMap<FieldRole, FieldMap>,
    excluded_states: Vec<VariantStateVector>,
    dependency_list: Vec<String>,
    derived_groups: Vec<DerivedFieldGroup>,
}

impl IndexDefinition {
    pub fn builder(name: impl Into<String>, registry: Arc<VariantRegistry>) -> IndexDefinitionBuilder {
        IndexDefinitionBuilder::new(name, registry)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn catalog(&self) -> &dyn EntityCatalog {
        self.catalog.as_ref()
    }

    /// Covered types with their options, in declaration order.
    pub fn classes(&self) -> &[(String, TypeOptions)] {
        &self.classes
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes.iter().map(|(t, _)| t.clone()).collect()
    }

    /// Declared class covering `type_name` directly, if any.
    pub fn covering_class(&self, type_name: &str) -> Option<&str> {
        self.classes
            .iter()
            .find(|(class, options)| {
                class == type_name
                    || (options.include_children && self.catalog.is_a(type_name, class))
            })
            .map(|(class, _)| class.as_str())
    }

    pub fn fields(&self, role: FieldRole) -> impl Iterator<Item = &FieldSpec> {
        self.fields.get(&role).into_iter().flat_map(|f| f.values())
    }

    /// Every field with its role.
    pub fn all_fields(&self) -> impl Iterator<Item = (FieldRole, &FieldSpec)> {
        self.fields
            .iter()
            .flat_map(|(role, fields)| fields.values().map(move |f| (*role, f)))
    }

    pub fn field(&self, role: FieldRole, name: &str) -> Option<&FieldSpec> {
        self.fields(role).find(|f| f.name == name)
    }

    /// Minimal set of types whose writes can affect this index.
    pub fn dependency_list(&self) -> &[String] {
        &self.dependency_list
    }

    /// True when a write to `type_name` may affect this index.
    pub fn depends_on(&self, type_name: &str) -> bool {
        self.catalog.is_a_any(type_name, &self.dependency_list)
    }

    pub fn derived_field_groups(&self) -> &[DerivedFieldGroup] {
        &self.derived_groups
    }

    pub fn excluded_states(&self) -> &[VariantStateVector] {
        &self.excluded_states
    }

    /// True when documents in `state` are never stored.
    pub fn is_excluded(&self, state: &VariantStateVector) -> bool {
        self.excluded_states.iter().any(|partial| state.matches(partial))
    }
}
