//! Entity catalog: type hierarchy, fields and relation metadata.
//!
//! The persisted-entity store is an external collaborator; this is the
//! introspection half of it. [`EntityCatalog`] answers hierarchy questions
//! (ancestry, subtypes, `is_a`) and exposes the fields and relations each
//! type declares *directly*, so callers can tell declared from inherited.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// Storage type of a field, used to pick the index field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Short exact-match string (the fallback when nothing better is known)
    #[default]
    String,
    /// Tokenized text
    Text,
    Int,
    Float,
    Boolean,
    Date,
}

/// A field declared on a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub value_type: Option<ValueType>,
    /// Computed by an accessor rather than stored in a column
    #[serde(default)]
    pub derived: bool,
}

/// Relation cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// To-one; foreign key column lives on the owner
    HasOne,
    /// To-many; foreign key column lives on the target
    HasMany,
    /// To-many through a join table
    ManyMany,
}

/// Join table of a many-many relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinTable {
    pub table: String,
    /// Column pointing at the owner
    pub local_key: String,
    /// Column pointing at the target
    pub remote_key: String,
}

/// A relation declared on a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    /// `HasOne`: column on the owner. `HasMany`: column on the target.
    #[serde(default)]
    pub foreign_key: String,
    #[serde(default)]
    pub join: Option<JoinTable>,
}

/// Declaration of one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// Physical table; defaults to the type name
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
    /// Behaviour markers (e.g. `versioned`), inherited by subtypes
    #[serde(default)]
    pub markers: BTreeSet<String>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            table: None,
            fields: Vec::new(),
            relations: Vec::new(),
            markers: BTreeSet::new(),
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Stored column.
    pub fn field(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            value_type: Some(value_type),
            derived: false,
        });
        self
    }

    /// Computed accessor; `None` leaves the type to be defaulted.
    pub fn accessor(mut self, name: impl Into<String>, value_type: Option<ValueType>) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            value_type,
            derived: true,
        });
        self
    }

    pub fn has_one(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        let name = name.into();
        self.relations.push(RelationDef {
            foreign_key: format!("{}ID", name),
            name,
            kind: RelationKind::HasOne,
            target: target.into(),
            join: None,
        });
        self
    }

    pub fn has_many(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        remote_key: impl Into<String>,
    ) -> Self {
        self.relations.push(RelationDef {
            name: name.into(),
            kind: RelationKind::HasMany,
            target: target.into(),
            foreign_key: remote_key.into(),
            join: None,
        });
        self
    }

    pub fn many_many(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        join_table: impl Into<String>,
    ) -> Self {
        let target = target.into();
        let join = JoinTable {
            table: join_table.into(),
            local_key: format!("{}ID", self.name),
            remote_key: format!("{}ID", target),
        };
        self.relations.push(RelationDef {
            name: name.into(),
            kind: RelationKind::ManyMany,
            target,
            foreign_key: String::new(),
            join: Some(join),
        });
        self
    }

    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.markers.insert(marker.into());
        self
    }

    /// Physical table name.
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }
}

/// Type-hierarchy and relation introspection.
pub trait EntityCatalog: Send + Sync {
    fn type_def(&self, name: &str) -> Option<&TypeDef>;

    /// All type names in declaration order.
    fn type_names(&self) -> Vec<String>;

    fn contains(&self, name: &str) -> bool {
        self.type_def(name).is_some()
    }

    fn parent_of(&self, name: &str) -> Option<String> {
        self.type_def(name).and_then(|t| t.parent.clone())
    }

    /// Ancestry from the base type down to (and including) `name`.
    fn ancestry(&self, name: &str) -> Vec<String> {
        let mut chain = vec![name.to_string()];
        let mut current = name.to_string();
        while let Some(parent) = self.parent_of(&current) {
            if chain.contains(&parent) {
                break;
            }
            chain.push(parent.clone());
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Base (root) type of `name`'s hierarchy.
    fn base_type(&self, name: &str) -> String {
        self.ancestry(name)
            .into_iter()
            .next()
            .unwrap_or_else(|| name.to_string())
    }

    /// True when `name` is `ancestor` or descends from it.
    fn is_a(&self, name: &str, ancestor: &str) -> bool {
        name == ancestor || self.ancestry(name).iter().any(|t| t == ancestor)
    }

    fn is_a_any(&self, name: &str, ancestors: &[String]) -> bool {
        ancestors.iter().any(|a| self.is_a(name, a))
    }

    /// Every descendant of `name`, declaration order, excluding `name`.
    fn subtypes_of(&self, name: &str) -> Vec<String> {
        self.type_names()
            .into_iter()
            .filter(|t| t != name && self.is_a(t, name))
            .collect()
    }

    /// Ancestry of `name`, followed by its subtypes when requested.
    fn hierarchy(&self, name: &str, include_subtypes: bool) -> Vec<String> {
        let mut types = self.ancestry(name);
        if include_subtypes {
            types.extend(self.subtypes_of(name));
        }
        types
    }

    /// Field declared directly on `type_name`.
    fn declared_field(&self, type_name: &str, field: &str) -> Option<&FieldDef> {
        self.type_def(type_name)
            .and_then(|t| t.fields.iter().find(|f| f.name == field))
    }

    /// Field visible on `type_name`, with the type that declares it.
    fn field(&self, type_name: &str, field: &str) -> Option<(String, &FieldDef)> {
        self.ancestry(type_name)
            .into_iter()
            .rev()
            .find_map(|t| self.declared_field(&t, field).map(|f| (t.clone(), f)))
    }

    /// Relation declared directly on `type_name` (inherited ones excluded).
    fn declared_relation(&self, type_name: &str, relation: &str) -> Option<&RelationDef> {
        self.type_def(type_name)
            .and_then(|t| t.relations.iter().find(|r| r.name == relation))
    }

    /// Relation visible on `type_name`, with the type that declares it.
    fn relation(&self, type_name: &str, relation: &str) -> Option<(String, &RelationDef)> {
        self.ancestry(type_name)
            .into_iter()
            .rev()
            .find_map(|t| self.declared_relation(&t, relation).map(|r| (t.clone(), r)))
    }

    fn table_for(&self, type_name: &str) -> String {
        self.type_def(type_name)
            .map(|t| t.table_name().to_string())
            .unwrap_or_else(|| type_name.to_string())
    }

    /// Logical type stored in `table`.
    fn type_for_table(&self, table: &str) -> Option<String> {
        self.type_names().into_iter().find(|t| {
            self.type_def(t)
                .map(|d| d.table_name() == table)
                .unwrap_or(false)
        })
    }

    /// Marker on `type_name` or an ancestor, or (optionally) on a subtype.
    fn has_marker(&self, type_name: &str, marker: &str, include_subtypes: bool) -> bool {
        let on = |t: &str| {
            self.type_def(t)
                .map(|d| d.markers.contains(marker))
                .unwrap_or(false)
        };
        if self.ancestry(type_name).iter().any(|t| on(t)) {
            return true;
        }
        include_subtypes && self.subtypes_of(type_name).iter().any(|t| on(t))
    }
}

/// In-memory catalog built from explicit [`TypeDef`]s.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    types: BTreeMap<String, TypeDef>,
    order: Vec<String>,
}

impl SchemaCatalog {
    /// Build and validate a catalog.
    ///
    /// Rejects duplicate names, unknown parents or relation targets, and
    /// cycles in the parent chain.
    pub fn new(types: Vec<TypeDef>) -> Result<Self, TypesError> {
        let mut catalog = SchemaCatalog::default();
        for def in types {
            if catalog.types.contains_key(&def.name) {
                return Err(TypesError::InvalidHierarchy(format!(
                    "duplicate type {}",
                    def.name
                )));
            }
            catalog.order.push(def.name.clone());
            catalog.types.insert(def.name.clone(), def);
        }
        catalog.validate()?;
        Ok(catalog)
    }

    /// Parse a JSON array of type declarations.
    pub fn from_json(json: &str) -> Result<Self, TypesError> {
        let types: Vec<TypeDef> = serde_json::from_str(json)?;
        Self::new(types)
    }

    fn validate(&self) -> Result<(), TypesError> {
        for def in self.types.values() {
            if let Some(parent) = &def.parent {
                if !self.types.contains_key(parent) {
                    return Err(TypesError::UnknownType(parent.clone()));
                }
            }
            for relation in &def.relations {
                if !self.types.contains_key(&relation.target) {
                    return Err(TypesError::UnknownType(relation.target.clone()));
                }
            }

            let mut seen = BTreeSet::new();
            let mut current = Some(def.name.clone());
            while let Some(name) = current {
                if !seen.insert(name.clone()) {
                    return Err(TypesError::InvalidHierarchy(format!(
                        "cycle through {}",
                        def.name
                    )));
                }
                current = self.types.get(&name).and_then(|t| t.parent.clone());
            }
        }
        Ok(())
    }
}

impl EntityCatalog for SchemaCatalog {
    fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    fn type_names(&self) -> Vec<String> {
        self.order.clone()
    }
}
