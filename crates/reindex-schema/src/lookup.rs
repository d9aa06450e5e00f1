//! Lookup chains: how an index field's value is reached from a root entity.

use serde::{Deserialize, Serialize};

use reindex_types::{JoinTable, RelationKind};

/// One step of a lookup chain. Chains are ordered root to leaf.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum LookupStep {
    /// Read a stored field
    Property { type_name: String, field: String },

    /// Invoke a computed-value accessor
    DerivedAccessor { type_name: String, accessor: String },

    /// Follow a to-one relation declared on `owner`
    SingularRelation {
        owner: String,
        relation: String,
        foreign_key: String,
        target: String,
    },

    /// Follow a one-to-many or many-to-many relation declared on `owner`
    CollectionRelation {
        owner: String,
        relation: String,
        kind: RelationKind,
        /// Column on the target for one-to-many
        foreign_key: String,
        join: Option<JoinTable>,
        target: String,
    },

    /// Current value of a variant dimension
    VariantProjection { dimension: String },
}

impl LookupStep {
    pub fn is_relation(&self) -> bool {
        matches!(
            self,
            LookupStep::SingularRelation { .. } | LookupStep::CollectionRelation { .. }
        )
    }

    /// `(owner, relation, target)` of a relation step.
    pub fn relation(&self) -> Option<(&str, &str, &str)> {
        match self {
            LookupStep::SingularRelation {
                owner,
                relation,
                target,
                ..
            }
            | LookupStep::CollectionRelation {
                owner,
                relation,
                target,
                ..
            } => Some((owner, relation, target)),
            _ => None,
        }
    }
}

/// Reverse a root-to-leaf chain and drop its terminal step.
///
/// The result walks from the entity holding the field back toward the
/// root entity; only relation steps remain for chains built by the
/// resolver.
pub fn derivation_chain(chain: &[LookupStep]) -> Vec<LookupStep> {
    let mut reversed: Vec<LookupStep> = chain.iter().rev().cloned().collect();
    if !reversed.is_empty() {
        reversed.remove(0);
    }
    reversed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_one(owner: &str, relation: &str, target: &str) -> LookupStep {
        LookupStep::SingularRelation {
            owner: owner.to_string(),
            relation: relation.to_string(),
            foreign_key: format!("{}ID", relation),
            target: target.to_string(),
        }
    }

    #[test]
    fn test_derivation_chain() {
        let chain = vec![
            has_one("Page", "Author", "Member"),
            has_one("Member", "Group", "Group"),
            LookupStep::Property {
                type_name: "Group".to_string(),
                field: "Title".to_string(),
            },
        ];

        let derived = derivation_chain(&chain);
        assert_eq!(derived.len(), 2);
        assert_eq!(derived[0].relation(), Some(("Member", "Group", "Group")));
        assert_eq!(derived[1].relation(), Some(("Page", "Author", "Member")));
    }

    #[test]
    fn test_derivation_chain_of_direct_field_is_empty() {
        let chain = vec![LookupStep::Property {
            type_name: "Page".to_string(),
            field: "Title".to_string(),
        }];
        assert!(derivation_chain(&chain).is_empty());
        assert!(derivation_chain(&[]).is_empty());
    }

    #[test]
    fn test_step_serialization() {
        let step = LookupStep::VariantProjection {
            dimension: "stage".to_string(),
        };
        let json = serde_json::to_string(&step).unwrap();
        assert_eq!(json, r#"{"step":"variant_projection","dimension":"stage"}"#);
    }
}
