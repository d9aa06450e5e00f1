//! Variant state vectors.
//!
//! A vector assigns one opaque value to each state dimension that applies
//! to an entity (e.g. `stage = "Live"`, `partition = 3`). Keys are kept
//! sorted so equal vectors always serialize to the same canonical key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Value of one dimension inside a state vector.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Int(i64),
    Str(String),
}

impl StateValue {
    /// Textual form used in filters and document fields.
    pub fn as_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Int(v) => write!(f, "{}", v),
            StateValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Str(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Str(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Int(value)
    }
}

impl From<StateValue> for serde_json::Value {
    fn from(value: StateValue) -> Self {
        match value {
            StateValue::Int(v) => serde_json::Value::from(v),
            StateValue::Str(v) => serde_json::Value::from(v),
        }
    }
}

/// Mapping from dimension identifier to state value.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantStateVector(BTreeMap<String, StateValue>);

impl VariantStateVector {
    /// Create an empty vector (the state of types no dimension applies to).
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, dimension: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.0.insert(dimension.into(), value.into());
        self
    }

    pub fn insert(&mut self, dimension: impl Into<String>, value: impl Into<StateValue>) {
        self.0.insert(dimension.into(), value.into());
    }

    pub fn get(&self, dimension: &str) -> Option<&StateValue> {
        self.0.get(dimension)
    }

    pub fn remove(&mut self, dimension: &str) -> Option<StateValue> {
        self.0.remove(dimension)
    }

    pub fn contains(&self, dimension: &str) -> bool {
        self.0.contains_key(dimension)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate entries in canonical (sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &StateValue)> {
        self.0.iter()
    }

    /// Dimension identifiers in canonical order.
    pub fn dimensions(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Return a copy of `self` with every entry of `other` applied on top.
    pub fn merged(&self, other: &VariantStateVector) -> VariantStateVector {
        let mut merged = self.clone();
        for (dimension, value) in other.iter() {
            merged.0.insert(dimension.clone(), value.clone());
        }
        merged
    }

    /// True when every entry of `partial` is present in `self` with the same value.
    ///
    /// An empty `partial` matches everything.
    pub fn matches(&self, partial: &VariantStateVector) -> bool {
        partial
            .iter()
            .all(|(dimension, value)| self.0.get(dimension) == Some(value))
    }

    /// Canonical JSON form, keys sorted.
    ///
    /// Identical vectors always produce byte-identical output, so this is
    /// safe to embed in document identifiers and dedup keys.
    pub fn canonical_json(&self) -> String {
        let map: serde_json::Map<String, serde_json::Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
            .collect();
        serde_json::Value::Object(map).to_string()
    }

    /// Stable dedup key; alias of [`canonical_json`](Self::canonical_json).
    pub fn state_key(&self) -> String {
        self.canonical_json()
    }
}

impl FromIterator<(String, StateValue)> for VariantStateVector {
    fn from_iter<T: IntoIterator<Item = (String, StateValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for VariantStateVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_json())
    }
}
