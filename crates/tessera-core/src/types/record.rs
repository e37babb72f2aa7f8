//! Records exchanged between pipeline stages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A flat mapping of string keys to JSON-compatible values.
pub type Record = serde_json::Map<String, Value>;

/// Artifact key under which the bundling stage publishes its relationship graph.
pub const RELATIONSHIP_GRAPH: &str = "relationship_graph";

/// A stage's output: a list of records plus named side artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub records: Vec<Record>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, Value>,
}

impl Payload {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            artifacts: BTreeMap::new(),
        }
    }

    /// Attach a named artifact.
    pub fn with_artifact(mut self, key: impl Into<String>, value: Value) -> Self {
        self.artifacts.insert(key.into(), value);
        self
    }

    pub fn artifact(&self, key: &str) -> Option<&Value> {
        self.artifacts.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Build a record from `(key, value)` pairs.
pub fn record<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Record
where
    K: Into<String>,
    V: Into<Value>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
