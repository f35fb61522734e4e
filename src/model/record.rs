//! Decoded node and edge records.
//!
//! The substrate stores labels and properties as JSON text; these DTOs are
//! the decoded form the evaluator and the write engine read through.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{EdgeId, NodeId, Value};

/// A node decoded from its storage row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    /// Ordered, unique labels. Most nodes carry only one or two.
    pub labels: SmallVec<[String; 4]>,
    /// Ordered properties, mirroring the JSON object.
    pub properties: Vec<(String, Value)>,
}

impl NodeRecord {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// An edge decoded from its storage row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub edge_type: String,
    pub weight: f64,
    pub properties: Vec<(String, Value)>,
}

impl EdgeRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}
