//! # Storage Adapter Trait
//!
//! This is THE contract between the query engine and the relational
//! substrate. The substrate holds two tables:
//!
//! ```text
//! <prefix>_nodes(node_id INTEGER PRIMARY KEY, labels TEXT, properties TEXT)
//! <prefix>_edges(edge_id INTEGER PRIMARY KEY, from_node INTEGER,
//!                to_node INTEGER, edge_type TEXT, weight REAL, properties TEXT)
//! ```
//!
//! Labels are a JSON array of unique strings in first-insertion order;
//! properties are a JSON object. All label/property payloads cross this
//! boundary as JSON text.

pub mod memory;

pub use memory::MemoryAdapter;

use crate::model::{EdgeId, EdgeRecord, NodeId, NodeRecord, Value};
use crate::{Error, Result};

// ============================================================================
// Rows
// ============================================================================

/// A raw row of the node table.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    pub node_id: i64,
    /// JSON array of label strings.
    pub labels: String,
    /// JSON object of properties.
    pub properties: String,
}

impl NodeRow {
    pub fn decode(&self) -> Result<NodeRecord> {
        Ok(NodeRecord {
            id: NodeId(self.node_id),
            labels: parse_labels(&self.labels)?.into_iter().collect(),
            properties: parse_properties(&self.properties)?,
        })
    }
}

/// A raw row of the edge table.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRow {
    pub edge_id: i64,
    pub from_node: i64,
    pub to_node: i64,
    pub edge_type: String,
    pub weight: f64,
    /// JSON object of properties.
    pub properties: String,
}

impl EdgeRow {
    pub fn decode(&self) -> Result<EdgeRecord> {
        Ok(EdgeRecord {
            id: EdgeId(self.edge_id),
            from: NodeId(self.from_node),
            to: NodeId(self.to_node),
            edge_type: self.edge_type.clone(),
            weight: self.weight,
            properties: parse_properties(&self.properties)?,
        })
    }
}

// ============================================================================
// The adapter contract
// ============================================================================

/// The universal substrate contract.
///
/// Any backend that can satisfy atomic single-statement writes and point
/// reads by id can implement this trait. Adapter calls are synchronous; the
/// engine treats each as atomic.
pub trait StorageAdapter: Send + Sync + 'static {
    // ========================================================================
    // Mutation
    // ========================================================================

    /// Insert a node. A positive `id_hint` must be honored or the call must
    /// fail; `id_hint <= 0` asks the adapter to assign a fresh id.
    fn add_node(&self, id_hint: i64, labels_json: &str, properties_json: &str) -> Result<i64>;

    /// Insert an edge. Fails with `Misuse` if either endpoint id is `<= 0`.
    fn add_edge(
        &self,
        id_hint: i64,
        from_node: i64,
        to_node: i64,
        edge_type: &str,
        weight: f64,
        properties_json: &str,
    ) -> Result<i64>;

    /// Merge one property into the entity's JSON object, creating the object
    /// if absent. Exactly one of `node_id`/`edge_id` must be positive.
    fn update_property(
        &self,
        node_id: i64,
        edge_id: i64,
        property: &str,
        value: &Value,
    ) -> Result<()>;

    /// Remove one property from the entity's JSON object. Exactly one of
    /// `node_id`/`edge_id` must be positive.
    fn remove_property(&self, node_id: i64, edge_id: i64, property: &str) -> Result<()>;

    /// Replace a node's labels JSON wholesale.
    fn set_labels(&self, node_id: i64, labels_json: &str) -> Result<()>;

    /// Delete a node. With `detach` false the adapter refuses while edges
    /// are still connected; with `detach` true incident edges go first in
    /// the same operation.
    fn delete_node(&self, id: i64, detach: bool) -> Result<()>;

    /// Delete an edge.
    fn delete_edge(&self, id: i64) -> Result<()>;

    // ========================================================================
    // Point reads and scans
    // ========================================================================

    fn node_exists(&self, id: i64) -> bool;

    fn edge_exists(&self, id: i64) -> bool;

    fn node(&self, id: i64) -> Result<Option<NodeRow>>;

    fn edge(&self, id: i64) -> Result<Option<EdgeRow>>;

    /// All node ids in insertion (= id) order.
    fn node_ids(&self) -> Result<Vec<i64>>;

    /// All edge ids in insertion (= id) order.
    fn edge_ids(&self) -> Result<Vec<i64>>;

    /// Ids of edges incident to the node, in insertion order.
    fn node_relationships(&self, id: i64) -> Result<Vec<i64>>;

    // ========================================================================
    // Id allocation
    // ========================================================================

    /// The id the next inserted node would receive.
    fn next_node_id(&self) -> i64;

    /// The id the next inserted edge would receive.
    fn next_edge_id(&self) -> i64;

    // ========================================================================
    // Atomic region
    // ========================================================================

    /// Open the substrate's atomic region for a write transaction.
    fn begin_region(&self) -> Result<()>;

    /// Commit the open region.
    fn commit_region(&self) -> Result<()>;

    /// Roll back and release the open region. Idempotent.
    fn rollback_region(&self) -> Result<()>;
}

// ============================================================================
// JSON boundary helpers
// ============================================================================

/// Strip bytes that must never reach a JSON column: NUL and control
/// characters other than tab, newline and carriage return. Quote and
/// backslash escaping is the serializer's job.
pub fn sanitize_string(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

/// Sanitize every string inside a value before it crosses the boundary.
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::Str(s) => Value::Str(sanitize_string(s)),
        Value::List(items) => Value::List(items.iter().map(sanitize_value).collect()),
        Value::Map(pairs) => Value::Map(
            pairs
                .iter()
                .map(|(k, v)| (sanitize_string(k), sanitize_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Encode labels as a JSON array, preserving order.
pub fn labels_json(labels: &[String]) -> String {
    serde_json::to_string(labels).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a labels JSON array.
pub fn parse_labels(json: &str) -> Result<Vec<String>> {
    if json.is_empty() {
        return Ok(Vec::new());
    }
    let parsed: Vec<String> = serde_json::from_str(json)
        .map_err(|e| Error::Storage(format!("invalid labels payload: {e}")))?;
    Ok(parsed)
}

/// Encode ordered property pairs as a JSON object.
pub fn properties_json(pairs: &[(String, Value)]) -> String {
    let mut obj = serde_json::Map::new();
    for (k, v) in pairs {
        obj.insert(k.clone(), v.to_json());
    }
    serde_json::Value::Object(obj).to_string()
}

/// Decode a properties JSON object into ordered pairs.
pub fn parse_properties(json: &str) -> Result<Vec<(String, Value)>> {
    if json.is_empty() {
        return Ok(Vec::new());
    }
    let parsed: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| Error::Storage(format!("invalid properties payload: {e}")))?;
    match parsed {
        serde_json::Value::Object(obj) => Ok(obj
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect()),
        _ => Err(Error::Storage("properties payload is not an object".into())),
    }
}
