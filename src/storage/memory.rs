//! In-memory storage adapter.
//!
//! The reference implementation of [`StorageAdapter`]: two relational-style
//! tables keyed by id, TEXT columns holding JSON, plus an adjacency map.
//! Ids are handed out in ascending order, so id order is insertion order.
//!
//! ## Limitations
//!
//! - **No durable region**: `commit_region()`/`rollback_region()` only do
//!   bookkeeping. The write engine's undo log is what restores state on
//!   rollback.
//! - **Single-writer only**: per-table locks make multi-step mutations
//!   non-atomic under concurrent writers. The engine serializes writers
//!   behind the process-wide write mutex.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use parking_lot::RwLock;

use super::{EdgeRow, NodeRow, StorageAdapter};
use crate::model::Value;
use crate::{Error, Result};

/// In-memory two-table substrate.
pub struct MemoryAdapter {
    tables: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    nodes: BTreeMap<i64, NodeRow>,
    edges: BTreeMap<i64, EdgeRow>,
    /// node_id → incident edge ids, in insertion order
    adjacency: HashMap<i64, Vec<i64>>,
    region_open: bool,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Test/seed helper: number of rows in the node table.
    pub fn node_count(&self) -> usize {
        self.tables.read().nodes.len()
    }

    /// Test/seed helper: number of rows in the edge table.
    pub fn edge_count(&self) -> usize {
        self.tables.read().edges.len()
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_labels(json: &str) -> Result<()> {
    super::parse_labels(json).map(|_| ())
}

fn validate_properties(json: &str) -> Result<()> {
    super::parse_properties(json).map(|_| ())
}

impl StorageAdapter for MemoryAdapter {
    // ========================================================================
    // Mutation
    // ========================================================================

    fn add_node(&self, id_hint: i64, labels_json: &str, properties_json: &str) -> Result<i64> {
        validate_labels(labels_json)?;
        validate_properties(properties_json)?;

        let mut tables = self.tables.write();
        let id = if id_hint > 0 {
            if tables.nodes.contains_key(&id_hint) {
                return Err(Error::Constraint(format!("node id {id_hint} already in use")));
            }
            id_hint
        } else {
            tables.nodes.keys().next_back().map_or(1, |k| k + 1)
        };

        tables.nodes.insert(
            id,
            NodeRow {
                node_id: id,
                labels: labels_json.to_string(),
                properties: properties_json.to_string(),
            },
        );
        tables.adjacency.entry(id).or_default();
        Ok(id)
    }

    fn add_edge(
        &self,
        id_hint: i64,
        from_node: i64,
        to_node: i64,
        edge_type: &str,
        weight: f64,
        properties_json: &str,
    ) -> Result<i64> {
        if from_node <= 0 || to_node <= 0 {
            return Err(Error::Misuse(format!(
                "edge endpoints must be positive, got {from_node} and {to_node}"
            )));
        }
        validate_properties(properties_json)?;

        let mut tables = self.tables.write();
        if !tables.nodes.contains_key(&from_node) {
            return Err(Error::NotFound(format!("source node {from_node}")));
        }
        if !tables.nodes.contains_key(&to_node) {
            return Err(Error::NotFound(format!("target node {to_node}")));
        }

        let id = if id_hint > 0 {
            if tables.edges.contains_key(&id_hint) {
                return Err(Error::Constraint(format!("edge id {id_hint} already in use")));
            }
            id_hint
        } else {
            tables.edges.keys().next_back().map_or(1, |k| k + 1)
        };

        tables.edges.insert(
            id,
            EdgeRow {
                edge_id: id,
                from_node,
                to_node,
                edge_type: edge_type.to_string(),
                weight,
                properties: properties_json.to_string(),
            },
        );
        tables.adjacency.entry(from_node).or_default().push(id);
        if from_node != to_node {
            tables.adjacency.entry(to_node).or_default().push(id);
        }
        Ok(id)
    }

    fn update_property(
        &self,
        node_id: i64,
        edge_id: i64,
        property: &str,
        value: &Value,
    ) -> Result<()> {
        if (node_id > 0) == (edge_id > 0) {
            return Err(Error::Misuse(
                "exactly one of node_id/edge_id must be positive".into(),
            ));
        }

        let mut tables = self.tables.write();
        let properties = if node_id > 0 {
            &mut tables
                .nodes
                .get_mut(&node_id)
                .ok_or_else(|| Error::NotFound(format!("node {node_id}")))?
                .properties
        } else {
            &mut tables
                .edges
                .get_mut(&edge_id)
                .ok_or_else(|| Error::NotFound(format!("edge {edge_id}")))?
                .properties
        };

        let mut pairs = super::parse_properties(properties)?;
        Value::map_insert(&mut pairs, property.to_string(), super::sanitize_value(value));
        *properties = super::properties_json(&pairs);
        Ok(())
    }

    fn remove_property(&self, node_id: i64, edge_id: i64, property: &str) -> Result<()> {
        if (node_id > 0) == (edge_id > 0) {
            return Err(Error::Misuse(
                "exactly one of node_id/edge_id must be positive".into(),
            ));
        }

        let mut tables = self.tables.write();
        let properties = if node_id > 0 {
            &mut tables
                .nodes
                .get_mut(&node_id)
                .ok_or_else(|| Error::NotFound(format!("node {node_id}")))?
                .properties
        } else {
            &mut tables
                .edges
                .get_mut(&edge_id)
                .ok_or_else(|| Error::NotFound(format!("edge {edge_id}")))?
                .properties
        };

        let mut pairs = super::parse_properties(properties)?;
        pairs.retain(|(k, _)| k != property);
        *properties = super::properties_json(&pairs);
        Ok(())
    }

    fn set_labels(&self, node_id: i64, labels_json: &str) -> Result<()> {
        validate_labels(labels_json)?;
        let mut tables = self.tables.write();
        let row = tables
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| Error::NotFound(format!("node {node_id}")))?;
        row.labels = labels_json.to_string();
        Ok(())
    }

    fn delete_node(&self, id: i64, detach: bool) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.nodes.contains_key(&id) {
            return Err(Error::NotFound(format!("node {id}")));
        }

        let incident = tables.adjacency.get(&id).cloned().unwrap_or_default();
        if !incident.is_empty() {
            if !detach {
                return Err(Error::Constraint(format!(
                    "cannot delete node {id} with {} connected relationships",
                    incident.len()
                )));
            }
            for edge_id in incident {
                if let Some(edge) = tables.edges.remove(&edge_id) {
                    for endpoint in [edge.from_node, edge.to_node] {
                        if let Some(ids) = tables.adjacency.get_mut(&endpoint) {
                            ids.retain(|e| *e != edge_id);
                        }
                    }
                }
            }
        }

        tables.nodes.remove(&id);
        tables.adjacency.remove(&id);
        Ok(())
    }

    fn delete_edge(&self, id: i64) -> Result<()> {
        let mut tables = self.tables.write();
        let edge = tables
            .edges
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("edge {id}")))?;
        for endpoint in [edge.from_node, edge.to_node] {
            if let Some(ids) = tables.adjacency.get_mut(&endpoint) {
                ids.retain(|e| *e != id);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Point reads and scans
    // ========================================================================

    fn node_exists(&self, id: i64) -> bool {
        self.tables.read().nodes.contains_key(&id)
    }

    fn edge_exists(&self, id: i64) -> bool {
        self.tables.read().edges.contains_key(&id)
    }

    fn node(&self, id: i64) -> Result<Option<NodeRow>> {
        Ok(self.tables.read().nodes.get(&id).cloned())
    }

    fn edge(&self, id: i64) -> Result<Option<EdgeRow>> {
        Ok(self.tables.read().edges.get(&id).cloned())
    }

    fn node_ids(&self) -> Result<Vec<i64>> {
        Ok(self.tables.read().nodes.keys().copied().collect())
    }

    fn edge_ids(&self) -> Result<Vec<i64>> {
        Ok(self.tables.read().edges.keys().copied().collect())
    }

    fn node_relationships(&self, id: i64) -> Result<Vec<i64>> {
        Ok(self
            .tables
            .read()
            .adjacency
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    // ========================================================================
    // Id allocation — derived from the highest occupied id, so a rolled-back
    // create restores the pre-transaction allocation point.
    // ========================================================================

    fn next_node_id(&self) -> i64 {
        self.tables.read().nodes.keys().next_back().map_or(1, |k| k + 1)
    }

    fn next_edge_id(&self) -> i64 {
        self.tables.read().edges.keys().next_back().map_or(1, |k| k + 1)
    }

    // ========================================================================
    // Atomic region — bookkeeping only; mutations apply immediately and the
    // write engine's undo log performs the actual restore.
    // ========================================================================

    fn begin_region(&self) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.region_open {
            return Err(Error::Misuse("write region already open".into()));
        }
        tables.region_open = true;
        Ok(())
    }

    fn commit_region(&self) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.region_open {
            return Err(Error::Misuse("no open write region".into()));
        }
        tables.region_open = false;
        Ok(())
    }

    fn rollback_region(&self) -> Result<()> {
        self.tables.write().region_open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::labels_json;

    fn labels(items: &[&str]) -> String {
        labels_json(&items.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_add_and_get_node() {
        let db = MemoryAdapter::new();
        let id = db.add_node(0, &labels(&["Person"]), r#"{"name":"Ada"}"#).unwrap();
        assert_eq!(id, 1);

        let row = db.node(id).unwrap().unwrap();
        let rec = row.decode().unwrap();
        assert!(rec.has_label("Person"));
        assert_eq!(rec.get("name"), Some(&Value::Str("Ada".into())));
    }

    #[test]
    fn test_id_hint_honored_or_refused() {
        let db = MemoryAdapter::new();
        assert_eq!(db.add_node(7, "[]", "{}").unwrap(), 7);
        assert!(db.add_node(7, "[]", "{}").is_err());
        // Fresh allocation continues past the hint.
        assert_eq!(db.add_node(0, "[]", "{}").unwrap(), 8);
    }

    #[test]
    fn test_add_edge_requires_endpoints() {
        let db = MemoryAdapter::new();
        let a = db.add_node(0, "[]", "{}").unwrap();
        let b = db.add_node(0, "[]", "{}").unwrap();

        assert!(db.add_edge(0, 0, b, "R", 0.0, "{}").is_err());
        assert!(db.add_edge(0, a, 99, "R", 0.0, "{}").is_err());

        let e = db.add_edge(0, a, b, "KNOWS", 1.5, "{}").unwrap();
        let row = db.edge(e).unwrap().unwrap();
        assert_eq!(row.from_node, a);
        assert_eq!(row.to_node, b);
        assert_eq!(row.edge_type, "KNOWS");
    }

    #[test]
    fn test_update_property_merges() {
        let db = MemoryAdapter::new();
        let id = db.add_node(0, "[]", r#"{"a":1}"#).unwrap();
        db.update_property(id, 0, "b", &Value::Int(2)).unwrap();
        let rec = db.node(id).unwrap().unwrap().decode().unwrap();
        assert_eq!(rec.get("a"), Some(&Value::Int(1)));
        assert_eq!(rec.get("b"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_update_property_rejects_ambiguous_target() {
        let db = MemoryAdapter::new();
        let err = db.update_property(1, 1, "x", &Value::Int(0)).unwrap_err();
        assert_eq!(err.code(), "MISUSE");
        let err = db.update_property(0, 0, "x", &Value::Int(0)).unwrap_err();
        assert_eq!(err.code(), "MISUSE");
    }

    #[test]
    fn test_delete_connected_node_refused_without_detach() {
        let db = MemoryAdapter::new();
        let a = db.add_node(0, "[]", "{}").unwrap();
        let b = db.add_node(0, "[]", "{}").unwrap();
        db.add_edge(0, a, b, "R", 0.0, "{}").unwrap();

        let err = db.delete_node(a, false).unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT");

        db.delete_node(a, true).unwrap();
        assert!(!db.node_exists(a));
        assert_eq!(db.edge_count(), 0);
        assert!(db.node_relationships(b).unwrap().is_empty());
    }

    #[test]
    fn test_next_id_tracks_highest_row() {
        let db = MemoryAdapter::new();
        assert_eq!(db.next_node_id(), 1);
        let id = db.add_node(0, "[]", "{}").unwrap();
        assert_eq!(db.next_node_id(), 2);
        db.delete_node(id, false).unwrap();
        assert_eq!(db.next_node_id(), 1);
    }

    #[test]
    fn test_scan_order_is_id_order() {
        let db = MemoryAdapter::new();
        db.add_node(5, "[]", "{}").unwrap();
        db.add_node(2, "[]", "{}").unwrap();
        db.add_node(9, "[]", "{}").unwrap();
        assert_eq!(db.node_ids().unwrap(), vec![2, 5, 9]);
    }

    #[test]
    fn test_region_bookkeeping() {
        let db = MemoryAdapter::new();
        db.begin_region().unwrap();
        assert!(db.begin_region().is_err());
        db.commit_region().unwrap();
        assert!(db.commit_region().is_err());
        // rollback is idempotent
        db.rollback_region().unwrap();
        db.rollback_region().unwrap();
    }
}
