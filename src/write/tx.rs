//! The write transaction — validated mutations with an undo log.
//!
//! Every mutation (a) validates its inputs, (b) appends an undo record
//! capturing prior state, (c) invokes the storage adapter. On rollback the
//! log replays strictly LIFO. An error inside one operation rolls back that
//! operation only; the enclosing transaction decides whether to continue.

use std::sync::Arc;

use tracing::debug;

use super::ops::{
    validate_identifier, validate_labels, validate_properties, validate_property_value, UndoRecord,
};
use crate::exec::ExecutionStats;
use crate::model::{NodeId, Value};
use crate::storage::{labels_json, parse_labels, parse_properties, properties_json, sanitize_value, StorageAdapter};
use crate::{Error, Result};

/// Result of a MERGE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub node_id: NodeId,
    pub was_created: bool,
}

/// A write transaction over a storage adapter.
///
/// Without an explicit `begin`, the transaction auto-commits: each
/// operation stands alone and the log is discarded once it succeeds.
pub struct WriteTransaction<A: StorageAdapter> {
    adapter: Arc<A>,
    log: Vec<UndoRecord>,
    in_tx: bool,
    auto_commit: bool,
    next_node_id: i64,
    next_edge_id: i64,
    pub stats: ExecutionStats,
}

impl<A: StorageAdapter> WriteTransaction<A> {
    pub fn new(adapter: Arc<A>) -> Self {
        Self {
            adapter,
            log: Vec::new(),
            in_tx: false,
            auto_commit: true,
            next_node_id: 0,
            next_edge_id: 0,
            stats: ExecutionStats::default(),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn in_transaction(&self) -> bool {
        self.in_tx
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the adapter's atomic region and start logging for rollback.
    pub fn begin(&mut self) -> Result<()> {
        if self.in_tx {
            return Err(Error::Misuse("transaction already open".into()));
        }
        self.adapter.begin_region()?;
        self.in_tx = true;
        self.auto_commit = false;
        self.next_node_id = self.adapter.next_node_id();
        self.next_edge_id = self.adapter.next_edge_id();
        debug!(next_node_id = self.next_node_id, "write transaction open");
        Ok(())
    }

    /// Commit: operations were applied eagerly, so this asks the adapter to
    /// commit the region and clears the log. A failed region commit rolls
    /// everything back.
    pub fn commit(&mut self) -> Result<()> {
        if !self.in_tx {
            return Err(Error::Misuse("no open transaction".into()));
        }
        if let Err(e) = self.adapter.commit_region() {
            let _ = self.adapter.rollback_region();
            let _ = self.replay_undo(0);
            self.finish();
            return Err(e);
        }
        debug!(ops = self.log.len(), "write transaction committed");
        self.finish();
        Ok(())
    }

    /// Roll back: replay the undo log LIFO and release the region.
    /// Idempotent — rolling back an already-finished transaction is a no-op.
    pub fn rollback(&mut self) -> Result<()> {
        if !self.in_tx && self.log.is_empty() {
            return Ok(());
        }
        let result = self.replay_undo(0);
        let _ = self.adapter.rollback_region();
        self.finish();
        debug!("write transaction rolled back");
        result
    }

    fn finish(&mut self) {
        self.log.clear();
        self.in_tx = false;
        self.auto_commit = true;
        self.next_node_id = 0;
        self.next_edge_id = 0;
    }

    /// Replay undo records above `mark` in LIFO order. A failing record
    /// does not stop the replay; the last error is surfaced.
    fn replay_undo(&mut self, mark: usize) -> Result<()> {
        let mut last_err = None;
        while self.log.len() > mark {
            let record = match self.log.pop() {
                Some(r) => r,
                None => break,
            };
            if let Err(e) = record.reverse(self.adapter.as_ref()) {
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run one operation: on failure its own undo records are replayed, so
    /// prior logged operations stay intact. In auto-commit mode a successful
    /// operation discards its records.
    fn with_op<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        let mark = self.log.len();
        match f(self) {
            Ok(r) => {
                if self.auto_commit {
                    self.log.clear();
                }
                Ok(r)
            }
            Err(e) => {
                let _ = self.replay_undo(mark);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Id allocation — monotonic within the transaction, probing the adapter
    // to skip ids that are already occupied.
    // ========================================================================

    fn alloc_node_id(&mut self) -> i64 {
        if self.next_node_id <= 0 {
            self.next_node_id = self.adapter.next_node_id();
        }
        loop {
            let candidate = self.next_node_id;
            self.next_node_id += 1;
            if !self.adapter.node_exists(candidate) {
                return candidate;
            }
        }
    }

    fn alloc_edge_id(&mut self) -> i64 {
        if self.next_edge_id <= 0 {
            self.next_edge_id = self.adapter.next_edge_id();
        }
        loop {
            let candidate = self.next_edge_id;
            self.next_edge_id += 1;
            if !self.adapter.edge_exists(candidate) {
                return candidate;
            }
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// CREATE a node. Returns the new id.
    pub fn create_node(
        &mut self,
        labels: &[String],
        properties: &[(String, Value)],
    ) -> Result<NodeId> {
        validate_labels(labels)?;
        validate_properties(properties)?;
        self.with_op(|tx| {
            let id = tx.alloc_node_id();
            let props: Vec<(String, Value)> = properties
                .iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v)))
                .collect();
            let id = tx
                .adapter
                .add_node(id, &labels_json(labels), &properties_json(&props))?;
            tx.log.push(UndoRecord::CreateNode { id });
            tx.stats.nodes_created += 1;
            Ok(NodeId(id))
        })
    }

    /// CREATE a relationship. Both endpoints must already exist.
    pub fn create_relationship(
        &mut self,
        from: NodeId,
        to: NodeId,
        edge_type: &str,
        weight: f64,
        properties: &[(String, Value)],
    ) -> Result<i64> {
        validate_identifier("relationship type", edge_type)?;
        validate_properties(properties)?;
        if !self.adapter.node_exists(from.0) {
            return Err(Error::NotFound(format!("source node {from}")));
        }
        if !self.adapter.node_exists(to.0) {
            return Err(Error::NotFound(format!("target node {to}")));
        }
        self.with_op(|tx| {
            let id = tx.alloc_edge_id();
            let props: Vec<(String, Value)> = properties
                .iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v)))
                .collect();
            let id = tx.adapter.add_edge(
                id,
                from.0,
                to.0,
                edge_type,
                weight,
                &properties_json(&props),
            )?;
            tx.log.push(UndoRecord::CreateRel { id });
            tx.stats.relationships_created += 1;
            Ok(id)
        })
    }

    /// SET a property on a node (`edge_id = 0`) or an edge (`node_id = 0`).
    pub fn set_property(
        &mut self,
        node_id: i64,
        edge_id: i64,
        property: &str,
        value: &Value,
    ) -> Result<()> {
        validate_identifier("property", property)?;
        validate_property_value(value)?;
        let prior = self.current_property(node_id, edge_id, property)?;
        self.with_op(|tx| {
            tx.adapter.update_property(node_id, edge_id, property, value)?;
            tx.log.push(UndoRecord::SetProperty {
                node_id,
                edge_id,
                property: property.to_string(),
                prior,
            });
            tx.stats.properties_set += 1;
            Ok(())
        })
    }

    /// REMOVE a property.
    pub fn remove_property(&mut self, node_id: i64, edge_id: i64, property: &str) -> Result<()> {
        validate_identifier("property", property)?;
        let prior = self.current_property(node_id, edge_id, property)?;
        self.with_op(|tx| {
            tx.adapter.remove_property(node_id, edge_id, property)?;
            tx.log.push(UndoRecord::RemoveProperty {
                node_id,
                edge_id,
                property: property.to_string(),
                prior,
            });
            tx.stats.properties_set += 1;
            Ok(())
        })
    }

    /// SET a label on a node. Re-adding a present label is a constraint
    /// violation; the label count limit is enforced.
    pub fn set_label(&mut self, node_id: NodeId, label: &str) -> Result<()> {
        validate_identifier("label", label)?;
        let prior = self.current_labels(node_id)?;
        let mut labels = parse_labels(&prior)?;
        if labels.iter().any(|l| l == label) {
            return Err(Error::Constraint(format!(
                "node {node_id} already has label '{label}'"
            )));
        }
        labels.push(label.to_string());
        validate_labels(&labels)?;
        self.with_op(|tx| {
            tx.adapter.set_labels(node_id.0, &labels_json(&labels))?;
            tx.log.push(UndoRecord::SetLabel {
                node_id: node_id.0,
                prior_labels: prior,
            });
            tx.stats.labels_added += 1;
            Ok(())
        })
    }

    /// REMOVE a label from a node. Removing an absent label is a no-op.
    pub fn remove_label(&mut self, node_id: NodeId, label: &str) -> Result<()> {
        validate_identifier("label", label)?;
        let prior = self.current_labels(node_id)?;
        let mut labels = parse_labels(&prior)?;
        let before = labels.len();
        labels.retain(|l| l != label);
        if labels.len() == before {
            return Ok(());
        }
        self.with_op(|tx| {
            tx.adapter.set_labels(node_id.0, &labels_json(&labels))?;
            tx.log.push(UndoRecord::RemoveLabel {
                node_id: node_id.0,
                prior_labels: prior,
            });
            tx.stats.labels_removed += 1;
            Ok(())
        })
    }

    /// DELETE a node. Plain delete refuses while relationships are
    /// connected; DETACH collects and deletes incident relationships first.
    pub fn delete_node(&mut self, node_id: NodeId, detach: bool) -> Result<()> {
        let node = self
            .adapter
            .node(node_id.0)?
            .ok_or_else(|| Error::NotFound(format!("node {node_id}")))?;
        let incident = self.adapter.node_relationships(node_id.0)?;
        if !detach && !incident.is_empty() {
            return Err(Error::Constraint(format!(
                "cannot delete node {node_id} with {} connected relationships",
                incident.len()
            )));
        }

        self.with_op(|tx| {
            for edge_id in &incident {
                if let Some(edge) = tx.adapter.edge(*edge_id)? {
                    tx.adapter.delete_edge(edge.edge_id)?;
                    tx.log.push(UndoRecord::DeleteRel {
                        id: edge.edge_id,
                        from: edge.from_node,
                        to: edge.to_node,
                        edge_type: edge.edge_type,
                        weight: edge.weight,
                        properties: edge.properties,
                    });
                    tx.stats.relationships_deleted += 1;
                }
            }
            tx.adapter.delete_node(node_id.0, false)?;
            let record = if detach {
                UndoRecord::DetachDeleteNode {
                    id: node.node_id,
                    labels: node.labels,
                    properties: node.properties,
                }
            } else {
                UndoRecord::DeleteNode {
                    id: node.node_id,
                    labels: node.labels,
                    properties: node.properties,
                }
            };
            tx.log.push(record);
            tx.stats.nodes_deleted += 1;
            Ok(())
        })
    }

    /// DELETE a relationship.
    pub fn delete_relationship(&mut self, edge_id: i64) -> Result<()> {
        let edge = self
            .adapter
            .edge(edge_id)?
            .ok_or_else(|| Error::NotFound(format!("edge {edge_id}")))?;
        self.with_op(|tx| {
            tx.adapter.delete_edge(edge_id)?;
            tx.log.push(UndoRecord::DeleteRel {
                id: edge.edge_id,
                from: edge.from_node,
                to: edge.to_node,
                edge_type: edge.edge_type,
                weight: edge.weight,
                properties: edge.properties,
            });
            tx.stats.relationships_deleted += 1;
            Ok(())
        })
    }

    /// MERGE a node: match on all (label, property) constraints, otherwise
    /// create. ON CREATE / ON MATCH property writes are the caller's to
    /// apply via `set_property` after inspecting `was_created`.
    pub fn merge_node(
        &mut self,
        labels: &[String],
        match_properties: &[(String, Value)],
    ) -> Result<MergeOutcome> {
        validate_labels(labels)?;
        validate_properties(match_properties)?;

        if let Some(found) = self.find_merge_match(labels, match_properties)? {
            debug!(node = found.0, "merge matched existing node");
            self.with_op(|tx| {
                tx.log.push(UndoRecord::MergeNode {
                    id: found.0,
                    created: false,
                });
                Ok(())
            })?;
            return Ok(MergeOutcome {
                node_id: found,
                was_created: false,
            });
        }

        self.with_op(|tx| {
            let id = tx.alloc_node_id();
            let props: Vec<(String, Value)> = match_properties
                .iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v)))
                .collect();
            let id = tx
                .adapter
                .add_node(id, &labels_json(labels), &properties_json(&props))?;
            tx.log.push(UndoRecord::MergeNode { id, created: true });
            tx.stats.nodes_created += 1;
            debug!(node = id, "merge created node");
            Ok(MergeOutcome {
                node_id: NodeId(id),
                was_created: true,
            })
        })
    }

    fn find_merge_match(
        &self,
        labels: &[String],
        match_properties: &[(String, Value)],
    ) -> Result<Option<NodeId>> {
        for id in self.adapter.node_ids()? {
            let Some(row) = self.adapter.node(id)? else {
                continue;
            };
            let node_labels = parse_labels(&row.labels)?;
            if !labels.iter().all(|l| node_labels.contains(l)) {
                continue;
            }
            let props = parse_properties(&row.properties)?;
            let all_match = match_properties
                .iter()
                .all(|(k, v)| props.iter().any(|(pk, pv)| pk == k && pv == v));
            if all_match {
                return Ok(Some(NodeId(id)));
            }
        }
        Ok(None)
    }

    // ========================================================================
    // Prior-state capture
    // ========================================================================

    fn current_property(&self, node_id: i64, edge_id: i64, property: &str) -> Result<Value> {
        if (node_id > 0) == (edge_id > 0) {
            return Err(Error::Misuse(
                "exactly one of node_id/edge_id must be positive".into(),
            ));
        }
        let json = if node_id > 0 {
            self.adapter
                .node(node_id)?
                .ok_or_else(|| Error::NotFound(format!("node {node_id}")))?
                .properties
        } else {
            self.adapter
                .edge(edge_id)?
                .ok_or_else(|| Error::NotFound(format!("edge {edge_id}")))?
                .properties
        };
        let props = parse_properties(&json)?;
        Ok(props
            .into_iter()
            .find(|(k, _)| k == property)
            .map(|(_, v)| v)
            .unwrap_or(Value::Null))
    }

    fn current_labels(&self, node_id: NodeId) -> Result<String> {
        Ok(self
            .adapter
            .node(node_id.0)?
            .ok_or_else(|| Error::NotFound(format!("node {node_id}")))?
            .labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAdapter;

    fn tx() -> WriteTransaction<MemoryAdapter> {
        WriteTransaction::new(Arc::new(MemoryAdapter::new()))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_create_and_rollback_restores_next_id() {
        let mut tx = tx();
        let before = tx.adapter().next_node_id();
        tx.begin().unwrap();
        tx.create_node(&strings(&["Person"]), &[("name".into(), Value::Str("C".into()))])
            .unwrap();
        tx.rollback().unwrap();

        assert_eq!(tx.adapter().node_count(), 0);
        assert_eq!(tx.log_len(), 0);
        assert_eq!(tx.adapter().next_node_id(), before);
    }

    #[test]
    fn test_commit_leaves_log_empty() {
        let mut tx = tx();
        tx.begin().unwrap();
        tx.create_node(&strings(&["A"]), &[]).unwrap();
        tx.commit().unwrap();
        assert_eq!(tx.log_len(), 0);
        assert_eq!(tx.adapter().node_count(), 1);
    }

    #[test]
    fn test_rollback_is_idempotent() {
        let mut tx = tx();
        tx.begin().unwrap();
        tx.create_node(&strings(&["A"]), &[]).unwrap();
        tx.rollback().unwrap();
        tx.rollback().unwrap();
        assert_eq!(tx.adapter().node_count(), 0);
    }

    #[test]
    fn test_set_property_rollback_restores_prior_value() {
        let mut tx = tx();
        let id = tx.create_node(&strings(&["A"]), &[("k".into(), Value::Int(1))]).unwrap();

        tx.begin().unwrap();
        tx.set_property(id.0, 0, "k", &Value::Int(2)).unwrap();
        tx.set_property(id.0, 0, "fresh", &Value::Str("x".into())).unwrap();
        tx.rollback().unwrap();

        let rec = tx.adapter().node(id.0).unwrap().unwrap().decode().unwrap();
        assert_eq!(rec.get("k"), Some(&Value::Int(1)));
        assert_eq!(rec.get("fresh"), None);
    }

    #[test]
    fn test_detach_delete_rollback_restores_edges() {
        let mut tx = tx();
        let a = tx.create_node(&strings(&["A"]), &[]).unwrap();
        let b = tx.create_node(&strings(&["B"]), &[]).unwrap();
        let e = tx.create_relationship(a, b, "R", 0.5, &[]).unwrap();

        tx.begin().unwrap();
        tx.delete_node(a, true).unwrap();
        assert!(!tx.adapter().node_exists(a.0));
        assert!(!tx.adapter().edge_exists(e));
        tx.rollback().unwrap();

        assert!(tx.adapter().node_exists(a.0));
        let edge = tx.adapter().edge(e).unwrap().unwrap();
        assert_eq!(edge.from_node, a.0);
        assert_eq!(edge.to_node, b.0);
        assert_eq!(edge.edge_type, "R");
    }

    #[test]
    fn test_plain_delete_refuses_connected_node() {
        let mut tx = tx();
        let a = tx.create_node(&strings(&["A"]), &[]).unwrap();
        let b = tx.create_node(&strings(&["B"]), &[]).unwrap();
        tx.create_relationship(a, b, "R", 0.0, &[]).unwrap();

        assert_eq!(tx.delete_node(a, false).unwrap_err().code(), "CONSTRAINT");
        assert!(tx.adapter().node_exists(a.0));
    }

    #[test]
    fn test_merge_matches_existing() {
        let mut tx = tx();
        let id = tx
            .create_node(&strings(&["U"]), &[("email".into(), Value::Str("x".into()))])
            .unwrap();

        let outcome = tx
            .merge_node(&strings(&["U"]), &[("email".into(), Value::Str("x".into()))])
            .unwrap();
        assert!(!outcome.was_created);
        assert_eq!(outcome.node_id, id);
        assert_eq!(tx.adapter().node_count(), 1);
    }

    #[test]
    fn test_merge_creates_when_absent() {
        let mut tx = tx();
        let outcome = tx
            .merge_node(&strings(&["U"]), &[("email".into(), Value::Str("y".into()))])
            .unwrap();
        assert!(outcome.was_created);
        let rec = tx
            .adapter()
            .node(outcome.node_id.0)
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert!(rec.has_label("U"));
        assert_eq!(rec.get("email"), Some(&Value::Str("y".into())));
    }

    #[test]
    fn test_merge_create_rolls_back_to_nothing() {
        let mut tx = tx();
        tx.begin().unwrap();
        let outcome = tx.merge_node(&strings(&["U"]), &[]).unwrap();
        assert!(outcome.was_created);
        tx.rollback().unwrap();
        assert_eq!(tx.adapter().node_count(), 0);
    }

    #[test]
    fn test_create_relationship_requires_endpoints() {
        let mut tx = tx();
        let a = tx.create_node(&strings(&["A"]), &[]).unwrap();
        let err = tx
            .create_relationship(a, NodeId(999), "R", 0.0, &[])
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_invalid_label_rejected_before_mutation() {
        let mut tx = tx();
        let err = tx.create_node(&strings(&["9bad"]), &[]).unwrap_err();
        assert_eq!(err.code(), "INVALID_FORMAT");
        let err = tx.create_node(&strings(&["MATCH"]), &[]).unwrap_err();
        assert_eq!(err.code(), "INVALID_FORMAT");
        assert_eq!(tx.adapter().node_count(), 0);
    }

    #[test]
    fn test_set_label_duplicate_is_constraint() {
        let mut tx = tx();
        let id = tx.create_node(&strings(&["A"]), &[]).unwrap();
        assert_eq!(tx.set_label(id, "A").unwrap_err().code(), "CONSTRAINT");
        tx.set_label(id, "B").unwrap();
        let rec = tx.adapter().node(id.0).unwrap().unwrap().decode().unwrap();
        assert!(rec.has_label("A") && rec.has_label("B"));
    }

    #[test]
    fn test_label_order_preserved_through_set_and_rollback() {
        let mut tx = tx();
        let id = tx.create_node(&strings(&["A", "B"]), &[]).unwrap();
        tx.begin().unwrap();
        tx.set_label(id, "C").unwrap();
        tx.rollback().unwrap();
        let rec = tx.adapter().node(id.0).unwrap().unwrap().decode().unwrap();
        assert_eq!(rec.labels.as_slice(), ["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_allocator_skips_occupied_ids() {
        let mut tx = tx();
        // Seed a node at a high id directly through the adapter.
        tx.adapter().add_node(5, "[]", "{}").unwrap();
        tx.begin().unwrap();
        let id = tx.create_node(&strings(&["A"]), &[]).unwrap();
        assert_eq!(id.0, 6);
        tx.commit().unwrap();
    }
}
