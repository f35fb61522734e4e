//! Host-side adapters.
//!
//! Thin wrappers the embedding host exposes as scalar functions: the
//! planner/explain text surface and the write surface. The write surface
//! serializes all writers behind one host-scoped mutex; lock order is
//! fixed (controller mutex, then adapter region).

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use crate::cypher;
use crate::model::{NodeId, Value};
use crate::plan::{compile, lower, optimize, PlannerConfig};
use crate::storage::StorageAdapter;
use crate::write::WriteTransaction;
use crate::{Error, Result};

// ============================================================================
// Planner surface
// ============================================================================

/// `plan(q)` — the physical plan as text.
pub fn plan(query: &str) -> Result<String> {
    plan_with(&PlannerConfig::default(), query)
}

pub fn plan_with(config: &PlannerConfig, query: &str) -> Result<String> {
    let ast = cypher::parse(query)?;
    let mut out = String::new();
    for (i, branch) in branches(&ast).into_iter().enumerate() {
        if i > 0 {
            out.push_str("UNION\n");
        }
        let physical = lower(&optimize(compile(branch)?), config)?;
        out.push_str(&physical.to_string());
    }
    Ok(out)
}

/// `logical_plan(q)` — the optimized logical plan as text.
pub fn logical_plan(query: &str) -> Result<String> {
    logical_plan_with(&PlannerConfig::default(), query)
}

pub fn logical_plan_with(_config: &PlannerConfig, query: &str) -> Result<String> {
    let ast = cypher::parse(query)?;
    let mut out = String::new();
    for (i, branch) in branches(&ast).into_iter().enumerate() {
        if i > 0 {
            out.push_str("UNION\n");
        }
        out.push_str(&optimize(compile(branch)?).to_string());
    }
    Ok(out)
}

/// `explain(q)` — both plans plus a cost summary.
pub fn explain(query: &str) -> Result<String> {
    explain_with(&PlannerConfig::default(), query)
}

pub fn explain_with(config: &PlannerConfig, query: &str) -> Result<String> {
    let ast = cypher::parse(query)?;
    let mut out = String::new();
    for (i, branch) in branches(&ast).into_iter().enumerate() {
        if i > 0 {
            out.push_str("UNION\n");
        }
        let logical = optimize(compile(branch)?);
        let physical = lower(&logical, config)?;
        out.push_str("Logical plan:\n");
        out.push_str(&logical.to_string());
        out.push_str("Physical plan:\n");
        out.push_str(&physical.to_string());
        out.push_str(&format!(
            "Estimated cost: {:.2}, estimated rows: {}\n",
            physical.cost, physical.rows
        ));
        out.push_str(&format!(
            "Indexes: {}, index cost factor: {}\n",
            if config.enable_indexes {
                "enabled"
            } else {
                "disabled"
            },
            config.index_cost_factor
        ));
    }
    Ok(out)
}

fn branches(ast: &cypher::ast::Query) -> Vec<&cypher::ast::SingleQuery> {
    let mut out = vec![&ast.first];
    out.extend(ast.unions.iter().map(|(_, b)| b));
    out
}

/// `test_plans()` — a canned fixture exercising the planner end to end.
pub fn test_plans() -> String {
    const FIXTURES: &[&str] = &[
        "MATCH (n) RETURN n",
        "MATCH (n:Person) RETURN n",
        "MATCH (n:Person) WHERE n.name = 'A' RETURN n",
        "MATCH (a:Person), (b:Company) RETURN a, b",
        "MATCH (n:Person) RETURN n.name ORDER BY n.name DESC LIMIT 10",
    ];
    let mut out = String::new();
    for query in FIXTURES {
        out.push_str("-- ");
        out.push_str(query);
        out.push('\n');
        match plan(query) {
            Ok(text) => out.push_str(&text),
            Err(e) => {
                out.push_str("error: ");
                out.push_str(&e.to_string());
                out.push('\n');
            }
        }
    }
    out
}

// ============================================================================
// Write surface
// ============================================================================

/// Host-scoped owner of the single cross-invocation write transaction.
///
/// Point mutations forward to the write engine; without an open explicit
/// transaction they auto-commit. Every call takes the controller mutex, so
/// concurrent embedding users serialize here.
pub struct WriteController<A: StorageAdapter> {
    adapter: Arc<A>,
    open: Mutex<Option<WriteTransaction<A>>>,
}

impl<A: StorageAdapter> WriteController<A> {
    pub fn new(adapter: Arc<A>) -> Self {
        Self {
            adapter,
            open: Mutex::new(None),
        }
    }

    /// `begin_write()` — open the explicit transaction.
    pub fn begin_write(&self) -> Result<String> {
        let mut open = self.open.lock();
        if open.is_some() {
            return Err(Error::Misuse("write transaction already open".into()));
        }
        let mut tx = WriteTransaction::new(self.adapter.clone());
        tx.begin()?;
        *open = Some(tx);
        Ok(json!({"status": "ok", "in_transaction": true}).to_string())
    }

    /// `commit_write()` — commit the open transaction.
    pub fn commit_write(&self) -> Result<String> {
        let mut open = self.open.lock();
        let mut tx = open
            .take()
            .ok_or_else(|| Error::Misuse("no open write transaction".into()))?;
        tx.commit()?;
        Ok(json!({"status": "ok", "in_transaction": false}).to_string())
    }

    /// `rollback_write()` — roll back. A rollback with nothing open is a
    /// no-op, matching rollback idempotence.
    pub fn rollback_write(&self) -> Result<String> {
        let mut open = self.open.lock();
        match open.take() {
            Some(mut tx) => {
                tx.rollback()?;
                Ok(json!({"status": "ok", "in_transaction": false}).to_string())
            }
            None => Ok(json!({"status": "noop", "in_transaction": false}).to_string()),
        }
    }

    /// `create_node(labels, properties)`.
    pub fn create_node(
        &self,
        labels: &[String],
        properties: &[(String, Value)],
    ) -> Result<String> {
        self.with_tx(|tx| {
            let id = tx.create_node(labels, properties)?;
            Ok(json!({"node_id": id.0, "labels": labels}).to_string())
        })
    }

    /// `create_relationship(from, to, type, weight, properties)`.
    pub fn create_relationship(
        &self,
        from: i64,
        to: i64,
        edge_type: &str,
        weight: f64,
        properties: &[(String, Value)],
    ) -> Result<String> {
        self.with_tx(|tx| {
            let id =
                tx.create_relationship(NodeId(from), NodeId(to), edge_type, weight, properties)?;
            Ok(json!({
                "edge_id": id,
                "from_node": from,
                "to_node": to,
                "edge_type": edge_type,
            })
            .to_string())
        })
    }

    /// `merge_node(labels, match_properties)`.
    pub fn merge_node(
        &self,
        labels: &[String],
        match_properties: &[(String, Value)],
    ) -> Result<String> {
        self.with_tx(|tx| {
            let outcome = tx.merge_node(labels, match_properties)?;
            Ok(json!({
                "node_id": outcome.node_id.0,
                "was_created": outcome.was_created,
            })
            .to_string())
        })
    }

    /// `set_property(node_id, edge_id, property, value)` — exactly one of
    /// the ids must be positive.
    pub fn set_property(
        &self,
        node_id: i64,
        edge_id: i64,
        property: &str,
        value: &Value,
    ) -> Result<String> {
        self.with_tx(|tx| {
            tx.set_property(node_id, edge_id, property, value)?;
            Ok(json!({
                "node_id": node_id,
                "edge_id": edge_id,
                "property": property,
            })
            .to_string())
        })
    }

    /// `delete_node(id, detach)`.
    pub fn delete_node(&self, id: i64, detach: bool) -> Result<String> {
        self.with_tx(|tx| {
            tx.delete_node(NodeId(id), detach)?;
            Ok(json!({"node_id": id, "detach": detach}).to_string())
        })
    }

    /// The id the next node would take — observable so hosts can assert
    /// allocation behavior around rollback.
    pub fn next_node_id(&self) -> i64 {
        let _guard = self.open.lock();
        self.adapter.next_node_id()
    }

    fn with_tx<R>(&self, f: impl FnOnce(&mut WriteTransaction<A>) -> Result<R>) -> Result<R> {
        let mut open = self.open.lock();
        match open.as_mut() {
            Some(tx) => f(tx),
            None => {
                // Auto-commit: an ephemeral transaction for one operation.
                let mut tx = WriteTransaction::new(self.adapter.clone());
                f(&mut tx)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAdapter;

    #[test]
    fn test_plan_text_for_index_scan() {
        let text = plan("MATCH (n:Person) WHERE n.name = 'A' RETURN n").unwrap();
        assert!(text.contains("PropertyIndexScan(n:Person.name = 'A')"), "{text}");
        assert!(text.contains("Projection(n)"));
    }

    #[test]
    fn test_logical_plan_text() {
        let text = logical_plan("MATCH (n:Person) RETURN n").unwrap();
        assert!(text.contains("LabelScan(n:Person)"), "{text}");
    }

    #[test]
    fn test_explain_contains_both_plans_and_costs() {
        let text = explain("MATCH (n:Person) RETURN n").unwrap();
        assert!(text.contains("Logical plan:"));
        assert!(text.contains("Physical plan:"));
        assert!(text.contains("Estimated cost:"));
        assert!(text.contains("index cost factor: 0.1"));
    }

    #[test]
    fn test_test_plans_fixture_runs() {
        let text = test_plans();
        assert!(text.contains("-- MATCH (n) RETURN n"));
        assert!(text.contains("AllNodesScan"));
    }

    #[test]
    fn test_controller_round_trip() {
        let controller = WriteController::new(Arc::new(MemoryAdapter::new()));
        let summary = controller
            .create_node(&["Person".to_string()], &[("name".into(), Value::Str("A".into()))])
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&summary).unwrap();
        assert_eq!(parsed["node_id"], 1);

        let merged = controller
            .merge_node(&["Person".to_string()], &[("name".into(), Value::Str("A".into()))])
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&merged).unwrap();
        assert_eq!(parsed["was_created"], false);
    }

    #[test]
    fn test_controller_explicit_rollback() {
        let controller = WriteController::new(Arc::new(MemoryAdapter::new()));
        let before = controller.next_node_id();

        controller.begin_write().unwrap();
        controller.create_node(&["Person".to_string()], &[]).unwrap();
        controller.rollback_write().unwrap();

        assert_eq!(controller.next_node_id(), before);
        // A second rollback is a no-op.
        let noop = controller.rollback_write().unwrap();
        assert!(noop.contains("noop"));
    }

    #[test]
    fn test_controller_rejects_nested_begin() {
        let controller = WriteController::new(Arc::new(MemoryAdapter::new()));
        controller.begin_write().unwrap();
        assert_eq!(controller.begin_write().unwrap_err().code(), "MISUSE");
        controller.rollback_write().unwrap();
    }
}
