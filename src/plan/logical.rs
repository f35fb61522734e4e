//! Logical plan — the operator tree describing *what* to compute.
//!
//! Every node carries its estimated cost and row count after
//! [`LogicalNode::estimate`] has run; `Display` renders the annotated tree.

use std::fmt;

use crate::cypher::ast::{Expr, Literal, MergeClause, Pattern, RelDirection, RemoveItem, SetItem};
use crate::model::Value;

/// A projection item carried on plan nodes: the expression plus the column
/// label to expose, when one is known.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanProjection {
    pub expr: Expr,
    pub label: Option<String>,
}

/// A sort key carried on plan nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanSortKey {
    pub expr: Expr,
    pub ascending: bool,
}

/// A logical operator tree node with its estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalNode {
    pub op: LogicalOp,
    /// Estimated cost in abstract units, additive over children.
    pub cost: f64,
    /// Estimated output rows.
    pub rows: i64,
}

/// The closed logical operator set.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalOp {
    // Leaves
    NodeScan { alias: String, label: Option<String> },
    LabelScan { alias: String, label: String },
    IndexScan { alias: String, label: String, property: String, value: Value },
    RelScan { alias: String },
    TypeScan { alias: String, rel_type: String },

    // Traversal
    Expand {
        input: Box<LogicalNode>,
        from_alias: String,
        rel_alias: Option<String>,
        to_alias: String,
        types: Vec<String>,
        direction: RelDirection,
    },
    VarLengthExpand {
        input: Box<LogicalNode>,
        from_alias: String,
        rel_alias: Option<String>,
        to_alias: String,
        types: Vec<String>,
        direction: RelDirection,
        min: Option<u32>,
        max: Option<u32>,
    },
    OptionalExpand {
        input: Box<LogicalNode>,
        from_alias: String,
        rel_alias: Option<String>,
        to_alias: String,
        types: Vec<String>,
        direction: RelDirection,
    },

    // Filters
    Filter { input: Box<LogicalNode>, predicate: Expr },
    PropertyFilter { input: Box<LogicalNode>, alias: String, property: String, value: Value },
    LabelFilter { input: Box<LogicalNode>, alias: String, label: String },

    // Joins
    HashJoin { left: Box<LogicalNode>, right: Box<LogicalNode> },
    NestedLoopJoin { left: Box<LogicalNode>, right: Box<LogicalNode> },
    CartesianProduct { left: Box<LogicalNode>, right: Box<LogicalNode> },

    // Row shaping
    Projection { input: Box<LogicalNode>, items: Vec<PlanProjection> },
    Distinct { input: Box<LogicalNode> },
    Aggregation {
        input: Box<LogicalNode>,
        groups: Vec<PlanProjection>,
        aggregates: Vec<PlanProjection>,
    },
    Sort { input: Box<LogicalNode>, keys: Vec<PlanSortKey> },
    Limit { input: Box<LogicalNode>, count: i64 },
    Skip { input: Box<LogicalNode>, count: i64 },
    Unwind { input: Option<Box<LogicalNode>>, expr: Expr, alias: String },

    // Writes — compiled for explain and driven by the write engine
    Create { input: Option<Box<LogicalNode>>, patterns: Vec<Pattern> },
    Merge { clause: MergeClause },
    Set {
        input: Option<Box<LogicalNode>>,
        items: Vec<SetItem>,
        removes: Vec<RemoveItem>,
    },
    Delete { input: Option<Box<LogicalNode>>, exprs: Vec<Expr> },
    DetachDelete { input: Option<Box<LogicalNode>>, exprs: Vec<Expr> },
}

impl LogicalNode {
    pub fn new(op: LogicalOp) -> Self {
        Self {
            op,
            cost: 0.0,
            rows: 0,
        }
    }

    /// Borrow the node's children in order.
    pub fn children(&self) -> Vec<&LogicalNode> {
        use LogicalOp::*;
        match &self.op {
            NodeScan { .. } | LabelScan { .. } | IndexScan { .. } | RelScan { .. }
            | TypeScan { .. } | Merge { .. } => Vec::new(),
            Expand { input, .. }
            | VarLengthExpand { input, .. }
            | OptionalExpand { input, .. }
            | Filter { input, .. }
            | PropertyFilter { input, .. }
            | LabelFilter { input, .. }
            | Projection { input, .. }
            | Distinct { input }
            | Aggregation { input, .. }
            | Sort { input, .. }
            | Limit { input, .. }
            | Skip { input, .. } => vec![input],
            HashJoin { left, right }
            | NestedLoopJoin { left, right }
            | CartesianProduct { left, right } => vec![left, right],
            Unwind { input, .. }
            | Create { input, .. }
            | Set { input, .. }
            | Delete { input, .. }
            | DetachDelete { input, .. } => input.iter().map(|b| b.as_ref()).collect(),
        }
    }

    /// The set of aliases bound at this node's output, in binding order.
    pub fn aliases(&self) -> Vec<String> {
        use LogicalOp::*;
        match &self.op {
            NodeScan { alias, .. }
            | LabelScan { alias, .. }
            | IndexScan { alias, .. }
            | RelScan { alias }
            | TypeScan { alias, .. } => vec![alias.clone()],
            Expand { input, rel_alias, to_alias, .. }
            | VarLengthExpand { input, rel_alias, to_alias, .. }
            | OptionalExpand { input, rel_alias, to_alias, .. } => {
                let mut out = input.aliases();
                if let Some(r) = rel_alias {
                    if !out.contains(r) {
                        out.push(r.clone());
                    }
                }
                if !out.contains(to_alias) {
                    out.push(to_alias.clone());
                }
                out
            }
            Filter { input, .. }
            | PropertyFilter { input, .. }
            | LabelFilter { input, .. }
            | Distinct { input }
            | Sort { input, .. }
            | Limit { input, .. }
            | Skip { input, .. } => input.aliases(),
            HashJoin { left, right }
            | NestedLoopJoin { left, right }
            | CartesianProduct { left, right } => {
                let mut out = left.aliases();
                for a in right.aliases() {
                    if !out.contains(&a) {
                        out.push(a);
                    }
                }
                out
            }
            Projection { items, .. } => items
                .iter()
                .enumerate()
                .map(|(i, item)| item.label.clone().unwrap_or_else(|| format!("col{i}")))
                .collect(),
            Aggregation { groups, aggregates, .. } => groups
                .iter()
                .chain(aggregates.iter())
                .enumerate()
                .map(|(i, item)| item.label.clone().unwrap_or_else(|| format!("col{i}")))
                .collect(),
            Unwind { input, alias, .. } => {
                let mut out = input.as_ref().map(|i| i.aliases()).unwrap_or_default();
                if !out.contains(alias) {
                    out.push(alias.clone());
                }
                out
            }
            Create { input, patterns } => {
                let mut out = input.as_ref().map(|i| i.aliases()).unwrap_or_default();
                for p in patterns {
                    for a in p.aliases() {
                        if !out.iter().any(|x| x == a) {
                            out.push(a.to_string());
                        }
                    }
                }
                out
            }
            Merge { clause } => clause.pattern.aliases().iter().map(|s| s.to_string()).collect(),
            Set { input, .. } | Delete { input, .. } | DetachDelete { input, .. } => {
                input.as_ref().map(|i| i.aliases()).unwrap_or_default()
            }
        }
    }

    /// Compute the §4.5 estimates bottom-up, storing them on each node.
    /// Leaf rows already set by an optimizer pass (index promotion) are
    /// preserved; pass `reset_leaves` to start from the base table.
    pub fn estimate(&mut self, reset_leaves: bool) {
        use LogicalOp::*;

        // Children first.
        match &mut self.op {
            Expand { input, .. }
            | VarLengthExpand { input, .. }
            | OptionalExpand { input, .. }
            | Filter { input, .. }
            | PropertyFilter { input, .. }
            | LabelFilter { input, .. }
            | Projection { input, .. }
            | Distinct { input }
            | Aggregation { input, .. }
            | Sort { input, .. }
            | Limit { input, .. }
            | Skip { input, .. } => input.estimate(reset_leaves),
            HashJoin { left, right }
            | NestedLoopJoin { left, right }
            | CartesianProduct { left, right } => {
                left.estimate(reset_leaves);
                right.estimate(reset_leaves);
            }
            Unwind { input, .. }
            | Create { input, .. }
            | Set { input, .. }
            | Delete { input, .. }
            | DetachDelete { input, .. } => {
                if let Some(input) = input {
                    input.estimate(reset_leaves);
                }
            }
            _ => {}
        }

        let child_rows = |n: &LogicalNode| n.rows.max(1);
        let child_cost_sum: f64 = self.children().iter().map(|c| c.cost).sum();

        let (base_cost, rows) = match &self.op {
            NodeScan { .. } | RelScan { .. } => (1000.0, 10_000),
            LabelScan { .. } | TypeScan { .. } => (10.0, 1000),
            IndexScan { .. } => (1.0, 100),
            Filter { input, .. } | PropertyFilter { input, .. } | LabelFilter { input, .. } => {
                (1.0, (child_rows(input) / 10).max(1))
            }
            Expand { input, .. } | OptionalExpand { input, .. } => {
                (5.0, child_rows(input).saturating_mul(5))
            }
            VarLengthExpand { input, .. } => (5.0, child_rows(input).saturating_mul(5)),
            HashJoin { left, right } => (
                10.0,
                (child_rows(left).saturating_mul(child_rows(right)) / 100).max(1),
            ),
            NestedLoopJoin { left, right } | CartesianProduct { left, right } => (
                100.0,
                (child_rows(left).saturating_mul(child_rows(right)) / 100).max(1),
            ),
            Projection { input, .. } => (0.1, child_rows(input)),
            Distinct { input } => (1.0, child_rows(input)),
            Aggregation { input, .. } => (10.0, (child_rows(input) / 10).max(1)),
            Sort { input, .. } => (50.0, child_rows(input)),
            Limit { .. } => (1.0, 10),
            Skip { input, .. } => (1.0, child_rows(input)),
            Unwind { input, .. } => (
                1.0,
                input.as_ref().map(|i| child_rows(i)).unwrap_or(1).saturating_mul(10),
            ),
            Create { .. } | Merge { .. } | Set { .. } | Delete { .. } | DetachDelete { .. } => {
                (1.0, 1)
            }
        };

        let is_leaf = self.children().is_empty();
        if is_leaf && !reset_leaves && self.rows > 0 {
            // keep promoted row estimate
        } else {
            self.rows = rows;
        }
        self.cost = base_cost + child_cost_sum;
    }
}

// ============================================================================
// Rendering
// ============================================================================

impl LogicalNode {
    fn fmt_indent(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        use LogicalOp::*;
        for _ in 0..indent {
            write!(f, "  ")?;
        }
        let head = match &self.op {
            NodeScan { alias, label } => match label {
                Some(l) => format!("NodeScan({alias}:{l})"),
                None => format!("NodeScan({alias})"),
            },
            LabelScan { alias, label } => format!("LabelScan({alias}:{label})"),
            IndexScan { alias, label, property, value } => {
                format!("IndexScan({alias}:{label}.{property} = {value})")
            }
            RelScan { alias } => format!("RelScan({alias})"),
            TypeScan { alias, rel_type } => format!("TypeScan({alias}:{rel_type})"),
            Expand { from_alias, to_alias, types, .. } => {
                format!("Expand({from_alias})-[:{}]->({to_alias})", types.join("|"))
            }
            VarLengthExpand { from_alias, to_alias, min, max, .. } => format!(
                "VarLengthExpand({from_alias})-[*{}..{}]->({to_alias})",
                min.map(|m| m.to_string()).unwrap_or_default(),
                max.map(|m| m.to_string()).unwrap_or_default()
            ),
            OptionalExpand { from_alias, to_alias, .. } => {
                format!("OptionalExpand({from_alias})->({to_alias})")
            }
            Filter { predicate, .. } => format!("Filter({predicate})"),
            PropertyFilter { alias, property, value, .. } => {
                format!("PropertyFilter({alias}.{property} = {value})")
            }
            LabelFilter { alias, label, .. } => format!("LabelFilter({alias}:{label})"),
            HashJoin { .. } => "HashJoin".to_string(),
            NestedLoopJoin { .. } => "NestedLoopJoin".to_string(),
            CartesianProduct { .. } => "CartesianProduct".to_string(),
            Projection { items, .. } => {
                let cols: Vec<String> = items
                    .iter()
                    .enumerate()
                    .map(|(i, it)| it.label.clone().unwrap_or_else(|| format!("col{i}")))
                    .collect();
                format!("Projection({})", cols.join(", "))
            }
            Distinct { .. } => "Distinct".to_string(),
            Aggregation { groups, aggregates, .. } => {
                format!("Aggregation(groups={}, aggregates={})", groups.len(), aggregates.len())
            }
            Sort { keys, .. } => format!("Sort({} keys)", keys.len()),
            Limit { count, .. } => format!("Limit({count})"),
            Skip { count, .. } => format!("Skip({count})"),
            Unwind { alias, .. } => format!("Unwind({alias})"),
            Create { patterns, .. } => format!("Create({} patterns)", patterns.len()),
            Merge { .. } => "Merge".to_string(),
            Set { items, removes, .. } => {
                format!("Set({} items, {} removes)", items.len(), removes.len())
            }
            Delete { exprs, .. } => format!("Delete({} targets)", exprs.len()),
            DetachDelete { exprs, .. } => format!("DetachDelete({} targets)", exprs.len()),
        };
        writeln!(f, "{head} [cost={:.1}, rows={}]", self.cost, self.rows)?;
        for child in self.children() {
            child.fmt_indent(f, indent + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for LogicalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indent(f, 0)
    }
}

// ============================================================================
// Literal bridging
// ============================================================================

/// Convert a plan-carried value back into a literal expression, for filters
/// synthesized during lowering.
pub(crate) fn value_to_expr(value: &Value) -> Expr {
    match value {
        Value::Null => Expr::Literal(Literal::Null),
        Value::Bool(b) => Expr::Literal(Literal::Bool(*b)),
        Value::Int(i) => Expr::Literal(Literal::Int(*i)),
        Value::Float(f) => Expr::Literal(Literal::Float(*f)),
        Value::Str(s) => Expr::Literal(Literal::Str(s.clone())),
        Value::NodeRef(id) => Expr::Literal(Literal::Int(id.0)),
        Value::RelRef(id) => Expr::Literal(Literal::Int(id.0)),
        Value::List(items) => Expr::List(items.iter().map(value_to_expr).collect()),
        Value::Map(pairs) => Expr::Map(
            pairs
                .iter()
                .map(|(k, v)| (k.clone(), value_to_expr(v)))
                .collect(),
        ),
    }
}

/// Extract a plan-carried value from a literal expression, when it is one.
pub(crate) fn expr_to_value(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Literal(Literal::Null) => Some(Value::Null),
        Expr::Literal(Literal::Bool(b)) => Some(Value::Bool(*b)),
        Expr::Literal(Literal::Int(i)) => Some(Value::Int(*i)),
        Expr::Literal(Literal::Float(f)) => Some(Value::Float(*f)),
        Expr::Literal(Literal::Str(s)) => Some(Value::Str(s.clone())),
        _ => None,
    }
}
