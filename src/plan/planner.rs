//! Query planner — compiles the AST into a logical plan and optimizes it.
//!
//! The planner is substrate-agnostic: it produces logical operators that the
//! lowering step maps to physical strategies. Optimization runs in a fixed
//! order — join reordering, then index selection — and is idempotent.

use tracing::debug;

use super::logical::{expr_to_value, LogicalNode, LogicalOp, PlanProjection, PlanSortKey};
use crate::cypher::ast::{
    Expr, MatchClause, NodePattern, Pattern, PatternElement, ProjectionItem, ReadingClause,
    ReturnClause, SingleQuery, UpdatingClause,
};
use crate::model::Value;
use crate::{Error, Result};

/// Default column alias for unaliased node patterns.
pub const DEFAULT_NODE_ALIAS: &str = "node";

// ============================================================================
// Compilation
// ============================================================================

struct CompileCtx {
    /// Aliases bound so far, in binding order. Drives `RETURN *`.
    bound: Vec<String>,
}

impl CompileCtx {
    fn bind(&mut self, alias: &str) {
        if !self.bound.iter().any(|b| b == alias) {
            self.bound.push(alias.to_string());
        }
    }
}

/// Compile one query branch into an unoptimized logical plan.
///
/// A branch with neither reading clauses nor updating clauses (bare
/// `RETURN`) has no source to plan over; the executor evaluates it
/// directly.
pub fn compile(query: &SingleQuery) -> Result<LogicalNode> {
    let mut ctx = CompileCtx { bound: Vec::new() };
    let mut pipeline: Option<LogicalNode> = None;

    for clause in &query.reading {
        match clause {
            ReadingClause::Match(m) => {
                let sub = compile_match(m, &mut ctx)?;
                pipeline = Some(match pipeline {
                    None => sub,
                    Some(existing) => LogicalNode::new(LogicalOp::HashJoin {
                        left: Box::new(existing),
                        right: Box::new(sub),
                    }),
                });
            }
            ReadingClause::With(w) => {
                let input = pipeline.take().ok_or_else(|| {
                    Error::Planner("WITH requires a preceding reading clause".into())
                })?;
                let items = projection_items(&w.items, &ctx)?;
                ctx.bound = items
                    .iter()
                    .enumerate()
                    .map(|(i, it)| it.label.clone().unwrap_or_else(|| format!("col{i}")))
                    .collect();
                let mut node = LogicalNode::new(LogicalOp::Projection {
                    input: Box::new(input),
                    items,
                });
                if w.distinct {
                    node = LogicalNode::new(LogicalOp::Distinct {
                        input: Box::new(node),
                    });
                }
                if let Some(predicate) = &w.where_clause {
                    node = make_filter(node, predicate.clone());
                }
                pipeline = Some(node);
            }
            ReadingClause::Unwind(u) => {
                ctx.bind(&u.alias);
                pipeline = Some(LogicalNode::new(LogicalOp::Unwind {
                    input: pipeline.take().map(Box::new),
                    expr: u.expr.clone(),
                    alias: u.alias.clone(),
                }));
            }
        }
    }

    for clause in &query.updating {
        pipeline = Some(compile_updating(clause, pipeline.take(), &mut ctx)?);
    }

    let pipeline = match pipeline {
        Some(p) => p,
        None => {
            return Err(Error::Planner(
                "query has no pattern source to plan over".into(),
            ));
        }
    };

    match &query.return_clause {
        Some(ret) => compile_return(pipeline, ret, &ctx),
        None => Ok(pipeline),
    }
}

fn compile_match(m: &MatchClause, ctx: &mut CompileCtx) -> Result<LogicalNode> {
    let mut plan: Option<LogicalNode> = None;

    for pattern in &m.patterns {
        let sub = compile_pattern(pattern, m.optional, ctx)?;
        plan = Some(match plan {
            None => sub,
            Some(existing) => LogicalNode::new(LogicalOp::HashJoin {
                left: Box::new(existing),
                right: Box::new(sub),
            }),
        });
    }

    let mut plan = plan.ok_or_else(|| Error::Planner("MATCH without a pattern".into()))?;

    if let Some(predicate) = &m.where_clause {
        plan = make_filter(plan, predicate.clone());
    }

    Ok(plan)
}

fn compile_pattern(
    pattern: &Pattern,
    optional: bool,
    ctx: &mut CompileCtx,
) -> Result<LogicalNode> {
    let mut elements = pattern.elements.iter();

    let first = match elements.next() {
        Some(PatternElement::Node(n)) => n,
        _ => return Err(Error::Planner("pattern must start with a node".into())),
    };

    let mut plan = compile_node_scan(first, ctx);
    let mut prev_alias = node_alias(first);

    while let Some(element) = elements.next() {
        let PatternElement::Rel(rel) = element else {
            return Err(Error::Planner("expected relationship in pattern".into()));
        };
        let Some(PatternElement::Node(to)) = elements.next() else {
            return Err(Error::Planner("relationship must end in a node".into()));
        };

        let to_alias = node_alias(to);
        ctx.bind(&to_alias);
        if let Some(rel_alias) = &rel.alias {
            ctx.bind(rel_alias);
        }

        let op = if let Some(vl) = &rel.var_length {
            LogicalOp::VarLengthExpand {
                input: Box::new(plan),
                from_alias: prev_alias.clone(),
                rel_alias: rel.alias.clone(),
                to_alias: to_alias.clone(),
                types: rel.types.clone(),
                direction: rel.direction,
                min: vl.min,
                max: vl.max,
            }
        } else if optional {
            LogicalOp::OptionalExpand {
                input: Box::new(plan),
                from_alias: prev_alias.clone(),
                rel_alias: rel.alias.clone(),
                to_alias: to_alias.clone(),
                types: rel.types.clone(),
                direction: rel.direction,
            }
        } else {
            LogicalOp::Expand {
                input: Box::new(plan),
                from_alias: prev_alias.clone(),
                rel_alias: rel.alias.clone(),
                to_alias: to_alias.clone(),
                types: rel.types.clone(),
                direction: rel.direction,
            }
        };
        plan = LogicalNode::new(op);

        // The target node has no scan of its own, so every label and inline
        // property it carries becomes a filter above the expansion.
        plan = apply_pattern_properties(plan, &to_alias, to);
        for label in &to.labels {
            plan = LogicalNode::new(LogicalOp::LabelFilter {
                input: Box::new(plan),
                alias: to_alias.clone(),
                label: label.clone(),
            });
        }

        prev_alias = to_alias;
    }

    Ok(plan)
}

/// Compile a node pattern into its scan leaf plus any residual filters.
fn compile_node_scan(node: &NodePattern, ctx: &mut CompileCtx) -> LogicalNode {
    let alias = node_alias(node);
    ctx.bind(&alias);

    let mut plan = if let Some(label) = node.labels.first() {
        LogicalNode::new(LogicalOp::LabelScan {
            alias: alias.clone(),
            label: label.clone(),
        })
    } else {
        LogicalNode::new(LogicalOp::NodeScan {
            alias: alias.clone(),
            label: None,
        })
    };

    for extra in node.labels.iter().skip(1) {
        plan = LogicalNode::new(LogicalOp::LabelFilter {
            input: Box::new(plan),
            alias: alias.clone(),
            label: extra.clone(),
        });
    }

    apply_pattern_properties(plan, &alias, node)
}

fn apply_pattern_properties(mut plan: LogicalNode, alias: &str, node: &NodePattern) -> LogicalNode {
    for (key, expr) in &node.properties {
        plan = match expr_to_value(expr) {
            Some(value) => LogicalNode::new(LogicalOp::PropertyFilter {
                input: Box::new(plan),
                alias: alias.to_string(),
                property: key.clone(),
                value,
            }),
            None => make_filter(
                plan,
                Expr::Binary {
                    left: Box::new(Expr::Property {
                        expr: Box::new(Expr::Variable(alias.to_string())),
                        key: key.clone(),
                    }),
                    op: crate::cypher::ast::BinaryOp::Eq,
                    right: Box::new(expr.clone()),
                },
            ),
        };
    }
    plan
}

fn node_alias(node: &NodePattern) -> String {
    node.alias
        .clone()
        .unwrap_or_else(|| DEFAULT_NODE_ALIAS.to_string())
}

/// Classify a WHERE predicate: `var.prop = literal` becomes PropertyFilter,
/// `var:Label` becomes LabelFilter, anything else a generic Filter.
fn make_filter(input: LogicalNode, predicate: Expr) -> LogicalNode {
    use crate::cypher::ast::BinaryOp;

    if let Expr::Binary { left, op: BinaryOp::Eq, right } = &predicate {
        let shaped = match (left.as_ref(), right.as_ref()) {
            (Expr::Property { expr, key }, rhs) => expr_to_value(rhs).and_then(|value| {
                as_variable(expr).map(|alias| (alias.to_string(), key.clone(), value))
            }),
            (lhs, Expr::Property { expr, key }) => expr_to_value(lhs).and_then(|value| {
                as_variable(expr).map(|alias| (alias.to_string(), key.clone(), value))
            }),
            _ => None,
        };
        if let Some((alias, property, value)) = shaped {
            return LogicalNode::new(LogicalOp::PropertyFilter {
                input: Box::new(input),
                alias,
                property,
                value,
            });
        }
    }

    if let Expr::HasLabel { expr, label } = &predicate {
        if let Some(alias) = as_variable(expr) {
            return LogicalNode::new(LogicalOp::LabelFilter {
                input: Box::new(input),
                alias: alias.to_string(),
                label: label.clone(),
            });
        }
    }

    LogicalNode::new(LogicalOp::Filter {
        input: Box::new(input),
        predicate,
    })
}

fn as_variable(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Variable(name) => Some(name),
        _ => None,
    }
}

fn compile_updating(
    clause: &UpdatingClause,
    input: Option<LogicalNode>,
    ctx: &mut CompileCtx,
) -> Result<LogicalNode> {
    let op = match clause {
        UpdatingClause::Create(patterns) => {
            for p in patterns {
                for alias in p.aliases() {
                    ctx.bind(alias);
                }
            }
            LogicalOp::Create {
                input: input.map(Box::new),
                patterns: patterns.clone(),
            }
        }
        UpdatingClause::Merge(clause) => {
            if clause
                .pattern
                .elements
                .iter()
                .any(|e| matches!(e, PatternElement::Rel(_)))
            {
                return Err(Error::Planner(
                    "MERGE on relationship patterns is not supported".into(),
                ));
            }
            for alias in clause.pattern.aliases() {
                ctx.bind(alias);
            }
            LogicalOp::Merge {
                clause: clause.clone(),
            }
        }
        UpdatingClause::Set(items) => LogicalOp::Set {
            input: input.map(Box::new),
            items: items.clone(),
            removes: Vec::new(),
        },
        UpdatingClause::Remove(items) => LogicalOp::Set {
            input: input.map(Box::new),
            items: Vec::new(),
            removes: items.clone(),
        },
        UpdatingClause::Delete { detach, exprs } => {
            if *detach {
                LogicalOp::DetachDelete {
                    input: input.map(Box::new),
                    exprs: exprs.clone(),
                }
            } else {
                LogicalOp::Delete {
                    input: input.map(Box::new),
                    exprs: exprs.clone(),
                }
            }
        }
    };
    Ok(LogicalNode::new(op))
}

fn compile_return(
    input: LogicalNode,
    ret: &ReturnClause,
    ctx: &CompileCtx,
) -> Result<LogicalNode> {
    let items = projection_items(&ret.items, ctx)?;

    let (aggregates, groups): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|item| contains_aggregate(&item.expr));

    let mut plan = if aggregates.is_empty() {
        // Sort sits below the projection so sort keys can still reach the
        // pattern variables; keys naming a projected column are rewritten
        // to that column's source expression.
        let mut source = input;
        if !ret.order_by.is_empty() {
            source = LogicalNode::new(LogicalOp::Sort {
                input: Box::new(source),
                keys: ret
                    .order_by
                    .iter()
                    .map(|s| PlanSortKey {
                        expr: resolve_sort_alias(&s.expr, &groups),
                        ascending: s.ascending,
                    })
                    .collect(),
            });
        }
        LogicalNode::new(LogicalOp::Projection {
            input: Box::new(source),
            items: groups,
        })
    } else {
        // Aggregation collapses rows, so its sort runs above it over the
        // output columns; keys matching a projected expression are rewritten
        // to the column name.
        let mut plan = LogicalNode::new(LogicalOp::Aggregation {
            input: Box::new(input),
            groups: groups.clone(),
            aggregates: aggregates.clone(),
        });
        if !ret.order_by.is_empty() {
            plan = LogicalNode::new(LogicalOp::Sort {
                input: Box::new(plan),
                keys: ret
                    .order_by
                    .iter()
                    .map(|s| PlanSortKey {
                        expr: resolve_sort_column(&s.expr, &groups, &aggregates),
                        ascending: s.ascending,
                    })
                    .collect(),
            });
        }
        plan
    };

    if ret.distinct {
        plan = LogicalNode::new(LogicalOp::Distinct {
            input: Box::new(plan),
        });
    }

    if let Some(skip) = &ret.skip {
        plan = LogicalNode::new(LogicalOp::Skip {
            input: Box::new(plan),
            count: const_count(skip, "SKIP")?,
        });
    }

    if let Some(limit) = &ret.limit {
        plan = LogicalNode::new(LogicalOp::Limit {
            input: Box::new(plan),
            count: const_count(limit, "LIMIT")?,
        });
    }

    Ok(plan)
}

/// Expand `RETURN *` and label every projection item: explicit alias first,
/// else the source text of a plain variable or property chain. Anything
/// else keeps no label and surfaces as `colN` at runtime.
fn projection_items(items: &[ProjectionItem], ctx: &CompileCtx) -> Result<Vec<PlanProjection>> {
    let mut out = Vec::new();
    for item in items {
        if matches!(item.expr, Expr::Star) {
            if ctx.bound.is_empty() {
                return Err(Error::Planner("RETURN * with no bound variables".into()));
            }
            for alias in &ctx.bound {
                out.push(PlanProjection {
                    expr: Expr::Variable(alias.clone()),
                    label: Some(alias.clone()),
                });
            }
            continue;
        }
        let label = item.alias.clone().or_else(|| derived_label(&item.expr));
        out.push(PlanProjection {
            expr: item.expr.clone(),
            label,
        });
    }
    Ok(out)
}

fn derived_label(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Variable(_) | Expr::Property { .. } => Some(expr.to_string()),
        _ => None,
    }
}

/// `ORDER BY name` naming a projected column sorts by that column's source
/// expression.
fn resolve_sort_alias(expr: &Expr, items: &[PlanProjection]) -> Expr {
    if let Expr::Variable(name) = expr {
        if let Some(item) = items.iter().find(|i| i.label.as_deref() == Some(name)) {
            return item.expr.clone();
        }
    }
    expr.clone()
}

/// Above an aggregation the sort keys address output columns: a key equal
/// to a projected expression is rewritten to its column name.
fn resolve_sort_column(
    expr: &Expr,
    groups: &[PlanProjection],
    aggregates: &[PlanProjection],
) -> Expr {
    for item in groups.iter().chain(aggregates.iter()) {
        if let Some(label) = &item.label {
            if item.expr == *expr {
                return Expr::Variable(label.clone());
            }
        }
    }
    expr.clone()
}

fn const_count(expr: &Expr, clause: &str) -> Result<i64> {
    match expr_to_value(expr) {
        Some(Value::Int(n)) => Ok(n),
        _ => Err(Error::Planner(format!(
            "{clause} requires an integer literal, got {expr}"
        ))),
    }
}

/// Whether the expression (at any depth) calls an aggregate function.
pub fn contains_aggregate(expr: &Expr) -> bool {
    const AGGREGATES: &[&str] = &["count", "sum", "avg", "min", "max", "collect"];
    match expr {
        Expr::FunctionCall { name, args, .. } => {
            AGGREGATES.iter().any(|a| name.eq_ignore_ascii_case(a))
                || args.iter().any(contains_aggregate)
        }
        Expr::Binary { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        Expr::Unary { expr, .. } => contains_aggregate(expr),
        Expr::StringOp { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        Expr::Property { expr, .. } => contains_aggregate(expr),
        Expr::IsNull { expr, .. } => contains_aggregate(expr),
        Expr::In { expr, list } => contains_aggregate(expr) || contains_aggregate(list),
        Expr::HasLabel { expr, .. } => contains_aggregate(expr),
        Expr::List(items) => items.iter().any(contains_aggregate),
        Expr::Map(pairs) => pairs.iter().any(|(_, v)| contains_aggregate(v)),
        Expr::Case { operand, whens, else_expr } => {
            operand.as_deref().map(contains_aggregate).unwrap_or(false)
                || whens
                    .iter()
                    .any(|(w, t)| contains_aggregate(w) || contains_aggregate(t))
                || else_expr.as_deref().map(contains_aggregate).unwrap_or(false)
        }
        _ => false,
    }
}

// ============================================================================
// Optimization
// ============================================================================

/// Optimize a logical plan in place: join reordering, then index selection.
/// Estimates are refreshed so the rendered plan shows post-rewrite numbers.
/// Applying `optimize` a second time is a no-op.
pub fn optimize(mut plan: LogicalNode) -> LogicalNode {
    if plan.cost == 0.0 {
        plan.estimate(true);
    }
    optimize_joins(&mut plan);
    plan = optimize_index_usage(plan);
    plan.estimate(false);
    plan
}

/// Hash-join cost model: build the right side, probe with the left.
fn hash_join_cost(left_rows: i64, right_rows: i64) -> f64 {
    (right_rows as f64 * 1.2 + left_rows as f64 * 1.0) * 0.1
}

fn nested_loop_cost(left_rows: i64, right_rows: i64) -> f64 {
    left_rows as f64 * right_rows as f64 * 0.001 * 0.1
}

/// Bottom-up pass: for each join, keep the cheaper of the current and
/// swapped orderings. Ties keep the original ordering.
fn optimize_joins(node: &mut LogicalNode) {
    use LogicalOp::*;

    match &mut node.op {
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
        | Skip { input, .. } => optimize_joins(input),
        HashJoin { left, right } => {
            optimize_joins(left);
            optimize_joins(right);
            let current = hash_join_cost(left.rows, right.rows);
            let swapped = hash_join_cost(right.rows, left.rows);
            if swapped < current {
                debug!(current, swapped, "swapping hash join inputs");
                std::mem::swap(left, right);
            }
        }
        NestedLoopJoin { left, right } | CartesianProduct { left, right } => {
            optimize_joins(left);
            optimize_joins(right);
            let current = nested_loop_cost(left.rows, right.rows);
            let swapped = nested_loop_cost(right.rows, left.rows);
            if swapped < current {
                std::mem::swap(left, right);
            }
        }
        Unwind { input, .. }
        | Create { input, .. }
        | Set { input, .. }
        | Delete { input, .. }
        | DetachDelete { input, .. } => {
            if let Some(input) = input {
                optimize_joins(input);
            }
        }
        _ => {}
    }
}

/// Bottom-up pass: promote scans onto indexes.
///
/// - A `NodeScan` that carries a label becomes a `LabelScan` (rows ÷ 10).
/// - A `PropertyFilter` directly over a matching `LabelScan` merges into an
///   `IndexScan` (rows ÷ 100).
fn optimize_index_usage(mut node: LogicalNode) -> LogicalNode {
    use LogicalOp::*;

    // Recurse first.
    match &mut node.op {
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
        | Skip { input, .. } => {
            let child = std::mem::replace(input.as_mut(), LogicalNode::new(placeholder()));
            **input = optimize_index_usage(child);
        }
        HashJoin { left, right } | NestedLoopJoin { left, right } | CartesianProduct { left, right } => {
            let l = std::mem::replace(left.as_mut(), LogicalNode::new(placeholder()));
            **left = optimize_index_usage(l);
            let r = std::mem::replace(right.as_mut(), LogicalNode::new(placeholder()));
            **right = optimize_index_usage(r);
        }
        Unwind { input, .. }
        | Create { input, .. }
        | Set { input, .. }
        | Delete { input, .. }
        | DetachDelete { input, .. } => {
            if let Some(input) = input {
                let child =
                    std::mem::replace(input.as_mut(), LogicalNode::new(placeholder()));
                **input = optimize_index_usage(child);
            }
        }
        _ => {}
    }

    // Promote this node.
    match node.op {
        NodeScan { alias, label: Some(label) } if !label.is_empty() => {
            let rows = (node.rows / 10).max(1);
            debug!(%alias, %label, rows, "promoting NodeScan to LabelScan");
            LogicalNode {
                op: LabelScan { alias, label },
                cost: node.cost,
                rows,
            }
        }
        PropertyFilter { input, alias, property, value } => {
            if let LabelScan { alias: scan_alias, label } = &input.op {
                if *scan_alias == alias {
                    let rows = (input.rows / 100).max(1);
                    debug!(%alias, %property, rows, "merging PropertyFilter into IndexScan");
                    return LogicalNode {
                        op: IndexScan {
                            alias,
                            label: label.clone(),
                            property,
                            value,
                        },
                        cost: input.cost,
                        rows,
                    };
                }
            }
            LogicalNode {
                op: PropertyFilter { input, alias, property, value },
                cost: node.cost,
                rows: node.rows,
            }
        }
        op => LogicalNode {
            op,
            cost: node.cost,
            rows: node.rows,
        },
    }
}

/// Cheap stand-in used while a child is temporarily moved out for rewriting.
fn placeholder() -> LogicalOp {
    LogicalOp::NodeScan {
        alias: String::new(),
        label: None,
    }
}
