//! Statement execution — drives parsed queries through the planner, the
//! iterator pipeline and the write engine.

pub mod context;
pub mod eval;
pub mod iter;
pub mod result;

pub use context::ExecContext;
pub use result::{ExecutionStats, FromValue, QueryResult, ResultRow};

use std::sync::Arc;

use tracing::debug;

use crate::cypher::ast::{
    Expr, Pattern, PatternElement, Query, ReadingClause, RelDirection, ReturnClause, SetItem,
    SingleQuery, UpdatingClause,
};
use crate::model::{NodeId, Value};
use crate::plan::{plan_branch, PlannerConfig};
use crate::storage::StorageAdapter;
use crate::write::WriteTransaction;
use crate::{Error, Result};

/// Execute a complete statement (all UNION branches).
pub fn execute_statement<A: StorageAdapter>(
    adapter: Arc<A>,
    config: &PlannerConfig,
    ast: &Query,
) -> Result<QueryResult> {
    let mut result = execute_branch(adapter.clone(), config, &ast.first)?;

    if ast.unions.is_empty() {
        return Ok(result);
    }

    let mut dedup = false;
    for (all, branch) in &ast.unions {
        if !all {
            dedup = true;
        }
        let sub = execute_branch(adapter.clone(), config, branch)?;
        if sub.columns.len() != result.columns.len() {
            return Err(Error::Execution(
                "UNION branches must return the same number of columns".into(),
            ));
        }
        result.rows.extend(sub.rows);
        merge_stats(&mut result.stats, &sub.stats);
    }

    if dedup {
        let mut seen = hashbrown::HashSet::new();
        result.rows.retain(|row| seen.insert(iter::row_key(row)));
    }

    Ok(result)
}

fn merge_stats(into: &mut ExecutionStats, from: &ExecutionStats) {
    into.nodes_created += from.nodes_created;
    into.nodes_deleted += from.nodes_deleted;
    into.relationships_created += from.relationships_created;
    into.relationships_deleted += from.relationships_deleted;
    into.properties_set += from.properties_set;
    into.labels_added += from.labels_added;
    into.labels_removed += from.labels_removed;
}

fn execute_branch<A: StorageAdapter>(
    adapter: Arc<A>,
    config: &PlannerConfig,
    query: &SingleQuery,
) -> Result<QueryResult> {
    if !query.updating.is_empty() {
        let mut tx = WriteTransaction::new(adapter.clone());
        tx.begin()?;
        match execute_write_branch(&mut tx, adapter.as_ref(), config, query) {
            Ok(result) => {
                tx.commit()?;
                Ok(result)
            }
            Err(e) => {
                let _ = tx.rollback();
                Err(e)
            }
        }
    } else {
        execute_read_branch(adapter.as_ref(), config, query)
    }
}

// ============================================================================
// Read path
// ============================================================================

fn execute_read_branch(
    adapter: &dyn StorageAdapter,
    config: &PlannerConfig,
    query: &SingleQuery,
) -> Result<QueryResult> {
    // Bare RETURN evaluates once against an empty row.
    if query.reading.is_empty() {
        let ret = query
            .return_clause
            .as_ref()
            .ok_or_else(|| Error::Execution("query has nothing to execute".into()))?;
        let mut ctx = ExecContext::new(adapter);
        let (columns, rows) = project_rows(vec![ResultRow::new()], ret, &[], &mut ctx)?;
        return Ok(QueryResult {
            columns,
            rows,
            stats: ctx.stats,
        });
    }

    let physical = plan_branch(query, config)?;
    debug!(plan = %physical, "executing read branch");
    let mut ctx = ExecContext::new(adapter);
    let rows = iter::run(&physical, &mut ctx)?;

    // OPTIONAL MATCH with nothing matched still yields one row of nulls.
    if rows.is_empty() {
        if let Some(aliases) = optional_only_aliases(query) {
            let mut null_row = ResultRow::new();
            for alias in &aliases {
                null_row.add_column(alias.clone(), Value::Null);
            }
            let out = match &query.return_clause {
                Some(ret) => {
                    let (columns, rows) =
                        project_rows(vec![null_row], ret, &aliases, &mut ctx)?;
                    QueryResult {
                        columns,
                        rows,
                        stats: ctx.stats,
                    }
                }
                None => QueryResult {
                    columns: aliases,
                    rows: vec![null_row],
                    stats: ctx.stats,
                },
            };
            return Ok(out);
        }
    }

    Ok(QueryResult {
        columns: physical.aliases(),
        rows,
        stats: ctx.stats,
    })
}

/// When every reading clause is an OPTIONAL MATCH, the aliases its patterns
/// bind (in order). Otherwise None.
fn optional_only_aliases(query: &SingleQuery) -> Option<Vec<String>> {
    let mut aliases = Vec::new();
    for clause in &query.reading {
        let ReadingClause::Match(m) = clause else {
            return None;
        };
        if !m.optional {
            return None;
        }
        for pattern in &m.patterns {
            for alias in pattern.aliases() {
                if !aliases.iter().any(|a| a == alias) {
                    aliases.push(alias.to_string());
                }
            }
        }
    }
    if aliases.is_empty() {
        None
    } else {
        Some(aliases)
    }
}

// ============================================================================
// Write path
// ============================================================================

/// Execute the updating clauses of a branch inside an already-open
/// transaction. The caller owns commit/rollback.
pub fn execute_write_branch<A: StorageAdapter>(
    tx: &mut WriteTransaction<A>,
    adapter: &dyn StorageAdapter,
    config: &PlannerConfig,
    query: &SingleQuery,
) -> Result<QueryResult> {
    let mut ctx = ExecContext::new(adapter);

    let mut rows = if query.reading.is_empty() {
        vec![ResultRow::new()]
    } else {
        let read_query = SingleQuery {
            reading: query.reading.clone(),
            updating: Vec::new(),
            return_clause: None,
        };
        let physical = plan_branch(&read_query, config)?;
        let matched = iter::run(&physical, &mut ctx)?;
        if matched.is_empty() {
            if let Some(aliases) = optional_only_aliases(query) {
                let mut null_row = ResultRow::new();
                for alias in aliases {
                    null_row.add_column(alias, Value::Null);
                }
                vec![null_row]
            } else {
                matched
            }
        } else {
            matched
        }
    };

    let mut bound: Vec<String> = rows
        .first()
        .map(|r| r.columns().map(str::to_string).collect())
        .unwrap_or_default();

    for clause in &query.updating {
        rows = apply_updating_clause(tx, &mut ctx, clause, rows, &mut bound)?;
    }

    let stats = tx.stats;
    match &query.return_clause {
        Some(ret) => {
            let (columns, rows) = project_rows(rows, ret, &bound, &mut ctx)?;
            Ok(QueryResult { columns, rows, stats })
        }
        None => {
            // MERGE reports its outcome even without RETURN.
            if rows.iter().any(|r| r.get_value("was_created").is_some()) {
                let columns = rows
                    .first()
                    .map(|r| r.columns().map(str::to_string).collect())
                    .unwrap_or_default();
                Ok(QueryResult { columns, rows, stats })
            } else {
                Ok(QueryResult {
                    columns: Vec::new(),
                    rows: Vec::new(),
                    stats,
                })
            }
        }
    }
}

fn apply_updating_clause<A: StorageAdapter>(
    tx: &mut WriteTransaction<A>,
    ctx: &mut ExecContext,
    clause: &UpdatingClause,
    rows: Vec<ResultRow>,
    bound: &mut Vec<String>,
) -> Result<Vec<ResultRow>> {
    match clause {
        UpdatingClause::Create(patterns) => {
            let mut out = Vec::with_capacity(rows.len());
            for mut row in rows {
                for pattern in patterns {
                    create_pattern(tx, ctx, pattern, &mut row)?;
                }
                out.push(row);
            }
            if let Some(first) = out.first() {
                *bound = first.columns().map(str::to_string).collect();
            }
            Ok(out)
        }

        UpdatingClause::Merge(merge) => {
            let mut out = Vec::with_capacity(rows.len());
            for mut row in rows {
                merge_pattern(tx, ctx, merge, &mut row)?;
                out.push(row);
            }
            if let Some(first) = out.first() {
                *bound = first.columns().map(str::to_string).collect();
            }
            Ok(out)
        }

        UpdatingClause::Set(items) => {
            for row in &rows {
                for item in items {
                    apply_set_item(tx, ctx, item, row)?;
                }
            }
            Ok(rows)
        }

        UpdatingClause::Remove(items) => {
            for row in &rows {
                for item in items {
                    match item {
                        crate::cypher::ast::RemoveItem::Property { variable, key } => {
                            let (node_id, edge_id) = entity_target(row, variable)?;
                            tx.remove_property(node_id, edge_id, key)?;
                        }
                        crate::cypher::ast::RemoveItem::Label { variable, label } => {
                            let (node_id, _) = entity_target(row, variable)?;
                            if node_id <= 0 {
                                return Err(Error::Mismatch(format!(
                                    "REMOVE label target '{variable}' is not a node"
                                )));
                            }
                            tx.remove_label(NodeId(node_id), label)?;
                        }
                    }
                }
            }
            Ok(rows)
        }

        UpdatingClause::Delete { detach, exprs } => {
            // Collect unique targets across all rows before mutating, so a
            // node reached by several rows is deleted once.
            let mut edge_targets: Vec<i64> = Vec::new();
            let mut node_targets: Vec<i64> = Vec::new();
            for row in &rows {
                for expr in exprs {
                    match eval::eval(expr, row, ctx)? {
                        Value::Null => {}
                        Value::NodeRef(id) => {
                            if !node_targets.contains(&id.0) {
                                node_targets.push(id.0);
                            }
                        }
                        Value::RelRef(id) => {
                            if !edge_targets.contains(&id.0) {
                                edge_targets.push(id.0);
                            }
                        }
                        other => {
                            return Err(Error::Mismatch(format!(
                                "DELETE target must be a node or relationship, got {}",
                                other.type_name()
                            )));
                        }
                    }
                }
            }
            for edge_id in edge_targets {
                tx.delete_relationship(edge_id)?;
            }
            for node_id in node_targets {
                tx.delete_node(NodeId(node_id), *detach)?;
            }
            Ok(Vec::new())
        }
    }
}

/// CREATE one pattern against a row, binding fresh aliases as it goes.
fn create_pattern<A: StorageAdapter>(
    tx: &mut WriteTransaction<A>,
    ctx: &mut ExecContext,
    pattern: &Pattern,
    row: &mut ResultRow,
) -> Result<()> {
    let mut prev_node: Option<NodeId> = None;
    let mut pending_rel: Option<&crate::cypher::ast::RelPattern> = None;

    for element in &pattern.elements {
        match element {
            PatternElement::Node(node) => {
                let id = match node.alias.as_ref().and_then(|a| row.get_value(a)) {
                    Some(Value::NodeRef(id)) => *id,
                    Some(other) => {
                        return Err(Error::Mismatch(format!(
                            "pattern variable is bound to {}, expected a node",
                            other.type_name()
                        )));
                    }
                    None => {
                        if let Some(alias) = &node.alias {
                            crate::write::validate_identifier("variable", alias)?;
                        }
                        let props = eval_property_map(&node.properties, row, ctx)?;
                        let id = tx.create_node(&node.labels, &props)?;
                        if let Some(alias) = &node.alias {
                            row.add_column(alias.clone(), Value::NodeRef(id));
                            ctx.bind(alias, &Value::NodeRef(id));
                        }
                        id
                    }
                };

                if let Some(rel) = pending_rel.take() {
                    let from = prev_node
                        .ok_or_else(|| Error::Execution("relationship without source".into()))?;
                    let (src, dst) = match rel.direction {
                        RelDirection::Outgoing => (from, id),
                        RelDirection::Incoming => (id, from),
                        RelDirection::Undirected => {
                            return Err(Error::Misuse(
                                "CREATE requires a directed relationship".into(),
                            ));
                        }
                    };
                    let rel_type = rel.types.first().ok_or_else(|| {
                        Error::InvalidFormat("CREATE relationship requires a type".into())
                    })?;
                    let props = eval_property_map(&rel.properties, row, ctx)?;
                    let edge_id = tx.create_relationship(src, dst, rel_type, 0.0, &props)?;
                    if let Some(alias) = &rel.alias {
                        row.add_column(
                            alias.clone(),
                            Value::RelRef(crate::model::EdgeId(edge_id)),
                        );
                    }
                }
                prev_node = Some(id);
            }
            PatternElement::Rel(rel) => {
                pending_rel = Some(rel);
            }
        }
    }
    Ok(())
}

/// MERGE a single-node pattern against a row, binding the variable and the
/// `was_created` outcome.
fn merge_pattern<A: StorageAdapter>(
    tx: &mut WriteTransaction<A>,
    ctx: &mut ExecContext,
    merge: &crate::cypher::ast::MergeClause,
    row: &mut ResultRow,
) -> Result<()> {
    let node = match merge.pattern.elements.as_slice() {
        [PatternElement::Node(node)] => node,
        _ => {
            return Err(Error::Planner(
                "MERGE on relationship patterns is not supported".into(),
            ));
        }
    };

    let match_props = eval_property_map(&node.properties, row, ctx)?;
    let outcome = tx.merge_node(&node.labels, &match_props)?;

    if let Some(alias) = &node.alias {
        row.add_column(alias.clone(), Value::NodeRef(outcome.node_id));
        ctx.bind(alias, &Value::NodeRef(outcome.node_id));
    }
    row.add_column("was_created", Value::Bool(outcome.was_created));

    let items = if outcome.was_created {
        &merge.on_create
    } else {
        &merge.on_match
    };
    for item in items {
        apply_set_item(tx, ctx, item, row)?;
    }
    Ok(())
}

fn apply_set_item<A: StorageAdapter>(
    tx: &mut WriteTransaction<A>,
    ctx: &mut ExecContext,
    item: &SetItem,
    row: &ResultRow,
) -> Result<()> {
    match item {
        SetItem::Property { variable, key, value } => {
            let (node_id, edge_id) = entity_target(row, variable)?;
            let value = eval::eval(value, row, ctx)?;
            tx.set_property(node_id, edge_id, key, &value)
        }
        SetItem::Label { variable, label } => {
            let (node_id, _) = entity_target(row, variable)?;
            if node_id <= 0 {
                return Err(Error::Mismatch(format!(
                    "SET label target '{variable}' is not a node"
                )));
            }
            tx.set_label(NodeId(node_id), label)
        }
        SetItem::MergeProperties { variable, value } => {
            let (node_id, edge_id) = entity_target(row, variable)?;
            let value = eval::eval(value, row, ctx)?;
            let Value::Map(pairs) = value else {
                return Err(Error::Mismatch("SET += requires a map".into()));
            };
            for (key, v) in &pairs {
                tx.set_property(node_id, edge_id, key, v)?;
            }
            Ok(())
        }
        SetItem::AllProperties { variable, value } => {
            let (node_id, edge_id) = entity_target(row, variable)?;
            let value = eval::eval(value, row, ctx)?;
            let Value::Map(pairs) = value else {
                return Err(Error::Mismatch("SET = requires a map".into()));
            };
            // Replace wholesale: drop keys absent from the new map first.
            let current = if node_id > 0 {
                ctx.adapter
                    .node(node_id)?
                    .map(|n| n.properties)
                    .unwrap_or_default()
            } else {
                ctx.adapter
                    .edge(edge_id)?
                    .map(|e| e.properties)
                    .unwrap_or_default()
            };
            for (key, _) in crate::storage::parse_properties(&current)? {
                if !pairs.iter().any(|(k, _)| *k == key) {
                    tx.remove_property(node_id, edge_id, &key)?;
                }
            }
            for (key, v) in &pairs {
                tx.set_property(node_id, edge_id, key, v)?;
            }
            Ok(())
        }
    }
}

/// Resolve a SET/REMOVE/DELETE variable to its entity target as
/// (node_id, edge_id), exactly one positive.
fn entity_target(row: &ResultRow, variable: &str) -> Result<(i64, i64)> {
    match row.get_value(variable) {
        Some(Value::NodeRef(id)) => Ok((id.0, 0)),
        Some(Value::RelRef(id)) => Ok((0, id.0)),
        Some(other) => Err(Error::Mismatch(format!(
            "variable '{variable}' is bound to {}, expected a node or relationship",
            other.type_name()
        ))),
        None => Err(Error::Execution(format!("unbound variable: {variable}"))),
    }
}

fn eval_property_map(
    pairs: &[(String, Expr)],
    row: &ResultRow,
    ctx: &ExecContext,
) -> Result<Vec<(String, Value)>> {
    let mut out = Vec::with_capacity(pairs.len());
    for (key, expr) in pairs {
        out.push((key.clone(), eval::eval(expr, row, ctx)?));
    }
    Ok(out)
}

// ============================================================================
// Shared projection for write results and special-cased reads
// ============================================================================

/// Evaluate a RETURN clause over already-materialized rows. Supports star
/// expansion, aliases, DISTINCT, ORDER BY, SKIP and LIMIT; aggregates form
/// a single group.
fn project_rows(
    rows: Vec<ResultRow>,
    ret: &ReturnClause,
    bound: &[String],
    ctx: &mut ExecContext,
) -> Result<(Vec<String>, Vec<ResultRow>)> {
    // Expand star and label columns.
    let mut items: Vec<(Expr, Option<String>)> = Vec::new();
    for item in &ret.items {
        if matches!(item.expr, Expr::Star) {
            for alias in bound {
                items.push((Expr::Variable(alias.clone()), Some(alias.clone())));
            }
            continue;
        }
        let label = item.alias.clone().or_else(|| match &item.expr {
            Expr::Variable(_) | Expr::Property { .. } => Some(item.expr.to_string()),
            _ => None,
        });
        items.push((item.expr.clone(), label));
    }

    let columns: Vec<String> = items
        .iter()
        .enumerate()
        .map(|(i, (_, label))| label.clone().unwrap_or_else(|| format!("col{i}")))
        .collect();

    let aggregated = items
        .iter()
        .any(|(expr, _)| crate::plan::contains_aggregate(expr));

    // Each projected row keeps its source row alongside, so ORDER BY can
    // reach both the output columns and the original bindings.
    let mut out: Vec<(ResultRow, ResultRow)> = Vec::new();
    if aggregated {
        let mut row_out = ResultRow::new();
        for (i, (expr, _)) in items.iter().enumerate() {
            let Expr::FunctionCall { name, args, distinct } = expr else {
                return Err(Error::Execution(
                    "aggregate projections must be a direct aggregate call".into(),
                ));
            };
            let value = if args.is_empty() {
                Value::Int(rows.len() as i64)
            } else {
                let mut collected = Vec::with_capacity(rows.len());
                for row in &rows {
                    collected.push(eval::eval(&args[0], row, ctx)?);
                }
                if *distinct {
                    collected = eval::dedup_values(collected);
                }
                eval::eval_aggregate(name, &collected)?
            };
            row_out.add_column(columns[i].clone(), value);
        }
        out.push((row_out, ResultRow::new()));
    } else {
        for row in rows {
            let mut row_out = ResultRow::new();
            for (i, (expr, _)) in items.iter().enumerate() {
                row_out.add_column(columns[i].clone(), eval::eval(expr, &row, ctx)?);
            }
            out.push((row_out, row));
        }
    }

    if ret.distinct {
        let mut seen = hashbrown::HashSet::new();
        out.retain(|(row, _)| seen.insert(iter::row_key(row)));
    }

    if !ret.order_by.is_empty() {
        let mut keyed: Vec<(Vec<Value>, ResultRow)> = Vec::with_capacity(out.len());
        for (projected, original) in out {
            let mut merged = original;
            for (name, value) in &projected.values {
                merged.add_column(name.clone(), value.clone());
            }
            let key: Vec<Value> = ret
                .order_by
                .iter()
                .map(|s| eval::eval(&s.expr, &merged, ctx).unwrap_or(Value::Null))
                .collect();
            keyed.push((key, projected));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, sort) in ret.order_by.iter().enumerate() {
                let ord = a[i].sort_cmp(&b[i]);
                let ord = if sort.ascending { ord } else { ord.reverse() };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        let mut sorted: Vec<(ResultRow, ResultRow)> = Vec::with_capacity(keyed.len());
        for (_, projected) in keyed {
            sorted.push((projected, ResultRow::new()));
        }
        out = sorted;
    }

    let mut out: Vec<ResultRow> = out.into_iter().map(|(projected, _)| projected).collect();

    if let Some(skip) = &ret.skip {
        let n = skip_limit_count(skip, ctx, "SKIP")?;
        out = out.into_iter().skip(n as usize).collect();
    }
    if let Some(limit) = &ret.limit {
        let n = skip_limit_count(limit, ctx, "LIMIT")?;
        out.truncate(n as usize);
    }

    Ok((columns, out))
}

fn skip_limit_count(expr: &Expr, ctx: &ExecContext, clause: &str) -> Result<i64> {
    let value = eval::eval(expr, &ResultRow::new(), ctx)?;
    match value {
        Value::Int(n) if n >= 0 => Ok(n),
        other => Err(Error::Misuse(format!(
            "{clause} requires a non-negative integer, got {other}"
        ))),
    }
}
