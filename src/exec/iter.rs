//! Streaming iterators — the pull-based execution model.
//!
//! Every operator exposes `open`/`next`/`close`. `next` returns
//! `Ok(Some(row))`, `Ok(None)` for DONE, or an error; iterators are
//! EOF-sticky and children are owned by parents. A single logical thread
//! drives the root; a parent pulls exactly as many child rows as it needs
//! (Sort and Aggregation drain on open).

use std::collections::VecDeque;

use hashbrown::{HashMap, HashSet};

use super::context::ExecContext;
use super::eval::{dedup_values, eval, eval_aggregate};
use super::result::ResultRow;
use crate::cypher::ast::Expr;
use crate::model::{EdgeId, NodeId, Value};
use crate::plan::{PhysicalNode, PhysicalOp, PlanProjection, PlanSortKey};
use crate::{Error, Result};

/// The iterator protocol. Dropping an iterator releases its children;
/// `close` exists so a caller can end iteration early and explicitly.
pub trait RowIterator {
    fn open(&mut self, ctx: &mut ExecContext) -> Result<()>;
    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<ResultRow>>;
    fn close(&mut self);
}

/// Build the iterator tree for a physical plan.
pub fn build(plan: &PhysicalNode) -> Result<Box<dyn RowIterator>> {
    use PhysicalOp::*;
    Ok(match &plan.op {
        AllNodesScan { alias } => Box::new(NodeScanIter::all(alias.clone())),
        LabelIndexScan { alias, label } => {
            Box::new(NodeScanIter::by_label(alias.clone(), label.clone()))
        }
        PropertyIndexScan { alias, label, property, value } => Box::new(NodeScanIter::by_property(
            alias.clone(),
            label.clone(),
            property.clone(),
            value.clone(),
        )),
        AllRelsScan { alias } => Box::new(RelScanIter::new(alias.clone(), None)),
        TypeIndexScan { alias, rel_type } => {
            Box::new(RelScanIter::new(alias.clone(), Some(rel_type.clone())))
        }
        Filter { input, predicate } => Box::new(FilterIter {
            child: build(input)?,
            predicate: predicate.clone(),
            done: false,
        }),
        Projection { input, items } => Box::new(ProjectionIter {
            child: build(input)?,
            items: items.clone(),
            done: false,
        }),
        Sort { input, keys } => Box::new(SortIter {
            child: build(input)?,
            keys: keys.clone(),
            buffer: Vec::new(),
            pos: 0,
            done: false,
        }),
        Limit { input, count } => {
            if *count <= 0 {
                return Err(Error::Misuse(format!(
                    "LIMIT must be positive, got {count}"
                )));
            }
            Box::new(LimitIter {
                child: build(input)?,
                limit: *count as u64,
                emitted: 0,
                done: false,
            })
        }
        Skip { input, count } => {
            if *count < 0 {
                return Err(Error::Misuse(format!(
                    "SKIP must be non-negative, got {count}"
                )));
            }
            Box::new(SkipIter {
                child: build(input)?,
                skip: *count as u64,
                skipped: 0,
                done: false,
            })
        }
        Distinct { input } => Box::new(DistinctIter {
            child: build(input)?,
            seen: HashSet::new(),
            done: false,
        }),
        HashJoin { left, right } => Box::new(HashJoinIter {
            left: build(left)?,
            right: build(right)?,
            right_rows: Vec::new(),
            table: HashMap::new(),
            shared: None,
            pending: VecDeque::new(),
            done: false,
        }),
        NestedLoopJoin { left, right } | IndexNestedLoop { left, right } => {
            Box::new(NestedLoopIter {
                left: build(left)?,
                right: build(right)?,
                right_rows: Vec::new(),
                current_left: None,
                right_pos: 0,
                done: false,
            })
        }
        Aggregation { input, groups, aggregates } => Box::new(AggregationIter {
            child: build(input)?,
            groups: groups.clone(),
            aggregates: aggregates.clone(),
            output: VecDeque::new(),
            done: false,
        }),
        Unwind { input, expr, alias } => {
            let child = match input {
                Some(i) => Some(build(i)?),
                None => None,
            };
            Box::new(UnwindIter {
                child,
                expr: expr.clone(),
                alias: alias.clone(),
                pending: VecDeque::new(),
                unit_consumed: false,
                done: false,
            })
        }
    })
}

/// Open, drain and close an iterator tree for a physical plan.
pub fn run(plan: &PhysicalNode, ctx: &mut ExecContext) -> Result<Vec<ResultRow>> {
    let mut iter = build(plan)?;
    iter.open(ctx)?;
    let mut rows = Vec::new();
    loop {
        match iter.next(ctx) {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => break,
            Err(e) => {
                iter.close();
                return Err(e);
            }
        }
    }
    iter.close();
    Ok(rows)
}

// ============================================================================
// Node scans
// ============================================================================

enum NodePredicate {
    All,
    Label(String),
    Property {
        label: String,
        property: String,
        value: Value,
    },
}

/// AllNodesScan / LabelIndexScan / PropertyIndexScan: a cursor over node
/// ids in insertion order with an optional row test.
struct NodeScanIter {
    alias: String,
    predicate: NodePredicate,
    ids: Vec<i64>,
    pos: usize,
    done: bool,
}

impl NodeScanIter {
    fn all(alias: String) -> Self {
        Self::new(alias, NodePredicate::All)
    }

    fn by_label(alias: String, label: String) -> Self {
        Self::new(alias, NodePredicate::Label(label))
    }

    fn by_property(alias: String, label: String, property: String, value: Value) -> Self {
        Self::new(
            alias,
            NodePredicate::Property {
                label,
                property,
                value,
            },
        )
    }

    fn new(alias: String, predicate: NodePredicate) -> Self {
        Self {
            alias,
            predicate,
            ids: Vec::new(),
            pos: 0,
            done: false,
        }
    }

    fn matches(&self, ctx: &ExecContext, id: i64) -> Result<bool> {
        match &self.predicate {
            NodePredicate::All => Ok(true),
            NodePredicate::Label(label) => {
                let Some(row) = ctx.adapter.node(id)? else {
                    return Ok(false);
                };
                let labels = crate::storage::parse_labels(&row.labels)?;
                Ok(labels.iter().any(|l| l == label))
            }
            NodePredicate::Property { label, property, value } => {
                let Some(row) = ctx.adapter.node(id)? else {
                    return Ok(false);
                };
                if !label.is_empty() {
                    let labels = crate::storage::parse_labels(&row.labels)?;
                    if !labels.iter().any(|l| l == label) {
                        return Ok(false);
                    }
                }
                let props = crate::storage::parse_properties(&row.properties)?;
                Ok(props
                    .iter()
                    .any(|(k, v)| k == property && v == value))
            }
        }
    }
}

impl RowIterator for NodeScanIter {
    fn open(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.ids = ctx.adapter.node_ids()?;
        self.pos = 0;
        self.done = false;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<ResultRow>> {
        if self.done {
            return Ok(None);
        }
        while self.pos < self.ids.len() {
            let id = self.ids[self.pos];
            self.pos += 1;
            if self.matches(ctx, id)? {
                let mut row = ResultRow::new();
                row.add_column(self.alias.clone(), Value::NodeRef(NodeId(id)));
                return Ok(Some(row));
            }
        }
        self.done = true;
        Ok(None)
    }

    fn close(&mut self) {
        self.ids.clear();
        self.done = true;
    }
}

// ============================================================================
// Relationship scans
// ============================================================================

struct RelScanIter {
    alias: String,
    rel_type: Option<String>,
    ids: Vec<i64>,
    pos: usize,
    done: bool,
}

impl RelScanIter {
    fn new(alias: String, rel_type: Option<String>) -> Self {
        Self {
            alias,
            rel_type,
            ids: Vec::new(),
            pos: 0,
            done: false,
        }
    }
}

impl RowIterator for RelScanIter {
    fn open(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.ids = ctx.adapter.edge_ids()?;
        self.pos = 0;
        self.done = false;
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<ResultRow>> {
        if self.done {
            return Ok(None);
        }
        while self.pos < self.ids.len() {
            let id = self.ids[self.pos];
            self.pos += 1;
            let keep = match &self.rel_type {
                None => true,
                Some(t) => ctx
                    .adapter
                    .edge(id)?
                    .is_some_and(|e| e.edge_type == *t),
            };
            if keep {
                let mut row = ResultRow::new();
                row.add_column(self.alias.clone(), Value::RelRef(EdgeId(id)));
                return Ok(Some(row));
            }
        }
        self.done = true;
        Ok(None)
    }

    fn close(&mut self) {
        self.ids.clear();
        self.done = true;
    }
}

// ============================================================================
// Filter
// ============================================================================

/// Emits a row iff the predicate evaluates to a non-null, non-false value.
struct FilterIter {
    child: Box<dyn RowIterator>,
    predicate: Expr,
    done: bool,
}

impl RowIterator for FilterIter {
    fn open(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<ResultRow>> {
        if self.done {
            return Ok(None);
        }
        while let Some(row) = self.child.next(ctx)? {
            if eval(&self.predicate, &row, ctx)?.is_truthy() {
                return Ok(Some(row));
            }
        }
        self.done = true;
        Ok(None)
    }

    fn close(&mut self) {
        self.child.close();
        self.done = true;
    }
}

// ============================================================================
// Projection
// ============================================================================

/// Evaluates each projection expression; columns take the carried label or
/// a synthetic `colN` name.
struct ProjectionIter {
    child: Box<dyn RowIterator>,
    items: Vec<PlanProjection>,
    done: bool,
}

pub(crate) fn projection_column(items: &[PlanProjection], index: usize) -> String {
    items[index]
        .label
        .clone()
        .unwrap_or_else(|| format!("col{index}"))
}

impl RowIterator for ProjectionIter {
    fn open(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<ResultRow>> {
        if self.done {
            return Ok(None);
        }
        match self.child.next(ctx)? {
            Some(row) => {
                let mut out = ResultRow::new();
                for (i, item) in self.items.iter().enumerate() {
                    let value = eval(&item.expr, &row, ctx)?;
                    out.add_column(projection_column(&self.items, i), value);
                }
                Ok(Some(out))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.child.close();
        self.done = true;
    }
}

// ============================================================================
// Sort
// ============================================================================

/// Materializes its input on open, then emits in sorted order. The sort is
/// stable; nulls sort least; evaluation errors sort as null.
struct SortIter {
    child: Box<dyn RowIterator>,
    keys: Vec<PlanSortKey>,
    buffer: Vec<ResultRow>,
    pos: usize,
    done: bool,
}

impl RowIterator for SortIter {
    fn open(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.child.open(ctx)?;

        let mut keyed: Vec<(Vec<Value>, ResultRow)> = Vec::new();
        while let Some(row) = self.child.next(ctx)? {
            let key: Vec<Value> = self
                .keys
                .iter()
                .map(|k| eval(&k.expr, &row, ctx).unwrap_or(Value::Null))
                .collect();
            keyed.push((key, row));
        }
        self.child.close();

        let directions: Vec<bool> = self.keys.iter().map(|k| k.ascending).collect();
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, ascending) in directions.iter().enumerate() {
                let ord = a[i].sort_cmp(&b[i]);
                let ord = if *ascending { ord } else { ord.reverse() };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });

        self.buffer = keyed.into_iter().map(|(_, row)| row).collect();
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecContext) -> Result<Option<ResultRow>> {
        if self.done || self.pos >= self.buffer.len() {
            self.done = true;
            return Ok(None);
        }
        let row = self.buffer[self.pos].clone();
        self.pos += 1;
        Ok(Some(row))
    }

    fn close(&mut self) {
        self.buffer.clear();
        self.done = true;
    }
}

// ============================================================================
// Limit / Skip
// ============================================================================

/// Emits at most `limit` rows, never pulling the child more than `limit`
/// times.
struct LimitIter {
    child: Box<dyn RowIterator>,
    limit: u64,
    emitted: u64,
    done: bool,
}

impl RowIterator for LimitIter {
    fn open(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<ResultRow>> {
        if self.done || self.emitted >= self.limit {
            self.done = true;
            return Ok(None);
        }
        match self.child.next(ctx)? {
            Some(row) => {
                self.emitted += 1;
                Ok(Some(row))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.child.close();
        self.done = true;
    }
}

struct SkipIter {
    child: Box<dyn RowIterator>,
    skip: u64,
    skipped: u64,
    done: bool,
}

impl RowIterator for SkipIter {
    fn open(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<ResultRow>> {
        if self.done {
            return Ok(None);
        }
        while self.skipped < self.skip {
            if self.child.next(ctx)?.is_none() {
                self.done = true;
                return Ok(None);
            }
            self.skipped += 1;
        }
        match self.child.next(ctx)? {
            Some(row) => Ok(Some(row)),
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.child.close();
        self.done = true;
    }
}

// ============================================================================
// Distinct
// ============================================================================

struct DistinctIter {
    child: Box<dyn RowIterator>,
    seen: HashSet<String>,
    done: bool,
}

/// A stable textual key for row identity. Column order is part of the key,
/// which matches the observable column contract.
pub(crate) fn row_key(row: &ResultRow) -> String {
    let mut key = String::new();
    for (name, value) in &row.values {
        key.push_str(name);
        key.push('\u{1}');
        key.push_str(&value.to_string());
        key.push('\u{2}');
    }
    key
}

impl RowIterator for DistinctIter {
    fn open(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.child.open(ctx)
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<ResultRow>> {
        if self.done {
            return Ok(None);
        }
        while let Some(row) = self.child.next(ctx)? {
            if self.seen.insert(row_key(&row)) {
                return Ok(Some(row));
            }
        }
        self.done = true;
        Ok(None)
    }

    fn close(&mut self) {
        self.child.close();
        self.done = true;
    }
}

// ============================================================================
// Joins
// ============================================================================

fn merge_rows(left: &ResultRow, right: &ResultRow) -> ResultRow {
    let mut out = left.clone();
    for (name, value) in &right.values {
        if out.get_value(name).is_none() {
            out.values.push((name.clone(), value.clone()));
        }
    }
    out
}

/// Hash join keyed on the aliases both sides bind. With no shared alias it
/// degenerates to a cross join.
struct HashJoinIter {
    left: Box<dyn RowIterator>,
    right: Box<dyn RowIterator>,
    right_rows: Vec<ResultRow>,
    table: HashMap<String, Vec<usize>>,
    shared: Option<Vec<String>>,
    pending: VecDeque<ResultRow>,
    done: bool,
}

impl HashJoinIter {
    fn key_for(row: &ResultRow, shared: &[String]) -> String {
        let mut key = String::new();
        for name in shared {
            match row.get_value(name) {
                Some(v) => key.push_str(&v.to_string()),
                None => key.push('\u{3}'),
            }
            key.push('\u{1}');
        }
        key
    }

    fn prepare(&mut self, left_row: &ResultRow) {
        let right_cols: Vec<String> = self
            .right_rows
            .first()
            .map(|r| r.columns().map(str::to_string).collect())
            .unwrap_or_default();
        let shared: Vec<String> = left_row
            .columns()
            .filter(|c| right_cols.iter().any(|rc| rc == c))
            .map(str::to_string)
            .collect();

        self.table.clear();
        for (i, row) in self.right_rows.iter().enumerate() {
            self.table
                .entry(Self::key_for(row, &shared))
                .or_default()
                .push(i);
        }
        self.shared = Some(shared);
    }
}

impl RowIterator for HashJoinIter {
    fn open(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.left.open(ctx)?;
        self.right.open(ctx)?;
        // Build side: drain the right input.
        while let Some(row) = self.right.next(ctx)? {
            self.right_rows.push(row);
        }
        self.right.close();
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<ResultRow>> {
        if self.done {
            return Ok(None);
        }
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            let Some(left_row) = self.left.next(ctx)? else {
                self.done = true;
                return Ok(None);
            };
            if self.shared.is_none() {
                self.prepare(&left_row);
            }
            let key = match &self.shared {
                Some(shared) => Self::key_for(&left_row, shared),
                None => String::new(),
            };
            if let Some(indices) = self.table.get(&key) {
                for &i in indices {
                    self.pending
                        .push_back(merge_rows(&left_row, &self.right_rows[i]));
                }
            }
        }
    }

    fn close(&mut self) {
        self.left.close();
        self.right_rows.clear();
        self.table.clear();
        self.done = true;
    }
}

/// Nested-loop join: cross product of left and (materialized) right.
/// Residual predicates live in Filter operators above.
struct NestedLoopIter {
    left: Box<dyn RowIterator>,
    right: Box<dyn RowIterator>,
    right_rows: Vec<ResultRow>,
    current_left: Option<ResultRow>,
    right_pos: usize,
    done: bool,
}

impl RowIterator for NestedLoopIter {
    fn open(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.left.open(ctx)?;
        self.right.open(ctx)?;
        while let Some(row) = self.right.next(ctx)? {
            self.right_rows.push(row);
        }
        self.right.close();
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<ResultRow>> {
        if self.done {
            return Ok(None);
        }
        loop {
            if self.current_left.is_none() {
                self.current_left = self.left.next(ctx)?;
                self.right_pos = 0;
                if self.current_left.is_none() {
                    self.done = true;
                    return Ok(None);
                }
            }
            if let Some(left_row) = &self.current_left {
                if self.right_pos < self.right_rows.len() {
                    let row = merge_rows(left_row, &self.right_rows[self.right_pos]);
                    self.right_pos += 1;
                    return Ok(Some(row));
                }
            }
            self.current_left = None;
        }
    }

    fn close(&mut self) {
        self.left.close();
        self.right_rows.clear();
        self.done = true;
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Drains its child on open, groups rows by the non-aggregate items, then
/// pre-collects each group into a list per aggregate and evaluates the
/// aggregate function over it.
struct AggregationIter {
    child: Box<dyn RowIterator>,
    groups: Vec<PlanProjection>,
    aggregates: Vec<PlanProjection>,
    output: VecDeque<ResultRow>,
    done: bool,
}

impl AggregationIter {
    fn aggregate_group(
        &self,
        key_values: &[Value],
        rows: &[ResultRow],
        ctx: &ExecContext,
    ) -> Result<ResultRow> {
        let mut out = ResultRow::new();
        let total = self.groups.len() + self.aggregates.len();
        let mut columns: Vec<String> = Vec::with_capacity(total);
        for (i, item) in self.groups.iter().chain(self.aggregates.iter()).enumerate() {
            columns.push(
                item.label
                    .clone()
                    .unwrap_or_else(|| format!("col{i}")),
            );
        }

        for (i, value) in key_values.iter().enumerate() {
            out.add_column(columns[i].clone(), value.clone());
        }

        for (i, item) in self.aggregates.iter().enumerate() {
            let Expr::FunctionCall { name, args, distinct } = &item.expr else {
                return Err(Error::Execution(
                    "aggregate projections must be a direct aggregate call".into(),
                ));
            };
            let value = if args.is_empty() {
                // count(*) counts rows
                Value::Int(rows.len() as i64)
            } else {
                let mut collected = Vec::with_capacity(rows.len());
                for row in rows {
                    collected.push(eval(&args[0], row, ctx)?);
                }
                if *distinct {
                    collected = dedup_values(collected);
                }
                eval_aggregate(name, &collected)?
            };
            out.add_column(columns[self.groups.len() + i].clone(), value);
        }
        Ok(out)
    }
}

impl RowIterator for AggregationIter {
    fn open(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.child.open(ctx)?;

        // Group in first-seen order.
        let mut grouped: Vec<(Vec<Value>, Vec<ResultRow>)> = Vec::new();
        while let Some(row) = self.child.next(ctx)? {
            let key: Vec<Value> = self
                .groups
                .iter()
                .map(|g| eval(&g.expr, &row, ctx))
                .collect::<Result<_>>()?;
            match grouped.iter_mut().find(|(k, _)| *k == key) {
                Some((_, rows)) => rows.push(row),
                None => grouped.push((key, vec![row])),
            }
        }
        self.child.close();

        // A grouping-less aggregation over no rows still yields one row.
        if grouped.is_empty() && self.groups.is_empty() {
            grouped.push((Vec::new(), Vec::new()));
        }

        for (key, rows) in &grouped {
            let row = self.aggregate_group(key, rows, ctx)?;
            self.output.push_back(row);
        }
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecContext) -> Result<Option<ResultRow>> {
        if self.done {
            return Ok(None);
        }
        match self.output.pop_front() {
            Some(row) => Ok(Some(row)),
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.output.clear();
        self.done = true;
    }
}

// ============================================================================
// Unwind
// ============================================================================

/// Fans a list out to one row per element. A non-list value passes through
/// as a single row; null produces no rows. Without an input child it runs
/// once against an empty row.
struct UnwindIter {
    child: Option<Box<dyn RowIterator>>,
    expr: Expr,
    alias: String,
    pending: VecDeque<ResultRow>,
    unit_consumed: bool,
    done: bool,
}

impl UnwindIter {
    fn expand(&mut self, base: &ResultRow, ctx: &ExecContext) -> Result<()> {
        let value = eval(&self.expr, base, ctx)?;
        match value {
            Value::Null => {}
            Value::List(items) => {
                for item in items {
                    let mut row = base.clone();
                    row.add_column(self.alias.clone(), item);
                    self.pending.push_back(row);
                }
            }
            other => {
                let mut row = base.clone();
                row.add_column(self.alias.clone(), other);
                self.pending.push_back(row);
            }
        }
        Ok(())
    }
}

impl RowIterator for UnwindIter {
    fn open(&mut self, ctx: &mut ExecContext) -> Result<()> {
        if let Some(child) = &mut self.child {
            child.open(ctx)?;
        }
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<ResultRow>> {
        if self.done {
            return Ok(None);
        }
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            let base = match &mut self.child {
                Some(child) => child.next(ctx)?,
                None => {
                    if self.unit_consumed {
                        None
                    } else {
                        self.unit_consumed = true;
                        Some(ResultRow::new())
                    }
                }
            };
            match base {
                Some(row) => self.expand(&row, ctx)?,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }

    fn close(&mut self) {
        if let Some(child) = &mut self.child {
            child.close();
        }
        self.pending.clear();
        self.done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlannerConfig, plan_branch};
    use crate::storage::{MemoryAdapter, StorageAdapter};

    fn seed() -> MemoryAdapter {
        let db = MemoryAdapter::new();
        db.add_node(1, r#"["Person"]"#, r#"{"name":"A","age":30}"#).unwrap();
        db.add_node(2, r#"["Person"]"#, r#"{"name":"B","age":20}"#).unwrap();
        db.add_node(3, r#"["Car"]"#, "{}").unwrap();
        db
    }

    fn run_query(db: &MemoryAdapter, q: &str) -> Vec<ResultRow> {
        let ast = crate::cypher::parse(q).unwrap();
        let plan = plan_branch(&ast.first, &PlannerConfig::default()).unwrap();
        let mut ctx = ExecContext::new(db);
        run(&plan, &mut ctx).unwrap()
    }

    #[test]
    fn test_all_nodes_scan_in_id_order() {
        let db = seed();
        let rows = run_query(&db, "MATCH (n) RETURN n");
        let ids: Vec<Value> = rows.iter().map(|r| r.get_value("n").unwrap().clone()).collect();
        assert_eq!(
            ids,
            vec![
                Value::NodeRef(NodeId(1)),
                Value::NodeRef(NodeId(2)),
                Value::NodeRef(NodeId(3)),
            ]
        );
    }

    #[test]
    fn test_label_scan_filters() {
        let db = seed();
        let rows = run_query(&db, "MATCH (n:Person) RETURN n");
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_property_scan() {
        let db = seed();
        let rows = run_query(&db, "MATCH (n:Person) WHERE n.name = 'A' RETURN n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_value("n"), Some(&Value::NodeRef(NodeId(1))));
    }

    #[test]
    fn test_sort_desc_and_limit() {
        let db = seed();
        let rows = run_query(
            &db,
            "MATCH (n:Person) RETURN n.age ORDER BY n.age DESC LIMIT 1",
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<i64>("n.age").unwrap(), 30);
    }

    #[test]
    fn test_limit_zero_is_invalid_construction() {
        let _db = seed();
        let ast = crate::cypher::parse("MATCH (n) RETURN n LIMIT 0").unwrap();
        let plan = plan_branch(&ast.first, &PlannerConfig::default()).unwrap();
        let err = match build(&plan) {
            Err(e) => e,
            Ok(_) => panic!("expected build() to return an error"),
        };
        assert_eq!(err.code(), "MISUSE");
    }

    #[test]
    fn test_eof_sticky() {
        let db = seed();
        let ast = crate::cypher::parse("MATCH (n:Person) RETURN n").unwrap();
        let plan = plan_branch(&ast.first, &PlannerConfig::default()).unwrap();
        let mut ctx = ExecContext::new(&db);
        let mut iter = build(&plan).unwrap();
        iter.open(&mut ctx).unwrap();
        while iter.next(&mut ctx).unwrap().is_some() {}
        for _ in 0..3 {
            assert!(iter.next(&mut ctx).unwrap().is_none());
        }
    }

    #[test]
    fn test_limit_pulls_child_at_most_n_times() {
        struct CountingScan {
            inner: NodeScanIter,
            pulls: std::rc::Rc<std::cell::Cell<u64>>,
        }
        impl RowIterator for CountingScan {
            fn open(&mut self, ctx: &mut ExecContext) -> Result<()> {
                self.inner.open(ctx)
            }
            fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<ResultRow>> {
                self.pulls.set(self.pulls.get() + 1);
                self.inner.next(ctx)
            }
            fn close(&mut self) {
                self.inner.close()
            }
        }

        let db = seed();
        let pulls = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut limit = LimitIter {
            child: Box::new(CountingScan {
                inner: NodeScanIter::all("n".into()),
                pulls: pulls.clone(),
            }),
            limit: 2,
            emitted: 0,
            done: false,
        };
        let mut ctx = ExecContext::new(&db);
        limit.open(&mut ctx).unwrap();
        let mut emitted = 0;
        while limit.next(&mut ctx).unwrap().is_some() {
            emitted += 1;
        }
        // A fourth call after DONE must not pull either.
        assert!(limit.next(&mut ctx).unwrap().is_none());
        assert_eq!(emitted, 2);
        assert_eq!(pulls.get(), 2);
    }

    #[test]
    fn test_distinct() {
        let db = seed();
        let rows = run_query(&db, "MATCH (n:Person) RETURN DISTINCT n.name STARTS WITH 'X' AS x");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<bool>("x").unwrap(), false);
    }

    #[test]
    fn test_hash_join_cross_when_no_shared_alias() {
        let db = seed();
        let rows = run_query(&db, "MATCH (a:Person), (b:Car) RETURN a, b");
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert!(row.get_value("a").is_some());
            assert_eq!(row.get_value("b"), Some(&Value::NodeRef(NodeId(3))));
        }
    }

    #[test]
    fn test_aggregation_count() {
        let db = seed();
        let rows = run_query(&db, "MATCH (n:Person) RETURN count(n) AS c");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<i64>("c").unwrap(), 2);
    }

    #[test]
    fn test_aggregation_grouped() {
        let db = seed();
        db.add_node(4, r#"["Person"]"#, r#"{"name":"A","age":40}"#).unwrap();
        let rows = run_query(&db, "MATCH (n:Person) RETURN n.name, count(n) AS c");
        assert_eq!(rows.len(), 2);
        let a_row = rows
            .iter()
            .find(|r| r.get_value("n.name") == Some(&Value::Str("A".into())))
            .unwrap();
        assert_eq!(a_row.get::<i64>("c").unwrap(), 2);
    }

    #[test]
    fn test_aggregation_over_empty_input_yields_one_row() {
        let db = MemoryAdapter::new();
        let rows = run_query(&db, "MATCH (n:Person) RETURN count(n) AS c");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<i64>("c").unwrap(), 0);
    }

    #[test]
    fn test_unwind_fans_out() {
        let db = MemoryAdapter::new();
        let rows = run_query(&db, "UNWIND [1, 2, 3] AS x RETURN x");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].get::<i64>("x").unwrap(), 3);
    }

    #[test]
    fn test_skip_offsets_rows() {
        let db = seed();
        let rows = run_query(&db, "MATCH (n) RETURN n ORDER BY id(n) SKIP 2");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_value("n"), Some(&Value::NodeRef(NodeId(3))));
    }

    #[test]
    fn test_sort_is_stable() {
        let db = MemoryAdapter::new();
        // Same sort key, distinct payloads: input order must survive.
        db.add_node(1, r#"["T"]"#, r#"{"k":1,"v":"first"}"#).unwrap();
        db.add_node(2, r#"["T"]"#, r#"{"k":1,"v":"second"}"#).unwrap();
        db.add_node(3, r#"["T"]"#, r#"{"k":0,"v":"zero"}"#).unwrap();
        let rows = run_query(&db, "MATCH (n:T) RETURN n.k, n.v ORDER BY n.k");
        let vs: Vec<String> = rows.iter().map(|r| r.get::<String>("n.v").unwrap()).collect();
        assert_eq!(vs, vec!["zero", "first", "second"]);
    }

    #[test]
    fn test_nulls_sort_least() {
        let db = MemoryAdapter::new();
        db.add_node(1, r#"["T"]"#, r#"{"k":5}"#).unwrap();
        db.add_node(2, r#"["T"]"#, "{}").unwrap();
        let rows = run_query(&db, "MATCH (n:T) RETURN n.k ORDER BY n.k");
        assert_eq!(rows[0].get_value("n.k"), Some(&Value::Null));
        assert_eq!(rows[1].get::<i64>("n.k").unwrap(), 5);
    }
}
