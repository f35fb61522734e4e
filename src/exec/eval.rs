//! Expression evaluator.
//!
//! Evaluates AST expressions against a result row and the execution
//! context. Null propagates through arithmetic and comparison; cross-type
//! comparison surfaces a `Mismatch` error; Int arithmetic widens to Float
//! on overflow.

use std::cmp::Ordering;

use super::context::ExecContext;
use super::result::ResultRow;
use crate::cypher::ast::{BinaryOp, Expr, Literal, StringOp, UnaryOp};
use crate::model::Value;
use crate::{Error, Result};

/// Evaluate an expression to a value.
pub fn eval(expr: &Expr, row: &ResultRow, ctx: &ExecContext) -> Result<Value> {
    match expr {
        Expr::Literal(lit) => Ok(literal_value(lit)),

        Expr::Variable(name) => {
            if let Some(v) = row.get_value(name) {
                Ok(v.clone())
            } else if ctx.has_binding(name) {
                Ok(ctx.get(name).clone())
            } else {
                Err(Error::Execution(format!("unbound variable: {name}")))
            }
        }

        Expr::Parameter(name) => ctx
            .param(name)
            .cloned()
            .ok_or_else(|| Error::Execution(format!("missing parameter: ${name}"))),

        Expr::Property { expr: inner, key } => {
            let value = eval(inner, row, ctx)?;
            property_of(&value, key, ctx)
        }

        Expr::FunctionCall { name, args, distinct } => {
            eval_function(name, args, *distinct, row, ctx)
        }

        Expr::Binary { left, op, right } => {
            let lv = eval(left, row, ctx)?;
            // Short-circuit logical operators before evaluating the right side.
            match op {
                BinaryOp::And if lv == Value::Bool(false) => return Ok(Value::Bool(false)),
                BinaryOp::Or if lv == Value::Bool(true) => return Ok(Value::Bool(true)),
                _ => {}
            }
            let rv = eval(right, row, ctx)?;
            eval_binary(&lv, *op, &rv)
        }

        Expr::Unary { op, expr: inner } => {
            let value = eval(inner, row, ctx)?;
            match op {
                UnaryOp::Not => match value {
                    Value::Null => Ok(Value::Null),
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    other => Ok(Value::Bool(!other.is_truthy())),
                },
                UnaryOp::Neg => match value {
                    Value::Null => Ok(Value::Null),
                    Value::Int(i) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| Error::Range("integer negation overflow".into())),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(Error::Mismatch(format!(
                        "cannot negate {}",
                        other.type_name()
                    ))),
                },
                UnaryOp::Pos => match value {
                    Value::Null | Value::Int(_) | Value::Float(_) => Ok(value),
                    other => Err(Error::Mismatch(format!(
                        "unary + requires a number, got {}",
                        other.type_name()
                    ))),
                },
            }
        }

        Expr::StringOp { left, op, right } => {
            let lv = eval(left, row, ctx)?;
            let rv = eval(right, row, ctx)?;
            match (&lv, &rv) {
                (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                (Value::Str(a), Value::Str(b)) => Ok(Value::Bool(match op {
                    StringOp::StartsWith => a.starts_with(b.as_str()),
                    StringOp::EndsWith => a.ends_with(b.as_str()),
                    StringOp::Contains => a.contains(b.as_str()),
                })),
                _ => Err(Error::Mismatch(format!(
                    "string operator requires STRING operands, got {} and {}",
                    lv.type_name(),
                    rv.type_name()
                ))),
            }
        }

        Expr::IsNull { expr: inner, negated } => {
            let value = eval(inner, row, ctx)?;
            let is_null = value.is_null();
            Ok(Value::Bool(if *negated { !is_null } else { is_null }))
        }

        Expr::In { expr: item, list } => {
            let item_value = eval(item, row, ctx)?;
            let list_value = eval(list, row, ctx)?;
            match list_value {
                Value::Null => Ok(Value::Null),
                Value::List(items) => {
                    if item_value.is_null() {
                        Ok(Value::Null)
                    } else {
                        Ok(Value::Bool(items.iter().any(|v| *v == item_value)))
                    }
                }
                other => Err(Error::Mismatch(format!(
                    "IN requires a LIST, got {}",
                    other.type_name()
                ))),
            }
        }

        Expr::HasLabel { expr: inner, label } => {
            let value = eval(inner, row, ctx)?;
            match value {
                Value::Null => Ok(Value::Null),
                Value::NodeRef(id) => {
                    let node = ctx
                        .adapter
                        .node(id.0)?
                        .ok_or_else(|| Error::NotFound(format!("node {id}")))?
                        .decode()?;
                    Ok(Value::Bool(node.has_label(label)))
                }
                other => Err(Error::Mismatch(format!(
                    "label check requires a NODE, got {}",
                    other.type_name()
                ))),
            }
        }

        Expr::List(items) => {
            let values: Vec<Value> = items
                .iter()
                .map(|e| eval(e, row, ctx))
                .collect::<Result<_>>()?;
            Ok(Value::List(values))
        }

        Expr::Map(pairs) => {
            let mut out = Vec::new();
            for (k, v) in pairs {
                Value::map_insert(&mut out, k.clone(), eval(v, row, ctx)?);
            }
            Ok(Value::Map(out))
        }

        Expr::Case { operand, whens, else_expr } => {
            if let Some(op) = operand {
                let op_value = eval(op, row, ctx)?;
                for (when, then) in whens {
                    if eval(when, row, ctx)? == op_value {
                        return eval(then, row, ctx);
                    }
                }
            } else {
                for (when, then) in whens {
                    if eval(when, row, ctx)?.is_truthy() {
                        return eval(then, row, ctx);
                    }
                }
            }
            match else_expr {
                Some(e) => eval(e, row, ctx),
                None => Ok(Value::Null),
            }
        }

        Expr::Star => Err(Error::Execution(
            "'*' is only valid as a projection item".into(),
        )),
    }
}

pub fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

/// Resolve `value.key` — graph references read through the adapter.
pub fn property_of(value: &Value, key: &str, ctx: &ExecContext) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Map(_) => Ok(value.map_get(key).cloned().unwrap_or(Value::Null)),
        Value::NodeRef(id) => match ctx.adapter.node(id.0)? {
            Some(row) => Ok(row.decode()?.get(key).cloned().unwrap_or(Value::Null)),
            None => Ok(Value::Null),
        },
        Value::RelRef(id) => match ctx.adapter.edge(id.0)? {
            Some(row) => Ok(row.decode()?.get(key).cloned().unwrap_or(Value::Null)),
            None => Ok(Value::Null),
        },
        other => Err(Error::Mismatch(format!(
            "property access requires NODE, RELATIONSHIP or MAP, got {}",
            other.type_name()
        ))),
    }
}

// ============================================================================
// Binary operators
// ============================================================================

fn eval_binary(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    use BinaryOp::*;

    // Three-valued logic keeps nulls meaningful for AND/OR/XOR.
    match op {
        And => {
            return Ok(match (truth(left), truth(right)) {
                (Some(false), _) | (_, Some(false)) => Value::Bool(false),
                (Some(true), Some(true)) => Value::Bool(true),
                _ => Value::Null,
            });
        }
        Or => {
            return Ok(match (truth(left), truth(right)) {
                (Some(true), _) | (_, Some(true)) => Value::Bool(true),
                (Some(false), Some(false)) => Value::Bool(false),
                _ => Value::Null,
            });
        }
        Xor => {
            return Ok(match (truth(left), truth(right)) {
                (Some(a), Some(b)) => Value::Bool(a ^ b),
                _ => Value::Null,
            });
        }
        _ => {}
    }

    // Null propagates through arithmetic and comparison.
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    match op {
        Eq => value_equality(left, right).map(Value::Bool),
        Neq => value_equality(left, right).map(|b| Value::Bool(!b)),
        Lt => Ok(Value::Bool(left.compare(right)? == Ordering::Less)),
        Lte => Ok(Value::Bool(left.compare(right)? != Ordering::Greater)),
        Gt => Ok(Value::Bool(left.compare(right)? == Ordering::Greater)),
        Gte => Ok(Value::Bool(left.compare(right)? != Ordering::Less)),

        Add => eval_add(left, right),
        Sub => eval_arith(left, right, i64::checked_sub, |a, b| a - b),
        Mul => eval_arith(left, right, i64::checked_mul, |a, b| a * b),
        Div => {
            if matches!(right, Value::Int(0)) || matches!(right, Value::Float(f) if *f == 0.0) {
                return Err(Error::Execution("division by zero".into()));
            }
            eval_arith(left, right, i64::checked_div, |a, b| a / b)
        }
        Mod => {
            if matches!(right, Value::Int(0)) || matches!(right, Value::Float(f) if *f == 0.0) {
                return Err(Error::Execution("modulo by zero".into()));
            }
            eval_arith(left, right, i64::checked_rem, |a, b| a % b)
        }
        Pow => {
            let (Some(a), Some(b)) = (left.as_float(), right.as_float()) else {
                return Err(Error::Mismatch(format!(
                    "^ requires numbers, got {} and {}",
                    left.type_name(),
                    right.type_name()
                )));
            };
            Ok(Value::Float(a.powf(b)))
        }

        RegexMatch => Err(Error::Execution("regex matching is not supported".into())),

        And | Or | Xor => unreachable!("handled above"),
    }
}

fn truth(value: &Value) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        other => Some(other.is_truthy()),
    }
}

/// Equality under the comparison rules: same-type (or numeric) operands
/// compare naturally; anything else is a type mismatch.
fn value_equality(left: &Value, right: &Value) -> Result<bool> {
    match (left, right) {
        (Value::List(_), Value::List(_)) | (Value::Map(_), Value::Map(_)) => Ok(left == right),
        (Value::Bool(_), Value::Bool(_)) => Ok(left == right),
        _ => Ok(left.compare(right)? == Ordering::Equal),
    }
}

fn eval_add(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(a
            .checked_add(*b)
            .map(Value::Int)
            .unwrap_or(Value::Float(*a as f64 + *b as f64))),
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
        (Value::List(a), Value::List(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(Value::List(out))
        }
        _ => match (left.as_float(), right.as_float()) {
            (Some(a), Some(b)) if left.is_numeric() && right.is_numeric() => {
                Ok(Value::Float(a + b))
            }
            _ => Err(Error::Mismatch(format!(
                "cannot add {} and {}",
                left.type_name(),
                right.type_name()
            ))),
        },
    }
}

/// Int/Int arithmetic stays Int unless it overflows, in which case it
/// widens to Float; any Float operand yields Float.
fn eval_arith(
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(int_op(*a, *b)
            .map(Value::Int)
            .unwrap_or_else(|| Value::Float(float_op(*a as f64, *b as f64)))),
        _ => match (left.as_float(), right.as_float()) {
            (Some(a), Some(b)) if left.is_numeric() && right.is_numeric() => {
                Ok(Value::Float(float_op(a, b)))
            }
            _ => Err(Error::Mismatch(format!(
                "arithmetic requires numbers, got {} and {}",
                left.type_name(),
                right.type_name()
            ))),
        },
    }
}

// ============================================================================
// Functions
// ============================================================================

fn eval_function(
    name: &str,
    args: &[Expr],
    distinct: bool,
    row: &ResultRow,
    ctx: &ExecContext,
) -> Result<Value> {
    // Aggregates take a pre-collected list argument in scalar position.
    if is_aggregate_name(name) {
        if args.is_empty() {
            return Err(Error::Execution(format!(
                "{name}() outside an aggregation requires a list argument"
            )));
        }
        let value = eval(&args[0], row, ctx)?;
        let Value::List(mut items) = value else {
            return Err(Error::Mismatch(format!(
                "{name}() takes a LIST, got {}",
                value.type_name()
            )));
        };
        if distinct {
            items = dedup_values(items);
        }
        return eval_aggregate(name, &items);
    }

    let arity = |n: usize| -> Result<()> {
        if args.len() == n {
            Ok(())
        } else {
            Err(Error::Execution(format!(
                "{name}() expects {n} argument(s), got {}",
                args.len()
            )))
        }
    };

    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "toupper" => {
            arity(1)?;
            string_fn(name, eval(&args[0], row, ctx)?, |s| s.to_uppercase())
        }
        "tolower" => {
            arity(1)?;
            string_fn(name, eval(&args[0], row, ctx)?, |s| s.to_lowercase())
        }
        "trim" => {
            arity(1)?;
            string_fn(name, eval(&args[0], row, ctx)?, |s| s.trim().to_string())
        }
        "replace" => {
            arity(3)?;
            let s = eval(&args[0], row, ctx)?;
            let from = eval(&args[1], row, ctx)?;
            let to = eval(&args[2], row, ctx)?;
            match (&s, &from, &to) {
                (Value::Null, _, _) => Ok(Value::Null),
                (Value::Str(s), Value::Str(from), Value::Str(to)) => {
                    Ok(Value::Str(s.replace(from.as_str(), to)))
                }
                _ => Err(Error::Mismatch("replace() requires STRING arguments".into())),
            }
        }
        "substring" => {
            if args.len() != 2 && args.len() != 3 {
                return Err(Error::Execution(
                    "substring() expects 2 or 3 arguments".into(),
                ));
            }
            let s = eval(&args[0], row, ctx)?;
            if s.is_null() {
                return Ok(Value::Null);
            }
            let Value::Str(s) = s else {
                return Err(Error::Mismatch("substring() requires a STRING".into()));
            };
            let start = int_arg(name, eval(&args[1], row, ctx)?)?;
            let start = start.max(0) as usize;
            let chars: Vec<char> = s.chars().collect();
            let end = if args.len() == 3 {
                let len = int_arg(name, eval(&args[2], row, ctx)?)?.max(0) as usize;
                (start + len).min(chars.len())
            } else {
                chars.len()
            };
            if start >= chars.len() {
                return Ok(Value::Str(String::new()));
            }
            Ok(Value::Str(chars[start..end].iter().collect()))
        }
        "length" | "size" => {
            arity(1)?;
            match eval(&args[0], row, ctx)? {
                Value::Null => Ok(Value::Null),
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(l) => Ok(Value::Int(l.len() as i64)),
                Value::Map(m) => Ok(Value::Int(m.len() as i64)),
                other => Err(Error::Mismatch(format!(
                    "{name}() requires STRING, LIST or MAP, got {}",
                    other.type_name()
                ))),
            }
        }
        "abs" => {
            arity(1)?;
            match eval(&args[0], row, ctx)? {
                Value::Null => Ok(Value::Null),
                Value::Int(i) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| Error::Range("abs() overflow".into())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(Error::Mismatch(format!(
                    "abs() requires a number, got {}",
                    other.type_name()
                ))),
            }
        }
        "ceil" => {
            arity(1)?;
            float_fn(name, eval(&args[0], row, ctx)?, f64::ceil)
        }
        "floor" => {
            arity(1)?;
            float_fn(name, eval(&args[0], row, ctx)?, f64::floor)
        }
        "round" => {
            arity(1)?;
            float_fn(name, eval(&args[0], row, ctx)?, f64::round)
        }
        "sqrt" => {
            arity(1)?;
            float_fn(name, eval(&args[0], row, ctx)?, f64::sqrt)
        }
        "head" => {
            arity(1)?;
            match eval(&args[0], row, ctx)? {
                Value::Null => Ok(Value::Null),
                Value::List(l) => Ok(l.into_iter().next().unwrap_or(Value::Null)),
                other => Err(Error::Mismatch(format!(
                    "head() requires a LIST, got {}",
                    other.type_name()
                ))),
            }
        }
        "last" => {
            arity(1)?;
            match eval(&args[0], row, ctx)? {
                Value::Null => Ok(Value::Null),
                Value::List(l) => Ok(l.into_iter().next_back().unwrap_or(Value::Null)),
                other => Err(Error::Mismatch(format!(
                    "last() requires a LIST, got {}",
                    other.type_name()
                ))),
            }
        }
        "tail" => {
            arity(1)?;
            match eval(&args[0], row, ctx)? {
                Value::Null => Ok(Value::Null),
                Value::List(mut l) => {
                    if !l.is_empty() {
                        l.remove(0);
                    }
                    Ok(Value::List(l))
                }
                other => Err(Error::Mismatch(format!(
                    "tail() requires a LIST, got {}",
                    other.type_name()
                ))),
            }
        }
        "tostring" => {
            arity(1)?;
            match eval(&args[0], row, ctx)? {
                Value::Null => Ok(Value::Null),
                Value::Str(s) => Ok(Value::Str(s)),
                other => Ok(Value::Str(other.to_string())),
            }
        }
        "tointeger" => {
            arity(1)?;
            match eval(&args[0], row, ctx)? {
                Value::Null => Ok(Value::Null),
                Value::Int(i) => Ok(Value::Int(i)),
                Value::Float(f) => Ok(Value::Int(f as i64)),
                Value::Str(s) => Ok(s.trim().parse::<i64>().map(Value::Int).unwrap_or(Value::Null)),
                other => Err(Error::Mismatch(format!(
                    "toInteger() cannot convert {}",
                    other.type_name()
                ))),
            }
        }
        "tofloat" => {
            arity(1)?;
            match eval(&args[0], row, ctx)? {
                Value::Null => Ok(Value::Null),
                Value::Float(f) => Ok(Value::Float(f)),
                Value::Int(i) => Ok(Value::Float(i as f64)),
                Value::Str(s) => Ok(s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .unwrap_or(Value::Null)),
                other => Err(Error::Mismatch(format!(
                    "toFloat() cannot convert {}",
                    other.type_name()
                ))),
            }
        }
        "coalesce" => {
            for arg in args {
                let v = eval(arg, row, ctx)?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            Ok(Value::Null)
        }
        "id" => {
            arity(1)?;
            match eval(&args[0], row, ctx)? {
                Value::Null => Ok(Value::Null),
                Value::NodeRef(id) => Ok(Value::Int(id.0)),
                Value::RelRef(id) => Ok(Value::Int(id.0)),
                other => Err(Error::Mismatch(format!(
                    "id() requires NODE or RELATIONSHIP, got {}",
                    other.type_name()
                ))),
            }
        }
        "labels" => {
            arity(1)?;
            match eval(&args[0], row, ctx)? {
                Value::Null => Ok(Value::Null),
                Value::NodeRef(id) => {
                    let node = ctx
                        .adapter
                        .node(id.0)?
                        .ok_or_else(|| Error::NotFound(format!("node {id}")))?
                        .decode()?;
                    Ok(Value::List(node.labels.into_iter().map(Value::Str).collect()))
                }
                other => Err(Error::Mismatch(format!(
                    "labels() requires a NODE, got {}",
                    other.type_name()
                ))),
            }
        }
        "type" => {
            arity(1)?;
            match eval(&args[0], row, ctx)? {
                Value::Null => Ok(Value::Null),
                Value::RelRef(id) => {
                    let edge = ctx
                        .adapter
                        .edge(id.0)?
                        .ok_or_else(|| Error::NotFound(format!("edge {id}")))?;
                    Ok(Value::Str(edge.edge_type))
                }
                other => Err(Error::Mismatch(format!(
                    "type() requires a RELATIONSHIP, got {}",
                    other.type_name()
                ))),
            }
        }
        _ => Err(Error::Execution(format!("unknown function: {name}"))),
    }
}

fn string_fn(name: &str, value: Value, f: impl Fn(&str) -> String) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Str(s) => Ok(Value::Str(f(&s))),
        other => Err(Error::Mismatch(format!(
            "{name}() requires a STRING, got {}",
            other.type_name()
        ))),
    }
}

fn float_fn(name: &str, value: Value, f: impl Fn(f64) -> f64) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => Ok(Value::Float(f(i as f64))),
        Value::Float(v) => Ok(Value::Float(f(v))),
        other => Err(Error::Mismatch(format!(
            "{name}() requires a number, got {}",
            other.type_name()
        ))),
    }
}

fn int_arg(name: &str, value: Value) -> Result<i64> {
    value.as_int().ok_or_else(|| {
        Error::Mismatch(format!("{name}() requires an INTEGER argument"))
    })
}

pub fn is_aggregate_name(name: &str) -> bool {
    ["count", "sum", "avg", "min", "max", "collect"]
        .iter()
        .any(|a| name.eq_ignore_ascii_case(a))
}

pub fn dedup_values(items: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Aggregate a pre-collected group. Nulls are ignored except by `count`
/// applied to an empty argument list (row count), which the caller handles.
pub fn eval_aggregate(name: &str, items: &[Value]) -> Result<Value> {
    let non_null: Vec<&Value> = items.iter().filter(|v| !v.is_null()).collect();
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "count" => Ok(Value::Int(non_null.len() as i64)),
        "collect" => Ok(Value::List(non_null.into_iter().cloned().collect())),
        "sum" => {
            let mut int_sum: i64 = 0;
            let mut float_sum: f64 = 0.0;
            let mut widened = false;
            for v in &non_null {
                match v {
                    Value::Int(i) => match int_sum.checked_add(*i) {
                        Some(s) => int_sum = s,
                        None => {
                            widened = true;
                            float_sum += *i as f64;
                        }
                    },
                    Value::Float(f) => {
                        widened = true;
                        float_sum += f;
                    }
                    other => {
                        return Err(Error::Mismatch(format!(
                            "sum() requires numbers, got {}",
                            other.type_name()
                        )));
                    }
                }
            }
            if widened {
                Ok(Value::Float(int_sum as f64 + float_sum))
            } else {
                Ok(Value::Int(int_sum))
            }
        }
        "avg" => {
            if non_null.is_empty() {
                return Ok(Value::Null);
            }
            let mut sum = 0.0;
            for v in &non_null {
                sum += v.as_float().ok_or_else(|| {
                    Error::Mismatch(format!("avg() requires numbers, got {}", v.type_name()))
                })?;
            }
            Ok(Value::Float(sum / non_null.len() as f64))
        }
        "min" => fold_extreme(&non_null, Ordering::Less),
        "max" => fold_extreme(&non_null, Ordering::Greater),
        _ => Err(Error::Execution(format!("unknown aggregate: {name}"))),
    }
}

fn fold_extreme(items: &[&Value], keep: Ordering) -> Result<Value> {
    let mut best: Option<&Value> = None;
    for v in items {
        best = Some(match best {
            None => v,
            Some(b) => {
                if v.compare(b)? == keep {
                    v
                } else {
                    b
                }
            }
        });
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::ast::Literal;
    use crate::model::{EdgeId, NodeId};
    use crate::storage::{MemoryAdapter, StorageAdapter};

    fn eval_str(expr: &str) -> Result<Value> {
        // Wrap the expression in RETURN so the full parser handles it.
        let query = format!("RETURN {expr}");
        let ast = crate::cypher::parse(&query).unwrap();
        let item = &ast.first.return_clause.as_ref().unwrap().items[0];
        let adapter = MemoryAdapter::new();
        let ctx = ExecContext::new(&adapter);
        eval(&item.expr, &ResultRow::new(), &ctx)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval_str("1 + 2 * 3").unwrap(), Value::Int(7));
        assert_eq!(eval_str("7 % 3").unwrap(), Value::Int(1));
        assert_eq!(eval_str("1 + 2.5").unwrap(), Value::Float(3.5));
        assert_eq!(eval_str("2 ^ 3").unwrap(), Value::Float(8.0));
    }

    #[test]
    fn test_int_overflow_widens_to_float() {
        let expr = format!("{} + 1", i64::MAX);
        assert!(matches!(eval_str(&expr).unwrap(), Value::Float(_)));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(eval_str("1 / 0").unwrap_err().code(), "EXECUTION");
        assert_eq!(eval_str("1 % 0").unwrap_err().code(), "EXECUTION");
    }

    #[test]
    fn test_null_propagates() {
        assert_eq!(eval_str("1 + NULL").unwrap(), Value::Null);
        assert_eq!(eval_str("NULL = NULL").unwrap(), Value::Null);
        assert_eq!(eval_str("NULL < 3").unwrap(), Value::Null);
    }

    #[test]
    fn test_cross_type_comparison_is_error() {
        assert_eq!(eval_str("1 = 'one'").unwrap_err().code(), "MISMATCH");
        assert_eq!(eval_str("1 < 'one'").unwrap_err().code(), "MISMATCH");
    }

    #[test]
    fn test_string_concat_and_ops() {
        assert_eq!(eval_str("'ab' + 'cd'").unwrap(), Value::Str("abcd".into()));
        assert_eq!(
            eval_str("'hello' STARTS WITH 'he'").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval_str("'hello' CONTAINS 'ell'").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval_str("'hello' ENDS WITH 'lo'").unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_three_valued_logic() {
        assert_eq!(eval_str("NULL AND false").unwrap(), Value::Bool(false));
        assert_eq!(eval_str("NULL AND true").unwrap(), Value::Null);
        assert_eq!(eval_str("NULL OR true").unwrap(), Value::Bool(true));
        assert_eq!(eval_str("NULL OR false").unwrap(), Value::Null);
        assert_eq!(eval_str("NULL XOR true").unwrap(), Value::Null);
    }

    #[test]
    fn test_in_list() {
        assert_eq!(eval_str("2 IN [1, 2, 3]").unwrap(), Value::Bool(true));
        assert_eq!(eval_str("9 IN [1, 2, 3]").unwrap(), Value::Bool(false));
        assert_eq!(eval_str("2 IN NULL").unwrap(), Value::Null);
        assert_eq!(eval_str("1 IN 2").unwrap_err().code(), "MISMATCH");
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(eval_str("toUpper('ab')").unwrap(), Value::Str("AB".into()));
        assert_eq!(eval_str("toLower('AB')").unwrap(), Value::Str("ab".into()));
        assert_eq!(eval_str("trim('  x  ')").unwrap(), Value::Str("x".into()));
        assert_eq!(
            eval_str("replace('aXbX', 'X', '-')").unwrap(),
            Value::Str("a-b-".into())
        );
        assert_eq!(
            eval_str("substring('hello', 1, 3)").unwrap(),
            Value::Str("ell".into())
        );
        assert_eq!(
            eval_str("substring('hello', 2)").unwrap(),
            Value::Str("llo".into())
        );
        assert_eq!(eval_str("length('abc')").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_numeric_functions() {
        assert_eq!(eval_str("abs(-3)").unwrap(), Value::Int(3));
        assert_eq!(eval_str("ceil(1.2)").unwrap(), Value::Float(2.0));
        assert_eq!(eval_str("floor(1.8)").unwrap(), Value::Float(1.0));
        assert_eq!(eval_str("round(1.5)").unwrap(), Value::Float(2.0));
        assert_eq!(eval_str("sqrt(9)").unwrap(), Value::Float(3.0));
    }

    #[test]
    fn test_list_functions() {
        assert_eq!(eval_str("head([1, 2, 3])").unwrap(), Value::Int(1));
        assert_eq!(eval_str("last([1, 2, 3])").unwrap(), Value::Int(3));
        assert_eq!(
            eval_str("tail([1, 2, 3])").unwrap(),
            Value::List(vec![Value::Int(2), Value::Int(3)])
        );
        assert_eq!(eval_str("size([1, 2])").unwrap(), Value::Int(2));
        assert_eq!(eval_str("head([])").unwrap(), Value::Null);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(eval_str("toString(42)").unwrap(), Value::Str("42".into()));
        assert_eq!(eval_str("toInteger('17')").unwrap(), Value::Int(17));
        assert_eq!(eval_str("toInteger('nope')").unwrap(), Value::Null);
        assert_eq!(eval_str("toFloat('2.5')").unwrap(), Value::Float(2.5));
    }

    #[test]
    fn test_aggregates_over_lists() {
        assert_eq!(eval_str("count([1, 2, 3])").unwrap(), Value::Int(3));
        assert_eq!(eval_str("sum([1, 2, 3])").unwrap(), Value::Int(6));
        assert_eq!(eval_str("avg([1, 2, 3])").unwrap(), Value::Float(2.0));
        assert_eq!(eval_str("min([3, 1, 2])").unwrap(), Value::Int(1));
        assert_eq!(eval_str("max([3, 1, 2])").unwrap(), Value::Int(3));
        // Nulls are ignored.
        assert_eq!(eval_str("count([1, NULL, 3])").unwrap(), Value::Int(2));
    }

    #[test]
    fn test_case_expression() {
        assert_eq!(
            eval_str("CASE WHEN 1 < 2 THEN 'yes' ELSE 'no' END").unwrap(),
            Value::Str("yes".into())
        );
        assert_eq!(
            eval_str("CASE 2 WHEN 1 THEN 'a' WHEN 2 THEN 'b' END").unwrap(),
            Value::Str("b".into())
        );
        assert_eq!(eval_str("CASE WHEN false THEN 1 END").unwrap(), Value::Null);
    }

    #[test]
    fn test_literal_helper() {
        assert_eq!(literal_value(&Literal::Int(5)), Value::Int(5));
        assert_eq!(literal_value(&Literal::Null), Value::Null);
    }

    #[test]
    fn test_property_access_reads_through_adapter() {
        let adapter = MemoryAdapter::new();
        adapter.add_node(1, r#"["A"]"#, r#"{"name":"Ada"}"#).unwrap();
        adapter.add_node(2, "[]", "{}").unwrap();
        adapter
            .add_edge(7, 1, 2, "KNOWS", 0.0, r#"{"since":2020}"#)
            .unwrap();
        let ctx = ExecContext::new(&adapter);

        let mut row = ResultRow::new();
        row.add_column("n", Value::NodeRef(NodeId(1)));
        row.add_column("r", Value::RelRef(EdgeId(7)));

        let node_prop = Expr::Property {
            expr: Box::new(Expr::Variable("n".into())),
            key: "name".into(),
        };
        assert_eq!(eval(&node_prop, &row, &ctx).unwrap(), Value::Str("Ada".into()));

        let rel_prop = Expr::Property {
            expr: Box::new(Expr::Variable("r".into())),
            key: "since".into(),
        };
        assert_eq!(eval(&rel_prop, &row, &ctx).unwrap(), Value::Int(2020));

        // Absent properties and dangling references read as null.
        let missing = Expr::Property {
            expr: Box::new(Expr::Variable("n".into())),
            key: "age".into(),
        };
        assert_eq!(eval(&missing, &row, &ctx).unwrap(), Value::Null);
    }
}
