//! Query results — ordered rows and execution statistics.

use std::fmt;

use crate::model::{EdgeId, NodeId, Value};
use crate::{Error, Result};

/// Query execution result.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
    pub stats: ExecutionStats,
}

/// A single result row. Column order is observable and preserved.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultRow {
    pub values: Vec<(String, Value)>,
}

impl ResultRow {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Append a column, deep-copying is implicit in taking ownership.
    /// A column with the same name is overwritten in place.
    pub fn add_column(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.values.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.values.push((name, value));
        }
    }

    /// Raw value lookup by column name.
    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Typed value lookup by column name.
    pub fn get<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .get_value(name)
            .ok_or_else(|| Error::NotFound(format!("column '{name}'")))?;
        T::from_value(value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    /// Render as a JSON object in column order. `pretty` indents nested
    /// structure with two spaces per level.
    pub fn to_json(&self, pretty: bool) -> String {
        let mut out = String::new();
        write_json_object(
            &mut out,
            self.values.iter().map(|(k, v)| (k.as_str(), v)),
            pretty,
            0,
        );
        out
    }
}

fn indent(out: &mut String, pretty: bool, depth: usize) {
    if pretty {
        out.push('\n');
        for _ in 0..depth {
            out.push_str("  ");
        }
    }
}

fn write_json_object<'a>(
    out: &mut String,
    pairs: impl Iterator<Item = (&'a str, &'a Value)>,
    pretty: bool,
    depth: usize,
) {
    out.push('{');
    let mut first = true;
    for (key, value) in pairs {
        if !first {
            out.push(',');
        }
        first = false;
        indent(out, pretty, depth + 1);
        write_json_string(out, key);
        out.push(':');
        if pretty {
            out.push(' ');
        }
        write_json_value(out, value, pretty, depth + 1);
    }
    if !first {
        indent(out, pretty, depth);
    }
    out.push('}');
}

fn write_json_value(out: &mut String, value: &Value, pretty: bool, depth: usize) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&f.to_string()),
        Value::Str(s) => write_json_string(out, s),
        Value::NodeRef(id) => out.push_str(&id.0.to_string()),
        Value::RelRef(id) => out.push_str(&id.0.to_string()),
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                indent(out, pretty, depth + 1);
                write_json_value(out, item, pretty, depth + 1);
            }
            if !items.is_empty() {
                indent(out, pretty, depth);
            }
            out.push(']');
        }
        Value::Map(pairs) => {
            write_json_object(out, pairs.iter().map(|(k, v)| (k.as_str(), v)), pretty, depth);
        }
    }
}

fn write_json_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

impl fmt::Display for ResultRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json(false))
    }
}

/// Mutation counters reported with every result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
    pub properties_set: u64,
    pub labels_added: u64,
    pub labels_removed: u64,
}

// ============================================================================
// Typed extraction
// ============================================================================

/// Convert from a result `Value` to a concrete type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_int().ok_or_else(|| {
            Error::Mismatch(format!("expected INTEGER, got {}", value.type_name()))
        })
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_float().ok_or_else(|| {
            Error::Mismatch(format!("expected FLOAT, got {}", value.type_name()))
        })
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            _ => Err(Error::Mismatch(format!(
                "expected BOOLEAN, got {}",
                value.type_name()
            ))),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(s.clone()),
            _ => Err(Error::Mismatch(format!(
                "expected STRING, got {}",
                value.type_name()
            ))),
        }
    }
}

impl FromValue for NodeId {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::NodeRef(id) => Ok(*id),
            _ => Err(Error::Mismatch(format!(
                "expected NODE, got {}",
                value.type_name()
            ))),
        }
    }
}

impl FromValue for EdgeId {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::RelRef(id) => Ok(*id),
            _ => Err(Error::Mismatch(format!(
                "expected RELATIONSHIP, got {}",
                value.type_name()
            ))),
        }
    }
}
