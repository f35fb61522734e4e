//! Universal value type for the query engine.
//!
//! Every non-scalar variant owns its contents exclusively; `Clone` is a deep
//! copy. `Map` keeps insertion order and unique keys — the substrate's JSON
//! objects and the result-row renderer both depend on that.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{EdgeId, NodeId};
use crate::{Error, Result};

/// The tagged value sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    NodeRef(NodeId),
    RelRef(EdgeId),
    List(Vec<Value>),
    /// Ordered (key, value) pairs; keys unique, last write wins.
    Map(Vec<(String, Value)>),
}

// ============================================================================
// Type checking
// ============================================================================

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::Str(_) => "STRING",
            Value::NodeRef(_) => "NODE",
            Value::RelRef(_) => "RELATIONSHIP",
            Value::List(_) => "LIST",
            Value::Map(_) => "MAP",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Truthiness for filter predicates: a row passes iff the predicate is
    /// non-null and non-false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Lookup in a `Map` value by key.
    pub fn map_get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Update-or-insert into a `Map` value, preserving first-insertion order.
    pub fn map_insert(pairs: &mut Vec<(String, Value)>, key: String, value: Value) {
        if let Some(slot) = pairs.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            pairs.push((key, value));
        }
    }
}

// ============================================================================
// Comparison
// ============================================================================

impl Value {
    /// Strict comparison for the evaluator. Null operands must be handled by
    /// the caller (null propagates to a null result, not an error); any
    /// remaining cross-type pair is a `Mismatch`.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => {
                Ok(a.partial_cmp(b).unwrap_or(Ordering::Equal))
            }
            (Value::Int(a), Value::Float(b)) => {
                Ok((*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal))
            }
            (Value::Float(a), Value::Int(b)) => {
                Ok(a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal))
            }
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::NodeRef(a), Value::NodeRef(b)) => Ok(a.0.cmp(&b.0)),
            (Value::RelRef(a), Value::RelRef(b)) => Ok(a.0.cmp(&b.0)),
            _ => Err(Error::Mismatch(format!(
                "cannot compare {} with {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Total order for sorting and distinct: nulls sort least, then by type
    /// rank, then by natural order within a type. Used where a comparator
    /// must never fail.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) | Value::Float(_) => 2,
                Value::Str(_) => 3,
                Value::NodeRef(_) => 4,
                Value::RelRef(_) => 5,
                Value::List(_) => 6,
                Value::Map(_) => 7,
            }
        }
        let (ra, rb) = (rank(self), rank(other));
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.sort_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.sort_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}
impl From<NodeId> for Value {
    fn from(v: NodeId) -> Self {
        Value::NodeRef(v)
    }
}
impl From<EdgeId> for Value {
    fn from(v: EdgeId) -> Self {
        Value::RelRef(v)
    }
}
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ============================================================================
// JSON interchange
// ============================================================================

impl Value {
    /// Convert to the `serde_json` representation used at the storage
    /// boundary. Graph references flatten to their integer id.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => {
                serde_json::Number::from_f64(*f)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null)
            }
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::NodeRef(id) => serde_json::Value::from(id.0),
            Value::RelRef(id) => serde_json::Value::from(id.0),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(pairs) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in pairs {
                    obj.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(obj)
            }
        }
    }

    /// Decode from a `serde_json` value read out of the substrate.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Map(obj.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect())
            }
        }
    }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::NodeRef(id) => write!(f, "Node({id})"),
            Value::RelRef(id) => write!(f, "Rel({id})"),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from("hello"), Value::Str("hello".into()));
        assert_eq!(Value::from(42), Value::Int(42));
        assert_eq!(Value::from(2.5), Value::Float(2.5));
        assert_eq!(Value::from(true), Value::Bool(true));
    }

    #[test]
    fn test_clone_is_deep_and_equal() {
        let v = Value::Map(vec![
            ("xs".into(), Value::List(vec![Value::Int(1), Value::Str("a".into())])),
            ("n".into(), Value::NodeRef(NodeId(7))),
        ]);
        let c = v.clone();
        assert_eq!(v, c);
        // Mutating the clone must not touch the original.
        let mut c2 = c;
        if let Value::Map(pairs) = &mut c2 {
            pairs[0].1 = Value::Null;
        }
        assert_ne!(v, c2);
    }

    #[test]
    fn test_cross_type_comparison_is_mismatch() {
        let err = Value::Int(1).compare(&Value::Str("1".into())).unwrap_err();
        assert_eq!(err.code(), "MISMATCH");
    }

    #[test]
    fn test_numeric_comparison_widens() {
        assert_eq!(
            Value::Int(1).compare(&Value::Float(1.5)).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn test_null_sorts_least() {
        assert_eq!(Value::Null.sort_cmp(&Value::Int(i64::MIN)), Ordering::Less);
        assert_eq!(Value::Int(3).sort_cmp(&Value::Null), Ordering::Greater);
    }

    #[test]
    fn test_json_round_trip_preserves_values() {
        let v = Value::Map(vec![
            ("name".into(), Value::Str("Ada".into())),
            ("age".into(), Value::Int(3)),
            ("tags".into(), Value::List(vec![Value::Str("x".into()), Value::Null])),
        ]);
        let back = Value::from_json(&v.to_json());
        assert_eq!(back.map_get("name"), Some(&Value::Str("Ada".into())));
        assert_eq!(back.map_get("age"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_map_insert_last_write_wins() {
        let mut pairs = vec![("a".to_string(), Value::Int(1))];
        Value::map_insert(&mut pairs, "a".into(), Value::Int(2));
        Value::map_insert(&mut pairs, "b".into(), Value::Int(3));
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], ("a".to_string(), Value::Int(2)));
    }
}
