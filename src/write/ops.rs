//! Write-operation records and input validation.
//!
//! Every mutation logs an [`UndoRecord`] carrying enough prior state to
//! reverse itself; the transaction replays records LIFO on rollback.

use crate::model::Value;
use crate::storage::StorageAdapter;
use crate::{Error, Result};

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_STRING_PROPERTY_BYTES: usize = 1024 * 1024;
pub const MAX_LABELS_PER_NODE: usize = 100;
pub const MAX_PROPERTIES_PER_ENTITY: usize = 1000;

/// Reserved words rejected as identifiers.
pub const RESERVED_WORDS: &[&str] = &[
    "CREATE", "MERGE", "SET", "DELETE", "DETACH", "MATCH", "WHERE", "RETURN", "WITH", "UNWIND",
    "OPTIONAL", "UNION", "ORDER", "BY", "SKIP", "LIMIT", "ASC", "DESC", "AND", "OR", "NOT", "XOR",
    "CASE", "WHEN", "THEN", "ELSE", "END", "AS", "DISTINCT", "TRUE", "FALSE", "NULL", "IN", "IS",
    "STARTS", "ENDS", "CONTAINS",
];

// ============================================================================
// Validation
// ============================================================================

/// Variable, property, label and relationship-type names share one rule:
/// `[A-Za-z_][A-Za-z0-9_]*`, not reserved, at most 255 bytes.
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidFormat(format!("{kind} name is empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::Range(format!(
            "{kind} name exceeds {MAX_NAME_LEN} bytes"
        )));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or('\0');
    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::InvalidFormat(format!(
            "{kind} name '{name}' is not a valid identifier"
        )));
    }
    if RESERVED_WORDS.iter().any(|w| name.eq_ignore_ascii_case(w)) {
        return Err(Error::InvalidFormat(format!(
            "{kind} name '{name}' is a reserved word"
        )));
    }
    Ok(())
}

/// String property payloads are capped at 1 MiB.
pub fn validate_property_value(value: &Value) -> Result<()> {
    match value {
        Value::Str(s) if s.len() > MAX_STRING_PROPERTY_BYTES => Err(Error::TooBig(format!(
            "string property of {} bytes exceeds the 1 MiB limit",
            s.len()
        ))),
        Value::List(items) => {
            for item in items {
                validate_property_value(item)?;
            }
            Ok(())
        }
        Value::Map(pairs) => {
            for (_, v) in pairs {
                validate_property_value(v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

pub fn validate_labels(labels: &[String]) -> Result<()> {
    if labels.len() > MAX_LABELS_PER_NODE {
        return Err(Error::Range(format!(
            "{} labels exceed the limit of {MAX_LABELS_PER_NODE} per node",
            labels.len()
        )));
    }
    for (i, label) in labels.iter().enumerate() {
        validate_identifier("label", label)?;
        if labels[..i].contains(label) {
            return Err(Error::Constraint(format!("duplicate label '{label}'")));
        }
    }
    Ok(())
}

pub fn validate_properties(pairs: &[(String, Value)]) -> Result<()> {
    if pairs.len() > MAX_PROPERTIES_PER_ENTITY {
        return Err(Error::Range(format!(
            "{} properties exceed the limit of {MAX_PROPERTIES_PER_ENTITY} per entity",
            pairs.len()
        )));
    }
    for (name, value) in pairs {
        validate_identifier("property", name)?;
        validate_property_value(value)?;
    }
    Ok(())
}

// ============================================================================
// Undo records
// ============================================================================

/// One reversible mutation. Records append in application order and replay
/// in LIFO order on rollback.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoRecord {
    CreateNode {
        id: i64,
    },
    CreateRel {
        id: i64,
    },
    /// A merge that created binds like CreateNode; a merge that matched has
    /// nothing of its own to reverse (ON MATCH writes log separately).
    MergeNode {
        id: i64,
        created: bool,
    },
    SetProperty {
        node_id: i64,
        edge_id: i64,
        property: String,
        /// Null means the property did not exist before.
        prior: Value,
    },
    SetLabel {
        node_id: i64,
        prior_labels: String,
    },
    RemoveProperty {
        node_id: i64,
        edge_id: i64,
        property: String,
        prior: Value,
    },
    RemoveLabel {
        node_id: i64,
        prior_labels: String,
    },
    DeleteNode {
        id: i64,
        labels: String,
        properties: String,
    },
    DeleteRel {
        id: i64,
        from: i64,
        to: i64,
        edge_type: String,
        weight: f64,
        properties: String,
    },
    DetachDeleteNode {
        id: i64,
        labels: String,
        properties: String,
    },
}

impl UndoRecord {
    /// Apply the inverse of this record against the adapter.
    pub fn reverse(&self, adapter: &dyn StorageAdapter) -> Result<()> {
        match self {
            UndoRecord::CreateNode { id } => adapter.delete_node(*id, false),
            UndoRecord::CreateRel { id } => adapter.delete_edge(*id),
            UndoRecord::MergeNode { id, created } => {
                if *created {
                    adapter.delete_node(*id, false)
                } else {
                    Ok(())
                }
            }
            UndoRecord::SetProperty { node_id, edge_id, property, prior }
            | UndoRecord::RemoveProperty { node_id, edge_id, property, prior } => {
                if prior.is_null() {
                    adapter.remove_property(*node_id, *edge_id, property)
                } else {
                    adapter.update_property(*node_id, *edge_id, property, prior)
                }
            }
            UndoRecord::SetLabel { node_id, prior_labels }
            | UndoRecord::RemoveLabel { node_id, prior_labels } => {
                adapter.set_labels(*node_id, prior_labels)
            }
            UndoRecord::DeleteNode { id, labels, properties }
            | UndoRecord::DetachDeleteNode { id, labels, properties } => {
                adapter.add_node(*id, labels, properties).map(|_| ())
            }
            UndoRecord::DeleteRel { id, from, to, edge_type, weight, properties } => adapter
                .add_edge(*id, *from, *to, edge_type, *weight, properties)
                .map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_rule() {
        assert!(validate_identifier("label", "Person").is_ok());
        assert!(validate_identifier("label", "_x9").is_ok());
        assert!(validate_identifier("label", "9x").is_err());
        assert!(validate_identifier("label", "a-b").is_err());
        assert!(validate_identifier("label", "").is_err());
    }

    #[test]
    fn test_reserved_words_rejected_case_insensitively() {
        assert_eq!(
            validate_identifier("variable", "match").unwrap_err().code(),
            "INVALID_FORMAT"
        );
        assert_eq!(
            validate_identifier("variable", "RETURN").unwrap_err().code(),
            "INVALID_FORMAT"
        );
    }

    #[test]
    fn test_name_length_limit() {
        let long = "a".repeat(MAX_NAME_LEN + 1);
        assert_eq!(
            validate_identifier("property", &long).unwrap_err().code(),
            "RANGE"
        );
    }

    #[test]
    fn test_string_value_size_limit() {
        let big = Value::Str("x".repeat(MAX_STRING_PROPERTY_BYTES + 1));
        assert_eq!(validate_property_value(&big).unwrap_err().code(), "TOO_BIG");
        // Nested values are checked too.
        let nested = Value::List(vec![big]);
        assert_eq!(validate_property_value(&nested).unwrap_err().code(), "TOO_BIG");
    }

    #[test]
    fn test_duplicate_label_is_constraint() {
        let labels = vec!["A".to_string(), "A".to_string()];
        assert_eq!(validate_labels(&labels).unwrap_err().code(), "CONSTRAINT");
    }
}
