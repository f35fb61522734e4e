//! Write engine — CREATE / MERGE / SET / REMOVE / DELETE with an undo log.

pub mod ops;
pub mod tx;

pub use ops::{
    validate_identifier, validate_labels, validate_properties, validate_property_value,
    UndoRecord, MAX_LABELS_PER_NODE, MAX_NAME_LEN, MAX_PROPERTIES_PER_ENTITY,
    MAX_STRING_PROPERTY_BYTES, RESERVED_WORDS,
};
pub use tx::{MergeOutcome, WriteTransaction};
