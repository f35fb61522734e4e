//! # Property Graph Model
//!
//! Clean DTOs shared by every layer: storage ↔ planner ↔ execution ↔ user.
//! This module is pure data — no I/O, no state.

pub mod ids;
pub mod record;
pub mod value;

pub use ids::{EdgeId, NodeId};
pub use record::{EdgeRecord, NodeRecord};
pub use value::Value;
