//! Query planning — logical plan, optimization, physical lowering.
//!
//! The pipeline is `compile` (AST → logical) → `optimize` (join order +
//! index selection) → `lower` (logical → physical).

pub mod logical;
pub mod physical;
pub mod planner;

pub use logical::{LogicalNode, LogicalOp, PlanProjection, PlanSortKey};
pub use physical::{lower, PhysicalNode, PhysicalOp};
pub use planner::{compile, contains_aggregate, optimize};

use crate::cypher::ast::SingleQuery;
use crate::Result;

/// Planner configuration.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Whether lowering may pick index-backed strategies.
    pub enable_indexes: bool,
    /// Multiplier applied to the logical base cost of index-driven scans.
    pub index_cost_factor: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            enable_indexes: true,
            index_cost_factor: 0.1,
        }
    }
}

/// Run the full planning pipeline for one query branch.
pub fn plan_branch(query: &SingleQuery, config: &PlannerConfig) -> Result<PhysicalNode> {
    let logical = compile(query)?;
    let optimized = optimize(logical);
    lower(&optimized, config)
}
