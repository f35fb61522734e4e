//! # relgraph — Cypher over a relational substrate
//!
//! A graph query engine that stores nodes and edges in two relational
//! tables (JSON label/property payloads) and speaks a subset of Cypher.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `StorageAdapter` is the contract between query engine and substrate
//! 2. **Clean DTOs**: `NodeRecord`, `EdgeRecord`, `Value` cross all boundaries
//! 3. **Parser owns nothing**: Cypher → AST is a pure function
//! 4. **Substrate-agnostic planner**: logical plans don't know about storage
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relgraph::GraphEngine;
//!
//! # fn example() -> relgraph::Result<()> {
//! let engine = GraphEngine::open_memory();
//!
//! engine.execute("CREATE (n:Person {name: 'Ada'})")?;
//! let result = engine.execute("MATCH (n:Person) RETURN n")?;
//!
//! for row in &result.rows {
//!     println!("{}", row.to_json(false));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline
//!
//! | Phase | Module | Output |
//! |-------|--------|--------|
//! | Lex/Parse | `cypher` | typed AST |
//! | Plan | `plan` | logical → physical operator tree |
//! | Execute | `exec` | streaming iterator pipeline |
//! | Mutate | `write` | undo-logged transaction |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod cypher;
pub mod plan;
pub mod exec;
pub mod storage;
pub mod write;
pub mod surface;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{Value, NodeId, EdgeId, NodeRecord, EdgeRecord};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{StorageAdapter, MemoryAdapter, NodeRow, EdgeRow};

// ============================================================================
// Re-exports: Planning and execution
// ============================================================================

pub use plan::PlannerConfig;
pub use exec::{QueryResult, ResultRow, ExecutionStats};
pub use write::{WriteTransaction, MergeOutcome};

use std::sync::Arc;

// ============================================================================
// Top-level engine handle
// ============================================================================

/// The primary entry point. A `GraphEngine` wraps a storage adapter and
/// provides Cypher execution.
pub struct GraphEngine<A: StorageAdapter> {
    adapter: Arc<A>,
    config: PlannerConfig,
}

impl<A: StorageAdapter> GraphEngine<A> {
    /// Create an engine over the given adapter with default planner config.
    pub fn with_adapter(adapter: A) -> Self {
        Self {
            adapter: Arc::new(adapter),
            config: PlannerConfig::default(),
        }
    }

    /// Create an engine with an explicit planner configuration.
    pub fn with_config(adapter: A, config: PlannerConfig) -> Self {
        Self {
            adapter: Arc::new(adapter),
            config,
        }
    }

    /// Execute a Cypher statement — reads and writes both route through here.
    pub fn execute(&self, query: &str) -> Result<QueryResult> {
        let ast = cypher::parse(query)?;
        exec::execute_statement(self.adapter.clone(), &self.config, &ast)
    }

    /// Render the physical plan for a query as text.
    pub fn plan_text(&self, query: &str) -> Result<String> {
        surface::plan_with(&self.config, query)
    }

    /// Render the logical plan for a query as text.
    pub fn logical_plan_text(&self, query: &str) -> Result<String> {
        surface::logical_plan_with(&self.config, query)
    }

    /// Render both plans plus a cost summary.
    pub fn explain_text(&self, query: &str) -> Result<String> {
        surface::explain_with(&self.config, query)
    }

    /// Access the underlying adapter (for advanced use).
    pub fn adapter(&self) -> &A {
        &self.adapter
    }
}

/// In-memory engine for testing and embedding.
impl GraphEngine<MemoryAdapter> {
    pub fn open_memory() -> Self {
        Self::with_adapter(MemoryAdapter::new())
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// The crate-wide error taxonomy. Each kind maps to a stable short code
/// via [`Error::code`]; hosts prepend their own context.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Null handle or contradictory arguments.
    #[error("misuse: {0}")]
    Misuse(String),

    /// Lexer or parser rejected the input.
    #[error("syntax error at {line}:{column}: {message}")]
    Parse { line: u32, column: u32, message: String },

    /// Identifier fails the grammar or collides with a reserved word.
    #[error("invalid identifier: {0}")]
    InvalidFormat(String),

    /// Quantity bound violation (too many labels, too many properties).
    #[error("out of range: {0}")]
    Range(String),

    /// A single value exceeds the property-value size limit.
    #[error("value too large: {0}")]
    TooBig(String),

    /// Structural rule violated.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Cross-type comparison or arithmetic.
    #[error("type mismatch: {0}")]
    Mismatch(String),

    /// Planner could not handle an AST or plan shape.
    #[error("planner error: {0}")]
    Planner(String),

    /// Runtime failure inside the iterator pipeline or evaluator.
    #[error("execution error: {0}")]
    Execution(String),

    /// Allocation failure; always safe to propagate.
    #[error("out of memory")]
    OutOfMemory,

    /// The adapter refused or failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Stable short string for each error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Misuse(_) => "MISUSE",
            Error::Parse { .. } => "PARSE",
            Error::InvalidFormat(_) => "INVALID_FORMAT",
            Error::Range(_) => "RANGE",
            Error::TooBig(_) => "TOO_BIG",
            Error::Constraint(_) => "CONSTRAINT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Mismatch(_) => "MISMATCH",
            Error::Planner(_) => "PLANNER",
            Error::Execution(_) => "EXECUTION",
            Error::OutOfMemory => "OOM",
            Error::Storage(_) => "STORAGE",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
