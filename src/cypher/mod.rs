//! # Cypher Language
//!
//! Lexer, AST, and recursive-descent parser for the supported Cypher subset.
//! Pure functions — no I/O, no state, no storage dependency.

pub mod ast;
pub mod lexer;
pub mod parser;

use crate::Result;
use ast::Query;

/// Parse a Cypher query string into an AST.
pub fn parse(query: &str) -> Result<Query> {
    let tokens = lexer::tokenize(query)?;
    parser::parse_query(&tokens)
}
