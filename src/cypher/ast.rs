//! Cypher AST (Abstract Syntax Tree)
//!
//! These types represent parsed Cypher queries. They are pure data —
//! no behavior, no storage references, no execution logic. Every node is
//! owned by its parent; there is no sharing.
//!
//! `Display` renders a query that re-parses to an equal AST.

use std::fmt;

// ============================================================================
// Statements and clauses
// ============================================================================

/// A complete statement: one query, possibly UNION-ed with more.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub first: SingleQuery,
    /// Subsequent branches with their UNION ALL flag.
    pub unions: Vec<(bool, SingleQuery)>,
}

/// One query branch: reading clauses, updating clauses, optional RETURN.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleQuery {
    pub reading: Vec<ReadingClause>,
    pub updating: Vec<UpdatingClause>,
    pub return_clause: Option<ReturnClause>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadingClause {
    Match(MatchClause),
    With(WithClause),
    Unwind(UnwindClause),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchClause {
    pub optional: bool,
    pub patterns: Vec<Pattern>,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithClause {
    pub distinct: bool,
    pub items: Vec<ProjectionItem>,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnwindClause {
    pub expr: Expr,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdatingClause {
    Create(Vec<Pattern>),
    Merge(MergeClause),
    Set(Vec<SetItem>),
    Remove(Vec<RemoveItem>),
    Delete { detach: bool, exprs: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeClause {
    pub pattern: Pattern,
    pub on_create: Vec<SetItem>,
    pub on_match: Vec<SetItem>,
}

/// Single item in SET.
#[derive(Debug, Clone, PartialEq)]
pub enum SetItem {
    /// SET n.prop = expr
    Property { variable: String, key: String, value: Expr },
    /// SET n = {map}
    AllProperties { variable: String, value: Expr },
    /// SET n += {map}
    MergeProperties { variable: String, value: Expr },
    /// SET n:Label
    Label { variable: String, label: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveItem {
    Property { variable: String, key: String },
    Label { variable: String, label: String },
}

/// RETURN clause with its trailing modifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnClause {
    pub distinct: bool,
    pub items: Vec<ProjectionItem>,
    pub order_by: Vec<SortItem>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortItem {
    pub expr: Expr,
    pub ascending: bool,
}

// ============================================================================
// Patterns
// ============================================================================

/// A pattern: `(a:Person)-[:KNOWS]->(b)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// Alternating node, rel, node, rel, node, …
    pub elements: Vec<PatternElement>,
}

impl Pattern {
    /// Aliases bound by this pattern, in appearance order.
    pub fn aliases(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for el in &self.elements {
            let alias = match el {
                PatternElement::Node(n) => n.alias.as_deref(),
                PatternElement::Rel(r) => r.alias.as_deref(),
            };
            if let Some(a) = alias {
                if !out.contains(&a) {
                    out.push(a);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternElement {
    Node(NodePattern),
    Rel(RelPattern),
}

/// `(alias:Label1|Label2 {prop: value})`
#[derive(Debug, Clone, PartialEq)]
pub struct NodePattern {
    pub alias: Option<String>,
    pub labels: Vec<String>,
    pub properties: Vec<(String, Expr)>,
}

/// `-[alias:TYPE1|TYPE2 *min..max {props}]->`
#[derive(Debug, Clone, PartialEq)]
pub struct RelPattern {
    pub alias: Option<String>,
    pub types: Vec<String>,
    pub direction: RelDirection,
    pub var_length: Option<VarLength>,
    pub properties: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelDirection {
    /// `-[..]->`
    Outgoing,
    /// `<-[..]-`
    Incoming,
    /// `-[..]-` or `<-[..]->`
    Undirected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarLength {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// Variable reference: `n`
    Variable(String),
    /// Parameter: `$name`
    Parameter(String),
    /// Property access: `n.name`
    Property { expr: Box<Expr>, key: String },
    /// Function call: `toUpper(n.name)`, `count(n)`
    FunctionCall { name: String, args: Vec<Expr>, distinct: bool },
    /// Binary operation: `a + b`, `a = b`, `a AND b`
    Binary { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
    /// Unary operation: `NOT a`, `-a`
    Unary { op: UnaryOp, expr: Box<Expr> },
    /// STARTS WITH / ENDS WITH / CONTAINS
    StringOp { left: Box<Expr>, op: StringOp, right: Box<Expr> },
    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },
    /// `x IN [..]`
    In { expr: Box<Expr>, list: Box<Expr> },
    /// Label check: `n:Person`
    HasLabel { expr: Box<Expr>, label: String },
    /// `[1, 2, 3]`
    List(Vec<Expr>),
    /// `{name: 'Ada'}` — ordered pairs
    Map(Vec<(String, Expr)>),
    /// CASE expression, simple or searched
    Case {
        operand: Option<Box<Expr>>,
        whens: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    /// `*` in `RETURN *`
    Star,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add, Sub, Mul, Div, Mod, Pow,
    // Comparison
    Eq, Neq, Lt, Lte, Gt, Gte,
    // Logical
    And, Or, Xor,
    // Regex
    RegexMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    StartsWith,
    EndsWith,
    Contains,
}

// ============================================================================
// Rendering — output re-parses to an equal AST
// ============================================================================

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first)?;
        for (all, branch) in &self.unions {
            if *all {
                write!(f, " UNION ALL {branch}")?;
            } else {
                write!(f, " UNION {branch}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for SingleQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut sep = |f: &mut fmt::Formatter<'_>| -> fmt::Result {
            if first {
                first = false;
                Ok(())
            } else {
                write!(f, " ")
            }
        };
        for clause in &self.reading {
            sep(f)?;
            write!(f, "{clause}")?;
        }
        for clause in &self.updating {
            sep(f)?;
            write!(f, "{clause}")?;
        }
        if let Some(ret) = &self.return_clause {
            sep(f)?;
            write!(f, "{ret}")?;
        }
        Ok(())
    }
}

impl fmt::Display for ReadingClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingClause::Match(m) => write!(f, "{m}"),
            ReadingClause::With(w) => write!(f, "{w}"),
            ReadingClause::Unwind(u) => write!(f, "UNWIND {} AS {}", u.expr, u.alias),
        }
    }
}

impl fmt::Display for MatchClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.optional {
            write!(f, "OPTIONAL ")?;
        }
        write!(f, "MATCH ")?;
        join(f, &self.patterns, ", ")?;
        if let Some(w) = &self.where_clause {
            write!(f, " WHERE {w}")?;
        }
        Ok(())
    }
}

impl fmt::Display for WithClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WITH ")?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        join(f, &self.items, ", ")?;
        if let Some(w) = &self.where_clause {
            write!(f, " WHERE {w}")?;
        }
        Ok(())
    }
}

impl fmt::Display for UpdatingClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatingClause::Create(patterns) => {
                write!(f, "CREATE ")?;
                join(f, patterns, ", ")
            }
            UpdatingClause::Merge(m) => {
                write!(f, "MERGE {}", m.pattern)?;
                if !m.on_create.is_empty() {
                    write!(f, " ON CREATE SET ")?;
                    join(f, &m.on_create, ", ")?;
                }
                if !m.on_match.is_empty() {
                    write!(f, " ON MATCH SET ")?;
                    join(f, &m.on_match, ", ")?;
                }
                Ok(())
            }
            UpdatingClause::Set(items) => {
                write!(f, "SET ")?;
                join(f, items, ", ")
            }
            UpdatingClause::Remove(items) => {
                write!(f, "REMOVE ")?;
                join(f, items, ", ")
            }
            UpdatingClause::Delete { detach, exprs } => {
                if *detach {
                    write!(f, "DETACH ")?;
                }
                write!(f, "DELETE ")?;
                join(f, exprs, ", ")
            }
        }
    }
}

impl fmt::Display for SetItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetItem::Property { variable, key, value } => {
                write!(f, "{variable}.{key} = {value}")
            }
            SetItem::AllProperties { variable, value } => write!(f, "{variable} = {value}"),
            SetItem::MergeProperties { variable, value } => write!(f, "{variable} += {value}"),
            SetItem::Label { variable, label } => write!(f, "{variable}:{label}"),
        }
    }
}

impl fmt::Display for RemoveItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoveItem::Property { variable, key } => write!(f, "{variable}.{key}"),
            RemoveItem::Label { variable, label } => write!(f, "{variable}:{label}"),
        }
    }
}

impl fmt::Display for ReturnClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RETURN ")?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        join(f, &self.items, ", ")?;
        if !self.order_by.is_empty() {
            write!(f, " ORDER BY ")?;
            join(f, &self.order_by, ", ")?;
        }
        if let Some(skip) = &self.skip {
            write!(f, " SKIP {skip}")?;
        }
        if let Some(limit) = &self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}

impl fmt::Display for ProjectionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {alias}")?;
        }
        Ok(())
    }
}

impl fmt::Display for SortItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if !self.ascending {
            write!(f, " DESC")?;
        }
        Ok(())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for el in &self.elements {
            write!(f, "{el}")?;
        }
        Ok(())
    }
}

impl fmt::Display for PatternElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternElement::Node(n) => write!(f, "{n}"),
            PatternElement::Rel(r) => write!(f, "{r}"),
        }
    }
}

impl fmt::Display for NodePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        if let Some(alias) = &self.alias {
            write!(f, "{alias}")?;
        }
        if !self.labels.is_empty() {
            write!(f, ":")?;
            join(f, &self.labels, "|")?;
        }
        write_property_map(f, &self.properties)?;
        write!(f, ")")
    }
}

impl fmt::Display for RelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.direction == RelDirection::Incoming {
            write!(f, "<-")?;
        } else {
            write!(f, "-")?;
        }
        write!(f, "[")?;
        if let Some(alias) = &self.alias {
            write!(f, "{alias}")?;
        }
        if !self.types.is_empty() {
            write!(f, ":")?;
            join(f, &self.types, "|")?;
        }
        if let Some(vl) = &self.var_length {
            write!(f, "*")?;
            if let Some(min) = vl.min {
                write!(f, "{min}")?;
            }
            match (vl.min, vl.max) {
                // `*n` alone means exactly n; only render `..` for true ranges.
                (min, Some(max)) if min != Some(max) => write!(f, "..{max}")?,
                (Some(_), None) => write!(f, "..")?,
                _ => {}
            }
        }
        write_property_map(f, &self.properties)?;
        write!(f, "]")?;
        if self.direction == RelDirection::Outgoing {
            write!(f, "->")?;
        } else {
            write!(f, "-")?;
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{lit}"),
            Expr::Variable(name) => write!(f, "{name}"),
            Expr::Parameter(name) => write!(f, "${name}"),
            Expr::Property { expr, key } => write!(f, "{expr}.{key}"),
            Expr::FunctionCall { name, args, distinct } => {
                write!(f, "{name}(")?;
                if *distinct {
                    write!(f, "DISTINCT ")?;
                }
                join(f, args, ", ")?;
                write!(f, ")")
            }
            // Binary and unary forms parenthesize; `(e)` parses back to `e`
            // so the round-trip stays shape-identical.
            Expr::Binary { left, op, right } => write!(f, "({left} {op} {right})"),
            Expr::Unary { op, expr } => match op {
                UnaryOp::Not => write!(f, "(NOT {expr})"),
                UnaryOp::Neg => write!(f, "(-{expr})"),
                UnaryOp::Pos => write!(f, "(+{expr})"),
            },
            Expr::StringOp { left, op, right } => {
                let op = match op {
                    StringOp::StartsWith => "STARTS WITH",
                    StringOp::EndsWith => "ENDS WITH",
                    StringOp::Contains => "CONTAINS",
                };
                write!(f, "({left} {op} {right})")
            }
            Expr::IsNull { expr, negated } => {
                if *negated {
                    write!(f, "({expr} IS NOT NULL)")
                } else {
                    write!(f, "({expr} IS NULL)")
                }
            }
            Expr::In { expr, list } => write!(f, "({expr} IN {list})"),
            Expr::HasLabel { expr, label } => write!(f, "({expr}:{label})"),
            Expr::List(items) => {
                write!(f, "[")?;
                join(f, items, ", ")?;
                write!(f, "]")
            }
            Expr::Map(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Expr::Case { operand, whens, else_expr } => {
                write!(f, "CASE")?;
                if let Some(op) = operand {
                    write!(f, " {op}")?;
                }
                for (when, then) in whens {
                    write!(f, " WHEN {when} THEN {then}")?;
                }
                if let Some(e) = else_expr {
                    write!(f, " ELSE {e}")?;
                }
                write!(f, " END")
            }
            Expr::Star => write!(f, "*"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Bool(true) => write!(f, "TRUE"),
            Literal::Bool(false) => write!(f, "FALSE"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Literal::Str(s) => {
                write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
            }
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Xor => "XOR",
            BinaryOp::RegexMatch => "=~",
        };
        write!(f, "{s}")
    }
}

fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_property_map(f: &mut fmt::Formatter<'_>, pairs: &[(String, Expr)]) -> fmt::Result {
    if pairs.is_empty() {
        return Ok(());
    }
    write!(f, " {{")?;
    for (i, (k, v)) in pairs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{k}: {v}")?;
    }
    write!(f, "}}")
}
