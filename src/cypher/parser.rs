//! Cypher recursive descent parser.
//!
//! Parses token streams into AST nodes with one token of lookahead.
//! Supports:
//! - MATCH / OPTIONAL MATCH with patterns, WHERE
//! - RETURN [DISTINCT], ORDER BY, SKIP, LIMIT
//! - CREATE, MERGE (ON CREATE / ON MATCH), SET, REMOVE, DELETE / DETACH DELETE
//! - WITH, UNWIND, UNION [ALL]
//! - Full expression parsing with precedence
//!
//! The parser never partially succeeds: any failure returns `Err` and no
//! AST escapes.

use super::ast::*;
use super::lexer::{Token, TokenKind};
use crate::{Error, Result};

/// Parser state — wraps a token slice with a cursor.
struct Parser<'t, 'a> {
    tokens: &'t [Token<'a>],
    pos: usize,
}

impl<'t, 'a> Parser<'t, 'a> {
    fn new(tokens: &'t [Token<'a>]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token<'a> {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn advance(&mut self) -> &Token<'a> {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token<'a>> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            let tok = self.peek();
            Err(self.error(format!(
                "Expected {:?}, got {:?} '{}'",
                kind, tok.kind, tok.text
            )))
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        Ok(self.expect(TokenKind::Identifier)?.text.to_string())
    }

    fn error(&self, message: String) -> Error {
        let tok = self.peek();
        Error::Parse {
            line: tok.line,
            column: tok.column,
            message,
        }
    }
}

/// Parse a complete query (with UNION branches) from tokens.
pub fn parse_query(tokens: &[Token<'_>]) -> Result<Query> {
    let mut p = Parser::new(tokens);

    let first = parse_single_query(&mut p)?;
    let mut unions = Vec::new();
    while p.eat(TokenKind::Union) {
        let all = p.eat(TokenKind::All);
        unions.push((all, parse_single_query(&mut p)?));
    }

    if !p.at(TokenKind::Eof) {
        return Err(p.error(format!(
            "Unexpected token after statement: {:?} '{}'",
            p.peek_kind(),
            p.peek().text
        )));
    }

    Ok(Query { first, unions })
}

// ============================================================================
// Clause parsing
// ============================================================================

fn parse_single_query(p: &mut Parser) -> Result<SingleQuery> {
    let mut reading = Vec::new();
    let mut updating = Vec::new();

    loop {
        match p.peek_kind() {
            TokenKind::Match | TokenKind::Optional => {
                reading.push(ReadingClause::Match(parse_match_clause(p)?));
            }
            TokenKind::With => {
                p.advance();
                reading.push(ReadingClause::With(parse_with_clause(p)?));
            }
            TokenKind::Unwind => {
                p.advance();
                let expr = parse_expr(p)?;
                p.expect(TokenKind::As)?;
                let alias = p.expect_identifier()?;
                reading.push(ReadingClause::Unwind(UnwindClause { expr, alias }));
            }
            _ => break,
        }
    }

    loop {
        match p.peek_kind() {
            TokenKind::Create => {
                p.advance();
                updating.push(UpdatingClause::Create(parse_pattern_list(p)?));
            }
            TokenKind::Merge => {
                p.advance();
                updating.push(UpdatingClause::Merge(parse_merge_clause(p)?));
            }
            TokenKind::Set => {
                p.advance();
                updating.push(UpdatingClause::Set(parse_set_items(p)?));
            }
            TokenKind::Remove => {
                p.advance();
                updating.push(UpdatingClause::Remove(parse_remove_items(p)?));
            }
            TokenKind::Detach | TokenKind::Delete => {
                let detach = p.eat(TokenKind::Detach);
                p.expect(TokenKind::Delete)?;
                let mut exprs = vec![parse_expr(p)?];
                while p.eat(TokenKind::Comma) {
                    exprs.push(parse_expr(p)?);
                }
                updating.push(UpdatingClause::Delete { detach, exprs });
            }
            _ => break,
        }
    }

    let return_clause = if p.eat(TokenKind::Return) {
        Some(parse_return_clause(p)?)
    } else {
        None
    };

    if reading.is_empty() && updating.is_empty() && return_clause.is_none() {
        return Err(p.error(format!(
            "Expected a clause, got {:?} '{}'",
            p.peek_kind(),
            p.peek().text
        )));
    }

    Ok(SingleQuery {
        reading,
        updating,
        return_clause,
    })
}

fn parse_match_clause(p: &mut Parser) -> Result<MatchClause> {
    let optional = p.eat(TokenKind::Optional);
    p.expect(TokenKind::Match)?;
    let patterns = parse_pattern_list(p)?;
    let where_clause = if p.eat(TokenKind::Where) {
        Some(parse_expr(p)?)
    } else {
        None
    };
    Ok(MatchClause {
        optional,
        patterns,
        where_clause,
    })
}

fn parse_with_clause(p: &mut Parser) -> Result<WithClause> {
    let distinct = p.eat(TokenKind::Distinct);
    let mut items = vec![parse_projection_item(p)?];
    while p.eat(TokenKind::Comma) {
        items.push(parse_projection_item(p)?);
    }
    let where_clause = if p.eat(TokenKind::Where) {
        Some(parse_expr(p)?)
    } else {
        None
    };
    Ok(WithClause {
        distinct,
        items,
        where_clause,
    })
}

fn parse_merge_clause(p: &mut Parser) -> Result<MergeClause> {
    let pattern = parse_pattern(p)?;

    let mut on_create = Vec::new();
    let mut on_match = Vec::new();
    while p.at(TokenKind::On) {
        p.advance();
        if p.eat(TokenKind::Create) {
            p.expect(TokenKind::Set)?;
            on_create.extend(parse_set_items(p)?);
        } else if p.eat(TokenKind::Match) {
            p.expect(TokenKind::Set)?;
            on_match.extend(parse_set_items(p)?);
        } else {
            return Err(p.error(format!(
                "Expected CREATE or MATCH after ON, got '{}'",
                p.peek().text
            )));
        }
    }

    Ok(MergeClause {
        pattern,
        on_create,
        on_match,
    })
}

fn parse_return_clause(p: &mut Parser) -> Result<ReturnClause> {
    let distinct = p.eat(TokenKind::Distinct);

    let mut items = vec![parse_projection_item(p)?];
    while p.eat(TokenKind::Comma) {
        items.push(parse_projection_item(p)?);
    }

    let mut order_by = Vec::new();
    if p.eat(TokenKind::Order) {
        p.expect(TokenKind::By)?;
        order_by.push(parse_sort_item(p)?);
        while p.eat(TokenKind::Comma) {
            order_by.push(parse_sort_item(p)?);
        }
    }

    let skip = if p.eat(TokenKind::Skip) {
        Some(parse_expr(p)?)
    } else {
        None
    };

    let limit = if p.eat(TokenKind::Limit) {
        Some(parse_expr(p)?)
    } else {
        None
    };

    Ok(ReturnClause {
        distinct,
        items,
        order_by,
        skip,
        limit,
    })
}

fn parse_projection_item(p: &mut Parser) -> Result<ProjectionItem> {
    if p.eat(TokenKind::Star) {
        return Ok(ProjectionItem {
            expr: Expr::Star,
            alias: None,
        });
    }
    let expr = parse_expr(p)?;
    let alias = if p.eat(TokenKind::As) {
        Some(p.expect_identifier()?)
    } else {
        None
    };
    Ok(ProjectionItem { expr, alias })
}

fn parse_sort_item(p: &mut Parser) -> Result<SortItem> {
    let expr = parse_expr(p)?;
    let ascending = if p.eat(TokenKind::Desc) {
        false
    } else {
        p.eat(TokenKind::Asc);
        true
    };
    Ok(SortItem { expr, ascending })
}

fn parse_set_items(p: &mut Parser) -> Result<Vec<SetItem>> {
    let mut items = vec![parse_set_item(p)?];
    while p.eat(TokenKind::Comma) {
        items.push(parse_set_item(p)?);
    }
    Ok(items)
}

fn parse_set_item(p: &mut Parser) -> Result<SetItem> {
    let variable = p.expect_identifier()?;

    if p.eat(TokenKind::Dot) {
        let key = p.expect_identifier()?;
        p.expect(TokenKind::Eq)?;
        let value = parse_expr(p)?;
        Ok(SetItem::Property { variable, key, value })
    } else if p.eat(TokenKind::Colon) {
        let label = p.expect_identifier()?;
        Ok(SetItem::Label { variable, label })
    } else if p.at(TokenKind::Plus) {
        // `+=` lexes as Plus Eq
        p.advance();
        p.expect(TokenKind::Eq)?;
        let value = parse_expr(p)?;
        Ok(SetItem::MergeProperties { variable, value })
    } else if p.eat(TokenKind::Eq) {
        let value = parse_expr(p)?;
        Ok(SetItem::AllProperties { variable, value })
    } else {
        Err(p.error("Expected '.', ':', '=' or '+=' after SET variable".into()))
    }
}

fn parse_remove_items(p: &mut Parser) -> Result<Vec<RemoveItem>> {
    let mut items = vec![parse_remove_item(p)?];
    while p.eat(TokenKind::Comma) {
        items.push(parse_remove_item(p)?);
    }
    Ok(items)
}

fn parse_remove_item(p: &mut Parser) -> Result<RemoveItem> {
    let variable = p.expect_identifier()?;
    if p.eat(TokenKind::Dot) {
        let key = p.expect_identifier()?;
        Ok(RemoveItem::Property { variable, key })
    } else if p.eat(TokenKind::Colon) {
        let label = p.expect_identifier()?;
        Ok(RemoveItem::Label { variable, label })
    } else {
        Err(p.error("Expected '.' or ':' after REMOVE variable".into()))
    }
}

// ============================================================================
// Pattern parsing
// ============================================================================

fn parse_pattern_list(p: &mut Parser) -> Result<Vec<Pattern>> {
    let mut patterns = vec![parse_pattern(p)?];
    while p.eat(TokenKind::Comma) {
        patterns.push(parse_pattern(p)?);
    }
    Ok(patterns)
}

fn parse_pattern(p: &mut Parser) -> Result<Pattern> {
    let mut elements = vec![PatternElement::Node(parse_node_pattern(p)?)];

    while matches!(
        p.peek_kind(),
        TokenKind::Dash | TokenKind::LeftArrow | TokenKind::BothArrow
    ) {
        elements.push(PatternElement::Rel(parse_rel_pattern(p)?));
        elements.push(PatternElement::Node(parse_node_pattern(p)?));
    }

    Ok(Pattern { elements })
}

fn parse_node_pattern(p: &mut Parser) -> Result<NodePattern> {
    p.expect(TokenKind::LParen)?;

    let alias = if p.at(TokenKind::Identifier) {
        Some(p.advance().text.to_string())
    } else {
        None
    };

    let mut labels = Vec::new();
    if p.eat(TokenKind::Colon) {
        labels.push(p.expect_identifier()?);
        while p.eat(TokenKind::Pipe) {
            labels.push(p.expect_identifier()?);
        }
    }

    let properties = if p.at(TokenKind::LBrace) {
        parse_property_map(p)?
    } else {
        Vec::new()
    };

    p.expect(TokenKind::RParen)?;

    Ok(NodePattern {
        alias,
        labels,
        properties,
    })
}

fn parse_rel_pattern(p: &mut Parser) -> Result<RelPattern> {
    // `<->` with no detail block
    if p.eat(TokenKind::BothArrow) {
        return Ok(RelPattern {
            alias: None,
            types: Vec::new(),
            direction: RelDirection::Undirected,
            var_length: None,
            properties: Vec::new(),
        });
    }

    let left_arrow = p.eat(TokenKind::LeftArrow);
    if !left_arrow {
        p.expect(TokenKind::Dash)?;
    }

    let mut alias = None;
    let mut types = Vec::new();
    let mut var_length = None;
    let mut properties = Vec::new();

    if p.eat(TokenKind::LBracket) {
        if p.at(TokenKind::Identifier) {
            alias = Some(p.advance().text.to_string());
        }

        if p.eat(TokenKind::Colon) {
            types.push(p.expect_identifier()?);
            while p.eat(TokenKind::Pipe) {
                types.push(p.expect_identifier()?);
            }
        }

        if p.eat(TokenKind::Star) {
            var_length = Some(parse_var_length(p)?);
        }

        if p.at(TokenKind::LBrace) {
            properties = parse_property_map(p)?;
        }

        p.expect(TokenKind::RBracket)?;
    }

    let direction = if left_arrow {
        // <-[..]- is incoming; <-[..]-> degrades to undirected
        if p.eat(TokenKind::Arrow) {
            RelDirection::Undirected
        } else {
            p.expect(TokenKind::Dash)?;
            RelDirection::Incoming
        }
    } else if p.eat(TokenKind::Arrow) {
        RelDirection::Outgoing
    } else {
        p.expect(TokenKind::Dash)?;
        RelDirection::Undirected
    };

    Ok(RelPattern {
        alias,
        types,
        direction,
        var_length,
        properties,
    })
}

fn parse_var_length(p: &mut Parser) -> Result<VarLength> {
    let min = if p.at(TokenKind::Integer) {
        Some(parse_u32(p)?)
    } else {
        None
    };

    if p.eat(TokenKind::DotDot) {
        let max = if p.at(TokenKind::Integer) {
            Some(parse_u32(p)?)
        } else {
            None
        };
        Ok(VarLength { min, max })
    } else {
        // `*n` means exactly n; bare `*` is unbounded
        Ok(VarLength { min, max: min })
    }
}

fn parse_u32(p: &mut Parser) -> Result<u32> {
    let tok = p.expect(TokenKind::Integer)?;
    tok.text
        .parse::<u32>()
        .map_err(|_| Error::Parse {
            line: tok.line,
            column: tok.column,
            message: format!("Invalid integer '{}'", tok.text),
        })
}

fn parse_property_map(p: &mut Parser) -> Result<Vec<(String, Expr)>> {
    p.expect(TokenKind::LBrace)?;
    let mut pairs = Vec::new();
    if !p.at(TokenKind::RBrace) {
        loop {
            let key = p.expect_identifier()?;
            p.expect(TokenKind::Colon)?;
            let value = parse_expr(p)?;
            pairs.push((key, value));
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::RBrace)?;
    Ok(pairs)
}

// ============================================================================
// Expression parsing (precedence climbing)
// ============================================================================

fn parse_expr(p: &mut Parser) -> Result<Expr> {
    parse_or(p)
}

fn parse_or(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_xor(p)?;
    while p.eat(TokenKind::Or) {
        let right = parse_xor(p)?;
        left = Expr::Binary {
            left: Box::new(left),
            op: BinaryOp::Or,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_xor(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_and(p)?;
    while p.eat(TokenKind::Xor) {
        let right = parse_and(p)?;
        left = Expr::Binary {
            left: Box::new(left),
            op: BinaryOp::Xor,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_and(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_not(p)?;
    while p.eat(TokenKind::And) {
        let right = parse_not(p)?;
        left = Expr::Binary {
            left: Box::new(left),
            op: BinaryOp::And,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_not(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Not) {
        let expr = parse_not(p)?;
        Ok(Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(expr),
        })
    } else {
        parse_comparison(p)
    }
}

fn parse_comparison(p: &mut Parser) -> Result<Expr> {
    let left = parse_additive(p)?;

    // IS NULL / IS NOT NULL
    if p.eat(TokenKind::Is) {
        let negated = p.eat(TokenKind::Not);
        p.expect(TokenKind::Null)?;
        return Ok(Expr::IsNull {
            expr: Box::new(left),
            negated,
        });
    }

    // STARTS WITH / ENDS WITH / CONTAINS
    if p.eat(TokenKind::Starts) {
        p.expect(TokenKind::With)?;
        let right = parse_additive(p)?;
        return Ok(Expr::StringOp {
            left: Box::new(left),
            op: StringOp::StartsWith,
            right: Box::new(right),
        });
    }
    if p.eat(TokenKind::Ends) {
        p.expect(TokenKind::With)?;
        let right = parse_additive(p)?;
        return Ok(Expr::StringOp {
            left: Box::new(left),
            op: StringOp::EndsWith,
            right: Box::new(right),
        });
    }
    if p.eat(TokenKind::Contains) {
        let right = parse_additive(p)?;
        return Ok(Expr::StringOp {
            left: Box::new(left),
            op: StringOp::Contains,
            right: Box::new(right),
        });
    }

    // IN
    if p.eat(TokenKind::In) {
        let list = parse_additive(p)?;
        return Ok(Expr::In {
            expr: Box::new(left),
            list: Box::new(list),
        });
    }

    let op = match p.peek_kind() {
        TokenKind::Eq => Some(BinaryOp::Eq),
        TokenKind::Neq => Some(BinaryOp::Neq),
        TokenKind::Lt => Some(BinaryOp::Lt),
        TokenKind::Lte => Some(BinaryOp::Lte),
        TokenKind::Gt => Some(BinaryOp::Gt),
        TokenKind::Gte => Some(BinaryOp::Gte),
        TokenKind::RegexMatch => Some(BinaryOp::RegexMatch),
        _ => None,
    };

    if let Some(op) = op {
        p.advance();
        let right = parse_additive(p)?;
        return Ok(Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        });
    }

    Ok(left)
}

fn parse_additive(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_multiplicative(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Dash => BinaryOp::Sub,
            _ => break,
        };
        p.advance();
        let right = parse_multiplicative(p)?;
        left = Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_multiplicative(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_power(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            _ => break,
        };
        p.advance();
        let right = parse_power(p)?;
        left = Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_power(p: &mut Parser) -> Result<Expr> {
    let left = parse_unary(p)?;
    if p.eat(TokenKind::Caret) {
        // right-associative
        let right = parse_power(p)?;
        Ok(Expr::Binary {
            left: Box::new(left),
            op: BinaryOp::Pow,
            right: Box::new(right),
        })
    } else {
        Ok(left)
    }
}

fn parse_unary(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Dash) {
        let expr = parse_unary(p)?;
        Ok(Expr::Unary {
            op: UnaryOp::Neg,
            expr: Box::new(expr),
        })
    } else if p.eat(TokenKind::Plus) {
        let expr = parse_unary(p)?;
        Ok(Expr::Unary {
            op: UnaryOp::Pos,
            expr: Box::new(expr),
        })
    } else if p.eat(TokenKind::Not) {
        let expr = parse_unary(p)?;
        Ok(Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(expr),
        })
    } else {
        parse_property_access(p)
    }
}

fn parse_property_access(p: &mut Parser) -> Result<Expr> {
    let mut expr = parse_primary(p)?;

    // Property chain: n.name, n.address.city
    while p.eat(TokenKind::Dot) {
        let key = p.expect_identifier()?;
        expr = Expr::Property {
            expr: Box::new(expr),
            key,
        };
    }

    // Label check: `n:Person` (only on a plain variable)
    if p.at(TokenKind::Colon) {
        if let Expr::Variable(_) = &expr {
            p.advance();
            let label = p.expect_identifier()?;
            expr = Expr::HasLabel {
                expr: Box::new(expr),
                label,
            };
        }
    }

    Ok(expr)
}

fn parse_primary(p: &mut Parser) -> Result<Expr> {
    match p.peek_kind() {
        TokenKind::Integer => {
            let tok = p.advance();
            let val = tok.text.parse::<i64>().map_err(|_| Error::Parse {
                line: tok.line,
                column: tok.column,
                message: format!("Invalid integer '{}'", tok.text),
            })?;
            Ok(Expr::Literal(Literal::Int(val)))
        }
        TokenKind::Float => {
            let tok = p.advance();
            let val = tok.text.parse::<f64>().map_err(|_| Error::Parse {
                line: tok.line,
                column: tok.column,
                message: format!("Invalid float '{}'", tok.text),
            })?;
            Ok(Expr::Literal(Literal::Float(val)))
        }
        TokenKind::StringLiteral => {
            let tok = p.advance();
            Ok(Expr::Literal(Literal::Str(unescape_string(tok.text))))
        }
        TokenKind::True => {
            p.advance();
            Ok(Expr::Literal(Literal::Bool(true)))
        }
        TokenKind::False => {
            p.advance();
            Ok(Expr::Literal(Literal::Bool(false)))
        }
        TokenKind::Null => {
            p.advance();
            Ok(Expr::Literal(Literal::Null))
        }

        TokenKind::Dollar => {
            p.advance();
            let name = p.expect_identifier()?;
            Ok(Expr::Parameter(name))
        }

        TokenKind::Star => {
            p.advance();
            Ok(Expr::Star)
        }

        TokenKind::LParen => {
            p.advance();
            let expr = parse_expr(p)?;
            p.expect(TokenKind::RParen)?;
            Ok(expr)
        }

        TokenKind::LBracket => {
            p.advance();
            let mut items = Vec::new();
            if !p.at(TokenKind::RBracket) {
                items.push(parse_expr(p)?);
                while p.eat(TokenKind::Comma) {
                    items.push(parse_expr(p)?);
                }
            }
            p.expect(TokenKind::RBracket)?;
            Ok(Expr::List(items))
        }

        TokenKind::LBrace => {
            let pairs = parse_property_map(p)?;
            Ok(Expr::Map(pairs))
        }

        TokenKind::Case => {
            p.advance();
            let operand = if !p.at(TokenKind::When) {
                Some(Box::new(parse_expr(p)?))
            } else {
                None
            };
            let mut whens = Vec::new();
            while p.eat(TokenKind::When) {
                let when = parse_expr(p)?;
                p.expect(TokenKind::Then)?;
                let then = parse_expr(p)?;
                whens.push((when, then));
            }
            let else_expr = if p.eat(TokenKind::Else) {
                Some(Box::new(parse_expr(p)?))
            } else {
                None
            };
            p.expect(TokenKind::End)?;
            Ok(Expr::Case {
                operand,
                whens,
                else_expr,
            })
        }

        TokenKind::Identifier => {
            let name = p.advance().text.to_string();
            if p.eat(TokenKind::LParen) {
                let mut args = Vec::new();
                let distinct = p.eat(TokenKind::Distinct);
                if p.eat(TokenKind::Star) {
                    // count(*) — no argument
                } else if !p.at(TokenKind::RParen) {
                    args.push(parse_expr(p)?);
                    while p.eat(TokenKind::Comma) {
                        args.push(parse_expr(p)?);
                    }
                }
                p.expect(TokenKind::RParen)?;
                Ok(Expr::FunctionCall {
                    name,
                    args,
                    distinct,
                })
            } else {
                Ok(Expr::Variable(name))
            }
        }

        kind => Err(p.error(format!(
            "Unexpected token in expression: {:?} '{}'",
            kind,
            p.peek().text
        ))),
    }
}

/// Interpret escapes in a raw string-literal body. `\n`, `\t`, `\\` and
/// escaped quotes take their usual meaning; any other escaped byte is kept
/// as itself.
fn unescape_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::parse;

    #[test]
    fn test_simple_match_return() {
        let q = parse("MATCH (n:Person) RETURN n").unwrap();
        assert_eq!(q.first.reading.len(), 1);
        let ReadingClause::Match(m) = &q.first.reading[0] else {
            panic!("expected MATCH");
        };
        assert_eq!(m.patterns.len(), 1);
        assert!(!m.optional);
        assert_eq!(q.first.return_clause.as_ref().unwrap().items.len(), 1);
    }

    #[test]
    fn test_match_with_where() {
        let q = parse("MATCH (n:Person) WHERE n.age > 30 RETURN n.name").unwrap();
        let ReadingClause::Match(m) = &q.first.reading[0] else {
            panic!("expected MATCH");
        };
        assert!(m.where_clause.is_some());
    }

    #[test]
    fn test_create_node_with_properties() {
        let q = parse("CREATE (n:Person {name: 'Ada', age: 3})").unwrap();
        let UpdatingClause::Create(patterns) = &q.first.updating[0] else {
            panic!("expected CREATE");
        };
        let PatternElement::Node(np) = &patterns[0].elements[0] else {
            panic!("expected node pattern");
        };
        assert_eq!(np.labels, vec!["Person"]);
        assert_eq!(np.properties.len(), 2);
        assert_eq!(np.properties[0].0, "name");
    }

    #[test]
    fn test_relationship_pattern() {
        let q = parse("MATCH (a:Person)-[r:KNOWS]->(b:Person) RETURN a, b").unwrap();
        let ReadingClause::Match(m) = &q.first.reading[0] else {
            panic!("expected MATCH");
        };
        assert_eq!(m.patterns[0].elements.len(), 3);
        let PatternElement::Rel(rel) = &m.patterns[0].elements[1] else {
            panic!("expected rel pattern");
        };
        assert_eq!(rel.types, vec!["KNOWS"]);
        assert_eq!(rel.direction, RelDirection::Outgoing);
        assert_eq!(rel.alias.as_deref(), Some("r"));
    }

    #[test]
    fn test_var_length_range() {
        let q = parse("MATCH (a)-[:KNOWS*1..3]->(b) RETURN a").unwrap();
        let ReadingClause::Match(m) = &q.first.reading[0] else {
            panic!("expected MATCH");
        };
        let PatternElement::Rel(rel) = &m.patterns[0].elements[1] else {
            panic!("expected rel pattern");
        };
        assert_eq!(
            rel.var_length,
            Some(VarLength {
                min: Some(1),
                max: Some(3)
            })
        );
    }

    #[test]
    fn test_merge_on_create_on_match() {
        let q = parse(
            "MERGE (n:User {email: 'x'}) ON CREATE SET n.created = 1 ON MATCH SET n.seen = 2",
        )
        .unwrap();
        let UpdatingClause::Merge(m) = &q.first.updating[0] else {
            panic!("expected MERGE");
        };
        assert_eq!(m.on_create.len(), 1);
        assert_eq!(m.on_match.len(), 1);
    }

    #[test]
    fn test_match_set() {
        let q = parse("MATCH (n:Person) WHERE n.name = 'Ada' SET n.age = 4").unwrap();
        assert_eq!(q.first.updating.len(), 1);
        let UpdatingClause::Set(items) = &q.first.updating[0] else {
            panic!("expected SET");
        };
        assert!(matches!(items[0], SetItem::Property { .. }));
    }

    #[test]
    fn test_set_plus_equals() {
        let q = parse("MATCH (n) SET n += {age: 4}").unwrap();
        let UpdatingClause::Set(items) = &q.first.updating[0] else {
            panic!("expected SET");
        };
        assert!(matches!(items[0], SetItem::MergeProperties { .. }));
    }

    #[test]
    fn test_detach_delete() {
        let q = parse("MATCH (n:Person) DETACH DELETE n").unwrap();
        let UpdatingClause::Delete { detach, exprs } = &q.first.updating[0] else {
            panic!("expected DELETE");
        };
        assert!(detach);
        assert_eq!(exprs.len(), 1);
    }

    #[test]
    fn test_remove_items() {
        let q = parse("MATCH (n:Person) REMOVE n.age, n:Employee").unwrap();
        let UpdatingClause::Remove(items) = &q.first.updating[0] else {
            panic!("expected REMOVE");
        };
        assert!(matches!(&items[0], RemoveItem::Property { .. }));
        assert!(matches!(&items[1], RemoveItem::Label { .. }));
    }

    #[test]
    fn test_return_modifiers() {
        let q = parse(
            "MATCH (n) RETURN DISTINCT n.name AS name ORDER BY name DESC SKIP 1 LIMIT 10",
        )
        .unwrap();
        let ret = q.first.return_clause.as_ref().unwrap();
        assert!(ret.distinct);
        assert_eq!(ret.items[0].alias.as_deref(), Some("name"));
        assert!(!ret.order_by[0].ascending);
        assert!(ret.skip.is_some());
        assert!(ret.limit.is_some());
    }

    #[test]
    fn test_union_all() {
        let q = parse("MATCH (a:Car) RETURN a UNION ALL MATCH (b:Person) RETURN b").unwrap();
        assert_eq!(q.unions.len(), 1);
        assert!(q.unions[0].0);
    }

    #[test]
    fn test_with_pipeline() {
        let q = parse("MATCH (n:Person) WITH n.name AS name WHERE name = 'Ada' RETURN name")
            .unwrap();
        assert_eq!(q.first.reading.len(), 2);
        let ReadingClause::With(w) = &q.first.reading[1] else {
            panic!("expected WITH");
        };
        assert!(w.where_clause.is_some());
    }

    #[test]
    fn test_unwind() {
        let q = parse("UNWIND [1, 2, 3] AS x RETURN x").unwrap();
        let ReadingClause::Unwind(u) = &q.first.reading[0] else {
            panic!("expected UNWIND");
        };
        assert_eq!(u.alias, "x");
    }

    #[test]
    fn test_expression_precedence() {
        let q = parse("RETURN 1 + 2 * 3").unwrap();
        let ret = q.first.return_clause.as_ref().unwrap();
        let Expr::Binary { op, right, .. } = &ret.items[0].expr else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.as_ref(),
            Expr::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_power_right_associative() {
        let q = parse("RETURN 2 ^ 3 ^ 2").unwrap();
        let ret = q.first.return_clause.as_ref().unwrap();
        let Expr::Binary { op, right, .. } = &ret.items[0].expr else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Pow);
        assert!(matches!(
            right.as_ref(),
            Expr::Binary {
                op: BinaryOp::Pow,
                ..
            }
        ));
    }

    #[test]
    fn test_is_not_null() {
        let q = parse("MATCH (n) WHERE n.email IS NOT NULL RETURN n").unwrap();
        let ReadingClause::Match(m) = &q.first.reading[0] else {
            panic!("expected MATCH");
        };
        assert!(matches!(
            m.where_clause,
            Some(Expr::IsNull { negated: true, .. })
        ));
    }

    #[test]
    fn test_starts_with() {
        let q = parse("MATCH (n) WHERE n.name STARTS WITH 'A' RETURN n").unwrap();
        let ReadingClause::Match(m) = &q.first.reading[0] else {
            panic!("expected MATCH");
        };
        assert!(matches!(
            m.where_clause,
            Some(Expr::StringOp {
                op: StringOp::StartsWith,
                ..
            })
        ));
    }

    #[test]
    fn test_in_list() {
        let q = parse("MATCH (n) WHERE n.id IN [1, 2, 3] RETURN n").unwrap();
        let ReadingClause::Match(m) = &q.first.reading[0] else {
            panic!("expected MATCH");
        };
        assert!(matches!(m.where_clause, Some(Expr::In { .. })));
    }

    #[test]
    fn test_case_expression() {
        let q = parse("RETURN CASE WHEN 1 > 2 THEN 'a' ELSE 'b' END").unwrap();
        let ret = q.first.return_clause.as_ref().unwrap();
        assert!(matches!(ret.items[0].expr, Expr::Case { .. }));
    }

    #[test]
    fn test_syntax_error_has_position() {
        let err = parse("MATCH (n RETURN n").unwrap_err();
        match err {
            Error::Parse { line, column, message } => {
                assert_eq!(line, 1);
                assert!(column > 1);
                assert!(message.contains("Expected"));
            }
            other => panic!("expected Parse, got {other:?}"),
        }
    }

    #[test]
    fn test_no_partial_result_on_error() {
        assert!(parse("MATCH (n:Person) RETURN").is_err());
        assert!(parse("CREATE").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_pretty_print_reparses_identically() {
        let queries = [
            "MATCH (n:Person) WHERE (n.age > 30) RETURN n.name AS name ORDER BY name DESC SKIP 1 LIMIT 10",
            "CREATE (a:Person {name: 'Ada'}), (b:Person {name: 'Bob'})",
            "MERGE (n:User {email: 'x'}) ON CREATE SET n.t = 1 ON MATCH SET n.seen = 2",
            "MATCH (a)-[r:KNOWS*1..3]->(b) RETURN a, r, b",
            "MATCH (n) DETACH DELETE n",
            "UNWIND [1, 2, 3] AS x RETURN x UNION ALL RETURN 4",
        ];
        for q in queries {
            let ast = parse(q).unwrap();
            let printed = ast.to_string();
            let reparsed = parse(&printed)
                .unwrap_or_else(|e| panic!("reparse of '{printed}' failed: {e}"));
            assert_eq!(ast, reparsed, "round-trip mismatch for '{q}'");
        }
    }
}
