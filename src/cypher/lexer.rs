//! Cypher lexer — tokenizes a query string.
//!
//! Operates on the borrowed input; tokens are slices into it. The lexer
//! emits exactly one token per `next_token` call and never allocates.
//! Lexical failures surface as a token of kind [`TokenKind::Error`] whose
//! text is the diagnostic message; [`tokenize`] converts that into
//! [`Error::Parse`] so the parser never sees one.

use crate::{Error, Result};

/// A token from the lexer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// 1-based source line.
    pub line: u32,
    /// 1-based source column; `\n` resets it.
    pub column: u32,
}

/// Token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    Match, Optional, Where, Return, With, Unwind,
    Create, Merge, Delete, Detach, Set, Remove,
    Union, All, As, On,
    Order, By, Skip, Limit, Asc, Desc, Distinct,
    And, Or, Xor, Not, In, Is,
    Starts, Ends, Contains,
    Null, True, False,
    Case, When, Then, Else, End,

    // Literals
    Integer, Float, StringLiteral,

    // Identifiers
    Identifier,

    // Punctuation
    LParen, RParen, LBracket, RBracket, LBrace, RBrace,
    Dot, DotDot, Comma, Colon, Pipe, Dollar,

    // Relationship arrows
    Arrow,      // ->
    LeftArrow,  // <-
    BothArrow,  // <->
    Dash,       // -

    // Operators
    Eq, Neq, Lt, Lte, Gt, Gte,
    Plus, Star, Slash, Percent, Caret,
    RegexMatch, // =~

    // Terminals
    Error,
    Eof,
}

/// Single-pass lexer over a borrowed query string.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn peek_byte_at(&self, offset: usize) -> Option<u8> {
        self.input.as_bytes().get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn token(&self, kind: TokenKind, start: usize, line: u32, column: u32) -> Token<'a> {
        Token {
            kind,
            text: &self.input[start..self.pos],
            line,
            column,
        }
    }

    fn error_token(&self, message: &'static str, line: u32, column: u32) -> Token<'a> {
        Token {
            kind: TokenKind::Error,
            text: message,
            line,
            column,
        }
    }

    /// Skip whitespace and comments. Returns an error token for an
    /// unterminated block comment.
    fn skip_trivia(&mut self) -> Option<Token<'a>> {
        loop {
            match self.peek_byte() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'/') if self.peek_byte_at(1) == Some(b'/') => {
                    while let Some(b) = self.peek_byte() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_byte_at(1) == Some(b'*') => {
                    let (line, column) = (self.line, self.column);
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some(b'*') if self.peek_byte() == Some(b'/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Some(self.error_token(
                                    "Unterminated comment",
                                    line,
                                    column,
                                ));
                            }
                        }
                    }
                }
                _ => return None,
            }
        }
    }

    /// Produce the next token. Idempotent at EOF.
    pub fn next_token(&mut self) -> Token<'a> {
        if let Some(err) = self.skip_trivia() {
            return err;
        }

        let (line, column) = (self.line, self.column);
        let start = self.pos;

        let b = match self.peek_byte() {
            Some(b) => b,
            None => return self.token(TokenKind::Eof, start, line, column),
        };

        // Identifiers and keywords
        if b.is_ascii_alphabetic() || b == b'_' {
            self.bump();
            while let Some(c) = self.peek_byte() {
                if c.is_ascii_alphanumeric() || c == b'_' {
                    self.bump();
                } else {
                    break;
                }
            }
            let text = &self.input[start..self.pos];
            return Token {
                kind: keyword_or_ident(text),
                text,
                line,
                column,
            };
        }

        // Numbers: digits, then a fraction only when a digit follows the dot
        // (so `1..3` lexes as Integer DotDot Integer).
        if b.is_ascii_digit() {
            self.bump();
            while self.peek_byte().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
            let mut kind = TokenKind::Integer;
            if self.peek_byte() == Some(b'.')
                && self.peek_byte_at(1).is_some_and(|c| c.is_ascii_digit())
            {
                kind = TokenKind::Float;
                self.bump();
                while self.peek_byte().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
            return self.token(kind, start, line, column);
        }

        // String literals: escapes are preserved verbatim; the parser
        // interprets them.
        if b == b'\'' || b == b'"' {
            let quote = b;
            self.bump();
            let content_start = self.pos;
            loop {
                match self.peek_byte() {
                    Some(b'\\') => {
                        self.bump();
                        if self.bump().is_none() {
                            return self.error_token(
                                "Unterminated string literal",
                                line,
                                column,
                            );
                        }
                    }
                    Some(c) if c == quote => {
                        let text = &self.input[content_start..self.pos];
                        self.bump();
                        return Token {
                            kind: TokenKind::StringLiteral,
                            text,
                            line,
                            column,
                        };
                    }
                    Some(_) => {
                        self.bump();
                    }
                    None => {
                        return self.error_token("Unterminated string literal", line, column);
                    }
                }
            }
        }

        // Punctuation and operators
        self.bump();
        let kind = match b {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b',' => TokenKind::Comma,
            b':' => TokenKind::Colon,
            b'|' => TokenKind::Pipe,
            b'$' => TokenKind::Dollar,
            b'+' => TokenKind::Plus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'^' => TokenKind::Caret,
            b'.' => {
                if self.peek_byte() == Some(b'.') {
                    self.bump();
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            b'=' => {
                if self.peek_byte() == Some(b'~') {
                    self.bump();
                    TokenKind::RegexMatch
                } else {
                    TokenKind::Eq
                }
            }
            b'<' => match self.peek_byte() {
                Some(b'=') => {
                    self.bump();
                    TokenKind::Lte
                }
                Some(b'>') => {
                    self.bump();
                    TokenKind::Neq
                }
                Some(b'-') => {
                    self.bump();
                    if self.peek_byte() == Some(b'>') {
                        self.bump();
                        TokenKind::BothArrow
                    } else {
                        TokenKind::LeftArrow
                    }
                }
                _ => TokenKind::Lt,
            },
            b'>' => {
                if self.peek_byte() == Some(b'=') {
                    self.bump();
                    TokenKind::Gte
                } else {
                    TokenKind::Gt
                }
            }
            b'-' => {
                if self.peek_byte() == Some(b'>') {
                    self.bump();
                    TokenKind::Arrow
                } else {
                    TokenKind::Dash
                }
            }
            _ => return self.error_token("Unexpected character", line, column),
        };

        self.token(kind, start, line, column)
    }
}

/// Tokenize an entire query. An `Error` token becomes `Error::Parse`.
pub fn tokenize(input: &str) -> Result<Vec<Token<'_>>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token();
        match tok.kind {
            TokenKind::Error => {
                return Err(Error::Parse {
                    line: tok.line,
                    column: tok.column,
                    message: tok.text.to_string(),
                });
            }
            TokenKind::Eof => {
                tokens.push(tok);
                return Ok(tokens);
            }
            _ => tokens.push(tok),
        }
    }
}

fn keyword_or_ident(s: &str) -> TokenKind {
    const KEYWORDS: &[(&str, TokenKind)] = &[
        ("MATCH", TokenKind::Match),
        ("OPTIONAL", TokenKind::Optional),
        ("WHERE", TokenKind::Where),
        ("RETURN", TokenKind::Return),
        ("WITH", TokenKind::With),
        ("UNWIND", TokenKind::Unwind),
        ("CREATE", TokenKind::Create),
        ("MERGE", TokenKind::Merge),
        ("DELETE", TokenKind::Delete),
        ("DETACH", TokenKind::Detach),
        ("SET", TokenKind::Set),
        ("REMOVE", TokenKind::Remove),
        ("UNION", TokenKind::Union),
        ("ALL", TokenKind::All),
        ("AS", TokenKind::As),
        ("ON", TokenKind::On),
        ("ORDER", TokenKind::Order),
        ("BY", TokenKind::By),
        ("SKIP", TokenKind::Skip),
        ("LIMIT", TokenKind::Limit),
        ("ASC", TokenKind::Asc),
        ("DESC", TokenKind::Desc),
        ("DISTINCT", TokenKind::Distinct),
        ("AND", TokenKind::And),
        ("OR", TokenKind::Or),
        ("XOR", TokenKind::Xor),
        ("NOT", TokenKind::Not),
        ("IN", TokenKind::In),
        ("IS", TokenKind::Is),
        ("STARTS", TokenKind::Starts),
        ("ENDS", TokenKind::Ends),
        ("CONTAINS", TokenKind::Contains),
        ("NULL", TokenKind::Null),
        ("TRUE", TokenKind::True),
        ("FALSE", TokenKind::False),
        ("CASE", TokenKind::Case),
        ("WHEN", TokenKind::When),
        ("THEN", TokenKind::Then),
        ("ELSE", TokenKind::Else),
        ("END", TokenKind::End),
    ];
    for (kw, kind) in KEYWORDS {
        if s.eq_ignore_ascii_case(kw) {
            return *kind;
        }
    }
    TokenKind::Identifier
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_match() {
        assert_eq!(
            kinds("MATCH (n:Person) RETURN n"),
            vec![
                TokenKind::Match,
                TokenKind::LParen,
                TokenKind::Identifier,
                TokenKind::Colon,
                TokenKind::Identifier,
                TokenKind::RParen,
                TokenKind::Return,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_relationship_pattern() {
        assert_eq!(
            kinds("(a)-[:KNOWS]->(b)"),
            vec![
                TokenKind::LParen,
                TokenKind::Identifier,
                TokenKind::RParen,
                TokenKind::Dash,
                TokenKind::LBracket,
                TokenKind::Colon,
                TokenKind::Identifier,
                TokenKind::RBracket,
                TokenKind::Arrow,
                TokenKind::LParen,
                TokenKind::Identifier,
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_case_insensitive() {
        assert_eq!(kinds("match RETURN Where")[..3], [
            TokenKind::Match,
            TokenKind::Return,
            TokenKind::Where,
        ]);
    }

    #[test]
    fn test_string_escape_preserved() {
        let tokens = tokenize(r"'it\'s'").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text, r"it\'s");
    }

    #[test]
    fn test_var_length_range_lexes_as_integers() {
        assert_eq!(
            kinds("*1..3"),
            vec![
                TokenKind::Star,
                TokenKind::Integer,
                TokenKind::DotDot,
                TokenKind::Integer,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_multi_char_operators() {
        assert_eq!(
            kinds("<> <= >= =~ -> <- <->"),
            vec![
                TokenKind::Neq,
                TokenKind::Lte,
                TokenKind::Gte,
                TokenKind::RegexMatch,
                TokenKind::Arrow,
                TokenKind::LeftArrow,
                TokenKind::BothArrow,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_line_and_column_tracking() {
        let tokens = tokenize("MATCH\n  (n)").unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = tokenize("MATCH /* oops").unwrap_err();
        match err {
            Error::Parse { message, .. } => assert_eq!(message, "Unterminated comment"),
            other => panic!("expected Parse, got {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_string_reports_open_quote() {
        let err = tokenize("RETURN 'abc").unwrap_err();
        match err {
            Error::Parse { line, column, message } => {
                assert_eq!(message, "Unterminated string literal");
                assert_eq!((line, column), (1, 8));
            }
            other => panic!("expected Parse, got {other:?}"),
        }
    }

    #[test]
    fn test_comments_skipped() {
        let t = kinds("MATCH // trailing\n/* block\ncomment */ (n)");
        assert_eq!(t[0], TokenKind::Match);
        assert_eq!(t[1], TokenKind::LParen);
    }

    #[test]
    fn test_float_and_integer() {
        let tokens = tokenize("1 2.5").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Integer);
        assert_eq!(tokens[1].kind, TokenKind::Float);
        assert_eq!(tokens[1].text, "2.5");
    }
}
