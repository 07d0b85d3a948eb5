//! Lexer module for sandeval - tokenizes expression text before parsing
//!
//! This module provides the first half of a two-phase front end:
//! 1. Lexer: Source text → Token stream
//! 2. Parser: Token stream → Expression
//!
//! This separation allows proper keyword/identifier distinction.

use crate::error::{ParseError, ParseErrorKind};
use num_bigint::BigInt;
use pest::error::LineColLocation;
use pest::Parser;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "lexer.pest"]
struct LexerParser;

/// Position information for a token
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

/// A token with its value and position
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Span of source text
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub start: Position,
    pub end: Position,
    pub text: String,
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    And,
    Or,
    Not,
    In,
    Is,
    If,
    Else,
    For,
    Lambda,
    True,
    False,
    None,

    // Literals
    Identifier(String),
    Integer(i64),
    BigInteger(BigInt),
    Float(f64),
    String(String),
    /// Raw body of an `f'...'` literal, escapes still in place
    FormatString(String),

    // Operators
    Plus,         // +
    Minus,        // -
    Star,         // *
    StarStar,     // **
    Slash,        // /
    SlashSlash,   // //
    Percent,      // %
    Equal,        // =
    EqualEqual,   // ==
    NotEqual,     // !=
    Less,         // <
    LessEqual,    // <=
    Greater,      // >
    GreaterEqual, // >=
    Ampersand,    // &
    Pipe,         // |
    Caret,        // ^
    Tilde,        // ~
    ShiftLeft,    // <<
    ShiftRight,   // >>

    // Punctuation
    LeftParen,    // (
    RightParen,   // )
    LeftBracket,  // [
    RightBracket, // ]
    LeftBrace,    // {
    RightBrace,   // }
    Comma,        // ,
    Dot,          // .
    Colon,        // :
    Semicolon,    // ;

    // Special
    /// Line break outside any bracket; ends the logical line
    Newline,
    Eof,
}

impl TokenKind {
    /// Human readable description for error messages
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Identifier(name) => format!("identifier '{}'", name),
            TokenKind::Integer(i) => format!("number {}", i),
            TokenKind::BigInteger(b) => format!("number {}", b),
            TokenKind::Float(f) => format!("number {}", f),
            TokenKind::String(_) => "string".to_string(),
            TokenKind::FormatString(_) => "format string".to_string(),
            TokenKind::Newline => "newline".to_string(),
            TokenKind::Else => "'else'".to_string(),
            TokenKind::In => "'in'".to_string(),
            TokenKind::LeftParen => "'('".to_string(),
            TokenKind::RightParen => "')'".to_string(),
            TokenKind::RightBracket => "']'".to_string(),
            TokenKind::RightBrace => "'}'".to_string(),
            TokenKind::Colon => "':'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("{:?}", other),
        }
    }
}

/// Lexer that converts source text to tokens
///
/// Line breaks are insignificant inside `()`, `[]` and `{}`. Everywhere else a
/// break between two tokens produces a [`TokenKind::Newline`], so the parser can
/// tell `1\n-1` (two lines) from `1 - 1`.
pub struct Lexer<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    /// Position of the last offset converted; pest yields tokens in order
    cursor: Position,
    bracket_depth: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            tokens: Vec::new(),
            cursor: Position {
                line: 1,
                column: 1,
                offset: 0,
            },
            bracket_depth: 0,
        }
    }

    /// Tokenize the source text
    pub fn tokenize(&mut self) -> Result<Vec<Token>, ParseError> {
        let pairs = LexerParser::parse(Rule::tokens, self.source).map_err(|e| {
            let (line, column) = match e.line_col {
                LineColLocation::Pos((line, col)) => (line, col),
                LineColLocation::Span((line, col), _) => (line, col),
            };
            ParseError::new(ParseErrorKind::Syntax, "unrecognized input", line, column)
        })?;

        for pair in pairs {
            if pair.as_rule() == Rule::tokens {
                for inner in pair.into_inner() {
                    if inner.as_rule() == Rule::token {
                        if let Some(token) = self.process_token(inner)? {
                            self.push_line_break(&token);
                            self.track_brackets(&token.kind);
                            self.tokens.push(token);
                        }
                    }
                }
            }
        }

        // Add EOF token
        let eof_pos = self.position_from_offset(self.source.len());
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span {
                start: eof_pos.clone(),
                end: eof_pos,
                text: String::new(),
            },
        });

        Ok(std::mem::take(&mut self.tokens))
    }

    /// Emit a `Newline` when the gap before `next` holds a line break at bracket depth zero
    fn push_line_break(&mut self, next: &Token) {
        if self.bracket_depth > 0 {
            return;
        }
        let Some(previous) = self.tokens.last() else {
            return;
        };

        let gap = &self.source[previous.span.end.offset..next.span.start.offset];
        if gap_has_line_break(gap) {
            let span = Span {
                start: previous.span.end.clone(),
                end: next.span.start.clone(),
                text: gap.to_string(),
            };
            self.tokens.push(Token {
                kind: TokenKind::Newline,
                span,
            });
        }
    }

    fn track_brackets(&mut self, kind: &TokenKind) {
        match kind {
            TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::LeftBrace => {
                self.bracket_depth += 1;
            }
            TokenKind::RightParen | TokenKind::RightBracket | TokenKind::RightBrace => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
            }
            _ => {}
        }
    }

    fn process_token(&mut self, pair: pest::iterators::Pair<Rule>) -> Result<Option<Token>, ParseError> {
        let span = self.span_from_pair(&pair);

        for inner in pair.into_inner() {
            let kind = match inner.as_rule() {
                Rule::keyword_token => match inner.as_str() {
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "not" => TokenKind::Not,
                    "in" => TokenKind::In,
                    "is" => TokenKind::Is,
                    "if" => TokenKind::If,
                    "else" => TokenKind::Else,
                    "for" => TokenKind::For,
                    "lambda" => TokenKind::Lambda,
                    "True" => TokenKind::True,
                    "False" => TokenKind::False,
                    "None" => TokenKind::None,
                    kw => return Err(self.error(&span, format!("unknown keyword: {}", kw))),
                },

                Rule::identifier_token => TokenKind::Identifier(inner.as_str().to_string()),

                Rule::number_token => self.process_number(inner.as_str(), &span)?,

                Rule::string_token => self.process_string_token(inner, &span)?,

                Rule::format_string_token => match inner.into_inner().next() {
                    Some(body) => TokenKind::FormatString(body.as_str().to_string()),
                    None => return Err(self.error(&span, "invalid format string")),
                },

                Rule::operator_token => match inner.as_str() {
                    "**" => TokenKind::StarStar,
                    "//" => TokenKind::SlashSlash,
                    "==" => TokenKind::EqualEqual,
                    "!=" => TokenKind::NotEqual,
                    "<=" => TokenKind::LessEqual,
                    ">=" => TokenKind::GreaterEqual,
                    "<<" => TokenKind::ShiftLeft,
                    ">>" => TokenKind::ShiftRight,
                    "+" => TokenKind::Plus,
                    "-" => TokenKind::Minus,
                    "*" => TokenKind::Star,
                    "/" => TokenKind::Slash,
                    "%" => TokenKind::Percent,
                    "<" => TokenKind::Less,
                    ">" => TokenKind::Greater,
                    "=" => TokenKind::Equal,
                    "&" => TokenKind::Ampersand,
                    "|" => TokenKind::Pipe,
                    "^" => TokenKind::Caret,
                    "~" => TokenKind::Tilde,
                    op => return Err(self.error(&span, format!("unknown operator: {}", op))),
                },

                Rule::punctuation_token => match inner.as_str() {
                    "(" => TokenKind::LeftParen,
                    ")" => TokenKind::RightParen,
                    "[" => TokenKind::LeftBracket,
                    "]" => TokenKind::RightBracket,
                    "{" => TokenKind::LeftBrace,
                    "}" => TokenKind::RightBrace,
                    "," => TokenKind::Comma,
                    "." => TokenKind::Dot,
                    ":" => TokenKind::Colon,
                    ";" => TokenKind::Semicolon,
                    p => return Err(self.error(&span, format!("unknown punctuation: {}", p))),
                },

                _ => continue,
            };

            return Ok(Some(Token { kind, span }));
        }

        Ok(None)
    }

    /// Integers that overflow `i64` become big integers
    fn process_number(&self, text: &str, span: &Span) -> Result<TokenKind, ParseError> {
        let cleaned = text.replace('_', "");
        if cleaned.contains(['.', 'e', 'E']) {
            let f: f64 = cleaned
                .parse()
                .map_err(|_| self.error(span, format!("invalid float: {}", text)))?;
            Ok(TokenKind::Float(f))
        } else if let Ok(i) = cleaned.parse::<i64>() {
            Ok(TokenKind::Integer(i))
        } else {
            let big: BigInt = cleaned
                .parse()
                .map_err(|_| self.error(span, format!("invalid integer: {}", text)))?;
            Ok(TokenKind::BigInteger(big))
        }
    }

    fn process_string_token(
        &self,
        pair: pest::iterators::Pair<Rule>,
        span: &Span,
    ) -> Result<TokenKind, ParseError> {
        for inner in pair.into_inner() {
            if matches!(inner.as_rule(), Rule::double_quoted | Rule::single_quoted) {
                return Ok(TokenKind::String(unescape_string(inner.as_str())));
            }
        }

        Err(self.error(span, "invalid string token"))
    }

    fn error(&self, span: &Span, message: impl Into<String>) -> ParseError {
        ParseError::new(
            ParseErrorKind::Syntax,
            message,
            span.start.line,
            span.start.column,
        )
    }

    /// Create a Span from a pest Pair
    fn span_from_pair(&mut self, pair: &pest::iterators::Pair<Rule>) -> Span {
        let pest_span = pair.as_span();
        Span {
            start: self.position_from_offset(pest_span.start()),
            end: self.position_from_offset(pest_span.end()),
            text: pair.as_str().to_string(),
        }
    }

    /// Calculate line and column from byte offset, walking forward from the cursor
    ///
    /// Offsets arrive in ascending order, so the whole source is scanned once.
    fn position_from_offset(&mut self, offset: usize) -> Position {
        if offset < self.cursor.offset {
            self.cursor = Position {
                line: 1,
                column: 1,
                offset: 0,
            };
        }

        let end = offset.min(self.source.len());
        for c in self.source[self.cursor.offset..end].chars() {
            if c == '\n' {
                self.cursor.line += 1;
                self.cursor.column = 1;
            } else {
                self.cursor.column += 1;
            }
        }
        self.cursor.offset = end;

        Position {
            line: self.cursor.line,
            column: self.cursor.column,
            offset,
        }
    }
}

/// Whether skipped text between two tokens ends a logical line
///
/// A backslash directly before the break joins the lines; a break that ends a
/// comment still counts.
fn gap_has_line_break(gap: &str) -> bool {
    let mut chars = gap.chars().peekable();
    let mut in_comment = false;

    while let Some(c) = chars.next() {
        match c {
            '\n' | '\r' => return true,
            '#' => in_comment = true,
            '\\' if !in_comment => {
                if chars.peek() == Some(&'\r') {
                    chars.next();
                }
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            _ => {}
        }
    }

    false
}

/// Unescape a string body (handle \n, \t, \x41, é, etc.)
pub(crate) fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('0') => result.push('\0'),
            Some('"') => result.push('"'),
            Some('\'') => result.push('\''),
            Some('\\') => result.push('\\'),
            Some('\n') => {}
            Some(kind @ ('x' | 'u')) => {
                let width = if kind == 'x' { 2 } else { 4 };
                let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if digits.len() == width => result.push(decoded),
                    _ => {
                        result.push('\\');
                        result.push(kind);
                        result.push_str(&digits);
                    }
                }
            }
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }

    result
}

/// Convenience function to tokenize a string
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(source);
    lexer.tokenize()
}
