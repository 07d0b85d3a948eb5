//! Token-based parser for sandeval
//!
//! Recursive descent over the lexer's token stream, one function per
//! precedence level (lowest first):
//!
//! conditional → or → and → not → comparison → | → ^ → & → shifts →
//! `+ -` → `* / // %` → unary → `**` → postfix → primary

use crate::ast::{
    BinaryOperator, CompareOperator, ComprehensionKind, Conversion, Expression, FormatPart,
    Generator, LogicalOperator, SourceSpan, Target, UnaryOperator,
};
use crate::error::{ParseError, ParseErrorKind};
use crate::lexer::{unescape_string, Position, Span, Token, TokenKind};
use crate::value::Value;

/// Maximum recursion of the parser itself (parentheses, unary chains, conditionals)
const MAX_NESTING: usize = 40;

/// Maximum depth of the produced tree, counting left-associative operator chains
const MAX_DEPTH: usize = 100;

type ParseResult<T> = Result<T, ParseError>;

type ParseFn<T> = fn(&mut TokenParser) -> ParseResult<T>;

/// Token-based parser
pub struct TokenParser {
    tokens: Vec<Token>,
    position: usize,
    nesting: usize,
    depth: usize,
}

impl TokenParser {
    /// Create a new parser from tokens
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Eof)) {
            let start = Position {
                line: 1,
                column: 1,
                offset: 0,
            };
            tokens.push(Token {
                kind: TokenKind::Eof,
                span: Span {
                    start: start.clone(),
                    end: start,
                    text: String::new(),
                },
            });
        }

        Self {
            tokens,
            position: 0,
            nesting: 0,
            depth: 0,
        }
    }

    /// Parse exactly one top-level expression
    pub fn parse_single(&mut self) -> ParseResult<Expression> {
        if self.is_at_end() {
            return Err(self.error_here(ParseErrorKind::Syntax, "empty expression"));
        }

        let start = self.mark_position();
        let first = self.parse_expression()?;

        // A bare `1, 2` is a tuple, as in Python.
        let expr = if self.check(&TokenKind::Comma) {
            let mut elements = vec![first];
            while self.check(&TokenKind::Comma) {
                self.advance();
                if self.is_at_end()
                    || self.check(&TokenKind::Semicolon)
                    || self.check(&TokenKind::Newline)
                {
                    break;
                }
                elements.push(self.parse_expression()?);
            }
            Expression::Tuple {
                elements,
                span: self.span_from(start),
            }
        } else {
            first
        };

        // One trailing `;` is tolerated; anything after it or on a later line is a second statement
        let mut separated = false;
        if self.check(&TokenKind::Semicolon) {
            self.advance();
            separated = true;
        }
        while self.check(&TokenKind::Newline) {
            self.advance();
            separated = true;
        }

        if self.is_at_end() {
            return Ok(expr);
        }
        if separated {
            return Err(self.error_here(
                ParseErrorKind::MultipleExpressions,
                "only a single expression is allowed",
            ));
        }
        Err(self.unexpected())
    }

    /// Parse an expression (entry point for nested expressions)
    fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.nested(Self::parse_conditional)
    }

    /// Parse conditional expression: `then if condition else otherwise`
    fn parse_conditional(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Lambda) {
            return Err(self.error_here(
                ParseErrorKind::Unsupported,
                "lambda expressions are not available",
            ));
        }

        let start = self.mark_position();
        let then_expr = self.parse_or()?;

        if self.check(&TokenKind::If) {
            self.advance();
            let condition = self.parse_or()?;
            self.expect(&TokenKind::Else)?;
            let else_expr = self.parse_expression()?;
            return Ok(Expression::Conditional {
                condition: Box::new(condition),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                span: self.span_from(start),
            });
        }

        Ok(then_expr)
    }

    /// Parse or expression
    fn parse_or(&mut self) -> ParseResult<Expression> {
        self.parse_bool_chain(&TokenKind::Or, LogicalOperator::Or, Self::parse_and)
    }

    /// Parse and expression
    fn parse_and(&mut self) -> ParseResult<Expression> {
        self.parse_bool_chain(&TokenKind::And, LogicalOperator::And, Self::parse_not)
    }

    fn parse_bool_chain(
        &mut self,
        token: &TokenKind,
        op: LogicalOperator,
        next: ParseFn<Expression>,
    ) -> ParseResult<Expression> {
        let start = self.mark_position();
        let first = next(self)?;
        if !self.check(token) {
            return Ok(first);
        }

        let mut values = vec![first];
        while self.check(token) {
            self.advance();
            values.push(next(self)?);
        }

        Ok(Expression::BoolOp {
            op,
            values,
            span: self.span_from(start),
        })
    }

    /// Parse `not` prefix
    fn parse_not(&mut self) -> ParseResult<Expression> {
        if !self.check(&TokenKind::Not) {
            return self.parse_comparison();
        }

        let start = self.mark_position();
        self.advance();
        let operand = self.nested(Self::parse_not)?;
        Ok(Expression::UnaryOp {
            op: UnaryOperator::Not,
            operand: Box::new(operand),
            span: self.span_from(start),
        })
    }

    /// Parse comparison chain: `a < b <= c`
    fn parse_comparison(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        let left = self.parse_bit_or()?;

        let mut comparisons = Vec::new();
        while let Some(op) = self.comparison_operator() {
            comparisons.push((op, self.parse_bit_or()?));
        }

        if comparisons.is_empty() {
            return Ok(left);
        }

        Ok(Expression::Compare {
            left: Box::new(left),
            comparisons,
            span: self.span_from(start),
        })
    }

    /// Consume a comparison operator, including `not in` and `is not`
    fn comparison_operator(&mut self) -> Option<CompareOperator> {
        let kind = self.current().kind.clone();
        let op = match kind {
            TokenKind::EqualEqual => CompareOperator::Equal,
            TokenKind::NotEqual => CompareOperator::NotEqual,
            TokenKind::Less => CompareOperator::LessThan,
            TokenKind::LessEqual => CompareOperator::LessThanOrEqual,
            TokenKind::Greater => CompareOperator::GreaterThan,
            TokenKind::GreaterEqual => CompareOperator::GreaterThanOrEqual,
            TokenKind::In => CompareOperator::In,
            TokenKind::Not if self.peek_is(&TokenKind::In) => {
                self.advance();
                CompareOperator::NotIn
            }
            TokenKind::Is if self.peek_is(&TokenKind::Not) => {
                self.advance();
                CompareOperator::IsNot
            }
            TokenKind::Is => CompareOperator::Is,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn parse_bit_or(&mut self) -> ParseResult<Expression> {
        self.parse_left_assoc(&[BinaryOperator::BitOr], Self::parse_bit_xor)
    }

    fn parse_bit_xor(&mut self) -> ParseResult<Expression> {
        self.parse_left_assoc(&[BinaryOperator::BitXor], Self::parse_bit_and)
    }

    fn parse_bit_and(&mut self) -> ParseResult<Expression> {
        self.parse_left_assoc(&[BinaryOperator::BitAnd], Self::parse_shift)
    }

    fn parse_shift(&mut self) -> ParseResult<Expression> {
        self.parse_left_assoc(
            &[BinaryOperator::LeftShift, BinaryOperator::RightShift],
            Self::parse_addition,
        )
    }

    /// Parse addition/subtraction
    fn parse_addition(&mut self) -> ParseResult<Expression> {
        self.parse_left_assoc(
            &[BinaryOperator::Add, BinaryOperator::Subtract],
            Self::parse_multiplication,
        )
    }

    /// Parse multiplication/division
    fn parse_multiplication(&mut self) -> ParseResult<Expression> {
        self.parse_left_assoc(
            &[
                BinaryOperator::Multiply,
                BinaryOperator::Divide,
                BinaryOperator::FloorDivide,
                BinaryOperator::Modulo,
            ],
            Self::parse_unary,
        )
    }

    /// Left-associative binary level; every link deepens the tree by one
    fn parse_left_assoc(
        &mut self,
        allowed: &[BinaryOperator],
        next: ParseFn<Expression>,
    ) -> ParseResult<Expression> {
        let start = self.mark_position();
        let mut left = next(self)?;
        let depth_before = self.depth;

        while let Some(op) = self.binary_operator(allowed) {
            self.advance();
            if self.depth >= MAX_DEPTH {
                self.depth = depth_before;
                return Err(self.too_deep());
            }
            self.depth += 1;

            let right = match next(self) {
                Ok(right) => right,
                Err(e) => {
                    self.depth = depth_before;
                    return Err(e);
                }
            };
            left = Expression::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span: self.span_from(start),
            };
        }

        self.depth = depth_before;
        Ok(left)
    }

    fn binary_operator(&self, allowed: &[BinaryOperator]) -> Option<BinaryOperator> {
        let op = match self.current().kind {
            TokenKind::Plus => BinaryOperator::Add,
            TokenKind::Minus => BinaryOperator::Subtract,
            TokenKind::Star => BinaryOperator::Multiply,
            TokenKind::Slash => BinaryOperator::Divide,
            TokenKind::SlashSlash => BinaryOperator::FloorDivide,
            TokenKind::Percent => BinaryOperator::Modulo,
            TokenKind::Ampersand => BinaryOperator::BitAnd,
            TokenKind::Pipe => BinaryOperator::BitOr,
            TokenKind::Caret => BinaryOperator::BitXor,
            TokenKind::ShiftLeft => BinaryOperator::LeftShift,
            TokenKind::ShiftRight => BinaryOperator::RightShift,
            _ => return None,
        };
        allowed.contains(&op).then_some(op)
    }

    /// Parse unary expression: `-x`, `+x`, `~x`
    fn parse_unary(&mut self) -> ParseResult<Expression> {
        let op = match self.current().kind {
            TokenKind::Minus => UnaryOperator::Negate,
            TokenKind::Plus => UnaryOperator::Plus,
            TokenKind::Tilde => UnaryOperator::Invert,
            _ => return self.parse_power(),
        };

        let start = self.mark_position();
        self.advance();
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expression::UnaryOp {
            op,
            operand: Box::new(operand),
            span: self.span_from(start),
        })
    }

    /// Parse power: right associative, binds tighter than a unary operator on its left
    fn parse_power(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        let base = self.parse_postfix()?;

        if !self.check(&TokenKind::StarStar) {
            return Ok(base);
        }

        self.advance();
        let exponent = self.nested(Self::parse_unary)?;
        Ok(Expression::BinaryOp {
            op: BinaryOperator::Power,
            left: Box::new(base),
            right: Box::new(exponent),
            span: self.span_from(start),
        })
    }

    /// Parse postfix expressions (calls, member access, indexing)
    fn parse_postfix(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        let mut expr = self.parse_primary()?;

        loop {
            if self.check(&TokenKind::LeftParen) {
                self.advance();
                let args = self.parse_argument_list()?;
                expr = match expr {
                    Expression::Name { name, .. } => Expression::FunctionCall {
                        name,
                        args,
                        span: self.span_from(start),
                    },
                    Expression::MemberAccess { object, field, .. } => Expression::MethodCall {
                        object,
                        method: field,
                        args,
                        span: self.span_from(start),
                    },
                    other => {
                        return Err(self.error_at(
                            start,
                            ParseErrorKind::Unsupported,
                            format!("calling a {} is not available", other.kind()),
                        ))
                    }
                };
            } else if self.check(&TokenKind::Dot) {
                self.advance();
                let field = self.parse_identifier()?;
                expr = Expression::MemberAccess {
                    object: Box::new(expr),
                    field,
                    span: self.span_from(start),
                };
            } else if self.check(&TokenKind::LeftBracket) {
                self.advance();
                expr = self.parse_subscript(expr, start)?;
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Parse call arguments after `(`, consuming the closing `)`
    fn parse_argument_list(&mut self) -> ParseResult<Vec<Expression>> {
        let mut args = Vec::new();

        while !self.check(&TokenKind::RightParen) {
            if self.check_identifier() && self.peek_is(&TokenKind::Equal) {
                return Err(self.error_here(
                    ParseErrorKind::Unsupported,
                    "keyword arguments are not available",
                ));
            }

            let arg_start = self.mark_position();
            let arg = self.parse_expression()?;
            if self.check(&TokenKind::For) {
                let generators = self.parse_generators()?;
                args.push(Expression::Comprehension {
                    kind: ComprehensionKind::Generator,
                    element: Box::new(arg),
                    generators,
                    span: self.span_from(arg_start),
                });
            } else {
                args.push(arg);
            }

            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }

        self.expect(&TokenKind::RightParen)?;
        Ok(args)
    }

    /// Parse index or slice after `[`, consuming the closing `]`
    fn parse_subscript(&mut self, object: Expression, start: usize) -> ParseResult<Expression> {
        let lower = if self.check(&TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };

        if !self.check(&TokenKind::Colon) {
            if let Some(index) = lower {
                self.expect(&TokenKind::RightBracket)?;
                return Ok(Expression::Index {
                    object: Box::new(object),
                    index,
                    span: self.span_from(start),
                });
            }
        }

        self.expect(&TokenKind::Colon)?;
        let upper = if self.check(&TokenKind::Colon) || self.check(&TokenKind::RightBracket) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };

        let step = if self.check(&TokenKind::Colon) {
            self.advance();
            if self.check(&TokenKind::RightBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            }
        } else {
            None
        };

        self.expect(&TokenKind::RightBracket)?;
        Ok(Expression::Slice {
            object: Box::new(object),
            start: lower,
            end: upper,
            step,
            span: self.span_from(start),
        })
    }

    /// Parse primary expressions
    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let span = self.current_span();
        let kind = self.current().kind.clone();

        let value = match kind {
            TokenKind::Integer(i) => Value::Int(i),
            TokenKind::BigInteger(b) => Value::from_bigint(b),
            TokenKind::Float(f) => Value::Float(f),
            TokenKind::True => Value::Bool(true),
            TokenKind::False => Value::Bool(false),
            TokenKind::None => Value::Null,
            TokenKind::String(_) | TokenKind::FormatString(_) => return self.parse_string_run(),
            TokenKind::Identifier(name) => {
                self.advance();
                return Ok(Expression::Name { name, span });
            }
            TokenKind::LeftParen => return self.parse_parenthesized(),
            TokenKind::LeftBracket => return self.parse_list_or_comprehension(),
            TokenKind::LeftBrace => return self.parse_brace(),
            TokenKind::Lambda => {
                return Err(self.error_here(
                    ParseErrorKind::Unsupported,
                    "lambda expressions are not available",
                ))
            }
            _ => return Err(self.unexpected()),
        };

        self.advance();
        Ok(Expression::Literal { value, span })
    }

    /// Adjacent string literals concatenate; any `f'...'` among them makes the
    /// whole run a formatted string
    fn parse_string_run(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        let mut parts: Vec<FormatPart> = Vec::new();
        let mut formatted = false;

        loop {
            match self.current().kind.clone() {
                TokenKind::String(text) => push_literal(&mut parts, text),
                TokenKind::FormatString(raw) => {
                    formatted = true;
                    for part in self.format_parts(&raw)? {
                        match part {
                            FormatPart::Literal(text) => push_literal(&mut parts, text),
                            field => parts.push(field),
                        }
                    }
                }
                _ => break,
            }
            self.advance();
        }

        let span = self.span_from(start);
        if formatted {
            return Ok(Expression::FormattedString { parts, span });
        }

        let text = match parts.pop() {
            Some(FormatPart::Literal(text)) => text,
            _ => String::new(),
        };
        Ok(Expression::Literal {
            value: Value::String(text),
            span,
        })
    }

    /// Split the raw body of the current `f'...'` token into text and fields
    fn format_parts(&self, raw: &str) -> ParseResult<Vec<FormatPart>> {
        let chars: Vec<char> = raw.chars().collect();
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '{' if chars.get(i + 1) == Some(&'{') => {
                    text.push('{');
                    i += 2;
                }
                '}' if chars.get(i + 1) == Some(&'}') => {
                    text.push('}');
                    i += 2;
                }
                '}' => {
                    return Err(self.error_here(
                        ParseErrorKind::Syntax,
                        "single '}' is not allowed in a format string",
                    ))
                }
                '{' => {
                    if !text.is_empty() {
                        parts.push(FormatPart::Literal(unescape_string(&std::mem::take(&mut text))));
                    }
                    let (field, next) = self.format_field(&chars, i + 1)?;
                    parts.push(field);
                    i = next;
                }
                c => {
                    text.push(c);
                    i += 1;
                }
            }
        }

        if !text.is_empty() {
            parts.push(FormatPart::Literal(unescape_string(&text)));
        }
        Ok(parts)
    }

    /// Parse `expr[!conversion][:spec]}` starting after the `{`; returns the
    /// field and the index just past its `}`
    fn format_field(&self, chars: &[char], start: usize) -> ParseResult<(FormatPart, usize)> {
        let syntax = |message: &str| self.error_here(ParseErrorKind::Syntax, message);

        // The expression ends at a top-level `}`, `:` or `!` (but not `!=`)
        let mut i = start;
        let mut brackets = 0usize;
        let mut quote: Option<char> = None;
        while i < chars.len() {
            let c = chars[i];
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None => match c {
                    '\'' | '"' => quote = Some(c),
                    '(' | '[' | '{' => brackets += 1,
                    ')' | ']' | '}' if brackets > 0 => brackets -= 1,
                    '}' | ':' if brackets == 0 => break,
                    '!' if brackets == 0 && chars.get(i + 1) != Some(&'=') => break,
                    _ => {}
                },
            }
            i += 1;
        }
        if i >= chars.len() {
            return Err(syntax("expecting '}' in format string"));
        }

        let source: String = chars[start..i].iter().collect();
        if source.trim().is_empty() {
            return Err(syntax("empty expression not allowed in format string"));
        }
        if source.contains('\\') {
            return Err(syntax("backslash not allowed in a format string expression"));
        }
        let value = self.parse_embedded(&source)?;

        let mut conversion = None;
        if chars[i] == '!' {
            conversion = match chars.get(i + 1) {
                Some('s') => Some(Conversion::Str),
                Some('r') | Some('a') => Some(Conversion::Repr),
                _ => return Err(syntax("format string conversion must be 's', 'r' or 'a'")),
            };
            i += 2;
        }

        let mut spec = String::new();
        if chars.get(i) == Some(&':') {
            i += 1;
            while i < chars.len() && chars[i] != '}' {
                if chars[i] == '{' {
                    return Err(self.error_here(
                        ParseErrorKind::Unsupported,
                        "nested fields in a format spec are not available",
                    ));
                }
                spec.push(chars[i]);
                i += 1;
            }
        }

        if chars.get(i) != Some(&'}') {
            return Err(syntax("expecting '}' in format string"));
        }
        Ok((
            FormatPart::Field {
                value,
                conversion,
                spec: unescape_string(&spec),
            },
            i + 1,
        ))
    }

    /// Parse a replacement field's expression with this parser's depth budget;
    /// errors point at the format string token
    fn parse_embedded(&self, source: &str) -> ParseResult<Expression> {
        let token = self.current();
        let relocate = |e: ParseError| {
            ParseError::new(e.kind, e.message, token.span.start.line, token.span.start.column)
        };

        let tokens = crate::lexer::tokenize(source).map_err(relocate)?;
        let mut parser = TokenParser::new(tokens);
        parser.nesting = self.nesting;
        parser.depth = self.depth;

        let expr = parser.parse_expression().map_err(relocate)?;
        if !parser.is_at_end() {
            return Err(relocate(parser.unexpected()));
        }
        Ok(expr)
    }

    /// Parse `(...)`: grouping, tuple or generator expression
    fn parse_parenthesized(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        self.advance(); // consume '('

        if self.check(&TokenKind::RightParen) {
            self.advance();
            return Ok(Expression::Tuple {
                elements: Vec::new(),
                span: self.span_from(start),
            });
        }

        let first = self.parse_expression()?;

        if self.check(&TokenKind::For) {
            let generators = self.parse_generators()?;
            self.expect(&TokenKind::RightParen)?;
            return Ok(Expression::Comprehension {
                kind: ComprehensionKind::Generator,
                element: Box::new(first),
                generators,
                span: self.span_from(start),
            });
        }

        if self.check(&TokenKind::RightParen) {
            self.advance();
            return Ok(first);
        }

        let elements = self.parse_remaining_elements(first, &TokenKind::RightParen)?;
        Ok(Expression::Tuple {
            elements,
            span: self.span_from(start),
        })
    }

    /// Parse `[...]`: list literal or list comprehension
    fn parse_list_or_comprehension(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        self.advance(); // consume '['

        if self.check(&TokenKind::RightBracket) {
            self.advance();
            return Ok(Expression::List {
                elements: Vec::new(),
                span: self.span_from(start),
            });
        }

        let first = self.parse_expression()?;

        if self.check(&TokenKind::For) {
            let generators = self.parse_generators()?;
            self.expect(&TokenKind::RightBracket)?;
            return Ok(Expression::Comprehension {
                kind: ComprehensionKind::List,
                element: Box::new(first),
                generators,
                span: self.span_from(start),
            });
        }

        let elements = self.parse_remaining_elements(first, &TokenKind::RightBracket)?;
        Ok(Expression::List {
            elements,
            span: self.span_from(start),
        })
    }

    /// Parse `{...}`: dict, set, or one of their comprehensions
    fn parse_brace(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        self.advance(); // consume '{'

        if self.check(&TokenKind::RightBrace) {
            self.advance();
            return Ok(Expression::Map {
                entries: Vec::new(),
                span: self.span_from(start),
            });
        }

        let first = self.parse_expression()?;

        if self.check(&TokenKind::Colon) {
            self.advance();
            let value = self.parse_expression()?;

            if self.check(&TokenKind::For) {
                let generators = self.parse_generators()?;
                self.expect(&TokenKind::RightBrace)?;
                return Ok(Expression::DictComprehension {
                    key: Box::new(first),
                    value: Box::new(value),
                    generators,
                    span: self.span_from(start),
                });
            }

            let mut entries = vec![(first, value)];
            while self.check(&TokenKind::Comma) {
                self.advance();
                if self.check(&TokenKind::RightBrace) {
                    break;
                }
                let key = self.parse_expression()?;
                self.expect(&TokenKind::Colon)?;
                let value = self.parse_expression()?;
                entries.push((key, value));
            }
            self.expect(&TokenKind::RightBrace)?;

            return Ok(Expression::Map {
                entries,
                span: self.span_from(start),
            });
        }

        if self.check(&TokenKind::For) {
            let generators = self.parse_generators()?;
            self.expect(&TokenKind::RightBrace)?;
            return Ok(Expression::Comprehension {
                kind: ComprehensionKind::Set,
                element: Box::new(first),
                generators,
                span: self.span_from(start),
            });
        }

        let elements = self.parse_remaining_elements(first, &TokenKind::RightBrace)?;
        Ok(Expression::Set {
            elements,
            span: self.span_from(start),
        })
    }

    /// Parse `, b, c` after a first element, consuming the closing token
    fn parse_remaining_elements(
        &mut self,
        first: Expression,
        closing: &TokenKind,
    ) -> ParseResult<Vec<Expression>> {
        let mut elements = vec![first];
        while self.check(&TokenKind::Comma) {
            self.advance();
            if self.check(closing) {
                break;
            }
            elements.push(self.parse_expression()?);
        }
        self.expect(closing)?;
        Ok(elements)
    }

    /// Parse one or more `for target in iter [if cond]...` clauses
    fn parse_generators(&mut self) -> ParseResult<Vec<Generator>> {
        let mut generators = Vec::new();

        while self.check(&TokenKind::For) {
            // Every clause nests the loop body one level deeper
            if self.depth + generators.len() >= MAX_DEPTH {
                return Err(self.too_deep());
            }
            self.advance();
            let target = self.parse_target_list()?;
            self.expect(&TokenKind::In)?;
            let iter = self.nested(Self::parse_or)?;

            let mut conditions = Vec::new();
            while self.check(&TokenKind::If) {
                self.advance();
                conditions.push(self.nested(Self::parse_or)?);
            }

            generators.push(Generator {
                target,
                iter,
                conditions,
            });
        }

        Ok(generators)
    }

    /// Parse `a`, `a, b` or `(a, (b, c))`
    fn parse_target_list(&mut self) -> ParseResult<Target> {
        let first = self.parse_target()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }

        let mut items = vec![first];
        while self.check(&TokenKind::Comma) {
            self.advance();
            if self.check(&TokenKind::In)
                || self.check(&TokenKind::RightParen)
                || self.check(&TokenKind::RightBracket)
            {
                break;
            }
            items.push(self.parse_target()?);
        }
        Ok(Target::Tuple(items))
    }

    fn parse_target(&mut self) -> ParseResult<Target> {
        let closing = if self.check(&TokenKind::LeftParen) {
            TokenKind::RightParen
        } else if self.check(&TokenKind::LeftBracket) {
            TokenKind::RightBracket
        } else {
            return Ok(Target::Name(self.parse_identifier()?));
        };

        self.advance();
        let inner = self.nested(Self::parse_target_list)?;
        self.expect(&closing)?;
        Ok(inner)
    }

    fn parse_identifier(&mut self) -> ParseResult<String> {
        if let TokenKind::Identifier(name) = &self.current().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error_here(
                ParseErrorKind::Syntax,
                format!("expected identifier, found {}", self.current().kind.describe()),
            ))
        }
    }

    // Helper methods

    fn current(&self) -> &Token {
        &self.tokens[self.position]
    }

    fn peek_is(&self, kind: &TokenKind) -> bool {
        self.tokens
            .get(self.position + 1)
            .is_some_and(|t| std::mem::discriminant(&t.kind) == std::mem::discriminant(kind))
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.position += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current().kind) == std::mem::discriminant(kind)
    }

    fn check_identifier(&self) -> bool {
        matches!(self.current().kind, TokenKind::Identifier(_))
    }

    fn expect(&mut self, kind: &TokenKind) -> ParseResult<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_here(
                ParseErrorKind::Syntax,
                format!(
                    "expected {}, found {}",
                    kind.describe(),
                    self.current().kind.describe()
                ),
            ))
        }
    }

    /// Run a parse function one recursion level deeper
    fn nested<T>(&mut self, f: ParseFn<T>) -> ParseResult<T> {
        if self.nesting >= MAX_NESTING || self.depth >= MAX_DEPTH {
            return Err(self.too_deep());
        }
        self.nesting += 1;
        self.depth += 1;
        let result = f(self);
        self.nesting -= 1;
        self.depth -= 1;
        result
    }

    fn too_deep(&self) -> ParseError {
        self.error_here(ParseErrorKind::TooDeep, "expression is nested too deeply")
    }

    fn unexpected(&self) -> ParseError {
        self.error_here(
            ParseErrorKind::Syntax,
            format!("unexpected {}", self.current().kind.describe()),
        )
    }

    fn error_here(&self, kind: ParseErrorKind, message: impl Into<String>) -> ParseError {
        self.error_at(self.position, kind, message)
    }

    fn error_at(&self, position: usize, kind: ParseErrorKind, message: impl Into<String>) -> ParseError {
        let token = &self.tokens[position.min(self.tokens.len() - 1)];
        ParseError::new(kind, message, token.span.start.line, token.span.start.column)
    }

    /// Mark the current position to start tracking a span
    fn mark_position(&self) -> usize {
        self.position
    }

    /// Create a SourceSpan from a marked position to the previous token
    /// (the last token that was consumed before the current position)
    fn span_from(&self, start_pos: usize) -> Option<SourceSpan> {
        let start_token = self.tokens.get(start_pos)?;
        let end_token = self.tokens.get(self.position.saturating_sub(1))?;

        Some(SourceSpan {
            line: start_token.span.start.line,
            column: start_token.span.start.column,
            offset: start_token.span.start.offset,
            length: end_token
                .span
                .end
                .offset
                .saturating_sub(start_token.span.start.offset),
        })
    }

    /// Get the span of the current token
    fn current_span(&self) -> Option<SourceSpan> {
        self.tokens.get(self.position).map(|t| SourceSpan::from(&t.span))
    }
}

/// Append text, merging with a preceding text part
fn push_literal(parts: &mut Vec<FormatPart>, text: String) {
    if let Some(FormatPart::Literal(last)) = parts.last_mut() {
        last.push_str(&text);
    } else {
        parts.push(FormatPart::Literal(text));
    }
}

/// Parse expression text using the token-based parser
pub fn parse(source: &str) -> Result<Expression, ParseError> {
    let tokens = crate::lexer::tokenize(source)?;
    let mut parser = TokenParser::new(tokens);
    parser.parse_single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strip(expr: &Expression) -> String {
        // Structural rendering without spans
        match expr {
            Expression::Literal { value, .. } => value.repr(),
            Expression::Name { name, .. } => name.clone(),
            Expression::UnaryOp { op, operand, .. } => format!("({} {})", op, strip(operand)),
            Expression::BinaryOp { op, left, right, .. } => {
                format!("({} {} {})", strip(left), op, strip(right))
            }
            other => format!("{:?}", other.kind()),
        }
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(strip(&expr), "(1 + (2 * 3))");
    }

    #[test]
    fn test_power_is_right_associative() {
        let expr = parse("2 ** 3 ** 2").unwrap();
        assert_eq!(strip(&expr), "(2 ** (3 ** 2))");
    }

    #[test]
    fn test_unary_minus_binds_looser_than_power() {
        let expr = parse("-2 ** 2").unwrap();
        assert_eq!(strip(&expr), "(- (2 ** 2))");
        let expr = parse("2 ** -1").unwrap();
        assert_eq!(strip(&expr), "(2 ** (- 1))");
    }

    #[test]
    fn test_parse_comparison_chain() {
        let expr = parse("1 < 2 not in x is not None").unwrap();
        match expr {
            Expression::Compare { comparisons, .. } => {
                let ops: Vec<CompareOperator> = comparisons.iter().map(|(op, _)| *op).collect();
                assert_eq!(
                    ops,
                    vec![
                        CompareOperator::LessThan,
                        CompareOperator::NotIn,
                        CompareOperator::IsNot
                    ]
                );
            }
            other => panic!("Expected comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_bool_chain_is_flat() {
        let expr = parse("a or b or c").unwrap();
        assert!(matches!(expr, Expression::BoolOp { op: LogicalOperator::Or, ref values, .. } if values.len() == 3));
    }

    #[test]
    fn test_parse_nested_conditional() {
        let expr = parse("'a' if x else 'b' if y else 'c'").unwrap();
        match expr {
            Expression::Conditional { else_expr, .. } => {
                assert!(matches!(*else_expr, Expression::Conditional { .. }));
            }
            other => panic!("Expected conditional, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_calls_and_methods() {
        assert!(matches!(parse("f(1, 2)").unwrap(), Expression::FunctionCall { ref args, .. } if args.len() == 2));
        assert!(matches!(
            parse("'x'.upper()").unwrap(),
            Expression::MethodCall { ref method, .. } if method == "upper"
        ));
        assert!(matches!(
            parse("sum(x for x in y)").unwrap(),
            Expression::FunctionCall { ref args, .. }
                if matches!(args[0], Expression::Comprehension { kind: ComprehensionKind::Generator, .. })
        ));
    }

    #[test]
    fn test_parse_slices() {
        assert!(matches!(parse("s[::-1]").unwrap(), Expression::Slice { start: None, end: None, step: Some(_), .. }));
        assert!(matches!(parse("s[1:]").unwrap(), Expression::Slice { start: Some(_), end: None, step: None, .. }));
        assert!(matches!(parse("s[0]").unwrap(), Expression::Index { .. }));
    }

    #[test]
    fn test_parse_collections() {
        assert!(matches!(parse("()").unwrap(), Expression::Tuple { ref elements, .. } if elements.is_empty()));
        assert!(matches!(parse("(1,)").unwrap(), Expression::Tuple { ref elements, .. } if elements.len() == 1));
        assert!(matches!(parse("(1)").unwrap(), Expression::Literal { .. }));
        assert!(matches!(parse("{}").unwrap(), Expression::Map { .. }));
        assert!(matches!(parse("{1, 2}").unwrap(), Expression::Set { .. }));
        assert!(matches!(parse("{'a': 1}").unwrap(), Expression::Map { ref entries, .. } if entries.len() == 1));
        assert!(matches!(parse("1, 2").unwrap(), Expression::Tuple { .. }));
    }

    #[test]
    fn test_parse_comprehension_targets() {
        let expr = parse("[a + b for a, (b, c) in pairs if a if b for d in e]").unwrap();
        match expr {
            Expression::Comprehension { generators, .. } => {
                assert_eq!(generators.len(), 2);
                assert_eq!(generators[0].target.names(), vec!["a", "b", "c"]);
                assert_eq!(generators[0].conditions.len(), 2);
            }
            other => panic!("Expected comprehension, got {:?}", other),
        }
        assert!(matches!(parse("{k: v for k, v in items}").unwrap(), Expression::DictComprehension { .. }));
    }

    #[test]
    fn test_multiple_expressions_rejected() {
        let err = parse("1; 2").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MultipleExpressions);
        let err = parse("1\n2").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MultipleExpressions);
        assert!(parse("1;").is_ok());
        assert!(parse("1\n").is_ok());
    }

    #[test]
    fn test_second_line_never_continues_the_first() {
        // Both would be valid continuations if the break were plain whitespace
        let err = parse("1\n-1").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MultipleExpressions);
        assert_eq!(err.line, 2);

        let err = parse("f\n(2)").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MultipleExpressions);

        let err = parse("x\n[0]").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MultipleExpressions);

        let err = parse("1; \n 2").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MultipleExpressions);
    }

    #[test]
    fn test_line_breaks_inside_brackets_continue() {
        assert_eq!(strip(&parse("(1 +\n 2)").unwrap()), "(1 + 2)");
        assert_eq!(strip(&parse("1 + \\\n 2").unwrap()), "(1 + 2)");
        assert!(matches!(parse("[1,\n 2,\n]").unwrap(), Expression::List { ref elements, .. } if elements.len() == 2));
        assert!(parse("f(1,\n  2)").is_ok());

        // An operator left dangling at the end of a line does not reach the next one
        assert_eq!(parse("1 +\n2").unwrap_err().kind, ParseErrorKind::Syntax);
    }

    #[test]
    fn test_unsupported_constructs() {
        assert_eq!(parse("lambda: 1").unwrap_err().kind, ParseErrorKind::Unsupported);
        assert_eq!(parse("f(x=1)").unwrap_err().kind, ParseErrorKind::Unsupported);
        assert_eq!(parse("(1)(2)").unwrap_err().kind, ParseErrorKind::Unsupported);
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(parse("").unwrap_err().kind, ParseErrorKind::Syntax);
        assert_eq!(parse("1 +").unwrap_err().kind, ParseErrorKind::Syntax);
        assert_eq!(parse("a = 1").unwrap_err().kind, ParseErrorKind::Syntax);
        let err = parse("(1 + 2").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let source = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
        assert_eq!(parse(&source).unwrap_err().kind, ParseErrorKind::TooDeep);

        let long_sum = vec!["1"; 500].join(" + ");
        assert_eq!(parse(&long_sum).unwrap_err().kind, ParseErrorKind::TooDeep);

        let nested = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert!(parse(&nested).is_ok());
    }

    #[test]
    fn test_parse_format_strings() {
        match parse(r#"f"a {x!r:>5} {{b}} {y + 1}""#).unwrap() {
            Expression::FormattedString { parts, .. } => {
                assert_eq!(parts.len(), 4);
                assert_eq!(parts[0], FormatPart::Literal("a ".to_string()));
                assert!(matches!(
                    &parts[1],
                    FormatPart::Field { conversion: Some(Conversion::Repr), spec, .. } if spec == ">5"
                ));
                assert_eq!(parts[2], FormatPart::Literal(" {b} ".to_string()));
                assert!(matches!(&parts[3], FormatPart::Field { value: Expression::BinaryOp { .. }, .. }));
            }
            other => panic!("Expected formatted string, got {:?}", other),
        }

        // Colons and bangs inside brackets belong to the expression
        assert!(parse("f'{d[1:2]}'").is_ok());
        assert!(parse("f'{a != b}'").is_ok());
        assert!(parse("f'{\"}\"}'").is_ok());

        // Plain and formatted literals concatenate
        match parse("'x' f'{1}' 'y'").unwrap() {
            Expression::FormattedString { parts, .. } => assert_eq!(parts.len(), 3),
            other => panic!("Expected formatted string, got {:?}", other),
        }
        assert!(matches!(parse("'a' 'b'").unwrap(), Expression::Literal { .. }));
    }

    #[test]
    fn test_format_string_errors() {
        assert_eq!(parse("f'{}'").unwrap_err().kind, ParseErrorKind::Syntax);
        assert_eq!(parse("f'{1'").unwrap_err().kind, ParseErrorKind::Syntax);
        assert_eq!(parse("f'}'").unwrap_err().kind, ParseErrorKind::Syntax);
        assert_eq!(parse("f'{1!x}'").unwrap_err().kind, ParseErrorKind::Syntax);
        assert_eq!(parse("f'{1 +}'").unwrap_err().kind, ParseErrorKind::Syntax);
        assert_eq!(parse("f'{1:{w}}'").unwrap_err().kind, ParseErrorKind::Unsupported);
        assert_eq!(parse("f'{lambda: 1}'").unwrap_err().kind, ParseErrorKind::Unsupported);

        let err = parse("1 +\\\n  f'{)}'").unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
    }

    #[test]
    fn test_generator_clauses_are_capped() {
        let source = format!("[1 {}]", "for a in [1] ".repeat(9_000));
        assert_eq!(parse(&source).unwrap_err().kind, ParseErrorKind::TooDeep);

        let source = format!("[1 {}]", "for a in [1] ".repeat(50));
        match parse(&source).unwrap() {
            Expression::Comprehension { generators, .. } => assert_eq!(generators.len(), 50),
            other => panic!("Expected comprehension, got {:?}", other),
        }
    }

    #[test]
    fn test_large_input_parses_in_linear_time() {
        let source = "1,".repeat(20_000);
        let started = std::time::Instant::now();
        match parse(&source).unwrap() {
            Expression::Tuple { elements, .. } => assert_eq!(elements.len(), 20_000),
            other => panic!("Expected tuple, got {:?}", other),
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_spans_are_recorded() {
        let expr = parse("  foo + 1").unwrap();
        let span = expr.span().unwrap();
        assert_eq!(span.column, 3);
        assert_eq!(span.length, 7);
    }
}
