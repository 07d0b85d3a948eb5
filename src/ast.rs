//! Abstract Syntax Tree definitions for sandeval expressions

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source location information for an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
    pub length: usize,
}

impl From<&crate::lexer::Span> for SourceSpan {
    fn from(span: &crate::lexer::Span) -> Self {
        SourceSpan {
            line: span.start.line,
            column: span.start.column,
            offset: span.start.offset,
            length: span.text.len(),
        }
    }
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Literal value
    Literal {
        value: Value,
        span: Option<SourceSpan>,
    },

    /// Name reference
    Name {
        name: String,
        span: Option<SourceSpan>,
    },

    /// Unary operation: `-x`, `not x`
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
        span: Option<SourceSpan>,
    },

    /// Binary operation: `a + b`
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
        span: Option<SourceSpan>,
    },

    /// Short-circuit chain: `a and b and c`
    BoolOp {
        op: LogicalOperator,
        values: Vec<Expression>,
        span: Option<SourceSpan>,
    },

    /// Comparison chain: `a < b <= c`
    Compare {
        left: Box<Expression>,
        comparisons: Vec<(CompareOperator, Expression)>,
        span: Option<SourceSpan>,
    },

    /// Conditional: `then_expr if condition else else_expr`
    Conditional {
        condition: Box<Expression>,
        then_expr: Box<Expression>,
        else_expr: Box<Expression>,
        span: Option<SourceSpan>,
    },

    /// Function call: `name(args)`
    FunctionCall {
        name: String,
        args: Vec<Expression>,
        span: Option<SourceSpan>,
    },

    /// Method call: `obj.method(args)`
    MethodCall {
        object: Box<Expression>,
        method: String,
        args: Vec<Expression>,
        span: Option<SourceSpan>,
    },

    /// Member access: `obj.field`
    MemberAccess {
        object: Box<Expression>,
        field: String,
        span: Option<SourceSpan>,
    },

    /// Index access: `list[0]`
    Index {
        object: Box<Expression>,
        index: Box<Expression>,
        span: Option<SourceSpan>,
    },

    /// Slice: `list[start:end:step]`
    Slice {
        object: Box<Expression>,
        start: Option<Box<Expression>>,
        end: Option<Box<Expression>>,
        step: Option<Box<Expression>>,
        span: Option<SourceSpan>,
    },

    /// List literal: `[1, 2, 3]`
    List {
        elements: Vec<Expression>,
        span: Option<SourceSpan>,
    },

    /// Tuple literal: `(1, 2)`
    Tuple {
        elements: Vec<Expression>,
        span: Option<SourceSpan>,
    },

    /// Set literal: `{1, 2}`
    Set {
        elements: Vec<Expression>,
        span: Option<SourceSpan>,
    },

    /// Mapping literal: `{"a": 1}`
    Map {
        entries: Vec<(Expression, Expression)>,
        span: Option<SourceSpan>,
    },

    /// List, set or generator comprehension: `[x * 2 for x in xs if x > 0]`
    Comprehension {
        kind: ComprehensionKind,
        element: Box<Expression>,
        generators: Vec<Generator>,
        span: Option<SourceSpan>,
    },

    /// Mapping comprehension: `{k: v for k, v in pairs}`
    DictComprehension {
        key: Box<Expression>,
        value: Box<Expression>,
        generators: Vec<Generator>,
        span: Option<SourceSpan>,
    },

    /// Formatted string: `f"total: {price * qty:.2f}"`
    FormattedString {
        parts: Vec<FormatPart>,
        span: Option<SourceSpan>,
    },
}

impl Expression {
    /// Get the span of this expression
    pub fn span(&self) -> Option<&SourceSpan> {
        match self {
            Expression::Literal { span, .. }
            | Expression::Name { span, .. }
            | Expression::UnaryOp { span, .. }
            | Expression::BinaryOp { span, .. }
            | Expression::BoolOp { span, .. }
            | Expression::Compare { span, .. }
            | Expression::Conditional { span, .. }
            | Expression::FunctionCall { span, .. }
            | Expression::MethodCall { span, .. }
            | Expression::MemberAccess { span, .. }
            | Expression::Index { span, .. }
            | Expression::Slice { span, .. }
            | Expression::List { span, .. }
            | Expression::Tuple { span, .. }
            | Expression::Set { span, .. }
            | Expression::Map { span, .. }
            | Expression::Comprehension { span, .. }
            | Expression::DictComprehension { span, .. }
            | Expression::FormattedString { span, .. } => span.as_ref(),
        }
    }

    /// The node kind tag used by the evaluator's enabled-handler set
    pub fn kind(&self) -> NodeKind {
        match self {
            Expression::Literal { .. } => NodeKind::Literal,
            Expression::Name { .. } => NodeKind::Name,
            Expression::UnaryOp { .. } => NodeKind::UnaryOp,
            Expression::BinaryOp { .. } => NodeKind::BinaryOp,
            Expression::BoolOp { .. } => NodeKind::BoolOp,
            Expression::Compare { .. } => NodeKind::Compare,
            Expression::Conditional { .. } => NodeKind::Conditional,
            Expression::FunctionCall { .. } => NodeKind::Call,
            Expression::MethodCall { .. } => NodeKind::MethodCall,
            Expression::MemberAccess { .. } => NodeKind::Attribute,
            Expression::Index { .. } => NodeKind::Subscript,
            Expression::Slice { .. } => NodeKind::Slice,
            Expression::List { .. } => NodeKind::List,
            Expression::Tuple { .. } => NodeKind::Tuple,
            Expression::Set { .. } => NodeKind::Set,
            Expression::Map { .. } => NodeKind::Map,
            Expression::Comprehension { .. } => NodeKind::Comprehension,
            Expression::DictComprehension { .. } => NodeKind::DictComprehension,
            Expression::FormattedString { .. } => NodeKind::FormattedString,
        }
    }

    /// Shorthand for a literal without a span
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal {
            value: value.into(),
            span: None,
        }
    }

    /// Shorthand for a name reference without a span
    pub fn name(name: impl Into<String>) -> Self {
        Expression::Name {
            name: name.into(),
            span: None,
        }
    }
}

/// One `for target in iter if cond...` clause of a comprehension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    pub target: Target,
    pub iter: Expression,
    pub conditions: Vec<Expression>,
}

/// A piece of a formatted string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FormatPart {
    /// Text copied as-is, escapes and `{{ }}` already resolved
    Literal(String),
    /// `{value!conversion:spec}`
    Field {
        value: Expression,
        conversion: Option<Conversion>,
        spec: String,
    },
}

/// Conversion applied to a replacement field before formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Conversion {
    /// `!s`
    Str,
    /// `!r` and `!a`
    Repr,
}

/// Loop variable binding, possibly unpacking nested tuples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Target {
    Name(String),
    Tuple(Vec<Target>),
}

impl Target {
    /// All names bound by this target, left to right
    pub fn names(&self) -> Vec<&str> {
        match self {
            Target::Name(name) => vec![name.as_str()],
            Target::Tuple(items) => items.iter().flat_map(|t| t.names()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComprehensionKind {
    List,
    Set,
    Generator,
}

/// Closed set of node kinds the evaluator dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Literal,
    Name,
    UnaryOp,
    BinaryOp,
    BoolOp,
    Compare,
    Conditional,
    Call,
    MethodCall,
    Attribute,
    Subscript,
    Slice,
    List,
    Tuple,
    Set,
    Map,
    Comprehension,
    DictComprehension,
    FormattedString,
}

impl NodeKind {
    /// Kinds handled by the basic evaluator
    pub const BASIC: &'static [NodeKind] = &[
        NodeKind::Literal,
        NodeKind::Name,
        NodeKind::UnaryOp,
        NodeKind::BinaryOp,
        NodeKind::BoolOp,
        NodeKind::Compare,
        NodeKind::Conditional,
        NodeKind::Call,
        NodeKind::MethodCall,
        NodeKind::Attribute,
        NodeKind::Subscript,
        NodeKind::Slice,
        NodeKind::FormattedString,
    ];

    /// Kinds added by compound-type mode
    pub const COMPOUND: &'static [NodeKind] = &[
        NodeKind::List,
        NodeKind::Tuple,
        NodeKind::Set,
        NodeKind::Map,
        NodeKind::Comprehension,
        NodeKind::DictComprehension,
    ];
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Literal => "literal",
            NodeKind::Name => "name",
            NodeKind::UnaryOp => "unary operation",
            NodeKind::BinaryOp => "binary operation",
            NodeKind::BoolOp => "boolean operation",
            NodeKind::Compare => "comparison",
            NodeKind::Conditional => "conditional expression",
            NodeKind::Call => "function call",
            NodeKind::MethodCall => "method call",
            NodeKind::Attribute => "attribute access",
            NodeKind::Subscript => "subscript",
            NodeKind::Slice => "slice",
            NodeKind::List => "list literal",
            NodeKind::Tuple => "tuple literal",
            NodeKind::Set => "set literal",
            NodeKind::Map => "dict literal",
            NodeKind::Comprehension => "comprehension",
            NodeKind::DictComprehension => "dict comprehension",
            NodeKind::FormattedString => "formatted string",
        };
        write!(f, "{}", name)
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    // Arithmetic
    Add,         // +
    Subtract,    // -
    Multiply,    // *
    Divide,      // /
    FloorDivide, // //
    Modulo,      // %
    Power,       // **

    // Bitwise
    BitAnd,     // &
    BitOr,      // |
    BitXor,     // ^
    LeftShift,  // <<
    RightShift, // >>
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::FloorDivide => "//",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Power => "**",
            BinaryOperator::BitAnd => "&",
            BinaryOperator::BitOr => "|",
            BinaryOperator::BitXor => "^",
            BinaryOperator::LeftShift => "<<",
            BinaryOperator::RightShift => ">>",
        };
        write!(f, "{}", symbol)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    Not,    // not
    Negate, // -
    Plus,   // +
    Invert, // ~
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            UnaryOperator::Not => "not",
            UnaryOperator::Negate => "-",
            UnaryOperator::Plus => "+",
            UnaryOperator::Invert => "~",
        };
        write!(f, "{}", symbol)
    }
}

/// Comparison operators, chained left to right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOperator {
    Equal,              // ==
    NotEqual,           // !=
    LessThan,           // <
    LessThanOrEqual,    // <=
    GreaterThan,        // >
    GreaterThanOrEqual, // >=
    In,                 // in
    NotIn,              // not in
    Is,                 // is
    IsNot,              // is not
}

impl fmt::Display for CompareOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOperator::Equal => "==",
            CompareOperator::NotEqual => "!=",
            CompareOperator::LessThan => "<",
            CompareOperator::LessThanOrEqual => "<=",
            CompareOperator::GreaterThan => ">",
            CompareOperator::GreaterThanOrEqual => ">=",
            CompareOperator::In => "in",
            CompareOperator::NotIn => "not in",
            CompareOperator::Is => "is",
            CompareOperator::IsNot => "is not",
        };
        write!(f, "{}", symbol)
    }
}

/// Short-circuit operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOperator {
    And, // and
    Or,  // or
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOperator::And => write!(f, "and"),
            LogicalOperator::Or => write!(f, "or"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_expression() {
        let expr = Expression::BinaryOp {
            op: BinaryOperator::Add,
            left: Box::new(Expression::literal(1)),
            right: Box::new(Expression::name("x")),
            span: None,
        };
        assert_eq!(expr.kind(), NodeKind::BinaryOp);
        assert_eq!(Expression::name("x").kind(), NodeKind::Name);
    }

    #[test]
    fn test_basic_and_compound_kinds_are_disjoint() {
        for kind in NodeKind::COMPOUND {
            assert!(!NodeKind::BASIC.contains(kind));
        }
    }

    #[test]
    fn test_target_names() {
        let target = Target::Tuple(vec![
            Target::Name("a".to_string()),
            Target::Tuple(vec![Target::Name("b".to_string()), Target::Name("c".to_string())]),
        ]);
        assert_eq!(target.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ast_round_trips_through_json() {
        let expr = Expression::Compare {
            left: Box::new(Expression::literal(1)),
            comparisons: vec![(CompareOperator::LessThan, Expression::name("x"))],
            span: None,
        };
        let json = serde_json::to_string(&expr).unwrap();
        let back: Expression = serde_json::from_str(&json).unwrap();
        assert_eq!(expr, back);
    }
}
