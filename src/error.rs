//! Error types and formatting for sandeval
//!
//! Every failure of an evaluation is reported as exactly one [`EvalError`].
//! Callers can match a specific kind or treat the enum as the common base.

use colored::Colorize;
use thiserror::Error;

/// Result alias used throughout the evaluator
pub type EvalResult<T> = Result<T, EvalError>;

/// The closed error taxonomy of an evaluation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("name '{name}' is not defined")]
    NameNotDefined { name: String },

    #[error("function '{name}' is not defined")]
    FunctionNotDefined { name: String },

    #[error("feature not available: {0}")]
    FeatureNotAvailable(String),

    #[error("number too high: {0}")]
    NumberTooHigh(String),

    #[error("iterable too long: {0}")]
    IterableTooLong(String),

    #[error("comprehension too long: more than {limit} iterations")]
    ComprehensionTooLong { limit: usize },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("malformed expression: {0}")]
    Malformed(String),

    #[error("syntax error: {0}")]
    Syntax(ParseError),

    #[error("attribute '{attr}' does not exist")]
    AttributeDoesNotExist { attr: String },

    #[error("too many nodes: evaluation visited more than {limit}")]
    TooManyNodes { limit: usize },

    #[error("expression nested too deeply: more than {limit} levels")]
    NestingTooDeep { limit: usize },

    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    #[error("lookup error: {0}")]
    Lookup(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl EvalError {
    /// True for errors raised by a resource guard
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self,
            EvalError::NumberTooHigh(_)
                | EvalError::IterableTooLong(_)
                | EvalError::ComprehensionTooLong { .. }
                | EvalError::TooManyNodes { .. }
                | EvalError::NestingTooDeep { .. }
        )
    }

    /// Short name of the error kind
    pub fn kind_name(&self) -> &'static str {
        match self {
            EvalError::NameNotDefined { .. } => "NameNotDefined",
            EvalError::FunctionNotDefined { .. } => "FunctionNotDefined",
            EvalError::FeatureNotAvailable(_) => "FeatureNotAvailable",
            EvalError::NumberTooHigh(_) => "NumberTooHigh",
            EvalError::IterableTooLong(_) => "IterableTooLong",
            EvalError::ComprehensionTooLong { .. } => "ComprehensionTooLong",
            EvalError::TypeMismatch(_) => "TypeMismatch",
            EvalError::Malformed(_) => "Malformed",
            EvalError::Syntax(_) => "SyntaxError",
            EvalError::AttributeDoesNotExist { .. } => "AttributeDoesNotExist",
            EvalError::TooManyNodes { .. } => "TooManyNodes",
            EvalError::NestingTooDeep { .. } => "NestingTooDeep",
            EvalError::Arithmetic(_) => "ArithmeticError",
            EvalError::Lookup(_) => "LookupError",
            EvalError::InvalidArgument(_) => "InvalidArgument",
        }
    }
}

/// What went wrong while turning text into an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Text does not follow the grammar
    Syntax,
    /// Valid syntax for a construct the evaluator does not offer (`lambda`, keyword arguments)
    Unsupported,
    /// More than one top-level expression
    MultipleExpressions,
    /// Nesting beyond the parser's recursion limit
    TooDeep,
}

/// A located error from the lexer or parser
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} (line {line}, column {column})")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
            column,
        }
    }
}

impl From<ParseError> for EvalError {
    fn from(error: ParseError) -> Self {
        match error.kind {
            ParseErrorKind::Unsupported => EvalError::FeatureNotAvailable(error.message),
            ParseErrorKind::MultipleExpressions => EvalError::Malformed(error.message),
            ParseErrorKind::Syntax | ParseErrorKind::TooDeep => EvalError::Syntax(error),
        }
    }
}

/// Format a parse error with context and helpful information
pub fn format_parse_error(error: &ParseError, input: &str) -> String {
    let mut output = String::new();
    let (line, col) = (error.line, error.column);

    // Error header
    output.push_str(&format!(
        "{} {}\n",
        "Parse error:".red().bold(),
        error.message
    ));

    // Location information
    output.push_str(&format!(
        "  {} {}:{}\n",
        "-->".blue().bold(),
        "input".dimmed(),
        format!("{}:{}", line, col).cyan()
    ));

    // Show the problematic line with context
    let lines: Vec<&str> = input.lines().collect();
    if line > 0 && line <= lines.len() {
        let line_idx = line - 1;

        output.push_str(&format!("   {}\n", "|".blue()));

        if line_idx > 0 {
            output.push_str(&format!(
                " {} | {}\n",
                format!("{:3}", line - 1).blue().dimmed(),
                lines[line_idx - 1].dimmed()
            ));
        }

        output.push_str(&format!(
            " {} | {}\n",
            format!("{:3}", line).blue().bold(),
            lines[line_idx]
        ));

        let indicator = format!("{}^", " ".repeat(col.saturating_sub(1) + 2));
        output.push_str(&format!("   {} {}\n", "|".blue(), indicator.red().bold()));

        if line_idx + 1 < lines.len() {
            output.push_str(&format!(
                " {} | {}\n",
                format!("{:3}", line + 1).blue().dimmed(),
                lines[line_idx + 1].dimmed()
            ));
        }

        output.push_str(&format!("   {}\n", "|".blue()));
    }

    output.push_str(&get_parse_hint(lines.get(line.saturating_sub(1))));

    output
}

/// Format any evaluation error for terminal output
pub fn format_eval_error(error: &EvalError, input: &str) -> String {
    if let EvalError::Syntax(parse_error) = error {
        return format_parse_error(parse_error, input);
    }

    let mut output = format!(
        "{} {}\n",
        format!("{}:", error.kind_name()).red().bold(),
        error
    );
    if let Some(hint) = get_eval_hint(error) {
        output.push_str(&format!("  {} {}\n", "Hint:".yellow().bold(), hint));
    }
    output
}

/// Get a helpful hint based on the offending line
fn get_parse_hint(line: Option<&&str>) -> String {
    let Some(line_text) = line else {
        return String::new();
    };
    let line = line_text.trim();

    let hint = if line.matches('(').count() > line.matches(')').count() {
        "Missing closing parenthesis ')'"
    } else if line.matches('[').count() > line.matches(']').count() {
        "Missing closing bracket ']'"
    } else if line.contains(" = ") {
        "Assignments are not expressions; use '==' for equality comparison"
    } else if line.contains("&&") || line.contains("||") {
        "Use 'and' / 'or' for boolean logic"
    } else {
        return String::new();
    };

    format!("\n  {} {}\n", "Hint:".yellow().bold(), hint)
}

fn get_eval_hint(error: &EvalError) -> Option<&'static str> {
    match error {
        EvalError::NameNotDefined { .. } => Some("pass the name in the names table, e.g. --names '{\"x\": 1}'"),
        EvalError::FeatureNotAvailable(_) => {
            Some("collection literals and comprehensions need compound mode (--compound)")
        }
        EvalError::NumberTooHigh(_) | EvalError::IterableTooLong(_) => {
            Some("resource limits can be raised in the [limits] section of the config file")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_kind_mapping() {
        let unsupported = ParseError::new(ParseErrorKind::Unsupported, "lambda", 1, 1);
        assert!(matches!(
            EvalError::from(unsupported),
            EvalError::FeatureNotAvailable(_)
        ));

        let multiple = ParseError::new(ParseErrorKind::MultipleExpressions, "two", 1, 3);
        assert!(matches!(EvalError::from(multiple), EvalError::Malformed(_)));

        let syntax = ParseError::new(ParseErrorKind::Syntax, "bad", 2, 4);
        assert!(matches!(EvalError::from(syntax), EvalError::Syntax(_)));
    }

    #[test]
    fn test_resource_limit_grouping() {
        assert!(EvalError::NumberTooHigh("x".into()).is_resource_limit());
        assert!(EvalError::ComprehensionTooLong { limit: 3 }.is_resource_limit());
        assert!(!EvalError::NameNotDefined { name: "x".into() }.is_resource_limit());
    }

    #[test]
    fn test_format_parse_error_points_at_column() {
        colored::control::set_override(false);
        let error = ParseError::new(ParseErrorKind::Syntax, "unexpected token ')'", 1, 5);
        let formatted = format_parse_error(&error, "1 + )");
        assert!(formatted.contains("Parse error: unexpected token ')'"));
        assert!(formatted.contains("input:1:5"));
        assert!(formatted.contains("    ^"));
    }

    #[test]
    fn test_format_eval_error_has_kind_and_hint() {
        colored::control::set_override(false);
        let formatted = format_eval_error(&EvalError::NameNotDefined { name: "x".into() }, "x");
        assert!(formatted.starts_with("NameNotDefined: name 'x' is not defined"));
        assert!(formatted.contains("Hint:"));
    }
}
