//! sandeval - sandboxed expression evaluator
//!
//! Evaluates small Python-flavoured expressions supplied by untrusted users.
//! Only the names, functions, operators and attributes the host allows are
//! reachable, and every evaluation is bounded in exponent size, string and
//! sequence length, comprehension iterations, node count and depth.
//!
//! ```
//! use sandeval::{simple_eval, simple_eval_with, EvalContext, Value};
//!
//! assert_eq!(simple_eval("21 + 21").unwrap(), Value::Int(42));
//!
//! let ctx = EvalContext::new().with_name("x", 3);
//! assert_eq!(simple_eval_with("x * 2", ctx).unwrap(), Value::Int(6));
//! ```

pub mod ast;
pub mod cache;
mod compound;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod format;
pub mod functions;
pub mod governor;
pub mod lexer;
pub mod methods;
pub mod operators;
pub mod token_parser;
pub mod value;

// CLI-only modules
#[cfg(feature = "cli")]
pub mod repl;

use lazy_static::lazy_static;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// Re-export commonly used types
pub use ast::{Expression, NodeKind};
pub use cache::ExpressionCache;
pub use config::{EvalConfig, Limits};
pub use context::{AttributePolicy, EvalContext, Names};
pub use error::{EvalError, EvalResult, ParseError};
pub use evaluator::Evaluator;
pub use functions::{FunctionTable, HostFunction};
pub use lexer::{Lexer, Token, TokenKind};
pub use operators::OperatorTable;
pub use token_parser::TokenParser;
pub use value::Value;

// Global parse cache (lazy initialized)
lazy_static! {
    static ref GLOBAL_CACHE: Mutex<Option<ExpressionCache>> =
        Mutex::new(Some(ExpressionCache::default()));
}

fn global_cache() -> MutexGuard<'static, Option<ExpressionCache>> {
    GLOBAL_CACHE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Enable the global parse cache (enabled by default)
pub fn enable_cache() {
    let mut cache = global_cache();
    if cache.is_none() {
        *cache = Some(ExpressionCache::default());
    }
}

/// Disable the global parse cache; every `parse` call then parses afresh
pub fn disable_cache() {
    *global_cache() = None;
}

/// Clear the global parse cache
pub fn clear_cache() {
    if let Some(cache) = global_cache().as_ref() {
        cache.clear();
    }
}

/// Check if caching is enabled
pub fn is_cache_enabled() -> bool {
    global_cache().is_some()
}

/// Parse one expression, going through the global parse cache when enabled
pub fn parse(source: &str) -> Result<Arc<Expression>, ParseError> {
    // Clone the handle so the global lock is not held while parsing.
    let cache = global_cache().clone();
    match cache {
        Some(cache) => cache.get_or_parse(source, token_parser::parse),
        None => token_parser::parse(source).map(Arc::new),
    }
}

/// Evaluate `source` with the default basic-mode context
pub fn simple_eval(source: &str) -> EvalResult<Value> {
    simple_eval_with(source, EvalContext::default())
}

/// Evaluate `source` with a caller-built context
pub fn simple_eval_with(source: &str, ctx: EvalContext) -> EvalResult<Value> {
    Evaluator::with_context(ctx).eval(source)
}

/// sandeval version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_simple_eval() {
        assert_eq!(simple_eval("21 + 21").unwrap(), Value::Int(42));
        assert_eq!(
            simple_eval("x"),
            Err(EvalError::NameNotDefined { name: "x".to_string() })
        );
    }

    #[test]
    fn test_parse_returns_shared_trees() {
        enable_cache();
        let first = parse("1 + 2 * 3").unwrap();
        let second = parse("1 + 2 * 3").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
