//! Evaluator for sandeval expressions
//!
//! A tree walk over [`Expression`]. Every node visit is counted, depth
//! limited and checked against the set of enabled node kinds before the node
//! is dispatched. Collection literals and comprehensions are handled in
//! `compound.rs`.

use crate::ast::{ComprehensionKind, Conversion, Expression, FormatPart, LogicalOperator};
use crate::config::EvalConfig;
use crate::context::{Counters, EvalContext, Names};
use crate::error::{EvalError, EvalResult};
use crate::format;
use crate::functions::HostFunction;
use crate::governor;
use crate::methods;
use crate::value::Value;
use std::collections::HashMap;
use tracing::debug;

/// Evaluator state
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    pub(crate) ctx: EvalContext,
    /// Comprehension-local bindings, innermost last
    pub(crate) scopes: Vec<HashMap<String, Value>>,
    depth: usize,
}

impl Evaluator {
    /// Create a basic-mode evaluator with default names, functions and limits
    pub fn new() -> Self {
        Self::with_context(EvalContext::new())
    }

    /// Create an evaluator with collection literals and comprehensions enabled
    pub fn with_compound_types() -> Self {
        Self::with_context(EvalContext::compound())
    }

    pub fn from_config(config: &EvalConfig) -> Self {
        Self::with_context(EvalContext::from_config(config))
    }

    pub fn with_context(ctx: EvalContext) -> Self {
        Self {
            ctx,
            scopes: Vec::new(),
            depth: 0,
        }
    }

    pub fn context(&self) -> &EvalContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut EvalContext {
        &mut self.ctx
    }

    pub fn into_context(self) -> EvalContext {
        self.ctx
    }

    /// Counters of the most recent evaluation
    pub fn counters(&self) -> Counters {
        self.ctx.counters
    }

    /// Parse `source` (through the global parse cache) and evaluate it
    pub fn eval(&mut self, source: &str) -> EvalResult<Value> {
        let expr = crate::parse(source)?;
        self.evaluate(&expr)
    }

    /// Evaluate a syntax tree
    pub fn evaluate(&mut self, expr: &Expression) -> EvalResult<Value> {
        self.ctx.counters.reset();
        self.scopes.clear();
        self.depth = 0;

        debug!(kind = %expr.kind(), "evaluation started");
        let result = self.eval_node(expr);
        self.scopes.clear();

        match &result {
            Ok(_) => debug!(
                nodes = self.ctx.counters.nodes,
                iterations = self.ctx.counters.comprehension_iterations,
                "evaluation finished"
            ),
            Err(err) => debug!(
                nodes = self.ctx.counters.nodes,
                error = err.kind_name(),
                "evaluation failed"
            ),
        }
        result
    }

    pub(crate) fn eval_node(&mut self, expr: &Expression) -> EvalResult<Value> {
        self.ctx.counters.nodes += 1;
        governor::check_nodes(self.ctx.counters.nodes, &self.ctx.limits)?;

        let kind = expr.kind();
        if !self.ctx.is_enabled(kind) {
            return Err(EvalError::FeatureNotAvailable(format!(
                "{} is not available",
                kind
            )));
        }

        self.descend(|evaluator| evaluator.dispatch(expr))
    }

    /// Run `f` one level deeper, failing once `max_depth` is passed
    pub(crate) fn descend<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> EvalResult<T>,
    ) -> EvalResult<T> {
        self.depth += 1;
        let result = match governor::check_depth(self.depth, &self.ctx.limits) {
            Ok(()) => f(self),
            Err(err) => Err(err),
        };
        self.depth -= 1;
        result
    }

    fn dispatch(&mut self, expr: &Expression) -> EvalResult<Value> {
        match expr {
            Expression::Literal { value, .. } => {
                governor::check_value_length(value, &self.ctx.limits)?;
                Ok(value.clone())
            }

            Expression::Name { name, .. } => self.lookup(name),

            Expression::UnaryOp { op, operand, .. } => {
                let f = self.ctx.operators.unary(*op).ok_or_else(|| {
                    EvalError::FeatureNotAvailable(format!("operator '{}' is not available", op))
                })?;
                let value = self.eval_node(operand)?;
                f(&value)
            }

            Expression::BinaryOp {
                op, left, right, ..
            } => {
                let f = self.ctx.operators.binary(*op).ok_or_else(|| {
                    EvalError::FeatureNotAvailable(format!("operator '{}' is not available", op))
                })?;
                let left = self.eval_node(left)?;
                let right = self.eval_node(right)?;
                let result = f(&left, &right, &self.ctx.limits)?;
                governor::check_value_length(&result, &self.ctx.limits)?;
                Ok(result)
            }

            Expression::BoolOp { op, values, .. } => self.eval_bool_op(*op, values),

            Expression::Compare {
                left, comparisons, ..
            } => {
                if comparisons.is_empty() {
                    return Err(EvalError::Malformed(
                        "comparison without an operator".to_string(),
                    ));
                }

                let mut current = self.eval_node(left)?;
                let mut result = Value::Bool(true);
                for (op, right) in comparisons {
                    let f = self.ctx.operators.compare(*op).ok_or_else(|| {
                        EvalError::FeatureNotAvailable(format!(
                            "operator '{}' is not available",
                            op
                        ))
                    })?;
                    let next = self.eval_node(right)?;
                    result = f(&current, &next)?;
                    if !result.is_truthy() {
                        return Ok(result);
                    }
                    current = next;
                }
                Ok(result)
            }

            Expression::Conditional {
                condition,
                then_expr,
                else_expr,
                ..
            } => {
                if self.eval_node(condition)?.is_truthy() {
                    self.eval_node(then_expr)
                } else {
                    self.eval_node(else_expr)
                }
            }

            Expression::FunctionCall { name, args, .. } => self.call_function(name, args),

            Expression::MethodCall {
                object,
                method,
                args,
                ..
            } => {
                let receiver = self.eval_node(object)?;
                self.check_attribute(method)?;
                let args = self.eval_args(args)?;
                let result = methods::call_method(&receiver, method, &args, &self.ctx.limits)?;
                governor::check_value_length(&result, &self.ctx.limits)?;
                Ok(result)
            }

            Expression::MemberAccess { object, field, .. } => {
                let base = self.eval_node(object)?;
                self.check_attribute(field)?;
                self.member(&base, field)
            }

            Expression::Index { object, index, .. } => {
                let base = self.eval_node(object)?;
                let key = self.eval_node(index)?;
                subscript(&base, &key)
            }

            Expression::Slice {
                object,
                start,
                end,
                step,
                ..
            } => {
                let base = self.eval_node(object)?;
                let start = self.slice_bound(start.as_deref())?;
                let end = self.slice_bound(end.as_deref())?;
                let step = self.slice_bound(step.as_deref())?;
                slice(&base, start, end, step)
            }

            Expression::List { elements, .. } => self.eval_sequence(elements).map(Value::List),
            Expression::Tuple { elements, .. } => self.eval_sequence(elements).map(Value::Tuple),
            Expression::Set { elements, .. } => self.eval_set(elements),
            Expression::Map { entries, .. } => self.eval_map(entries),

            Expression::Comprehension {
                kind,
                element,
                generators,
                ..
            } => {
                let items = self.eval_comprehension(element, generators)?;
                match kind {
                    ComprehensionKind::List | ComprehensionKind::Generator => {
                        Ok(Value::List(items))
                    }
                    ComprehensionKind::Set => {
                        let mut set = indexmap::IndexSet::with_capacity(items.len());
                        for item in items {
                            item.ensure_hashable()?;
                            set.insert(item);
                        }
                        Ok(Value::Set(set))
                    }
                }
            }

            Expression::DictComprehension {
                key,
                value,
                generators,
                ..
            } => self.eval_dict_comprehension(key, value, generators),

            Expression::FormattedString { parts, .. } => self.eval_formatted(parts),
        }
    }

    /// Join the parts of an f-string, checking the running length after each one
    fn eval_formatted(&mut self, parts: &[FormatPart]) -> EvalResult<Value> {
        let mut out = String::new();
        let mut length = 0usize;

        for part in parts {
            let piece = match part {
                FormatPart::Literal(text) => text.clone(),
                FormatPart::Field {
                    value,
                    conversion,
                    spec,
                } => {
                    let value = self.eval_node(value)?;
                    let value = match conversion {
                        Some(Conversion::Repr) => Value::String(value.repr()),
                        Some(Conversion::Str) => Value::String(value.to_string()),
                        None => value,
                    };
                    format::format_value(&value, spec, &self.ctx.limits)?
                }
            };

            length = length.saturating_add(piece.chars().count());
            governor::check_length(length, &self.ctx.limits)?;
            out.push_str(&piece);
        }

        Ok(Value::String(out))
    }

    /// Comprehension scopes, then constants, then the names table or resolver
    fn lookup(&self, name: &str) -> EvalResult<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(name) {
                return Ok(value.clone());
            }
        }
        if let Some(value) = self.ctx.constants.get(name) {
            return Ok(value.clone());
        }
        self.ctx.names.resolve(name, &self.ctx)
    }

    fn eval_bool_op(&mut self, op: LogicalOperator, values: &[Expression]) -> EvalResult<Value> {
        if !self.ctx.operators.allows_logical(op) {
            return Err(EvalError::FeatureNotAvailable(format!(
                "operator '{}' is not available",
                op
            )));
        }
        if values.len() < 2 {
            return Err(EvalError::Malformed(format!(
                "'{}' needs at least two operands",
                op
            )));
        }

        let mut last = Value::Null;
        for value in values {
            last = self.eval_node(value)?;
            let decided = match op {
                LogicalOperator::And => !last.is_truthy(),
                LogicalOperator::Or => last.is_truthy(),
            };
            if decided {
                break;
            }
        }
        Ok(last)
    }

    fn eval_args(&mut self, args: &[Expression]) -> EvalResult<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_node(arg)?);
        }
        Ok(values)
    }

    fn call_function(&mut self, name: &str, args: &[Expression]) -> EvalResult<Value> {
        let function = self
            .ctx
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::FunctionNotDefined {
                name: name.to_string(),
            })?;
        let args = self.eval_args(args)?;

        let result = match function {
            HostFunction::Native(f) => f(&args)?,
            HostFunction::WithNames(f) => match &mut self.ctx.names {
                Names::Table(table) => f(table, &args)?,
                Names::Resolver(_) => {
                    return Err(EvalError::FeatureNotAvailable(format!(
                        "function '{}' needs a static names table, but names are resolved dynamically",
                        name
                    )))
                }
            },
        };

        governor::check_value_length(&result, &self.ctx.limits)?;
        Ok(result)
    }

    fn check_attribute(&self, attr: &str) -> EvalResult<()> {
        if self.ctx.attributes.is_denied(attr) {
            debug!(attr, "attribute access denied");
            return Err(EvalError::FeatureNotAvailable(format!(
                "access to attribute '{}' is not allowed",
                attr
            )));
        }
        Ok(())
    }

    fn member(&self, base: &Value, field: &str) -> EvalResult<Value> {
        if self.ctx.attributes.index_fallback {
            if let Value::Map(entries) = base {
                if let Some(value) = entries.get(&Value::String(field.to_string())) {
                    return Ok(value.clone());
                }
            }
        }
        Err(EvalError::AttributeDoesNotExist {
            attr: field.to_string(),
        })
    }

    fn slice_bound(&mut self, bound: Option<&Expression>) -> EvalResult<Option<i64>> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.eval_node(expr)? {
            Value::Null => Ok(None),
            Value::BigInt(b) => Ok(Some(if num_traits::Signed::is_negative(&b) {
                i64::MIN
            } else {
                i64::MAX
            })),
            other => other.as_i64().map(Some).ok_or_else(|| {
                EvalError::TypeMismatch(format!(
                    "slice indices must be integers or None, not '{}'",
                    other.type_name()
                ))
            }),
        }
    }
}

/// `base[key]`
fn subscript(base: &Value, key: &Value) -> EvalResult<Value> {
    match base {
        Value::List(items) | Value::Tuple(items) => {
            let index = sequence_index(base, key, items.len())?;
            Ok(items[index].clone())
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let index = sequence_index(base, key, chars.len())?;
            Ok(Value::String(chars[index].to_string()))
        }
        Value::Map(entries) => {
            key.ensure_hashable()?;
            entries
                .get(key)
                .cloned()
                .ok_or_else(|| EvalError::Lookup(format!("key {} not found", key.repr())))
        }
        other => Err(EvalError::TypeMismatch(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn sequence_index(base: &Value, key: &Value, len: usize) -> EvalResult<usize> {
    let out_of_range = || EvalError::Lookup(format!("{} index out of range", base.type_name()));
    let index = match key {
        Value::BigInt(_) => return Err(out_of_range()),
        other => other.as_i64().ok_or_else(|| {
            EvalError::TypeMismatch(format!(
                "{} indices must be integers, not '{}'",
                base.type_name(),
                other.type_name()
            ))
        })?,
    };

    let len = len as i64;
    let adjusted = if index < 0 { index + len } else { index };
    if (0..len).contains(&adjusted) {
        Ok(adjusted as usize)
    } else {
        Err(out_of_range())
    }
}

/// `base[start:end:step]` with Python's clamping rules
fn slice(base: &Value, start: Option<i64>, end: Option<i64>, step: Option<i64>) -> EvalResult<Value> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(EvalError::InvalidArgument(
            "slice step cannot be zero".to_string(),
        ));
    }

    match base {
        Value::List(items) => Ok(Value::List(pick(items, start, end, step))),
        Value::Tuple(items) => Ok(Value::Tuple(pick(items, start, end, step))),
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::String(pick(&chars, start, end, step).into_iter().collect()))
        }
        other => Err(EvalError::TypeMismatch(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn pick<T: Clone>(items: &[T], start: Option<i64>, end: Option<i64>, step: i64) -> Vec<T> {
    slice_positions(items.len(), start, end, step)
        .into_iter()
        .map(|i| items[i].clone())
        .collect()
}

fn slice_positions(len: usize, start: Option<i64>, end: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i128;
    let step = step as i128;
    let adjust = |bound: Option<i64>, default: i128, low: i128, high: i128| match bound {
        None => default,
        Some(b) => {
            let b = b as i128;
            if b < 0 {
                (b + len).max(low)
            } else {
                b.min(high)
            }
        }
    };

    let (start, end) = if step > 0 {
        (adjust(start, 0, 0, len), adjust(end, len, 0, len))
    } else {
        (adjust(start, len - 1, -1, len - 1), adjust(end, -1, -1, len - 1))
    };

    let mut positions = Vec::new();
    let mut i = start;
    while (step > 0 && i < end) || (step < 0 && i > end) {
        positions.push(i as usize);
        i += step;
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOperator, CompareOperator, NodeKind};
    use crate::config::Limits;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn eval(source: &str) -> EvalResult<Value> {
        Evaluator::new().eval(source)
    }

    #[test]
    fn test_evaluate_literal() {
        let mut evaluator = Evaluator::new();
        let expr = Expression::Literal {
            value: Value::String("hello".to_string()),
            span: None,
        };
        assert_eq!(evaluator.evaluate(&expr).unwrap(), Value::from("hello"));
    }

    #[test]
    fn test_evaluate_hand_built_tree() {
        let mut evaluator = Evaluator::new();
        let expr = Expression::BinaryOp {
            op: BinaryOperator::Add,
            left: Box::new(Expression::literal(21)),
            right: Box::new(Expression::literal(21)),
            span: None,
        };
        assert_eq!(evaluator.evaluate(&expr).unwrap(), Value::Int(42));
        assert_eq!(evaluator.evaluate(&expr).unwrap(), Value::Int(42));
        assert_eq!(evaluator.counters().nodes, 3);
    }

    #[test]
    fn test_evaluate_arithmetic() {
        assert_eq!(eval("21 + 21").unwrap(), Value::Int(42));
        assert_eq!(eval("100 / 10").unwrap(), Value::Float(10.0));
        assert_eq!(eval("7 // 2").unwrap(), Value::Int(3));
        assert_eq!(eval("-2 ** 2").unwrap(), Value::Int(-4));
        assert_eq!(eval("2 ** 3 ** 2").unwrap(), Value::Int(512));
        let result = eval("21 + 19 / 7 + (8 % 3) ** 9").unwrap().as_f64().unwrap();
        assert!((result - 535.714_285_714).abs() < 1e-6);
    }

    #[test]
    fn test_evaluate_comparison_chain() {
        assert_eq!(eval("1 < 2 < 3").unwrap(), Value::Bool(true));
        assert_eq!(eval("1 < 3 < 2").unwrap(), Value::Bool(false));
        assert_eq!(eval("'a' in 'abc'").unwrap(), Value::Bool(true));
        assert_eq!(eval("None is None").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_comparison_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut evaluator = Evaluator::with_context(EvalContext::new().with_function("f", move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(0))
        }));
        assert_eq!(evaluator.eval("1 > 2 < f()").unwrap(), Value::Bool(false));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_evaluate_logical() {
        assert_eq!(eval("1 - 1 or 21").unwrap(), Value::Int(21));
        assert_eq!(eval("1 - 1 and 11").unwrap(), Value::Int(0));
        assert_eq!(eval("not 0").unwrap(), Value::Bool(true));
        assert!(eval("0 and undefined_name").is_ok());
    }

    #[test]
    fn test_evaluate_ternary() {
        let mut evaluator = Evaluator::with_context(EvalContext::new().with_name("x", 1).with_name("y", 2));
        assert_eq!(
            evaluator.eval("'equal' if x == y else 'not equal'").unwrap(),
            Value::from("not equal")
        );
        assert_eq!(
            eval("'a' if 1 == 2 else 'b' if 2 == 3 else 'c'").unwrap(),
            Value::from("c")
        );
    }

    #[test]
    fn test_name_resolution_order() {
        let mut evaluator = Evaluator::with_context(
            EvalContext::compound()
                .with_name("x", 1)
                .with_constant("x", 2),
        );
        assert_eq!(evaluator.eval("x").unwrap(), Value::Int(2));
        assert_eq!(
            evaluator.eval("[x for x in [5]]").unwrap(),
            Value::List(vec![Value::Int(5)])
        );
        assert_eq!(
            evaluator.eval("y"),
            Err(EvalError::NameNotDefined { name: "y".to_string() })
        );
    }

    #[test]
    fn test_resolver_names() {
        let mut evaluator = Evaluator::with_context(EvalContext::new().with_resolver(|name, _| {
            match name {
                "answer" => Ok(Value::Int(42)),
                other => Err(EvalError::NameNotDefined {
                    name: other.to_string(),
                }),
            }
        }));
        assert_eq!(evaluator.eval("answer + 1").unwrap(), Value::Int(43));
        assert!(matches!(evaluator.eval("other"), Err(EvalError::NameNotDefined { .. })));
    }

    #[test]
    fn test_function_calls() {
        let mut evaluator = Evaluator::with_context(EvalContext::new().with_function("square", |args| {
            let x = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(Value::Int(x * x))
        }));
        assert_eq!(evaluator.eval("square(11)").unwrap(), Value::Int(121));
        assert_eq!(
            evaluator.eval("cube(2)"),
            Err(EvalError::FunctionNotDefined { name: "cube".to_string() })
        );
        assert_eq!(evaluator.eval("int('7') + 1").unwrap(), Value::Int(8));
    }

    #[test]
    fn test_with_names_function() {
        let ctx = EvalContext::new().with_name("counter", 0).with_host_function(
            "bump",
            HostFunction::with_names(|names, _args| {
                let next = names.get("counter").and_then(Value::as_i64).unwrap_or(0) + 1;
                names.insert("counter".to_string(), Value::Int(next));
                Ok(Value::Int(next))
            }),
        );
        let mut evaluator = Evaluator::with_context(ctx);
        evaluator.eval("bump()").unwrap();
        assert_eq!(evaluator.eval("bump() + counter").unwrap(), Value::Int(4));

        let mut resolved = Evaluator::with_context(
            evaluator.into_context().with_resolver(|_, _| Ok(Value::Null)),
        );
        assert!(matches!(resolved.eval("bump()"), Err(EvalError::FeatureNotAvailable(_))));
    }

    #[test]
    fn test_attribute_policy() {
        let mut evaluator = Evaluator::with_compound_types();
        assert!(matches!(
            evaluator.eval("'x'.__class__"),
            Err(EvalError::FeatureNotAvailable(_))
        ));
        assert!(matches!(
            evaluator.eval("'x'._nonexistent"),
            Err(EvalError::FeatureNotAvailable(_))
        ));
        assert!(matches!(
            evaluator.eval("'{}'.format(1)"),
            Err(EvalError::FeatureNotAvailable(_))
        ));
        assert!(matches!(
            evaluator.eval("'x'.nothing"),
            Err(EvalError::AttributeDoesNotExist { .. })
        ));
        assert_eq!(evaluator.eval("'abc'.upper()").unwrap(), Value::from("ABC"));
        assert_eq!(evaluator.eval("{'a': 1}.a").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_index_fallback_can_be_disabled() {
        let policy = crate::context::AttributePolicy::default().with_index_fallback(false);
        let mut evaluator =
            Evaluator::with_context(EvalContext::compound().with_attribute_policy(policy));
        assert!(matches!(
            evaluator.eval("{'a': 1}.a"),
            Err(EvalError::AttributeDoesNotExist { .. })
        ));
    }

    #[test]
    fn test_subscripts_and_slices() {
        let mut evaluator = Evaluator::with_compound_types();
        assert_eq!(evaluator.eval("[1, 2, 3][-1]").unwrap(), Value::Int(3));
        assert_eq!(evaluator.eval("'hello'[1]").unwrap(), Value::from("e"));
        assert_eq!(evaluator.eval("'hello'[::-1]").unwrap(), Value::from("olleh"));
        assert_eq!(
            evaluator.eval("[0, 1, 2, 3, 4][1:4:2]").unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(3)])
        );
        assert_eq!(evaluator.eval("'hello'[-3:]").unwrap(), Value::from("llo"));
        assert_eq!(evaluator.eval("'hello'[10:]").unwrap(), Value::from(""));
        assert!(matches!(evaluator.eval("[1][5]"), Err(EvalError::Lookup(_))));
        assert!(matches!(evaluator.eval("{'a': 1}['b']"), Err(EvalError::Lookup(_))));
        assert!(matches!(evaluator.eval("5[0]"), Err(EvalError::TypeMismatch(_))));
        assert!(matches!(evaluator.eval("'abc'[::0]"), Err(EvalError::InvalidArgument(_))));
    }

    #[test]
    fn test_slice_positions() {
        assert_eq!(slice_positions(5, None, None, -2), vec![4, 2, 0]);
        assert_eq!(slice_positions(5, Some(-100), Some(100), 1), vec![0, 1, 2, 3, 4]);
        assert_eq!(slice_positions(5, Some(3), Some(0), -1), vec![3, 2, 1]);
        assert!(slice_positions(0, None, None, -1).is_empty());
    }

    #[test]
    fn test_disabled_node_kinds() {
        let mut basic = Evaluator::new();
        assert!(matches!(basic.eval("[1, 2]"), Err(EvalError::FeatureNotAvailable(_))));

        let mut no_methods =
            Evaluator::with_context(EvalContext::new().disable(NodeKind::MethodCall));
        assert!(matches!(
            no_methods.eval("'a'.upper()"),
            Err(EvalError::FeatureNotAvailable(_))
        ));
    }

    #[test]
    fn test_missing_operators() {
        assert!(matches!(eval("1 & 2"), Err(EvalError::FeatureNotAvailable(_))));
        assert!(matches!(eval("~1"), Err(EvalError::FeatureNotAvailable(_))));

        let mut operators = crate::operators::OperatorTable::default();
        operators.remove_compare(CompareOperator::In);
        let mut evaluator = Evaluator::with_context(EvalContext::new().with_operators(operators));
        assert!(matches!(
            evaluator.eval("'a' in 'abc'"),
            Err(EvalError::FeatureNotAvailable(_))
        ));

        let mut bitwise = Evaluator::with_context(
            EvalContext::new().with_operators(crate::operators::OperatorTable::default().with_bitwise()),
        );
        assert_eq!(bitwise.eval("6 & 3 | 8").unwrap(), Value::Int(10));
    }

    #[test]
    fn test_power_guard() {
        assert!(eval("9 ** 9 ** 5").is_ok());
        assert!(matches!(eval("9 ** 9 ** 6"), Err(EvalError::NumberTooHigh(_))));

        let limits = Limits {
            max_power: 100,
            ..Limits::default()
        };
        let mut evaluator = Evaluator::with_context(EvalContext::new().with_limits(limits));
        assert!(matches!(evaluator.eval("101 ** 2"), Err(EvalError::NumberTooHigh(_))));
    }

    #[test]
    fn test_node_and_depth_limits() {
        let limits = Limits {
            max_nodes: 5,
            ..Limits::default()
        };
        let mut evaluator = Evaluator::with_context(EvalContext::new().with_limits(limits));
        assert!(evaluator.eval("1 + 2").is_ok());
        assert_eq!(
            evaluator.eval("1 + 2 + 3 + 4"),
            Err(EvalError::TooManyNodes { limit: 5 })
        );

        let limits = Limits {
            max_depth: 3,
            ..Limits::default()
        };
        let mut evaluator = Evaluator::with_context(EvalContext::new().with_limits(limits));
        assert!(evaluator.eval("-1").is_ok());
        assert_eq!(
            evaluator.eval("-(-(-1))"),
            Err(EvalError::NestingTooDeep { limit: 3 })
        );
    }

    #[test]
    fn test_host_results_are_length_checked() {
        let limits = Limits {
            max_string_length: 3,
            ..Limits::default()
        };
        let ctx = EvalContext::new()
            .with_limits(limits)
            .with_function("long", |_| Ok(Value::from("abcdef")));
        let mut evaluator = Evaluator::with_context(ctx);
        assert!(matches!(evaluator.eval("long()"), Err(EvalError::IterableTooLong(_))));
        assert!(matches!(evaluator.eval("'abcd'"), Err(EvalError::IterableTooLong(_))));
    }

    #[test]
    fn test_formatted_strings() {
        assert_eq!(eval("f''").unwrap(), Value::from(""));
        assert_eq!(eval("f'stuff'").unwrap(), Value::from("stuff"));
        assert_eq!(
            eval("f'one is {1} and two is {2}'").unwrap(),
            Value::from("one is 1 and two is 2")
        );
        assert_eq!(eval("f'1+1 is {1+1}'").unwrap(), Value::from("1+1 is 2"));
        assert_eq!(eval("f\"{'dramatic':!<11}\"").unwrap(), Value::from("dramatic!!!"));
        assert_eq!(eval("f'{\"a\"!r} {None} {2.50:.1f}'").unwrap(), Value::from("'a' None 2.5"));
        assert_eq!(eval("f'{{literal}}'").unwrap(), Value::from("{literal}"));
        assert_eq!(eval("f'tab\\there'").unwrap(), Value::from("tab\there"));
    }

    #[test]
    fn test_formatted_strings_are_guarded() {
        assert!(matches!(
            eval("f'{\"foo\" * 50000}'"),
            Err(EvalError::IterableTooLong(_))
        ));
        assert!(matches!(
            eval("f'{\"x\" * 60000}{\"y\" * 60000}'"),
            Err(EvalError::IterableTooLong(_))
        ));
        assert!(matches!(
            eval("f'{1:>200000}'"),
            Err(EvalError::IterableTooLong(_))
        ));
        assert!(matches!(
            eval("f'{\"x\".__class__}'"),
            Err(EvalError::FeatureNotAvailable(_))
        ));
        assert!(matches!(eval("f'{[1]:>3}'"), Err(EvalError::FeatureNotAvailable(_))));
        assert!(matches!(
            Evaluator::with_compound_types().eval("f'{[1]:>3}'"),
            Err(EvalError::TypeMismatch(_))
        ));

        let mut locked = Evaluator::with_context(EvalContext::new().disable(NodeKind::FormattedString));
        assert!(matches!(locked.eval("f'{1}'"), Err(EvalError::FeatureNotAvailable(_))));
    }

    #[test]
    fn test_parse_errors_surface() {
        assert!(matches!(eval("1 +"), Err(EvalError::Syntax(_))));
        assert!(matches!(eval("1; 2"), Err(EvalError::Malformed(_))));
        assert!(matches!(eval("lambda: 1"), Err(EvalError::FeatureNotAvailable(_))));
        assert!(matches!(eval("1\n-1"), Err(EvalError::Malformed(_))));
    }
}
