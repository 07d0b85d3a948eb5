//! Operator table and the default operations
//!
//! The evaluator never hard-codes what `+` or `in` means. It looks the
//! operator up in an [`OperatorTable`] held by the evaluation context, so a
//! host can remove an operator (making it unavailable) or install its own.

use crate::ast::{BinaryOperator, CompareOperator, LogicalOperator, UnaryOperator};
use crate::config::Limits;
use crate::error::{EvalError, EvalResult};
use crate::governor;
use crate::value::{Number, Value};
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// `a <op> b`, with the limits for operations that can grow without bound
pub type BinaryFn = fn(&Value, &Value, &Limits) -> EvalResult<Value>;
/// `<op> a`
pub type UnaryFn = fn(&Value) -> EvalResult<Value>;
/// One link of a comparison chain; the result's truthiness decides whether the chain continues
pub type CompareFn = fn(&Value, &Value) -> EvalResult<Value>;

/// Per-operator implementations available to an evaluation
#[derive(Debug, Clone)]
pub struct OperatorTable {
    binary: HashMap<BinaryOperator, BinaryFn>,
    unary: HashMap<UnaryOperator, UnaryFn>,
    compare: HashMap<CompareOperator, CompareFn>,
    logical: HashSet<LogicalOperator>,
}

impl OperatorTable {
    /// A table with no operators at all
    pub fn empty() -> Self {
        Self {
            binary: HashMap::new(),
            unary: HashMap::new(),
            compare: HashMap::new(),
            logical: HashSet::new(),
        }
    }

    /// Default table plus the bitwise operators and `~`
    pub fn with_bitwise(mut self) -> Self {
        self.set_binary(BinaryOperator::BitAnd, bit_and);
        self.set_binary(BinaryOperator::BitOr, bit_or);
        self.set_binary(BinaryOperator::BitXor, bit_xor);
        self.set_binary(BinaryOperator::LeftShift, left_shift);
        self.set_binary(BinaryOperator::RightShift, right_shift);
        self.set_unary(UnaryOperator::Invert, invert);
        self
    }

    pub fn binary(&self, op: BinaryOperator) -> Option<BinaryFn> {
        self.binary.get(&op).copied()
    }

    pub fn unary(&self, op: UnaryOperator) -> Option<UnaryFn> {
        self.unary.get(&op).copied()
    }

    pub fn compare(&self, op: CompareOperator) -> Option<CompareFn> {
        self.compare.get(&op).copied()
    }

    pub fn allows_logical(&self, op: LogicalOperator) -> bool {
        self.logical.contains(&op)
    }

    pub fn set_binary(&mut self, op: BinaryOperator, f: BinaryFn) -> &mut Self {
        self.binary.insert(op, f);
        self
    }

    pub fn set_unary(&mut self, op: UnaryOperator, f: UnaryFn) -> &mut Self {
        self.unary.insert(op, f);
        self
    }

    pub fn set_compare(&mut self, op: CompareOperator, f: CompareFn) -> &mut Self {
        self.compare.insert(op, f);
        self
    }

    pub fn remove_binary(&mut self, op: BinaryOperator) -> &mut Self {
        self.binary.remove(&op);
        self
    }

    pub fn remove_unary(&mut self, op: UnaryOperator) -> &mut Self {
        self.unary.remove(&op);
        self
    }

    pub fn remove_compare(&mut self, op: CompareOperator) -> &mut Self {
        self.compare.remove(&op);
        self
    }

    pub fn enable_logical(&mut self, op: LogicalOperator) -> &mut Self {
        self.logical.insert(op);
        self
    }

    pub fn disable_logical(&mut self, op: LogicalOperator) -> &mut Self {
        self.logical.remove(&op);
        self
    }
}

impl Default for OperatorTable {
    fn default() -> Self {
        let mut table = Self::empty();

        table
            .set_binary(BinaryOperator::Add, add)
            .set_binary(BinaryOperator::Subtract, subtract)
            .set_binary(BinaryOperator::Multiply, multiply)
            .set_binary(BinaryOperator::Divide, true_divide)
            .set_binary(BinaryOperator::FloorDivide, floor_divide)
            .set_binary(BinaryOperator::Modulo, modulo)
            .set_binary(BinaryOperator::Power, power);

        table
            .set_unary(UnaryOperator::Not, not)
            .set_unary(UnaryOperator::Negate, negate)
            .set_unary(UnaryOperator::Plus, positive);

        table
            .set_compare(CompareOperator::Equal, equal)
            .set_compare(CompareOperator::NotEqual, not_equal)
            .set_compare(CompareOperator::LessThan, less_than)
            .set_compare(CompareOperator::LessThanOrEqual, less_equal)
            .set_compare(CompareOperator::GreaterThan, greater_than)
            .set_compare(CompareOperator::GreaterThanOrEqual, greater_equal)
            .set_compare(CompareOperator::In, contained_in)
            .set_compare(CompareOperator::NotIn, not_contained_in)
            .set_compare(CompareOperator::Is, is_same)
            .set_compare(CompareOperator::IsNot, is_not_same);

        table
            .enable_logical(LogicalOperator::And)
            .enable_logical(LogicalOperator::Or);

        table
    }
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

fn unsupported(op: &str, a: &Value, b: &Value) -> EvalError {
    EvalError::TypeMismatch(format!(
        "unsupported operand types for {}: '{}' and '{}'",
        op,
        a.type_name(),
        b.type_name()
    ))
}

fn numbers(op: &str, a: &Value, b: &Value) -> EvalResult<(Number, Number)> {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(unsupported(op, a, b)),
    }
}

fn to_float(n: &Number) -> EvalResult<f64> {
    let f = n.to_f64();
    if f.is_infinite() && !matches!(n, Number::Float(_)) {
        return Err(EvalError::Arithmetic(
            "integer too large to convert to float".to_string(),
        ));
    }
    Ok(f)
}

fn is_float_op(x: &Number, y: &Number) -> bool {
    matches!(x, Number::Float(_)) || matches!(y, Number::Float(_))
}

/// Apply an operation with the `i64` fast path, widening to `BigInt` on overflow
fn arith(
    x: Number,
    y: Number,
    small: fn(i64, i64) -> Option<i64>,
    big: fn(BigInt, BigInt) -> BigInt,
    float: fn(f64, f64) -> f64,
) -> EvalResult<Value> {
    if is_float_op(&x, &y) {
        return Ok(Value::Float(float(to_float(&x)?, to_float(&y)?)));
    }

    if let (Number::Int(a), Number::Int(b)) = (&x, &y) {
        if let Some(result) = small(*a, *b) {
            return Ok(Value::Int(result));
        }
    }

    let a = x.to_bigint().unwrap_or_default();
    let b = y.to_bigint().unwrap_or_default();
    Ok(Value::from_bigint(big(a, b)))
}

fn concat(a: &[Value], b: &[Value], limits: &Limits) -> EvalResult<Vec<Value>> {
    let size = a
        .iter()
        .chain(b.iter())
        .fold(0usize, |total, item| total.saturating_add(item.element_footprint()));
    governor::check_length(size, limits)?;
    let mut items = Vec::with_capacity(a.len() + b.len());
    items.extend(a.iter().cloned());
    items.extend(b.iter().cloned());
    Ok(items)
}

/// `a + b`: numbers, or concatenation of str/list/tuple
pub fn add(a: &Value, b: &Value, limits: &Limits) -> EvalResult<Value> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => {
            governor::check_length(x.chars().count() + y.chars().count(), limits)?;
            Ok(Value::String(format!("{}{}", x, y)))
        }
        (Value::List(x), Value::List(y)) => Ok(Value::List(concat(x, y, limits)?)),
        (Value::Tuple(x), Value::Tuple(y)) => Ok(Value::Tuple(concat(x, y, limits)?)),
        _ => {
            let (x, y) = numbers("+", a, b)?;
            arith(x, y, i64::checked_add, |p, q| p + q, |p, q| p + q)
        }
    }
}

/// `a - b`: numbers, or set difference
pub fn subtract(a: &Value, b: &Value, _limits: &Limits) -> EvalResult<Value> {
    if let (Value::Set(x), Value::Set(y)) = (a, b) {
        return Ok(Value::Set(x.difference(y).cloned().collect()));
    }
    let (x, y) = numbers("-", a, b)?;
    arith(x, y, i64::checked_sub, |p, q| p - q, |p, q| p - q)
}

/// `a * b`: numbers, or repetition of str/list/tuple by an integer
pub fn multiply(a: &Value, b: &Value, limits: &Limits) -> EvalResult<Value> {
    if let Some(result) = repeat(a, b, limits)? {
        return Ok(result);
    }
    let (x, y) = numbers("*", a, b)?;
    arith(x, y, i64::checked_mul, |p, q| p * q, |p, q| p * q)
}

fn repeat(a: &Value, b: &Value, limits: &Limits) -> EvalResult<Option<Value>> {
    let (sequence, times) = match (a, b) {
        (
            Value::String(_) | Value::List(_) | Value::Tuple(_),
            t @ (Value::Int(_) | Value::Bool(_) | Value::BigInt(_)),
        ) => (a, t),
        (
            t @ (Value::Int(_) | Value::Bool(_) | Value::BigInt(_)),
            Value::String(_) | Value::List(_) | Value::Tuple(_),
        ) => (b, t),
        _ => return Ok(None),
    };

    let times = match times {
        Value::BigInt(n) if n.is_negative() => 0,
        Value::BigInt(_) => i64::MAX,
        other => other.as_i64().unwrap_or(0),
    };

    // Elements are deep copies, so the guard weighs the contents, not the element count
    let length = sequence.length().unwrap_or(0);
    governor::check_repetition(sequence.footprint(), times, limits)?;
    let count = if length == 0 { 0 } else { times.max(0) as usize };

    let repeated = match sequence {
        Value::String(s) => Value::String(s.repeat(count)),
        Value::List(items) => Value::List(repeat_items(items, count)),
        Value::Tuple(items) => Value::Tuple(repeat_items(items, count)),
        _ => return Ok(None),
    };
    Ok(Some(repeated))
}

fn repeat_items(items: &[Value], count: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    out
}

/// `a / b`: always a float
pub fn true_divide(a: &Value, b: &Value, _limits: &Limits) -> EvalResult<Value> {
    let (x, y) = numbers("/", a, b)?;
    if y.is_zero() {
        return Err(EvalError::Arithmetic("division by zero".to_string()));
    }
    Ok(Value::Float(to_float(&x)? / to_float(&y)?))
}

/// `a // b`: rounds toward negative infinity
pub fn floor_divide(a: &Value, b: &Value, _limits: &Limits) -> EvalResult<Value> {
    let (x, y) = numbers("//", a, b)?;
    if y.is_zero() {
        return Err(EvalError::Arithmetic(
            "integer division or modulo by zero".to_string(),
        ));
    }

    if is_float_op(&x, &y) {
        return Ok(Value::Float((to_float(&x)? / to_float(&y)?).floor()));
    }

    if let (Number::Int(p), Number::Int(q)) = (&x, &y) {
        if let Some(quotient) = p.checked_div(*q) {
            let adjust = p % q != 0 && ((*p < 0) != (*q < 0));
            return Ok(Value::Int(if adjust { quotient - 1 } else { quotient }));
        }
    }

    let p = x.to_bigint().unwrap_or_default();
    let q = y.to_bigint().unwrap_or_default();
    let quotient = &p / &q;
    let remainder = &p % &q;
    let floored = if !remainder.is_zero() && (remainder.is_negative() != q.is_negative()) {
        quotient - 1
    } else {
        quotient
    };
    Ok(Value::from_bigint(floored))
}

/// `a % b`: the result takes the sign of the divisor
pub fn modulo(a: &Value, b: &Value, _limits: &Limits) -> EvalResult<Value> {
    let (x, y) = numbers("%", a, b)?;
    if y.is_zero() {
        return Err(EvalError::Arithmetic(
            "integer division or modulo by zero".to_string(),
        ));
    }

    if is_float_op(&x, &y) {
        let (p, q) = (to_float(&x)?, to_float(&y)?);
        let r = p % q;
        let r = if r != 0.0 && ((r < 0.0) != (q < 0.0)) { r + q } else { r };
        return Ok(Value::Float(r));
    }

    if let (Number::Int(p), Number::Int(q)) = (&x, &y) {
        return Ok(Value::Int(match p.checked_rem(*q) {
            Some(r) if r != 0 && ((r < 0) != (*q < 0)) => r + q,
            Some(r) => r,
            None => 0,
        }));
    }

    let p = x.to_bigint().unwrap_or_default();
    let q = y.to_bigint().unwrap_or_default();
    let r = &p % &q;
    let r = if !r.is_zero() && (r.is_negative() != q.is_negative()) {
        r + q
    } else {
        r
    };
    Ok(Value::from_bigint(r))
}

/// `a ** b`, after the power guard has approved the operands
pub fn power(a: &Value, b: &Value, limits: &Limits) -> EvalResult<Value> {
    governor::check_power(a, b, limits)?;
    let (x, y) = numbers("**", a, b)?;

    if is_float_op(&x, &y) {
        return float_power(to_float(&x)?, to_float(&y)?);
    }

    let base = x.to_bigint().unwrap_or_default();
    let exponent = y.to_bigint().unwrap_or_default();
    if exponent.is_negative() {
        return float_power(to_float(&x)?, to_float(&y)?);
    }

    let exponent = exponent.to_u32().ok_or_else(|| {
        EvalError::NumberTooHigh(format!("exponent {} is too large", exponent))
    })?;

    if let Number::Int(small) = x {
        if let Some(result) = small.checked_pow(exponent) {
            return Ok(Value::Int(result));
        }
    }
    Ok(Value::from_bigint(base.pow(exponent)))
}

fn float_power(base: f64, exponent: f64) -> EvalResult<Value> {
    if base == 0.0 && exponent < 0.0 {
        return Err(EvalError::Arithmetic(
            "0.0 cannot be raised to a negative power".to_string(),
        ));
    }
    if base < 0.0 && exponent.fract() != 0.0 {
        return Err(EvalError::Arithmetic(
            "negative number cannot be raised to a fractional power".to_string(),
        ));
    }

    let result = base.powf(exponent);
    if result.is_infinite() && base.is_finite() && exponent.is_finite() {
        return Err(EvalError::Arithmetic(
            "numerical result out of range".to_string(),
        ));
    }
    Ok(Value::Float(result))
}

// ---------------------------------------------------------------------------
// Bitwise (not in the default table)
// ---------------------------------------------------------------------------

fn integers(op: &str, a: &Value, b: &Value) -> EvalResult<(BigInt, BigInt)> {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => match (x.to_bigint(), y.to_bigint()) {
            (Some(p), Some(q)) => Ok((p, q)),
            _ => Err(unsupported(op, a, b)),
        },
        _ => Err(unsupported(op, a, b)),
    }
}

/// `a & b`: integers, or set intersection
pub fn bit_and(a: &Value, b: &Value, _limits: &Limits) -> EvalResult<Value> {
    if let (Value::Set(x), Value::Set(y)) = (a, b) {
        return Ok(Value::Set(x.intersection(y).cloned().collect()));
    }
    let (p, q) = integers("&", a, b)?;
    Ok(Value::from_bigint(p & q))
}

/// `a | b`: integers, or set union
pub fn bit_or(a: &Value, b: &Value, limits: &Limits) -> EvalResult<Value> {
    if let (Value::Set(x), Value::Set(y)) = (a, b) {
        governor::check_length(x.len() + y.len(), limits)?;
        return Ok(Value::Set(x.union(y).cloned().collect()));
    }
    let (p, q) = integers("|", a, b)?;
    Ok(Value::from_bigint(p | q))
}

/// `a ^ b`: integers, or symmetric set difference
pub fn bit_xor(a: &Value, b: &Value, _limits: &Limits) -> EvalResult<Value> {
    if let (Value::Set(x), Value::Set(y)) = (a, b) {
        return Ok(Value::Set(x.symmetric_difference(y).cloned().collect()));
    }
    let (p, q) = integers("^", a, b)?;
    Ok(Value::from_bigint(p ^ q))
}

fn shift_amount(amount: &BigInt) -> EvalResult<usize> {
    if amount.is_negative() {
        return Err(EvalError::Arithmetic("negative shift count".to_string()));
    }
    amount
        .to_usize()
        .ok_or_else(|| EvalError::NumberTooHigh(format!("shift count {} is too large", amount)))
}

/// `a << b`, guarded like `2 ** b`
pub fn left_shift(a: &Value, b: &Value, limits: &Limits) -> EvalResult<Value> {
    let (p, q) = integers("<<", a, b)?;
    let amount = shift_amount(&q)?;
    if !p.is_zero() {
        governor::check_power(&Value::Int(2), b, limits)?;
    }
    Ok(Value::from_bigint(p << amount))
}

/// `a >> b`, rounding toward negative infinity
pub fn right_shift(a: &Value, b: &Value, _limits: &Limits) -> EvalResult<Value> {
    let (p, q) = integers(">>", a, b)?;
    if q.is_negative() {
        return Err(EvalError::Arithmetic("negative shift count".to_string()));
    }
    let amount = q.to_usize().unwrap_or(usize::MAX);
    let bits = p.bits() as usize;
    if amount > bits {
        return Ok(Value::Int(if p.is_negative() { -1 } else { 0 }));
    }
    Ok(Value::from_bigint(p >> amount))
}

// ---------------------------------------------------------------------------
// Unary
// ---------------------------------------------------------------------------

/// `not a`
pub fn not(a: &Value) -> EvalResult<Value> {
    Ok(Value::Bool(!a.is_truthy()))
}

/// `-a`
pub fn negate(a: &Value) -> EvalResult<Value> {
    match a.as_number() {
        Some(Number::Int(i)) => Ok(i
            .checked_neg()
            .map(Value::Int)
            .unwrap_or_else(|| Value::from_bigint(-BigInt::from(i)))),
        Some(Number::Big(b)) => Ok(Value::from_bigint(-b)),
        Some(Number::Float(f)) => Ok(Value::Float(-f)),
        None => Err(EvalError::TypeMismatch(format!(
            "bad operand type for unary -: '{}'",
            a.type_name()
        ))),
    }
}

/// `+a`
pub fn positive(a: &Value) -> EvalResult<Value> {
    match a.as_number() {
        Some(Number::Int(i)) => Ok(Value::Int(i)),
        Some(Number::Big(b)) => Ok(Value::from_bigint(b)),
        Some(Number::Float(f)) => Ok(Value::Float(f)),
        None => Err(EvalError::TypeMismatch(format!(
            "bad operand type for unary +: '{}'",
            a.type_name()
        ))),
    }
}

/// `~a`
pub fn invert(a: &Value) -> EvalResult<Value> {
    match a.as_number() {
        Some(Number::Int(i)) => Ok(Value::Int(!i)),
        Some(Number::Big(b)) => Ok(Value::from_bigint(-b - 1)),
        _ => Err(EvalError::TypeMismatch(format!(
            "bad operand type for unary ~: '{}'",
            a.type_name()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

pub fn equal(a: &Value, b: &Value) -> EvalResult<Value> {
    Ok(Value::Bool(a.py_eq(b)))
}

pub fn not_equal(a: &Value, b: &Value) -> EvalResult<Value> {
    Ok(Value::Bool(!a.py_eq(b)))
}

pub fn less_than(a: &Value, b: &Value) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(a.compare(b)?, Some(Ordering::Less))))
}

pub fn less_equal(a: &Value, b: &Value) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(
        a.compare(b)?,
        Some(Ordering::Less | Ordering::Equal)
    )))
}

pub fn greater_than(a: &Value, b: &Value) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(a.compare(b)?, Some(Ordering::Greater))))
}

pub fn greater_equal(a: &Value, b: &Value) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(
        a.compare(b)?,
        Some(Ordering::Greater | Ordering::Equal)
    )))
}

/// `a in b`
pub fn contained_in(a: &Value, b: &Value) -> EvalResult<Value> {
    membership(a, b).map(Value::Bool)
}

/// `a not in b`
pub fn not_contained_in(a: &Value, b: &Value) -> EvalResult<Value> {
    membership(a, b).map(|found| Value::Bool(!found))
}

fn membership(item: &Value, container: &Value) -> EvalResult<bool> {
    match container {
        Value::String(haystack) => match item {
            Value::String(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(EvalError::TypeMismatch(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
        Value::Set(items) => {
            item.ensure_hashable()?;
            Ok(items.contains(item))
        }
        Value::Map(entries) => {
            item.ensure_hashable()?;
            Ok(entries.contains_key(item))
        }
        other => Err(EvalError::TypeMismatch(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// `a is b`: values have no identity here, so this means same variant and equal
pub fn is_same(a: &Value, b: &Value) -> EvalResult<Value> {
    Ok(Value::Bool(same_identity(a, b)))
}

/// `a is not b`
pub fn is_not_same(a: &Value, b: &Value) -> EvalResult<Value> {
    Ok(Value::Bool(!same_identity(a, b)))
}

fn same_identity(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b) && a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn limits() -> Limits {
        Limits::default()
    }

    #[test]
    fn test_integer_overflow_widens() {
        let result = add(&Value::Int(i64::MAX), &Value::Int(1), &limits()).unwrap();
        assert!(matches!(result, Value::BigInt(_)));
        let back = subtract(&result, &Value::Int(1), &limits()).unwrap();
        assert!(matches!(back, Value::Int(i64::MAX)));
    }

    #[test]
    fn test_mixed_arithmetic() {
        assert_eq!(add(&Value::Int(1), &Value::Float(0.5), &limits()).unwrap(), Value::Float(1.5));
        assert_eq!(add(&Value::Bool(true), &Value::Int(1), &limits()).unwrap(), Value::Int(2));
        assert_eq!(true_divide(&Value::Int(100), &Value::Int(10), &limits()).unwrap(), Value::Float(10.0));
        assert!(matches!(
            true_divide(&Value::Int(1), &Value::Int(0), &limits()),
            Err(EvalError::Arithmetic(_))
        ));
    }

    #[test]
    fn test_floor_semantics() {
        assert_eq!(floor_divide(&Value::Int(7), &Value::Int(2), &limits()).unwrap(), Value::Int(3));
        assert_eq!(floor_divide(&Value::Int(-7), &Value::Int(2), &limits()).unwrap(), Value::Int(-4));
        assert_eq!(floor_divide(&Value::Float(7.5), &Value::Int(2), &limits()).unwrap(), Value::Float(3.0));
        assert_eq!(modulo(&Value::Int(-7), &Value::Int(3), &limits()).unwrap(), Value::Int(2));
        assert_eq!(modulo(&Value::Int(7), &Value::Int(-3), &limits()).unwrap(), Value::Int(-2));
        assert_eq!(modulo(&Value::Int(100), &Value::Int(9), &limits()).unwrap(), Value::Int(1));
        assert_eq!(modulo(&Value::Float(-1.0), &Value::Int(3), &limits()).unwrap(), Value::Float(2.0));
        assert_eq!(floor_divide(&Value::Int(i64::MIN), &Value::Int(-1), &limits()).unwrap(),
            Value::from_bigint(-BigInt::from(i64::MIN)));
    }

    #[test]
    fn test_power() {
        assert_eq!(power(&Value::Int(2), &Value::Int(10), &limits()).unwrap(), Value::Int(1024));
        assert_eq!(power(&Value::Int(2), &Value::Int(-1), &limits()).unwrap(), Value::Float(0.5));
        assert!(matches!(power(&Value::Int(2), &Value::Int(100), &limits()).unwrap(), Value::BigInt(_)));
        assert!(matches!(
            power(&Value::Float(-8.0), &Value::Float(0.5), &limits()),
            Err(EvalError::Arithmetic(_))
        ));
        assert!(matches!(
            power(&Value::Float(10.0), &Value::Int(400), &limits()),
            Err(EvalError::Arithmetic(_))
        ));
    }

    #[test]
    fn test_repetition_is_guarded() {
        assert_eq!(
            multiply(&Value::from("ab"), &Value::Int(3), &limits()).unwrap(),
            Value::from("ababab")
        );
        assert_eq!(
            multiply(&Value::Int(2), &Value::List(vec![Value::Int(1)]), &limits()).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(1)])
        );
        assert_eq!(multiply(&Value::from("ab"), &Value::Int(-2), &limits()).unwrap(), Value::from(""));
        assert!(matches!(
            multiply(&Value::from("text"), &Value::Int(50_000), &limits()),
            Err(EvalError::IterableTooLong(_))
        ));
        assert!(matches!(
            multiply(&Value::from("x"), &Value::from_bigint(BigInt::from(10).pow(30)), &limits()),
            Err(EvalError::IterableTooLong(_))
        ));
    }

    #[test]
    fn test_repetition_weighs_element_contents() {
        let chunk = Value::List(vec![Value::String("x".repeat(1_000))]);
        let result = multiply(&chunk, &Value::Int(50), &limits()).unwrap();
        assert_eq!(result.length(), Some(50));

        // 4000 copies of a 100k string pass an element count but not a size budget
        let heavy = Value::List(vec![Value::String("x".repeat(100_000))]);
        assert!(matches!(
            multiply(&heavy, &Value::Int(4_000), &limits()),
            Err(EvalError::IterableTooLong(_))
        ));
        assert!(matches!(
            multiply(&Value::Int(2), &heavy, &limits()),
            Err(EvalError::IterableTooLong(_))
        ));

        let empties = Value::List(vec![Value::List(vec![])]);
        assert!(matches!(
            multiply(&empties, &Value::Int(100_001), &limits()),
            Err(EvalError::IterableTooLong(_))
        ));
    }

    #[test]
    fn test_concatenation_is_guarded() {
        let long = Value::String("a".repeat(60_000));
        assert!(matches!(add(&long, &long, &limits()), Err(EvalError::IterableTooLong(_))));
        let wrapped = Value::List(vec![long]);
        assert!(matches!(add(&wrapped, &wrapped, &limits()), Err(EvalError::IterableTooLong(_))));
        assert!(matches!(add(&Value::from("a"), &Value::Int(1), &limits()), Err(EvalError::TypeMismatch(_))));
    }

    #[test]
    fn test_membership() {
        assert_eq!(contained_in(&Value::from("ell"), &Value::from("hello")).unwrap(), Value::Bool(true));
        assert_eq!(
            not_contained_in(&Value::Int(3), &Value::List(vec![Value::Int(1)])).unwrap(),
            Value::Bool(true)
        );
        assert!(contained_in(&Value::Int(1), &Value::from("abc")).is_err());
        assert!(contained_in(&Value::Int(1), &Value::Int(2)).is_err());
    }

    #[test]
    fn test_nan_is_never_equal() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(equal(&nan, &nan).unwrap(), Value::Bool(false));
        assert_eq!(not_equal(&nan, &nan).unwrap(), Value::Bool(true));
        assert_eq!(
            contained_in(&nan, &Value::List(vec![nan.clone()])).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(equal(&Value::Int(1), &Value::Float(1.0)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_identity() {
        assert_eq!(is_same(&Value::Null, &Value::Null).unwrap(), Value::Bool(true));
        assert_eq!(is_same(&Value::Int(1), &Value::Float(1.0)).unwrap(), Value::Bool(false));
        assert_eq!(is_not_same(&Value::Int(1), &Value::Null).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_default_table_has_no_bitwise() {
        let table = OperatorTable::default();
        assert!(table.binary(BinaryOperator::Add).is_some());
        assert!(table.binary(BinaryOperator::BitAnd).is_none());
        assert!(table.unary(UnaryOperator::Invert).is_none());
        assert!(table.allows_logical(LogicalOperator::And));

        let table = OperatorTable::default().with_bitwise();
        let and = table.binary(BinaryOperator::BitAnd).unwrap();
        assert_eq!(and(&Value::Int(6), &Value::Int(3), &limits()).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_shifts() {
        assert_eq!(left_shift(&Value::Int(1), &Value::Int(10), &limits()).unwrap(), Value::Int(1024));
        assert_eq!(right_shift(&Value::Int(-5), &Value::Int(1), &limits()).unwrap(), Value::Int(-3));
        assert_eq!(right_shift(&Value::Int(5), &Value::Int(1000), &limits()).unwrap(), Value::Int(0));
        assert!(matches!(
            left_shift(&Value::Int(1), &Value::Int(1_000_000), &limits()),
            Err(EvalError::NumberTooHigh(_))
        ));
        assert!(left_shift(&Value::Int(1), &Value::Int(-1), &limits()).is_err());
    }

    #[test]
    fn test_table_can_be_locked_down() {
        let mut table = OperatorTable::default();
        table.remove_binary(BinaryOperator::Power).disable_logical(LogicalOperator::Or);
        assert!(table.binary(BinaryOperator::Power).is_none());
        assert!(!table.allows_logical(LogicalOperator::Or));
    }
}
