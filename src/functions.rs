//! Host functions callable from expressions
//!
//! A [`FunctionTable`] is owned by the evaluation context and fully
//! replaceable. Nothing is callable unless it was registered, and a call to a
//! name that is not in the table fails with `FunctionNotDefined`.

use crate::config::Limits;
use crate::error::{EvalError, EvalResult};
use crate::governor;
use crate::operators;
use crate::value::{Number, Value};
use indexmap::{IndexMap, IndexSet};
use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive};
use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A function that only sees its arguments
pub type NativeFn = Arc<dyn Fn(&[Value]) -> EvalResult<Value> + Send + Sync>;

/// A function that may also read and mutate the static name table
pub type WithNamesFn =
    Arc<dyn Fn(&mut HashMap<String, Value>, &[Value]) -> EvalResult<Value> + Send + Sync>;

/// A callable registered by the host
#[derive(Clone)]
pub enum HostFunction {
    Native(NativeFn),
    /// Opt-in scripting capability; only usable while names are a static table
    WithNames(WithNamesFn),
}

impl HostFunction {
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    {
        HostFunction::Native(Arc::new(f))
    }

    pub fn with_names<F>(f: F) -> Self
    where
        F: Fn(&mut HashMap<String, Value>, &[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    {
        HostFunction::WithNames(Arc::new(f))
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostFunction::Native(_) => write!(f, "HostFunction::Native"),
            HostFunction::WithNames(_) => write!(f, "HostFunction::WithNames"),
        }
    }
}

/// Function registry
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    functions: HashMap<String, HostFunction>,
}

impl FunctionTable {
    /// An empty table: no function is callable
    pub fn new() -> Self {
        Self::default()
    }

    /// `int`, `float`, `str`, `randint` and `rand`
    pub fn defaults() -> Self {
        let mut table = Self::new();
        table
            .register("int", fn_int)
            .register("float", fn_float)
            .register("str", fn_str)
            .register("randint", fn_randint)
            .register("rand", fn_rand);
        table
    }

    /// The defaults plus the collection constructors `list`, `tuple`, `dict` and `set`
    pub fn compound() -> Self {
        let mut table = Self::defaults();
        table
            .register("list", fn_list)
            .register("tuple", fn_tuple)
            .register("dict", fn_dict)
            .register("set", fn_set);
        table
    }

    /// Add `len`, `range`, `sum`, `min`, `max`, `abs`, `round` and `bool`.
    ///
    /// `range` and `sum` capture `limits`, so a range can never be larger than
    /// the length ceiling in force when the table was built.
    pub fn with_standard(mut self, limits: &Limits) -> Self {
        let range_limits = limits.clone();
        let sum_limits = limits.clone();
        self.register("len", fn_len)
            .register("range", move |args: &[Value]| fn_range(args, &range_limits))
            .register("sum", move |args: &[Value]| fn_sum(args, &sum_limits))
            .register("min", |args: &[Value]| fn_extreme(args, "min", Ordering::Less))
            .register("max", |args: &[Value]| fn_extreme(args, "max", Ordering::Greater))
            .register("abs", fn_abs)
            .register("round", fn_round)
            .register("bool", fn_bool);
        self
    }

    /// Register a native function, replacing any previous entry with that name
    pub fn register<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), HostFunction::native(f));
        self
    }

    /// Register a function that receives the mutable name table
    pub fn register_with_names<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&mut HashMap<String, Value>, &[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    {
        self.functions
            .insert(name.into(), HostFunction::with_names(f));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, function: HostFunction) -> &mut Self {
        self.functions.insert(name.into(), function);
        self
    }

    pub fn get(&self, name: &str) -> Option<&HostFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<HostFunction> {
        self.functions.remove(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Copy every entry of `other` into this table
    pub fn extend(&mut self, other: FunctionTable) {
        self.functions.extend(other.functions);
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn require_args(args: &[Value], count: usize, name: &str) -> EvalResult<()> {
    if args.len() != count {
        return Err(EvalError::InvalidArgument(format!(
            "{}() takes exactly {} argument{} ({} given)",
            name,
            count,
            if count == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

fn require_args_range(args: &[Value], min: usize, max: usize, name: &str) -> EvalResult<()> {
    if args.len() < min || args.len() > max {
        return Err(EvalError::InvalidArgument(format!(
            "{}() takes from {} to {} arguments ({} given)",
            name,
            min,
            max,
            args.len()
        )));
    }
    Ok(())
}

fn as_integer(value: &Value, name: &str) -> EvalResult<i64> {
    value.as_i64().ok_or_else(|| {
        EvalError::TypeMismatch(format!(
            "{}() expects an integer, got '{}'",
            name,
            value.type_name()
        ))
    })
}

fn float_to_integer(f: f64) -> EvalResult<Value> {
    if f.is_nan() {
        return Err(EvalError::InvalidArgument(
            "cannot convert float NaN to integer".to_string(),
        ));
    }
    if f.is_infinite() {
        return Err(EvalError::Arithmetic(
            "cannot convert float infinity to integer".to_string(),
        ));
    }
    let truncated = f.trunc();
    match BigInt::from_f64(truncated) {
        Some(b) => Ok(Value::from_bigint(b)),
        None => Err(EvalError::Arithmetic(format!(
            "cannot convert {} to integer",
            f
        ))),
    }
}

// =============================================================================
// DEFAULT FUNCTIONS
// =============================================================================

fn fn_int(args: &[Value]) -> EvalResult<Value> {
    require_args_range(args, 0, 2, "int")?;
    let Some(value) = args.first() else {
        return Ok(Value::Int(0));
    };

    if let Some(base) = args.get(1) {
        let base = as_integer(base, "int")?;
        let text = value.as_str().ok_or_else(|| {
            EvalError::TypeMismatch("int() can't convert non-string with explicit base".to_string())
        })?;
        if !(2..=36).contains(&base) {
            return Err(EvalError::InvalidArgument(
                "int() base must be >= 2 and <= 36".to_string(),
            ));
        }
        return parse_integer(text, base as u32);
    }

    match value {
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::BigInt(b) => Ok(Value::from_bigint(b.clone())),
        Value::Float(f) => float_to_integer(*f),
        Value::String(s) => parse_integer(s, 10),
        other => Err(EvalError::TypeMismatch(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn parse_integer(text: &str, base: u32) -> EvalResult<Value> {
    let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
    let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    if !digits.is_empty() {
        if let Some(parsed) = BigInt::parse_bytes(digits.as_bytes(), base) {
            return Ok(Value::from_bigint(parsed));
        }
    }
    Err(EvalError::InvalidArgument(format!(
        "invalid literal for int() with base {}: '{}'",
        base, text
    )))
}

fn fn_float(args: &[Value]) -> EvalResult<Value> {
    require_args_range(args, 0, 1, "float")?;
    let Some(value) = args.first() else {
        return Ok(Value::Float(0.0));
    };

    match value {
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
            cleaned.parse::<f64>().map(Value::Float).map_err(|_| {
                EvalError::InvalidArgument(format!("could not convert string to float: '{}'", s))
            })
        }
        other => match other.as_number() {
            Some(Number::Big(b)) => b.to_f64().filter(|f| f.is_finite()).map(Value::Float).ok_or_else(|| {
                EvalError::Arithmetic("int too large to convert to float".to_string())
            }),
            Some(number) => Ok(Value::Float(number.to_f64())),
            None => Err(EvalError::TypeMismatch(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))),
        },
    }
}

fn fn_str(args: &[Value]) -> EvalResult<Value> {
    require_args_range(args, 0, 1, "str")?;
    Ok(Value::String(
        args.first().map(|v| v.to_string()).unwrap_or_default(),
    ))
}

fn fn_randint(args: &[Value]) -> EvalResult<Value> {
    require_args(args, 1, "randint")?;
    let top = as_integer(&args[0], "randint")?;
    if top <= 0 {
        return Err(EvalError::InvalidArgument(format!(
            "randint() needs a positive upper bound, got {}",
            top
        )));
    }
    Ok(Value::Int(rand::thread_rng().gen_range(0..top)))
}

fn fn_rand(args: &[Value]) -> EvalResult<Value> {
    require_args(args, 0, "rand")?;
    Ok(Value::Float(rand::thread_rng().gen::<f64>()))
}

// =============================================================================
// COLLECTION CONSTRUCTORS
// =============================================================================

fn fn_list(args: &[Value]) -> EvalResult<Value> {
    require_args_range(args, 0, 1, "list")?;
    match args.first() {
        Some(value) => Ok(Value::List(value.iter_items()?)),
        None => Ok(Value::List(Vec::new())),
    }
}

fn fn_tuple(args: &[Value]) -> EvalResult<Value> {
    require_args_range(args, 0, 1, "tuple")?;
    match args.first() {
        Some(value) => Ok(Value::Tuple(value.iter_items()?)),
        None => Ok(Value::Tuple(Vec::new())),
    }
}

fn fn_set(args: &[Value]) -> EvalResult<Value> {
    require_args_range(args, 0, 1, "set")?;
    let mut items = IndexSet::new();
    if let Some(value) = args.first() {
        for item in value.iter_items()? {
            item.ensure_hashable()?;
            items.insert(item);
        }
    }
    Ok(Value::Set(items))
}

fn fn_dict(args: &[Value]) -> EvalResult<Value> {
    require_args_range(args, 0, 1, "dict")?;
    let mut entries = IndexMap::new();
    match args.first() {
        None => {}
        Some(Value::Map(source)) => entries = source.clone(),
        Some(value) => {
            for (position, pair) in value.iter_items()?.into_iter().enumerate() {
                let (key, item) = match pair {
                    Value::List(mut kv) | Value::Tuple(mut kv) if kv.len() == 2 => {
                        let item = kv.pop().unwrap_or(Value::Null);
                        let key = kv.pop().unwrap_or(Value::Null);
                        (key, item)
                    }
                    other => {
                        return Err(EvalError::TypeMismatch(format!(
                            "dictionary update sequence element #{} has type '{}'; expected a pair",
                            position,
                            other.type_name()
                        )))
                    }
                };
                key.ensure_hashable()?;
                entries.insert(key, item);
            }
        }
    }
    Ok(Value::Map(entries))
}

// =============================================================================
// STANDARD FUNCTIONS
// =============================================================================

fn fn_len(args: &[Value]) -> EvalResult<Value> {
    require_args(args, 1, "len")?;
    args[0].length().map(Value::from).ok_or_else(|| {
        EvalError::TypeMismatch(format!(
            "object of type '{}' has no len()",
            args[0].type_name()
        ))
    })
}

fn fn_range(args: &[Value], limits: &Limits) -> EvalResult<Value> {
    require_args_range(args, 1, 3, "range")?;
    let (start, stop, step) = match args.len() {
        1 => (0, as_integer(&args[0], "range")?, 1),
        2 => (as_integer(&args[0], "range")?, as_integer(&args[1], "range")?, 1),
        _ => (
            as_integer(&args[0], "range")?,
            as_integer(&args[1], "range")?,
            as_integer(&args[2], "range")?,
        ),
    };
    if step == 0 {
        return Err(EvalError::InvalidArgument(
            "range() arg 3 must not be zero".to_string(),
        ));
    }

    // Size is computed in i128 so the check happens before any allocation.
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    let count = if step > 0 && stop > start {
        (stop - start + step - 1) / step
    } else if step < 0 && stop < start {
        (start - stop - step - 1) / -step
    } else {
        0
    };
    governor::check_length(usize::try_from(count).unwrap_or(usize::MAX), limits)?;

    let items = (0..count)
        .map(|i| Value::Int((start + i * step) as i64))
        .collect();
    Ok(Value::List(items))
}

fn fn_sum(args: &[Value], limits: &Limits) -> EvalResult<Value> {
    require_args_range(args, 1, 2, "sum")?;
    let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
    if matches!(total, Value::String(_)) {
        return Err(EvalError::TypeMismatch(
            "sum() can't sum strings; use ''.join(seq) instead".to_string(),
        ));
    }
    for item in args[0].iter_items()? {
        total = operators::add(&total, &item, limits)?;
    }
    Ok(total)
}

/// `min`/`max`: `wanted` is the ordering an item must have against the current best to replace it
fn fn_extreme(args: &[Value], name: &str, wanted: Ordering) -> EvalResult<Value> {
    if args.is_empty() {
        return Err(EvalError::InvalidArgument(format!(
            "{}() expected at least 1 argument, got 0",
            name
        )));
    }
    let items = if args.len() == 1 {
        args[0].iter_items()?
    } else {
        args.to_vec()
    };

    let mut iter = items.into_iter();
    let Some(mut best) = iter.next() else {
        return Err(EvalError::InvalidArgument(format!(
            "{}() arg is an empty sequence",
            name
        )));
    };
    for item in iter {
        if item.compare(&best)? == Some(wanted) {
            best = item;
        }
    }
    Ok(best)
}

fn fn_abs(args: &[Value]) -> EvalResult<Value> {
    require_args(args, 1, "abs")?;
    match args[0].as_number() {
        Some(Number::Int(i)) => Ok(i
            .checked_abs()
            .map(Value::Int)
            .unwrap_or_else(|| Value::from_bigint(BigInt::from(i).abs()))),
        Some(Number::Big(b)) => Ok(Value::from_bigint(b.abs())),
        Some(Number::Float(f)) => Ok(Value::Float(f.abs())),
        None => Err(EvalError::TypeMismatch(format!(
            "bad operand type for abs(): '{}'",
            args[0].type_name()
        ))),
    }
}

fn fn_round(args: &[Value]) -> EvalResult<Value> {
    require_args_range(args, 1, 2, "round")?;
    let digits = match args.get(1) {
        None | Some(Value::Null) => None,
        Some(value) => Some(as_integer(value, "round")?),
    };

    match (args[0].as_number(), digits) {
        (Some(Number::Float(f)), None) => float_to_integer(f.round_ties_even()),
        (Some(Number::Float(f)), Some(n)) => {
            let factor = 10f64.powi(n.clamp(-308, 308) as i32);
            let rounded = (f * factor).round_ties_even() / factor;
            Ok(Value::Float(if rounded.is_finite() { rounded } else { f }))
        }
        (Some(Number::Int(i)), _) => Ok(Value::Int(i)),
        (Some(Number::Big(b)), _) => Ok(Value::from_bigint(b)),
        (None, _) => Err(EvalError::TypeMismatch(format!(
            "type '{}' doesn't define __round__",
            args[0].type_name()
        ))),
    }
}

fn fn_bool(args: &[Value]) -> EvalResult<Value> {
    require_args_range(args, 0, 1, "bool")?;
    Ok(Value::Bool(args.first().is_some_and(Value::is_truthy)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(table: &FunctionTable, name: &str, args: &[Value]) -> EvalResult<Value> {
        match table.get(name) {
            Some(HostFunction::Native(f)) => f(args),
            Some(HostFunction::WithNames(f)) => f(&mut HashMap::new(), args),
            None => Err(EvalError::FunctionNotDefined { name: name.to_string() }),
        }
    }

    #[test]
    fn test_default_set() {
        let table = FunctionTable::defaults();
        assert_eq!(table.names(), vec!["float", "int", "rand", "randint", "str"]);
        assert!(!table.contains("list"));
        assert!(FunctionTable::compound().contains("dict"));
        assert!(FunctionTable::new().is_empty());
    }

    #[test]
    fn test_conversions() {
        let table = FunctionTable::defaults();
        assert_eq!(call(&table, "int", &[Value::from(" 42 ")]).unwrap(), Value::Int(42));
        assert_eq!(call(&table, "int", &[Value::Float(-3.9)]).unwrap(), Value::Int(-3));
        assert_eq!(call(&table, "int", &[Value::from("ff"), Value::Int(16)]).unwrap(), Value::Int(255));
        assert!(matches!(
            call(&table, "int", &[Value::from("x")]),
            Err(EvalError::InvalidArgument(_))
        ));
        assert!(matches!(
            call(&table, "int", &[Value::List(vec![])]),
            Err(EvalError::TypeMismatch(_))
        ));
        assert_eq!(call(&table, "float", &[Value::from("2.5")]).unwrap(), Value::Float(2.5));
        assert_eq!(call(&table, "str", &[Value::Float(1.0)]).unwrap(), Value::from("1.0"));
        assert_eq!(call(&table, "str", &[]).unwrap(), Value::from(""));
    }

    #[test]
    fn test_random_functions_stay_in_range() {
        let table = FunctionTable::defaults();
        for _ in 0..50 {
            let n = call(&table, "randint", &[Value::Int(5)]).unwrap().as_i64().unwrap();
            assert!((0..5).contains(&n));
            let f = call(&table, "rand", &[]).unwrap().as_f64().unwrap();
            assert!((0.0..1.0).contains(&f));
        }
        assert!(call(&table, "randint", &[Value::Int(0)]).is_err());
    }

    #[test]
    fn test_collection_constructors() {
        let table = FunctionTable::compound();
        assert_eq!(
            call(&table, "list", &[Value::from("ab")]).unwrap(),
            Value::List(vec![Value::from("a"), Value::from("b")])
        );
        let pairs = Value::List(vec![Value::Tuple(vec![Value::from("k"), Value::Int(1)])]);
        let dict = call(&table, "dict", &[pairs]).unwrap();
        assert_eq!(dict.repr(), "{'k': 1}");
        assert!(matches!(
            call(&table, "set", &[Value::List(vec![Value::List(vec![])])]),
            Err(EvalError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_standard_set() {
        let limits = Limits::default();
        let table = FunctionTable::new().with_standard(&limits);
        let xs = Value::List(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        assert_eq!(call(&table, "len", &[xs.clone()]).unwrap(), Value::Int(3));
        assert_eq!(call(&table, "sum", &[xs.clone()]).unwrap(), Value::Int(6));
        assert_eq!(call(&table, "min", &[xs.clone()]).unwrap(), Value::Int(1));
        assert_eq!(call(&table, "max", &[Value::Int(4), Value::Int(9)]).unwrap(), Value::Int(9));
        assert_eq!(call(&table, "abs", &[Value::Int(-4)]).unwrap(), Value::Int(4));
        assert_eq!(call(&table, "round", &[Value::Float(2.5)]).unwrap(), Value::Int(2));
        assert_eq!(
            call(&table, "round", &[Value::Float(3.14159), Value::Int(2)]).unwrap(),
            Value::Float(3.14)
        );
        assert_eq!(call(&table, "bool", &[Value::from("")]).unwrap(), Value::Bool(false));
        assert!(call(&table, "min", &[Value::List(vec![])]).is_err());
    }

    #[test]
    fn test_range_respects_length_limit() {
        let limits = Limits {
            max_string_length: 10,
            ..Limits::default()
        };
        let table = FunctionTable::new().with_standard(&limits);
        assert_eq!(
            call(&table, "range", &[Value::Int(10), Value::Int(0), Value::Int(-3)]).unwrap(),
            Value::List(vec![Value::Int(10), Value::Int(7), Value::Int(4), Value::Int(1)])
        );
        assert!(matches!(
            call(&table, "range", &[Value::Int(i64::MAX)]),
            Err(EvalError::IterableTooLong(_))
        ));
        assert!(call(&table, "range", &[Value::Int(1), Value::Int(5), Value::Int(0)]).is_err());
    }

    #[test]
    fn test_arity_errors() {
        let table = FunctionTable::defaults();
        let err = call(&table, "randint", &[]).unwrap_err();
        assert_eq!(
            err,
            EvalError::InvalidArgument("randint() takes exactly 1 argument (0 given)".to_string())
        );
    }
}
