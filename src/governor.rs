//! Safety governor
//!
//! Stateless checks run *before* an expensive operation. Each one either
//! passes or fails with a dedicated error that aborts the whole evaluation;
//! nothing is truncated or retried.

use crate::config::Limits;
use crate::error::{EvalError, EvalResult};
use crate::value::Value;
use tracing::debug;

/// Reject `base ** exponent` when either operand is too large or the
/// result would have more than `max_power_digits` decimal digits.
///
/// The digit estimate is `exponent * log10(|base|)`, computed in constant
/// time from the operands alone. Non-numeric operands pass; the operator
/// reports the type mismatch itself.
pub fn check_power(base: &Value, exponent: &Value, limits: &Limits) -> EvalResult<()> {
    let (Some(b), Some(e)) = (base.as_f64(), exponent.as_f64()) else {
        return Ok(());
    };

    let max = limits.max_power as f64;
    if b.abs() > max || e.abs() > max {
        debug!(limit = limits.max_power, "power guard tripped on operand magnitude");
        return Err(EvalError::NumberTooHigh(format!(
            "refusing to evaluate {} ** {} (operands are limited to {})",
            short_repr(base),
            short_repr(exponent),
            limits.max_power
        )));
    }

    let magnitude = b.abs();
    if magnitude > 1.0 && e > 0.0 {
        let digits = e * magnitude.log10();
        if digits > limits.max_power_digits as f64 {
            debug!(digits, limit = limits.max_power_digits, "power guard tripped on result size");
            return Err(EvalError::NumberTooHigh(format!(
                "{} ** {} would have about {:.0} digits (limit {})",
                short_repr(base),
                short_repr(exponent),
                digits,
                limits.max_power_digits
            )));
        }
    }

    Ok(())
}

/// Reject a string or collection bigger than `max_string_length`
///
/// `size` is a character count for strings and a [`Value::footprint`] for
/// collections, so nested strings count toward their container.
pub fn check_length(size: usize, limits: &Limits) -> EvalResult<()> {
    if size > limits.max_string_length {
        debug!(size, limit = limits.max_string_length, "length guard tripped");
        return Err(EvalError::IterableTooLong(format!(
            "size {} exceeds the limit of {}",
            size, limits.max_string_length
        )));
    }
    Ok(())
}

/// Size guard applied to a finished value (no-op for scalars)
pub fn check_value_length(value: &Value, limits: &Limits) -> EvalResult<()> {
    match value.length() {
        Some(_) => check_length(value.footprint(), limits),
        None => Ok(()),
    }
}

/// Predict the size of `sequence * times` before allocating it
pub fn check_repetition(size: usize, times: i64, limits: &Limits) -> EvalResult<()> {
    if size == 0 || times <= 0 {
        return Ok(());
    }

    let predicted = (size as u128) * (times as u128);
    if predicted > limits.max_string_length as u128 {
        debug!(size, times, limit = limits.max_string_length, "length guard tripped on repetition");
        return Err(EvalError::IterableTooLong(format!(
            "repeating a sequence of size {} {} times exceeds the limit of {}",
            size, times, limits.max_string_length
        )));
    }
    Ok(())
}

/// Reject once the running comprehension iteration total passes the ceiling
pub fn check_comprehension(count: usize, limits: &Limits) -> EvalResult<()> {
    if count > limits.max_comprehension_length {
        debug!(count, limit = limits.max_comprehension_length, "comprehension guard tripped");
        return Err(EvalError::ComprehensionTooLong {
            limit: limits.max_comprehension_length,
        });
    }
    Ok(())
}

/// Reject once more than `max_nodes` nodes have been visited
pub fn check_nodes(count: usize, limits: &Limits) -> EvalResult<()> {
    if count > limits.max_nodes {
        debug!(count, limit = limits.max_nodes, "node guard tripped");
        return Err(EvalError::TooManyNodes {
            limit: limits.max_nodes,
        });
    }
    Ok(())
}

/// Reject recursion deeper than `max_depth`
pub fn check_depth(depth: usize, limits: &Limits) -> EvalResult<()> {
    if depth > limits.max_depth {
        debug!(depth, limit = limits.max_depth, "depth guard tripped");
        return Err(EvalError::NestingTooDeep {
            limit: limits.max_depth,
        });
    }
    Ok(())
}

fn short_repr(value: &Value) -> String {
    let repr = value.repr();
    if repr.len() > 40 {
        let head: String = repr.chars().take(20).collect();
        format!("{}...", head)
    } else {
        repr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_guard_digit_estimate() {
        let limits = Limits::default();
        // 9 ** 59049 has ~56k digits
        assert!(check_power(&Value::Int(9), &Value::Int(59049), &limits).is_ok());
        // 9 ** 531441 has ~507k digits
        assert!(matches!(
            check_power(&Value::Int(9), &Value::Int(531441), &limits),
            Err(EvalError::NumberTooHigh(_))
        ));
    }

    #[test]
    fn test_power_guard_operand_magnitude() {
        let limits = Limits {
            max_power: 100,
            ..Limits::default()
        };
        assert!(check_power(&Value::Int(100), &Value::Int(2), &limits).is_ok());
        assert!(check_power(&Value::Int(101), &Value::Int(2), &limits).is_err());
        assert!(check_power(&Value::Int(2), &Value::Int(-101), &limits).is_err());
    }

    #[test]
    fn test_power_guard_ignores_small_bases() {
        let limits = Limits::default();
        assert!(check_power(&Value::Int(1), &Value::Int(4_000_000), &limits).is_ok());
        assert!(check_power(&Value::Float(0.5), &Value::Int(3_000_000), &limits).is_ok());
        assert!(check_power(&Value::from("x"), &Value::Int(2), &limits).is_ok());
    }

    #[test]
    fn test_length_guards() {
        let limits = Limits::default();
        assert!(check_length(100_000, &limits).is_ok());
        assert!(matches!(
            check_length(100_001, &limits),
            Err(EvalError::IterableTooLong(_))
        ));
        assert!(check_repetition(5, 20_000, &limits).is_ok());
        assert!(check_repetition(4, 50_000, &limits).is_err());
        assert!(check_repetition(4, i64::MAX, &limits).is_err());
        assert!(check_repetition(0, i64::MAX, &limits).is_ok());
        assert!(check_repetition(4, -3, &limits).is_ok());
    }

    #[test]
    fn test_value_guard_counts_nested_strings() {
        let limits = Limits {
            max_string_length: 10,
            ..Limits::default()
        };
        let flat = Value::List((0..10).map(Value::Int).collect());
        assert!(check_value_length(&flat, &limits).is_ok());

        let nested = Value::List(vec![Value::from("abcdef"), Value::from("ghijk")]);
        assert_eq!(nested.length(), Some(2));
        assert!(matches!(
            check_value_length(&nested, &limits),
            Err(EvalError::IterableTooLong(_))
        ));
        assert!(check_value_length(&Value::Int(i64::MAX), &limits).is_ok());
    }

    #[test]
    fn test_counters() {
        let limits = Limits {
            max_comprehension_length: 3,
            max_nodes: 3,
            max_depth: 3,
            ..Limits::default()
        };
        assert!(check_comprehension(3, &limits).is_ok());
        assert_eq!(
            check_comprehension(4, &limits),
            Err(EvalError::ComprehensionTooLong { limit: 3 })
        );
        assert!(check_nodes(4, &limits).is_err());
        assert!(check_depth(4, &limits).is_err());
    }
}
