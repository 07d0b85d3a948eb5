//! Built-in methods on values
//!
//! `"abc".upper()` and `d.get("k", 0)` are served from here. The evaluator
//! applies the attribute policy before it gets this far, so a denied name
//! never reaches [`call_method`].

use crate::config::Limits;
use crate::error::{EvalError, EvalResult};
use crate::governor;
use crate::value::Value;

/// Call `method` on `receiver`
pub fn call_method(receiver: &Value, method: &str, args: &[Value], limits: &Limits) -> EvalResult<Value> {
    match receiver {
        Value::String(s) => string_method(s, method, args, limits),
        Value::List(items) | Value::Tuple(items) => sequence_method(receiver, items, method, args),
        Value::Map(_) => map_method(receiver, method, args),
        _ => Err(missing(method)),
    }
}

fn missing(method: &str) -> EvalError {
    EvalError::AttributeDoesNotExist {
        attr: method.to_string(),
    }
}

fn arity(args: &[Value], min: usize, max: usize, method: &str) -> EvalResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(EvalError::InvalidArgument(format!(
            "{}() takes {} argument{} ({} given)",
            method,
            expected,
            if max == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

fn string_arg<'a>(args: &'a [Value], index: usize, method: &str) -> EvalResult<&'a str> {
    args[index].as_str().ok_or_else(|| {
        EvalError::TypeMismatch(format!(
            "{}() argument must be str, not '{}'",
            method,
            args[index].type_name()
        ))
    })
}

// =============================================================================
// STRING METHODS
// =============================================================================

fn string_method(s: &str, method: &str, args: &[Value], limits: &Limits) -> EvalResult<Value> {
    match method {
        "lower" => {
            arity(args, 0, 0, method)?;
            Ok(Value::String(s.to_lowercase()))
        }
        "upper" => {
            arity(args, 0, 0, method)?;
            Ok(Value::String(s.to_uppercase()))
        }
        "strip" | "lstrip" | "rstrip" => {
            arity(args, 0, 1, method)?;
            let chars: Option<Vec<char>> = match args.first() {
                None | Some(Value::Null) => None,
                Some(_) => Some(string_arg(args, 0, method)?.chars().collect()),
            };
            let matches = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            let stripped = match method {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            };
            Ok(Value::String(stripped.to_string()))
        }
        "split" => {
            arity(args, 0, 2, method)?;
            let max_split = match args.get(1) {
                Some(value) => value.as_i64().filter(|n| *n >= 0).map(|n| n as usize),
                None => None,
            };
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Null) => match max_split {
                    Some(n) => split_whitespace_n(s, n),
                    None => s.split_whitespace().map(Value::from).collect(),
                },
                Some(_) => {
                    let separator = string_arg(args, 0, method)?;
                    if separator.is_empty() {
                        return Err(EvalError::InvalidArgument("empty separator".to_string()));
                    }
                    match max_split {
                        Some(n) => s.splitn(n + 1, separator).map(Value::from).collect(),
                        None => s.split(separator).map(Value::from).collect(),
                    }
                }
            };
            Ok(Value::List(parts))
        }
        "join" => {
            arity(args, 1, 1, method)?;
            let items = args[0].iter_items()?;
            let mut pieces = Vec::with_capacity(items.len());
            for (position, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(piece) => pieces.push(piece),
                    None => {
                        return Err(EvalError::TypeMismatch(format!(
                            "sequence item {}: expected str instance, '{}' found",
                            position,
                            item.type_name()
                        )))
                    }
                }
            }
            let total: usize = pieces.iter().map(|p| p.chars().count()).sum::<usize>()
                + s.chars().count() * pieces.len().saturating_sub(1);
            governor::check_length(total, limits)?;
            Ok(Value::String(pieces.join(s)))
        }
        "replace" => {
            arity(args, 2, 3, method)?;
            let old = string_arg(args, 0, method)?;
            let new = string_arg(args, 1, method)?;
            let count = match args.get(2) {
                Some(value) => value.as_i64().filter(|n| *n >= 0).map(|n| n as usize),
                None => None,
            };

            let occurrences = if old.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(old).count()
            };
            let occurrences = count.map_or(occurrences, |c| c.min(occurrences));
            let predicted = (s.chars().count() + occurrences * new.chars().count())
                .saturating_sub(occurrences * old.chars().count());
            governor::check_length(predicted, limits)?;

            Ok(Value::String(match count {
                Some(n) => s.replacen(old, new, n),
                None => s.replace(old, new),
            }))
        }
        "startswith" | "endswith" => {
            arity(args, 1, 1, method)?;
            let candidates = match &args[0] {
                Value::Tuple(items) => items.clone(),
                other => vec![other.clone()],
            };
            for candidate in &candidates {
                let affix = candidate.as_str().ok_or_else(|| {
                    EvalError::TypeMismatch(format!(
                        "{} first arg must be str or a tuple of str, not '{}'",
                        method,
                        candidate.type_name()
                    ))
                })?;
                let hit = if method == "startswith" {
                    s.starts_with(affix)
                } else {
                    s.ends_with(affix)
                };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "find" => {
            arity(args, 1, 1, method)?;
            let needle = string_arg(args, 0, method)?;
            Ok(match s.find(needle) {
                Some(byte) => Value::from(s[..byte].chars().count()),
                None => Value::Int(-1),
            })
        }
        "count" => {
            arity(args, 1, 1, method)?;
            let needle = string_arg(args, 0, method)?;
            let count = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle).count()
            };
            Ok(Value::from(count))
        }
        "title" => {
            arity(args, 0, 0, method)?;
            let mut out = String::with_capacity(s.len());
            let mut previous_cased = false;
            for c in s.chars() {
                if previous_cased {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                previous_cased = c.is_alphabetic();
            }
            Ok(Value::String(out))
        }
        "capitalize" => {
            arity(args, 0, 0, method)?;
            let mut chars = s.chars();
            let out = match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            };
            Ok(Value::String(out))
        }
        "isdigit" => {
            arity(args, 0, 0, method)?;
            Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())))
        }
        "isalpha" => {
            arity(args, 0, 0, method)?;
            Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)))
        }
        _ => Err(missing(method)),
    }
}

fn split_whitespace_n(s: &str, max_split: usize) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if parts.len() == max_split {
            parts.push(Value::from(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(Value::from(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(Value::from(rest));
                break;
            }
        }
    }
    parts
}

// =============================================================================
// SEQUENCE AND MAPPING METHODS
// =============================================================================

fn sequence_method(receiver: &Value, items: &[Value], method: &str, args: &[Value]) -> EvalResult<Value> {
    match method {
        "index" => {
            arity(args, 1, 1, method)?;
            items
                .iter()
                .position(|item| item == &args[0])
                .map(Value::from)
                .ok_or_else(|| {
                    EvalError::Lookup(format!("{} is not in {}", args[0].repr(), receiver.type_name()))
                })
        }
        "count" => {
            arity(args, 1, 1, method)?;
            Ok(Value::from(items.iter().filter(|item| *item == &args[0]).count()))
        }
        _ => Err(missing(method)),
    }
}

fn map_method(receiver: &Value, method: &str, args: &[Value]) -> EvalResult<Value> {
    let Value::Map(entries) = receiver else {
        return Err(missing(method));
    };

    match method {
        "get" => {
            arity(args, 1, 2, method)?;
            args[0].ensure_hashable()?;
            Ok(entries
                .get(&args[0])
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::Null)))
        }
        "keys" => {
            arity(args, 0, 0, method)?;
            Ok(Value::List(entries.keys().cloned().collect()))
        }
        "values" => {
            arity(args, 0, 0, method)?;
            Ok(Value::List(entries.values().cloned().collect()))
        }
        "items" => {
            arity(args, 0, 0, method)?;
            Ok(Value::List(
                entries
                    .iter()
                    .map(|(k, v)| Value::Tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            ))
        }
        _ => Err(missing(method)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    fn call(receiver: Value, method: &str, args: &[Value]) -> EvalResult<Value> {
        call_method(&receiver, method, args, &Limits::default())
    }

    #[test]
    fn test_string_case() {
        assert_eq!(call(Value::from("Hello"), "upper", &[]).unwrap(), Value::from("HELLO"));
        assert_eq!(call(Value::from("hello world"), "title", &[]).unwrap(), Value::from("Hello World"));
        assert_eq!(call(Value::from("hELLO"), "capitalize", &[]).unwrap(), Value::from("Hello"));
    }

    #[test]
    fn test_split_and_join() {
        assert_eq!(
            call(Value::from("  a b  c "), "split", &[]).unwrap(),
            Value::List(vec![Value::from("a"), Value::from("b"), Value::from("c")])
        );
        assert_eq!(
            call(Value::from("a,b,c"), "split", &[Value::from(","), Value::Int(1)]).unwrap(),
            Value::List(vec![Value::from("a"), Value::from("b,c")])
        );
        assert_eq!(
            call(Value::from("a b c"), "split", &[Value::Null, Value::Int(1)]).unwrap(),
            Value::List(vec![Value::from("a"), Value::from("b c")])
        );
        assert_eq!(
            call(Value::from("-"), "join", &[Value::List(vec![Value::from("x"), Value::from("y")])]).unwrap(),
            Value::from("x-y")
        );
        assert!(call(Value::from("-"), "join", &[Value::List(vec![Value::Int(1)])]).is_err());
    }

    #[test]
    fn test_replace_is_length_guarded() {
        assert_eq!(
            call(Value::from("aaa"), "replace", &[Value::from("a"), Value::from("b"), Value::Int(2)]).unwrap(),
            Value::from("bba")
        );
        let big = Value::String("a".repeat(1000));
        let expansion = Value::String("x".repeat(1000));
        assert!(matches!(
            call(big, "replace", &[Value::from("a"), expansion]),
            Err(EvalError::IterableTooLong(_))
        ));
    }

    #[test]
    fn test_search_methods() {
        assert_eq!(call(Value::from("hello"), "find", &[Value::from("l")]).unwrap(), Value::Int(2));
        assert_eq!(call(Value::from("hello"), "find", &[Value::from("z")]).unwrap(), Value::Int(-1));
        assert_eq!(call(Value::from("hello"), "count", &[Value::from("l")]).unwrap(), Value::Int(2));
        let prefixes = Value::Tuple(vec![Value::from("x"), Value::from("he")]);
        assert_eq!(call(Value::from("hello"), "startswith", &[prefixes]).unwrap(), Value::Bool(true));
        assert_eq!(call(Value::from("  x\n"), "strip", &[]).unwrap(), Value::from("x"));
        assert_eq!(call(Value::from("xxhixx"), "rstrip", &[Value::from("x")]).unwrap(), Value::from("xxhi"));
    }

    #[test]
    fn test_sequence_methods() {
        let xs = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(1)]);
        assert_eq!(call(xs.clone(), "count", &[Value::Int(1)]).unwrap(), Value::Int(2));
        assert_eq!(call(xs.clone(), "index", &[Value::Int(2)]).unwrap(), Value::Int(1));
        assert!(matches!(call(xs, "index", &[Value::Int(9)]), Err(EvalError::Lookup(_))));
    }

    #[test]
    fn test_map_methods() {
        let mut entries = IndexMap::new();
        entries.insert(Value::from("a"), Value::Int(1));
        let map = Value::Map(entries);
        assert_eq!(call(map.clone(), "get", &[Value::from("a")]).unwrap(), Value::Int(1));
        assert_eq!(call(map.clone(), "get", &[Value::from("b"), Value::Int(0)]).unwrap(), Value::Int(0));
        assert_eq!(call(map.clone(), "items", &[]).unwrap().repr(), "[('a', 1)]");
        assert_eq!(call(map, "keys", &[]).unwrap(), Value::List(vec![Value::from("a")]));
    }

    #[test]
    fn test_unknown_method() {
        assert_eq!(
            call(Value::Int(1), "real", &[]),
            Err(EvalError::AttributeDoesNotExist { attr: "real".to_string() })
        );
        assert!(matches!(
            call(Value::from("x"), "encode", &[]),
            Err(EvalError::AttributeDoesNotExist { .. })
        ));
    }
}
