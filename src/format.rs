//! Format specifications for `f"{value:spec}"` replacement fields
//!
//! Implements the Python mini-language
//! `[[fill]align][sign][#][0][width][grouping][.precision][type]` for
//! strings, integers and floats. Any other value only accepts an empty spec.

use crate::config::Limits;
use crate::error::{EvalError, EvalResult};
use crate::governor;
use crate::value::Value;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

/// Parsed format specification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatSpec {
    pub fill: Option<char>,
    pub align: Option<Align>,
    pub sign: Sign,
    /// `#`: `0b`/`0o`/`0x` prefixes, keep trailing zeros for `g`
    pub alternate: bool,
    pub width: Option<usize>,
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub kind: Option<char>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
    Center,
    /// Padding between the sign and the digits
    AfterSign,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Sign {
    #[default]
    Negative,
    Always,
    Space,
}

impl FormatSpec {
    /// Parse a spec; unknown or trailing characters are rejected
    pub fn parse(spec: &str) -> EvalResult<FormatSpec> {
        let chars: Vec<char> = spec.chars().collect();
        let mut parsed = FormatSpec::default();
        let mut pos = 0;

        if chars.len() >= 2 && align_of(chars[1]).is_some() {
            parsed.fill = Some(chars[0]);
            parsed.align = align_of(chars[1]);
            pos = 2;
        } else if let Some(align) = chars.first().and_then(|c| align_of(*c)) {
            parsed.align = Some(align);
            pos = 1;
        }

        let sign = match chars.get(pos) {
            Some('+') => Some(Sign::Always),
            Some(' ') => Some(Sign::Space),
            Some('-') => Some(Sign::Negative),
            _ => None,
        };
        if let Some(sign) = sign {
            parsed.sign = sign;
            pos += 1;
        }

        if chars.get(pos) == Some(&'#') {
            parsed.alternate = true;
            pos += 1;
        }

        if chars.get(pos) == Some(&'0') {
            if parsed.fill.is_none() {
                parsed.fill = Some('0');
                parsed.align.get_or_insert(Align::AfterSign);
            }
            pos += 1;
        }

        let (width, next) = digits_at(&chars, pos, spec)?;
        parsed.width = width;
        pos = next;

        if let Some(c @ (',' | '_')) = chars.get(pos) {
            parsed.grouping = Some(*c);
            pos += 1;
        }

        if chars.get(pos) == Some(&'.') {
            let (precision, next) = digits_at(&chars, pos + 1, spec)?;
            if precision.is_none() {
                return Err(invalid_spec("format specifier missing precision"));
            }
            parsed.precision = precision;
            pos = next;
        }

        if let Some(kind) = chars.get(pos) {
            if !"bcdeEfFgGnosxX%".contains(*kind) {
                return Err(invalid_spec(format!("unknown format code '{}'", kind)));
            }
            parsed.kind = Some(*kind);
            pos += 1;
        }

        if pos < chars.len() {
            return Err(invalid_spec(format!("invalid format specifier '{}'", spec)));
        }
        Ok(parsed)
    }
}

fn align_of(c: char) -> Option<Align> {
    match c {
        '<' => Some(Align::Left),
        '>' => Some(Align::Right),
        '^' => Some(Align::Center),
        '=' => Some(Align::AfterSign),
        _ => None,
    }
}

fn digits_at(chars: &[char], start: usize, spec: &str) -> EvalResult<(Option<usize>, usize)> {
    let mut end = start;
    while chars.get(end).is_some_and(char::is_ascii_digit) {
        end += 1;
    }
    if end == start {
        return Ok((None, start));
    }

    let text: String = chars[start..end].iter().collect();
    let number = text
        .parse()
        .map_err(|_| invalid_spec(format!("too many digits in format specifier '{}'", spec)))?;
    Ok((Some(number), end))
}

fn invalid_spec(message: impl Into<String>) -> EvalError {
    EvalError::InvalidArgument(message.into())
}

/// Python `format(value, spec)`
///
/// Width and precision are size-checked before any padding is allocated.
pub fn format_value(value: &Value, spec: &str, limits: &Limits) -> EvalResult<String> {
    if spec.is_empty() {
        return Ok(value.to_string());
    }

    let parsed = FormatSpec::parse(spec)?;
    governor::check_length(parsed.width.unwrap_or(0), limits)?;
    governor::check_length(parsed.precision.unwrap_or(0), limits)?;

    match value {
        Value::String(s) => format_str(s, &parsed),
        Value::Bool(b) => format_int(&BigInt::from(*b as i64), &parsed),
        Value::Int(i) => format_int(&BigInt::from(*i), &parsed),
        Value::BigInt(b) => format_int(b, &parsed),
        Value::Float(f) => format_float(*f, &parsed),
        other => Err(EvalError::TypeMismatch(format!(
            "unsupported format string passed to {}.__format__",
            other.type_name()
        ))),
    }
}

fn format_str(s: &str, spec: &FormatSpec) -> EvalResult<String> {
    if !matches!(spec.kind, None | Some('s')) {
        return Err(unknown_code(spec, "str"));
    }
    if spec.sign != Sign::Negative {
        return Err(invalid_spec("sign not allowed in string format specifier"));
    }
    if spec.align == Some(Align::AfterSign) {
        return Err(invalid_spec("'=' alignment not allowed in string format specifier"));
    }
    if spec.grouping.is_some() {
        return Err(invalid_spec("cannot specify grouping with 's'"));
    }

    let text: String = match spec.precision {
        Some(precision) => s.chars().take(precision).collect(),
        None => s.to_string(),
    };
    Ok(pad("", "", &text, spec, Align::Left))
}

fn format_int(n: &BigInt, spec: &FormatSpec) -> EvalResult<String> {
    if let Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') = spec.kind {
        let f = n.to_f64().unwrap_or(f64::INFINITY);
        return format_float(f, spec);
    }
    if spec.precision.is_some() {
        return Err(invalid_spec("precision not allowed in integer format specifier"));
    }

    let magnitude = n.abs();
    let (prefix, digits, group) = match spec.kind {
        None | Some('d') | Some('n') => ("", magnitude.to_str_radix(10), 3),
        Some('b') => ("0b", magnitude.to_str_radix(2), 4),
        Some('o') => ("0o", magnitude.to_str_radix(8), 4),
        Some('x') => ("0x", magnitude.to_str_radix(16), 4),
        Some('X') => ("0X", magnitude.to_str_radix(16).to_uppercase(), 4),
        Some('c') => {
            let c = n
                .to_u32()
                .and_then(char::from_u32)
                .ok_or_else(|| invalid_spec("%c arg not in range(0x110000)"))?;
            return Ok(pad("", "", &c.to_string(), spec, Align::Left));
        }
        Some(_) => return Err(unknown_code(spec, "int")),
    };

    let prefix = if spec.alternate { prefix } else { "" };
    let digits = match spec.grouping {
        Some(separator) => group_digits(&digits, separator, group),
        None => digits,
    };
    let sign = sign_of(n.is_negative(), spec.sign);
    Ok(pad(sign, prefix, &digits, spec, Align::Right))
}

fn format_float(f: f64, spec: &FormatSpec) -> EvalResult<String> {
    let upper = matches!(spec.kind, Some('E' | 'F' | 'G'));
    let magnitude = f.abs();

    let body = if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        "inf".to_string()
    } else {
        match spec.kind {
            Some('f' | 'F') => format!("{:.*}", spec.precision.unwrap_or(6), magnitude),
            Some('e' | 'E') => scientific(magnitude, spec.precision.unwrap_or(6)),
            Some('g' | 'G' | 'n') => general(magnitude, spec.precision, spec.alternate),
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
            None => match spec.precision {
                None => Value::Float(magnitude).repr(),
                Some(precision) => {
                    let text = general(magnitude, Some(precision), spec.alternate);
                    if text.contains(['.', 'e']) {
                        text
                    } else {
                        format!("{}.0", text)
                    }
                }
            },
            Some(_) => return Err(unknown_code(spec, "float")),
        }
    };

    let body = if upper { body.to_uppercase() } else { body };
    let body = match spec.grouping {
        Some(separator) if f.is_finite() => {
            let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
            format!("{}{}", group_digits(&body[..split], separator, 3), &body[split..])
        }
        _ => body,
    };

    let sign = sign_of(f.is_sign_negative() && !f.is_nan(), spec.sign);
    Ok(pad(sign, "", &body, spec, Align::Right))
}

/// `1.5e+03` style with `precision` digits after the point
fn scientific(f: f64, precision: usize) -> String {
    let formatted = format!("{:.*e}", precision, f);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => formatted,
    }
}

/// `g`: fixed or scientific depending on the exponent, trailing zeros dropped
fn general(f: f64, precision: Option<usize>, keep_zeros: bool) -> String {
    let significant = precision.unwrap_or(6).max(1);
    let rounded = scientific(f, significant - 1);
    let exponent: i64 = rounded
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);

    let text = if (-4..significant as i64).contains(&exponent) {
        let decimals = (significant as i64 - 1 - exponent).max(0) as usize;
        format!("{:.*}", decimals, f)
    } else {
        rounded
    };

    if keep_zeros {
        return text;
    }
    match text.split_once('e') {
        Some((mantissa, exponent)) => format!("{}e{}", strip_zeros(mantissa), exponent),
        None => strip_zeros(&text).to_string(),
    }
}

fn strip_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn group_digits(digits: &str, separator: char, size: usize) -> String {
    let count = digits.chars().count();
    let mut out = String::with_capacity(digits.len() + count / size);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (count - i) % size == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out
}

fn sign_of(negative: bool, sign: Sign) -> &'static str {
    match (negative, sign) {
        (true, _) => "-",
        (false, Sign::Always) => "+",
        (false, Sign::Space) => " ",
        (false, Sign::Negative) => "",
    }
}

fn pad(sign: &str, prefix: &str, body: &str, spec: &FormatSpec, default: Align) -> String {
    let len = sign.chars().count() + prefix.chars().count() + body.chars().count();
    let width = spec.width.unwrap_or(0);
    if len >= width {
        return format!("{}{}{}", sign, prefix, body);
    }

    let fill = spec.fill.unwrap_or(' ');
    let padding = |n: usize| -> String { std::iter::repeat(fill).take(n).collect() };
    let missing = width - len;
    match spec.align.unwrap_or(default) {
        Align::Left => format!("{}{}{}{}", sign, prefix, body, padding(missing)),
        Align::Right => format!("{}{}{}{}", padding(missing), sign, prefix, body),
        Align::Center => {
            let left = missing / 2;
            format!(
                "{}{}{}{}{}",
                padding(left),
                sign,
                prefix,
                body,
                padding(missing - left)
            )
        }
        Align::AfterSign => format!("{}{}{}{}", sign, prefix, padding(missing), body),
    }
}

fn unknown_code(spec: &FormatSpec, type_name: &str) -> EvalError {
    invalid_spec(format!(
        "unknown format code '{}' for object of type '{}'",
        spec.kind.unwrap_or('?'),
        type_name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fmt(value: impl Into<Value>, spec: &str) -> String {
        format_value(&value.into(), spec, &Limits::default()).unwrap()
    }

    #[test]
    fn test_parse_spec() {
        let spec = FormatSpec::parse("*^+#012,.3f").unwrap();
        assert_eq!(spec.fill, Some('*'));
        assert_eq!(spec.align, Some(Align::Center));
        assert_eq!(spec.sign, Sign::Always);
        assert!(spec.alternate);
        assert_eq!(spec.width, Some(12));
        assert_eq!(spec.grouping, Some(','));
        assert_eq!(spec.precision, Some(3));
        assert_eq!(spec.kind, Some('f'));

        assert_eq!(FormatSpec::parse("").unwrap(), FormatSpec::default());
        assert!(FormatSpec::parse("5q").is_err());
        assert!(FormatSpec::parse(".f").is_err());
        assert!(FormatSpec::parse("5.2f!").is_err());
    }

    #[test]
    fn test_format_strings() {
        assert_eq!(fmt("dramatic", "!<11"), "dramatic!!!");
        assert_eq!(fmt("ab", ">4"), "  ab");
        assert_eq!(fmt("ab", "^5"), " ab  ");
        assert_eq!(fmt("abcdef", ".3"), "abc");
        assert_eq!(fmt("ab", "4"), "ab  ");
        assert!(format_value(&Value::from("ab"), "d", &Limits::default()).is_err());
        assert!(format_value(&Value::from("ab"), "+", &Limits::default()).is_err());
    }

    #[test]
    fn test_format_integers() {
        assert_eq!(fmt(42, ""), "42");
        assert_eq!(fmt(42, "5"), "   42");
        assert_eq!(fmt(-42, "05"), "-0042");
        assert_eq!(fmt(42, "+"), "+42");
        assert_eq!(fmt(1234567, ","), "1,234,567");
        assert_eq!(fmt(255, "#x"), "0xff");
        assert_eq!(fmt(255, "#010x"), "0x000000ff");
        assert_eq!(fmt(5, "b"), "101");
        assert_eq!(fmt(65, "c"), "A");
        assert_eq!(fmt(3, ".2f"), "3.00");
        assert_eq!(fmt(true, ">3"), "  1");
        assert!(format_value(&Value::Int(1), ".2", &Limits::default()).is_err());
    }

    #[test]
    fn test_format_floats() {
        assert_eq!(fmt(3.14159, ".2f"), "3.14");
        assert_eq!(fmt(2.5, ""), "2.5");
        assert_eq!(fmt(1234.5, ",.1f"), "1,234.5");
        assert_eq!(fmt(0.25, ".0%"), "25%");
        assert_eq!(fmt(1234.5, "e"), "1.234500e+03");
        assert_eq!(fmt(0.00001234, ".2E"), "1.23E-05");
        assert_eq!(fmt(1234.5, "g"), "1234.5");
        assert_eq!(fmt(1234567.0, "g"), "1.23457e+06");
        assert_eq!(fmt(1.0, ".3"), "1.0");
        assert_eq!(fmt(-1.5, "08.2f"), "-0001.50");
        assert_eq!(fmt(f64::INFINITY, "F"), "INF");
        assert!(format_value(&Value::Float(1.0), "x", &Limits::default()).is_err());
    }

    #[test]
    fn test_other_values_need_an_empty_spec() {
        let list = Value::List(vec![Value::Int(1)]);
        assert_eq!(format_value(&list, "", &Limits::default()).unwrap(), "[1]");
        assert!(matches!(
            format_value(&list, ">10", &Limits::default()),
            Err(EvalError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_width_is_size_checked() {
        assert!(matches!(
            format_value(&Value::from("x"), ">1000000000", &Limits::default()),
            Err(EvalError::IterableTooLong(_))
        ));
        assert!(matches!(
            format_value(&Value::Float(1.0), ".1000000f", &Limits::default()),
            Err(EvalError::IterableTooLong(_))
        ));
    }
}
