//! CLI utilities and helpers

use anyhow::{bail, Context, Result};
use colored::*;
use sandeval::{EvalConfig, EvalContext, Value};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// Turn a JSON object into a names table
pub fn names_from_json(source: &str) -> Result<HashMap<String, Value>> {
    let json: JsonValue = serde_json::from_str(source).context("names must be valid JSON")?;
    let JsonValue::Object(object) = json else {
        bail!("names must be a JSON object, e.g. '{{\"x\": 1}}'");
    };

    Ok(object
        .iter()
        .map(|(name, value)| (name.clone(), Value::from_json(value)))
        .collect())
}

/// Merge names from `--names-file` and `--names`; inline names win
pub fn load_names(inline: Option<&str>, file: Option<&Path>) -> Result<HashMap<String, Value>> {
    let mut names = HashMap::new();

    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read names file {}", path.display()))?;
        names.extend(names_from_json(&content)?);
    }
    if let Some(source) = inline {
        names.extend(names_from_json(source)?);
    }

    Ok(names)
}

/// Build the evaluation context from an optional config file and flags
pub fn build_context(
    config: Option<&Path>,
    compound: bool,
    names: HashMap<String, Value>,
) -> Result<EvalContext> {
    let mut config = match config {
        Some(path) => EvalConfig::load(path)?,
        None => EvalConfig {
            standard_library: true,
            ..EvalConfig::default()
        },
    };
    config.compound_types |= compound;

    Ok(EvalContext::from_config(&config).with_names(names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_names_from_json() {
        let names = names_from_json(r#"{"x": 1, "tags": ["a"]}"#).unwrap();
        assert_eq!(names["x"], Value::Int(1));
        assert_eq!(names["tags"], Value::List(vec![Value::from("a")]));

        assert!(names_from_json("[1, 2]").is_err());
        assert!(names_from_json("{").is_err());
    }

    #[test]
    fn test_inline_names_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"{"x": 1, "y": 2}"#).unwrap();

        let names = load_names(Some(r#"{"x": 10}"#), Some(file.path())).unwrap();
        assert_eq!(names["x"], Value::Int(10));
        assert_eq!(names["y"], Value::Int(2));
    }

    #[test]
    fn test_build_context_flags() {
        let ctx = build_context(None, true, HashMap::new()).unwrap();
        assert!(ctx.functions.contains("range"));
        assert!(ctx.functions.contains("list"));

        let ctx = build_context(None, false, HashMap::new()).unwrap();
        assert!(!ctx.functions.contains("list"));
    }
}
