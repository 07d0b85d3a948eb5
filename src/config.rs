//! Evaluator configuration
//!
//! Resource limits and attribute rules can be built in code or loaded from a
//! TOML or JSON file. Every field has a default, so a config file only needs
//! the values it changes:
//!
//! ```toml
//! compound_types = true
//!
//! [limits]
//! max_power = 1000
//! max_string_length = 5000
//!
//! [attributes]
//! deny_names = ["format", "format_map", "mro", "split"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Largest magnitude allowed for either operand of `**`
pub const DEFAULT_MAX_POWER: u64 = 4_000_000;
/// Largest estimated decimal digit count of a `**` result
pub const DEFAULT_MAX_POWER_DIGITS: u64 = 100_000;
/// Largest string or sequence that may be constructed
pub const DEFAULT_MAX_STRING_LENGTH: usize = 100_000;
/// Largest total number of comprehension iterations per evaluation
pub const DEFAULT_MAX_COMPREHENSION_LENGTH: usize = 10_000;
/// Largest number of nodes visited per evaluation
pub const DEFAULT_MAX_NODES: usize = 100_000;
/// Deepest recursion allowed while evaluating
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Resource ceilings enforced by the safety governor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_power: u64,
    pub max_power_digits: u64,
    pub max_string_length: usize,
    pub max_comprehension_length: usize,
    pub max_nodes: usize,
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_power: DEFAULT_MAX_POWER,
            max_power_digits: DEFAULT_MAX_POWER_DIGITS,
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
            max_comprehension_length: DEFAULT_MAX_COMPREHENSION_LENGTH,
            max_nodes: DEFAULT_MAX_NODES,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Serializable part of the attribute access policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeConfig {
    /// Attribute names starting with any of these are refused
    pub deny_prefixes: Vec<String>,
    /// Attribute names refused outright
    pub deny_names: Vec<String>,
    /// Whether `d.key` falls back to `d["key"]` on dicts
    pub index_fallback: bool,
}

impl Default for AttributeConfig {
    fn default() -> Self {
        Self {
            deny_prefixes: vec!["_".to_string(), "func_".to_string()],
            deny_names: vec![
                "format".to_string(),
                "format_map".to_string(),
                "mro".to_string(),
            ],
            index_fallback: true,
        }
    }
}

/// Top-level evaluator configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Enable collection literals and comprehensions
    pub compound_types: bool,
    /// Register `len`, `range`, `sum`, `min`, `max`, `abs`, `round` and `bool`
    pub standard_library: bool,
    pub limits: Limits,
    pub attributes: AttributeConfig,
}

/// Errors from loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported config format '{0}' (expected .toml or .json)")]
    UnsupportedFormat(String),
}

impl EvalConfig {
    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Parse a JSON document
    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Load a config file, choosing the format from its extension
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    /// Render as TOML (used by `sandeval config`)
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_defaults() {
        let config = EvalConfig::default();
        assert!(!config.compound_types);
        assert_eq!(config.limits.max_power, 4_000_000);
        assert_eq!(config.limits.max_string_length, 100_000);
        assert_eq!(config.limits.max_comprehension_length, 10_000);
        assert_eq!(config.attributes.deny_prefixes, vec!["_", "func_"]);
        assert!(config.attributes.index_fallback);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EvalConfig::from_toml_str(
            r#"
compound_types = true

[limits]
max_power = 100
"#,
        )
        .unwrap();

        assert!(config.compound_types);
        assert_eq!(config.limits.max_power, 100);
        assert_eq!(config.limits.max_string_length, DEFAULT_MAX_STRING_LENGTH);
        assert_eq!(config.attributes, AttributeConfig::default());
    }

    #[test]
    fn test_json_config() {
        let config =
            EvalConfig::from_json_str(r#"{"attributes": {"deny_names": ["upper"]}}"#).unwrap();
        assert_eq!(config.attributes.deny_names, vec!["upper"]);
        assert_eq!(config.attributes.deny_prefixes, vec!["_", "func_"]);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let err = EvalConfig::from_toml_str("[limits]\nmax_power = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_load_by_extension() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[limits]\nmax_nodes = 50").unwrap();
        file.flush().unwrap();

        let config = EvalConfig::load(file.path()).unwrap();
        assert_eq!(config.limits.max_nodes, 50);

        let mut other = Builder::new().suffix(".ini").tempfile().unwrap();
        writeln!(other, "x=1").unwrap();
        assert!(matches!(
            EvalConfig::load(other.path()),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EvalConfig {
            compound_types: true,
            ..EvalConfig::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(EvalConfig::from_toml_str(&text).unwrap(), config);
    }
}
