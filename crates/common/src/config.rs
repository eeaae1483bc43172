//! Common configuration types for Coderoom components.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text (default).
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub log_filter: String,
    /// Output format for the fmt layer
    pub log_format: LogFormat,
}

impl ObservabilityConfig {
    /// Read `<PREFIX>_LOG_FORMAT` from a variable map, falling back to text output.
    #[must_use]
    pub fn from_vars(prefix: &str, default_filter: &str, vars: &HashMap<String, String>) -> Self {
        let log_format = match vars
            .get(&format!("{prefix}_LOG_FORMAT"))
            .map(|s| s.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Self {
            log_filter: default_filter.to_string(),
            log_format,
        }
    }
}

/// Parse an optional numeric variable, returning `default` when absent.
///
/// # Errors
///
/// Returns the variable name and raw value when the value is present but
/// not a valid number.
pub fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> std::result::Result<T, (String, String)> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| (key.to_string(), raw.clone())),
        None => Ok(default),
    }
}
