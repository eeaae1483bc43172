//! Hub configuration.
//!
//! Configuration is loaded from environment variables with defaults for
//! everything, so an empty environment yields a runnable local hub.

use common::config::{parse_or, ObservabilityConfig};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP + WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health + metrics bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default quiet window before a document snapshot is persisted.
pub const DEFAULT_DOCUMENT_DEBOUNCE_MS: u64 = 2000;

/// Default number of chat messages included in a join snapshot.
pub const DEFAULT_RECENT_MESSAGE_LIMIT: usize = 50;

/// Default maximum chat message length in characters.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 4000;

/// Default timeout for a single store call.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "hub_service=debug,tower_http=debug";

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP + WebSocket bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health + metrics bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Quiet window for debounced document writes (default: 2s).
    pub document_debounce: Duration,

    /// Chat messages included in the join snapshot (default: 50).
    pub recent_message_limit: usize,

    /// Maximum chat message length (default: 4000).
    pub max_message_length: usize,

    /// Timeout applied to every store call (default: 5s).
    pub store_timeout: Duration,

    /// Optional JSON file seeding the in-memory room store.
    pub rooms_seed_file: Option<String>,

    /// Log filter and output format.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            health_bind_address: DEFAULT_HEALTH_BIND_ADDRESS.to_string(),
            document_debounce: Duration::from_millis(DEFAULT_DOCUMENT_DEBOUNCE_MS),
            recent_message_limit: DEFAULT_RECENT_MESSAGE_LIMIT,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            rooms_seed_file: None,
            observability: ObservabilityConfig::from_vars(
                "HUB",
                DEFAULT_LOG_FILTER,
                &HashMap::new(),
            ),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("HUB_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("HUB_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let debounce_ms = parse_or(vars, "HUB_DOCUMENT_DEBOUNCE_MS", DEFAULT_DOCUMENT_DEBOUNCE_MS)
            .map_err(invalid)?;
        let recent_message_limit =
            parse_or(vars, "HUB_RECENT_MESSAGE_LIMIT", DEFAULT_RECENT_MESSAGE_LIMIT)
                .map_err(invalid)?;
        let max_message_length =
            parse_or(vars, "HUB_MAX_MESSAGE_LENGTH", DEFAULT_MAX_MESSAGE_LENGTH)
                .map_err(invalid)?;
        let store_timeout_ms = parse_or(vars, "HUB_STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS)
            .map_err(invalid)?;

        if debounce_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "HUB_DOCUMENT_DEBOUNCE_MS must be greater than 0".to_string(),
            ));
        }
        if store_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "HUB_STORE_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }
        if max_message_length == 0 {
            return Err(ConfigError::InvalidValue(
                "HUB_MAX_MESSAGE_LENGTH must be greater than 0".to_string(),
            ));
        }

        let rooms_seed_file = vars
            .get("HUB_ROOMS_SEED_FILE")
            .filter(|s| !s.trim().is_empty())
            .cloned();

        Ok(Self {
            bind_address,
            health_bind_address,
            document_debounce: Duration::from_millis(debounce_ms),
            recent_message_limit,
            max_message_length,
            store_timeout: Duration::from_millis(store_timeout_ms),
            rooms_seed_file,
            observability: ObservabilityConfig::from_vars("HUB", DEFAULT_LOG_FILTER, vars),
        })
    }
}

fn invalid((key, raw): (String, String)) -> ConfigError {
    ConfigError::InvalidValue(format!("{key} must be a non-negative integer, got '{raw}'"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::config::LogFormat;

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.document_debounce, Duration::from_secs(2));
        assert_eq!(config.recent_message_limit, 50);
        assert_eq!(config.max_message_length, 4000);
        assert_eq!(config.store_timeout, Duration::from_secs(5));
        assert!(config.rooms_seed_file.is_none());
        assert_eq!(config.observability.log_format, LogFormat::Text);
    }

    #[test]
    fn test_from_vars_overrides() {
        let vars = HashMap::from([
            ("HUB_BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string()),
            ("HUB_DOCUMENT_DEBOUNCE_MS".to_string(), "500".to_string()),
            ("HUB_RECENT_MESSAGE_LIMIT".to_string(), "10".to_string()),
            ("HUB_ROOMS_SEED_FILE".to_string(), "rooms.json".to_string()),
            ("HUB_LOG_FORMAT".to_string(), "json".to_string()),
        ]);

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.document_debounce, Duration::from_millis(500));
        assert_eq!(config.recent_message_limit, 10);
        assert_eq!(config.rooms_seed_file.as_deref(), Some("rooms.json"));
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let vars = HashMap::from([(
            "HUB_STORE_TIMEOUT_MS".to_string(),
            "soon".to_string(),
        )]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("HUB_STORE_TIMEOUT_MS")));
    }

    #[test]
    fn test_zero_debounce_is_rejected() {
        let vars = HashMap::from([(
            "HUB_DOCUMENT_DEBOUNCE_MS".to_string(),
            "0".to_string(),
        )]);

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_blank_seed_file_is_ignored() {
        let vars = HashMap::from([("HUB_ROOMS_SEED_FILE".to_string(), "  ".to_string())]);
        let config = Config::from_vars(&vars).unwrap();
        assert!(config.rooms_seed_file.is_none());
    }
}
