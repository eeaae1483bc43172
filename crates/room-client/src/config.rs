//! Client configuration.
//!
//! Only `ROOM_HUB_URL` is required; every timing knob has a default.

use common::config::parse_or;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default per-attempt join deadline.
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 10_000;

/// Default number of join attempts before giving up with `Timeout`.
pub const DEFAULT_JOIN_MAX_ATTEMPTS: u32 = 3;

/// Default pause between join attempts.
pub const DEFAULT_JOIN_BACKOFF_MS: u64 = 1000;

/// Default time a peer link may spend without reaching `Connected`.
pub const DEFAULT_NEGOTIATION_TIMEOUT_MS: u64 = 15_000;

/// Default minimum spacing between two recovery attempts of one link.
pub const DEFAULT_RETRY_MIN_SPACING_MS: u64 = 3000;

/// Default upper bound for the exponential retry delay.
pub const DEFAULT_RETRY_BACKOFF_MAX_MS: u64 = 30_000;

/// Default number of recovery attempts before a link is `Failed`.
pub const DEFAULT_MAX_NEGOTIATION_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Join Orchestrator timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinConfig {
    pub attempt_timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_millis(DEFAULT_JOIN_TIMEOUT_MS),
            max_attempts: DEFAULT_JOIN_MAX_ATTEMPTS,
            backoff: Duration::from_millis(DEFAULT_JOIN_BACKOFF_MS),
        }
    }
}

/// Peer link timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerConfig {
    pub negotiation_timeout: Duration,
    pub retry_min_spacing: Duration,
    pub retry_backoff_max: Duration,
    pub max_retries: u32,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_millis(DEFAULT_NEGOTIATION_TIMEOUT_MS),
            retry_min_spacing: Duration::from_millis(DEFAULT_RETRY_MIN_SPACING_MS),
            retry_backoff_max: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MAX_MS),
            max_retries: DEFAULT_MAX_NEGOTIATION_RETRIES,
        }
    }
}

impl PeerConfig {
    /// Delay before recovery attempt `attempt` (1-based).
    ///
    /// Starts at `retry_min_spacing`, doubles per attempt and is capped at
    /// `retry_backoff_max`, never dropping below the minimum spacing.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_min_spacing
            .saturating_mul(factor)
            .min(self.retry_backoff_max)
            .max(self.retry_min_spacing)
    }
}

/// Room client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the hub, `http://` or `https://`.
    pub hub_url: String,
    pub join: JoinConfig,
    pub peer: PeerConfig,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let hub_url = vars
            .get("ROOM_HUB_URL")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("ROOM_HUB_URL".to_string()))?;

        if !(hub_url.starts_with("http://") || hub_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(format!(
                "ROOM_HUB_URL must start with http:// or https://, got '{hub_url}'"
            )));
        }

        let join = JoinConfig {
            attempt_timeout: Duration::from_millis(positive(
                vars,
                "ROOM_JOIN_TIMEOUT_MS",
                DEFAULT_JOIN_TIMEOUT_MS,
            )?),
            max_attempts: positive(vars, "ROOM_JOIN_MAX_ATTEMPTS", DEFAULT_JOIN_MAX_ATTEMPTS)?,
            backoff: Duration::from_millis(
                parse_or(vars, "ROOM_JOIN_BACKOFF_MS", DEFAULT_JOIN_BACKOFF_MS).map_err(invalid)?,
            ),
        };

        let peer = PeerConfig {
            negotiation_timeout: Duration::from_millis(positive(
                vars,
                "ROOM_NEGOTIATION_TIMEOUT_MS",
                DEFAULT_NEGOTIATION_TIMEOUT_MS,
            )?),
            retry_min_spacing: Duration::from_millis(positive(
                vars,
                "ROOM_RETRY_MIN_SPACING_MS",
                DEFAULT_RETRY_MIN_SPACING_MS,
            )?),
            retry_backoff_max: Duration::from_millis(positive(
                vars,
                "ROOM_RETRY_BACKOFF_MAX_MS",
                DEFAULT_RETRY_BACKOFF_MAX_MS,
            )?),
            max_retries: parse_or(
                vars,
                "ROOM_MAX_NEGOTIATION_RETRIES",
                DEFAULT_MAX_NEGOTIATION_RETRIES,
            )
            .map_err(invalid)?,
        };

        if peer.retry_backoff_max < peer.retry_min_spacing {
            return Err(ConfigError::InvalidValue(
                "ROOM_RETRY_BACKOFF_MAX_MS must not be below ROOM_RETRY_MIN_SPACING_MS"
                    .to_string(),
            ));
        }

        Ok(Self {
            hub_url,
            join,
            peer,
        })
    }

    /// WebSocket URL derived from the hub URL.
    #[must_use]
    pub fn ws_url(&self) -> String {
        if let Some(rest) = self.hub_url.strip_prefix("https://") {
            format!("wss://{rest}/ws")
        } else if let Some(rest) = self.hub_url.strip_prefix("http://") {
            format!("ws://{rest}/ws")
        } else {
            format!("{}/ws", self.hub_url)
        }
    }
}

fn positive<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + From<u8>,
{
    let value = parse_or(vars, key, default).map_err(invalid)?;
    if value == T::from(0) {
        return Err(ConfigError::InvalidValue(format!(
            "{key} must be greater than 0"
        )));
    }
    Ok(value)
}

fn invalid((key, raw): (String, String)) -> ConfigError {
    ConfigError::InvalidValue(format!("{key} must be a non-negative integer, got '{raw}'"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_hub_url_is_required() {
        let result = ClientConfig::from_vars(&HashMap::new());
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "ROOM_HUB_URL"));
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_vars(&vars(&[("ROOM_HUB_URL", "http://localhost:8080/")]))
            .unwrap();

        assert_eq!(config.hub_url, "http://localhost:8080");
        assert_eq!(config.join, JoinConfig::default());
        assert_eq!(config.peer, PeerConfig::default());
        assert_eq!(config.join.attempt_timeout, Duration::from_secs(10));
        assert_eq!(config.join.max_attempts, 3);
        assert_eq!(config.peer.max_retries, 5);
    }

    #[test]
    fn test_zero_attempts_and_timeouts_are_rejected() {
        for key in [
            "ROOM_JOIN_MAX_ATTEMPTS",
            "ROOM_JOIN_TIMEOUT_MS",
            "ROOM_NEGOTIATION_TIMEOUT_MS",
        ] {
            let result =
                ClientConfig::from_vars(&vars(&[("ROOM_HUB_URL", "http://hub"), (key, "0")]));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(_))),
                "{key}=0 should be rejected"
            );
        }
    }

    #[test]
    fn test_scheme_is_validated() {
        let result = ClientConfig::from_vars(&vars(&[("ROOM_HUB_URL", "ftp://hub")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_ws_url() {
        let config =
            ClientConfig::from_vars(&vars(&[("ROOM_HUB_URL", "https://hub.example")])).unwrap();
        assert_eq!(config.ws_url(), "wss://hub.example/ws");

        let config = ClientConfig::from_vars(&vars(&[("ROOM_HUB_URL", "http://127.0.0.1:8080")]))
            .unwrap();
        assert_eq!(config.ws_url(), "ws://127.0.0.1:8080/ws");
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let peer = PeerConfig {
            negotiation_timeout: Duration::from_secs(15),
            retry_min_spacing: Duration::from_secs(3),
            retry_backoff_max: Duration::from_secs(20),
            max_retries: 5,
        };
        assert_eq!(peer.retry_delay(1), Duration::from_secs(3));
        assert_eq!(peer.retry_delay(2), Duration::from_secs(6));
        assert_eq!(peer.retry_delay(3), Duration::from_secs(12));
        assert_eq!(peer.retry_delay(4), Duration::from_secs(20));
        assert_eq!(peer.retry_delay(40), Duration::from_secs(20));
    }
}
