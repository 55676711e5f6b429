//! Multiplexer configuration with validation.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Default per-request timeout: 90 seconds.
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_millis(90_000);

/// Default bound on retained unresolved records.
pub const DEFAULT_MAX_UNRESOLVED: usize = 1024;

/// Default retention of an unresolved record.
pub const DEFAULT_UNRESOLVED_RETENTION: Duration = Duration::from_secs(600);

/// Multiplexer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Timeout applied when a caller does not override it
    #[serde(with = "duration_ms")]
    pub default_timeout: Duration,
    /// Maximum unresolved records kept for late-reply diagnostics
    pub max_unresolved: usize,
    /// How long an unresolved record is kept
    #[serde(with = "duration_ms")]
    pub unresolved_retention: Duration,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_WORKER_TIMEOUT,
            max_unresolved: DEFAULT_MAX_UNRESOLVED,
            unresolved_retention: DEFAULT_UNRESOLVED_RETENTION,
        }
    }
}

impl MuxConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `WORKER_MUX_TIMEOUT_MS`: default request timeout (default: 90000)
    /// - `WORKER_MUX_MAX_UNRESOLVED`: unresolved record bound (default: 1024)
    /// - `WORKER_MUX_UNRESOLVED_RETENTION_SECS`: record retention (default: 600)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_timeout: env_parse::<u64>("WORKER_MUX_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_timeout),
            max_unresolved: env_parse("WORKER_MUX_MAX_UNRESOLVED")
                .unwrap_or(defaults.max_unresolved),
            unresolved_retention: env_parse::<u64>("WORKER_MUX_UNRESOLVED_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.unresolved_retention),
        }
    }

    /// Override the default timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "default timeout cannot be 0".into(),
            ));
        }

        if self.max_unresolved == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_unresolved cannot be 0".into(),
            ));
        }

        if self.unresolved_retention.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "unresolved retention cannot be 0".into(),
            ));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
}

/// Durations on the wire are whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MuxConfig::default();
        assert_eq!(config.default_timeout, Duration::from_secs(90));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = MuxConfig::default().with_default_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = MuxConfig {
            max_unresolved: 0,
            ..MuxConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLimit(_))));
    }

    #[test]
    fn test_serde_uses_milliseconds_and_defaults() {
        let config: MuxConfig = serde_json::from_str(r#"{ "default_timeout": 250 }"#).unwrap();
        assert_eq!(config.default_timeout, Duration::from_millis(250));
        assert_eq!(config.max_unresolved, DEFAULT_MAX_UNRESOLVED);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["default_timeout"], 250);
        assert_eq!(json["unresolved_retention"], 600_000);
    }
}
