//! Configuration management for Ratekeeper.
//!
//! Settings are read from an optional YAML file and then overridden by
//! environment variables prefixed with `RATEKEEPER`, using `__` to descend
//! into sections (for example `RATEKEEPER__STORE__URL`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{RatekeeperError, Result};

const ENV_PREFIX: &str = "RATEKEEPER";

/// Main configuration for the Ratekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatekeeperConfig {
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Where the rate limit rules come from
    #[serde(default)]
    pub rules: RulesSourceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which counter store implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL (Redis backend only)
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Namespace prepended to every counter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Upper bound on a single store command, in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            key_prefix: default_key_prefix(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// The command timeout as a [`Duration`].
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "ratekeeper".to_string()
}

fn default_command_timeout_ms() -> u64 {
    500
}

/// Rate limit rule source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesSourceConfig {
    /// Path to the YAML rule file
    pub path: Option<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG` when set
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RatekeeperConfig {
    /// Load configuration from an optional file layered under the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| RatekeeperError::Config(e.to_string()))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RatekeeperError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RatekeeperConfig::default();
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.url, "redis://127.0.0.1:6379");
        assert_eq!(config.store.key_prefix, "ratekeeper");
        assert_eq!(config.store.command_timeout(), Duration::from_millis(500));
        assert!(config.rules.path.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
store:
  backend: memory
  key_prefix: edge
rules:
  path: /etc/ratekeeper/rules.yaml
logging:
  format: json
"#;
        let config = RatekeeperConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.key_prefix, "edge");
        assert_eq!(config.store.url, "redis://127.0.0.1:6379");
        assert_eq!(config.rules.path.as_deref(), Some("/etc/ratekeeper/rules.yaml"));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = RatekeeperConfig::load(None).unwrap();
        assert_eq!(config.store.command_timeout_ms, 500);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = RatekeeperConfig::load(Some(Path::new("/nonexistent/ratekeeper.yaml")))
            .unwrap_err();
        assert!(matches!(err, RatekeeperError::Config(_)));
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        let err = RatekeeperConfig::from_yaml("store: [not, a, map]").unwrap_err();
        assert!(matches!(err, RatekeeperError::Config(_)));
    }

    #[test]
    fn test_bundled_config_file() {
        let config = RatekeeperConfig::from_yaml(include_str!("../config/ratekeeper.yaml")).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.rules.path.as_deref(), Some("config/rules.yaml"));
    }

    #[test]
    fn test_load_layered_file() {
        let path = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/config/ratekeeper.yaml"));
        let config = RatekeeperConfig::load(Some(path)).unwrap();
        assert_eq!(config.store.key_prefix, "ratekeeper");
        assert_eq!(config.store.command_timeout_ms, 500);
        assert_eq!(config.logging.format, LogFormat::Text);
    }
}
