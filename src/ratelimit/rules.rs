//! Rate limit rules configuration.
//!
//! Rules are loaded once at startup from YAML. Each rule names an account,
//! a client IP and a request type, plus the quota allowed per time interval.
//! An empty account or IP means "any"; leaving the field out means the rule
//! only applies to descriptors that also leave it out.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{RatekeeperError, Result};

/// Fixed window length for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInterval {
    Minute,
    Hour,
    Day,
}

impl TimeInterval {
    /// Window length in seconds.
    pub fn seconds(&self) -> u64 {
        match self {
            TimeInterval::Minute => 60,
            TimeInterval::Hour => 3600,
            TimeInterval::Day => 86400,
        }
    }

    /// Window length as a [`Duration`].
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.seconds())
    }
}

/// A configured rate limit policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Account the rule applies to (`""` matches any account)
    #[serde(default)]
    pub account_id: Option<String>,
    /// Client IP the rule applies to (`""` matches any IP)
    #[serde(default)]
    pub client_ip: Option<String>,
    /// Request type; a rule without one can never be matched
    #[serde(default)]
    pub request_type: Option<String>,
    /// Requests allowed per window
    pub allowed_number_of_requests: u64,
    /// Window length
    pub time_interval: TimeInterval,
}

impl RateLimitRule {
    /// Create a rule for a request type that matches any account and IP.
    pub fn new(
        request_type: impl Into<String>,
        allowed_number_of_requests: u64,
        time_interval: TimeInterval,
    ) -> Self {
        Self {
            account_id: Some(String::new()),
            client_ip: Some(String::new()),
            request_type: Some(request_type.into()),
            allowed_number_of_requests,
            time_interval,
        }
    }

    /// Restrict the rule to one account (`""` for any).
    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    /// Restrict the rule to one client IP (`""` for any).
    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }
}

/// A complete set of configured rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub rules: Vec<RateLimitRule>,
}

impl RulesConfig {
    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    ///
    /// Accepts either a mapping with a `rules` list or a bare list of rules.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if let Ok(rules) = serde_yaml::from_str::<Vec<RateLimitRule>>(yaml) {
            return Ok(Self { rules });
        }

        serde_yaml::from_str(yaml)
            .map_err(|e| RatekeeperError::Config(format!("Failed to parse rate limit rules: {}", e)))
    }
}
