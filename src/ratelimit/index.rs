//! Immutable lookup from canonical key to rule.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::{debug, info};

use super::key::RuleKey;
use super::rules::{RateLimitRule, RulesConfig};
use crate::error::{RatekeeperError, Result};

/// Rules indexed by their canonical key.
///
/// Built once at startup and read-only afterwards; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct RuleIndex {
    rules: HashMap<RuleKey, RateLimitRule>,
}

impl RuleIndex {
    /// Build the index, rejecting rule sets that cannot be served.
    ///
    /// Fails if a rule has no request type, allows zero requests, or shares
    /// its canonical key with another rule.
    pub fn build<I>(rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = RateLimitRule>,
    {
        let mut index: HashMap<RuleKey, RateLimitRule> = HashMap::new();

        for rule in rules {
            let key = RuleKey::for_rule(&rule).ok_or_else(|| {
                RatekeeperError::InvalidRule(format!(
                    "rule for account {:?} and client IP {:?} has no request type",
                    rule.account_id, rule.client_ip
                ))
            })?;

            if rule.allowed_number_of_requests == 0 {
                return Err(RatekeeperError::InvalidRule(format!(
                    "rule {key} allows zero requests"
                )));
            }

            match index.entry(key) {
                Entry::Occupied(occupied) => {
                    return Err(RatekeeperError::DuplicateRule {
                        key: occupied.key().to_string_key(),
                    });
                }
                Entry::Vacant(vacant) => {
                    debug!(
                        key = %vacant.key(),
                        limit = rule.allowed_number_of_requests,
                        interval = ?rule.time_interval,
                        "Registered rate limit rule"
                    );
                    vacant.insert(rule);
                }
            }
        }

        info!(rules = index.len(), "Rule index built");
        Ok(Self { rules: index })
    }

    /// Build the index from a loaded rules configuration.
    pub fn from_config(config: RulesConfig) -> Result<Self> {
        Self::build(config.rules)
    }

    /// Look up the rule registered under `key`.
    pub fn get(&self, key: &RuleKey) -> Option<&RateLimitRule> {
        self.rules.get(key)
    }

    pub fn contains(&self, key: &RuleKey) -> bool {
        self.rules.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterate over all registered rules and their keys.
    pub fn iter(&self) -> impl Iterator<Item = (&RuleKey, &RateLimitRule)> {
        self.rules.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::key::KeyPart;
    use crate::ratelimit::rules::TimeInterval;

    fn sample_rules() -> Vec<RateLimitRule> {
        vec![
            RateLimitRule::new("search", 2, TimeInterval::Minute),
            RateLimitRule::new("search", 10, TimeInterval::Hour).with_account("A"),
            RateLimitRule::new("upload", 1, TimeInterval::Day)
                .with_account("A")
                .with_client_ip("1.1.1.1"),
        ]
    }

    #[test]
    fn test_build_and_lookup() {
        let index = RuleIndex::build(sample_rules()).unwrap();
        assert_eq!(index.len(), 3);

        let key = RuleKey::new(KeyPart::Wildcard, KeyPart::Wildcard, "search");
        let rule = index.get(&key).unwrap();
        assert_eq!(rule.allowed_number_of_requests, 2);

        let key = RuleKey::new(KeyPart::Value("A".to_string()), KeyPart::Wildcard, "search");
        assert_eq!(index.get(&key).unwrap().time_interval, TimeInterval::Hour);

        let key = RuleKey::new(KeyPart::Absent, KeyPart::Wildcard, "search");
        assert!(!index.contains(&key));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let rules = vec![
            RateLimitRule::new("search", 2, TimeInterval::Minute),
            RateLimitRule::new("search", 50, TimeInterval::Day),
        ];

        let err = RuleIndex::build(rules).unwrap_err();
        match err {
            RatekeeperError::DuplicateRule { key } => assert_eq!(key, "*|*|=search"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_absent_and_wildcard_rules_coexist() {
        let mut absent = RateLimitRule::new("search", 2, TimeInterval::Minute);
        absent.account_id = None;
        let wildcard = RateLimitRule::new("search", 5, TimeInterval::Minute);

        let index = RuleIndex::build(vec![absent, wildcard]).unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_missing_request_type_rejected() {
        let mut rule = RateLimitRule::new("search", 2, TimeInterval::Minute);
        rule.request_type = None;

        let err = RuleIndex::build(vec![rule]).unwrap_err();
        assert!(matches!(err, RatekeeperError::InvalidRule(_)));
    }

    #[test]
    fn test_zero_quota_rejected() {
        let rule = RateLimitRule::new("search", 0, TimeInterval::Minute);
        let err = RuleIndex::build(vec![rule]).unwrap_err();
        assert!(matches!(err, RatekeeperError::InvalidRule(_)));
    }

    #[test]
    fn test_build_is_idempotent() {
        let first = RuleIndex::build(sample_rules()).unwrap();
        let second = RuleIndex::build(sample_rules()).unwrap();

        assert_eq!(first.len(), second.len());
        for (key, rule) in first.iter() {
            assert_eq!(second.get(key), Some(rule));
        }
    }

    #[test]
    fn test_from_config() {
        let yaml = r#"
rules:
  - account_id: ""
    client_ip: ""
    request_type: search
    allowed_number_of_requests: 2
    time_interval: minute
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        let index = RuleIndex::from_config(config).unwrap();
        assert_eq!(index.len(), 1);
        assert!(!index.is_empty());
    }

    #[test]
    fn test_bundled_rules_file_is_valid() {
        let config = RulesConfig::from_yaml(include_str!("../../config/rules.yaml")).unwrap();
        let index = RuleIndex::from_config(config).unwrap();
        assert_eq!(index.len(), 5);

        let key = RuleKey::new(
            KeyPart::Value("partner-42".to_string()),
            KeyPart::Wildcard,
            "export",
        );
        assert_eq!(index.get(&key).unwrap().time_interval, TimeInterval::Hour);
    }
}
