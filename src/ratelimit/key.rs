//! Request descriptors and canonical rule keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::rules::RateLimitRule;
use crate::error::RatekeeperError;

const SEPARATOR: char = '|';
const ESCAPE: char = '\\';

/// One position of a canonical key.
///
/// `Absent` and `Wildcard` are different states: a field that was never
/// provided does not match a rule written for "any value".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    /// The field was not provided
    Absent,
    /// The field matches any value (configured as an empty string)
    Wildcard,
    /// A concrete value
    Value(String),
}

impl KeyPart {
    /// Derive a key part from an optional field.
    ///
    /// Rules and descriptors both go through this so that lookups line up
    /// with registration.
    pub fn from_field(field: Option<&str>) -> Self {
        match field {
            None => KeyPart::Absent,
            Some("") => KeyPart::Wildcard,
            Some(value) => KeyPart::Value(value.to_owned()),
        }
    }

    fn write_to(&self, out: &mut String) {
        match self {
            KeyPart::Absent => out.push('_'),
            KeyPart::Wildcard => out.push('*'),
            KeyPart::Value(value) => {
                out.push('=');
                for c in value.chars() {
                    if c == SEPARATOR || c == ESCAPE {
                        out.push(ESCAPE);
                    }
                    out.push(c);
                }
            }
        }
    }
}

/// Canonical key addressing a rule and its counter.
///
/// The request type is always concrete; only the account and client IP
/// positions can hold a wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub account: KeyPart,
    pub client_ip: KeyPart,
    pub request_type: String,
}

impl RuleKey {
    /// Create a key from its three positions.
    pub fn new(account: KeyPart, client_ip: KeyPart, request_type: impl Into<String>) -> Self {
        Self {
            account,
            client_ip,
            request_type: request_type.into(),
        }
    }

    /// The key a configured rule is registered under.
    ///
    /// Returns `None` if the rule has no request type, since such a rule
    /// cannot be addressed.
    pub fn for_rule(rule: &RateLimitRule) -> Option<Self> {
        let request_type = rule.request_type.as_deref().filter(|t| !t.is_empty())?;
        Some(Self::new(
            KeyPart::from_field(rule.account_id.as_deref()),
            KeyPart::from_field(rule.client_ip.as_deref()),
            request_type,
        ))
    }

    /// Render the key as the string used in the counter store.
    ///
    /// Each position is tagged (`_` absent, `*` wildcard, `=` value) and
    /// separators inside values are escaped, so distinct keys never render
    /// to the same string.
    pub fn to_string_key(&self) -> String {
        let mut out = String::new();
        self.account.write_to(&mut out);
        out.push(SEPARATOR);
        self.client_ip.write_to(&mut out);
        out.push(SEPARATOR);
        KeyPart::Value(self.request_type.clone()).write_to(&mut out);
        out
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

/// One logical request to evaluate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestDescriptor {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub client_ip: Option<String>,
    #[serde(default)]
    pub request_type: Option<String>,
}

impl RequestDescriptor {
    /// Create a descriptor for a request type with no account or IP.
    pub fn new(request_type: impl Into<String>) -> Self {
        Self {
            account_id: None,
            client_ip: None,
            request_type: Some(request_type.into()),
        }
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }

    /// Candidate rule keys, most specific first.
    ///
    /// The order is: exact, wildcard account and IP, wildcard account,
    /// wildcard IP. Returns `None` without a request type.
    pub fn candidate_keys(&self) -> Option<[RuleKey; 4]> {
        let request_type = self.request_type.as_deref().filter(|t| !t.is_empty())?;
        let account = KeyPart::from_field(self.account_id.as_deref());
        let client_ip = KeyPart::from_field(self.client_ip.as_deref());

        Some([
            RuleKey::new(account.clone(), client_ip.clone(), request_type),
            RuleKey::new(KeyPart::Wildcard, KeyPart::Wildcard, request_type),
            RuleKey::new(KeyPart::Wildcard, client_ip, request_type),
            RuleKey::new(account, KeyPart::Wildcard, request_type),
        ])
    }
}

impl FromStr for RequestDescriptor {
    type Err = RatekeeperError;

    /// Parse `account=A,ip=1.1.1.1,type=search`. Fields may be omitted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut descriptor = RequestDescriptor::default();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                RatekeeperError::Config(format!("descriptor entry {pair:?} is not name=value"))
            })?;
            let value = Some(value.trim().to_string());
            match name.trim() {
                "account" | "account_id" => descriptor.account_id = value,
                "ip" | "client_ip" => descriptor.client_ip = value,
                "type" | "request_type" => descriptor.request_type = value,
                other => {
                    return Err(RatekeeperError::Config(format!(
                        "unknown descriptor field {other:?}"
                    )))
                }
            }
        }
        Ok(descriptor)
    }
}
