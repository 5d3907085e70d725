//! Core rate limiter implementation.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

use super::counter::check_and_increment;
use super::index::RuleIndex;
use super::key::{RequestDescriptor, RuleKey};
use super::rules::RateLimitRule;
use crate::error::Result;
use crate::store::CounterStore;

/// Decides whether a batch of request descriptors must be limited.
///
/// Holds the read-only rule index and a handle to the shared counter store.
/// The limiter keeps no mutable state of its own, so one instance can serve
/// any number of concurrent callers.
pub struct RateLimiter<S: CounterStore> {
    index: Arc<RuleIndex>,
    store: Arc<S>,
}

impl<S: CounterStore> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            index: Arc::clone(&self.index),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: CounterStore> RateLimiter<S> {
    /// Create a rate limiter over a built rule index and a counter store.
    pub fn new(index: Arc<RuleIndex>, store: Arc<S>) -> Self {
        Self { index, store }
    }

    /// The rule index.
    pub fn index(&self) -> &RuleIndex {
        &self.index
    }

    /// The counter store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Find the most specific rule for a descriptor.
    ///
    /// Candidates are tried exact first, then wildcard account and IP, then
    /// wildcard account, then wildcard IP. The request type is never
    /// wildcarded. Has no side effects.
    pub fn resolve(&self, descriptor: &RequestDescriptor) -> Option<(RuleKey, &RateLimitRule)> {
        let candidates = descriptor.candidate_keys()?;
        candidates.into_iter().find_map(|key| {
            let rule = self.index.get(&key)?;
            trace!(key = %key, "Descriptor resolved to rule");
            Some((key, rule))
        })
    }

    /// Decide whether the batch must be limited, consuming quota as it goes.
    ///
    /// The batch is a set: identical descriptors count once. If any
    /// descriptor matches no rule the whole batch is limited and no counter
    /// is touched. Otherwise every matched counter is checked exactly once,
    /// even after one of them reports over quota, and the batch is limited
    /// if any of them did.
    ///
    /// Store failures and corrupt counters are returned as errors, never
    /// turned into a verdict.
    #[instrument(skip(self, descriptors), fields(descriptors = descriptors.len()))]
    pub async fn should_limit(&self, descriptors: &[RequestDescriptor]) -> Result<bool> {
        let mut seen = HashSet::with_capacity(descriptors.len());
        let mut resolved = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            if !seen.insert(descriptor) {
                continue;
            }
            match self.resolve(descriptor) {
                Some(matched) => resolved.push(matched),
                None => {
                    warn!(descriptor = ?descriptor, "No rate limit rule matches descriptor, limiting batch");
                    return Ok(true);
                }
            }
        }

        let mut limited = false;
        for (key, rule) in &resolved {
            let decision = check_and_increment(self.store.as_ref(), key, rule).await?;
            if decision.is_limited() {
                warn!(
                    key = %key,
                    limit = rule.allowed_number_of_requests,
                    interval = ?rule.time_interval,
                    "Rate limit exceeded"
                );
                limited = true;
            }
        }

        debug!(limited, checked = resolved.len(), "Rate limit decision made");
        Ok(limited)
    }
}
