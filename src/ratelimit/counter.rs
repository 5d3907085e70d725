//! Fixed-window counter check against the shared store.

use tracing::{debug, trace};

use super::key::RuleKey;
use super::rules::RateLimitRule;
use crate::error::{RatekeeperError, Result};
use crate::store::CounterStore;

/// Outcome of a single counter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterDecision {
    /// First request of a fresh window; the counter was created at 1.
    Created,
    /// The request fits in the window; the counter now reads `count`.
    Incremented { count: u64 },
    /// The quota is used up; the counter was left at `count`.
    OverQuota { count: u64 },
}

impl CounterDecision {
    /// Whether the caller must limit the request.
    pub fn is_limited(&self) -> bool {
        matches!(self, CounterDecision::OverQuota { .. })
    }
}

/// Test the counter for `key` against `rule` and consume one unit if allowed.
///
/// A missing counter is created at 1 with the rule's window as its expiry.
/// An existing counter is incremented while below the quota and left
/// untouched once it reaches it, so a denied request neither grows the
/// counter nor extends the window. Expiry is the only reset. If the window
/// expires between the read and the increment, a fresh window is opened
/// instead, so a counter never outlives its expiry.
///
/// The read and the subsequent write are separate store calls. Callers racing
/// on the same key may each see the same count, so the counter can briefly
/// overshoot the quota by the number of concurrent callers.
pub async fn check_and_increment<S>(
    store: &S,
    key: &RuleKey,
    rule: &RateLimitRule,
) -> Result<CounterDecision>
where
    S: CounterStore + ?Sized,
{
    let store_key = key.to_string_key();

    let Some(raw) = store.get(&store_key).await? else {
        open_window(store, &store_key, rule).await?;
        return Ok(CounterDecision::Created);
    };

    let count: u64 = raw.trim().parse().map_err(|_| RatekeeperError::CorruptCounter {
        key: store_key.clone(),
        value: raw.clone(),
    })?;

    if count >= rule.allowed_number_of_requests {
        trace!(key = %store_key, count, limit = rule.allowed_number_of_requests, "Counter at quota");
        return Ok(CounterDecision::OverQuota { count });
    }

    let Some(next) = store.increment(&store_key).await? else {
        debug!(key = %store_key, "Counter expired before increment");
        open_window(store, &store_key, rule).await?;
        return Ok(CounterDecision::Created);
    };

    let count = u64::try_from(next).map_err(|_| RatekeeperError::CorruptCounter {
        key: store_key.clone(),
        value: next.to_string(),
    })?;
    trace!(key = %store_key, count, "Counter incremented");
    Ok(CounterDecision::Incremented { count })
}

async fn open_window<S>(store: &S, store_key: &str, rule: &RateLimitRule) -> Result<()>
where
    S: CounterStore + ?Sized,
{
    store
        .set_if_absent_with_expiry(store_key, "1", rule.time_interval.duration())
        .await?;
    debug!(
        key = %store_key,
        ttl_secs = rule.time_interval.seconds(),
        "Opened new counter window"
    );
    Ok(())
}
