//! In-process counter store.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use super::{CounterStore, StoreError};

/// A stored value and its optional expiry deadline.
#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: impl Into<String>, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            value: value.into(),
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// A [`CounterStore`] kept in a concurrent map inside the current process.
///
/// Each operation holds the shard lock of its key for its whole duration, so
/// `set_if_absent_with_expiry` and `increment` are atomic per key. Expired
/// entries are treated as absent and replaced lazily by the next
/// `set_if_absent_with_expiry`.
///
/// Time is read from [`tokio::time::Instant`], which lets tests pause and
/// advance the clock to cross window boundaries.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a value unconditionally, optionally with a time-to-live.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>, ttl: Option<Duration>) {
        self.slots
            .insert(key.into(), Slot::new(value, ttl, Instant::now()));
    }

    /// Remaining time-to-live of a live key.
    ///
    /// Returns `None` when the key is absent, expired, or has no expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let slot = self.slots.get(key)?;
        if slot.is_expired(now) {
            return None;
        }
        slot.expires_at.map(|deadline| deadline - now)
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.iter().filter(|slot| !slot.is_expired(now)).count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let value = match self.slots.get(key) {
            Some(slot) if !slot.is_expired(now) => Some(slot.value.clone()),
            _ => None,
        };
        Ok(value)
    }

    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        match self.slots.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(Slot::new(value, Some(ttl), now));
                } else {
                    trace!(key = %key, "Key already present, not overwriting");
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(value, Some(ttl), now));
            }
        }
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let now = Instant::now();
        let Some(mut slot) = self.slots.get_mut(key) else {
            return Ok(None);
        };
        if slot.is_expired(now) {
            trace!(key = %key, "Key expired, not incrementing");
            return Ok(None);
        }

        let next = slot
            .value
            .parse::<i64>()
            .ok()
            .and_then(|current| current.checked_add(1))
            .ok_or_else(|| {
                StoreError::Command(format!("value at {key} is not an integer or out of range"))
            })?;
        slot.value = next.to_string();
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_if_absent_does_not_overwrite() {
        let store = MemoryStore::new();

        assert_ok!(store.set_if_absent_with_expiry("k", "1", Duration::from_secs(60)).await);
        assert_ok!(store.set_if_absent_with_expiry("k", "9", Duration::from_secs(60)).await);

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let store = MemoryStore::new();
        store
            .set_if_absent_with_expiry("k", "1", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k"), None);

        // An expired key can be created again.
        store
            .set_if_absent_with_expiry("k", "7", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_keeps_expiry() {
        let store = MemoryStore::new();
        store
            .set_if_absent_with_expiry("k", "1", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.increment("k").await.unwrap(), Some(2));

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_increment_missing_key_is_noop() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("k").await.unwrap(), None);

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_expired_key_is_noop() {
        let store = MemoryStore::new();
        store
            .set_if_absent_with_expiry("k", "5", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(store.increment("k").await.unwrap(), None);

        // The key stays gone, so a new window can still be opened with a TTL.
        assert_eq!(store.get("k").await.unwrap(), None);
        store
            .set_if_absent_with_expiry("k", "1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_increment_non_integer_fails() {
        let store = MemoryStore::new();
        store.insert("k", "abc", None);

        let err = assert_err!(store.increment("k").await);
        assert!(matches!(err, StoreError::Command(_)));
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("abc"));
    }
}
