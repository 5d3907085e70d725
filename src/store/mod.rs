//! Shared counter storage.
//!
//! The limiter never owns counter state itself. Every counter lives in an
//! external key-value store that offers three primitives: a plain read, an
//! atomic "set if absent with expiry", and an atomic increment. Concurrent
//! updates to the same counter are serialized by the store, not by the
//! limiter.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors surfaced by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store operation {op} timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },
    #[error("Store rejected command: {0}")]
    Command(String),
}

/// Key-value store holding textual counters with expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the value stored at `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` at `key` with the given time-to-live, unless the key
    /// already holds a live value. Never overwrites.
    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Atomically add one to the live integer stored at `key`, keeping its
    /// expiry, and return the new value.
    ///
    /// Returns `None` without writing anything if the key is absent or has
    /// expired. A counter is never created here, so it can never exist
    /// without an expiry.
    async fn increment(&self, key: &str) -> Result<Option<i64>, StoreError>;
}
