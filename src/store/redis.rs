//! Redis-backed counter store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, RedisResult, Script};
use tracing::{debug, info};

use super::{CounterStore, StoreError};
use crate::config::StoreConfig;

/// A [`CounterStore`] talking to Redis (or any RESP-compatible server).
///
/// Counters map onto `GET`, `SET key value NX EX ttl` and a Lua script that
/// runs `INCR` only on an existing key, each of which the server executes
/// atomically. Keys are namespaced with the configured prefix. Every command
/// is bounded by the configured timeout; reconnection is left to the
/// connection manager.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    prefix: Arc<String>,
    command_timeout: Duration,
    increment_script: Script,
}

impl RedisStore {
    /// Connect to the server described by `config`.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let command_timeout = config.command_timeout();
        let client = redis::Client::open(config.url.as_str())
            .map_err(|err| StoreError::Unavailable(format!("redis client: {err}")))?;

        let manager = tokio::time::timeout(command_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout {
                op: "CONNECT",
                timeout: command_timeout,
            })?
            .map_err(|err| StoreError::Unavailable(format!("redis connect: {err}")))?;

        info!(url = %config.url, prefix = %config.key_prefix, "Connected to Redis counter store");

        Ok(Self {
            manager,
            prefix: Arc::new(config.key_prefix.clone()),
            command_timeout,
            increment_script: Script::new(INCREMENT_IF_LIVE),
        })
    }

    fn namespaced_key(&self, key: &str) -> String {
        namespaced(&self.prefix, key)
    }

    async fn run<T, F>(&self, op: &'static str, command: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        tokio::time::timeout(self.command_timeout, command)
            .await
            .map_err(|_| StoreError::Timeout {
                op,
                timeout: self.command_timeout,
            })?
            .map_err(|err| classify(op, err))
    }
}

/// `INCR` only when the key still exists, so an expired window is never
/// recreated without a TTL. Replies nil for a missing key.
const INCREMENT_IF_LIVE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('INCR', KEYS[1])
end
return false
"#;

/// `SET key value NX EX ttl`, with the TTL clamped to one second since the
/// server rejects `EX 0`.
fn set_nx_ex_cmd(key: &str, value: &str, ttl: Duration) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key)
        .arg(value)
        .arg("NX")
        .arg("EX")
        .arg(ttl.as_secs().max(1));
    cmd
}

fn namespaced(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}:{key}")
    }
}

fn classify(op: &'static str, err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Unavailable(format!("redis {op}: {err}"))
    } else if err.is_timeout() {
        StoreError::Unavailable(format!("redis {op} timed out: {err}"))
    } else {
        StoreError::Command(format!("redis {op}: {err}"))
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.manager.clone();
        let key = self.namespaced_key(key);
        self.run("GET", async move { conn.get::<_, Option<String>>(&key).await })
            .await
    }

    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let key = self.namespaced_key(key);
        let cmd = set_nx_ex_cmd(&key, value, ttl);

        let reply: Option<String> = self
            .run("SET", async move { cmd.query_async(&mut conn).await })
            .await?;
        if reply.is_none() {
            debug!(key = %key, "Counter already created by a concurrent caller");
        }
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.manager.clone();
        let key = self.namespaced_key(key);
        let script = self.increment_script.clone();

        let count: Option<i64> = self
            .run("INCR", async move {
                let invocation = script.key(&key);
                invocation.invoke_async(&mut conn).await
            })
            .await?;
        Ok(count)
    }
}
