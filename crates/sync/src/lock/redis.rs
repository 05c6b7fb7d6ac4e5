//! Redis lock backend.
//!
//! Acquisition is `SET key value NX PX ttl`. Renewal and release run as Lua
//! scripts so the ownership check and the mutation execute atomically on
//! the server.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::bb8::{Pool, PooledConnection, RunError};
use bb8_redis::redis::{self, Cmd, RedisError};
use bb8_redis::RedisConnectionManager;

use super::{LockBackend, LockError};

/// Extend the key's expiry only while it still holds the caller's token.
const RENEW_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end";

/// Delete the key only while it still holds the caller's token.
const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end";

/// Maximum pooled connections to Redis.
const POOL_MAX_SIZE: u32 = 8;

/// Pool checkout timeout; beyond it acquisition fails closed.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Lock backend over a `bb8` pool of Redis connections.
pub struct RedisLockBackend {
    pool: Pool<RedisConnectionManager>,
}

impl RedisLockBackend {
    /// Build a connection pool for `redis_url` (e.g. `redis://127.0.0.1/`).
    pub async fn connect(redis_url: &str) -> Result<Self, LockError> {
        let manager = RedisConnectionManager::new(redis_url)
            .map_err(|e| LockError::Unavailable(e.to_string()))?;
        let pool = Pool::builder()
            .max_size(POOL_MAX_SIZE)
            .connection_timeout(CONNECTION_TIMEOUT)
            .build(manager)
            .await
            .map_err(|e| LockError::Unavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn connection(
        &self,
    ) -> Result<PooledConnection<'_, RedisConnectionManager>, LockError> {
        self.pool.get().await.map_err(map_run_error)
    }
}

fn map_run_error(err: RunError<RedisError>) -> LockError {
    match err {
        RunError::User(e) => LockError::Unavailable(e.to_string()),
        RunError::TimedOut => LockError::Unavailable("connection pool timed out".to_string()),
    }
}

fn map_command_error(err: RedisError) -> LockError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
        LockError::Unavailable(err.to_string())
    } else {
        LockError::Command(err.to_string())
    }
}

/// `EVAL script 1 key args...`, run atomically on the server.
fn eval_cmd(script: &str, key: &str) -> Cmd {
    let mut cmd = redis::cmd("EVAL");
    cmd.arg(script).arg(1).arg(key);
    cmd
}

/// Redis expiries are whole milliseconds and must be positive.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut *conn)
            .await
            .map_err(map_command_error)?;
        Ok(reply.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let exists: bool = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .map_err(map_command_error)?;
        Ok(exists)
    }

    async fn extend_if_owner(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let extended: i64 = eval_cmd(RENEW_SCRIPT, key)
            .arg(value)
            .arg(ttl_millis(ttl))
            .query_async(&mut *conn)
            .await
            .map_err(map_command_error)?;
        Ok(extended == 1)
    }

    async fn delete_if_owner(&self, key: &str, value: &str) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = eval_cmd(RELEASE_SCRIPT, key)
            .arg(value)
            .query_async(&mut *conn)
            .await
            .map_err(map_command_error)?;
        Ok(deleted == 1)
    }
}
