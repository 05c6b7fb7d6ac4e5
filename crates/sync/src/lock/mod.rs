//! Named mutual-exclusion locks with expiry and owner tokens.
//!
//! A lock is a key in a shared store whose value is an opaque owner token.
//! Acquisition is a single set-if-absent; renewal and release compare the
//! stored token with the caller's before touching the key, so a holder that
//! lost its lock (expiry followed by reacquisition) can neither extend nor
//! delete the new owner's lock.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use memory::InMemoryLockBackend;
pub use self::redis::RedisLockBackend;

/// Namespace prefix for lock keys.
pub const LOCK_KEY_PREFIX: &str = "dealersync:lock:";

/// Build the store key for a process type.
pub fn lock_key(process_type: &str) -> String {
    format!("{LOCK_KEY_PREFIX}{process_type}")
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for lock store failures.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The store could not be reached (connection, pool checkout).
    #[error("Lock store unavailable: {0}")]
    Unavailable(String),

    /// The store was reached but rejected or failed the command.
    #[error("Lock store command failed: {0}")]
    Command(String),
}

// ---------------------------------------------------------------------------
// Backend port
// ---------------------------------------------------------------------------

/// Atomic primitives a lock store must provide.
///
/// Every method must be a single atomic operation against the store.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Store `value` under `key` with `ttl` unless a live value exists.
    /// Returns `true` when the value was stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, LockError>;

    /// Whether a live value exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, LockError>;

    /// Reset the expiry of `key` to `ttl` if its value equals `value`.
    async fn extend_if_owner(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, LockError>;

    /// Delete `key` if its value equals `value`.
    async fn delete_if_owner(&self, key: &str, value: &str) -> Result<bool, LockError>;
}

// ---------------------------------------------------------------------------
// DistributedLockService
// ---------------------------------------------------------------------------

/// Acquires, inspects and renews per-process-type locks.
pub struct DistributedLockService {
    backend: Arc<dyn LockBackend>,
}

impl DistributedLockService {
    /// Create a service over the given backend.
    pub fn new(backend: Arc<dyn LockBackend>) -> Self {
        Self { backend }
    }

    /// Create a service backed by an in-process map (single node only).
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryLockBackend::new()))
    }

    /// Try to take the lock for `process_type` for `expiry`.
    ///
    /// Returns `Ok(None)` when another live lock exists. Errors mean the
    /// store could not answer; callers must treat them as "not acquired".
    pub async fn try_acquire_lock(
        &self,
        process_type: &str,
        expiry: Duration,
    ) -> Result<Option<LockHandle>, LockError> {
        let key = lock_key(process_type);
        let lock_value = uuid::Uuid::new_v4().to_string();

        if !self.backend.set_if_absent(&key, &lock_value, expiry).await? {
            tracing::debug!(process_type, "Lock busy");
            return Ok(None);
        }

        tracing::info!(
            process_type,
            lock_value = %lock_value,
            expiry_ms = expiry.as_millis() as u64,
            "Lock acquired"
        );
        Ok(Some(LockHandle {
            backend: Arc::clone(&self.backend),
            process_type: process_type.to_string(),
            key,
            lock_value,
            released: false,
        }))
    }

    /// Whether a live lock exists for `process_type`.
    pub async fn is_lock_active(&self, process_type: &str) -> Result<bool, LockError> {
        self.backend.exists(&lock_key(process_type)).await
    }

    /// Extend the lock to `new_expiry` if `lock_value` still owns it.
    ///
    /// Returns `false` (and changes nothing) when the lock was released or
    /// is now owned by someone else.
    pub async fn renew_lock(
        &self,
        process_type: &str,
        lock_value: &str,
        new_expiry: Duration,
    ) -> Result<bool, LockError> {
        let renewed = self
            .backend
            .extend_if_owner(&lock_key(process_type), lock_value, new_expiry)
            .await?;
        if !renewed {
            tracing::warn!(process_type, lock_value, "Lock renewal refused: not the owner");
        }
        Ok(renewed)
    }
}

// ---------------------------------------------------------------------------
// LockHandle
// ---------------------------------------------------------------------------

/// Proof of ownership of one acquired lock.
///
/// Call [`LockHandle::release`] to give the lock back. A handle dropped
/// without release schedules the same compare-and-delete on the current
/// tokio runtime; outside a runtime the lock is left to expire.
pub struct LockHandle {
    backend: Arc<dyn LockBackend>,
    process_type: String,
    key: String,
    lock_value: String,
    released: bool,
}

impl LockHandle {
    /// Process type this lock guards.
    pub fn process_type(&self) -> &str {
        &self.process_type
    }

    /// Opaque owner token stored in the lock.
    pub fn lock_value(&self) -> &str {
        &self.lock_value
    }

    /// Delete the lock if this handle still owns it.
    ///
    /// Returns `false` when the lock had expired and possibly been taken by
    /// another owner; that owner's lock is left in place.
    pub async fn release(mut self) -> Result<bool, LockError> {
        self.released = true;
        let deleted = self
            .backend
            .delete_if_owner(&self.key, &self.lock_value)
            .await?;
        if deleted {
            tracing::info!(process_type = %self.process_type, "Lock released");
        } else {
            tracing::warn!(
                process_type = %self.process_type,
                lock_value = %self.lock_value,
                "Lock already expired or taken over at release"
            );
        }
        Ok(deleted)
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("process_type", &self.process_type)
            .field("lock_value", &self.lock_value)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let backend = Arc::clone(&self.backend);
        let key = std::mem::take(&mut self.key);
        let lock_value = std::mem::take(&mut self.lock_value);
        let process_type = std::mem::take(&mut self.process_type);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match backend.delete_if_owner(&key, &lock_value).await {
                        Ok(deleted) => {
                            tracing::info!(process_type, deleted, "Dropped lock handle released");
                        }
                        Err(e) => {
                            tracing::error!(
                                process_type,
                                error = %e,
                                "Failed to release dropped lock handle; lock will expire"
                            );
                        }
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    process_type,
                    "Lock handle dropped outside a runtime; lock will expire"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[test]
    fn lock_key_is_namespaced() {
        assert_eq!(lock_key("ProductList"), "dealersync:lock:ProductList");
    }

    #[tokio::test]
    async fn second_acquire_is_refused_while_held() {
        let locks = DistributedLockService::in_memory();
        let first = locks.try_acquire_lock("ProductList", TTL).await.unwrap();
        assert!(first.is_some());
        assert!(locks.try_acquire_lock("ProductList", TTL).await.unwrap().is_none());
        assert!(locks.is_lock_active("ProductList").await.unwrap());
    }

    #[tokio::test]
    async fn different_process_types_do_not_contend() {
        let locks = DistributedLockService::in_memory();
        let a = locks.try_acquire_lock("ProductList", TTL).await.unwrap();
        let b = locks.try_acquire_lock("CampaignList", TTL).await.unwrap();
        assert!(a.is_some());
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn owner_tokens_are_unique() {
        let locks = DistributedLockService::in_memory();
        let a = locks.try_acquire_lock("A", TTL).await.unwrap().unwrap();
        let b = locks.try_acquire_lock("B", TTL).await.unwrap().unwrap();
        assert_ne!(a.lock_value(), b.lock_value());
    }

    #[tokio::test]
    async fn release_frees_the_lock() {
        let locks = DistributedLockService::in_memory();
        let handle = locks.try_acquire_lock("ProductList", TTL).await.unwrap().unwrap();
        assert!(handle.release().await.unwrap());
        assert!(!locks.is_lock_active("ProductList").await.unwrap());
        assert!(locks.try_acquire_lock("ProductList", TTL).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn renew_with_foreign_token_is_refused() {
        let locks = DistributedLockService::in_memory();
        let _handle = locks.try_acquire_lock("ProductList", TTL).await.unwrap().unwrap();
        assert!(!locks.renew_lock("ProductList", "not-the-owner", TTL).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_holder_cannot_renew_or_release() {
        let locks = DistributedLockService::in_memory();
        let stale = locks
            .try_acquire_lock("ProductList", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        tokio::time::advance(Duration::from_millis(150)).await;

        let current = locks
            .try_acquire_lock("ProductList", TTL)
            .await
            .unwrap()
            .expect("expired lock can be taken over");

        assert!(!locks
            .renew_lock("ProductList", stale.lock_value(), TTL)
            .await
            .unwrap());
        assert!(!stale.release().await.unwrap());
        assert!(locks.is_lock_active("ProductList").await.unwrap());
        assert!(locks
            .renew_lock("ProductList", current.lock_value(), TTL)
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn renew_extends_expiry() {
        let locks = DistributedLockService::in_memory();
        let handle = locks
            .try_acquire_lock("ProductList", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        tokio::time::advance(Duration::from_millis(80)).await;
        assert!(locks
            .renew_lock("ProductList", handle.lock_value(), Duration::from_millis(100))
            .await
            .unwrap());
        tokio::time::advance(Duration::from_millis(80)).await;
        assert!(locks.is_lock_active("ProductList").await.unwrap());

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!locks.is_lock_active("ProductList").await.unwrap());
    }

    #[tokio::test]
    async fn dropped_handle_releases_in_background() {
        let locks = DistributedLockService::in_memory();
        let handle = locks.try_acquire_lock("ProductList", TTL).await.unwrap().unwrap();
        drop(handle);

        let mut active = true;
        for _ in 0..50 {
            tokio::task::yield_now().await;
            active = locks.is_lock_active("ProductList").await.unwrap();
            if !active {
                break;
            }
        }
        assert!(!active, "dropped handle should release its lock");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquires_yield_exactly_one_owner() {
        let locks = Arc::new(DistributedLockService::in_memory());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let locks = Arc::clone(&locks);
            tasks.push(tokio::spawn(async move {
                locks.try_acquire_lock("ProductList", TTL).await.unwrap()
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            if let Some(handle) = task.await.unwrap() {
                handles.push(handle);
            }
        }
        assert_eq!(handles.len(), 1);
    }
}
