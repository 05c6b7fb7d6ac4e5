//! In-process lock backend for single-node deployments and tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{LockBackend, LockError};

struct LockEntry {
    value: String,
    expires_at: Instant,
}

impl LockEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Mutex-guarded map of lock keys to owner tokens.
///
/// Each operation holds the map mutex for its whole check-and-mutate, which
/// gives the same atomicity as the Redis commands. Expiry uses
/// [`tokio::time::Instant`], so paused-clock tests control it.
#[derive(Default)]
pub struct InMemoryLockBackend {
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl InMemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockBackend for InMemoryLockBackend {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            LockEntry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, LockError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries.get(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn extend_if_owner(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) && entry.value == value => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_if_owner(&self, key: &str, value: &str) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.value == value => {
                let was_live = entry.is_live(now);
                entries.remove(key);
                Ok(was_live)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delete_requires_matching_value() {
        let backend = InMemoryLockBackend::new();
        let ttl = Duration::from_secs(5);
        assert!(backend.set_if_absent("k", "owner-a", ttl).await.unwrap());
        assert!(!backend.delete_if_owner("k", "owner-b").await.unwrap());
        assert!(backend.exists("k").await.unwrap());
        assert!(backend.delete_if_owner("k", "owner-a").await.unwrap());
        assert!(!backend.exists("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_can_be_replaced() {
        let backend = InMemoryLockBackend::new();
        assert!(backend
            .set_if_absent("k", "owner-a", Duration::from_millis(10))
            .await
            .unwrap());
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(!backend.exists("k").await.unwrap());
        assert!(!backend
            .extend_if_owner("k", "owner-a", Duration::from_secs(1))
            .await
            .unwrap());
        assert!(backend
            .set_if_absent("k", "owner-b", Duration::from_secs(1))
            .await
            .unwrap());
    }
}
