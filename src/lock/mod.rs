use std::{sync::Arc, time::Duration};

use axum::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error_result::Result;

pub const AUTO_FINALIZE_LOCK: &str = "cron:handover-auto-finalize";
pub const SETTLEMENT_LOCK: &str = "cron:intercompany-settlement";

pub fn receipt_lock_name(id: Uuid) -> String {
    format!("receipt:{id}")
}

pub fn handover_lock_name(id: Uuid) -> String {
    format!("handover:{id}")
}

/// proof of holding a named lock. release only succeeds while `token` still owns the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    pub name: String,
    pub token: Uuid,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl LockGuard {
    fn new(name: &str, ttl: Duration, owner: &str) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(5));
        Self {
            name: name.to_owned(),
            token: Uuid::new_v4(),
            owner: owner.to_owned(),
            expires_at: Utc::now() + ttl,
        }
    }
}

/// mutual exclusion by name, held until released or until the ttl expires.
#[async_trait]
pub trait NamedLock: Send + Sync + 'static {
    /// `None` when another owner holds an unexpired lock.
    async fn try_acquire(&self, name: &str, ttl: Duration, owner: &str)
        -> Result<Option<LockGuard>>;

    async fn release(&self, guard: LockGuard) -> Result<()>;
}

/// in process lock table, for a single server instance.
#[derive(Clone, Debug, Default)]
pub struct MapLock {
    locks: Arc<DashMap<String, LockGuard>>,
}

impl MapLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl NamedLock for MapLock {
    async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
        owner: &str,
    ) -> Result<Option<LockGuard>> {
        let guard = LockGuard::new(name, ttl, owner);
        match self.locks.entry(name.to_owned()) {
            Entry::Occupied(mut held) => {
                if held.get().expires_at > Utc::now() {
                    info!("lock {name} is held by {}", held.get().owner);
                    return Ok(None);
                }
                warn!(
                    "lock {name} expired at {}, taken over by {owner}",
                    held.get().expires_at
                );
                held.insert(guard.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(guard.clone());
            }
        }
        Ok(Some(guard))
    }

    async fn release(&self, guard: LockGuard) -> Result<()> {
        let removed = self
            .locks
            .remove_if(&guard.name, |_, held| held.token == guard.token);
        if removed.is_none() {
            warn!("lock {} was not owned by token {} anymore", guard.name, guard.token);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn second_owner_is_refused_while_held() {
        let lock = MapLock::new();
        let first = lock.try_acquire("receipt:1", TTL, "a").await.unwrap();
        assert!(first.is_some());
        let second = lock.try_acquire("receipt:1", TTL, "b").await.unwrap();
        assert!(second.is_none());
        let other_name = lock.try_acquire("receipt:2", TTL, "b").await.unwrap();
        assert!(other_name.is_some());
    }

    #[tokio::test]
    async fn release_frees_the_name() {
        let lock = MapLock::new();
        let guard = lock.try_acquire("cron:x", TTL, "a").await.unwrap().unwrap();
        lock.release(guard).await.unwrap();
        assert!(lock.try_acquire("cron:x", TTL, "b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_lock_is_taken_over_and_stale_release_is_ignored() {
        let lock = MapLock::new();
        let stale = lock
            .try_acquire("cron:x", Duration::from_millis(0), "a")
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let fresh = lock.try_acquire("cron:x", TTL, "b").await.unwrap().unwrap();
        lock.release(stale).await.unwrap();
        assert!(lock.try_acquire("cron:x", TTL, "c").await.unwrap().is_none());
        lock.release(fresh).await.unwrap();
        assert!(lock.try_acquire("cron:x", TTL, "c").await.unwrap().is_some());
    }

    #[test]
    fn lock_names() {
        let id = Uuid::nil();
        assert_eq!(
            receipt_lock_name(id),
            "receipt:00000000-0000-0000-0000-000000000000"
        );
        assert!(handover_lock_name(id).starts_with("handover:"));
    }
}
