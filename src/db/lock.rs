use std::time::Duration;

use axum::async_trait;
use mongodb::{
    bson::{doc, Document},
    options::UpdateOptions,
};
use tracing::{info, warn};

use crate::{
    error_result::{is_duplicate_key, Result},
    lock::{LockGuard, NamedLock},
};

use super::mongo::{DbClient, LOCKS_COL};

/// locks shared by every server instance through the `locks` collection.
/// acquisition is a conditional upsert, a duplicate key on `name` means the lock is held.
#[async_trait]
impl NamedLock for DbClient {
    async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
        owner: &str,
    ) -> Result<Option<LockGuard>> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(5));
        let now = chrono::Utc::now();
        let guard = LockGuard {
            name: name.to_owned(),
            token: uuid::Uuid::new_v4(),
            owner: owner.to_owned(),
            expires_at: now + ttl,
        };
        let filter = doc! {
            "name":name,
            "expires_at":{"$lt":mongodb::bson::DateTime::from_chrono(now)},
        };
        let update = doc! {
            "$set":{
                "token":mongodb::bson::Uuid::from(guard.token),
                "owner":owner,
                "acquired_at":mongodb::bson::DateTime::from_chrono(now),
                "expires_at":mongodb::bson::DateTime::from_chrono(guard.expires_at),
            }
        };
        let options = UpdateOptions::builder().upsert(true).build();
        match self
            .bo_db
            .collection::<Document>(LOCKS_COL)
            .update_one(filter, update, options)
            .await
        {
            Ok(_) => {
                info!("lock {name} acquired by {owner}");
                Ok(Some(guard))
            }
            Err(e) if is_duplicate_key(&e) => {
                info!("lock {name} is held, {owner} skipped");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn release(&self, guard: LockGuard) -> Result<()> {
        let res = self
            .bo_db
            .collection::<Document>(LOCKS_COL)
            .delete_one(
                doc! {"name":&guard.name,"token":mongodb::bson::Uuid::from(guard.token)},
                None,
            )
            .await?;
        if res.deleted_count == 0 {
            warn!("lock {} was not owned by token {} anymore", guard.name, guard.token);
        }
        Ok(())
    }
}
