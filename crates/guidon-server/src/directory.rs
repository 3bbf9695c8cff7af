//! User directory: profile CRUD, ban/premium flags and usage counters.
//!
//! Reads are served from a short-TTL in-memory cache to absorb bursts of
//! stats/leaderboard traffic. Every mutation drops the user's cache entry
//! before returning, so a following read always sees the write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use guidon_store::{DbHandle, StoreError, UsageOutcome, User, UserUpsert};

const USER_COUNT_TTL: Duration = Duration::from_secs(300);

pub const LEADERBOARD_DEFAULT: u32 = 10;
pub const LEADERBOARD_MAX: u32 = 100;

// ---------------------------------------------------------------------------
// Cached entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CachedUser {
    user: User,
    fetched_at: Instant,
}

impl CachedUser {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Directory {
    db: DbHandle,
    ttl: Duration,
    /// Cache: user_id -> last read record.
    cache: Arc<RwLock<HashMap<String, CachedUser>>>,
    user_count: Arc<RwLock<Option<(u64, Instant)>>>,
    /// Bumped by every mutation. A read that started under an older epoch
    /// must not repopulate the cache.
    epoch: Arc<AtomicU64>,
}

impl Directory {
    pub fn new(db: DbHandle, ttl: Duration) -> Self {
        Self {
            db,
            ttl,
            cache: Arc::new(RwLock::new(HashMap::new())),
            user_count: Arc::new(RwLock::new(None)),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(user_id) {
                if entry.is_fresh(self.ttl) {
                    debug!(user_id, "User served from cache");
                    return Ok(Some(entry.user.clone()));
                }
            }
        }

        let seen = self.epoch();
        let id = user_id.to_string();
        let user = self.db.call(move |db| db.get_user(&id)).await?;

        if let Some(ref user) = user {
            self.remember(user.clone(), seen).await;
        }
        Ok(user)
    }

    pub async fn create_or_update(
        &self,
        user_id: &str,
        fields: UserUpsert,
    ) -> Result<User, StoreError> {
        let id = user_id.to_string();
        let user = self
            .db
            .call(move |db| db.upsert_user(&id, &fields, Utc::now()))
            .await;
        self.invalidate(user_id).await;
        let user = user?;
        debug!(user_id, username = %user.username, "User upserted");
        Ok(user)
    }

    /// Count one completed command. `interaction_id` makes redelivery safe.
    pub async fn increment_usage(
        &self,
        user_id: &str,
        username: &str,
        command: &str,
        interaction_id: Option<&str>,
    ) -> Result<UsageOutcome, StoreError> {
        let (id, name, cmd) = (user_id.to_string(), username.to_string(), command.to_string());
        let dedup = interaction_id.map(String::from);
        let outcome = self
            .db
            .call(move |db| db.record_usage(&id, &name, &cmd, dedup.as_deref(), Utc::now()))
            .await;
        self.invalidate(user_id).await;
        let outcome = outcome?;
        if !outcome.counted {
            debug!(user_id, command, "Duplicate delivery, usage already counted");
        }
        Ok(outcome)
    }

    /// Whether `increment_usage` already counted this interaction.
    pub async fn already_counted(&self, interaction_id: &str) -> Result<bool, StoreError> {
        let id = interaction_id.to_string();
        self.db.call(move |db| db.usage_processed(&id)).await
    }

    /// Idempotent: banning a banned user succeeds and replaces the reason.
    pub async fn ban(&self, user_id: &str, reason: Option<&str>) -> Result<User, StoreError> {
        let id = user_id.to_string();
        let reason = reason.map(String::from);
        let user = self
            .db
            .call(move |db| db.ban_user(&id, reason.as_deref(), Utc::now()))
            .await;
        self.invalidate(user_id).await;
        let user = user?;
        info!(user_id, reason = ?user.ban_reason, "User banned");
        Ok(user)
    }

    pub async fn unban(&self, user_id: &str) -> Result<User, StoreError> {
        let id = user_id.to_string();
        let user = self.db.call(move |db| db.unban_user(&id, Utc::now())).await;
        self.invalidate(user_id).await;
        let user = user?;
        info!(user_id, "User unbanned");
        Ok(user)
    }

    pub async fn set_premium(&self, user_id: &str, premium: bool) -> Result<User, StoreError> {
        let id = user_id.to_string();
        let user = self
            .db
            .call(move |db| db.set_premium(&id, premium, Utc::now()))
            .await;
        self.invalidate(user_id).await;
        let user = user?;
        info!(user_id, premium, "Premium status changed");
        Ok(user)
    }

    // -- Stats --

    pub async fn count_users(&self) -> Result<u64, StoreError> {
        if let Some((count, at)) = *self.user_count.read().await {
            if at.elapsed() < USER_COUNT_TTL {
                return Ok(count);
            }
        }
        let count = self.db.call(|db| db.count_users()).await?;
        *self.user_count.write().await = Some((count, Instant::now()));
        Ok(count)
    }

    pub async fn active_users(&self, hours: u32) -> Result<u64, StoreError> {
        let since = Utc::now() - chrono::Duration::hours(hours as i64);
        self.db.call(move |db| db.count_active_users(since)).await
    }

    pub async fn leaderboard(&self, limit: u32) -> Result<Vec<User>, StoreError> {
        let limit = limit.clamp(1, LEADERBOARD_MAX);
        self.db.call(move |db| db.leaderboard(limit)).await
    }

    pub async fn list(&self, limit: u32) -> Result<Vec<User>, StoreError> {
        let limit = limit.clamp(1, 1000);
        self.db.call(move |db| db.list_users(limit)).await
    }

    // -- Cache maintenance --

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Cache `user` unless a mutation landed since the read began.
    async fn remember(&self, user: User, seen: u64) {
        let mut cache = self.cache.write().await;
        if self.epoch() != seen {
            debug!(user_id = %user.user_id, "Skipping cache fill, record changed during read");
            return;
        }
        cache.insert(
            user.user_id.clone(),
            CachedUser {
                user,
                fetched_at: Instant::now(),
            },
        );
    }

    async fn invalidate(&self, user_id: &str) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.cache.write().await.remove(user_id);
        *self.user_count.write().await = None;
    }

    /// Drop usage dedup markers older than `retention`.
    pub async fn prune_processed(&self, retention: Duration) {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return;
        };
        let before = Utc::now() - retention;
        match self.db.call(move |db| db.prune_processed_usage(before)).await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Pruned processed usage markers"),
            Err(e) => warn!(error = %e, "Failed to prune processed usage markers"),
        }
    }

    /// Evict expired entries from the cache.
    pub async fn purge_expired(&self) {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.is_fresh(self.ttl));
        let removed = before - cache.len();
        if removed > 0 {
            debug!(removed, "Purged expired user cache entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(ttl: Duration) -> Directory {
        Directory::new(DbHandle::open_in_memory().unwrap(), ttl)
    }

    fn named(name: &str) -> UserUpsert {
        UserUpsert {
            username: name.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_get_missing_user() {
        let dir = directory(Duration::from_secs(60));
        assert!(dir.get("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mutation_invalidates_cache() {
        let dir = directory(Duration::from_secs(60));
        dir.create_or_update("1", named("alice")).await.unwrap();

        let cached = dir.get("1").await.unwrap().unwrap();
        assert!(!cached.is_premium);

        dir.set_premium("1", true).await.unwrap();
        assert!(dir.get("1").await.unwrap().unwrap().is_premium);

        dir.ban("1", Some("spam")).await.unwrap();
        let banned = dir.get("1").await.unwrap().unwrap();
        assert!(banned.is_banned);
        assert!(banned.is_premium, "ban leaves premium alone");
    }

    #[tokio::test]
    async fn test_ban_twice_succeeds() {
        let dir = directory(Duration::from_secs(60));
        dir.create_or_update("1", named("mallory")).await.unwrap();
        dir.ban("1", Some("first")).await.unwrap();
        let again = dir.ban("1", Some("second")).await.unwrap();
        assert!(again.is_banned);
        assert_eq!(again.ban_reason.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_increment_usage_bumps_draws_once() {
        let dir = directory(Duration::from_secs(60));
        dir.create_or_update("1", named("alice")).await.unwrap();
        let _ = dir.get("1").await.unwrap();

        let out = dir.increment_usage("1", "alice", "draw", Some("i-1")).await.unwrap();
        assert_eq!(out.user.total_draws, 1);
        let dup = dir.increment_usage("1", "alice", "draw", Some("i-1")).await.unwrap();
        assert!(!dup.counted);

        assert_eq!(dir.get("1").await.unwrap().unwrap().total_draws, 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let dir = directory(Duration::from_secs(60));
        dir.increment_usage("a", "a", "draw", None).await.unwrap();
        dir.increment_usage("a", "a", "draw", None).await.unwrap();
        dir.increment_usage("b", "b", "draw", None).await.unwrap();

        assert_eq!(dir.count_users().await.unwrap(), 2);
        assert_eq!(dir.active_users(24).await.unwrap(), 2);
        let top = dir.leaderboard(0).await.unwrap();
        assert_eq!(top.len(), 1, "limit is clamped to at least one");
        assert_eq!(top[0].user_id, "a");
    }

    #[tokio::test]
    async fn test_read_overtaken_by_ban_is_not_cached() {
        let dir = directory(Duration::from_secs(60));
        dir.create_or_update("1", named("mallory")).await.unwrap();

        // A read starts and sees the unbanned row...
        let seen = dir.epoch();
        let stale = dir.db.call(|db| db.get_user("1")).await.unwrap().unwrap();
        // ...a ban commits before the read fills the cache.
        dir.ban("1", None).await.unwrap();
        dir.remember(stale, seen).await;

        assert!(dir.cache.read().await.get("1").is_none());
        assert!(dir.get("1").await.unwrap().unwrap().is_banned);
    }

    #[tokio::test]
    async fn test_already_counted() {
        let dir = directory(Duration::from_secs(60));
        assert!(!dir.already_counted("i-1").await.unwrap());
        dir.increment_usage("1", "alice", "draw", Some("i-1")).await.unwrap();
        assert!(dir.already_counted("i-1").await.unwrap());

        dir.prune_processed(Duration::from_secs(3600)).await;
        assert!(dir.already_counted("i-1").await.unwrap(), "recent markers are kept");
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let dir = directory(Duration::from_secs(0));
        dir.create_or_update("1", named("alice")).await.unwrap();
        dir.get("1").await.unwrap();

        dir.purge_expired().await;

        assert!(dir.cache.read().await.is_empty());
    }
}
