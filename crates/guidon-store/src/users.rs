use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{parse_opt_sql_ts, parse_sql_ts, to_sql_ts, UsageOutcome, User, UserUpsert};

const USER_COLUMNS: &str = "user_id, username, avatar, total_commands, total_draws, is_banned, \
                            ban_reason, banned_at, is_premium, created_at, updated_at";

impl Database {
    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![user_id], row_to_user)
            .optional()?)
    }

    fn require_user(&self, user_id: &str) -> Result<User> {
        self.get_user(user_id)?.ok_or(StoreError::NotFound)
    }

    pub fn list_users(&self, limit: u32) -> Result<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC LIMIT ?1");
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![limit], row_to_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn count_users(&self) -> Result<u64> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Users whose record changed at or after `since`.
    pub fn count_active_users(&self, since: DateTime<Utc>) -> Result<u64> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM users WHERE updated_at >= ?1",
            params![to_sql_ts(&since)],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Top artists by pixels placed. Ties go to whoever registered first.
    pub fn leaderboard(&self, limit: u32) -> Result<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE total_draws > 0 \
             ORDER BY total_draws DESC, created_at ASC LIMIT ?1"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![limit], row_to_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert or update a user. Counters are never touched here, flags only
    /// when the caller supplies them, and `created_at` only on insert.
    pub fn upsert_user(&self, user_id: &str, fields: &UserUpsert, now: DateTime<Utc>) -> Result<User> {
        self.conn().execute(
            "INSERT INTO users (user_id, username, avatar, is_banned, is_premium, created_at, updated_at)
             VALUES (?1, ?2, ?3, COALESCE(?4, 0), COALESCE(?5, 0), ?6, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                 username   = excluded.username,
                 avatar     = COALESCE(?3, users.avatar),
                 is_banned  = COALESCE(?4, users.is_banned),
                 is_premium = COALESCE(?5, users.is_premium),
                 updated_at = excluded.updated_at",
            params![
                user_id,
                fields.username,
                fields.avatar,
                fields.is_banned,
                fields.is_premium,
                to_sql_ts(&now),
            ],
        )?;
        self.require_user(user_id)
    }

    /// Count one completed command for `user_id`, creating the user record
    /// if this is the first we hear of them.
    ///
    /// `total_draws` only moves for `draw`. When `interaction_id` is given,
    /// a redelivered interaction is recognised and not counted twice.
    pub fn record_usage(
        &mut self,
        user_id: &str,
        username: &str,
        command: &str,
        interaction_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<UsageOutcome> {
        let ts = to_sql_ts(&now);
        let tx = self.write_tx()?;

        if let Some(id) = interaction_id {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO processed_usage (interaction_id, user_id, command, processed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, user_id, command, ts],
            )?;
            if inserted == 0 {
                tx.commit()?;
                let user = self.require_user(user_id)?;
                return Ok(UsageOutcome {
                    user,
                    counted: false,
                });
            }
        }

        let draws: i64 = if command == "draw" { 1 } else { 0 };
        tx.execute(
            "INSERT INTO users (user_id, username, total_commands, total_draws, created_at, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                 total_commands = users.total_commands + 1,
                 total_draws    = users.total_draws + ?3,
                 updated_at     = excluded.updated_at",
            params![user_id, username, draws, ts],
        )?;
        tx.commit()?;

        Ok(UsageOutcome {
            user: self.require_user(user_id)?,
            counted: true,
        })
    }

    /// Whether a usage for this interaction has already been counted.
    pub fn usage_processed(&self, interaction_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM processed_usage WHERE interaction_id = ?1",
                params![interaction_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Forget dedup markers older than `before`. Redeliveries arrive within
    /// minutes, so old markers only take space.
    pub fn prune_processed_usage(&self, before: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn().execute(
            "DELETE FROM processed_usage WHERE processed_at < ?1",
            params![to_sql_ts(&before)],
        )?)
    }

    /// Ban a user. Banning again keeps the original `banned_at` and replaces
    /// the reason.
    pub fn ban_user(&self, user_id: &str, reason: Option<&str>, now: DateTime<Utc>) -> Result<User> {
        let ts = to_sql_ts(&now);
        let affected = self.conn().execute(
            "UPDATE users SET
                 is_banned  = 1,
                 ban_reason = ?2,
                 banned_at  = COALESCE(banned_at, ?3),
                 updated_at = ?3
             WHERE user_id = ?1",
            params![user_id, reason, ts],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.require_user(user_id)
    }

    pub fn unban_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<User> {
        let affected = self.conn().execute(
            "UPDATE users SET is_banned = 0, ban_reason = NULL, banned_at = NULL, updated_at = ?2
             WHERE user_id = ?1",
            params![user_id, to_sql_ts(&now)],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.require_user(user_id)
    }

    pub fn set_premium(&self, user_id: &str, premium: bool, now: DateTime<Utc>) -> Result<User> {
        let affected = self.conn().execute(
            "UPDATE users SET is_premium = ?2, updated_at = ?3 WHERE user_id = ?1",
            params![user_id, premium, to_sql_ts(&now)],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.require_user(user_id)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let total_commands: i64 = row.get(3)?;
    let total_draws: i64 = row.get(4)?;
    let banned_at: Option<String> = row.get(7)?;
    let created_str: String = row.get(9)?;
    let updated_str: String = row.get(10)?;

    Ok(User {
        user_id: row.get(0)?,
        username: row.get(1)?,
        avatar: row.get(2)?,
        total_commands: total_commands.max(0) as u64,
        total_draws: total_draws.max(0) as u64,
        is_banned: row.get(5)?,
        ban_reason: row.get(6)?,
        banned_at: parse_opt_sql_ts(7, banned_at)?,
        is_premium: row.get(8)?,
        created_at: parse_sql_ts(9, &created_str)?,
        updated_at: parse_sql_ts(10, &updated_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn upsert(name: &str) -> UserUpsert {
        UserUpsert {
            username: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn upsert_creates_then_preserves() {
        let db = Database::open_in_memory().unwrap();
        let t0 = Utc::now();

        let created = db.upsert_user("1", &upsert("alice"), t0).unwrap();
        assert_eq!(created.total_draws, 0);
        assert!(!created.is_premium);

        db.set_premium("1", true, t0).unwrap();

        let later = t0 + Duration::seconds(10);
        let updated = db.upsert_user("1", &upsert("alice2"), later).unwrap();
        assert_eq!(updated.username, "alice2");
        assert!(updated.is_premium, "flags survive an upsert that omits them");
        assert_eq!(
            updated.created_at.timestamp_millis(),
            created.created_at.timestamp_millis()
        );
        assert!(updated.updated_at > created.updated_at);
    }

    #[test]
    fn record_usage_only_counts_draws_as_draws() {
        let mut db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        let out = db.record_usage("1", "alice", "draw", None, now).unwrap();
        assert!(out.counted);
        assert_eq!(out.user.total_draws, 1);
        assert_eq!(out.user.total_commands, 1);

        let out = db.record_usage("1", "alice", "snapshot", None, now).unwrap();
        assert_eq!(out.user.total_draws, 1);
        assert_eq!(out.user.total_commands, 2);
    }

    #[test]
    fn record_usage_dedups_by_interaction() {
        let mut db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        let first = db.record_usage("1", "alice", "draw", Some("i-1"), now).unwrap();
        let again = db.record_usage("1", "alice", "draw", Some("i-1"), now).unwrap();
        assert!(first.counted);
        assert!(!again.counted);
        assert_eq!(again.user.total_draws, 1);

        let other = db.record_usage("1", "alice", "draw", Some("i-2"), now).unwrap();
        assert_eq!(other.user.total_draws, 2);
    }

    #[test]
    fn processed_markers_are_queryable_and_pruned() {
        let mut db = Database::open_in_memory().unwrap();
        let t0 = Utc::now();

        assert!(!db.usage_processed("i-1").unwrap());
        db.record_usage("1", "alice", "draw", Some("i-1"), t0).unwrap();
        db.record_usage("1", "alice", "draw", Some("i-2"), t0 + Duration::hours(2))
            .unwrap();
        assert!(db.usage_processed("i-1").unwrap());

        let pruned = db.prune_processed_usage(t0 + Duration::hours(1)).unwrap();
        assert_eq!(pruned, 1);
        assert!(!db.usage_processed("i-1").unwrap());
        assert!(db.usage_processed("i-2").unwrap());
    }

    #[test]
    fn ban_is_idempotent_and_independent_of_premium() {
        let db = Database::open_in_memory().unwrap();
        let t0 = Utc::now();
        db.upsert_user("1", &upsert("mallory"), t0).unwrap();
        db.set_premium("1", true, t0).unwrap();

        let first = db.ban_user("1", Some("spam"), t0).unwrap();
        let second = db
            .ban_user("1", Some("more spam"), t0 + Duration::seconds(5))
            .unwrap();
        assert!(second.is_banned);
        assert!(second.is_premium);
        assert_eq!(second.ban_reason.as_deref(), Some("more spam"));
        assert_eq!(second.banned_at, first.banned_at);

        let unbanned = db.unban_user("1", t0).unwrap();
        assert!(!unbanned.is_banned);
        assert!(unbanned.ban_reason.is_none());
        assert!(unbanned.banned_at.is_none());
    }

    #[test]
    fn admin_writes_on_missing_user() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        assert!(matches!(db.ban_user("404", None, now), Err(StoreError::NotFound)));
        assert!(matches!(db.unban_user("404", now), Err(StoreError::NotFound)));
        assert!(matches!(db.set_premium("404", true, now), Err(StoreError::NotFound)));
    }

    #[test]
    fn stats_queries() {
        let mut db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let old = now - Duration::hours(48);

        db.upsert_user("old", &upsert("old"), old).unwrap();
        for _ in 0..3 {
            db.record_usage("a", "a", "draw", None, now).unwrap();
        }
        db.record_usage("b", "b", "draw", None, now).unwrap();

        assert_eq!(db.count_users().unwrap(), 3);
        assert_eq!(db.count_active_users(now - Duration::hours(24)).unwrap(), 2);

        let top = db.leaderboard(10).unwrap();
        let ids: Vec<&str> = top.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(db.list_users(2).unwrap().len(), 2);
    }
}
