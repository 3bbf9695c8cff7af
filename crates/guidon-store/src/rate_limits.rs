use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::to_sql_ts;

impl Database {
    /// Run `f` over the stored call list of `(user_id, command)` and persist
    /// whatever it leaves behind, all inside one write transaction.
    ///
    /// The list holds unix-millisecond timestamps in ascending order. An
    /// empty list deletes the row.
    pub fn with_rate_window<T>(
        &mut self,
        user_id: &str,
        command: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Vec<i64>) -> T,
    ) -> Result<T> {
        let tx = self.write_tx()?;

        let stored: Option<String> = tx
            .query_row(
                "SELECT calls FROM rate_limits WHERE user_id = ?1 AND command = ?2",
                params![user_id, command],
                |row| row.get(0),
            )
            .optional()?;
        let mut calls: Vec<i64> = match stored {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };

        let out = f(&mut calls);

        if calls.is_empty() {
            tx.execute(
                "DELETE FROM rate_limits WHERE user_id = ?1 AND command = ?2",
                params![user_id, command],
            )?;
        } else {
            tx.execute(
                "INSERT INTO rate_limits (user_id, command, calls, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, command) DO UPDATE SET
                     calls = excluded.calls,
                     updated_at = excluded.updated_at",
                params![user_id, command, serde_json::to_string(&calls)?, to_sql_ts(&now)],
            )?;
        }

        tx.commit()?;
        Ok(out)
    }

    pub fn get_rate_window(&self, user_id: &str, command: &str) -> Result<Vec<i64>> {
        let stored: Option<String> = self
            .conn()
            .query_row(
                "SELECT calls FROM rate_limits WHERE user_id = ?1 AND command = ?2",
                params![user_id, command],
                |row| row.get(0),
            )
            .optional()?;
        match stored {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// Every stored window for a user, keyed by command.
    pub fn list_rate_windows(&self, user_id: &str) -> Result<Vec<(String, Vec<i64>)>> {
        let mut stmt = self.conn().prepare(
            "SELECT command, calls FROM rate_limits WHERE user_id = ?1 ORDER BY command ASC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (command, json) = row.map_err(StoreError::Sqlite)?;
            out.push((command, serde_json::from_str(&json)?));
        }
        Ok(out)
    }

    /// Drop one command's window, or all of the user's windows.
    pub fn delete_rate_windows(&self, user_id: &str, command: Option<&str>) -> Result<usize> {
        let affected = match command {
            Some(cmd) => self.conn().execute(
                "DELETE FROM rate_limits WHERE user_id = ?1 AND command = ?2",
                params![user_id, cmd],
            )?,
            None => self
                .conn()
                .execute("DELETE FROM rate_limits WHERE user_id = ?1", params![user_id])?,
        };
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_persisted_and_pruned_to_nothing() {
        let mut db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        let len = db
            .with_rate_window("1", "draw", now, |calls| {
                calls.push(1_000);
                calls.push(2_000);
                calls.len()
            })
            .unwrap();
        assert_eq!(len, 2);
        assert_eq!(db.get_rate_window("1", "draw").unwrap(), vec![1_000, 2_000]);

        db.with_rate_window("1", "draw", now, |calls| calls.clear())
            .unwrap();
        assert!(db.list_rate_windows("1").unwrap().is_empty());
    }

    #[test]
    fn delete_one_or_all() {
        let mut db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        for cmd in ["draw", "snapshot", "stats"] {
            db.with_rate_window("1", cmd, now, |calls| calls.push(1)).unwrap();
        }
        db.with_rate_window("2", "draw", now, |calls| calls.push(1)).unwrap();

        assert_eq!(db.delete_rate_windows("1", Some("draw")).unwrap(), 1);
        assert_eq!(db.list_rate_windows("1").unwrap().len(), 2);
        assert_eq!(db.delete_rate_windows("1", None).unwrap(), 2);
        assert_eq!(db.get_rate_window("2", "draw").unwrap(), vec![1]);
    }
}
