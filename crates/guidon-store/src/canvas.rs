use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    parse_opt_sql_ts, parse_sql_ts, to_sql_ts, CanvasAggregate, Contributor, DrawOutcome, Pixel,
};

const PIXEL_COLUMNS: &str =
    "x, y, color, user_id, username, edit_count, previous_color, previous_user, updated_at";

impl Database {
    // -----------------------------------------------------------------------
    // Pixel writes
    // -----------------------------------------------------------------------

    /// Paint one cell and update the aggregate and contributor list in the
    /// same transaction.
    ///
    /// Bounds and color format are the caller's job; this only persists.
    pub fn draw_pixel(
        &mut self,
        x: u32,
        y: u32,
        color: &str,
        user_id: &str,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<DrawOutcome> {
        let ts = to_sql_ts(&now);
        let tx = self.write_tx()?;

        let existing: Option<(String, String, i64)> = tx
            .query_row(
                "SELECT color, user_id, edit_count FROM pixels WHERE x = ?1 AND y = ?2",
                params![x, y],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let created = existing.is_none();
        let (previous_color, previous_user, edits) = match existing {
            Some((c, u, n)) => (Some(c), Some(u), n),
            None => (None, None, 0),
        };
        let changed = previous_color.as_deref() != Some(color);
        let edit_count = edits + 1;

        tx.execute(
            "INSERT INTO pixels (x, y, color, user_id, username, edit_count, previous_color, previous_user, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(x, y) DO UPDATE SET
                 color          = excluded.color,
                 user_id        = excluded.user_id,
                 username       = excluded.username,
                 edit_count     = excluded.edit_count,
                 previous_color = excluded.previous_color,
                 previous_user  = excluded.previous_user,
                 updated_at     = excluded.updated_at",
            params![x, y, color, user_id, username, edit_count, previous_color, previous_user, ts],
        )?;

        tx.execute(
            "UPDATE canvas_aggregate SET
                 total_pixels         = total_pixels + ?1,
                 last_update          = ?2,
                 last_update_by       = ?3,
                 last_update_username = ?4
             WHERE id = 1",
            params![if created { 1 } else { 0 }, ts, user_id, username],
        )?;

        tx.execute(
            "INSERT INTO canvas_contributors (user_id, username, edits, first_seen, last_seen)
             VALUES (?1, ?2, 1, ?3, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 username  = excluded.username,
                 edits     = canvas_contributors.edits + 1,
                 last_seen = excluded.last_seen",
            params![user_id, username, ts],
        )?;

        tx.commit()?;

        Ok(DrawOutcome {
            previous_color,
            changed,
            created,
            edit_count: edit_count as u64,
        })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get_pixel(&self, x: u32, y: u32) -> Result<Option<Pixel>> {
        let sql = format!("SELECT {PIXEL_COLUMNS} FROM pixels WHERE x = ?1 AND y = ?2");
        Ok(self
            .conn()
            .query_row(&sql, params![x, y], row_to_pixel)
            .optional()?)
    }

    pub fn list_pixels(&self) -> Result<Vec<Pixel>> {
        let sql = format!("SELECT {PIXEL_COLUMNS} FROM pixels ORDER BY y ASC, x ASC");
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map([], row_to_pixel)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn canvas_aggregate(&self) -> Result<CanvasAggregate> {
        let contributors: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM canvas_contributors", [], |row| row.get(0))?;

        self.conn()
            .query_row(
                "SELECT total_pixels, last_update, last_update_by, last_update_username
                 FROM canvas_aggregate WHERE id = 1",
                [],
                |row| {
                    let total: i64 = row.get(0)?;
                    let last_update: Option<String> = row.get(1)?;
                    Ok(CanvasAggregate {
                        total_pixels: total.max(0) as u64,
                        unique_contributors: contributors.max(0) as u64,
                        last_update: parse_opt_sql_ts(1, last_update)?,
                        last_update_by: row.get(2)?,
                        last_update_username: row.get(3)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Most active contributors first.
    pub fn list_contributors(&self, limit: u32) -> Result<Vec<Contributor>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, username, edits, last_seen FROM canvas_contributors
             ORDER BY edits DESC, last_seen DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let edits: i64 = row.get(2)?;
            let last_seen: String = row.get(3)?;
            Ok(Contributor {
                user_id: row.get(0)?,
                username: row.get(1)?,
                edits: edits.max(0) as u64,
                last_seen: parse_sql_ts(3, &last_seen)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

fn row_to_pixel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pixel> {
    let edit_count: i64 = row.get(5)?;
    let updated_str: String = row.get(8)?;
    Ok(Pixel {
        x: row.get(0)?,
        y: row.get(1)?,
        color: row.get(2)?,
        user_id: row.get(3)?,
        username: row.get(4)?,
        edit_count: edit_count.max(0) as u64,
        previous_color: row.get(6)?,
        previous_user: row.get(7)?,
        updated_at: parse_sql_ts(8, &updated_str)?,
    })
}
