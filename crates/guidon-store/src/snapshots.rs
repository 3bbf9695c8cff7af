use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{parse_sql_ts, to_sql_ts, SnapshotRecord};

const SNAPSHOT_COLUMNS: &str = "snapshot_id, created_by, created_by_username, image_ref, \
                                pixel_count, canvas_state, created_at";

impl Database {
    pub fn insert_snapshot(&self, snapshot: &SnapshotRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO snapshots (snapshot_id, created_by, created_by_username, image_ref,
                                    pixel_count, canvas_state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                snapshot.snapshot_id,
                snapshot.created_by,
                snapshot.created_by_username,
                snapshot.image_ref,
                snapshot.pixel_count as i64,
                snapshot.canvas_state_json,
                to_sql_ts(&snapshot.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_snapshot(&self, snapshot_id: &str) -> Result<SnapshotRecord> {
        let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE snapshot_id = ?1");
        self.conn()
            .query_row(&sql, params![snapshot_id], row_to_snapshot)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Newest first.
    pub fn list_snapshots(&self, limit: u32) -> Result<Vec<SnapshotRecord>> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots ORDER BY created_at DESC LIMIT ?1"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![limit], row_to_snapshot)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotRecord> {
    let pixel_count: i64 = row.get(4)?;
    let created_str: String = row.get(6)?;
    Ok(SnapshotRecord {
        snapshot_id: row.get(0)?,
        created_by: row.get(1)?,
        created_by_username: row.get(2)?,
        image_ref: row.get(3)?,
        pixel_count: pixel_count.max(0) as u64,
        canvas_state_json: row.get(5)?,
        created_at: parse_sql_ts(6, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(id: &str, at: chrono::DateTime<Utc>) -> SnapshotRecord {
        SnapshotRecord {
            snapshot_id: id.into(),
            created_by: Some("1".into()),
            created_by_username: Some("alice".into()),
            image_ref: format!("http://localhost/snapshots/{id}"),
            pixel_count: 3,
            canvas_state_json: "[[\"#FFFFFF\"]]".into(),
            created_at: at,
        }
    }

    #[test]
    fn insert_get_list() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.insert_snapshot(&record("snapshot_1_a", now - Duration::seconds(5)))
            .unwrap();
        db.insert_snapshot(&record("snapshot_2_a", now)).unwrap();

        let got = db.get_snapshot("snapshot_1_a").unwrap();
        assert_eq!(got.pixel_count, 3);
        assert_eq!(got.canvas_state_json, "[[\"#FFFFFF\"]]");

        let listed = db.list_snapshots(10).unwrap();
        assert_eq!(listed[0].snapshot_id, "snapshot_2_a");

        assert!(matches!(db.get_snapshot("missing"), Err(StoreError::NotFound)));
    }

    #[test]
    fn snapshots_are_immutable_ids() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.insert_snapshot(&record("dup", now)).unwrap();
        assert!(db.insert_snapshot(&record("dup", now)).is_err());
    }
}
