//! Domain model structs persisted in SQLite.
//!
//! Every struct derives `Serialize` so the internal HTTP APIs can return it
//! as-is.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A bot user, keyed by platform user id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub avatar: Option<String>,
    /// Every metered command that completed, draws included.
    pub total_commands: u64,
    /// Pixels placed. Only ever increases; feeds the leaderboard.
    pub total_draws: u64,
    pub is_banned: bool,
    pub ban_reason: Option<String>,
    pub banned_at: Option<DateTime<Utc>>,
    /// Independent of `is_banned`.
    pub is_premium: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted by an upsert. `None` keeps whatever is stored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpsert {
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_banned: Option<bool>,
    #[serde(default)]
    pub is_premium: Option<bool>,
}

/// Result of recording one command usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageOutcome {
    pub user: User,
    /// `false` when this interaction id had already been counted.
    pub counted: bool,
}

// ---------------------------------------------------------------------------
// Canvas
// ---------------------------------------------------------------------------

/// One painted cell. Cells nobody touched have no row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pixel {
    pub x: u32,
    pub y: u32,
    pub color: String,
    pub user_id: String,
    pub username: String,
    pub edit_count: u64,
    pub previous_color: Option<String>,
    pub previous_user: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// What a single pixel write did.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrawOutcome {
    pub previous_color: Option<String>,
    /// `false` for a same-color redraw.
    pub changed: bool,
    /// `true` if the cell had never been painted.
    pub created: bool,
    pub edit_count: u64,
}

/// Singleton summary of the grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanvasAggregate {
    pub total_pixels: u64,
    pub unique_contributors: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub last_update_by: Option<String>,
    pub last_update_username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contributor {
    pub user_id: String,
    pub username: String,
    pub edits: u64,
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An immutable rendered artifact of the canvas.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub snapshot_id: String,
    pub created_by: Option<String>,
    pub created_by_username: Option<String>,
    pub image_ref: String,
    pub pixel_count: u64,
    /// The grid the artifact was rendered from, as JSON rows.
    #[serde(skip_serializing)]
    pub canvas_state_json: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

// Fixed-width RFC 3339 so lexical order in SQL matches chronological order.
pub(crate) fn to_sql_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_sql_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_opt_sql_ts(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_sql_ts(idx, &s)).transpose()
}
