//! v001 -- Initial schema creation.
//!
//! Users, per-(user, command) rate windows, the sparse pixel grid with its
//! singleton aggregate and contributor list, snapshots, and the usage
//! dedup ledger.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    user_id        TEXT PRIMARY KEY NOT NULL,   -- platform snowflake
    username       TEXT NOT NULL,
    avatar         TEXT,
    total_commands INTEGER NOT NULL DEFAULT 0,
    total_draws    INTEGER NOT NULL DEFAULT 0,
    is_banned      INTEGER NOT NULL DEFAULT 0,
    ban_reason     TEXT,
    banned_at      TEXT,
    is_premium     INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL,               -- RFC-3339, millisecond precision
    updated_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_total_draws ON users(total_draws DESC);
CREATE INDEX IF NOT EXISTS idx_users_updated_at ON users(updated_at);

-- ----------------------------------------------------------------
-- Rate-limit windows
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS rate_limits (
    user_id    TEXT NOT NULL,
    command    TEXT NOT NULL,
    calls      TEXT NOT NULL,                   -- JSON array of unix millis, ascending
    updated_at TEXT NOT NULL,

    PRIMARY KEY (user_id, command)
);

-- ----------------------------------------------------------------
-- Canvas
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS pixels (
    x              INTEGER NOT NULL,
    y              INTEGER NOT NULL,
    color          TEXT NOT NULL,               -- #RRGGBB
    user_id        TEXT NOT NULL,
    username       TEXT NOT NULL,
    edit_count     INTEGER NOT NULL DEFAULT 1,
    previous_color TEXT,
    previous_user  TEXT,
    updated_at     TEXT NOT NULL,

    PRIMARY KEY (x, y)
);

CREATE TABLE IF NOT EXISTS canvas_aggregate (
    id                   INTEGER PRIMARY KEY CHECK (id = 1),
    total_pixels         INTEGER NOT NULL DEFAULT 0,
    last_update          TEXT,
    last_update_by       TEXT,
    last_update_username TEXT
);

INSERT OR IGNORE INTO canvas_aggregate (id, total_pixels) VALUES (1, 0);

CREATE TABLE IF NOT EXISTS canvas_contributors (
    user_id    TEXT PRIMARY KEY NOT NULL,
    username   TEXT NOT NULL,
    edits      INTEGER NOT NULL DEFAULT 0,
    first_seen TEXT NOT NULL,
    last_seen  TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Snapshots
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS snapshots (
    snapshot_id         TEXT PRIMARY KEY NOT NULL,
    created_by          TEXT,
    created_by_username TEXT,
    image_ref           TEXT NOT NULL,
    pixel_count         INTEGER NOT NULL,
    canvas_state        TEXT NOT NULL,          -- JSON rows [y][x]
    created_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_created_at ON snapshots(created_at DESC);

-- ----------------------------------------------------------------
-- Usage dedup (one row per interaction already counted)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS processed_usage (
    interaction_id TEXT PRIMARY KEY NOT NULL,
    user_id        TEXT NOT NULL,
    command        TEXT NOT NULL,
    processed_at   TEXT NOT NULL
);
"#;

/// Apply the v001 migration.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
