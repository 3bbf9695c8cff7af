//! Canvas store: bounds/color validation over the persisted pixel grid,
//! aggregate stats and snapshot orchestration.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use guidon_shared::color::Color;
use guidon_shared::constants::DEFAULT_COLOR;
use guidon_store::{Contributor, DbHandle, DrawOutcome, SnapshotRecord, StoreError};

use crate::snapshot::{RenderError, SnapshotRenderer};

/// Contributor list cap for enriched stats.
pub const MAX_ENRICHED_CONTRIBUTORS: u32 = 50;

#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("Coordinates ({x}, {y}) are outside the {size}x{size} canvas")]
    OutOfBounds { x: i64, y: i64, size: u32 },

    #[error("Invalid color '{0}', expected #RRGGBB")]
    InvalidColor(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Snapshot rendering failed: {0}")]
    Render(#[from] RenderError),
}

/// A cell as shown to users. Untouched cells read as the default color.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PixelInfo {
    pub x: u32,
    pub y: u32,
    pub color: String,
    pub user_id: Option<String>,
    pub username: String,
    pub edit_count: u64,
    pub previous_color: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_empty: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanvasStats {
    pub canvas_size: u32,
    pub total_pixels: u64,
    pub total_cells: u64,
    pub coverage_percent: f64,
    pub unique_contributors: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub last_update_by: Option<String>,
    pub last_update_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contributors: Option<Vec<Contributor>>,
}

#[derive(Clone)]
pub struct Canvas {
    db: DbHandle,
    size: u32,
    renderer: Arc<dyn SnapshotRenderer>,
    /// Last millisecond handed out as a snapshot id stamp.
    last_stamp: Arc<AtomicI64>,
}

impl Canvas {
    pub fn new(db: DbHandle, size: u32, renderer: Arc<dyn SnapshotRenderer>) -> Self {
        Self {
            db,
            size,
            renderer,
            last_stamp: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Strictly increasing millisecond stamp so ids never collide.
    fn next_stamp(&self, now_ms: i64) -> i64 {
        let mut current = self.last_stamp.load(Ordering::Relaxed);
        loop {
            let next = now_ms.max(current + 1);
            match self.last_stamp.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Out-of-range coordinates are rejected, never clamped.
    pub fn validate_coords(&self, x: i64, y: i64) -> Result<(u32, u32), CanvasError> {
        let size = self.size as i64;
        if (0..size).contains(&x) && (0..size).contains(&y) {
            Ok((x as u32, y as u32))
        } else {
            Err(CanvasError::OutOfBounds {
                x,
                y,
                size: self.size,
            })
        }
    }

    pub async fn draw_pixel(
        &self,
        x: i64,
        y: i64,
        color: &str,
        user_id: &str,
        username: &str,
    ) -> Result<DrawOutcome, CanvasError> {
        let (x, y) = self.validate_coords(x, y)?;
        let color = Color::from_hex(color).map_err(|_| CanvasError::InvalidColor(color.to_string()))?;

        let (hex, uid, name) = (
            color.as_str().to_string(),
            user_id.to_string(),
            username.to_string(),
        );
        let outcome = self
            .db
            .call(move |db| db.draw_pixel(x, y, &hex, &uid, &name, Utc::now()))
            .await?;

        info!(
            x,
            y,
            color = %color,
            user_id,
            changed = outcome.changed,
            "Pixel drawn"
        );
        Ok(outcome)
    }

    /// Full grid as rows `[y][x]`.
    pub async fn read_grid(&self) -> Result<Vec<Vec<String>>, CanvasError> {
        Ok(self.painted_grid().await?.0)
    }

    /// Grid plus the number of stored cells that landed on it. A cell counts
    /// once painted, even with the default colour.
    async fn painted_grid(&self) -> Result<(Vec<Vec<String>>, u64), CanvasError> {
        let pixels = self.db.call(|db| db.list_pixels()).await?;
        let size = self.size as usize;
        let mut grid = vec![vec![DEFAULT_COLOR.to_string(); size]; size];
        let mut painted = 0;
        for p in pixels {
            // Rows from a larger canvas configuration are ignored.
            if let Some(cell) = grid
                .get_mut(p.y as usize)
                .and_then(|row| row.get_mut(p.x as usize))
            {
                *cell = p.color;
                painted += 1;
            }
        }
        Ok((grid, painted))
    }

    pub async fn read_pixel(&self, x: i64, y: i64) -> Result<PixelInfo, CanvasError> {
        let (x, y) = self.validate_coords(x, y)?;
        let pixel = self.db.call(move |db| db.get_pixel(x, y)).await?;
        Ok(match pixel {
            Some(p) => PixelInfo {
                x,
                y,
                color: p.color,
                user_id: Some(p.user_id),
                username: p.username,
                edit_count: p.edit_count,
                previous_color: p.previous_color,
                updated_at: Some(p.updated_at),
                is_empty: false,
            },
            None => PixelInfo {
                x,
                y,
                color: DEFAULT_COLOR.to_string(),
                user_id: None,
                username: "Empty".to_string(),
                edit_count: 0,
                previous_color: None,
                updated_at: None,
                is_empty: true,
            },
        })
    }

    pub async fn stats(&self, enrich: bool) -> Result<CanvasStats, CanvasError> {
        let (aggregate, contributors) = self
            .db
            .call(move |db| {
                let aggregate = db.canvas_aggregate()?;
                let contributors = if enrich {
                    Some(db.list_contributors(MAX_ENRICHED_CONTRIBUTORS)?)
                } else {
                    None
                };
                Ok((aggregate, contributors))
            })
            .await?;

        let total_cells = (self.size as u64) * (self.size as u64);
        let coverage_percent = if total_cells == 0 {
            0.0
        } else {
            (aggregate.total_pixels as f64 / total_cells as f64 * 10_000.0).round() / 100.0
        };

        Ok(CanvasStats {
            canvas_size: self.size,
            total_pixels: aggregate.total_pixels,
            total_cells,
            coverage_percent,
            unique_contributors: aggregate.unique_contributors,
            last_update: aggregate.last_update,
            last_update_by: aggregate.last_update_by,
            last_update_username: aggregate.last_update_username,
            contributors,
        })
    }

    /// Render the current grid and persist a snapshot record for it.
    ///
    /// `pixel_count` is the number of painted cells, whatever their colour.
    ///
    /// The grid is read once, without isolation from concurrent draws: a
    /// snapshot may contain any subset of writes racing with it.
    pub async fn snapshot(
        &self,
        requested_by: Option<(&str, &str)>,
    ) -> Result<SnapshotRecord, CanvasError> {
        let (grid, pixel_count) = self.painted_grid().await?;

        // Stored timestamps carry millisecond precision.
        let now = Utc::now().trunc_subsecs(3);
        let owner = requested_by.map(|(id, _)| id).unwrap_or("system");
        let stamp = self.next_stamp(now.timestamp_millis());
        let snapshot_id = format!("snapshot_{}_{}", stamp, sanitize(owner));

        let image_ref = self.renderer.render(&snapshot_id, &grid).await?;

        let record = SnapshotRecord {
            snapshot_id,
            created_by: requested_by.map(|(id, _)| id.to_string()),
            created_by_username: requested_by.map(|(_, name)| name.to_string()),
            image_ref,
            pixel_count,
            canvas_state_json: serde_json::to_string(&grid).map_err(StoreError::from)?,
            created_at: now,
        };

        let to_insert = record.clone();
        self.db.call(move |db| db.insert_snapshot(&to_insert)).await?;

        info!(
            snapshot_id = %record.snapshot_id,
            pixel_count,
            "Snapshot created"
        );
        Ok(record)
    }

    pub async fn get_snapshot(&self, snapshot_id: &str) -> Result<SnapshotRecord, CanvasError> {
        let id = snapshot_id.to_string();
        Ok(self.db.call(move |db| db.get_snapshot(&id)).await?)
    }

    pub async fn list_snapshots(&self, limit: u32) -> Result<Vec<SnapshotRecord>, CanvasError> {
        let limit = limit.clamp(1, 100);
        Ok(self.db.call(move |db| db.list_snapshots(limit)).await?)
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(64)
        .collect()
}
