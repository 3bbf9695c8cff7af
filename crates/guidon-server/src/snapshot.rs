//! Snapshot rendering backends.
//!
//! The canvas hands a point-in-time grid to a [`SnapshotRenderer`] and gets
//! back an image reference. Encoding images is somebody else's job: the
//! [`HttpRenderer`] posts the grid to an external render service, and the
//! [`LocalRenderer`] just persists the grid as a JSON artifact that a
//! front-end can paint itself.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use guidon_shared::constants::PIXEL_SCALE;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Invalid snapshot id: {0}")]
    InvalidId(String),

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Artifact storage error: {0}")]
    Storage(String),

    #[error("Renderer request failed: {0}")]
    Remote(String),
}

#[async_trait]
pub trait SnapshotRenderer: Send + Sync {
    /// Render `grid` (rows `[y][x]` of `#RRGGBB`) and return where the image lives.
    async fn render(&self, snapshot_id: &str, grid: &[Vec<String>]) -> Result<String, RenderError>;
}

/// Snapshot ids end up in file names and URLs.
fn validate_id(id: &str) -> Result<(), RenderError> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if ok {
        Ok(())
    } else {
        Err(RenderError::InvalidId(id.to_string()))
    }
}

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, RenderError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(base)
        .unwrap_or(target)
        .components()
    {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(RenderError::InvalidId("path traversal".to_string()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(RenderError::InvalidId("path traversal".to_string()));
    }
    Ok(resolved)
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SnapshotArtifact {
    pub snapshot_id: String,
    pub width: usize,
    pub height: usize,
    pub pixel_scale: u32,
    pub rows: Vec<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Local artifacts
// ---------------------------------------------------------------------------

/// Writes grid artifacts under a directory and serves them back by id.
#[derive(Debug, Clone)]
pub struct LocalRenderer {
    base_path: PathBuf,
    /// Public prefix, e.g. `https://gw.example/snapshots`.
    public_base: String,
}

impl LocalRenderer {
    pub async fn new(base_path: PathBuf, public_base: String) -> Result<Self, RenderError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            RenderError::Storage(format!(
                "Failed to create snapshot directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Snapshot artifact store initialized");

        Ok(Self {
            base_path,
            public_base: public_base.trim_end_matches('/').to_string(),
        })
    }

    fn artifact_path(&self, id: &str) -> Result<PathBuf, RenderError> {
        validate_id(id)?;
        let raw = self.base_path.join(format!("{id}.json"));
        ensure_within(&self.base_path, &raw)
    }

    pub async fn load(&self, id: &str) -> Result<Vec<u8>, RenderError> {
        let path = self.artifact_path(id)?;
        if !path.exists() {
            return Err(RenderError::NotFound(id.to_string()));
        }
        let data = fs::read(&path)
            .await
            .map_err(|e| RenderError::Storage(format!("Failed to read artifact {id}: {e}")))?;
        debug!(id, size = data.len(), "Loaded snapshot artifact");
        Ok(data)
    }
}

#[async_trait]
impl SnapshotRenderer for LocalRenderer {
    async fn render(&self, snapshot_id: &str, grid: &[Vec<String>]) -> Result<String, RenderError> {
        let path = self.artifact_path(snapshot_id)?;
        let artifact = SnapshotArtifact {
            snapshot_id: snapshot_id.to_string(),
            width: grid.first().map(Vec::len).unwrap_or(0),
            height: grid.len(),
            pixel_scale: PIXEL_SCALE,
            rows: grid.to_vec(),
        };
        let bytes = serde_json::to_vec(&artifact)
            .map_err(|e| RenderError::Storage(e.to_string()))?;

        fs::write(&path, &bytes).await.map_err(|e| {
            RenderError::Storage(format!("Failed to write artifact {snapshot_id}: {e}"))
        })?;

        debug!(id = snapshot_id, size = bytes.len(), "Stored snapshot artifact");
        Ok(format!("{}/{}", self.public_base, snapshot_id))
    }
}

// ---------------------------------------------------------------------------
// Remote renderer
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RenderRequest<'a> {
    snapshot_id: &'a str,
    pixel_scale: u32,
    canvas: &'a [Vec<String>],
}

#[derive(Deserialize)]
struct RenderResponse {
    #[serde(alias = "public_url", alias = "image_url")]
    url: String,
}

/// Posts the grid to an external render service that answers `{url}`.
pub struct HttpRenderer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRenderer {
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl SnapshotRenderer for HttpRenderer {
    async fn render(&self, snapshot_id: &str, grid: &[Vec<String>]) -> Result<String, RenderError> {
        validate_id(snapshot_id)?;
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RenderRequest {
                snapshot_id,
                pixel_scale: PIXEL_SCALE,
                canvas: grid,
            })
            .send()
            .await
            .map_err(|e| RenderError::Remote(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RenderError::Remote(format!(
                "renderer returned {}",
                response.status()
            )));
        }

        let body: RenderResponse = response
            .json()
            .await
            .map_err(|e| RenderError::Remote(e.to_string()))?;
        Ok(body.url)
    }
}
