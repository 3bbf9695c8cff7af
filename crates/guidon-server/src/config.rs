//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use guidon_shared::constants::CANVAS_SIZE;

/// How envelopes travel from the gateway to the processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMode {
    /// Bounded in-process queues, one worker per topic.
    InProcess,
    /// Managed pub/sub over REST; processors receive push deliveries.
    PubSub,
}

impl BusMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusMode::InProcess => "memory",
            BusMode::PubSub => "pubsub",
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./guidon.db`
    pub database_path: PathBuf,

    /// Discord application public key (hex-encoded, 64 chars).
    /// Env: `DISCORD_PUBLIC_KEY`
    /// Default: unset, every Discord request fails verification.
    pub discord_public_key: Option<[u8; 32]>,

    /// Discord REST base used for webhook completion.
    /// Env: `DISCORD_API_BASE`
    /// Default: `https://discord.com/api/v10`
    pub discord_api_base: String,

    /// Externally reachable base URL of this server. Processors post replies
    /// to `{public_url}/reply` and snapshot links are built from it.
    /// Env: `PUBLIC_URL`
    /// Default: `http://localhost:8080`
    pub public_url: String,

    /// Bearer token for service-to-service endpoints.
    /// Env: `INTERNAL_API_TOKEN`
    /// Default: empty (internal APIs disabled).
    pub internal_token: Option<String>,

    /// Env: `BUS_MODE` (`memory` / `pubsub`)
    /// Default: `memory`
    pub bus_mode: BusMode,

    /// Env: `PUBSUB_ENDPOINT`
    /// Default: `https://pubsub.googleapis.com`
    pub pubsub_endpoint: String,

    /// Env: `PUBSUB_PROJECT`
    /// Default: `guidon`
    pub pubsub_project: String,

    /// Env: `PUBSUB_TOKEN`
    pub pubsub_token: Option<String>,

    /// Topic names are `{topic_prefix}-{lane}`.
    /// Env: `TOPIC_PREFIX`
    /// Default: `discord-commands`
    pub topic_prefix: String,

    /// Session verification service for web clients.
    /// Env: `AUTH_SERVICE_URL`
    /// Default: unset (web interactions disabled).
    pub auth_service_url: Option<String>,

    /// Where locally rendered snapshot artifacts are written.
    /// Env: `SNAPSHOT_DIR`
    /// Default: `./snapshots`
    pub snapshot_dir: PathBuf,

    /// External renderer. When set, snapshots are rendered remotely.
    /// Env: `SNAPSHOT_RENDERER_URL`
    pub snapshot_renderer_url: Option<String>,

    /// Env: `CANVAS_SIZE`
    /// Default: `48`
    pub canvas_size: u32,

    /// Budget for each synchronous gateway check (user lookup, rate peek).
    /// Env: `CHECK_TIMEOUT_MS`
    /// Default: `2000`
    pub check_timeout: Duration,

    /// Env: `PUBLISH_TIMEOUT_MS`
    /// Default: `2000`
    pub publish_timeout: Duration,

    /// Env: `POLL_TTL_SECS`
    /// Default: `300`
    pub poll_ttl: Duration,

    /// Env: `POLL_SWEEP_SECS`
    /// Default: `60`
    pub poll_sweep_interval: Duration,

    /// Env: `POLL_CAPACITY`
    /// Default: `10000`
    pub poll_capacity: usize,

    /// Env: `USER_CACHE_TTL_SECS`
    /// Default: `60`
    pub user_cache_ttl: Duration,

    /// Env: `WORKER_QUEUE_DEPTH`
    /// Default: `256`
    pub worker_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            database_path: PathBuf::from("./guidon.db"),
            discord_public_key: None,
            discord_api_base: "https://discord.com/api/v10".to_string(),
            public_url: "http://localhost:8080".to_string(),
            internal_token: None,
            bus_mode: BusMode::InProcess,
            pubsub_endpoint: "https://pubsub.googleapis.com".to_string(),
            pubsub_project: "guidon".to_string(),
            pubsub_token: None,
            topic_prefix: "discord-commands".to_string(),
            auth_service_url: None,
            snapshot_dir: PathBuf::from("./snapshots"),
            snapshot_renderer_url: None,
            canvas_size: CANVAS_SIZE,
            check_timeout: Duration::from_millis(2000),
            publish_timeout: Duration::from_millis(2000),
            poll_ttl: Duration::from_secs(300),
            poll_sweep_interval: Duration::from_secs(60),
            poll_capacity: 10_000,
            user_cache_ttl: Duration::from_secs(60),
            worker_queue_depth: 256,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Ok(hex_key) = std::env::var("DISCORD_PUBLIC_KEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.discord_public_key = Some(key),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid DISCORD_PUBLIC_KEY, Discord requests will be rejected"
                    );
                }
            }
        }

        if let Ok(base) = std::env::var("DISCORD_API_BASE") {
            config.discord_api_base = base.trim_end_matches('/').to_string();
        }

        if let Ok(url) = std::env::var("PUBLIC_URL") {
            config.public_url = url.trim_end_matches('/').to_string();
        }

        config.internal_token = non_empty_var("INTERNAL_API_TOKEN");

        if let Ok(mode) = std::env::var("BUS_MODE") {
            match mode.trim().to_ascii_lowercase().as_str() {
                "memory" | "inprocess" | "in-process" => config.bus_mode = BusMode::InProcess,
                "pubsub" => config.bus_mode = BusMode::PubSub,
                other => tracing::warn!(value = %other, "Invalid BUS_MODE, using default"),
            }
        }

        if let Ok(endpoint) = std::env::var("PUBSUB_ENDPOINT") {
            config.pubsub_endpoint = endpoint.trim_end_matches('/').to_string();
        }
        if let Ok(project) = std::env::var("PUBSUB_PROJECT") {
            config.pubsub_project = project;
        }
        config.pubsub_token = non_empty_var("PUBSUB_TOKEN");
        if let Ok(prefix) = std::env::var("TOPIC_PREFIX") {
            config.topic_prefix = prefix;
        }

        config.auth_service_url =
            non_empty_var("AUTH_SERVICE_URL").map(|u| u.trim_end_matches('/').to_string());

        if let Ok(dir) = std::env::var("SNAPSHOT_DIR") {
            config.snapshot_dir = PathBuf::from(dir);
        }
        config.snapshot_renderer_url = non_empty_var("SNAPSHOT_RENDERER_URL");

        if let Some(size) = parsed_var::<u32>("CANVAS_SIZE") {
            if size > 0 {
                config.canvas_size = size;
            }
        }
        if let Some(ms) = parsed_var::<u64>("CHECK_TIMEOUT_MS") {
            config.check_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed_var::<u64>("PUBLISH_TIMEOUT_MS") {
            config.publish_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parsed_var::<u64>("POLL_TTL_SECS") {
            config.poll_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed_var::<u64>("POLL_SWEEP_SECS") {
            config.poll_sweep_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(n) = parsed_var::<usize>("POLL_CAPACITY") {
            config.poll_capacity = n.max(1);
        }
        if let Some(secs) = parsed_var::<u64>("USER_CACHE_TTL_SECS") {
            config.user_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(n) = parsed_var::<usize>("WORKER_QUEUE_DEPTH") {
            config.worker_queue_depth = n.max(1);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Where processors send finished replies.
    pub fn reply_callback_url(&self) -> String {
        format!("{}/reply", self.public_url)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

/// Discord shows the application key as 64 hex characters.
fn parse_hex_pubkey(input: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(input.trim()).map_err(|e| format!("invalid hex: {e}"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))
}
