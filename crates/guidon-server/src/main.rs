//! # guidon-server
//!
//! Interaction gateway and command processors for the Guidon pixel canvas.
//!
//! This binary provides:
//! - **Edge gateway** that verifies signed Discord webhooks, answers trivial
//!   commands inline and defers everything else onto the bus
//! - **Command processors** consuming per-command lanes and relaying replies
//!   back through the gateway
//! - **Sliding-window rate limiting** with premium tiers, persisted in SQLite
//! - **Internal REST API** (axum) over the canvas, the user directory and the
//!   rate limiter

mod api;
mod bus;
mod canvas;
mod config;
mod directory;
mod error;
mod gateway;
mod poll_slots;
mod processor;
mod rate_limit;
mod relay;
mod session;
mod snapshot;
mod worker;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use guidon_store::DbHandle;

use crate::api::AppState;
use crate::bus::{InProcessBus, PubSubPublisher, Publisher};
use crate::canvas::Canvas;
use crate::config::{BusMode, ServerConfig};
use crate::directory::Directory;
use crate::gateway::{Gateway, GatewaySettings};
use crate::poll_slots::PollSlots;
use crate::processor::{Processor, Registry, Services};
use crate::rate_limit::{RateLimiter, TierTable};
use crate::relay::{HttpReplySink, LocalReplySink, ReplyRelay, ReplySink};
use crate::session::{HttpSessionVerifier, SessionVerifier};
use crate::snapshot::{HttpRenderer, LocalRenderer, SnapshotRenderer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,guidon_server=debug")),
        )
        .init();

    info!("Starting Guidon server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        http_addr = %config.http_addr,
        database = %config.database_path.display(),
        bus_mode = config.bus_mode.as_str(),
        canvas_size = config.canvas_size,
        discord_enabled = config.discord_public_key.is_some(),
        web_enabled = config.auth_service_url.is_some(),
        internal_api_enabled = config.internal_token.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let http = reqwest::Client::new();

    let db = DbHandle::open_at(&config.database_path)?;
    let directory = Directory::new(db.clone(), config.user_cache_ttl);
    let rate_limiter = RateLimiter::new(db.clone(), TierTable::default());

    // Remote renderer when configured, JSON artifacts on disk otherwise.
    let (renderer, artifacts): (Arc<dyn SnapshotRenderer>, Option<Arc<LocalRenderer>>) =
        match config.snapshot_renderer_url {
            Some(ref url) => (
                Arc::new(HttpRenderer::new(http.clone(), url.clone())) as Arc<dyn SnapshotRenderer>,
                None,
            ),
            None => {
                let local = Arc::new(
                    LocalRenderer::new(
                        config.snapshot_dir.clone(),
                        format!("{}/snapshots", config.public_url),
                    )
                    .await?,
                );
                (local.clone() as Arc<dyn SnapshotRenderer>, Some(local))
            }
        };
    let canvas = Canvas::new(db, config.canvas_size, renderer);

    let slots = PollSlots::new(config.poll_ttl, config.poll_capacity);
    let relay = ReplyRelay::new(http.clone(), &config.discord_api_base, slots.clone());

    let (publisher, receivers): (Arc<dyn Publisher>, _) = match config.bus_mode {
        BusMode::InProcess => {
            let (bus, receivers) = InProcessBus::new(config.worker_queue_depth);
            (Arc::new(bus) as Arc<dyn Publisher>, Some(receivers))
        }
        BusMode::PubSub => (
            Arc::new(PubSubPublisher::new(
                http.clone(),
                &config.pubsub_endpoint,
                &config.pubsub_project,
                config.pubsub_token.clone(),
                &config.topic_prefix,
            )) as Arc<dyn Publisher>,
            None,
        ),
    };

    let sessions = config.auth_service_url.as_deref().map(|url| {
        Arc::new(HttpSessionVerifier::new(http.clone(), url)) as Arc<dyn SessionVerifier>
    });

    let processor = Processor::new(
        Arc::new(Registry::standard()),
        Services {
            directory: directory.clone(),
            rate_limiter: rate_limiter.clone(),
            canvas,
        },
    );

    let gateway = Gateway::new(
        GatewaySettings {
            public_key: config.discord_public_key,
            callback_url: config.reply_callback_url(),
            check_timeout: config.check_timeout,
            publish_timeout: config.publish_timeout,
            canvas_size: config.canvas_size,
        },
        directory.clone(),
        rate_limiter,
        publisher,
        sessions,
        relay.clone(),
    );

    // Push deliveries may come from another instance, so their replies go
    // back over HTTP to whatever callback the envelope names.
    let push_sink: Arc<dyn ReplySink> = Arc::new(HttpReplySink::new(
        http.clone(),
        config.internal_token.as_deref(),
    ));

    let app_state = AppState {
        config: Arc::new(config.clone()),
        gateway,
        processor: processor.clone(),
        push_sink,
        artifacts,
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    let sweeper = slots.start_sweeper(config.poll_sweep_interval);

    // Periodic user cache and usage-marker cleanup (every 5 minutes, keep
    // markers for a day)
    let dir = directory.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            dir.purge_expired().await;
            dir.prune_processed(std::time::Duration::from_secs(24 * 3600)).await;
        }
    });

    if let Some(receivers) = receivers {
        let workers = worker::spawn_workers(
            receivers,
            processor,
            Arc::new(LocalReplySink::new(relay)),
        );
        info!(count = workers.len(), "In-process workers running");
    }

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let outcome = tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(ref e) = result {
                tracing::error!(error = %e, "HTTP server failed");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    sweeper.stop().await;
    outcome
}
