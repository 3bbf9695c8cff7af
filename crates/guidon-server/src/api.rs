use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use guidon_shared::color::Color;
use guidon_shared::constants::{HEADER_SIGNATURE, HEADER_TIMESTAMP, SERVICE_NAME};
use guidon_store::UserUpsert;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::gateway::Gateway;
use crate::processor::Processor;
use crate::relay::{RelayRequest, ReplySink};
use crate::snapshot::LocalRenderer;
use crate::worker::{handle_push, PushDelivery};

pub const HEADER_CORRELATION_ID: &str = "x-correlation-id";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub gateway: Gateway,
    pub processor: Processor,
    /// Where replies to push deliveries go.
    pub push_sink: Arc<dyn ReplySink>,
    /// Present when snapshots are rendered locally.
    pub artifacts: Option<Arc<LocalRenderer>>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    // Service-to-service surface, bearer protected.
    let internal = Router::new()
        .route("/reply", post(relay_reply))
        .route("/pubsub/push", post(pubsub_push))
        .route("/canvas/draw", post(canvas_draw))
        .route("/canvas/state", get(canvas_state))
        .route("/canvas/stats", get(canvas_stats))
        .route("/canvas/snapshot", post(canvas_snapshot))
        .route("/canvas/snapshots", get(canvas_snapshots))
        .route("/canvas/snapshots/:id", get(canvas_snapshot_record))
        .route("/canvas/pixel/:x/:y", get(canvas_pixel))
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/:id", get(get_user).post(update_user))
        .route("/api/users/:id/increment", post(increment_user))
        .route("/api/users/:id/ban", post(ban_user))
        .route("/api/users/:id/unban", post(unban_user))
        .route("/api/users/:id/premium", put(set_premium))
        .route("/api/rate-limit/check", post(rate_limit_check))
        .route(
            "/api/rate-limit/:id",
            get(rate_limit_info).delete(rate_limit_reset),
        )
        .route("/api/stats/users", get(stats_users))
        .route("/api/stats/active", get(stats_active))
        .route("/api/stats/leaderboard", get(stats_leaderboard))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_internal_token,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/interactions", post(discord_interaction))
        .route("/web/interactions", post(web_interaction))
        .route("/response/:token", get(poll_response))
        .route("/snapshots/:id", get(snapshot_artifact))
        .merge(internal)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn correlation_id(headers: &HeaderMap) -> String {
    header_str(headers, HEADER_CORRELATION_ID)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    let auth = header_str(headers, header::AUTHORIZATION.as_str())?;
    Some(auth.strip_prefix("Bearer ").unwrap_or(auth).trim())
}

fn verify_internal_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.internal_token else {
        return Err(ServerError::Forbidden(
            "Internal API is disabled (no INTERNAL_API_TOKEN configured)".into(),
        ));
    };

    let token = bearer(headers).unwrap_or("");

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid internal token".into()));
    }

    Ok(())
}

async fn require_internal_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    verify_internal_token(request.headers(), &state.config)?;
    Ok(next.run(request).await)
}

// ─── Gateway ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    canvas_size: u32,
    bus_mode: &'static str,
    poll_slots: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        canvas_size: state.config.canvas_size,
        bus_mode: state.config.bus_mode.as_str(),
        poll_slots: state.gateway.relay().slots().len().await,
    })
}

async fn discord_interaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServerError> {
    let correlation_id = correlation_id(&headers);
    let response = state
        .gateway
        .handle_discord(
            header_str(&headers, HEADER_SIGNATURE),
            header_str(&headers, HEADER_TIMESTAMP),
            &body,
            &correlation_id,
        )
        .await?;
    Ok(Json(response))
}

async fn web_interaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ServerError> {
    let correlation_id = correlation_id(&headers);
    let (status, response) = state
        .gateway
        .handle_web(bearer(&headers), &body, &correlation_id)
        .await?;
    Ok((status, Json(response)))
}

async fn poll_response(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.gateway.relay().slots().take_once(&token).await {
        Some(reply) => (StatusCode::OK, Json(reply.to_web())),
        None => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "pending", "message": "Response not ready yet" })),
        ),
    }
}

async fn snapshot_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ServerError> {
    let Some(ref artifacts) = state.artifacts else {
        return Err(ServerError::NotFound(format!("snapshot {id}")));
    };
    let data = artifacts.load(&id).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], data).into_response())
}

async fn relay_reply(
    State(state): State<AppState>,
    Json(request): Json<RelayRequest>,
) -> Json<Value> {
    let delivered = match state.gateway.receive_processor_reply(request).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Reply relay failed");
            false
        }
    };
    Json(json!({ "received": true, "delivered": delivered }))
}

/// Always 204, so a poison message is not redelivered forever.
async fn pubsub_push(State(state): State<AppState>, body: Bytes) -> StatusCode {
    match serde_json::from_slice::<PushDelivery>(&body) {
        Ok(delivery) => handle_push(&state.processor, state.push_sink.as_ref(), delivery).await,
        Err(e) => warn!(error = %e, "Dropping malformed push body"),
    }
    StatusCode::NO_CONTENT
}

// ─── Canvas API ───

#[derive(Deserialize)]
struct DrawRequest {
    x: i64,
    y: i64,
    color: String,
    user_id: String,
    username: String,
}

#[derive(Serialize)]
struct DrawResponse {
    success: bool,
    previous_color: Option<String>,
    changed: bool,
}

#[derive(Deserialize, Default)]
struct SnapshotRequest {
    user_id: Option<String>,
    username: Option<String>,
}

#[derive(Deserialize)]
struct StatsQuery {
    #[serde(default)]
    enrich: bool,
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<u32>,
}

async fn canvas_draw(
    State(state): State<AppState>,
    Json(req): Json<DrawRequest>,
) -> Result<Json<DrawResponse>, ServerError> {
    let color = Color::parse(&req.color)
        .map_err(|_| ServerError::BadRequest(format!("Invalid color '{}'", req.color)))?;
    let outcome = state
        .processor
        .services()
        .canvas
        .draw_pixel(req.x, req.y, color.as_str(), &req.user_id, &req.username)
        .await?;

    debug!(x = req.x, y = req.y, user_id = %req.user_id, "Pixel drawn via API");
    Ok(Json(DrawResponse {
        success: true,
        previous_color: outcome.previous_color,
        changed: outcome.changed,
    }))
}

async fn canvas_state(State(state): State<AppState>) -> Result<Json<Value>, ServerError> {
    let canvas = &state.processor.services().canvas;
    let pixels = canvas.read_grid().await?;
    Ok(Json(json!({ "size": canvas.size(), "pixels": pixels })))
}

async fn canvas_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Value>, ServerError> {
    let stats = state.processor.services().canvas.stats(query.enrich).await?;
    Ok(Json(json!(stats)))
}

async fn canvas_snapshot(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ServerError> {
    let req: SnapshotRequest = if body.is_empty() {
        SnapshotRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ServerError::BadRequest(format!("Invalid snapshot request: {e}")))?
    };
    let owner = match (req.user_id.as_deref(), req.username.as_deref()) {
        (Some(id), name) => Some((id, name.unwrap_or(id))),
        (None, _) => None,
    };

    let record = state.processor.services().canvas.snapshot(owner).await?;
    info!(snapshot_id = %record.snapshot_id, "Snapshot created via API");
    Ok(Json(json!({
        "success": true,
        "snapshot_id": record.snapshot_id,
        "image_ref": record.image_ref,
        "pixel_count": record.pixel_count,
    })))
}

async fn canvas_snapshots(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, ServerError> {
    let snapshots = state
        .processor
        .services()
        .canvas
        .list_snapshots(query.limit.unwrap_or(20))
        .await?;
    Ok(Json(json!({ "snapshots": snapshots })))
}

async fn canvas_snapshot_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let record = state.processor.services().canvas.get_snapshot(&id).await?;
    Ok(Json(json!(record)))
}

async fn canvas_pixel(
    State(state): State<AppState>,
    Path((x, y)): Path<(i64, i64)>,
) -> Result<Json<Value>, ServerError> {
    let pixel = state.processor.services().canvas.read_pixel(x, y).await?;
    Ok(Json(json!(pixel)))
}

// ─── User API ───

#[derive(Deserialize)]
struct CreateUserRequest {
    user_id: String,
    #[serde(flatten)]
    fields: UserUpsert,
}

#[derive(Deserialize)]
struct IncrementRequest {
    command: String,
    username: Option<String>,
    interaction_id: Option<String>,
}

#[derive(Deserialize, Default)]
struct BanRequest {
    reason: Option<String>,
}

#[derive(Deserialize)]
struct PremiumRequest {
    #[serde(alias = "is_premium")]
    premium: bool,
}

#[derive(Deserialize)]
struct RateCheckRequest {
    user_id: String,
    command: String,
    premium: Option<bool>,
}

#[derive(Deserialize)]
struct ResetQuery {
    command: Option<String>,
}

#[derive(Deserialize)]
struct ActiveQuery {
    hours: Option<u32>,
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, ServerError> {
    let users = state
        .processor
        .services()
        .directory
        .list(query.limit.unwrap_or(100))
        .await?;
    Ok(Json(json!({ "users": users })))
}

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<Value>, ServerError> {
    if req.user_id.trim().is_empty() {
        return Err(ServerError::BadRequest("user_id is required".into()));
    }
    let user = state
        .processor
        .services()
        .directory
        .create_or_update(&req.user_id, req.fields)
        .await?;
    Ok(Json(json!(user)))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let user = state
        .processor
        .services()
        .directory
        .get(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("user {id}")))?;
    Ok(Json(json!(user)))
}

async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(fields): Json<UserUpsert>,
) -> Result<Json<Value>, ServerError> {
    let user = state
        .processor
        .services()
        .directory
        .create_or_update(&id, fields)
        .await?;
    Ok(Json(json!(user)))
}

async fn increment_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<IncrementRequest>,
) -> Result<Json<Value>, ServerError> {
    let username = req.username.unwrap_or_else(|| id.clone());
    let outcome = state
        .processor
        .services()
        .directory
        .increment_usage(&id, &username, &req.command, req.interaction_id.as_deref())
        .await?;
    Ok(Json(json!({ "user": outcome.user, "counted": outcome.counted })))
}

async fn ban_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ServerError> {
    let req: BanRequest = if body.is_empty() {
        BanRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ServerError::BadRequest(format!("Invalid ban request: {e}")))?
    };
    let user = state
        .processor
        .services()
        .directory
        .ban(&id, req.reason.as_deref())
        .await?;
    Ok(Json(json!(user)))
}

async fn unban_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let user = state.processor.services().directory.unban(&id).await?;
    Ok(Json(json!(user)))
}

async fn set_premium(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PremiumRequest>,
) -> Result<Json<Value>, ServerError> {
    let user = state
        .processor
        .services()
        .directory
        .set_premium(&id, req.premium)
        .await?;
    Ok(Json(json!(user)))
}

/// Stored premium flag, or `false` for an unknown user.
async fn stored_premium(state: &AppState, user_id: &str) -> Result<bool, ServerError> {
    let user = state.processor.services().directory.get(user_id).await?;
    Ok(user.map(|u| u.is_premium).unwrap_or(false))
}

async fn rate_limit_check(
    State(state): State<AppState>,
    Json(req): Json<RateCheckRequest>,
) -> Result<Json<Value>, ServerError> {
    let premium = match req.premium {
        Some(p) => p,
        None => stored_premium(&state, &req.user_id).await?,
    };
    let decision = state
        .processor
        .services()
        .rate_limiter
        .check_and_record(&req.user_id, &req.command, premium)
        .await?;
    Ok(Json(json!(decision)))
}

async fn rate_limit_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let premium = stored_premium(&state, &id).await?;
    let limits = state
        .processor
        .services()
        .rate_limiter
        .limits_info(&id, premium)
        .await?;
    Ok(Json(json!({ "user_id": id, "is_premium": premium, "limits": limits })))
}

async fn rate_limit_reset(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ResetQuery>,
) -> Result<Json<Value>, ServerError> {
    let deleted = state
        .processor
        .services()
        .rate_limiter
        .reset(&id, query.command.as_deref())
        .await?;
    info!(user_id = %id, command = ?query.command, deleted, "Rate limit windows reset");
    Ok(Json(json!({ "deleted": deleted })))
}

async fn stats_users(State(state): State<AppState>) -> Result<Json<Value>, ServerError> {
    let total = state.processor.services().directory.count_users().await?;
    Ok(Json(json!({ "total_users": total })))
}

async fn stats_active(
    State(state): State<AppState>,
    Query(query): Query<ActiveQuery>,
) -> Result<Json<Value>, ServerError> {
    let hours = query.hours.unwrap_or(24);
    let active = state.processor.services().directory.active_users(hours).await?;
    Ok(Json(json!({ "active_users": active, "hours": hours })))
}

async fn stats_leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, ServerError> {
    let users = state
        .processor
        .services()
        .directory
        .leaderboard(query.limit.unwrap_or(10))
        .await?;
    Ok(Json(json!({ "leaderboard": users })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use tower::ServiceExt;

    use guidon_shared::reply::Reply;
    use guidon_store::DbHandle;

    use crate::bus::InProcessBus;
    use crate::directory::Directory;
    use crate::gateway::GatewaySettings;
    use crate::poll_slots::PollSlots;
    use crate::processor::{Registry, Services};
    use crate::rate_limit::{RateLimiter, TierTable};
    use crate::relay::{LocalReplySink, ReplyRelay};

    const TOKEN: &str = "s3cret";

    fn app_with(internal_token: Option<&str>) -> (Router, AppState) {
        let db = DbHandle::open_in_memory().unwrap();
        let directory = Directory::new(db.clone(), Duration::from_secs(60));
        let rate_limiter = RateLimiter::new(db.clone(), TierTable::default());
        let canvas = crate::canvas::tests::canvas_on(db);
        let services = Services {
            directory: directory.clone(),
            rate_limiter: rate_limiter.clone(),
            canvas,
        };
        let relay = ReplyRelay::new(
            reqwest::Client::new(),
            "http://discord.invalid",
            PollSlots::new(Duration::from_secs(60), 16),
        );
        let (bus, _receivers) = InProcessBus::new(4);
        let gateway = Gateway::new(
            GatewaySettings {
                public_key: None,
                callback_url: "http://gw/reply".into(),
                check_timeout: Duration::from_secs(1),
                publish_timeout: Duration::from_secs(1),
                canvas_size: 100,
            },
            directory,
            rate_limiter,
            Arc::new(bus),
            None,
            relay.clone(),
        );

        let config = ServerConfig {
            internal_token: internal_token.map(String::from),
            ..ServerConfig::default()
        };
        let state = AppState {
            config: Arc::new(config),
            gateway,
            processor: Processor::new(Arc::new(Registry::standard()), services),
            push_sink: Arc::new(LocalReplySink::new(relay)),
            artifacts: None,
        };
        (build_router(state.clone()), state)
    }

    fn app() -> (Router, AppState) {
        app_with(Some(TOKEN))
    }

    fn authed(method: Method, uri: &str, body: Value) -> Request {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn authed_get(uri: &str) -> Request {
        axum::http::Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn send(router: &Router, request: Request) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = app();
        let request = axum::http::Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "guidon");
        assert_eq!(body["canvas_size"], 48);
        assert_eq!(body["bus_mode"], "memory");
    }

    #[tokio::test]
    async fn test_internal_token_required() {
        let (router, _) = app();
        let anonymous = axum::http::Request::builder()
            .uri("/api/stats/users")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&router, anonymous).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&router, authed_get("/api/stats/users")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_users"], 0);

        let (disabled, _) = app_with(None);
        let (status, _) = send(&disabled, authed_get("/api/stats/users")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unsigned_discord_request_is_unauthorized() {
        let (router, _) = app();
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/interactions")
            .body(Body::from(r#"{"type":1}"#))
            .unwrap();
        let (status, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_user_lifecycle() {
        let (router, _) = app();

        let (status, body) = send(
            &router,
            authed(
                Method::POST,
                "/api/users",
                json!({ "user_id": "42", "username": "zed" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "zed");

        let (_, body) = send(
            &router,
            authed(
                Method::POST,
                "/api/users/42/increment",
                json!({ "command": "draw", "interaction_id": "i-1" }),
            ),
        )
        .await;
        assert_eq!(body["user"]["total_draws"], 1);
        assert_eq!(body["counted"], true);

        let (_, body) = send(
            &router,
            authed(Method::POST, "/api/users/42/ban", json!({ "reason": "spam" })),
        )
        .await;
        assert_eq!(body["is_banned"], true);
        assert_eq!(body["ban_reason"], "spam");

        let (_, body) = send(
            &router,
            authed(Method::PUT, "/api/users/42/premium", json!({ "premium": true })),
        )
        .await;
        assert_eq!(body["is_premium"], true);

        let (_, body) = send(&router, authed_get("/api/rate-limit/42")).await;
        assert_eq!(body["is_premium"], true);
        let draw = body["limits"]
            .as_array()
            .unwrap()
            .iter()
            .find(|l| l["command"] == "draw")
            .unwrap();
        assert_eq!(draw["max"], 30);

        let (status, _) = send(&router, authed_get("/api/users/nobody")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rate_limit_check_and_reset() {
        let (router, _) = app();
        let check = || {
            authed(
                Method::POST,
                "/api/rate-limit/check",
                json!({ "user_id": "7", "command": "snapshot" }),
            )
        };
        for _ in 0..5 {
            let (_, body) = send(&router, check()).await;
            assert_eq!(body["allowed"], true);
        }
        let (_, body) = send(&router, check()).await;
        assert_eq!(body["allowed"], false);
        assert_eq!(body["remaining"], 0);

        let reset = axum::http::Request::builder()
            .method(Method::DELETE)
            .uri("/api/rate-limit/7?command=snapshot")
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&router, reset).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&router, check()).await;
        assert_eq!(body["allowed"], true);
    }

    #[tokio::test]
    async fn test_canvas_draw_and_read() {
        let (router, _) = app();
        let (status, body) = send(
            &router,
            authed(
                Method::POST,
                "/canvas/draw",
                json!({ "x": 4, "y": 5, "color": "#ff0000", "user_id": "1", "username": "a" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["changed"], true);

        let (_, body) = send(&router, authed_get("/canvas/pixel/4/5")).await;
        assert_eq!(body["color"], "#FF0000");

        let (_, body) = send(&router, authed_get("/canvas/state")).await;
        assert_eq!(body["pixels"][5][4], "#FF0000");

        let (_, body) = send(&router, authed_get("/canvas/stats")).await;
        assert_eq!(body["total_pixels"], 1);

        let (status, _) = send(
            &router,
            authed(
                Method::POST,
                "/canvas/draw",
                json!({ "x": 48, "y": 0, "color": "#ff0000", "user_id": "1", "username": "a" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_canvas_snapshot_without_body() {
        let (router, _) = app();
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/canvas/snapshot")
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        let id = body["snapshot_id"].as_str().unwrap();
        assert!(id.ends_with("_system"));

        let (status, body) = send(&router, authed_get(&format!("/canvas/snapshots/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["snapshot_id"], id);
    }

    #[tokio::test]
    async fn test_reply_lands_in_poll_slot_once() {
        let (router, _) = app();
        let poll = || {
            axum::http::Request::builder()
                .uri("/response/web-token")
                .body(Body::empty())
                .unwrap()
        };

        let (status, body) = send(&router, poll()).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "pending");

        let reply = Reply::info("Done", "all good");
        let (status, body) = send(
            &router,
            authed(
                Method::POST,
                "/reply",
                json!({ "token": "web-token", "response": reply }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delivered"], true);

        let (status, body) = send(&router, poll()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["message"], "all good");

        let (status, _) = send(&router, poll()).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_malformed_push_is_acked() {
        let (router, _) = app();
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/pubsub/push")
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .body(Body::from("not json"))
            .unwrap();
        let (status, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_artifacts_disabled_is_not_found() {
        let (router, _) = app();
        let request = axum::http::Request::builder()
            .uri("/snapshots/snapshot_1_system")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
