//! Edge gateway: the synchronous half of every interaction.
//!
//! Discord gives us three seconds. In that time the gateway verifies the
//! request, answers trivial commands inline, runs the cheap admission checks
//! (registration, ban, rate window) and hands everything else to the bus,
//! replying with a deferred ack. The real answer comes back later through
//! the reply relay.
//!
//! Admission checks are advisory. If the directory or the limiter is slow or
//! down, the command is let through and the processor re-checks what
//! matters.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use guidon_shared::constants::{is_metered, is_registration_exempt};
use guidon_shared::envelope::Envelope;
use guidon_shared::interaction::{Interaction, InteractionKind, WebInteractionRequest};
use guidon_shared::reply::{self, Reply};
use guidon_shared::router::topic_for;
use guidon_shared::signature::verify_request;

use crate::bus::Publisher;
use crate::directory::Directory;
use crate::error::ServerError;
use crate::processor::fast_path;
use crate::rate_limit::RateLimiter;
use crate::relay::{RelayError, RelayRequest, ReplyRelay};
use crate::session::{SessionError, SessionVerifier};

/// Why a command was answered without being enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Invalid,
    Forbidden,
    RateLimited,
    Unavailable,
}

impl Rejection {
    fn web_status(self) -> StatusCode {
        match self {
            Rejection::Invalid => StatusCode::BAD_REQUEST,
            Rejection::Forbidden => StatusCode::FORBIDDEN,
            Rejection::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Rejection::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug)]
pub enum Admission {
    /// Answered inline.
    FastPath(Reply),
    /// Refused inline, never enqueued.
    Rejected(Reply, Rejection),
    /// On the bus; the reply will arrive through the relay.
    Deferred,
}

#[derive(Clone)]
pub struct GatewaySettings {
    pub public_key: Option<[u8; 32]>,
    /// Where remote processors post finished replies.
    pub callback_url: String,
    pub check_timeout: Duration,
    pub publish_timeout: Duration,
    /// Configured canvas edge, quoted by the inline greeting.
    pub canvas_size: u32,
}

#[derive(Clone)]
pub struct Gateway {
    settings: GatewaySettings,
    directory: Directory,
    rate_limiter: RateLimiter,
    publisher: Arc<dyn Publisher>,
    sessions: Option<Arc<dyn SessionVerifier>>,
    relay: ReplyRelay,
}

impl Gateway {
    pub fn new(
        settings: GatewaySettings,
        directory: Directory,
        rate_limiter: RateLimiter,
        publisher: Arc<dyn Publisher>,
        sessions: Option<Arc<dyn SessionVerifier>>,
        relay: ReplyRelay,
    ) -> Self {
        Self {
            settings,
            directory,
            rate_limiter,
            publisher,
            sessions,
            relay,
        }
    }

    pub fn relay(&self) -> &ReplyRelay {
        &self.relay
    }

    // -----------------------------------------------------------------------
    // Discord
    // -----------------------------------------------------------------------

    /// Handle a signed Discord webhook. The returned JSON goes out with 200.
    pub async fn handle_discord(
        &self,
        signature: Option<&str>,
        timestamp: Option<&str>,
        body: &[u8],
        correlation_id: &str,
    ) -> Result<Value, ServerError> {
        let Some(ref key) = self.settings.public_key else {
            warn!(correlation_id, "Discord public key not configured, refusing request");
            return Err(ServerError::Unauthorized("invalid request signature".into()));
        };
        verify_request(key, signature, timestamp, body).map_err(|e| {
            debug!(correlation_id, error = %e, "Signature verification failed");
            ServerError::Unauthorized("invalid request signature".into())
        })?;

        let interaction = Interaction::from_discord(body, correlation_id).map_err(|e| {
            debug!(correlation_id, error = %e, "Malformed interaction");
            ServerError::BadRequest(e.to_string())
        })?;

        match interaction.kind {
            InteractionKind::Ping => {
                debug!(correlation_id, "Ping acknowledged");
                Ok(reply::pong())
            }
            InteractionKind::Unknown(kind) => Err(ServerError::BadRequest(format!(
                "unsupported interaction type {kind}"
            ))),
            InteractionKind::Command => Ok(match self.admit(interaction).await {
                Admission::FastPath(reply) | Admission::Rejected(reply, _) => reply.to_discord(),
                Admission::Deferred => reply::deferred_ack(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Web
    // -----------------------------------------------------------------------

    /// Handle a web-client command authenticated by a session bearer.
    pub async fn handle_web(
        &self,
        session: Option<&str>,
        body: &[u8],
        correlation_id: &str,
    ) -> Result<(StatusCode, Value), ServerError> {
        let Some(ref sessions) = self.sessions else {
            return Err(ServerError::Unavailable("web sessions are not configured".into()));
        };
        let session = session
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ServerError::Unauthorized("missing session token".into()))?;

        let caller = match timeout(self.settings.check_timeout, sessions.verify(session)).await {
            Ok(Ok(caller)) => caller,
            Ok(Err(SessionError::Invalid)) => {
                return Err(ServerError::Unauthorized("invalid or expired session".into()))
            }
            Ok(Err(SessionError::Unreachable(e))) => {
                warn!(correlation_id, error = %e, "Auth service unreachable");
                return Err(ServerError::Unavailable("authentication unavailable".into()));
            }
            Err(_) => {
                warn!(correlation_id, "Auth service timed out");
                return Err(ServerError::Unavailable("authentication unavailable".into()));
            }
        };

        let request: WebInteractionRequest = serde_json::from_slice(body)
            .map_err(|e| ServerError::BadRequest(format!("invalid interaction body: {e}")))?;
        let token = request
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let interaction = Interaction::from_web(request, caller, token.clone(), correlation_id);
        if interaction.command_name.is_empty() {
            return Err(ServerError::BadRequest("command is required".into()));
        }
        let command = interaction.command_name.clone();

        Ok(match self.admit(interaction).await {
            Admission::FastPath(reply) => (StatusCode::OK, reply.to_web()),
            Admission::Rejected(reply, why) => (why.web_status(), reply.to_web()),
            Admission::Deferred => (
                StatusCode::ACCEPTED,
                json!({
                    "status": "processing",
                    "message": "Command is being processed",
                    "command": command,
                    "token": token,
                }),
            ),
        })
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    pub async fn admit(&self, interaction: Interaction) -> Admission {
        if let Some(reply) = fast_path(&interaction, self.settings.canvas_size) {
            debug!(
                correlation_id = %interaction.correlation_id,
                command = %interaction.command_name,
                "Answered on the fast path"
            );
            return Admission::FastPath(reply);
        }

        let command = interaction.command_name.clone();
        let correlation_id = interaction.correlation_id.clone();
        let Some(user_id) = interaction.caller_id().map(|id| id.to_string()) else {
            return Admission::Rejected(
                Reply::error("Invalid Interaction", "Could not identify user."),
                Rejection::Invalid,
            );
        };

        let mut premium = false;
        match timeout(self.settings.check_timeout, self.directory.get(&user_id)).await {
            Ok(Ok(Some(user))) => {
                if user.is_banned {
                    info!(%correlation_id, %command, %user_id, "Rejected banned user");
                    return Admission::Rejected(
                        reply::banned(user.ban_reason.as_deref()),
                        Rejection::Forbidden,
                    );
                }
                premium = user.is_premium;
            }
            Ok(Ok(None)) if !is_registration_exempt(&command) => {
                debug!(%correlation_id, %command, %user_id, "Unregistered caller");
                return Admission::Rejected(reply::registration_required(), Rejection::Forbidden);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                warn!(%correlation_id, %command, %user_id, error = %e, "User lookup failed, allowing");
            }
            Err(_) => {
                warn!(%correlation_id, %command, %user_id, "User lookup timed out, allowing");
            }
        }

        if is_metered(&command) {
            let peek = self.rate_limiter.get_info(&user_id, &command, premium);
            match timeout(self.settings.check_timeout, peek).await {
                Ok(Ok(decision)) if !decision.allowed => {
                    info!(
                        %correlation_id,
                        %command,
                        %user_id,
                        reset_in = decision.reset_in,
                        "Rate limited at the edge"
                    );
                    return Admission::Rejected(
                        reply::rate_limited(&command, decision.max, decision.reset_in),
                        Rejection::RateLimited,
                    );
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!(%correlation_id, %command, %user_id, error = %e, "Rate check failed, allowing");
                }
                Err(_) => {
                    warn!(%correlation_id, %command, %user_id, "Rate check timed out, allowing");
                }
            }
        }

        let topic = topic_for(&command);
        let envelope = Envelope::new(interaction, self.settings.callback_url.clone());
        match timeout(
            self.settings.publish_timeout,
            self.publisher.publish(topic, &envelope),
        )
        .await
        {
            Ok(Ok(())) => {
                info!(%correlation_id, %command, %user_id, %topic, "Interaction deferred");
                Admission::Deferred
            }
            Ok(Err(e)) => {
                warn!(%correlation_id, %command, %user_id, error = %e, "Publish failed");
                Admission::Rejected(reply::temporarily_unavailable(), Rejection::Unavailable)
            }
            Err(_) => {
                warn!(%correlation_id, %command, %user_id, "Publish timed out");
                Admission::Rejected(reply::temporarily_unavailable(), Rejection::Unavailable)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reply relay
    // -----------------------------------------------------------------------

    /// Forward a processor's reply to the original caller. At most once.
    pub async fn receive_processor_reply(&self, request: RelayRequest) -> Result<(), RelayError> {
        let (channel, reply) = request.into_parts();
        self.relay.deliver(&channel, &reply).await
    }
}
