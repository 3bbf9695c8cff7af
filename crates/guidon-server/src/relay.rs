//! Reply relay: gets a finished reply back to whoever issued the command.
//!
//! Delivery is at-most-once. A failed webhook edit is logged by the caller
//! and dropped; nobody is waiting on a retry once the caller's token expires.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use guidon_shared::envelope::Envelope;
use guidon_shared::interaction::ReplyChannel;
use guidon_shared::reply::Reply;

use crate::poll_slots::PollSlots;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Reply has no delivery token")]
    MissingToken,

    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook rejected the reply with status {0}")]
    Rejected(reqwest::StatusCode),
}

/// Body of `POST /reply`. A remote processor posts one of these per finished
/// interaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayRequest {
    #[serde(alias = "token")]
    pub interaction_token: String,
    /// Present for Discord callers, absent for web pollers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    pub response: Reply,
}

impl RelayRequest {
    pub fn new(channel: &ReplyChannel, response: Reply) -> Self {
        let (interaction_token, application_id) = match channel {
            ReplyChannel::Webhook {
                application_id,
                token,
            } => (token.clone(), Some(application_id.clone())),
            ReplyChannel::PollSlot { token } => (token.clone(), None),
        };
        Self {
            interaction_token,
            application_id,
            response,
        }
    }

    pub fn into_parts(self) -> (ReplyChannel, Reply) {
        let channel = match self.application_id {
            Some(application_id) if !application_id.is_empty() => ReplyChannel::Webhook {
                application_id,
                token: self.interaction_token,
            },
            _ => ReplyChannel::PollSlot {
                token: self.interaction_token,
            },
        };
        (channel, self.response)
    }
}

// ---------------------------------------------------------------------------
// Gateway-side relay
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ReplyRelay {
    client: reqwest::Client,
    api_base: String,
    slots: PollSlots,
}

impl ReplyRelay {
    pub fn new(client: reqwest::Client, api_base: &str, slots: PollSlots) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            slots,
        }
    }

    pub fn slots(&self) -> &PollSlots {
        &self.slots
    }

    pub async fn deliver(&self, channel: &ReplyChannel, reply: &Reply) -> Result<(), RelayError> {
        match channel {
            ReplyChannel::Webhook {
                application_id,
                token,
            } => {
                if token.is_empty() || application_id.is_empty() {
                    return Err(RelayError::MissingToken);
                }
                let url = format!(
                    "{}/webhooks/{}/{}/messages/@original",
                    self.api_base, application_id, token
                );
                let resp = self
                    .client
                    .patch(url)
                    .json(&reply.to_discord_message())
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    return Err(RelayError::Rejected(resp.status()));
                }
                debug!(application_id = %application_id, "Edited deferred message");
                Ok(())
            }
            ReplyChannel::PollSlot { token } => {
                if token.is_empty() {
                    return Err(RelayError::MissingToken);
                }
                self.slots.put(token, reply.clone()).await;
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Processor-side sinks
// ---------------------------------------------------------------------------

/// Where a processor hands its reply once it is done.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(&self, envelope: &Envelope, reply: Reply) -> Result<(), RelayError>;
}

/// Processor and gateway share a process: relay directly.
pub struct LocalReplySink {
    relay: ReplyRelay,
}

impl LocalReplySink {
    pub fn new(relay: ReplyRelay) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl ReplySink for LocalReplySink {
    async fn send(&self, envelope: &Envelope, reply: Reply) -> Result<(), RelayError> {
        self.relay
            .deliver(&envelope.interaction.reply_channel, &reply)
            .await
    }
}

/// Processor runs behind a push subscription: post the reply to the
/// gateway's `/reply` endpoint named in the envelope.
pub struct HttpReplySink {
    client: reqwest::Client,
    bearer: Option<Arc<str>>,
}

impl HttpReplySink {
    pub fn new(client: reqwest::Client, bearer: Option<&str>) -> Self {
        Self {
            client,
            bearer: bearer.map(Arc::from),
        }
    }
}

#[async_trait]
impl ReplySink for HttpReplySink {
    async fn send(&self, envelope: &Envelope, reply: Reply) -> Result<(), RelayError> {
        let body = RelayRequest::new(&envelope.interaction.reply_channel, reply);
        let mut request = self
            .client
            .post(&envelope.reply_target.callback_url)
            .json(&body);
        if let Some(ref bearer) = self.bearer {
            request = request.bearer_auth(bearer);
        }
        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(RelayError::Rejected(resp.status()));
        }
        Ok(())
    }
}
