//! The message placed on the bus between the gateway and the processors.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;
use crate::interaction::{Interaction, ReplyChannel};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    Discord,
    Web,
}

/// Where a remote processor posts its finished reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyTarget {
    /// Gateway relay endpoint, e.g. `https://gw.example/reply`.
    pub callback_url: String,
}

/// An interaction plus everything a processor needs to answer it.
///
/// A processor never calls back into the gateway to look anything up: the
/// caller identity lives in the interaction, the reply channel credentials
/// live in `interaction.reply_channel`, and the relay endpoint lives here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub interaction: Interaction,
    pub interaction_type: InteractionType,
    pub reply_target: ReplyTarget,
    pub correlation_id: String,
}

impl Envelope {
    pub fn new(interaction: Interaction, callback_url: impl Into<String>) -> Self {
        let interaction_type = match interaction.reply_channel {
            ReplyChannel::Webhook { .. } => InteractionType::Discord,
            ReplyChannel::PollSlot { .. } => InteractionType::Web,
        };
        let correlation_id = interaction.correlation_id.clone();
        Self {
            interaction,
            interaction_type,
            reply_target: ReplyTarget {
                callback_url: callback_url.into(),
            },
            correlation_id,
        }
    }

    pub fn command(&self) -> &str {
        &self.interaction.command_name
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode the base64 `data` field of a push delivery.
    pub fn decode_base64(data: &str) -> Result<Self, EnvelopeError> {
        let bytes = BASE64.decode(data.trim())?;
        Self::decode(&bytes)
    }

    pub fn encode_base64(&self) -> Result<String, EnvelopeError> {
        Ok(BASE64.encode(self.encode()?))
    }
}
