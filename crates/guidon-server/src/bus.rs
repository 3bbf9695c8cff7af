//! Message bus between the gateway and the command processors.
//!
//! Two transports sit behind [`Publisher`]: bounded in-process queues with
//! local workers, and a Pub/Sub-style REST topic with push delivery back to
//! `/pubsub/push`. Either way the payload is the JSON-encoded envelope.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use guidon_shared::envelope::Envelope;
use guidon_shared::error::EnvelopeError;
use guidon_shared::router::Topic;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Envelope encoding failed: {0}")]
    Encode(#[from] EnvelopeError),

    #[error("No consumer for topic {0}")]
    Closed(Topic),

    #[error("Publish request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Publish rejected with status {0}")]
    Rejected(reqwest::StatusCode),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: Topic, envelope: &Envelope) -> Result<(), BusError>;
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

/// One bounded queue per topic. A full queue applies backpressure to the
/// publisher, which the gateway bounds with its publish timeout.
#[derive(Clone)]
pub struct InProcessBus {
    senders: HashMap<Topic, mpsc::Sender<Vec<u8>>>,
}

impl InProcessBus {
    /// Build the bus and hand back the receiving end of every lane.
    pub fn new(depth: usize) -> (Self, HashMap<Topic, mpsc::Receiver<Vec<u8>>>) {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for topic in Topic::ALL {
            let (tx, rx) = mpsc::channel(depth.max(1));
            senders.insert(topic, tx);
            receivers.insert(topic, rx);
        }
        (Self { senders }, receivers)
    }
}

#[async_trait]
impl Publisher for InProcessBus {
    async fn publish(&self, topic: Topic, envelope: &Envelope) -> Result<(), BusError> {
        let payload = envelope.encode()?;
        let sender = self.senders.get(&topic).ok_or(BusError::Closed(topic))?;
        sender
            .send(payload)
            .await
            .map_err(|_| BusError::Closed(topic))?;
        debug!(%topic, correlation_id = %envelope.correlation_id, "Envelope queued");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pub/Sub REST
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct PublishRequest {
    messages: Vec<PublishMessage>,
}

#[derive(Serialize)]
struct PublishMessage {
    data: String,
    attributes: HashMap<&'static str, String>,
}

pub struct PubSubPublisher {
    client: reqwest::Client,
    endpoint: String,
    project: String,
    token: Option<String>,
    prefix: String,
}

impl PubSubPublisher {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        project: &str,
        token: Option<String>,
        prefix: &str,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            project: project.to_string(),
            token,
            prefix: prefix.to_string(),
        }
    }

    pub fn topic_url(&self, topic: Topic) -> String {
        format!(
            "{}/v1/projects/{}/topics/{}:publish",
            self.endpoint,
            self.project,
            topic.name(&self.prefix)
        )
    }
}

#[async_trait]
impl Publisher for PubSubPublisher {
    async fn publish(&self, topic: Topic, envelope: &Envelope) -> Result<(), BusError> {
        let mut attributes = HashMap::new();
        attributes.insert("correlation_id", envelope.correlation_id.clone());
        attributes.insert("command", envelope.command().to_string());

        let body = PublishRequest {
            messages: vec![PublishMessage {
                data: BASE64.encode(envelope.encode()?),
                attributes,
            }],
        };

        let mut request = self.client.post(self.topic_url(topic)).json(&body);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(BusError::Rejected(resp.status()));
        }
        debug!(%topic, correlation_id = %envelope.correlation_id, "Envelope published");
        Ok(())
    }
}
