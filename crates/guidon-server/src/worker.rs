//! Bus consumers: decode an envelope, run the processor, ship the reply.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use guidon_shared::envelope::Envelope;
use guidon_shared::router::Topic;

use crate::processor::Processor;
use crate::relay::ReplySink;

/// Run one delivery end to end. Never fails: a bad payload is logged and
/// dropped so the transport does not redeliver it forever.
pub async fn process_delivery(processor: &Processor, sink: &dyn ReplySink, envelope: Envelope) {
    let correlation_id = envelope.correlation_id.clone();
    let command = envelope.command().to_string();

    let reply = processor.handle(&envelope).await;

    match sink.send(&envelope, reply).await {
        Ok(()) => debug!(%correlation_id, %command, "Reply relayed"),
        Err(e) => warn!(%correlation_id, %command, error = %e, "Reply relay failed"),
    }
}

/// Spawn one consumer per in-process lane.
pub fn spawn_workers(
    receivers: HashMap<Topic, mpsc::Receiver<Vec<u8>>>,
    processor: Processor,
    sink: Arc<dyn ReplySink>,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .map(|(topic, mut rx)| {
            let processor = processor.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                info!(%topic, "Worker started");
                while let Some(payload) = rx.recv().await {
                    match Envelope::decode(&payload) {
                        Ok(envelope) => process_delivery(&processor, sink.as_ref(), envelope).await,
                        Err(e) => warn!(%topic, error = %e, "Dropping undecodable envelope"),
                    }
                }
                info!(%topic, "Worker stopped");
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Push deliveries
// ---------------------------------------------------------------------------

/// `POST /pubsub/push` body.
#[derive(Debug, Deserialize)]
pub struct PushDelivery {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PushMessage {
    pub data: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default, rename = "messageId", alias = "message_id")]
    pub message_id: Option<String>,
}

pub async fn handle_push(processor: &Processor, sink: &dyn ReplySink, delivery: PushDelivery) {
    let message_id = delivery.message.message_id.as_deref().unwrap_or("-");
    match Envelope::decode_base64(&delivery.message.data) {
        Ok(envelope) => {
            debug!(
                message_id,
                subscription = delivery.subscription.as_deref().unwrap_or("-"),
                correlation_id = %envelope.correlation_id,
                "Push delivery received"
            );
            process_delivery(processor, sink, envelope).await;
        }
        Err(e) => warn!(
            message_id,
            correlation_id = delivery.message.attributes.get("correlation_id").map(String::as_str).unwrap_or("-"),
            error = %e,
            "Dropping undecodable push delivery"
        ),
    }
}
