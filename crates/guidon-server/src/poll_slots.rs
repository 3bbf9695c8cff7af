//! Parking lot for web-client replies.
//!
//! A web caller gets a poll token back from `POST /web/interactions` and then
//! polls `GET /response/:token`. The relay stores the finished reply here and
//! the first successful poll takes it out. Slots live in process memory only,
//! so every gateway instance behind a load balancer has its own set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use guidon_shared::reply::Reply;

#[derive(Debug)]
struct Slot {
    reply: Reply,
    stored_at: Instant,
}

#[derive(Clone)]
pub struct PollSlots {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    ttl: Duration,
    capacity: usize,
}

impl PollSlots {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Store a reply, replacing any earlier one under the same token.
    /// When full, the oldest slot is dropped to make room.
    pub async fn put(&self, token: &str, reply: Reply) {
        let mut slots = self.slots.lock().await;
        if !slots.contains_key(token) && slots.len() >= self.capacity {
            let oldest = slots
                .iter()
                .min_by_key(|(_, slot)| slot.stored_at)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                slots.remove(&key);
                warn!(evicted = %key, "Poll slots full, evicted oldest reply");
            }
        }
        slots.insert(
            token.to_string(),
            Slot {
                reply,
                stored_at: Instant::now(),
            },
        );
        debug!(token, "Reply parked for polling");
    }

    /// Remove and return the reply for `token`. Expired replies are never
    /// handed out, even if the sweeper has not caught them yet.
    pub async fn take_once(&self, token: &str) -> Option<Reply> {
        let slot = self.slots.lock().await.remove(token)?;
        if slot.stored_at.elapsed() >= self.ttl {
            debug!(token, "Discarding expired reply");
            return None;
        }
        Some(slot.reply)
    }

    /// Drop every slot older than the TTL. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, slot| slot.stored_at.elapsed() < self.ttl);
        before - slots.len()
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Run [`sweep`](Self::sweep) every `every` until the handle is stopped.
    pub fn start_sweeper(&self, every: Duration) -> SweeperHandle {
        let slots = self.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = slots.sweep().await;
                        if removed > 0 {
                            debug!(removed, "Swept stale poll slots");
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }
            info!("Poll slot sweeper stopped");
        });

        info!(every_secs = every.as_secs(), ttl_secs = self.ttl.as_secs(), "Poll slot sweeper started");
        SweeperHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}

pub struct SweeperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Poll slot sweeper ended abnormally");
        }
    }
}
