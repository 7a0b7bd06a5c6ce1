//! Per-user real-time delivery.
//!
//! A [`RealtimeChannel`] publishes serialized notifications to whoever is
//! currently connected as a user, and keeps a per-user pending list for
//! messages that found no subscriber. The list is drained when the user
//! reconnects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use habitgraph_common::AppResult;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Publish to the user's live subscribers. Returns how many received it.
    async fn publish(&self, user_id: &str, payload: &str) -> AppResult<usize>;

    /// Park a message until the user reconnects or `ttl` passes.
    async fn push_pending(&self, user_id: &str, payload: &str, ttl: Duration) -> AppResult<()>;

    /// Remove and return the user's pending messages, oldest first.
    async fn take_pending(&self, user_id: &str) -> AppResult<Vec<String>>;
}

/// Type alias for a shared real-time channel.
pub type RealtimeChannelService = Arc<dyn RealtimeChannel>;

struct PendingList {
    messages: Vec<String>,
    expires_at: Instant,
}

/// Process-local real-time channel.
///
/// Used when no Redis is configured, and in tests. Like a Redis list with
/// `EXPIRE`, the pending list expires as a whole and each push extends it.
#[derive(Clone)]
pub struct LocalRealtimeChannel {
    subscribers: Arc<RwLock<HashMap<String, broadcast::Sender<String>>>>,
    pending: Arc<Mutex<HashMap<String, PendingList>>>,
    capacity: usize,
}

impl LocalRealtimeChannel {
    /// Create a channel whose per-user streams buffer up to `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a user's stream.
    pub async fn subscribe(&self, user_id: &str) -> broadcast::Receiver<String> {
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Users with a live stream entry.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Users with a pending list, expired or not.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Drop streams nobody listens to and expired pending lists.
    ///
    /// Returns how many entries were removed.
    pub async fn sweep(&self) -> usize {
        let streams = {
            let mut subscribers = self.subscribers.write().await;
            let before = subscribers.len();
            subscribers.retain(|_, sender| sender.receiver_count() > 0);
            before - subscribers.len()
        };

        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|_, list| list.expires_at > now);

        streams + before - pending.len()
    }

    /// Sweep every `period` until `shutdown` fires.
    pub fn spawn_sweeper(&self, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let channel = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let removed = channel.sweep().await;
                if removed > 0 {
                    debug!(removed, "Swept idle real-time state");
                }
            }
        })
    }

    async fn drop_stream_if_idle(&self, user_id: &str) {
        let mut subscribers = self.subscribers.write().await;
        if subscribers
            .get(user_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            subscribers.remove(user_id);
        }
    }
}

impl Default for LocalRealtimeChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl RealtimeChannel for LocalRealtimeChannel {
    async fn publish(&self, user_id: &str, payload: &str) -> AppResult<usize> {
        let sent = {
            let subscribers = self.subscribers.read().await;
            let Some(sender) = subscribers.get(user_id) else {
                return Ok(0);
            };
            // Fails only when every receiver has been dropped.
            sender.send(payload.to_string()).unwrap_or(0)
        };

        if sent == 0 {
            self.drop_stream_if_idle(user_id).await;
        }
        Ok(sent)
    }

    async fn push_pending(&self, user_id: &str, payload: &str, ttl: Duration) -> AppResult<()> {
        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        let list = pending
            .entry(user_id.to_string())
            .or_insert_with(|| PendingList {
                messages: Vec::new(),
                expires_at: now,
            });

        if list.expires_at <= now {
            list.messages.clear();
        }
        list.messages.push(payload.to_string());
        list.expires_at = now + ttl;
        Ok(())
    }

    async fn take_pending(&self, user_id: &str) -> AppResult<Vec<String>> {
        let mut pending = self.pending.lock().await;
        Ok(match pending.remove(user_id) {
            Some(list) if list.expires_at > Instant::now() => list.messages,
            _ => Vec::new(),
        })
    }
}
