//! Redis-backed real-time channel.
//!
//! Notifications are published on one Redis channel per user. Each replica
//! subscribes to the channels of users connected to it and forwards incoming
//! messages to its local per-user streams. Messages that reached nobody are
//! parked in a per-user Redis list until the user reconnects.

#![allow(missing_docs)]

use std::time::Duration;

use async_trait::async_trait;
use fred::clients::{Client, SubscriberClient};
use fred::error::Error as RedisError;
use fred::interfaces::{ClientLike, EventInterface, KeysInterface, ListInterface, PubsubInterface};
use fred::types::config::Config as RedisConfig;
use habitgraph_common::{AppError, AppResult};
use habitgraph_core::{LocalRealtimeChannel, RealtimeChannel};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Key segments under the configured prefix.
pub mod channels {
    /// Per-user notification channel: `{prefix}:user:{id}`.
    pub const USER_SEGMENT: &str = "user";
    /// Per-user pending list: `{prefix}:pending:{id}`.
    pub const PENDING_SEGMENT: &str = "pending";
}

/// Messages popped per `LPOP` while draining a pending list.
const DRAIN_BATCH: usize = 100;

fn redis_err(e: &RedisError) -> AppError {
    AppError::Redis(e.to_string())
}

/// Real-time channel over Redis pub/sub.
#[derive(Clone)]
pub struct RedisRealtimeChannel {
    publisher: Client,
    subscriber: SubscriberClient,
    local: LocalRealtimeChannel,
    prefix: String,
}

impl RedisRealtimeChannel {
    /// Connect the publisher and subscriber clients.
    pub async fn new(redis_url: &str, prefix: &str) -> Result<Self, RedisError> {
        let channel = Self::from_config(RedisConfig::from_url(redis_url)?, prefix);
        channel.publisher.init().await?;
        channel.subscriber.init().await?;

        info!("Redis real-time channel initialized");
        Ok(channel)
    }

    /// Build the clients without connecting them.
    #[must_use]
    pub fn from_config(config: RedisConfig, prefix: &str) -> Self {
        Self {
            publisher: Client::new(config.clone(), None, None, None),
            subscriber: SubscriberClient::new(config, None, None, None),
            local: LocalRealtimeChannel::default(),
            prefix: prefix.to_string(),
        }
    }

    fn user_channel(&self, user_id: &str) -> String {
        format!("{}:{}:{user_id}", self.prefix, channels::USER_SEGMENT)
    }

    fn pending_key(&self, user_id: &str) -> String {
        format!("{}:{}:{user_id}", self.prefix, channels::PENDING_SEGMENT)
    }

    fn user_from_channel<'a>(&self, channel: &'a str) -> Option<&'a str> {
        channel
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(':')?
            .strip_prefix(channels::USER_SEGMENT)?
            .strip_prefix(':')
    }

    /// Local per-user streams fed by the forwarder.
    #[must_use]
    pub const fn local(&self) -> &LocalRealtimeChannel {
        &self.local
    }

    /// Forward messages from Redis to local subscribers until `shutdown` fires.
    ///
    /// `PUBLISH` counts subscribed replicas, not connections. A message that
    /// reaches a replica after its user disconnected is parked for
    /// `pending_ttl` instead.
    pub fn start(&self, pending_ttl: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        let mut message_stream = self.subscriber.message_rx();

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    () = shutdown.cancelled() => break,
                    message = message_stream.recv() => message,
                };

                match message {
                    Ok(message) => {
                        let Some(user_id) = this.user_from_channel(&message.channel) else {
                            continue;
                        };
                        let Some(payload) = message.value.as_string() else {
                            warn!(channel = %message.channel, "Ignoring non-text Pub/Sub message");
                            continue;
                        };
                        forward(&this.local, &this, user_id, &payload, pending_ttl).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Pub/Sub forwarder lagged by {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            info!("Pub/Sub message stream ended");
        })
    }

    /// Start receiving a user's messages on this replica.
    pub async fn subscribe_user(
        &self,
        user_id: &str,
    ) -> Result<broadcast::Receiver<String>, RedisError> {
        let receiver = self.local.subscribe(user_id).await;
        self.subscriber.subscribe(self.user_channel(user_id)).await?;
        debug!(user_id, "Subscribed to user channel");
        Ok(receiver)
    }

    /// Stop receiving a user's messages on this replica.
    pub async fn unsubscribe_user(&self, user_id: &str) -> Result<(), RedisError> {
        self.subscriber
            .unsubscribe(self.user_channel(user_id))
            .await?;
        debug!(user_id, "Unsubscribed from user channel");
        Ok(())
    }

    /// Shutdown both clients.
    pub async fn shutdown(&self) -> Result<(), RedisError> {
        self.subscriber.quit().await?;
        self.publisher.quit().await?;
        info!("Redis real-time channel shutdown");
        Ok(())
    }
}

/// Hand a forwarded message to local receivers, or park it in `pending`.
///
/// Returns whether a local receiver got it.
async fn forward(
    local: &LocalRealtimeChannel,
    pending: &dyn RealtimeChannel,
    user_id: &str,
    payload: &str,
    pending_ttl: Duration,
) -> bool {
    match local.publish(user_id, payload).await {
        Ok(0) => {}
        Ok(_) => return true,
        Err(e) => {
            warn!(error = %e, user_id = %user_id, "Failed to forward Pub/Sub message");
        }
    }

    debug!(user_id, "No local receiver for forwarded message, parking it");
    if let Err(e) = pending.push_pending(user_id, payload, pending_ttl).await {
        warn!(error = %e, user_id = %user_id, "Failed to park forwarded message");
    }
    false
}

#[async_trait]
impl RealtimeChannel for RedisRealtimeChannel {
    async fn publish(&self, user_id: &str, payload: &str) -> AppResult<usize> {
        let receivers: i64 = self
            .publisher
            .publish(self.user_channel(user_id), payload)
            .await
            .map_err(|e| redis_err(&e))?;
        Ok(usize::try_from(receivers).unwrap_or(0))
    }

    async fn push_pending(&self, user_id: &str, payload: &str, ttl: Duration) -> AppResult<()> {
        let key = self.pending_key(user_id);
        let _: i64 = self
            .publisher
            .rpush(key.as_str(), payload)
            .await
            .map_err(|e| redis_err(&e))?;
        let _: () = self
            .publisher
            .expire(key.as_str(), ttl.as_secs().max(1) as i64, None)
            .await
            .map_err(|e| redis_err(&e))?;
        Ok(())
    }

    async fn take_pending(&self, user_id: &str) -> AppResult<Vec<String>> {
        let key = self.pending_key(user_id);
        let mut messages = Vec::new();

        loop {
            let batch: Option<Vec<String>> = self
                .publisher
                .lpop(key.as_str(), Some(DRAIN_BATCH))
                .await
                .map_err(|e| redis_err(&e))?;

            let Some(batch) = batch else {
                break;
            };
            let done = batch.len() < DRAIN_BATCH;
            messages.extend(batch);
            if done {
                break;
            }
        }

        Ok(messages)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn channel() -> RedisRealtimeChannel {
        RedisRealtimeChannel::from_config(RedisConfig::default(), "habitgraph")
    }

    #[test]
    fn test_key_layout() {
        let channel = channel();
        assert_eq!(channel.user_channel("u1"), "habitgraph:user:u1");
        assert_eq!(channel.pending_key("u1"), "habitgraph:pending:u1");
    }

    #[test]
    fn test_user_from_channel() {
        let channel = channel();
        assert_eq!(channel.user_from_channel("habitgraph:user:u1"), Some("u1"));
        assert_eq!(channel.user_from_channel("habitgraph:pending:u1"), None);
        assert_eq!(channel.user_from_channel("other:user:u1"), None);
    }

    #[tokio::test]
    async fn test_forward_reaches_connected_user() {
        let local = LocalRealtimeChannel::default();
        let pending = LocalRealtimeChannel::default();
        let mut rx = local.subscribe("u1").await;

        assert!(forward(&local, &pending, "u1", "hello", Duration::from_secs(60)).await);
        assert_eq!(rx.recv().await.unwrap(), "hello");
        assert!(pending.take_pending("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forward_parks_message_after_disconnect() {
        let local = LocalRealtimeChannel::default();
        let pending = LocalRealtimeChannel::default();
        // Still subscribed on Redis, but the connection is gone.
        drop(local.subscribe("u1").await);

        assert!(!forward(&local, &pending, "u1", "missed", Duration::from_secs(60)).await);
        assert_eq!(pending.take_pending("u1").await.unwrap(), vec!["missed"]);
    }
}
