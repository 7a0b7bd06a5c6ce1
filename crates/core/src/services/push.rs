//! Batched delivery of push messages to an external broker.
//!
//! Producers call [`PushGateway::enqueue`], which never blocks: a full queue
//! rejects the message. A single worker drains the queue into batches bounded
//! by count, serialized size and wait time, and hands each batch to a
//! [`PushBroker`]. A batch the broker rejects is dropped and logged.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use habitgraph_common::config::PushConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// A message bound for a user's devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub message_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub body: String,
    /// Key under which devices collapse repeated messages.
    pub dedupe_key: String,
    /// In-app path. Only relative paths are delivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deep_link: Option<String>,
    /// Optional extra data, dropped first when the message is too large.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub ttl_seconds: u32,
    pub created_at: DateTime<Utc>,
}

impl PushMessage {
    /// Serialized size in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map_or(usize::MAX, |bytes| bytes.len())
    }

    /// Strip an unsafe deep link, then shrink the message to `max_bytes` by
    /// dropping `data`. Fails if it is still too large.
    pub fn sanitize(mut self, max_bytes: usize) -> Result<Self, EnqueueError> {
        if let Some(link) = self.deep_link.as_deref()
            && !is_relative_link(link)
        {
            warn!(message_id = %self.message_id, link = %link, "Dropping non-relative deep link");
            self.deep_link = None;
        }

        if self.encoded_len() > max_bytes && self.data.take().is_some() {
            debug!(message_id = %self.message_id, "Stripped data from oversized push message");
        }

        let size = self.encoded_len();
        if size > max_bytes {
            return Err(EnqueueError::Invalid(format!(
                "message is {size} bytes, limit is {max_bytes}"
            )));
        }

        Ok(self)
    }
}

/// Whether `link` is an in-app path (no scheme, no host).
#[must_use]
pub fn is_relative_link(link: &str) -> bool {
    link.starts_with('/')
        && !link.starts_with("//")
        && !link.starts_with("/\\")
        && Url::parse(link).is_err()
}

/// Why a message was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("Push queue is full")]
    QueueFull,

    #[error("Push gateway is closed")]
    Closed,

    #[error("Invalid push message: {0}")]
    Invalid(String),
}

/// Broker failure.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker transport error: {0}")]
    Transport(String),

    #[error("Broker rejected batch with status {0}")]
    Rejected(u16),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// The external push broker.
#[async_trait]
pub trait PushBroker: Send + Sync {
    /// Cheap reachability check, run once when the gateway starts.
    async fn probe(&self) -> Result<(), BrokerError>;

    /// Deliver one batch.
    async fn send_batch(&self, batch: &[PushMessage]) -> Result<(), BrokerError>;

    /// Release broker resources.
    async fn close(&self);
}

/// Type alias for a shared broker.
pub type SharedPushBroker = Arc<dyn PushBroker>;

/// Broker that accepts and discards everything.
pub struct NoopPushBroker;

#[async_trait]
impl PushBroker for NoopPushBroker {
    async fn probe(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn send_batch(&self, batch: &[PushMessage]) -> Result<(), BrokerError> {
        debug!(count = batch.len(), "Discarding push batch (no broker configured)");
        Ok(())
    }

    async fn close(&self) {}
}

/// Gateway limits.
#[derive(Debug, Clone)]
pub struct PushGatewayConfig {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub max_wait: Duration,
    pub max_message_bytes: usize,
    pub max_batch_bytes: usize,
    pub default_ttl_secs: u32,
}

impl From<&PushConfig> for PushGatewayConfig {
    fn from(config: &PushConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            batch_size: config.batch_size,
            max_wait: config.max_wait(),
            max_message_bytes: config.max_message_bytes,
            max_batch_bytes: config.max_batch_bytes,
            default_ttl_secs: config.default_ttl_secs,
        }
    }
}

impl Default for PushGatewayConfig {
    fn default() -> Self {
        Self::from(&PushConfig::default())
    }
}

/// Snapshot of gateway counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushStats {
    pub enqueued: u64,
    pub rejected: u64,
    pub sent: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Handle to the push queue and its worker.
pub struct PushGateway {
    sender: mpsc::Sender<PushMessage>,
    config: PushGatewayConfig,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PushGateway {
    /// Start the worker. The broker is probed once before the first batch;
    /// a failed probe is logged and delivery is attempted anyway.
    #[must_use]
    pub fn start(
        broker: SharedPushBroker,
        config: PushGatewayConfig,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());

        let worker = BatchWorker {
            receiver,
            broker,
            config: config.clone(),
            counters: Arc::clone(&counters),
            batch: Vec::new(),
            batch_bytes: 0,
            deadline: None,
        };
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        Arc::new(Self {
            sender,
            config,
            counters,
            shutdown,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// TTL stamped on messages that do not set their own.
    #[must_use]
    pub const fn default_ttl_secs(&self) -> u32 {
        self.config.default_ttl_secs
    }

    /// Queue a message without waiting.
    pub fn enqueue(&self, message: PushMessage) -> Result<(), EnqueueError> {
        if self.shutdown.is_cancelled() {
            return Err(EnqueueError::Closed);
        }

        let message = match message.sanitize(self.config.max_message_bytes) {
            Ok(message) => message,
            Err(e) => {
                Counters::add(&self.counters.rejected, 1);
                return Err(e);
            }
        };

        match self.sender.try_send(message) {
            Ok(()) => {
                Counters::add(&self.counters.enqueued, 1);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                Counters::add(&self.counters.rejected, 1);
                Err(EnqueueError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    #[must_use]
    pub fn stats(&self) -> PushStats {
        PushStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            sent: self.counters.sent.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting messages, flush what is queued and close the broker.
    ///
    /// Idempotent; later calls return immediately.
    pub async fn close(&self) {
        self.shutdown.cancel();

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Push worker terminated abnormally");
        }
    }
}

struct BatchWorker {
    receiver: mpsc::Receiver<PushMessage>,
    broker: SharedPushBroker,
    config: PushGatewayConfig,
    counters: Arc<Counters>,
    batch: Vec<PushMessage>,
    batch_bytes: usize,
    deadline: Option<Instant>,
}

impl BatchWorker {
    async fn run(mut self, shutdown: CancellationToken) {
        if let Err(e) = self.broker.probe().await {
            warn!(error = %e, "Push broker probe failed");
        } else {
            info!("Push broker reachable");
        }

        loop {
            let deadline = self.deadline;
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush().await;
                }
                message = self.receiver.recv() => match message {
                    Some(message) => self.push(message).await,
                    None => break,
                },
            }
        }

        self.receiver.close();
        while let Ok(message) = self.receiver.try_recv() {
            self.push(message).await;
        }
        self.flush().await;

        self.broker.close().await;
        info!("Push worker stopped");
    }

    async fn push(&mut self, message: PushMessage) {
        let size = message.encoded_len();

        if !self.batch.is_empty() && self.batch_bytes.saturating_add(size) > self.config.max_batch_bytes {
            debug!(message_id = %message.message_id, size, "Message does not fit the open batch, sending alone");
            self.send(vec![message]).await;
            return;
        }

        self.batch.push(message);
        self.batch_bytes = self.batch_bytes.saturating_add(size);
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.config.max_wait);
        }

        if self.batch.len() >= self.config.batch_size {
            self.flush().await;
        }
    }

    async fn flush(&mut self) {
        self.deadline = None;
        self.batch_bytes = 0;
        if self.batch.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.batch);
        self.send(batch).await;
    }

    async fn send(&self, batch: Vec<PushMessage>) {
        let count = batch.len();
        match self.broker.send_batch(&batch).await {
            Ok(()) => {
                Counters::add(&self.counters.sent, count);
                debug!(count, "Sent push batch");
            }
            Err(e) => {
                Counters::add(&self.counters.dropped, count);
                warn!(error = %e, count, "Dropping push batch");
            }
        }
    }
}
