//! Follow counters.
//!
//! Counters are denormalized from the edge store and only eventually
//! consistent with it. Deltas are applied either inline or through a
//! broadcast channel drained by a background subscriber; `reconcile`
//! recomputes a user's counters from the edges and overwrites them.

use std::sync::Arc;

use async_trait::async_trait;
use habitgraph_common::AppResult;
use habitgraph_db::entities::FollowState;
use habitgraph_db::repositories::{FollowCounterRepository, FollowEdgeRepository};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::services::relationship_cache::RelationshipCache;

pub use habitgraph_db::repositories::CounterField;

/// A signed change to one counter of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDelta {
    pub user_id: String,
    pub field: CounterField,
    pub delta: i64,
}

impl CounterDelta {
    #[must_use]
    pub fn new(user_id: impl Into<String>, field: CounterField, delta: i64) -> Self {
        Self {
            user_id: user_id.into(),
            field,
            delta,
        }
    }
}

/// Counter values of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowCounts {
    pub followers: i64,
    pub following: i64,
    pub pending_requests: i64,
}

/// Applies a delta to storage and drops the cached counters.
#[derive(Clone)]
pub struct CounterApplier {
    counter_repo: FollowCounterRepository,
    cache: RelationshipCache,
}

impl CounterApplier {
    #[must_use]
    pub const fn new(counter_repo: FollowCounterRepository, cache: RelationshipCache) -> Self {
        Self {
            counter_repo,
            cache,
        }
    }

    pub async fn apply(&self, delta: &CounterDelta) -> AppResult<()> {
        self.counter_repo
            .apply_delta(&delta.user_id, delta.field, delta.delta)
            .await?;
        self.cache.invalidate_counters(&delta.user_id).await;
        Ok(())
    }
}

/// How counter deltas reach storage.
#[async_trait]
pub trait CounterUpdateStrategy: Send + Sync {
    /// Hand off a set of deltas.
    async fn publish(&self, deltas: Vec<CounterDelta>) -> AppResult<()>;
}

/// Applies every delta before returning.
#[derive(Clone)]
pub struct DirectCounterUpdates {
    applier: CounterApplier,
}

impl DirectCounterUpdates {
    #[must_use]
    pub const fn new(applier: CounterApplier) -> Self {
        Self { applier }
    }
}

#[async_trait]
impl CounterUpdateStrategy for DirectCounterUpdates {
    async fn publish(&self, deltas: Vec<CounterDelta>) -> AppResult<()> {
        for delta in &deltas {
            self.applier.apply(delta).await?;
        }
        Ok(())
    }
}

/// Publishes deltas on a broadcast channel for [`spawn_counter_subscriber`].
///
/// When nobody is subscribed the deltas are applied inline instead.
pub struct ChannelCounterUpdates {
    sender: broadcast::Sender<CounterDelta>,
    fallback: DirectCounterUpdates,
}

impl ChannelCounterUpdates {
    /// Create the strategy and the receiver its subscriber should drain.
    #[must_use]
    pub fn new(applier: CounterApplier, capacity: usize) -> (Self, broadcast::Receiver<CounterDelta>) {
        let (sender, receiver) = broadcast::channel(capacity);
        (
            Self {
                sender,
                fallback: DirectCounterUpdates::new(applier),
            },
            receiver,
        )
    }
}

#[async_trait]
impl CounterUpdateStrategy for ChannelCounterUpdates {
    async fn publish(&self, deltas: Vec<CounterDelta>) -> AppResult<()> {
        for delta in deltas {
            if let Err(broadcast::error::SendError(delta)) = self.sender.send(delta) {
                warn!(
                    user_id = %delta.user_id,
                    field = ?delta.field,
                    "Counter channel has no subscriber, applying delta inline"
                );
                self.fallback.publish(vec![delta]).await?;
            }
        }
        Ok(())
    }
}

/// Drain counter deltas until `shutdown` fires or the channel closes.
///
/// Deltas still buffered at shutdown are applied before the task exits.
pub fn spawn_counter_subscriber(
    mut receiver: broadcast::Receiver<CounterDelta>,
    applier: CounterApplier,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Counter subscriber started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                result = receiver.recv() => match result {
                    Ok(delta) => apply_logged(&applier, &delta).await,
                    Err(RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Counter subscriber lagged, counters need reconciliation");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        loop {
            match receiver.try_recv() {
                Ok(delta) => apply_logged(&applier, &delta).await,
                Err(TryRecvError::Lagged(n)) => {
                    warn!(skipped = n, "Counter subscriber lagged during drain");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        info!("Counter subscriber stopped");
    })
}

async fn apply_logged(applier: &CounterApplier, delta: &CounterDelta) {
    if let Err(e) = applier.apply(delta).await {
        warn!(error = %e, user_id = %delta.user_id, "Failed to apply counter delta");
    } else {
        debug!(user_id = %delta.user_id, field = ?delta.field, delta = delta.delta, "Applied counter delta");
    }
}

/// Reads, updates and repairs follow counters.
#[derive(Clone)]
pub struct CounterLedger {
    counter_repo: FollowCounterRepository,
    edge_repo: FollowEdgeRepository,
    cache: RelationshipCache,
    strategy: Arc<dyn CounterUpdateStrategy>,
}

impl CounterLedger {
    #[must_use]
    pub fn new(
        counter_repo: FollowCounterRepository,
        edge_repo: FollowEdgeRepository,
        cache: RelationshipCache,
        strategy: Arc<dyn CounterUpdateStrategy>,
    ) -> Self {
        Self {
            counter_repo,
            edge_repo,
            cache,
            strategy,
        }
    }

    /// A ledger that applies deltas inline.
    #[must_use]
    pub fn direct(
        counter_repo: FollowCounterRepository,
        edge_repo: FollowEdgeRepository,
        cache: RelationshipCache,
    ) -> Self {
        let applier = CounterApplier::new(counter_repo.clone(), cache.clone());
        Self::new(
            counter_repo,
            edge_repo,
            cache,
            Arc::new(DirectCounterUpdates::new(applier)),
        )
    }

    /// Apply one delta inline, bypassing the configured strategy.
    pub async fn apply_delta(&self, user_id: &str, field: CounterField, delta: i64) -> AppResult<()> {
        self.counter_repo.apply_delta(user_id, field, delta).await?;
        self.cache.invalidate_counters(user_id).await;
        Ok(())
    }

    /// Hand deltas to the configured strategy.
    ///
    /// The cached counters of every affected user are dropped before this
    /// returns, whether or not the deltas have reached storage yet.
    pub async fn publish(&self, deltas: Vec<CounterDelta>) -> AppResult<()> {
        let mut users: Vec<String> = deltas.iter().map(|d| d.user_id.clone()).collect();
        users.sort();
        users.dedup();

        self.strategy.publish(deltas).await?;

        for user_id in &users {
            self.cache.invalidate_counters(user_id).await;
        }
        Ok(())
    }

    /// Current counters of a user. Users without a row read as zero.
    pub async fn get(&self, user_id: &str) -> AppResult<FollowCounts> {
        if let Some(counts) = self.cache.get_counters(user_id).await {
            return Ok(counts);
        }

        let counts = self
            .counter_repo
            .find(user_id)
            .await?
            .map(|row| FollowCounts {
                followers: row.followers_count,
                following: row.following_count,
                pending_requests: row.pending_requests_count,
            })
            .unwrap_or_default();

        self.cache.put_counters(user_id, &counts).await;
        Ok(counts)
    }

    /// Recompute a user's counters from the edge store and overwrite them.
    pub async fn reconcile(&self, user_id: &str) -> AppResult<FollowCounts> {
        let followers = self
            .edge_repo
            .count_followers(user_id, FollowState::Active)
            .await?;
        let following = self
            .edge_repo
            .count_following(user_id, FollowState::Active)
            .await?;
        let pending = self
            .edge_repo
            .count_followers(user_id, FollowState::Pending)
            .await?;

        let counts = FollowCounts {
            followers: to_i64(followers),
            following: to_i64(following),
            pending_requests: to_i64(pending),
        };

        self.counter_repo
            .overwrite(user_id, counts.followers, counts.following, counts.pending_requests)
            .await?;
        self.cache.invalidate_counters(user_id).await;

        info!(
            user_id = %user_id,
            followers = counts.followers,
            following = counts.following,
            pending_requests = counts.pending_requests,
            "Reconciled follow counters"
        );

        Ok(counts)
    }
}

fn to_i64(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}
