//! Scheduled jobs for periodic maintenance tasks.
//!
//! Every replica runs the same loops. A job run is claimed per UTC date
//! through the [`JobClaimArbiter`], so a job executes at most once a day
//! across the cluster no matter how many replicas tick.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use habitgraph_common::AppResult;
use habitgraph_common::config::{GraphConfig, JobsConfig};
use habitgraph_core::{FollowingService, JobClaimArbiter, JobOutcome, NotificationDispatcher};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Scheduled job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduledJob {
    /// Delete removed follow edges past their retention.
    PurgeRemovedEdges,
    /// Delete notifications past their retention.
    NotificationCleanup,
}

impl ScheduledJob {
    /// Name recorded on the job claim.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PurgeRemovedEdges => "purge-removed-edges",
            Self::NotificationCleanup => "notification-cleanup",
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval for the removed-edge purge check (default: 1 hour).
    pub edge_purge_interval: Duration,
    /// Interval for the notification cleanup check (default: 1 hour).
    pub notification_cleanup_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            edge_purge_interval: Duration::from_secs(3600),
            notification_cleanup_interval: Duration::from_secs(3600),
        }
    }
}

impl From<&JobsConfig> for SchedulerConfig {
    fn from(config: &JobsConfig) -> Self {
        Self {
            edge_purge_interval: Duration::from_secs(config.edge_purge_interval_secs.max(1)),
            notification_cleanup_interval: Duration::from_secs(
                config.notification_cleanup_interval_secs.max(1),
            ),
        }
    }
}

/// Job executor trait for scheduled jobs.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    /// Execute the removed-edge purge.
    async fn purge_removed_edges(&self) -> AppResult<JobOutcome>;

    /// Execute the notification cleanup.
    async fn cleanup_notifications(&self) -> AppResult<JobOutcome>;
}

/// Runs each job through the claim arbiter, once per UTC date.
#[derive(Clone)]
pub struct ClaimedJobExecutor {
    following: FollowingService,
    notifications: NotificationDispatcher,
    arbiter: JobClaimArbiter,
    owner_id: String,
    edge_retention: chrono::Duration,
}

impl ClaimedJobExecutor {
    #[must_use]
    pub fn new(
        following: FollowingService,
        notifications: NotificationDispatcher,
        arbiter: JobClaimArbiter,
        owner_id: String,
        graph: &GraphConfig,
    ) -> Self {
        Self {
            following,
            notifications,
            arbiter,
            owner_id,
            edge_retention: chrono::Duration::days(i64::from(graph.removed_retention_days)),
        }
    }
}

#[async_trait::async_trait]
impl JobExecutor for ClaimedJobExecutor {
    async fn purge_removed_edges(&self) -> AppResult<JobOutcome> {
        self.arbiter
            .run_once(
                ScheduledJob::PurgeRemovedEdges.name(),
                Utc::now().date_naive(),
                &self.owner_id,
                || self.following.purge_removed(self.edge_retention),
            )
            .await
    }

    async fn cleanup_notifications(&self) -> AppResult<JobOutcome> {
        self.arbiter
            .run_once(
                ScheduledJob::NotificationCleanup.name(),
                Utc::now().date_naive(),
                &self.owner_id,
                || self.notifications.cleanup(),
            )
            .await
    }
}

/// Run the scheduler until `shutdown` fires.
///
/// Returns the handles of the spawned loops.
pub fn run_scheduler<E: JobExecutor + 'static>(
    config: &SchedulerConfig,
    executor: Arc<E>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    vec![
        spawn_job(
            ScheduledJob::PurgeRemovedEdges,
            config.edge_purge_interval,
            Arc::clone(&executor),
            shutdown.clone(),
        ),
        spawn_job(
            ScheduledJob::NotificationCleanup,
            config.notification_cleanup_interval,
            executor,
            shutdown,
        ),
    ]
}

fn spawn_job<E: JobExecutor + 'static>(
    job: ScheduledJob,
    period: Duration,
    executor: Arc<E>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let result = match job {
                ScheduledJob::PurgeRemovedEdges => executor.purge_removed_edges().await,
                ScheduledJob::NotificationCleanup => executor.cleanup_notifications().await,
            };

            match result {
                Ok(JobOutcome::Completed { items_processed }) => {
                    if items_processed > 0 {
                        info!(job = job.name(), count = items_processed, "Scheduled job completed");
                    }
                }
                Ok(JobOutcome::AlreadyClaimed { owner_id, status }) => {
                    debug!(job = job.name(), owner = %owner_id, status = ?status, "Scheduled job already claimed today");
                }
                Err(e) => {
                    tracing::error!(job = job.name(), error = %e, "Scheduled job failed");
                }
            }
        }

        info!(job = job.name(), "Scheduled job loop stopped");
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingExecutor {
        purges: AtomicU64,
        cleanups: AtomicU64,
    }

    #[async_trait::async_trait]
    impl JobExecutor for CountingExecutor {
        async fn purge_removed_edges(&self) -> AppResult<JobOutcome> {
            self.purges.fetch_add(1, Ordering::SeqCst);
            Ok(JobOutcome::Completed { items_processed: 0 })
        }

        async fn cleanup_notifications(&self) -> AppResult<JobOutcome> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(JobOutcome::Completed { items_processed: 0 })
        }
    }

    #[test]
    fn test_scheduler_config_from_jobs_config() {
        let config = SchedulerConfig::from(&JobsConfig {
            owner_id: None,
            edge_purge_interval_secs: 60,
            notification_cleanup_interval_secs: 0,
        });
        assert_eq!(config.edge_purge_interval, Duration::from_secs(60));
        assert_eq!(config.notification_cleanup_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_job_names() {
        assert_eq!(ScheduledJob::PurgeRemovedEdges.name(), "purge-removed-edges");
        assert_eq!(
            serde_json::to_string(&ScheduledJob::NotificationCleanup).unwrap(),
            "\"notification-cleanup\""
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_tick_until_shutdown() {
        let executor = Arc::new(CountingExecutor::default());
        let shutdown = CancellationToken::new();
        let handles = run_scheduler(
            &SchedulerConfig {
                edge_purge_interval: Duration::from_secs(10),
                notification_cleanup_interval: Duration::from_secs(20),
            },
            Arc::clone(&executor),
            shutdown.clone(),
        );

        // Ticks at 0, 10, 20 and 0, 20.
        tokio::time::sleep(Duration::from_secs(25)).await;
        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(executor.purges.load(Ordering::SeqCst), 3);
        assert_eq!(executor.cleanups.load(Ordering::SeqCst), 2);
    }
}
