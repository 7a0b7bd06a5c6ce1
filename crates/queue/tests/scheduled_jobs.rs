//! Scheduled maintenance jobs claimed across replicas.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use habitgraph_common::config::{GraphConfig, NotificationConfig};
use habitgraph_core::{
    CounterLedger, DbUserDirectory, FollowingService, JobClaimArbiter, JobOutcome,
    NotificationDispatcher, RelationshipCache,
};
use habitgraph_db::entities::job_claim::JobStatus;
use habitgraph_db::repositories::{
    FollowCounterRepository, FollowEdgeRepository, JobClaimRepository, NotificationRepository,
    UserRepository,
};
use habitgraph_db::test_utils::TestDatabase;
use habitgraph_queue::{ClaimedJobExecutor, JobExecutor};

fn executor(db: &TestDatabase, owner: &str) -> ClaimedJobExecutor {
    let cache = RelationshipCache::disabled();
    let edge_repo = FollowEdgeRepository::new(db.connection());
    let notifications = NotificationDispatcher::new(
        NotificationRepository::new(db.connection()),
        cache.clone(),
        NotificationConfig::default(),
    );
    let following = FollowingService::new(
        edge_repo.clone(),
        Arc::new(DbUserDirectory::new(UserRepository::new(db.connection()))),
        CounterLedger::direct(
            FollowCounterRepository::new(db.connection()),
            edge_repo,
            cache.clone(),
        ),
        cache,
        GraphConfig::default(),
    );

    ClaimedJobExecutor::new(
        following,
        notifications,
        JobClaimArbiter::new(JobClaimRepository::new(db.connection())),
        owner.to_string(),
        &GraphConfig::default(),
    )
}

#[tokio::test]
async fn test_each_job_runs_once_per_day_across_replicas() {
    let db = TestDatabase::new().await.unwrap();
    let replica_a = executor(&db, "replica-a");
    let replica_b = executor(&db, "replica-b");

    assert_eq!(
        replica_a.purge_removed_edges().await.unwrap(),
        JobOutcome::Completed { items_processed: 0 }
    );
    assert_eq!(
        replica_b.purge_removed_edges().await.unwrap(),
        JobOutcome::AlreadyClaimed {
            owner_id: "replica-a".to_string(),
            status: JobStatus::Succeeded,
        }
    );

    // Claims are per job, so the other job is still free today.
    assert_eq!(
        replica_b.cleanup_notifications().await.unwrap(),
        JobOutcome::Completed { items_processed: 0 }
    );
    assert!(matches!(
        replica_a.cleanup_notifications().await.unwrap(),
        JobOutcome::AlreadyClaimed { .. }
    ));
}
