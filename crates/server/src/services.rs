//! Service wiring.
//!
//! Builds every engine service on top of a database connection, a cache
//! backend, a real-time channel and a push gateway, and spawns the workers
//! those services depend on.

use std::sync::Arc;

use habitgraph_common::config::Config;
use habitgraph_common::{IdGenerator, SharedCache};
use habitgraph_core::{
    ActivityNotifier, ChannelCounterUpdates, CounterApplier, CounterLedger, DbUserDirectory,
    DebounceCoalescer, FollowingService, JobClaimArbiter, NotificationDispatcher,
    PhotoUploadNotifier, PushGateway, RealtimeChannelService, RelationshipCache,
    UserDirectoryService, spawn_counter_subscriber,
};
use habitgraph_db::repositories::{
    FollowCounterRepository, FollowEdgeRepository, JobClaimRepository, NotificationRepository,
    UserRepository,
};
use habitgraph_queue::{ClaimedJobExecutor, SchedulerConfig, run_scheduler};
use sea_orm::DatabaseConnection;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Every engine service, plus the handles of the workers spawned for them.
pub struct Services {
    /// Follow graph operations.
    pub following: FollowingService,
    /// Follower, following and pending-request counts.
    pub counters: CounterLedger,
    /// Notification storage and delivery.
    pub notifications: NotificationDispatcher,
    /// Likes, badges, streaks and uploads.
    pub activity: ActivityNotifier,
    /// Upload burst coalescer, shut down before the push gateway closes.
    pub coalescer: DebounceCoalescer,
    /// Identity of this replica on job claims.
    pub owner_id: String,
    /// Counter subscriber and scheduler loops.
    pub background: Vec<JoinHandle<()>>,
}

impl Services {
    /// Build the services and spawn their workers under `shutdown`.
    #[must_use]
    pub fn build(
        config: &Config,
        db: Arc<DatabaseConnection>,
        cache_backend: SharedCache,
        realtime: RealtimeChannelService,
        push: Arc<PushGateway>,
        shutdown: &CancellationToken,
    ) -> Self {
        let mut background = Vec::new();

        let user_repo = UserRepository::new(Arc::clone(&db));
        let edge_repo = FollowEdgeRepository::new(Arc::clone(&db));
        let counter_repo = FollowCounterRepository::new(Arc::clone(&db));
        let notification_repo = NotificationRepository::new(Arc::clone(&db));
        let claim_repo = JobClaimRepository::new(db);

        let cache = RelationshipCache::new(cache_backend, &config.cache);
        let users: UserDirectoryService = Arc::new(DbUserDirectory::new(user_repo));

        let counters = if config.counters.async_updates {
            let applier = CounterApplier::new(counter_repo.clone(), cache.clone());
            let (strategy, receiver) =
                ChannelCounterUpdates::new(applier.clone(), config.counters.channel_capacity);
            background.push(spawn_counter_subscriber(
                receiver,
                applier,
                shutdown.child_token(),
            ));
            CounterLedger::new(
                counter_repo,
                edge_repo.clone(),
                cache.clone(),
                Arc::new(strategy),
            )
        } else {
            CounterLedger::direct(counter_repo, edge_repo.clone(), cache.clone())
        };

        let mut notifications =
            NotificationDispatcher::new(notification_repo, cache.clone(), config.notifications.clone());
        notifications.set_realtime(realtime);
        notifications.set_push_gateway(push);

        let mut following = FollowingService::new(
            edge_repo.clone(),
            Arc::clone(&users),
            counters.clone(),
            cache,
            config.graph.clone(),
        );
        following.set_notifications(notifications.clone());

        let coalescer = DebounceCoalescer::new(
            config.debounce.window(),
            Arc::new(PhotoUploadNotifier::new(edge_repo, notifications.clone())),
            shutdown.child_token(),
        );
        let activity = ActivityNotifier::new(users, notifications.clone(), coalescer.clone());

        let owner_id = config
            .jobs
            .owner_id
            .clone()
            .unwrap_or_else(|| IdGenerator::new().generate_replica_id());
        let executor = ClaimedJobExecutor::new(
            following.clone(),
            notifications.clone(),
            JobClaimArbiter::new(claim_repo),
            owner_id.clone(),
            &config.graph,
        );
        background.extend(run_scheduler(
            &SchedulerConfig::from(&config.jobs),
            Arc::new(executor),
            shutdown.child_token(),
        ));

        info!(
            async_counters = config.counters.async_updates,
            debounce_ms = config.debounce.window_ms,
            "Services initialized"
        );

        Self {
            following,
            counters,
            notifications,
            activity,
            coalescer,
            owner_id,
            background,
        }
    }
}
