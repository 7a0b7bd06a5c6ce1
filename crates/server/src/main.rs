//! Habitgraph server entry point.
//!
//! Runs the social-graph engine and its background workers: the counter
//! subscriber, the push gateway, the upload coalescer, the Redis fan-out
//! forwarder and the maintenance scheduler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fred::clients::Client as RedisClient;
use fred::interfaces::ClientLike;
use fred::types::config::Config as RedisClientConfig;
use habitgraph_common::{Config, InMemoryCache, RedisCache, SharedCache};
use habitgraph_core::{
    LocalRealtimeChannel, NoopPushBroker, PushGateway, PushGatewayConfig, RealtimeChannelService,
    SharedPushBroker,
};
use habitgraph_queue::{HttpPushBroker, RedisRealtimeChannel};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use habitgraph_server::services::Services;

/// How often idle fan-out streams and expired pending lists are dropped.
const REALTIME_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "habitgraph=debug,sea_orm=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    init_tracing(config.logging.json);

    info!("Starting habitgraph server...");

    let db = habitgraph_db::init(&config).await?;
    info!("Connected to database");

    info!("Running database migrations...");
    habitgraph_db::migrate(&db).await?;
    info!("Migrations completed");

    let shutdown = CancellationToken::new();
    let mut background = Vec::new();

    // Redis backs the shared cache and cross-replica fan-out. Without it,
    // both stay in-process.
    let (cache, realtime, redis_channel): (SharedCache, RealtimeChannelService, _) =
        if let Some(redis) = &config.redis {
            info!("Connecting to Redis...");
            let client_config = RedisClientConfig::from_url(&redis.url)
                .context("invalid Redis URL")?;
            let client = RedisClient::new(client_config, None, None, None);
            client.init().await.context("failed to connect to Redis")?;
            let cache: SharedCache = Arc::new(RedisCache::new(Arc::new(client), &redis.prefix));

            let channel = RedisRealtimeChannel::new(&redis.url, &redis.prefix)
                .await
                .context("failed to connect Redis Pub/Sub")?;
            background.push(
                channel.start(config.notifications.pending_ttl(), shutdown.child_token()),
            );
            background.push(
                channel
                    .local()
                    .spawn_sweeper(REALTIME_SWEEP_INTERVAL, shutdown.child_token()),
            );
            info!("Connected to Redis");

            (cache, Arc::new(channel.clone()), Some(channel))
        } else {
            info!("Redis not configured, using in-process cache and fan-out");
            let channel = Arc::new(LocalRealtimeChannel::default());
            background.push(
                channel.spawn_sweeper(REALTIME_SWEEP_INTERVAL, shutdown.child_token()),
            );
            let realtime: RealtimeChannelService = channel;
            (Arc::new(InMemoryCache::new()), realtime, None)
        };

    let broker: SharedPushBroker = match &config.push.broker_url {
        Some(url) => Arc::new(HttpPushBroker::new(url, config.push.request_timeout())?),
        None => {
            info!("Push broker not configured, push delivery disabled");
            Arc::new(NoopPushBroker)
        }
    };
    let push = PushGateway::start(
        broker,
        PushGatewayConfig::from(&config.push),
        shutdown.child_token(),
    );

    let services = Services::build(
        &config,
        Arc::new(db),
        cache,
        realtime,
        Arc::clone(&push),
        &shutdown,
    );
    background.extend(services.background);
    info!(owner = %services.owner_id, "Habitgraph server ready");

    shutdown_signal().await;

    // Stop accepting new work first, then drain what is queued.
    shutdown.cancel();
    let discarded = services.coalescer.shutdown().await;
    if discarded > 0 {
        info!(discarded, "Discarded pending coalesced notifications");
    }
    push.close().await;
    for handle in background {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    if let Some(channel) = redis_channel
        && let Err(e) = channel.shutdown().await
    {
        warn!(error = %e, "Failed to close Redis Pub/Sub clients");
    }

    let stats = push.stats();
    info!(
        sent = stats.sent,
        dropped = stats.dropped,
        rejected = stats.rejected,
        "Server shutdown complete"
    );
    Ok(())
}
