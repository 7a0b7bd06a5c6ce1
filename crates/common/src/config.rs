//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use validator::Validate;

use crate::error::AppResult;

/// Application configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration. When absent, caching and fan-out run in-process.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Social graph limits and retention.
    #[serde(default)]
    #[validate(nested)]
    pub graph: GraphConfig,
    /// Notification delivery settings.
    #[serde(default)]
    #[validate(nested)]
    pub notifications: NotificationConfig,
    /// Push gateway settings.
    #[serde(default)]
    #[validate(nested)]
    pub push: PushConfig,
    /// Relationship cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Counter update settings.
    #[serde(default)]
    #[validate(nested)]
    pub counters: CounterConfig,
    /// Event coalescing settings.
    #[serde(default)]
    #[validate(nested)]
    pub debounce: DebounceConfig,
    /// Periodic job settings.
    #[serde(default)]
    pub jobs: JobsConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Social graph configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GraphConfig {
    /// Maximum follow actions per user per UTC day.
    #[serde(default = "default_daily_follow_limit")]
    #[validate(range(min = 1))]
    pub daily_follow_limit: u64,
    /// Maximum number of accounts a user may follow (active + pending).
    #[serde(default = "default_max_following")]
    #[validate(range(min = 1))]
    pub max_following: u64,
    /// Days a removed edge is kept before the purge pass deletes it.
    #[serde(default = "default_removed_retention_days")]
    pub removed_retention_days: u32,
}

/// Notification configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NotificationConfig {
    /// Timeout for a real-time fan-out publish.
    #[serde(default = "default_fanout_timeout_ms")]
    #[validate(range(min = 1))]
    pub fanout_timeout_ms: u64,
    /// Lifetime of a pending (undelivered) real-time message.
    #[serde(default = "default_pending_ttl_secs")]
    #[validate(range(min = 1))]
    pub pending_ttl_secs: u64,
    /// Days read notifications are retained.
    #[serde(default = "default_read_retention_days")]
    pub read_retention_days: u32,
    /// Days unread notifications are retained.
    #[serde(default = "default_unread_retention_days")]
    pub unread_retention_days: u32,
}

/// Push gateway configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PushConfig {
    /// Base URL of the external push broker. Push is disabled when absent.
    #[serde(default)]
    pub broker_url: Option<String>,
    /// Capacity of the bounded push queue.
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
    /// Maximum messages per broker batch.
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1))]
    pub batch_size: usize,
    /// Maximum time a message waits for its batch to fill.
    #[serde(default = "default_max_wait_ms")]
    #[validate(range(min = 1))]
    pub max_wait_ms: u64,
    /// Maximum serialized size of a single message.
    #[serde(default = "default_max_message_bytes")]
    #[validate(range(min = 256))]
    pub max_message_bytes: usize,
    /// Maximum serialized size of a batch.
    #[serde(default = "default_max_batch_bytes")]
    #[validate(range(min = 256))]
    pub max_batch_bytes: usize,
    /// Broker request timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// TTL attached to outgoing messages.
    #[serde(default = "default_push_ttl_secs")]
    pub default_ttl_secs: u32,
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// TTL of pairwise relationship entries.
    #[serde(default = "default_cache_ttl_secs")]
    pub relationship_ttl_secs: u64,
    /// TTL of per-user counter entries.
    #[serde(default = "default_cache_ttl_secs")]
    pub counter_ttl_secs: u64,
    /// TTL of unread notification counts.
    #[serde(default = "default_cache_ttl_secs")]
    pub unread_ttl_secs: u64,
}

/// Counter update configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CounterConfig {
    /// Apply counter deltas through the broadcast channel and a background subscriber.
    #[serde(default = "default_true")]
    pub async_updates: bool,
    /// Capacity of the counter delta broadcast channel.
    #[serde(default = "default_counter_channel_capacity")]
    #[validate(range(min = 1))]
    pub channel_capacity: usize,
}

/// Debounce configuration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DebounceConfig {
    /// Quiet period after the last event before a coalesced notification fires.
    #[serde(default = "default_debounce_window_ms")]
    #[validate(range(min = 1))]
    pub window_ms: u64,
}

/// Periodic job configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Replica identity recorded on job claims.
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Interval of the removed-edge purge loop.
    #[serde(default = "default_job_interval_secs")]
    pub edge_purge_interval_secs: u64,
    /// Interval of the notification cleanup loop.
    #[serde(default = "default_job_interval_secs")]
    pub notification_cleanup_interval_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub json: bool,
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

fn default_redis_prefix() -> String {
    "habitgraph".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_daily_follow_limit() -> u64 {
    200
}

const fn default_max_following() -> u64 {
    7500
}

const fn default_removed_retention_days() -> u32 {
    30
}

const fn default_fanout_timeout_ms() -> u64 {
    500
}

const fn default_pending_ttl_secs() -> u64 {
    86400
}

const fn default_read_retention_days() -> u32 {
    30
}

const fn default_unread_retention_days() -> u32 {
    90
}

const fn default_queue_capacity() -> usize {
    1024
}

const fn default_batch_size() -> usize {
    100
}

const fn default_max_wait_ms() -> u64 {
    250
}

const fn default_max_message_bytes() -> usize {
    4096
}

const fn default_max_batch_bytes() -> usize {
    256 * 1024
}

const fn default_request_timeout_ms() -> u64 {
    5000
}

const fn default_push_ttl_secs() -> u32 {
    86400
}

const fn default_cache_ttl_secs() -> u64 {
    300
}

const fn default_counter_channel_capacity() -> usize {
    1024
}

const fn default_debounce_window_ms() -> u64 {
    30_000
}

const fn default_job_interval_secs() -> u64 {
    3600
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            daily_follow_limit: default_daily_follow_limit(),
            max_following: default_max_following(),
            removed_retention_days: default_removed_retention_days(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            fanout_timeout_ms: default_fanout_timeout_ms(),
            pending_ttl_secs: default_pending_ttl_secs(),
            read_retention_days: default_read_retention_days(),
            unread_retention_days: default_unread_retention_days(),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            broker_url: None,
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            max_wait_ms: default_max_wait_ms(),
            max_message_bytes: default_max_message_bytes(),
            max_batch_bytes: default_max_batch_bytes(),
            request_timeout_ms: default_request_timeout_ms(),
            default_ttl_secs: default_push_ttl_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            relationship_ttl_secs: default_cache_ttl_secs(),
            counter_ttl_secs: default_cache_ttl_secs(),
            unread_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            async_updates: default_true(),
            channel_capacity: default_counter_channel_capacity(),
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window_ms: default_debounce_window_ms(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            owner_id: None,
            edge_purge_interval_secs: default_job_interval_secs(),
            notification_cleanup_interval_secs: default_job_interval_secs(),
        }
    }
}

impl PushConfig {
    /// Maximum time a message waits for its batch.
    #[must_use]
    pub const fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Broker request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl NotificationConfig {
    /// Fan-out publish timeout.
    #[must_use]
    pub const fn fanout_timeout(&self) -> Duration {
        Duration::from_millis(self.fanout_timeout_ms)
    }

    /// Pending message lifetime.
    #[must_use]
    pub const fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }
}

impl DebounceConfig {
    /// Coalescing window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `HABITGRAPH_ENV`)
    /// 4. Environment variables with `HABITGRAPH_` prefix
    pub fn load() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        let env = std::env::var("HABITGRAPH_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("HABITGRAPH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("HABITGRAPH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = from_toml(
            r#"
            [database]
            url = "postgres://localhost/habitgraph"
            "#,
        );

        assert!(config.redis.is_none());
        assert_eq!(config.graph.daily_follow_limit, 200);
        assert_eq!(config.push.queue_capacity, 1024);
        assert_eq!(config.push.max_message_bytes, 4096);
        assert!(config.counters.async_updates);
        assert_eq!(config.debounce.window(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let config = from_toml(
            r#"
            [database]
            url = "postgres://localhost/habitgraph"

            [push]
            batch_size = 0
            "#,
        );

        assert!(config.validate().is_err());
    }
}
