//! Background plumbing for habitgraph.
//!
//! - **Pub/Sub**: Redis-backed real-time channel with pending lists
//! - **Broker**: HTTP push broker client
//! - **Scheduler**: Periodic maintenance jobs, claimed once per day across replicas

pub mod broker;
pub mod pubsub;
pub mod scheduler;

pub use broker::HttpPushBroker;
pub use pubsub::{RedisRealtimeChannel, channels as pubsub_channels};
pub use scheduler::{
    ClaimedJobExecutor, JobExecutor, ScheduledJob, SchedulerConfig, run_scheduler,
};
