//! Business logic services.

#![allow(missing_docs)]

pub mod activity;
pub mod counter;
pub mod debounce;
pub mod following;
pub mod job_claim;
pub mod notification;
pub mod notification_payload;
pub mod push;
pub mod realtime;
pub mod relationship_cache;
pub mod user_directory;

pub use activity::{ActivityNotifier, PhotoUploadNotifier};
pub use counter::{
    ChannelCounterUpdates, CounterApplier, CounterDelta, CounterLedger, CounterUpdateStrategy,
    DirectCounterUpdates, FollowCounts, spawn_counter_subscriber,
};
pub use debounce::{CoalescedEmitter, CoalescedEvent, DebounceCoalescer, DebounceEvent};
pub use following::{FollowPage, FollowResult, FollowingService};
pub use job_claim::{JobClaimArbiter, JobOutcome};
pub use notification::NotificationDispatcher;
pub use notification_payload::NotificationPayload;
pub use push::{
    BrokerError, EnqueueError, NoopPushBroker, PushBroker, PushGateway, PushGatewayConfig,
    PushMessage, PushStats, SharedPushBroker,
};
pub use realtime::{LocalRealtimeChannel, RealtimeChannel, RealtimeChannelService};
pub use relationship_cache::{Relationship, RelationshipCache};
pub use user_directory::{DbUserDirectory, UserDirectory, UserDirectoryService, UserIdentity};
