//! Database repositories.

pub mod dedupe;
pub mod follow_counter;
pub mod follow_edge;
pub mod job_claim;
pub mod notification;
pub mod user;

pub use dedupe::{DedupeKey, DedupeRepository};
pub use follow_counter::{CounterField, FollowCounterRepository};
pub use follow_edge::{EdgeCursor, EdgeIndex, FollowEdge, FollowEdgeRepository};
pub use job_claim::JobClaimRepository;
pub use notification::NotificationRepository;
pub use user::UserRepository;
