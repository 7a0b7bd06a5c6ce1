//! Database entities.

pub mod follow_counter;
pub mod follow_quota;
pub mod follow_state;
pub mod incoming_follow;
pub mod job_claim;
pub mod notification;
pub mod notification_dedupe;
pub mod outgoing_follow;
pub mod user;

pub use follow_counter::Entity as FollowCounter;
pub use follow_quota::Entity as FollowQuota;
pub use follow_state::FollowState;
pub use incoming_follow::Entity as IncomingFollow;
pub use job_claim::Entity as JobClaim;
pub use notification::Entity as Notification;
pub use notification_dedupe::Entity as NotificationDedupe;
pub use outgoing_follow::Entity as OutgoingFollow;
pub use user::Entity as User;
