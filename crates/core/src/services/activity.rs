//! Notifications caused by user activity outside the social graph.

use async_trait::async_trait;
use habitgraph_common::{AppError, AppResult};
use habitgraph_db::entities::FollowState;
use habitgraph_db::repositories::{DedupeKey, FollowEdgeRepository};
use tracing::{debug, info, warn};

use crate::services::debounce::{CoalescedEmitter, CoalescedEvent, DebounceCoalescer, DebounceEvent};
use crate::services::notification::NotificationDispatcher;
use crate::services::notification_payload::NotificationPayload;
use crate::services::user_directory::UserDirectoryService;

/// Turns likes, uploads, badges and streaks into notifications.
#[derive(Clone)]
pub struct ActivityNotifier {
    users: UserDirectoryService,
    notifications: NotificationDispatcher,
    coalescer: DebounceCoalescer,
}

impl ActivityNotifier {
    #[must_use]
    pub const fn new(
        users: UserDirectoryService,
        notifications: NotificationDispatcher,
        coalescer: DebounceCoalescer,
    ) -> Self {
        Self {
            users,
            notifications,
            coalescer,
        }
    }

    /// Notify `owner_id` that `actor_id` liked one of their entities.
    ///
    /// Each (owner, actor, entity) notifies at most once, so unlike and
    /// like again stays silent. Returns whether a notification was created.
    pub async fn item_liked(
        &self,
        owner_id: &str,
        actor_id: &str,
        entity_type: &str,
        entity_key: &str,
    ) -> AppResult<bool> {
        if owner_id == actor_id {
            return Ok(false);
        }

        let actor = self
            .users
            .find_user(actor_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(actor_id.to_string()))?;

        let key = DedupeKey::new(owner_id, actor_id, "like", entity_type, entity_key);
        let created = self
            .notifications
            .create_once(
                &key,
                owner_id,
                NotificationPayload::Like {
                    actor_id: actor.id,
                    actor_username: actor.username,
                    entity_type: entity_type.to_string(),
                    entity_key: entity_key.to_string(),
                },
            )
            .await?;

        Ok(created.is_some())
    }

    /// Record a photo upload. Followers hear about a burst of uploads once,
    /// after the actor goes quiet.
    pub async fn photo_uploaded(&self, actor_id: &str, date_key: &str) -> AppResult<u32> {
        let actor = self
            .users
            .find_user(actor_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(actor_id.to_string()))?;

        Ok(self
            .coalescer
            .register(
                actor_id,
                DebounceEvent {
                    actor_username: actor.username,
                    avatar_url: actor.avatar_url,
                    date_key: date_key.to_string(),
                },
            )
            .await)
    }

    /// Notify a user of a new badge, once per badge.
    pub async fn badge_earned(
        &self,
        user_id: &str,
        badge_id: &str,
        badge_name: &str,
    ) -> AppResult<bool> {
        let key = DedupeKey::new(user_id, user_id, "badge", "badge", badge_id);
        let created = self
            .notifications
            .create_once(
                &key,
                user_id,
                NotificationPayload::Badge {
                    badge_id: badge_id.to_string(),
                    badge_name: badge_name.to_string(),
                },
            )
            .await?;
        Ok(created.is_some())
    }

    /// Notify a user of a streak milestone, once per habit and length.
    pub async fn streak_reached(&self, user_id: &str, habit_id: &str, days: u32) -> AppResult<bool> {
        let key = DedupeKey::new(
            user_id,
            user_id,
            "streak",
            "habit",
            format!("{habit_id}:{days}"),
        );
        let created = self
            .notifications
            .create_once(
                &key,
                user_id,
                NotificationPayload::Streak {
                    habit_id: habit_id.to_string(),
                    days,
                },
            )
            .await?;
        Ok(created.is_some())
    }
}

/// Fans a coalesced upload burst out to the actor's active followers.
pub struct PhotoUploadNotifier {
    edge_repo: FollowEdgeRepository,
    notifications: NotificationDispatcher,
}

impl PhotoUploadNotifier {
    #[must_use]
    pub const fn new(edge_repo: FollowEdgeRepository, notifications: NotificationDispatcher) -> Self {
        Self {
            edge_repo,
            notifications,
        }
    }
}

#[async_trait]
impl CoalescedEmitter for PhotoUploadNotifier {
    async fn emit(&self, event: CoalescedEvent) {
        let followers = match self
            .edge_repo
            .follower_ids(&event.actor_id, FollowState::Active)
            .await
        {
            Ok(followers) => followers,
            Err(e) => {
                warn!(error = %e, actor_id = %event.actor_id, "Failed to load followers for upload notification");
                return;
            }
        };

        if followers.is_empty() {
            debug!(actor_id = %event.actor_id, "No followers to notify of uploads");
            return;
        }

        let payload = NotificationPayload::PhotoUpload {
            actor_id: event.actor_id.clone(),
            actor_username: event.actor_username,
            avatar_url: event.avatar_url,
            date_key: event.date_key,
            count: event.count,
        };

        let mut delivered = 0usize;
        for follower_id in &followers {
            match self.notifications.create(follower_id, payload.clone()).await {
                Ok(_) => delivered += 1,
                Err(e) => warn!(error = %e, follower_id = %follower_id, "Failed to notify follower of uploads"),
            }
        }

        info!(
            actor_id = %event.actor_id,
            count = event.count,
            delivered,
            "Notified followers of uploads"
        );
    }
}
