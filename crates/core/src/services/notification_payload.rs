//! Typed notification payloads.
//!
//! The payload is stored as JSON in `notification.metadata`, tagged by
//! `type`, and drives the title, body and deep link shown to the user.

use habitgraph_db::entities::notification::NotificationKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationPayload {
    /// Someone liked an entity owned by the recipient.
    Like {
        actor_id: String,
        actor_username: String,
        entity_type: String,
        entity_key: String,
    },
    /// Someone started following the recipient.
    Follow {
        actor_id: String,
        actor_username: String,
    },
    /// Someone asked to follow the (private) recipient.
    FollowRequest {
        actor_id: String,
        actor_username: String,
    },
    /// The recipient's follow request was accepted.
    FollowAccepted {
        actor_id: String,
        actor_username: String,
    },
    Badge {
        badge_id: String,
        badge_name: String,
    },
    Streak {
        habit_id: String,
        days: u32,
    },
    /// A followed user uploaded photos, coalesced over a quiet period.
    PhotoUpload {
        actor_id: String,
        actor_username: String,
        avatar_url: Option<String>,
        date_key: String,
        count: u32,
    },
}

impl NotificationPayload {
    #[must_use]
    pub const fn kind(&self) -> NotificationKind {
        match self {
            Self::Like { .. } => NotificationKind::Like,
            Self::Follow { .. } => NotificationKind::Follow,
            Self::FollowRequest { .. } => NotificationKind::FollowRequest,
            Self::FollowAccepted { .. } => NotificationKind::FollowAccepted,
            Self::Badge { .. } => NotificationKind::Badge,
            Self::Streak { .. } => NotificationKind::Streak,
            Self::PhotoUpload { .. } => NotificationKind::PhotoUpload,
        }
    }

    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::Like { .. } => "New like".to_string(),
            Self::Follow { .. } => "New follower".to_string(),
            Self::FollowRequest { .. } => "Follow request".to_string(),
            Self::FollowAccepted { .. } => "Follow request accepted".to_string(),
            Self::Badge { .. } => "Badge earned".to_string(),
            Self::Streak { .. } => "Streak milestone".to_string(),
            Self::PhotoUpload { .. } => "New photos".to_string(),
        }
    }

    #[must_use]
    pub fn body(&self) -> String {
        match self {
            Self::Like {
                actor_username,
                entity_type,
                ..
            } => format!("@{actor_username} liked your {entity_type}"),
            Self::Follow { actor_username, .. } => {
                format!("@{actor_username} started following you")
            }
            Self::FollowRequest { actor_username, .. } => {
                format!("@{actor_username} wants to follow you")
            }
            Self::FollowAccepted { actor_username, .. } => {
                format!("@{actor_username} accepted your follow request")
            }
            Self::Badge { badge_name, .. } => format!("You earned the {badge_name} badge"),
            Self::Streak { days, .. } => format!("You kept your streak for {days} days"),
            Self::PhotoUpload {
                actor_username,
                count,
                ..
            } => {
                if *count == 1 {
                    format!("@{actor_username} uploaded a new photo")
                } else {
                    format!("@{actor_username} uploaded {count} new photos")
                }
            }
        }
    }

    /// In-app path the notification opens.
    #[must_use]
    pub fn deep_link(&self) -> String {
        match self {
            Self::Like {
                entity_type,
                entity_key,
                ..
            } => format!("/{entity_type}/{entity_key}"),
            Self::Follow { actor_id, .. } | Self::FollowAccepted { actor_id, .. } => {
                format!("/users/{actor_id}")
            }
            Self::FollowRequest { .. } => "/follow-requests".to_string(),
            Self::Badge { badge_id, .. } => format!("/badges/{badge_id}"),
            Self::Streak { habit_id, .. } => format!("/habits/{habit_id}"),
            Self::PhotoUpload {
                actor_id, date_key, ..
            } => format!("/users/{actor_id}/photos?date={date_key}"),
        }
    }

    /// Key under which a push provider may collapse repeated messages.
    #[must_use]
    pub fn collapse_key(&self) -> String {
        let kind = self.kind().as_str();
        match self {
            Self::Like {
                entity_type,
                entity_key,
                ..
            } => format!("{kind}:{entity_type}:{entity_key}"),
            Self::Follow { actor_id, .. }
            | Self::FollowRequest { actor_id, .. }
            | Self::FollowAccepted { actor_id, .. } => format!("{kind}:{actor_id}"),
            Self::Badge { badge_id, .. } => format!("{kind}:{badge_id}"),
            Self::Streak { habit_id, days } => format!("{kind}:{habit_id}:{days}"),
            Self::PhotoUpload {
                actor_id, date_key, ..
            } => format!("{kind}:{actor_id}:{date_key}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_tagged_by_type() {
        let payload = NotificationPayload::Follow {
            actor_id: "a".to_string(),
            actor_username: "alice".to_string(),
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "follow");
        assert_eq!(json["actor_id"], "a");
        assert_eq!(payload.kind(), NotificationKind::Follow);
    }

    #[test]
    fn test_photo_upload_body_pluralizes() {
        let payload = |count| NotificationPayload::PhotoUpload {
            actor_id: "a".to_string(),
            actor_username: "alice".to_string(),
            avatar_url: None,
            date_key: "2026-01-02".to_string(),
            count,
        };

        assert_eq!(payload(1).body(), "@alice uploaded a new photo");
        assert_eq!(payload(3).body(), "@alice uploaded 3 new photos");
        assert_eq!(
            payload(3).deep_link(),
            "/users/a/photos?date=2026-01-02"
        );
    }

    #[test]
    fn test_collapse_key_groups_likes_by_entity() {
        let like = |actor: &str| NotificationPayload::Like {
            actor_id: actor.to_string(),
            actor_username: actor.to_string(),
            entity_type: "photo".to_string(),
            entity_key: "p1".to_string(),
        };

        assert_eq!(like("a").collapse_key(), like("b").collapse_key());
        assert_eq!(like("a").collapse_key(), "like:photo:p1");
    }
}
