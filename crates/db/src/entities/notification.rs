//! Notification entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Notification types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    #[sea_orm(string_value = "like")]
    Like,
    #[sea_orm(string_value = "follow")]
    Follow,
    #[sea_orm(string_value = "follow_request")]
    FollowRequest,
    #[sea_orm(string_value = "follow_accepted")]
    FollowAccepted,
    #[sea_orm(string_value = "badge")]
    Badge,
    #[sea_orm(string_value = "streak")]
    Streak,
    #[sea_orm(string_value = "photo_upload")]
    PhotoUpload,
}

impl NotificationKind {
    /// Stable string form, used in dedupe keys and push messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Follow => "follow",
            Self::FollowRequest => "follow_request",
            Self::FollowAccepted => "follow_accepted",
            Self::Badge => "badge",
            Self::Streak => "streak",
            Self::PhotoUpload => "photo_upload",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The user receiving the notification
    pub user_id: String,

    pub kind: NotificationKind,

    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub body: String,

    /// Serialized typed payload
    #[sea_orm(column_type = "Text")]
    pub metadata: String,

    pub created_at: DateTimeWithTimeZone,

    /// NULL = unread
    #[sea_orm(nullable)]
    pub read_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
