//! Follow edges indexed by follower ("who do I follow").

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::follow_state::FollowState;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "follow_outgoing")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub follower_id: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub followee_id: String,

    pub state: FollowState,

    /// Reset when a tombstone is revived, so listings order by the latest follow
    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub accepted_at: Option<DateTimeWithTimeZone>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::FollowerId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Follower,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::FolloweeId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Followee,
}

impl ActiveModelBehavior for ActiveModel {}
