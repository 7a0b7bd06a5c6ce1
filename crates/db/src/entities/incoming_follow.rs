//! Follow edges indexed by followee ("who follows me").
//!
//! Mirrors `follow_outgoing` row for row. Both are written in the same
//! transaction.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::follow_state::FollowState;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "follow_incoming")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub followee_id: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub follower_id: String,

    pub state: FollowState,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub accepted_at: Option<DateTimeWithTimeZone>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::FolloweeId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Followee,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::FollowerId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Follower,
}

impl ActiveModelBehavior for ActiveModel {}
