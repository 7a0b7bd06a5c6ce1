//! Per-user follow counters.
//!
//! Maintained by delta application and allowed to drift; reconciliation
//! recomputes the row from the edge tables.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "follow_counter")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,

    #[sea_orm(default_value = 0)]
    pub followers_count: i64,

    #[sea_orm(default_value = 0)]
    pub following_count: i64,

    #[sea_orm(default_value = 0)]
    pub pending_requests_count: i64,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
