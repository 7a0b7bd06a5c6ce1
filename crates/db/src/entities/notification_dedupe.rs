//! Write-once "already notified" ledger.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_dedupe")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub actor_id: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub kind: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub entity_type: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub entity_key: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
