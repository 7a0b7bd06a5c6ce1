//! Periodic job claims, one row per job per date.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Job run status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "job_claim")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub job_name: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub job_date: Date,

    pub started_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub completed_at: Option<DateTimeWithTimeZone>,

    pub status: JobStatus,

    /// Replica that won the claim
    pub owner_id: String,

    #[sea_orm(default_value = 0)]
    pub items_processed: i64,

    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
