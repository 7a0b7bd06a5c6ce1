//! Follow edge lifecycle state.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// State of a follow edge.
///
/// `Removed` rows are tombstones: they stay in both indexes until the purge
/// pass deletes them and may be revived by a re-follow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum FollowState {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "removed")]
    Removed,
}

impl FollowState {
    /// Whether the edge counts as a live relationship (not a tombstone).
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}
