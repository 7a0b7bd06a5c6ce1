//! Follow counter repository.

use std::sync::Arc;

use chrono::Utc;
use habitgraph_common::{AppError, AppResult};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};

use crate::entities::{FollowCounter, follow_counter};

/// A counter column of `follow_counter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterField {
    /// Active incoming edges.
    Followers,
    /// Active outgoing edges.
    Following,
    /// Pending incoming requests.
    PendingRequests,
}

impl CounterField {
    const fn column(self) -> follow_counter::Column {
        match self {
            Self::Followers => follow_counter::Column::FollowersCount,
            Self::Following => follow_counter::Column::FollowingCount,
            Self::PendingRequests => follow_counter::Column::PendingRequestsCount,
        }
    }
}

/// Follow counter repository.
#[derive(Clone)]
pub struct FollowCounterRepository {
    db: Arc<DatabaseConnection>,
}

impl FollowCounterRepository {
    /// Create a new follow counter repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find the counter row of a user.
    pub async fn find(&self, user_id: &str) -> AppResult<Option<follow_counter::Model>> {
        FollowCounter::find_by_id(user_id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Add `delta` to one counter in a single statement.
    ///
    /// Creates the row with `delta` as the initial value when it does not exist.
    pub async fn apply_delta(&self, user_id: &str, field: CounterField, delta: i64) -> AppResult<()> {
        let now: sea_orm::prelude::DateTimeWithTimeZone = Utc::now().into();

        let mut model = follow_counter::ActiveModel {
            user_id: Set(user_id.to_string()),
            followers_count: Set(0),
            following_count: Set(0),
            pending_requests_count: Set(0),
            updated_at: Set(now),
        };
        match field {
            CounterField::Followers => model.followers_count = Set(delta),
            CounterField::Following => model.following_count = Set(delta),
            CounterField::PendingRequests => model.pending_requests_count = Set(delta),
        }

        let column = field.column();
        FollowCounter::insert(model)
            .on_conflict(
                OnConflict::column(follow_counter::Column::UserId)
                    .value(column, Expr::col((FollowCounter, column)).add(delta))
                    .value(follow_counter::Column::UpdatedAt, Expr::value(now))
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    /// Replace all counters of a user.
    pub async fn overwrite(
        &self,
        user_id: &str,
        followers: i64,
        following: i64,
        pending_requests: i64,
    ) -> AppResult<()> {
        let model = follow_counter::ActiveModel {
            user_id: Set(user_id.to_string()),
            followers_count: Set(followers),
            following_count: Set(following),
            pending_requests_count: Set(pending_requests),
            updated_at: Set(Utc::now().into()),
        };

        FollowCounter::insert(model)
            .on_conflict(
                OnConflict::column(follow_counter::Column::UserId)
                    .update_columns([
                        follow_counter::Column::FollowersCount,
                        follow_counter::Column::FollowingCount,
                        follow_counter::Column::PendingRequestsCount,
                        follow_counter::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    #[tokio::test]
    async fn test_apply_delta_is_a_single_upsert() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let repo = FollowCounterRepository::new(Arc::clone(&db));
        repo.apply_delta("u1", CounterField::Followers, -1)
            .await
            .unwrap();

        drop(repo);

        let log = Arc::try_unwrap(db).ok().unwrap().into_transaction_log();
        assert_eq!(log.len(), 1);
        let sql = format!("{:?}", log[0]);
        assert!(sql.contains("ON CONFLICT"));
        assert!(sql.contains("followers_count"));
    }
}
