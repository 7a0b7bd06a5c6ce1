//! Notification dedupe ledger.
//!
//! A claim is an insert against the composite primary key. The first insert
//! wins; every later insert for the same key affects zero rows.

use std::sync::Arc;

use chrono::Utc;
use habitgraph_common::{AppError, AppResult};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait, Set};

use crate::entities::{NotificationDedupe, notification_dedupe};

/// Key of a dedupe record: who is notified, who caused it, what kind, about what.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey {
    /// Recipient of the notification.
    pub user_id: String,
    /// User whose action triggered it.
    pub actor_id: String,
    /// Notification kind, e.g. `like`.
    pub kind: String,
    pub entity_type: String,
    pub entity_key: String,
}

impl DedupeKey {
    /// Build a dedupe key.
    pub fn new(
        user_id: impl Into<String>,
        actor_id: impl Into<String>,
        kind: impl Into<String>,
        entity_type: impl Into<String>,
        entity_key: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            actor_id: actor_id.into(),
            kind: kind.into(),
            entity_type: entity_type.into(),
            entity_key: entity_key.into(),
        }
    }
}

/// Dedupe repository.
#[derive(Clone)]
pub struct DedupeRepository {
    db: Arc<DatabaseConnection>,
}

impl DedupeRepository {
    /// Create a new dedupe repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Claim a key on its own. Returns `false` if it was already claimed.
    pub async fn try_claim(&self, key: &DedupeKey) -> AppResult<bool> {
        Self::claim_in(self.db.as_ref(), key).await
    }

    /// Claim a key on the given connection or transaction.
    pub async fn claim_in<C: ConnectionTrait>(conn: &C, key: &DedupeKey) -> AppResult<bool> {
        let model = notification_dedupe::ActiveModel {
            user_id: Set(key.user_id.clone()),
            actor_id: Set(key.actor_id.clone()),
            kind: Set(key.kind.clone()),
            entity_type: Set(key.entity_type.clone()),
            entity_key: Set(key.entity_key.clone()),
            created_at: Set(Utc::now().into()),
        };

        let inserted = NotificationDedupe::insert(model)
            .on_conflict(
                OnConflict::columns([
                    notification_dedupe::Column::UserId,
                    notification_dedupe::Column::ActorId,
                    notification_dedupe::Column::Kind,
                    notification_dedupe::Column::EntityType,
                    notification_dedupe::Column::EntityKey,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(inserted == 1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn key() -> DedupeKey {
        DedupeKey::new("owner", "actor", "like", "photo", "p1")
    }

    #[tokio::test]
    async fn test_claim_reports_inserted_row() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let repo = DedupeRepository::new(db);
        assert!(repo.try_claim(&key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_conflicting_claim_is_not_an_error() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let repo = DedupeRepository::new(db);
        assert!(!repo.try_claim(&key()).await.unwrap());
    }
}
