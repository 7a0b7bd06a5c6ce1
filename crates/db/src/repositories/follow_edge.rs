//! Follow edge repository.
//!
//! Every edge lives in two tables: `follow_outgoing` (keyed by follower) and
//! `follow_incoming` (keyed by followee). All writes touch both tables inside
//! one transaction, and a write that does not land on exactly one row per
//! table is rolled back, so the two views never disagree.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, SubsecRound, Utc};
use habitgraph_common::{AppError, AppResult};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{debug, error};

use crate::entities::{
    FollowQuota, FollowState, IncomingFollow, OutgoingFollow, follow_quota, incoming_follow,
    outgoing_follow,
};
use crate::map_db_err;

/// Which of the two edge tables a point read goes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeIndex {
    /// `follow_outgoing`, for "who does X follow" questions.
    ByFollower,
    /// `follow_incoming`, for "who follows X" questions.
    ByFollowee,
}

/// A follow edge as read from either table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowEdge {
    pub follower_id: String,
    pub followee_id: String,
    pub state: FollowState,
    /// When the edge was created, or revived from REMOVED.
    pub created_at: DateTime<FixedOffset>,
    /// Set when a pending request was accepted.
    pub accepted_at: Option<DateTime<FixedOffset>>,
    /// Last state change.
    pub updated_at: DateTime<FixedOffset>,
}

impl From<outgoing_follow::Model> for FollowEdge {
    fn from(m: outgoing_follow::Model) -> Self {
        Self {
            follower_id: m.follower_id,
            followee_id: m.followee_id,
            state: m.state,
            created_at: m.created_at,
            accepted_at: m.accepted_at,
            updated_at: m.updated_at,
        }
    }
}

impl From<incoming_follow::Model> for FollowEdge {
    fn from(m: incoming_follow::Model) -> Self {
        Self {
            follower_id: m.follower_id,
            followee_id: m.followee_id,
            state: m.state,
            created_at: m.created_at,
            accepted_at: m.accepted_at,
            updated_at: m.updated_at,
        }
    }
}

/// Keyset pagination cursor: `(created_at, counterpart id)` of the last row
/// of the previous page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeCursor {
    /// `created_at` of the last edge on the previous page.
    pub created_at: DateTime<FixedOffset>,
    /// Counterpart id of that edge, the tie-breaker.
    pub user_id: String,
}

impl EdgeCursor {
    /// Cursor pointing after `edge`, as seen from the side whose counterpart is `user_id`.
    #[must_use]
    pub fn after(edge: &FollowEdge, counterpart_id: &str) -> Self {
        Self {
            created_at: edge.created_at,
            user_id: counterpart_id.to_string(),
        }
    }

    /// Opaque string form: `{micros}_{user_id}`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}_{}", self.created_at.timestamp_micros(), self.user_id)
    }

    /// Parse the string form produced by [`EdgeCursor::encode`].
    pub fn decode(raw: &str) -> AppResult<Self> {
        let invalid = || AppError::BadRequest(format!("Invalid cursor: {raw}"));

        let (micros, user_id) = raw.split_once('_').ok_or_else(invalid)?;
        let micros: i64 = micros.parse().map_err(|_| invalid())?;
        let created_at = DateTime::from_timestamp_micros(micros).ok_or_else(invalid)?;

        if user_id.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            created_at: created_at.fixed_offset(),
            user_id: user_id.to_string(),
        })
    }
}

/// Edge timestamps are truncated to microseconds so cursors round-trip exactly.
fn edge_timestamp() -> DateTime<FixedOffset> {
    Utc::now().trunc_subsecs(6).fixed_offset()
}

fn db_err(e: sea_orm::DbErr) -> AppError {
    AppError::Database(e.to_string())
}

/// Follow edge repository (the dual-indexed edge store).
#[derive(Clone)]
pub struct FollowEdgeRepository {
    db: Arc<DatabaseConnection>,
}

impl FollowEdgeRepository {
    /// Create a new follow edge repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create an edge in `target` state, or revive a removed one.
    ///
    /// Returns the state the pair had before the call. A live edge (pending or
    /// active) is left untouched and its state returned, so the caller decides
    /// what that means. Reviving a tombstone resets `created_at`.
    pub async fn upsert(
        &self,
        follower_id: &str,
        followee_id: &str,
        target: FollowState,
    ) -> AppResult<Option<FollowState>> {
        if !target.is_live() {
            return Err(AppError::BadRequest(
                "Edge upsert target must be pending or active".to_string(),
            ));
        }

        let txn = self.db.begin().await.map_err(db_err)?;

        let prior = OutgoingFollow::find_by_id((follower_id.to_string(), followee_id.to_string()))
            .one(&txn)
            .await
            .map_err(db_err)?
            .map(|edge| edge.state);

        match prior {
            Some(state) if state.is_live() => {
                txn.rollback().await.map_err(db_err)?;
                return Ok(Some(state));
            }
            Some(_) => {
                let revived = Self::write_state(
                    &txn,
                    follower_id,
                    followee_id,
                    Some(FollowState::Removed),
                    target,
                    true,
                )
                .await?;

                if !revived {
                    // Revived concurrently; report what is there now.
                    let current = OutgoingFollow::find_by_id((
                        follower_id.to_string(),
                        followee_id.to_string(),
                    ))
                    .one(&txn)
                    .await
                    .map_err(db_err)?
                    .map(|edge| edge.state);
                    txn.rollback().await.map_err(db_err)?;
                    return Ok(current);
                }
            }
            None => {
                let now = edge_timestamp();
                let accepted_at = (target == FollowState::Active).then_some(now);

                outgoing_follow::ActiveModel {
                    follower_id: Set(follower_id.to_string()),
                    followee_id: Set(followee_id.to_string()),
                    state: Set(target),
                    created_at: Set(now),
                    accepted_at: Set(accepted_at),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await
                .map_err(map_db_err)?;

                incoming_follow::ActiveModel {
                    followee_id: Set(followee_id.to_string()),
                    follower_id: Set(follower_id.to_string()),
                    state: Set(target),
                    created_at: Set(now),
                    accepted_at: Set(accepted_at),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await
                .map_err(map_db_err)?;
            }
        }

        txn.commit().await.map_err(db_err)?;

        debug!(
            follower_id = %follower_id,
            followee_id = %followee_id,
            state = ?target,
            prior = ?prior,
            "Follow edge written"
        );

        Ok(prior)
    }

    /// Set the state of an existing edge in both tables.
    ///
    /// Returns `false` if the pair has no edge.
    pub async fn set_state(
        &self,
        follower_id: &str,
        followee_id: &str,
        new_state: FollowState,
    ) -> AppResult<bool> {
        let txn = self.db.begin().await.map_err(db_err)?;
        let updated = match Self::write_state(&txn, follower_id, followee_id, None, new_state, false)
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                txn.rollback().await.map_err(db_err)?;
                return Err(e);
            }
        };
        txn.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    /// Move an edge from `expected` to `new_state` in both tables.
    ///
    /// Returns `false` (and writes nothing) if the edge is not currently in
    /// `expected`. Concurrent callers racing on the same transition see exactly
    /// one `true`.
    pub async fn transition(
        &self,
        follower_id: &str,
        followee_id: &str,
        expected: FollowState,
        new_state: FollowState,
    ) -> AppResult<bool> {
        let txn = self.db.begin().await.map_err(db_err)?;
        let updated = match Self::write_state(
            &txn,
            follower_id,
            followee_id,
            Some(expected),
            new_state,
            false,
        )
        .await
        {
            Ok(updated) => updated,
            Err(e) => {
                txn.rollback().await.map_err(db_err)?;
                return Err(e);
            }
        };

        if updated {
            txn.commit().await.map_err(db_err)?;
        } else {
            txn.rollback().await.map_err(db_err)?;
        }

        Ok(updated)
    }

    async fn write_state(
        txn: &DatabaseTransaction,
        follower_id: &str,
        followee_id: &str,
        expected: Option<FollowState>,
        new_state: FollowState,
        reset_created_at: bool,
    ) -> AppResult<bool> {
        let now = edge_timestamp();

        let mut outgoing = outgoing_follow::ActiveModel {
            state: Set(new_state),
            updated_at: Set(now),
            ..Default::default()
        };
        let mut incoming = incoming_follow::ActiveModel {
            state: Set(new_state),
            updated_at: Set(now),
            ..Default::default()
        };

        if new_state == FollowState::Active {
            outgoing.accepted_at = Set(Some(now));
            incoming.accepted_at = Set(Some(now));
        } else if reset_created_at {
            outgoing.accepted_at = Set(None);
            incoming.accepted_at = Set(None);
        }
        if reset_created_at {
            outgoing.created_at = Set(now);
            incoming.created_at = Set(now);
        }

        let mut outgoing_query = OutgoingFollow::update_many()
            .set(outgoing)
            .filter(outgoing_follow::Column::FollowerId.eq(follower_id))
            .filter(outgoing_follow::Column::FolloweeId.eq(followee_id));
        let mut incoming_query = IncomingFollow::update_many()
            .set(incoming)
            .filter(incoming_follow::Column::FolloweeId.eq(followee_id))
            .filter(incoming_follow::Column::FollowerId.eq(follower_id));

        if let Some(expected) = expected {
            outgoing_query = outgoing_query.filter(outgoing_follow::Column::State.eq(expected));
            incoming_query = incoming_query.filter(incoming_follow::Column::State.eq(expected));
        }

        let outgoing_rows = outgoing_query.exec(txn).await.map_err(db_err)?.rows_affected;
        if outgoing_rows == 0 {
            return Ok(false);
        }

        let incoming_rows = incoming_query.exec(txn).await.map_err(db_err)?.rows_affected;
        if incoming_rows != outgoing_rows {
            error!(
                follower_id = %follower_id,
                followee_id = %followee_id,
                outgoing_rows,
                incoming_rows,
                "Follow edge indexes disagree, rolling back"
            );
            return Err(AppError::Internal(format!(
                "Follow edge indexes disagree for {follower_id} -> {followee_id}"
            )));
        }

        Ok(true)
    }

    /// Point read of an edge against one table.
    pub async fn find(
        &self,
        index: EdgeIndex,
        follower_id: &str,
        followee_id: &str,
    ) -> AppResult<Option<FollowEdge>> {
        match index {
            EdgeIndex::ByFollower => OutgoingFollow::find_by_id((
                follower_id.to_string(),
                followee_id.to_string(),
            ))
            .one(self.db.as_ref())
            .await
            .map(|m| m.map(FollowEdge::from))
            .map_err(db_err),
            EdgeIndex::ByFollowee => IncomingFollow::find_by_id((
                followee_id.to_string(),
                follower_id.to_string(),
            ))
            .one(self.db.as_ref())
            .await
            .map(|m| m.map(FollowEdge::from))
            .map_err(db_err),
        }
    }

    /// Whether the pair has an edge in `state`, read from one table.
    pub async fn exists(
        &self,
        index: EdgeIndex,
        follower_id: &str,
        followee_id: &str,
        state: FollowState,
    ) -> AppResult<bool> {
        Ok(self
            .find(index, follower_id, followee_id)
            .await?
            .is_some_and(|edge| edge.state == state))
    }

    /// Current state of the pair, read from the follower table.
    pub async fn state_of(
        &self,
        follower_id: &str,
        followee_id: &str,
    ) -> AppResult<Option<FollowState>> {
        Ok(self
            .find(EdgeIndex::ByFollower, follower_id, followee_id)
            .await?
            .map(|edge| edge.state))
    }

    /// Edges pointing at `user_id` in `state`, newest first.
    pub async fn list_followers(
        &self,
        user_id: &str,
        state: FollowState,
        limit: u64,
        cursor: Option<&EdgeCursor>,
    ) -> AppResult<Vec<FollowEdge>> {
        let mut query = IncomingFollow::find()
            .filter(incoming_follow::Column::FolloweeId.eq(user_id))
            .filter(incoming_follow::Column::State.eq(state));

        if let Some(cursor) = cursor {
            query = query.filter(
                Condition::any()
                    .add(incoming_follow::Column::CreatedAt.lt(cursor.created_at))
                    .add(
                        Condition::all()
                            .add(incoming_follow::Column::CreatedAt.eq(cursor.created_at))
                            .add(incoming_follow::Column::FollowerId.lt(cursor.user_id.as_str())),
                    ),
            );
        }

        query
            .order_by_desc(incoming_follow::Column::CreatedAt)
            .order_by_desc(incoming_follow::Column::FollowerId)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map(|rows| rows.into_iter().map(FollowEdge::from).collect())
            .map_err(db_err)
    }

    /// Edges from `user_id` in `state`, newest first.
    pub async fn list_following(
        &self,
        user_id: &str,
        state: FollowState,
        limit: u64,
        cursor: Option<&EdgeCursor>,
    ) -> AppResult<Vec<FollowEdge>> {
        let mut query = OutgoingFollow::find()
            .filter(outgoing_follow::Column::FollowerId.eq(user_id))
            .filter(outgoing_follow::Column::State.eq(state));

        if let Some(cursor) = cursor {
            query = query.filter(
                Condition::any()
                    .add(outgoing_follow::Column::CreatedAt.lt(cursor.created_at))
                    .add(
                        Condition::all()
                            .add(outgoing_follow::Column::CreatedAt.eq(cursor.created_at))
                            .add(outgoing_follow::Column::FolloweeId.lt(cursor.user_id.as_str())),
                    ),
            );
        }

        query
            .order_by_desc(outgoing_follow::Column::CreatedAt)
            .order_by_desc(outgoing_follow::Column::FolloweeId)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map(|rows| rows.into_iter().map(FollowEdge::from).collect())
            .map_err(db_err)
    }

    /// All follower ids of `user_id` in `state`, without pagination.
    pub async fn follower_ids(&self, user_id: &str, state: FollowState) -> AppResult<Vec<String>> {
        IncomingFollow::find()
            .select_only()
            .column(incoming_follow::Column::FollowerId)
            .filter(incoming_follow::Column::FolloweeId.eq(user_id))
            .filter(incoming_follow::Column::State.eq(state))
            .into_tuple()
            .all(self.db.as_ref())
            .await
            .map_err(db_err)
    }

    /// Count edges pointing at `user_id` in `state`.
    pub async fn count_followers(&self, user_id: &str, state: FollowState) -> AppResult<u64> {
        IncomingFollow::find()
            .filter(incoming_follow::Column::FolloweeId.eq(user_id))
            .filter(incoming_follow::Column::State.eq(state))
            .count(self.db.as_ref())
            .await
            .map_err(db_err)
    }

    /// Count edges from `user_id` in `state`.
    pub async fn count_following(&self, user_id: &str, state: FollowState) -> AppResult<u64> {
        OutgoingFollow::find()
            .filter(outgoing_follow::Column::FollowerId.eq(user_id))
            .filter(outgoing_follow::Column::State.eq(state))
            .count(self.db.as_ref())
            .await
            .map_err(db_err)
    }

    /// Count live (pending or active) edges from `user_id`.
    pub async fn count_open_following(&self, user_id: &str) -> AppResult<u64> {
        OutgoingFollow::find()
            .filter(outgoing_follow::Column::FollowerId.eq(user_id))
            .filter(
                outgoing_follow::Column::State.is_in([FollowState::Pending, FollowState::Active]),
            )
            .count(self.db.as_ref())
            .await
            .map_err(db_err)
    }

    /// Take one follow action from `user_id`'s quota for `day`.
    ///
    /// A single conditional upsert, so concurrent follows cannot overshoot.
    /// Returns `false`, writing nothing, once `limit` actions were taken.
    pub async fn consume_follow_quota(
        &self,
        user_id: &str,
        day: NaiveDate,
        limit: u64,
    ) -> AppResult<bool> {
        let now = Utc::now().fixed_offset();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let column = follow_quota::Column::FollowCount;

        let model = follow_quota::ActiveModel {
            user_id: Set(user_id.to_string()),
            action_date: Set(day),
            follow_count: Set(1),
            updated_at: Set(now),
        };

        let inserted = FollowQuota::insert(model)
            .on_conflict(
                OnConflict::columns([
                    follow_quota::Column::UserId,
                    follow_quota::Column::ActionDate,
                ])
                .value(column, Expr::col((FollowQuota, column)).add(1))
                .value(follow_quota::Column::UpdatedAt, Expr::value(now))
                .action_and_where(Expr::col((FollowQuota, column)).lt(limit))
                .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(db_err)?;

        Ok(inserted == 1)
    }

    /// Give back an action whose follow did not go through.
    pub async fn release_follow_quota(&self, user_id: &str, day: NaiveDate) -> AppResult<()> {
        FollowQuota::update_many()
            .col_expr(
                follow_quota::Column::FollowCount,
                Expr::col(follow_quota::Column::FollowCount).sub(1),
            )
            .filter(follow_quota::Column::UserId.eq(user_id))
            .filter(follow_quota::Column::ActionDate.eq(day))
            .filter(follow_quota::Column::FollowCount.gt(0))
            .exec(self.db.as_ref())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Follow actions `user_id` took on `day`.
    pub async fn follow_quota_used(&self, user_id: &str, day: NaiveDate) -> AppResult<u64> {
        let row = FollowQuota::find_by_id((user_id.to_string(), day))
            .one(self.db.as_ref())
            .await
            .map_err(db_err)?;
        Ok(row.map_or(0, |row| u64::try_from(row.follow_count).unwrap_or(0)))
    }

    /// Delete quota rows of days before `day`.
    pub async fn purge_follow_quota(&self, day: NaiveDate) -> AppResult<u64> {
        FollowQuota::delete_many()
            .filter(follow_quota::Column::ActionDate.lt(day))
            .exec(self.db.as_ref())
            .await
            .map(|result| result.rows_affected)
            .map_err(db_err)
    }

    /// Delete removed edges last updated before `cutoff`, from both tables.
    pub async fn purge_removed(&self, cutoff: DateTime<FixedOffset>) -> AppResult<u64> {
        let txn = self.db.begin().await.map_err(db_err)?;

        let outgoing = OutgoingFollow::delete_many()
            .filter(outgoing_follow::Column::State.eq(FollowState::Removed))
            .filter(outgoing_follow::Column::UpdatedAt.lt(cutoff))
            .exec(&txn)
            .await
            .map_err(db_err)?
            .rows_affected;

        let incoming = IncomingFollow::delete_many()
            .filter(incoming_follow::Column::State.eq(FollowState::Removed))
            .filter(incoming_follow::Column::UpdatedAt.lt(cutoff))
            .exec(&txn)
            .await
            .map_err(db_err)?
            .rows_affected;

        if outgoing != incoming {
            error!(outgoing, incoming, "Purge would leave follow indexes disagreeing");
            return Err(AppError::Internal(
                "Follow edge purge touched a different number of rows per index".to_string(),
            ));
        }

        txn.commit().await.map_err(db_err)?;
        Ok(outgoing)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_round_trip() {
        let cursor = EdgeCursor {
            created_at: edge_timestamp(),
            user_id: "user_with_underscore".to_string(),
        };

        let decoded = EdgeCursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_cursor_rejects_garbage() {
        assert!(EdgeCursor::decode("nope").is_err());
        assert!(EdgeCursor::decode("abc_user").is_err());
        assert!(EdgeCursor::decode("123_").is_err());
    }
}
