//! Following service.

use chrono::{Duration, Utc};
use habitgraph_common::config::GraphConfig;
use habitgraph_common::{AppError, AppResult};
use habitgraph_db::entities::FollowState;
use habitgraph_db::repositories::{
    CounterField, DedupeKey, EdgeCursor, EdgeIndex, FollowEdge, FollowEdgeRepository,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::services::counter::{CounterDelta, CounterLedger};
use crate::services::notification::NotificationDispatcher;
use crate::services::notification_payload::NotificationPayload;
use crate::services::relationship_cache::{Relationship, RelationshipCache};
use crate::services::user_directory::{UserDirectoryService, UserIdentity};

const MAX_PAGE_SIZE: u64 = 100;

/// Result of a follow call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowResult {
    /// The edge is active.
    Following,
    /// The target is private; a request awaits approval.
    Pending,
}

/// One page of a follower or following listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowPage {
    pub edges: Vec<FollowEdge>,
    /// Cursor for the next page, `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Following service for business logic.
#[derive(Clone)]
pub struct FollowingService {
    edge_repo: FollowEdgeRepository,
    users: UserDirectoryService,
    counters: CounterLedger,
    cache: RelationshipCache,
    notifications: Option<NotificationDispatcher>,
    config: GraphConfig,
}

impl FollowingService {
    /// Create a new following service.
    #[must_use]
    pub fn new(
        edge_repo: FollowEdgeRepository,
        users: UserDirectoryService,
        counters: CounterLedger,
        cache: RelationshipCache,
        config: GraphConfig,
    ) -> Self {
        Self {
            edge_repo,
            users,
            counters,
            cache,
            notifications: None,
            config,
        }
    }

    /// Set the notification dispatcher.
    pub fn set_notifications(&mut self, notifications: NotificationDispatcher) {
        self.notifications = Some(notifications);
    }

    async fn write_follow(
        &self,
        follower_id: &str,
        followee_id: &str,
        target: FollowState,
    ) -> AppResult<()> {
        let limit = self.config.max_following;
        if self.edge_repo.count_open_following(follower_id).await? >= limit {
            return Err(AppError::FollowingLimitReached { limit });
        }

        // A concurrent follow of the same pair loses here.
        let prior = self
            .edge_repo
            .upsert(follower_id, followee_id, target)
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => AppError::AlreadyFollowing,
                other => other,
            })?;
        if prior.is_some_and(FollowState::is_live) {
            return Err(AppError::AlreadyFollowing);
        }
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> AppResult<UserIdentity> {
        self.users
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(user_id.to_string()))
    }

    /// Follow a user.
    ///
    /// Following a private user creates a pending request instead.
    pub async fn follow(&self, follower_id: &str, followee_id: &str) -> AppResult<FollowResult> {
        if follower_id == followee_id {
            return Err(AppError::SelfFollow);
        }

        let follower = self.get_user(follower_id).await?;
        let followee = self.get_user(followee_id).await?;

        if self
            .edge_repo
            .state_of(follower_id, followee_id)
            .await?
            .is_some_and(FollowState::is_live)
        {
            return Err(AppError::AlreadyFollowing);
        }

        let today = Utc::now().date_naive();
        let limit = self.config.daily_follow_limit;
        if !self
            .edge_repo
            .consume_follow_quota(follower_id, today, limit)
            .await?
        {
            return Err(AppError::FollowRateLimited { limit });
        }

        let target = if followee.is_private {
            FollowState::Pending
        } else {
            FollowState::Active
        };

        if let Err(e) = self.write_follow(follower_id, followee_id, target).await {
            // The action did not happen, so it does not count against today.
            if let Err(release_err) = self
                .edge_repo
                .release_follow_quota(follower_id, today)
                .await
            {
                tracing::warn!(error = %release_err, follower = %follower_id, "Failed to release follow quota");
            }
            return Err(e);
        }

        self.cache.invalidate_pair(follower_id, followee_id).await;

        let deltas = match target {
            FollowState::Pending => vec![CounterDelta::new(
                followee_id,
                CounterField::PendingRequests,
                1,
            )],
            _ => vec![
                CounterDelta::new(followee_id, CounterField::Followers, 1),
                CounterDelta::new(follower_id, CounterField::Following, 1),
            ],
        };
        self.publish_counters(deltas).await;

        if let Some(ref notifications) = self.notifications {
            let result = if target == FollowState::Pending {
                notifications
                    .create(
                        followee_id,
                        NotificationPayload::FollowRequest {
                            actor_id: follower.id.clone(),
                            actor_username: follower.username.clone(),
                        },
                    )
                    .await
                    .map(|_| ())
            } else {
                let key = DedupeKey::new(followee_id, follower_id, "follow", "user", followee_id);
                notifications
                    .create_once(
                        &key,
                        followee_id,
                        NotificationPayload::Follow {
                            actor_id: follower.id.clone(),
                            actor_username: follower.username.clone(),
                        },
                    )
                    .await
                    .map(|_| ())
            };
            // The edge is already committed; the follow stands without it.
            if let Err(e) = result {
                tracing::error!(
                    error = %e,
                    follower = %follower_id,
                    followee = %followee_id,
                    "Failed to create follow notification"
                );
            }
        }

        info!(follower = %follower_id, followee = %followee_id, state = ?target, "Followed user");

        Ok(if target == FollowState::Pending {
            FollowResult::Pending
        } else {
            FollowResult::Following
        })
    }

    /// Accept a pending follow request.
    pub async fn accept(&self, followee_id: &str, follower_id: &str) -> AppResult<()> {
        if !self
            .edge_repo
            .transition(
                follower_id,
                followee_id,
                FollowState::Pending,
                FollowState::Active,
            )
            .await?
        {
            return Err(AppError::NoPendingRequest);
        }

        self.cache.invalidate_pair(follower_id, followee_id).await;
        self.publish_counters(vec![
            CounterDelta::new(followee_id, CounterField::PendingRequests, -1),
            CounterDelta::new(followee_id, CounterField::Followers, 1),
            CounterDelta::new(follower_id, CounterField::Following, 1),
        ])
        .await;

        if let Some(ref notifications) = self.notifications {
            match self.users.find_user(followee_id).await {
                Ok(Some(followee)) => {
                    if let Err(e) = notifications
                        .create(
                            follower_id,
                            NotificationPayload::FollowAccepted {
                                actor_id: followee.id,
                                actor_username: followee.username,
                            },
                        )
                        .await
                    {
                        tracing::warn!(error = %e, "Failed to create follow accepted notification");
                    }
                }
                Ok(None) => debug!(followee = %followee_id, "Followee vanished before notification"),
                Err(e) => tracing::warn!(error = %e, "Failed to look up followee"),
            }
        }

        info!(follower = %follower_id, followee = %followee_id, "Accepted follow request");
        Ok(())
    }

    /// Decline a pending follow request.
    pub async fn decline(&self, followee_id: &str, follower_id: &str) -> AppResult<()> {
        if !self
            .edge_repo
            .transition(
                follower_id,
                followee_id,
                FollowState::Pending,
                FollowState::Removed,
            )
            .await?
        {
            return Err(AppError::NoPendingRequest);
        }

        self.cache.invalidate_pair(follower_id, followee_id).await;
        self.publish_counters(vec![CounterDelta::new(
            followee_id,
            CounterField::PendingRequests,
            -1,
        )])
        .await;

        info!(follower = %follower_id, followee = %followee_id, "Declined follow request");
        Ok(())
    }

    /// Unfollow a user, or cancel a pending request to them.
    pub async fn unfollow(&self, follower_id: &str, followee_id: &str) -> AppResult<()> {
        let deltas = if self
            .edge_repo
            .transition(
                follower_id,
                followee_id,
                FollowState::Active,
                FollowState::Removed,
            )
            .await?
        {
            vec![
                CounterDelta::new(followee_id, CounterField::Followers, -1),
                CounterDelta::new(follower_id, CounterField::Following, -1),
            ]
        } else if self
            .edge_repo
            .transition(
                follower_id,
                followee_id,
                FollowState::Pending,
                FollowState::Removed,
            )
            .await?
        {
            vec![CounterDelta::new(
                followee_id,
                CounterField::PendingRequests,
                -1,
            )]
        } else {
            return Err(AppError::NotFollowing);
        };

        self.cache.invalidate_pair(follower_id, followee_id).await;
        self.publish_counters(deltas).await;

        info!(follower = %follower_id, followee = %followee_id, "Unfollowed user");
        Ok(())
    }

    /// Remove one of the caller's followers.
    pub async fn remove_follower(&self, followee_id: &str, follower_id: &str) -> AppResult<()> {
        if !self
            .edge_repo
            .transition(
                follower_id,
                followee_id,
                FollowState::Active,
                FollowState::Removed,
            )
            .await?
        {
            return Err(AppError::NotFollowing);
        }

        self.cache.invalidate_pair(follower_id, followee_id).await;
        self.publish_counters(vec![
            CounterDelta::new(followee_id, CounterField::Followers, -1),
            CounterDelta::new(follower_id, CounterField::Following, -1),
        ])
        .await;

        info!(follower = %follower_id, followee = %followee_id, "Removed follower");
        Ok(())
    }

    /// How `viewer_id` relates to `target_id`.
    pub async fn relationship(&self, viewer_id: &str, target_id: &str) -> AppResult<Relationship> {
        if let Some(relationship) = self.cache.get_relationship(viewer_id, target_id).await {
            return Ok(relationship);
        }

        let outgoing = self.edge_repo.state_of(viewer_id, target_id).await?;
        let relationship = match outgoing {
            Some(FollowState::Active) => Relationship::Following,
            Some(FollowState::Pending) => Relationship::Pending,
            _ => {
                if self
                    .edge_repo
                    .exists(
                        EdgeIndex::ByFollowee,
                        target_id,
                        viewer_id,
                        FollowState::Active,
                    )
                    .await?
                {
                    Relationship::FollowedBy
                } else {
                    Relationship::None
                }
            }
        };

        self.cache
            .put_relationship(viewer_id, target_id, relationship)
            .await;
        Ok(relationship)
    }

    async fn ensure_visible(&self, viewer_id: &str, user_id: &str) -> AppResult<()> {
        let user = self.get_user(user_id).await?;
        if !user.is_private || viewer_id == user_id {
            return Ok(());
        }

        if self
            .edge_repo
            .exists(
                EdgeIndex::ByFollower,
                viewer_id,
                user_id,
                FollowState::Active,
            )
            .await?
        {
            Ok(())
        } else {
            Err(AppError::PrivateAccount)
        }
    }

    /// Active followers of `user_id`, newest first.
    pub async fn followers(
        &self,
        viewer_id: &str,
        user_id: &str,
        limit: u64,
        cursor: Option<&str>,
    ) -> AppResult<FollowPage> {
        self.ensure_visible(viewer_id, user_id).await?;
        self.follower_page(user_id, FollowState::Active, limit, cursor)
            .await
    }

    /// Users `user_id` actively follows, newest first.
    pub async fn following(
        &self,
        viewer_id: &str,
        user_id: &str,
        limit: u64,
        cursor: Option<&str>,
    ) -> AppResult<FollowPage> {
        self.ensure_visible(viewer_id, user_id).await?;

        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let cursor = cursor.map(EdgeCursor::decode).transpose()?;
        let edges = self
            .edge_repo
            .list_following(user_id, FollowState::Active, limit, cursor.as_ref())
            .await?;

        let next_cursor = next_cursor(&edges, limit, |edge| &edge.followee_id);
        Ok(FollowPage { edges, next_cursor })
    }

    /// Pending requests addressed to `user_id`, newest first.
    pub async fn pending_requests(
        &self,
        user_id: &str,
        limit: u64,
        cursor: Option<&str>,
    ) -> AppResult<FollowPage> {
        self.follower_page(user_id, FollowState::Pending, limit, cursor)
            .await
    }

    async fn follower_page(
        &self,
        user_id: &str,
        state: FollowState,
        limit: u64,
        cursor: Option<&str>,
    ) -> AppResult<FollowPage> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let cursor = cursor.map(EdgeCursor::decode).transpose()?;
        let edges = self
            .edge_repo
            .list_followers(user_id, state, limit, cursor.as_ref())
            .await?;

        let next_cursor = next_cursor(&edges, limit, |edge| &edge.follower_id);
        Ok(FollowPage { edges, next_cursor })
    }

    /// Delete removed edges last changed more than `retention` ago.
    ///
    /// Follow quota rows of past days go with them.
    pub async fn purge_removed(&self, retention: Duration) -> AppResult<u64> {
        let now = Utc::now();
        let purged = self
            .edge_repo
            .purge_removed((now - retention).fixed_offset())
            .await?;
        let quotas = self.edge_repo.purge_follow_quota(now.date_naive()).await?;

        info!(
            purged,
            quotas,
            retention_days = retention.num_days(),
            "Purged removed follow edges"
        );
        Ok(purged)
    }

    async fn publish_counters(&self, deltas: Vec<CounterDelta>) {
        if let Err(e) = self.counters.publish(deltas).await {
            tracing::warn!(error = %e, "Failed to publish counter deltas");
        }
    }
}

fn next_cursor(
    edges: &[FollowEdge],
    limit: u64,
    counterpart: impl Fn(&FollowEdge) -> &String,
) -> Option<String> {
    if (edges.len() as u64) < limit {
        return None;
    }
    edges
        .last()
        .map(|edge| EdgeCursor::after(edge, counterpart(edge)).encode())
}
