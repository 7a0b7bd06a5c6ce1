//! Notification service.
//!
//! A notification is persisted first, then pushed to the recipient's live
//! connections. When nobody is connected, or the publish fails or times out,
//! the serialized notification is parked in the recipient's pending list and
//! handed over on the next connect. Push delivery is best-effort.

use std::sync::Arc;

use chrono::{Duration, Utc};
use habitgraph_common::config::NotificationConfig;
use habitgraph_common::{AppError, AppResult, IdGenerator};
use habitgraph_db::entities::notification;
use habitgraph_db::repositories::{DedupeKey, NotificationRepository};
use sea_orm::Set;
use tracing::{debug, info, warn};

use crate::services::notification_payload::NotificationPayload;
use crate::services::push::{PushGateway, PushMessage};
use crate::services::realtime::RealtimeChannelService;
use crate::services::relationship_cache::RelationshipCache;

/// Notification dispatcher.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notification_repo: NotificationRepository,
    cache: RelationshipCache,
    realtime: Option<RealtimeChannelService>,
    push: Option<Arc<PushGateway>>,
    config: NotificationConfig,
    id_gen: IdGenerator,
}

impl NotificationDispatcher {
    /// Create a new dispatcher.
    #[must_use]
    pub fn new(
        notification_repo: NotificationRepository,
        cache: RelationshipCache,
        config: NotificationConfig,
    ) -> Self {
        Self {
            notification_repo,
            cache,
            realtime: None,
            push: None,
            config,
            id_gen: IdGenerator::new(),
        }
    }

    /// Set the real-time channel.
    pub fn set_realtime(&mut self, realtime: RealtimeChannelService) {
        self.realtime = Some(realtime);
    }

    /// Set the push gateway.
    pub fn set_push_gateway(&mut self, push: Arc<PushGateway>) {
        self.push = Some(push);
    }

    fn build(&self, user_id: &str, payload: &NotificationPayload) -> AppResult<notification::ActiveModel> {
        let metadata = serde_json::to_string(payload)
            .map_err(|e| AppError::Internal(format!("Failed to encode notification payload: {e}")))?;

        Ok(notification::ActiveModel {
            id: Set(self.id_gen.generate()),
            user_id: Set(user_id.to_string()),
            kind: Set(payload.kind()),
            title: Set(payload.title()),
            body: Set(payload.body()),
            metadata: Set(metadata),
            created_at: Set(Utc::now().into()),
            read_at: Set(None),
        })
    }

    /// Persist and deliver a notification.
    pub async fn create(
        &self,
        user_id: &str,
        payload: NotificationPayload,
    ) -> AppResult<notification::Model> {
        let model = self
            .notification_repo
            .create(self.build(user_id, &payload)?)
            .await?;

        self.deliver(&model, &payload).await;
        Ok(model)
    }

    /// Persist and deliver a notification at most once per `key`.
    ///
    /// Returns `None` when the key was claimed before; nothing is written or
    /// delivered in that case.
    pub async fn create_once(
        &self,
        key: &DedupeKey,
        user_id: &str,
        payload: NotificationPayload,
    ) -> AppResult<Option<notification::Model>> {
        let Some(model) = self
            .notification_repo
            .create_deduplicated(key, self.build(user_id, &payload)?)
            .await?
        else {
            debug!(
                user_id = %user_id,
                kind = %key.kind,
                entity_key = %key.entity_key,
                "Notification already sent for this key"
            );
            return Ok(None);
        };

        self.deliver(&model, &payload).await;
        Ok(Some(model))
    }

    async fn deliver(&self, model: &notification::Model, payload: &NotificationPayload) {
        self.cache.invalidate_unread(&model.user_id).await;
        self.fan_out(model).await;
        self.enqueue_push(model, payload);
    }

    async fn fan_out(&self, model: &notification::Model) {
        let Some(ref realtime) = self.realtime else {
            return;
        };

        let message = match serde_json::to_string(model) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, notification_id = %model.id, "Failed to encode notification");
                return;
            }
        };

        let delivered = match tokio::time::timeout(
            self.config.fanout_timeout(),
            realtime.publish(&model.user_id, &message),
        )
        .await
        {
            Ok(Ok(receivers)) => receivers > 0,
            Ok(Err(e)) => {
                warn!(error = %e, user_id = %model.user_id, "Real-time publish failed");
                false
            }
            Err(_) => {
                warn!(user_id = %model.user_id, "Real-time publish timed out");
                false
            }
        };

        if delivered {
            return;
        }

        if let Err(e) = realtime
            .push_pending(&model.user_id, &message, self.config.pending_ttl())
            .await
        {
            warn!(error = %e, user_id = %model.user_id, "Failed to park undelivered notification");
        }
    }

    fn enqueue_push(&self, model: &notification::Model, payload: &NotificationPayload) {
        let Some(ref push) = self.push else {
            return;
        };

        let message = PushMessage {
            message_id: model.id.clone(),
            user_id: model.user_id.clone(),
            kind: model.kind.as_str().to_string(),
            title: model.title.clone(),
            body: model.body.clone(),
            dedupe_key: payload.collapse_key(),
            deep_link: Some(payload.deep_link()),
            data: serde_json::to_value(payload).ok(),
            ttl_seconds: push.default_ttl_secs(),
            created_at: model.created_at.with_timezone(&Utc),
        };

        if let Err(e) = push.enqueue(message) {
            warn!(error = %e, notification_id = %model.id, "Push message not queued");
        }
    }

    /// Messages that could not be delivered while the user was away.
    ///
    /// Call when a user's real-time connection opens. Each message is
    /// returned once.
    pub async fn on_connect(&self, user_id: &str) -> AppResult<Vec<String>> {
        let Some(ref realtime) = self.realtime else {
            return Ok(Vec::new());
        };
        realtime.take_pending(user_id).await
    }

    /// List notifications, newest first.
    pub async fn list(
        &self,
        user_id: &str,
        limit: u64,
        until_id: Option<&str>,
        unread_only: bool,
    ) -> AppResult<Vec<notification::Model>> {
        self.notification_repo
            .find_by_user(user_id, limit.clamp(1, 100), until_id, unread_only)
            .await
    }

    /// Mark notifications as read.
    pub async fn mark_read(&self, user_id: &str, ids: &[String]) -> AppResult<u64> {
        let updated = self.notification_repo.mark_read(user_id, ids).await?;
        self.cache.invalidate_unread(user_id).await;
        Ok(updated)
    }

    /// Mark all notifications as read.
    pub async fn mark_all_read(&self, user_id: &str) -> AppResult<u64> {
        let updated = self.notification_repo.mark_all_read(user_id).await?;
        self.cache.invalidate_unread(user_id).await;
        Ok(updated)
    }

    /// Count unread notifications.
    pub async fn unread_count(&self, user_id: &str) -> AppResult<u64> {
        if let Some(count) = self.cache.get_unread(user_id).await {
            return Ok(count);
        }

        let count = self.notification_repo.count_unread(user_id).await?;
        self.cache.put_unread(user_id, count).await;
        Ok(count)
    }

    /// Delete notifications past their retention.
    ///
    /// Returns the number of rows deleted.
    pub async fn cleanup(&self) -> AppResult<u64> {
        let now = Utc::now();
        let read_cutoff = now - Duration::days(i64::from(self.config.read_retention_days));
        let unread_cutoff = now - Duration::days(i64::from(self.config.unread_retention_days));

        let deleted = self
            .notification_repo
            .cleanup(read_cutoff.fixed_offset(), unread_cutoff.fixed_offset())
            .await?;

        info!(deleted, "Cleaned up expired notifications");
        Ok(deleted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::realtime::{LocalRealtimeChannel, RealtimeChannel};
    use async_trait::async_trait;
    use habitgraph_common::InMemoryCache;
    use habitgraph_common::config::CacheConfig;
    use habitgraph_db::test_utils::TestDatabase;

    fn follow_payload() -> NotificationPayload {
        NotificationPayload::Follow {
            actor_id: "bob".to_string(),
            actor_username: "user_bob".to_string(),
        }
    }

    async fn dispatcher(db: &TestDatabase) -> NotificationDispatcher {
        NotificationDispatcher::new(
            NotificationRepository::new(db.connection()),
            RelationshipCache::new(Arc::new(InMemoryCache::new()), &CacheConfig::default()),
            NotificationConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_connected_user_receives_notification() {
        let db = TestDatabase::new().await.unwrap();
        db.seed_users(&["alice", "bob"]).await.unwrap();

        let channel = LocalRealtimeChannel::default();
        let mut rx = channel.subscribe("alice").await;
        let mut dispatcher = dispatcher(&db).await;
        dispatcher.set_realtime(Arc::new(channel));

        let created = dispatcher.create("alice", follow_payload()).await.unwrap();

        let received: notification::Model = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(received.id, created.id);
        assert!(dispatcher.on_connect("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_user_gets_pending_on_connect() {
        let db = TestDatabase::new().await.unwrap();
        db.seed_users(&["alice", "bob"]).await.unwrap();

        let mut dispatcher = dispatcher(&db).await;
        dispatcher.set_realtime(Arc::new(LocalRealtimeChannel::default()));

        let created = dispatcher.create("alice", follow_payload()).await.unwrap();

        let pending = dispatcher.on_connect("alice").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].contains(&created.id));
        assert!(dispatcher.on_connect("alice").await.unwrap().is_empty());
    }

    struct StalledChannel {
        inner: LocalRealtimeChannel,
    }

    #[async_trait]
    impl RealtimeChannel for StalledChannel {
        async fn publish(&self, _user_id: &str, _payload: &str) -> AppResult<usize> {
            std::future::pending().await
        }

        async fn push_pending(
            &self,
            user_id: &str,
            payload: &str,
            ttl: std::time::Duration,
        ) -> AppResult<()> {
            self.inner.push_pending(user_id, payload, ttl).await
        }

        async fn take_pending(&self, user_id: &str) -> AppResult<Vec<String>> {
            self.inner.take_pending(user_id).await
        }
    }

    #[tokio::test]
    async fn test_timed_out_publish_falls_back_to_pending() {
        let db = TestDatabase::new().await.unwrap();
        db.seed_users(&["alice", "bob"]).await.unwrap();

        let mut dispatcher = dispatcher(&db).await;
        dispatcher.set_realtime(Arc::new(StalledChannel {
            inner: LocalRealtimeChannel::default(),
        }));

        dispatcher.create("alice", follow_payload()).await.unwrap();

        assert_eq!(dispatcher.on_connect("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_once_and_unread_cache() {
        let db = TestDatabase::new().await.unwrap();
        db.seed_users(&["alice", "bob"]).await.unwrap();
        let dispatcher = dispatcher(&db).await;

        let key = DedupeKey::new("alice", "bob", "follow", "user", "alice");
        assert!(
            dispatcher
                .create_once(&key, "alice", follow_payload())
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(dispatcher.unread_count("alice").await.unwrap(), 1);

        assert!(
            dispatcher
                .create_once(&key, "alice", follow_payload())
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(dispatcher.unread_count("alice").await.unwrap(), 1);

        dispatcher.create("alice", follow_payload()).await.unwrap();
        assert_eq!(dispatcher.unread_count("alice").await.unwrap(), 2);

        assert_eq!(dispatcher.mark_all_read("alice").await.unwrap(), 2);
        assert_eq!(dispatcher.unread_count("alice").await.unwrap(), 0);
    }
}
