//! Read-only view of user identities.

use std::sync::Arc;

use async_trait::async_trait;
use habitgraph_common::AppResult;
use habitgraph_db::entities::user;
use habitgraph_db::repositories::UserRepository;
use serde::{Deserialize, Serialize};

/// The parts of a user the graph and notification layers need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub is_private: bool,
}

impl From<user::Model> for UserIdentity {
    fn from(m: user::Model) -> Self {
        Self {
            id: m.id,
            username: m.username,
            avatar_url: m.avatar_url,
            is_private: m.is_private,
        }
    }
}

/// Lookup of users owned by the account system.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find a user by id.
    async fn find_user(&self, user_id: &str) -> AppResult<Option<UserIdentity>>;
}

/// Type alias for a shared user directory.
pub type UserDirectoryService = Arc<dyn UserDirectory>;

/// User directory backed by the `user` table.
#[derive(Clone)]
pub struct DbUserDirectory {
    user_repo: UserRepository,
}

impl DbUserDirectory {
    #[must_use]
    pub const fn new(user_repo: UserRepository) -> Self {
        Self { user_repo }
    }
}

#[async_trait]
impl UserDirectory for DbUserDirectory {
    async fn find_user(&self, user_id: &str) -> AppResult<Option<UserIdentity>> {
        Ok(self
            .user_repo
            .find_by_id(user_id)
            .await?
            .map(UserIdentity::from))
    }
}
