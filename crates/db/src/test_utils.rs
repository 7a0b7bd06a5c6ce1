//! Test utilities for database operations.
//!
//! [`TestDatabase`] is an in-memory SQLite database with every migration
//! applied. The pool holds exactly one connection, which keeps the in-memory
//! database alive for the lifetime of the handle.
//!
//! Requires the `test-utils` feature (the SQLite driver) at runtime.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr, EntityTrait, Set};
use sea_orm_migration::MigratorTrait;
use tracing::debug;

use crate::entities::{User, user};
use crate::migrations::Migrator;

/// A migrated, throwaway database.
pub struct TestDatabase {
    /// Shared connection, ready to hand to repositories.
    pub conn: Arc<DatabaseConnection>,
}

impl TestDatabase {
    /// Create a fresh in-memory database and run all migrations.
    pub async fn new() -> Result<Self, DbErr> {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(3600))
            .max_lifetime(Duration::from_secs(3600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;
        Migrator::up(&conn, None).await?;

        debug!("Created in-memory test database");

        Ok(Self {
            conn: Arc::new(conn),
        })
    }

    /// Get the database connection.
    #[must_use]
    pub fn connection(&self) -> Arc<DatabaseConnection> {
        Arc::clone(&self.conn)
    }

    /// Insert a user row.
    pub async fn seed_user(&self, id: &str, is_private: bool) -> Result<(), DbErr> {
        let model = user::ActiveModel {
            id: Set(id.to_string()),
            username: Set(format!("user_{id}")),
            avatar_url: Set(Some(format!("/avatars/{id}.png"))),
            is_private: Set(is_private),
            created_at: Set(Utc::now().into()),
        };

        User::insert(model)
            .exec_without_returning(self.conn.as_ref())
            .await?;
        Ok(())
    }

    /// Insert several public users.
    pub async fn seed_users(&self, ids: &[&str]) -> Result<(), DbErr> {
        for id in ids {
            self.seed_user(id, false).await?;
        }
        Ok(())
    }
}
