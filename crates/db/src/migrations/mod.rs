//! Database migrations.
//!
//! Schema migrations for the database.

#![allow(missing_docs)]

use sea_orm_migration::prelude::*;

mod m20250101_000001_create_user_table;
mod m20250101_000002_create_follow_tables;
mod m20250101_000003_create_follow_counter_table;
mod m20250101_000004_create_notification_tables;
mod m20250101_000005_create_job_claim_table;
mod m20250101_000006_create_follow_quota_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_user_table::Migration),
            Box::new(m20250101_000002_create_follow_tables::Migration),
            Box::new(m20250101_000003_create_follow_counter_table::Migration),
            Box::new(m20250101_000004_create_notification_tables::Migration),
            Box::new(m20250101_000005_create_job_claim_table::Migration),
            Box::new(m20250101_000006_create_follow_quota_table::Migration),
        ]
    }
}
