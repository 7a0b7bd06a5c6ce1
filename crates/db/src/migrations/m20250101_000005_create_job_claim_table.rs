//! Create job claim table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(JobClaim::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(JobClaim::JobName).string_len(64).not_null())
                    .col(ColumnDef::new(JobClaim::JobDate).date().not_null())
                    .col(
                        ColumnDef::new(JobClaim::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(JobClaim::CompletedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(JobClaim::Status).string_len(16).not_null())
                    .col(ColumnDef::new(JobClaim::OwnerId).string_len(128).not_null())
                    .col(
                        ColumnDef::new(JobClaim::ItemsProcessed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(JobClaim::Error).text())
                    .primary_key(Index::create().col(JobClaim::JobName).col(JobClaim::JobDate))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(JobClaim::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum JobClaim {
    Table,
    JobName,
    JobDate,
    StartedAt,
    CompletedAt,
    Status,
    OwnerId,
    ItemsProcessed,
    Error,
}
