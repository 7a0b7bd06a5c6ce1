//! Create follow quota table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FollowQuota::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(FollowQuota::UserId).string_len(32).not_null())
                    .col(ColumnDef::new(FollowQuota::ActionDate).date().not_null())
                    .col(
                        ColumnDef::new(FollowQuota::FollowCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(FollowQuota::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(FollowQuota::UserId)
                            .col(FollowQuota::ActionDate),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FollowQuota::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum FollowQuota {
    Table,
    UserId,
    ActionDate,
    FollowCount,
    UpdatedAt,
}
