//! Create the two follow edge index tables.
//!
//! `follow_outgoing` is keyed by follower, `follow_incoming` by followee.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FollowOutgoing::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FollowOutgoing::FollowerId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FollowOutgoing::FolloweeId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FollowOutgoing::State)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FollowOutgoing::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(FollowOutgoing::AcceptedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(FollowOutgoing::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(FollowOutgoing::FollowerId)
                            .col(FollowOutgoing::FolloweeId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_follow_outgoing_follower")
                            .from(FollowOutgoing::Table, FollowOutgoing::FollowerId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_follow_outgoing_followee")
                            .from(FollowOutgoing::Table, FollowOutgoing::FolloweeId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: (follower_id, state, created_at) for "who do I follow" listings
        manager
            .create_index(
                Index::create()
                    .name("idx_follow_outgoing_listing")
                    .table(FollowOutgoing::Table)
                    .col(FollowOutgoing::FollowerId)
                    .col(FollowOutgoing::State)
                    .col(FollowOutgoing::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(FollowIncoming::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FollowIncoming::FolloweeId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FollowIncoming::FollowerId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FollowIncoming::State)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FollowIncoming::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(FollowIncoming::AcceptedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(FollowIncoming::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(FollowIncoming::FolloweeId)
                            .col(FollowIncoming::FollowerId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_follow_incoming_followee")
                            .from(FollowIncoming::Table, FollowIncoming::FolloweeId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_follow_incoming_follower")
                            .from(FollowIncoming::Table, FollowIncoming::FollowerId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: (followee_id, state, created_at) for "who follows me" listings
        manager
            .create_index(
                Index::create()
                    .name("idx_follow_incoming_listing")
                    .table(FollowIncoming::Table)
                    .col(FollowIncoming::FolloweeId)
                    .col(FollowIncoming::State)
                    .col(FollowIncoming::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Index: (state, updated_at) for the tombstone purge pass
        manager
            .create_index(
                Index::create()
                    .name("idx_follow_outgoing_state_updated")
                    .table(FollowOutgoing::Table)
                    .col(FollowOutgoing::State)
                    .col(FollowOutgoing::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FollowIncoming::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(FollowOutgoing::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum FollowOutgoing {
    Table,
    FollowerId,
    FolloweeId,
    State,
    CreatedAt,
    AcceptedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum FollowIncoming {
    Table,
    FolloweeId,
    FollowerId,
    State,
    CreatedAt,
    AcceptedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}
