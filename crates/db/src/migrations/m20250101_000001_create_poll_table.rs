//! Create poll table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Poll::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Poll::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Poll::Title).string_len(255).not_null())
                    .col(ColumnDef::new(Poll::Description).text().null())
                    .col(
                        ColumnDef::new(Poll::Status)
                            .string_len(16)
                            .not_null()
                            .default("draft"),
                    )
                    .col(
                        ColumnDef::new(Poll::VoteType)
                            .string_len(16)
                            .not_null()
                            .default("single"),
                    )
                    .col(
                        ColumnDef::new(Poll::AllowMultipleVotes)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Poll::MaxVotesPerUser).integer().null())
                    .col(
                        ColumnDef::new(Poll::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Poll::CreatedBy).string().not_null())
                    .col(
                        ColumnDef::new(Poll::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Poll::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_poll_created_by")
                    .table(Poll::Table)
                    .col(Poll::CreatedBy)
                    .to_owned(),
            )
            .await?;

        // Listings filter by status and sort by creation time
        manager
            .create_index(
                Index::create()
                    .name("idx_poll_status_created_at")
                    .table(Poll::Table)
                    .col(Poll::Status)
                    .col(Poll::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Poll::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Poll {
    Table,
    Id,
    Title,
    Description,
    Status,
    VoteType,
    AllowMultipleVotes,
    MaxVotesPerUser,
    ExpiresAt,
    CreatedBy,
    CreatedAt,
    UpdatedAt,
}
