//! Create vote table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Vote::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Vote::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Vote::PollId).string().not_null())
                    .col(ColumnDef::new(Vote::OptionId).string().not_null())
                    .col(ColumnDef::new(Vote::UserId).string().not_null())
                    .col(
                        ColumnDef::new(Vote::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vote_poll")
                            .from(Vote::Table, Vote::PollId)
                            .to(Poll::Table, Poll::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_vote_option")
                            .from(Vote::Table, Vote::OptionId)
                            .to(PollOption::Table, PollOption::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One record per (poll, voter, option)
        manager
            .create_index(
                Index::create()
                    .name("idx_vote_poll_user_option_unique")
                    .table(Vote::Table)
                    .col(Vote::PollId)
                    .col(Vote::UserId)
                    .col(Vote::OptionId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_vote_option_id")
                    .table(Vote::Table)
                    .col(Vote::OptionId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Vote::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Vote {
    Table,
    Id,
    PollId,
    OptionId,
    UserId,
    CreatedAt,
}

#[derive(Iden)]
enum Poll {
    Table,
    Id,
}

#[derive(Iden)]
enum PollOption {
    Table,
    Id,
}
