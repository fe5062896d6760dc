//! Create poll_option table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PollOption::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PollOption::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PollOption::PollId).string().not_null())
                    .col(ColumnDef::new(PollOption::Text).string_len(500).not_null())
                    .col(ColumnDef::new(PollOption::OrderIndex).integer().not_null())
                    .col(
                        ColumnDef::new(PollOption::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_poll_option_poll")
                            .from(PollOption::Table, PollOption::PollId)
                            .to(Poll::Table, Poll::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique constraint on poll_id + order_index
        manager
            .create_index(
                Index::create()
                    .name("idx_poll_option_order_unique")
                    .table(PollOption::Table)
                    .col(PollOption::PollId)
                    .col(PollOption::OrderIndex)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PollOption::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum PollOption {
    Table,
    Id,
    PollId,
    Text,
    OrderIndex,
    CreatedAt,
}

#[derive(Iden)]
enum Poll {
    Table,
    Id,
}
