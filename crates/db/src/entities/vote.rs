//! Vote record entity.
//!
//! One row per (poll, voter, option). Rows are appended and never updated.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vote")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub poll_id: String,

    pub option_id: String,

    /// Voter who cast the vote
    #[sea_orm(indexed)]
    pub user_id: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::poll::Entity",
        from = "Column::PollId",
        to = "super::poll::Column::Id",
        on_delete = "Cascade"
    )]
    Poll,

    #[sea_orm(
        belongs_to = "super::poll_option::Entity",
        from = "Column::OptionId",
        to = "super::poll_option::Column::Id",
        on_delete = "Cascade"
    )]
    PollOption,
}

impl Related<super::poll::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Poll.def()
    }
}

impl Related<super::poll_option::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PollOption.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
