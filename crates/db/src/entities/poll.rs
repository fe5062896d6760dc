//! Poll entity.

use chrono::Utc;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a poll.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    /// Not yet open for voting.
    #[default]
    #[sea_orm(string_value = "draft")]
    Draft,
    /// Open for voting, subject to expiration.
    #[sea_orm(string_value = "active")]
    Active,
    /// No longer accepting votes.
    #[sea_orm(string_value = "closed")]
    Closed,
}

/// Selection policy of a poll.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    /// One choice.
    #[default]
    #[sea_orm(string_value = "single")]
    Single,
    /// Several choices.
    #[sea_orm(string_value = "multiple")]
    Multiple,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "poll")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub title: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub status: PollStatus,

    pub vote_type: VoteType,

    pub allow_multiple_votes: bool,

    /// Null means unlimited, and only when `allow_multiple_votes` is set
    #[sea_orm(nullable)]
    pub max_votes_per_user: Option<i32>,

    #[sea_orm(nullable)]
    pub expires_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(indexed)]
    pub created_by: String,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Whether `expires_at` lies strictly before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: chrono::DateTime<Utc>) -> bool {
        self.expires_at.as_ref().is_some_and(|exp| *exp < now)
    }

    /// Whether the poll is expired right now.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// The number of vote records one voter may hold on this poll.
    ///
    /// `None` means unlimited.
    #[must_use]
    pub fn effective_vote_limit(&self) -> Option<u32> {
        if self.allow_multiple_votes {
            self.max_votes_per_user.map(|max| max.max(0) as u32)
        } else {
            Some(1)
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::poll_option::Entity")]
    PollOption,

    #[sea_orm(has_many = "super::vote::Entity")]
    Vote,
}

impl Related<super::poll_option::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PollOption.def()
    }
}

impl Related<super::vote::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Vote.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn poll(allow_multiple_votes: bool, max_votes_per_user: Option<i32>) -> Model {
        let now = Utc::now();
        Model {
            id: "p1".to_string(),
            title: "Lunch?".to_string(),
            description: None,
            status: PollStatus::Active,
            vote_type: if allow_multiple_votes {
                VoteType::Multiple
            } else {
                VoteType::Single
            },
            allow_multiple_votes,
            max_votes_per_user,
            expires_at: None,
            created_by: "owner".to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    #[test]
    fn test_effective_vote_limit() {
        assert_eq!(poll(false, None).effective_vote_limit(), Some(1));
        assert_eq!(poll(false, Some(1)).effective_vote_limit(), Some(1));
        assert_eq!(poll(true, Some(3)).effective_vote_limit(), Some(3));
        assert_eq!(poll(true, None).effective_vote_limit(), None);
    }

    #[test]
    fn test_expiry_is_strict() {
        let now = Utc::now();
        let mut p = poll(false, None);
        assert!(!p.is_expired_at(now));

        p.expires_at = Some(now.into());
        assert!(!p.is_expired_at(now));

        p.expires_at = Some((now - Duration::seconds(1)).into());
        assert!(p.is_expired_at(now));
    }
}
