//! Poll registry service.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use polly_common::{AppError, AppResult, IdGenerator, config::PollConfig};
use polly_db::{
    entities::{
        poll::{self, PollStatus, VoteType},
        poll_option,
    },
    repositories::{PollFilter, PollStoreRef},
};
use serde::{Deserialize, Deserializer};
use tracing::info;
use validator::Validate;

use super::lifecycle;

/// Maximum title length in characters.
pub const MAX_TITLE_LEN: usize = 255;
/// Maximum description length in characters.
pub const MAX_DESCRIPTION_LEN: usize = 1000;
/// Maximum option text length in characters.
pub const MAX_OPTION_TEXT_LEN: usize = 500;
/// Minimum number of options a poll carries.
pub const MIN_OPTIONS: usize = 2;
/// Largest listing offset the store accepts.
pub const MAX_OFFSET: u64 = i64::MAX.unsigned_abs();

/// Input for creating a poll.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollInput {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    #[validate(length(min = 2))]
    pub options: Vec<String>,
    #[serde(default)]
    pub vote_type: VoteType,
    #[serde(default)]
    pub allow_multiple_votes: bool,
    #[validate(range(min = 1))]
    pub max_votes_per_user: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Initial status, `active` unless the poll is saved as a draft.
    pub status: Option<PollStatus>,
}

/// Input for updating a poll. Absent fields are left unchanged.
///
/// For nullable fields, an explicit `null` clears the value.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePollInput {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub options: Option<Vec<String>>,
    pub vote_type: Option<VoteType>,
    pub allow_multiple_votes: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub max_votes_per_user: Option<Option<i32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub status: Option<PollStatus>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Input for listing polls.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPollsInput {
    pub status: Option<PollStatus>,
    pub search: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// An option as shown to readers.
#[derive(Debug, Clone)]
pub struct OptionDetail {
    pub option: poll_option::Model,
    /// Vote count, present when counts were requested.
    pub votes: Option<u64>,
}

/// A poll with its options and derived state.
#[derive(Debug, Clone)]
pub struct PollDetail {
    pub poll: poll::Model,
    pub options: Vec<OptionDetail>,
    pub total_votes: u64,
    pub is_expired: bool,
    pub accepts_votes: bool,
}

/// Service for creating, reading and managing polls.
#[derive(Clone)]
pub struct PollService {
    store: PollStoreRef,
    config: PollConfig,
    id_gen: IdGenerator,
}

impl PollService {
    /// Create a new poll service.
    #[must_use]
    pub const fn new(store: PollStoreRef, config: PollConfig) -> Self {
        Self {
            store,
            config,
            id_gen: IdGenerator::new(),
        }
    }

    /// Create a poll with its options in one transaction.
    pub async fn create(&self, user_id: &str, input: CreatePollInput) -> AppResult<PollDetail> {
        if user_id.trim().is_empty() {
            return Err(AppError::Unauthorized);
        }

        input.validate()?;

        let now = Utc::now();
        let title = normalize_title(&input.title)?;
        let description = normalize_description(input.description)?;
        let texts = normalize_options(&input.options)?;
        check_vote_policy(
            input.vote_type,
            input.allow_multiple_votes,
            input.max_votes_per_user,
        )?;
        if let Some(expires_at) = input.expires_at {
            check_expiry(expires_at, now)?;
        }

        let status = input.status.unwrap_or(PollStatus::Active);
        if status == PollStatus::Closed {
            return Err(AppError::Validation(
                "A poll cannot be created closed".to_string(),
            ));
        }

        let poll = poll::Model {
            id: self.id_gen.generate(),
            title,
            description,
            status,
            vote_type: input.vote_type,
            allow_multiple_votes: input.allow_multiple_votes,
            max_votes_per_user: input.max_votes_per_user,
            expires_at: input.expires_at.map(Into::into),
            created_by: user_id.to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        };
        let options = self.build_options(&poll.id, texts, now)?;

        let mut tx = self.store.begin().await?;
        tx.insert_poll(poll.clone(), options.clone()).await?;
        tx.commit().await?;

        info!(poll_id = %poll.id, user_id = %user_id, options = options.len(), "Poll created");

        let counts = HashMap::new();
        Ok(build_detail(poll, options, &counts, true, now))
    }

    /// Get a poll with its options.
    ///
    /// Per-option counts are filled in when `with_counts` is set.
    pub async fn get_poll(&self, poll_id: &str, with_counts: bool) -> AppResult<PollDetail> {
        let poll = self
            .store
            .find_poll(poll_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Poll {poll_id}")))?;

        let options = self.store.find_options(&[poll.id.clone()]).await?;
        let counts = self.store.count_by_option(poll_id).await?;

        Ok(build_detail(poll, options, &counts, with_counts, Utc::now()))
    }

    /// List polls, newest first.
    pub async fn list_polls(&self, input: ListPollsInput) -> AppResult<Vec<PollDetail>> {
        let limit = input
            .limit
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size.max(1));

        let offset = input.offset.unwrap_or(0);
        if offset > MAX_OFFSET {
            return Err(AppError::Validation(format!(
                "offset must be at most {MAX_OFFSET}"
            )));
        }

        let filter = PollFilter {
            status: input.status,
            search: input.search,
            limit,
            offset,
        };

        let polls = self.store.list_polls(&filter).await?;
        if polls.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<String> = polls.iter().map(|p| p.id.clone()).collect();
        let mut options_by_poll: HashMap<String, Vec<poll_option::Model>> = HashMap::new();
        for option in self.store.find_options(&ids).await? {
            options_by_poll
                .entry(option.poll_id.clone())
                .or_default()
                .push(option);
        }
        let totals = self.store.count_by_poll(&ids).await?;

        let now = Utc::now();
        Ok(polls
            .into_iter()
            .map(|poll| {
                let options = options_by_poll.remove(&poll.id).unwrap_or_default();
                let total_votes = totals.get(&poll.id).copied().unwrap_or(0);
                let mut detail = build_detail(poll, options, &HashMap::new(), false, now);
                detail.total_votes = total_votes;
                detail
            })
            .collect())
    }

    /// Update a poll. Only the owner may do this.
    ///
    /// Options can only be replaced while the poll has no votes.
    pub async fn update(
        &self,
        poll_id: &str,
        user_id: &str,
        input: UpdatePollInput,
    ) -> AppResult<PollDetail> {
        if user_id.trim().is_empty() {
            return Err(AppError::Unauthorized);
        }

        input.validate()?;

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let mut poll = tx
            .lock_poll(poll_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Poll {poll_id}")))?;

        if poll.created_by != user_id {
            return Err(AppError::Forbidden("Not the poll owner".to_string()));
        }

        if let Some(title) = input.title {
            poll.title = normalize_title(&title)?;
        }
        if let Some(description) = input.description {
            poll.description = normalize_description(description)?;
        }
        if let Some(vote_type) = input.vote_type {
            poll.vote_type = vote_type;
        }
        if let Some(allow_multiple_votes) = input.allow_multiple_votes {
            poll.allow_multiple_votes = allow_multiple_votes;
        }
        if let Some(max_votes_per_user) = input.max_votes_per_user {
            poll.max_votes_per_user = max_votes_per_user;
        }
        if let Some(expires_at) = input.expires_at {
            if let Some(at) = expires_at {
                check_expiry(at, now)?;
            }
            poll.expires_at = expires_at.map(Into::into);
        }
        check_vote_policy(
            poll.vote_type,
            poll.allow_multiple_votes,
            poll.max_votes_per_user,
        )?;

        if let Some(status) = input.status {
            lifecycle::apply_transition(&mut poll, status, now)?;
        }

        if let Some(texts) = input.options {
            let texts = normalize_options(&texts)?;
            if tx.count_votes(poll_id).await? > 0 {
                return Err(AppError::Validation(
                    "Options cannot be changed once votes have been cast".to_string(),
                ));
            }
            let options = self.build_options(poll_id, texts, now)?;
            tx.replace_options(poll_id, options).await?;
        }

        poll.updated_at = now.into();
        tx.update_poll(poll).await?;
        tx.commit().await?;

        info!(poll_id = %poll_id, user_id = %user_id, "Poll updated");

        self.get_poll(poll_id, true).await
    }

    /// Delete a poll together with its options and votes. Only the owner may do this.
    pub async fn delete(&self, poll_id: &str, user_id: &str) -> AppResult<()> {
        if user_id.trim().is_empty() {
            return Err(AppError::Unauthorized);
        }

        let mut tx = self.store.begin().await?;
        let poll = tx
            .lock_poll(poll_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Poll {poll_id}")))?;

        if poll.created_by != user_id {
            return Err(AppError::Forbidden("Not the poll owner".to_string()));
        }

        tx.delete_poll(poll_id).await?;
        tx.commit().await?;

        info!(poll_id = %poll_id, user_id = %user_id, "Poll deleted");
        Ok(())
    }

    /// Total vote records on a poll.
    pub async fn total_votes(&self, poll_id: &str) -> AppResult<u64> {
        if self.store.find_poll(poll_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Poll {poll_id}")));
        }

        let totals = self.store.count_by_poll(&[poll_id.to_string()]).await?;
        Ok(totals.get(poll_id).copied().unwrap_or(0))
    }

    fn build_options(
        &self,
        poll_id: &str,
        texts: Vec<String>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<poll_option::Model>> {
        let ids = self.id_gen.generate_many(texts.len());
        ids.into_iter()
            .zip(texts)
            .enumerate()
            .map(|(index, (id, text))| {
                let order_index = i32::try_from(index)
                    .map_err(|_| AppError::Validation("Too many options".to_string()))?;
                Ok(poll_option::Model {
                    id,
                    poll_id: poll_id.to_string(),
                    text,
                    order_index,
                    created_at: now.into(),
                })
            })
            .collect()
    }
}

fn build_detail(
    poll: poll::Model,
    options: Vec<poll_option::Model>,
    counts: &HashMap<String, u64>,
    with_counts: bool,
    now: DateTime<Utc>,
) -> PollDetail {
    let total_votes = options
        .iter()
        .map(|o| counts.get(&o.id).copied().unwrap_or(0))
        .sum();

    let options = options
        .into_iter()
        .map(|option| {
            let votes = with_counts.then(|| counts.get(&option.id).copied().unwrap_or(0));
            OptionDetail { option, votes }
        })
        .collect();

    PollDetail {
        is_expired: poll.is_expired_at(now),
        accepts_votes: lifecycle::accepts_votes(&poll, now),
        poll,
        options,
        total_votes,
    }
}

fn normalize_title(title: &str) -> AppResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Title cannot be empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::Validation(format!(
            "Title is too long (max {MAX_TITLE_LEN} chars)"
        )));
    }
    Ok(title.to_string())
}

fn normalize_description(description: Option<String>) -> AppResult<Option<String>> {
    let Some(description) = description else {
        return Ok(None);
    };
    let description = description.trim();
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(AppError::Validation(format!(
            "Description is too long (max {MAX_DESCRIPTION_LEN} chars)"
        )));
    }
    Ok((!description.is_empty()).then(|| description.to_string()))
}

/// Trim option texts and drop blank ones.
///
/// At least two options must remain, none longer than the text limit, and no
/// two equal ignoring case.
pub fn normalize_options(texts: &[String]) -> AppResult<Vec<String>> {
    let texts: Vec<String> = texts
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect();

    if texts.len() < MIN_OPTIONS {
        return Err(AppError::Validation(format!(
            "Poll must have at least {MIN_OPTIONS} non-empty options"
        )));
    }

    let mut seen = HashSet::new();
    for text in &texts {
        if text.chars().count() > MAX_OPTION_TEXT_LEN {
            return Err(AppError::Validation(format!(
                "Option is too long (max {MAX_OPTION_TEXT_LEN} chars)"
            )));
        }
        if !seen.insert(text.to_lowercase()) {
            return Err(AppError::Validation(format!("Duplicate option: {text}")));
        }
    }

    Ok(texts)
}

/// Check that the selection settings of a poll agree with each other.
pub fn check_vote_policy(
    vote_type: VoteType,
    allow_multiple_votes: bool,
    max_votes_per_user: Option<i32>,
) -> AppResult<()> {
    if allow_multiple_votes && vote_type == VoteType::Single {
        return Err(AppError::Validation(
            "Multiple votes require the multiple vote type".to_string(),
        ));
    }

    match max_votes_per_user {
        Some(max) if max < 1 => Err(AppError::Validation(
            "maxVotesPerUser must be at least 1".to_string(),
        )),
        Some(max) if max > 1 && !allow_multiple_votes => Err(AppError::Validation(
            "maxVotesPerUser above 1 requires allowMultipleVotes".to_string(),
        )),
        _ => Ok(()),
    }
}

fn check_expiry(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> AppResult<()> {
    if expires_at <= now {
        return Err(AppError::Validation(
            "Expiry must be in the future".to_string(),
        ));
    }
    Ok(())
}
