//! Vote recording service.
//!
//! A submission is validated and recorded inside one store transaction that
//! holds the poll's row lock, so two submissions from the same voter cannot
//! both pass the limit check.

use std::collections::HashSet;

use chrono::Utc;
use polly_common::{AppError, AppResult, IdGenerator};
use polly_db::{
    entities::{poll, poll_option, vote},
    repositories::PollStoreRef,
};
use tracing::{debug, info, warn};

use super::lifecycle;

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    /// Vote records on the poll after this submission.
    pub total_votes: u64,
    /// Options newly recorded by this submission.
    pub recorded: Vec<String>,
}

/// Decide which of the requested options to record.
///
/// Checks run in a fixed order: selection non-empty and known, single-choice
/// rule, then the per-voter limit. Duplicate ids in the request collapse to
/// one, and options the voter already holds are not recorded again.
pub fn plan_ballot(
    poll: &poll::Model,
    options: &[poll_option::Model],
    existing: &[vote::Model],
    requested: &[String],
) -> AppResult<Vec<String>> {
    let mut seen = HashSet::new();
    let selection: Vec<&String> = requested.iter().filter(|id| seen.insert(*id)).collect();

    if selection.is_empty() {
        return Err(AppError::InvalidOptions(
            "At least one option must be selected".to_string(),
        ));
    }

    if let Some(unknown) = selection
        .iter()
        .find(|id| !options.iter().any(|o| &o.id == **id))
    {
        return Err(AppError::InvalidOptions(format!(
            "Option {unknown} does not belong to this poll"
        )));
    }

    if !poll.allow_multiple_votes && selection.len() > 1 {
        return Err(AppError::MultipleVotesNotAllowed);
    }

    let held: HashSet<&str> = existing.iter().map(|v| v.option_id.as_str()).collect();
    let fresh: Vec<String> = selection
        .into_iter()
        .filter(|id| !held.contains(id.as_str()))
        .cloned()
        .collect();

    if let Some(limit) = poll.effective_vote_limit() {
        let after = existing.len() + fresh.len();
        if after > limit as usize {
            return Err(AppError::MaxVotesReached { limit });
        }
    }

    Ok(fresh)
}

/// Service for submitting and reading votes.
#[derive(Clone)]
pub struct VoteService {
    store: PollStoreRef,
    id_gen: IdGenerator,
}

impl VoteService {
    /// Create a new vote service.
    #[must_use]
    pub const fn new(store: PollStoreRef) -> Self {
        Self {
            store,
            id_gen: IdGenerator::new(),
        }
    }

    /// Record a voter's selection on a poll.
    ///
    /// Either every newly selected option is recorded or none is. Submitting
    /// options the voter already holds succeeds without adding records.
    pub async fn submit_vote(
        &self,
        poll_id: &str,
        voter_id: &str,
        option_ids: &[String],
    ) -> AppResult<VoteReceipt> {
        if voter_id.trim().is_empty() {
            return Err(AppError::Unauthorized);
        }

        match self.try_submit(poll_id, voter_id, option_ids).await {
            Err(e) if e.is_write_conflict() => {
                warn!(poll_id = %poll_id, voter_id = %voter_id, error = %e, "Vote write conflict, retrying");
                self.try_submit(poll_id, voter_id, option_ids)
                    .await
                    .map_err(|e| match e {
                        AppError::Conflict(msg) => {
                            AppError::Database(format!("Write conflict persisted: {msg}"))
                        }
                        other => other,
                    })
            }
            result => result,
        }
    }

    async fn try_submit(
        &self,
        poll_id: &str,
        voter_id: &str,
        option_ids: &[String],
    ) -> AppResult<VoteReceipt> {
        let mut tx = self.store.begin().await?;
        let poll = tx
            .lock_poll(poll_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Poll {poll_id}")))?;

        let now = Utc::now();
        lifecycle::ensure_open(&poll, now)?;

        let options = tx.find_options(poll_id).await?;
        let existing = tx.find_votes_by_voter(poll_id, voter_id).await?;
        let fresh = plan_ballot(&poll, &options, &existing, option_ids)?;

        if fresh.is_empty() {
            debug!(poll_id = %poll_id, voter_id = %voter_id, "Selection already recorded");
        } else {
            let ids = self.id_gen.generate_many(fresh.len());
            let records = ids
                .into_iter()
                .zip(&fresh)
                .map(|(id, option_id)| vote::Model {
                    id,
                    poll_id: poll_id.to_string(),
                    option_id: option_id.clone(),
                    user_id: voter_id.to_string(),
                    created_at: now.into(),
                })
                .collect();
            tx.append_votes(records).await?;
        }

        let total_votes = tx.count_votes(poll_id).await?;
        tx.commit().await?;

        info!(
            poll_id = %poll_id,
            voter_id = %voter_id,
            recorded = fresh.len(),
            total_votes,
            "Vote submitted"
        );

        Ok(VoteReceipt {
            total_votes,
            recorded: fresh,
        })
    }

    /// Option ids a voter has selected on a poll.
    ///
    /// An anonymous caller has selected nothing.
    pub async fn votes_by_voter(
        &self,
        poll_id: &str,
        voter_id: Option<&str>,
    ) -> AppResult<Vec<String>> {
        let Some(voter_id) = voter_id.filter(|v| !v.trim().is_empty()) else {
            return Ok(vec![]);
        };

        let votes = self.store.find_votes_by_voter(poll_id, voter_id).await?;
        Ok(votes.into_iter().map(|v| v.option_id).collect())
    }

    /// Whether a voter holds any vote on a poll.
    pub async fn has_voted(&self, poll_id: &str, voter_id: &str) -> AppResult<bool> {
        Ok(self.store.count_by_voter(poll_id, voter_id).await? > 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::services::results::ResultsService;
    use futures::future::join_all;
    use polly_common::config::PollConfig;
    use polly_db::entities::poll::{PollStatus, VoteType};
    use polly_db::repositories::{MemoryPollStore, PollStore};
    use std::sync::Arc;

    fn poll_model(allow_multiple_votes: bool, max_votes_per_user: Option<i32>) -> poll::Model {
        let now = Utc::now();
        poll::Model {
            id: "p1".to_string(),
            title: "Team offsite".to_string(),
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

    fn options() -> Vec<poll_option::Model> {
        let now = Utc::now();
        ["o1", "o2", "o3", "o4"]
            .iter()
            .zip(0..)
            .map(|(id, order_index)| poll_option::Model {
                id: (*id).to_string(),
                poll_id: "p1".to_string(),
                text: format!("Choice {id}"),
                order_index,
                created_at: now.into(),
            })
            .collect()
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(ToString::to_string).collect()
    }

    async fn store_with(poll: poll::Model) -> MemoryPollStore {
        let store = MemoryPollStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_poll(poll, options()).await.unwrap();
        tx.commit().await.unwrap();
        store
    }

    fn service(store: &MemoryPollStore) -> VoteService {
        VoteService::new(Arc::new(store.clone()))
    }

    #[test]
    fn test_plan_rejects_empty_and_unknown() {
        let poll = poll_model(true, None);
        assert!(matches!(
            plan_ballot(&poll, &options(), &[], &[]),
            Err(AppError::InvalidOptions(_))
        ));
        assert!(matches!(
            plan_ballot(&poll, &options(), &[], &ids(&["o1", "other-poll-option"])),
            Err(AppError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_plan_single_choice() {
        let poll = poll_model(false, None);
        assert!(matches!(
            plan_ballot(&poll, &options(), &[], &ids(&["o1", "o2"])),
            Err(AppError::MultipleVotesNotAllowed)
        ));
        assert_eq!(
            plan_ballot(&poll, &options(), &[], &ids(&["o1", "o1"])).unwrap(),
            ids(&["o1"])
        );
    }

    #[test]
    fn test_plan_unknown_option_checked_before_single_choice() {
        let poll = poll_model(false, None);
        assert!(matches!(
            plan_ballot(&poll, &options(), &[], &ids(&["o1", "zz"])),
            Err(AppError::InvalidOptions(_))
        ));
    }

    #[tokio::test]
    async fn test_single_choice_vote_recorded() {
        let store = store_with(poll_model(false, None)).await;
        let service = service(&store);

        let receipt = service.submit_vote("p1", "alice", &ids(&["o2"])).await.unwrap();
        assert_eq!(receipt.total_votes, 1);
        assert_eq!(receipt.recorded, ids(&["o2"]));
        assert_eq!(
            service.votes_by_voter("p1", Some("alice")).await.unwrap(),
            ids(&["o2"])
        );
    }

    #[tokio::test]
    async fn test_single_choice_second_option_hits_limit() {
        let store = store_with(poll_model(false, None)).await;
        let service = service(&store);

        service.submit_vote("p1", "alice", &ids(&["o1"])).await.unwrap();
        let result = service.submit_vote("p1", "alice", &ids(&["o2"])).await;

        assert!(matches!(result, Err(AppError::MaxVotesReached { limit: 1 })));
        assert_eq!(store.vote_count().await, 1);
    }

    #[tokio::test]
    async fn test_two_options_on_single_choice_records_nothing() {
        let store = store_with(poll_model(false, None)).await;
        let result = service(&store)
            .submit_vote("p1", "alice", &ids(&["o1", "o2"]))
            .await;

        assert!(matches!(result, Err(AppError::MultipleVotesNotAllowed)));
        assert_eq!(store.vote_count().await, 0);
    }

    #[tokio::test]
    async fn test_resubmission_is_idempotent() {
        let store = store_with(poll_model(true, Some(2))).await;
        let service = service(&store);

        service.submit_vote("p1", "alice", &ids(&["o1", "o2"])).await.unwrap();
        let receipt = service.submit_vote("p1", "alice", &ids(&["o1", "o2"])).await.unwrap();

        assert!(receipt.recorded.is_empty());
        assert_eq!(receipt.total_votes, 2);
        assert_eq!(store.vote_count().await, 2);
    }

    #[tokio::test]
    async fn test_max_votes_is_all_or_nothing() {
        let store = store_with(poll_model(true, Some(2))).await;
        let service = service(&store);

        let result = service
            .submit_vote("p1", "alice", &ids(&["o1", "o2", "o3"]))
            .await;
        assert!(matches!(result, Err(AppError::MaxVotesReached { limit: 2 })));
        assert_eq!(store.vote_count().await, 0);

        service.submit_vote("p1", "alice", &ids(&["o1"])).await.unwrap();
        let result = service.submit_vote("p1", "alice", &ids(&["o2", "o3"])).await;
        assert!(matches!(result, Err(AppError::MaxVotesReached { limit: 2 })));
        assert_eq!(store.vote_count().await, 1);
    }

    #[tokio::test]
    async fn test_voter_at_limit_cannot_add_options_and_results_hold() {
        let store = store_with(poll_model(true, Some(2))).await;
        let service = service(&store);
        let results = ResultsService::new(Arc::new(store.clone()), PollConfig::default());

        service.submit_vote("p1", "alice", &ids(&["o1", "o2"])).await.unwrap();
        service.submit_vote("p1", "bob", &ids(&["o3"])).await.unwrap();
        let before = results.compute_results("p1").await.unwrap();

        for option in ["o3", "o4"] {
            let result = service.submit_vote("p1", "alice", &ids(&[option])).await;
            assert!(matches!(result, Err(AppError::MaxVotesReached { limit: 2 })));
        }
        let result = service.submit_vote("p1", "alice", &ids(&["o1", "o4"])).await;
        assert!(matches!(result, Err(AppError::MaxVotesReached { limit: 2 })));

        let after = results.compute_results("p1").await.unwrap();
        assert_eq!(after.total_votes, 3);
        assert_eq!(after.total_votes, before.total_votes);
        assert_eq!(after.options, before.options);
        let mut held = service.votes_by_voter("p1", Some("alice")).await.unwrap();
        held.sort();
        assert_eq!(held, ids(&["o1", "o2"]));
    }

    #[tokio::test]
    async fn test_unlimited_multiple_votes() {
        let store = store_with(poll_model(true, None)).await;
        let service = service(&store);

        let receipt = service
            .submit_vote("p1", "alice", &ids(&["o1", "o2", "o3", "o4"]))
            .await
            .unwrap();
        assert_eq!(receipt.total_votes, 4);
    }

    #[tokio::test]
    async fn test_inactive_and_expired_polls_reject_votes() {
        let mut draft = poll_model(false, None);
        draft.status = PollStatus::Draft;
        let store = store_with(draft).await;
        let result = service(&store).submit_vote("p1", "alice", &ids(&["o1"])).await;
        assert!(matches!(result, Err(AppError::PollInactive)));

        let mut expired = poll_model(false, None);
        expired.expires_at = Some((Utc::now() - Duration::seconds(5)).into());
        let store = store_with(expired).await;
        let result = service(&store).submit_vote("p1", "alice", &ids(&["o1"])).await;
        assert!(matches!(result, Err(AppError::PollExpired)));
        assert_eq!(store.vote_count().await, 0);
    }

    #[tokio::test]
    async fn test_anonymous_and_missing_poll() {
        let store = store_with(poll_model(false, None)).await;
        let service = service(&store);

        assert!(matches!(
            service.submit_vote("p1", " ", &ids(&["o1"])).await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            service.submit_vote("missing", "alice", &ids(&["o1"])).await,
            Err(AppError::NotFound(_))
        ));
        assert!(service.votes_by_voter("p1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_conflict_is_retried_once() {
        let store = store_with(poll_model(false, None)).await;
        let service = service(&store);

        store.inject_append_conflicts(1);
        let receipt = service.submit_vote("p1", "alice", &ids(&["o1"])).await.unwrap();
        assert_eq!(receipt.total_votes, 1);

        store.inject_append_conflicts(2);
        let result = service.submit_vote("p1", "bob", &ids(&["o1"])).await;
        assert!(matches!(result, Err(AppError::Database(_))));
        assert_eq!(store.vote_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_respect_limit() {
        let store = store_with(poll_model(true, Some(2))).await;
        let service = service(&store);

        let attempts = ["o1", "o2", "o3", "o4"].map(|option| {
            let service = service.clone();
            let selection = ids(&[option]);
            tokio::spawn(async move { service.submit_vote("p1", "alice", &selection).await })
        });
        let results = join_all(attempts).await;

        let accepted = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(AppError::MaxVotesReached { limit: 2 }))))
            .count();
        assert_eq!(accepted, 2);
        assert_eq!(rejected, 2);
        assert_eq!(store.vote_count().await, 2);
    }

    #[tokio::test]
    async fn test_has_voted() {
        let store = store_with(poll_model(false, None)).await;
        let service = service(&store);

        assert!(!service.has_voted("p1", "alice").await.unwrap());
        service.submit_vote("p1", "alice", &ids(&["o3"])).await.unwrap();
        assert!(service.has_voted("p1", "alice").await.unwrap());
    }
}
