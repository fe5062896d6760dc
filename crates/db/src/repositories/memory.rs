//! In-memory poll store for tests.
//!
//! Transactions are serialised through one async mutex and work on a private
//! copy of the data, which replaces the shared copy on commit. Foreign keys,
//! cascades and the `(poll, voter, option)` uniqueness rule behave as in the
//! `PostgreSQL` schema.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use polly_common::{AppError, AppResult};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{PollFilter, PollStore, StoreTx};
use crate::entities::{poll, poll_option, vote};

#[derive(Debug, Clone, Default)]
struct State {
    polls: BTreeMap<String, poll::Model>,
    options: Vec<poll_option::Model>,
    votes: Vec<vote::Model>,
}

impl State {
    fn options_of(&self, poll_id: &str) -> Vec<poll_option::Model> {
        let mut options: Vec<_> = self
            .options
            .iter()
            .filter(|o| o.poll_id == poll_id)
            .cloned()
            .collect();
        options.sort_by_key(|o| o.order_index);
        options
    }

    fn votes_of(&self, poll_id: &str, voter_id: &str) -> Vec<vote::Model> {
        self.votes
            .iter()
            .filter(|v| v.poll_id == poll_id && v.user_id == voter_id)
            .cloned()
            .collect()
    }

    fn check_options(&self, poll_id: &str, options: &[poll_option::Model]) -> AppResult<()> {
        let mut seen = HashSet::new();
        for option in options {
            if option.poll_id != poll_id {
                return Err(AppError::Database(format!(
                    "option {} does not belong to poll {poll_id}",
                    option.id
                )));
            }
            if !seen.insert(option.order_index)
                || self
                    .options
                    .iter()
                    .any(|o| o.poll_id == poll_id && o.order_index == option.order_index)
            {
                return Err(AppError::Conflict(format!(
                    "duplicate order_index {} on poll {poll_id}",
                    option.order_index
                )));
            }
        }
        Ok(())
    }
}

/// In-memory implementation of [`PollStore`].
#[derive(Clone, Default)]
pub struct MemoryPollStore {
    state: Arc<Mutex<State>>,
    injected_conflicts: Arc<AtomicU32>,
}

impl MemoryPollStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to [`StoreTx::append_votes`] fail with a write conflict.
    pub fn inject_append_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Number of vote records currently committed.
    pub async fn vote_count(&self) -> usize {
        self.state.lock().await.votes.len()
    }

    /// Number of option rows currently committed.
    pub async fn option_count(&self) -> usize {
        self.state.lock().await.options.len()
    }
}

#[async_trait]
impl PollStore for MemoryPollStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            staged,
            injected_conflicts: Arc::clone(&self.injected_conflicts),
        }))
    }

    async fn find_poll(&self, id: &str) -> AppResult<Option<poll::Model>> {
        Ok(self.state.lock().await.polls.get(id).cloned())
    }

    async fn list_polls(&self, filter: &PollFilter) -> AppResult<Vec<poll::Model>> {
        let state = self.state.lock().await;
        let mut polls: Vec<_> = state
            .polls
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        polls.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let offset = usize::try_from(filter.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(filter.limit).unwrap_or(usize::MAX);
        Ok(polls.into_iter().skip(offset).take(limit).collect())
    }

    async fn find_options(&self, poll_ids: &[String]) -> AppResult<Vec<poll_option::Model>> {
        let state = self.state.lock().await;
        let mut options: Vec<_> = state
            .options
            .iter()
            .filter(|o| poll_ids.contains(&o.poll_id))
            .cloned()
            .collect();
        options.sort_by(|a, b| {
            a.poll_id
                .cmp(&b.poll_id)
                .then(a.order_index.cmp(&b.order_index))
        });
        Ok(options)
    }

    async fn count_by_option(&self, poll_id: &str) -> AppResult<HashMap<String, u64>> {
        let state = self.state.lock().await;
        let mut counts = HashMap::new();
        for v in state.votes.iter().filter(|v| v.poll_id == poll_id) {
            *counts.entry(v.option_id.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn count_by_poll(&self, poll_ids: &[String]) -> AppResult<HashMap<String, u64>> {
        let state = self.state.lock().await;
        let mut counts = HashMap::new();
        for v in state.votes.iter().filter(|v| poll_ids.contains(&v.poll_id)) {
            *counts.entry(v.poll_id.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn count_by_voter(&self, poll_id: &str, voter_id: &str) -> AppResult<u64> {
        Ok(self.state.lock().await.votes_of(poll_id, voter_id).len() as u64)
    }

    async fn find_votes_by_voter(
        &self,
        poll_id: &str,
        voter_id: &str,
    ) -> AppResult<Vec<vote::Model>> {
        Ok(self.state.lock().await.votes_of(poll_id, voter_id))
    }
}

/// Transaction over [`MemoryPollStore`]. Holds the store lock until dropped.
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<State>,
    staged: State,
    injected_conflicts: Arc<AtomicU32>,
}

#[async_trait]
impl StoreTx for MemoryTransaction {
    async fn lock_poll(&mut self, id: &str) -> AppResult<Option<poll::Model>> {
        Ok(self.staged.polls.get(id).cloned())
    }

    async fn find_options(&mut self, poll_id: &str) -> AppResult<Vec<poll_option::Model>> {
        Ok(self.staged.options_of(poll_id))
    }

    async fn find_votes_by_voter(
        &mut self,
        poll_id: &str,
        voter_id: &str,
    ) -> AppResult<Vec<vote::Model>> {
        Ok(self.staged.votes_of(poll_id, voter_id))
    }

    async fn count_votes(&mut self, poll_id: &str) -> AppResult<u64> {
        Ok(self
            .staged
            .votes
            .iter()
            .filter(|v| v.poll_id == poll_id)
            .count() as u64)
    }

    async fn insert_poll(
        &mut self,
        poll: poll::Model,
        options: Vec<poll_option::Model>,
    ) -> AppResult<()> {
        if self.staged.polls.contains_key(&poll.id) {
            return Err(AppError::Conflict(format!("poll {} already exists", poll.id)));
        }
        self.staged.check_options(&poll.id, &options)?;

        self.staged.polls.insert(poll.id.clone(), poll);
        self.staged.options.extend(options);
        Ok(())
    }

    async fn update_poll(&mut self, poll: poll::Model) -> AppResult<()> {
        match self.staged.polls.get_mut(&poll.id) {
            Some(existing) => {
                *existing = poll;
                Ok(())
            }
            None => Err(AppError::Database(format!(
                "poll {} vanished during update",
                poll.id
            ))),
        }
    }

    async fn replace_options(
        &mut self,
        poll_id: &str,
        options: Vec<poll_option::Model>,
    ) -> AppResult<()> {
        let removed: HashSet<String> = self
            .staged
            .options
            .iter()
            .filter(|o| o.poll_id == poll_id)
            .map(|o| o.id.clone())
            .collect();
        self.staged.options.retain(|o| o.poll_id != poll_id);
        self.staged.votes.retain(|v| !removed.contains(&v.option_id));

        self.staged.check_options(poll_id, &options)?;
        self.staged.options.extend(options);
        Ok(())
    }

    async fn delete_poll(&mut self, id: &str) -> AppResult<()> {
        self.staged.polls.remove(id);
        self.staged.options.retain(|o| o.poll_id != id);
        self.staged.votes.retain(|v| v.poll_id != id);
        Ok(())
    }

    async fn append_votes(&mut self, votes: Vec<vote::Model>) -> AppResult<()> {
        if self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::Conflict("injected write conflict".to_string()));
        }

        let mut batch = HashSet::new();
        for v in &votes {
            if !self
                .staged
                .options
                .iter()
                .any(|o| o.id == v.option_id && o.poll_id == v.poll_id)
            {
                return Err(AppError::Database(format!(
                    "option {} does not belong to poll {}",
                    v.option_id, v.poll_id
                )));
            }

            let key = (v.poll_id.as_str(), v.user_id.as_str(), v.option_id.as_str());
            let exists = self.staged.votes.iter().any(|e| {
                e.poll_id == v.poll_id && e.user_id == v.user_id && e.option_id == v.option_id
            });
            if exists || !batch.insert(key) {
                return Err(AppError::Conflict(format!(
                    "vote on option {} by {} already recorded",
                    v.option_id, v.user_id
                )));
            }
        }

        self.staged.votes.extend(votes);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let Self {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }
}
