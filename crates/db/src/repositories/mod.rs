//! Repositories for poll storage.
//!
//! Services talk to storage through [`PollStore`] and the transactions it opens
//! ([`StoreTx`]). [`PollRepository`] is the `PostgreSQL` adapter; the in-memory
//! adapter behind the `test-utils` feature mirrors its constraints for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use polly_common::AppResult;

use crate::entities::{poll as poll_entity, poll_option, vote};

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod poll;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryPollStore;
pub use poll::PollRepository;

/// Shared handle to a poll store.
pub type PollStoreRef = Arc<dyn PollStore>;

/// Filter for poll listings.
#[derive(Debug, Clone, Default)]
pub struct PollFilter {
    /// Only polls with this status.
    pub status: Option<poll_entity::PollStatus>,
    /// Case-insensitive substring matched against title or description.
    pub search: Option<String>,
    /// Page size.
    pub limit: u64,
    /// Rows to skip.
    pub offset: u64,
}

impl PollFilter {
    /// Whether a poll passes the status and search criteria.
    #[must_use]
    pub fn matches(&self, poll: &poll_entity::Model) -> bool {
        if self.status.is_some_and(|status| status != poll.status) {
            return false;
        }

        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(search) => {
                let needle = search.to_lowercase();
                poll.title.to_lowercase().contains(&needle)
                    || poll
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            }
        }
    }
}

/// Read access to polls and the vote ledger, plus a way to open transactions.
#[async_trait]
pub trait PollStore: Send + Sync {
    /// Open a transaction. Dropping it without [`StoreTx::commit`] rolls it back.
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>>;

    /// Find a poll by ID.
    async fn find_poll(&self, id: &str) -> AppResult<Option<poll_entity::Model>>;

    /// List polls matching a filter, newest first.
    async fn list_polls(&self, filter: &PollFilter) -> AppResult<Vec<poll_entity::Model>>;

    /// Options of the given polls, ordered by poll then `order_index`.
    async fn find_options(&self, poll_ids: &[String]) -> AppResult<Vec<poll_option::Model>>;

    /// Vote counts keyed by option ID. Options without votes are absent.
    async fn count_by_option(&self, poll_id: &str) -> AppResult<HashMap<String, u64>>;

    /// Total vote counts keyed by poll ID. Polls without votes are absent.
    async fn count_by_poll(&self, poll_ids: &[String]) -> AppResult<HashMap<String, u64>>;

    /// Number of vote records a voter holds on a poll.
    async fn count_by_voter(&self, poll_id: &str, voter_id: &str) -> AppResult<u64>;

    /// Vote records a voter holds on a poll.
    async fn find_votes_by_voter(&self, poll_id: &str, voter_id: &str)
    -> AppResult<Vec<vote::Model>>;
}

/// A unit of work against the store.
///
/// Reads inside a transaction observe its own writes. Inserts that would break
/// a uniqueness rule fail with [`polly_common::AppError::Conflict`].
#[async_trait]
pub trait StoreTx: Send {
    /// Read a poll and hold a write lock on it until the transaction ends.
    async fn lock_poll(&mut self, id: &str) -> AppResult<Option<poll_entity::Model>>;

    /// Options of a poll ordered by `order_index`.
    async fn find_options(&mut self, poll_id: &str) -> AppResult<Vec<poll_option::Model>>;

    /// Vote records a voter holds on a poll.
    async fn find_votes_by_voter(
        &mut self,
        poll_id: &str,
        voter_id: &str,
    ) -> AppResult<Vec<vote::Model>>;

    /// Total vote records on a poll.
    async fn count_votes(&mut self, poll_id: &str) -> AppResult<u64>;

    /// Insert a poll together with its options.
    async fn insert_poll(
        &mut self,
        poll: poll_entity::Model,
        options: Vec<poll_option::Model>,
    ) -> AppResult<()>;

    /// Overwrite a poll row.
    async fn update_poll(&mut self, poll: poll_entity::Model) -> AppResult<()>;

    /// Replace every option of a poll.
    async fn replace_options(
        &mut self,
        poll_id: &str,
        options: Vec<poll_option::Model>,
    ) -> AppResult<()>;

    /// Delete a poll with its options and votes.
    async fn delete_poll(&mut self, id: &str) -> AppResult<()>;

    /// Append vote records, all or nothing.
    async fn append_votes(&mut self, votes: Vec<vote::Model>) -> AppResult<()>;

    /// Make the transaction's writes durable.
    async fn commit(self: Box<Self>) -> AppResult<()>;
}
