//! Poll lifecycle: status transitions and the voting gate.

use chrono::{DateTime, Utc};
use polly_common::{AppError, AppResult};
use polly_db::{
    entities::poll::{self, PollStatus},
    repositories::PollStoreRef,
};
use tracing::info;

/// Check that a poll accepts votes at `now`.
///
/// Draft and closed polls are inactive. An active poll past its expiry is expired.
pub fn ensure_open(poll: &poll::Model, now: DateTime<Utc>) -> AppResult<()> {
    match poll.status {
        PollStatus::Draft | PollStatus::Closed => Err(AppError::PollInactive),
        PollStatus::Active if poll.is_expired_at(now) => Err(AppError::PollExpired),
        PollStatus::Active => Ok(()),
    }
}

/// Whether a poll accepts votes at `now`.
#[must_use]
pub fn accepts_votes(poll: &poll::Model, now: DateTime<Utc>) -> bool {
    ensure_open(poll, now).is_ok()
}

/// Status as seen by readers: an expired active poll reads as closed.
#[must_use]
pub fn effective_status(poll: &poll::Model, now: DateTime<Utc>) -> PollStatus {
    match poll.status {
        PollStatus::Active if poll.is_expired_at(now) => PollStatus::Closed,
        status => status,
    }
}

/// Whether `from -> to` is an allowed status change.
///
/// Status only moves forward: draft to active, active to closed.
#[must_use]
pub const fn can_transition(from: PollStatus, to: PollStatus) -> bool {
    matches!(
        (from, to),
        (PollStatus::Draft, PollStatus::Active) | (PollStatus::Active, PollStatus::Closed)
    )
}

/// Apply a status change to a poll model.
///
/// Setting the current status again is a no-op.
pub fn apply_transition(
    poll: &mut poll::Model,
    to: PollStatus,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if poll.status == to {
        return Ok(());
    }

    if !can_transition(poll.status, to) {
        return Err(AppError::Validation(format!(
            "Cannot change poll status from {:?} to {:?}",
            poll.status, to
        )));
    }

    if to == PollStatus::Active && poll.is_expired_at(now) {
        return Err(AppError::Validation(
            "Cannot publish a poll whose expiry has passed".to_string(),
        ));
    }

    poll.status = to;
    poll.updated_at = now.into();
    Ok(())
}

/// Owner-driven status changes.
#[derive(Clone)]
pub struct LifecycleService {
    store: PollStoreRef,
}

impl LifecycleService {
    /// Create a new lifecycle service.
    #[must_use]
    pub const fn new(store: PollStoreRef) -> Self {
        Self { store }
    }

    /// Open a draft poll for voting.
    pub async fn publish(&self, poll_id: &str, user_id: &str) -> AppResult<poll::Model> {
        self.transition(poll_id, user_id, PollStatus::Active).await
    }

    /// Stop an active poll from accepting votes.
    pub async fn close(&self, poll_id: &str, user_id: &str) -> AppResult<poll::Model> {
        self.transition(poll_id, user_id, PollStatus::Closed).await
    }

    async fn transition(
        &self,
        poll_id: &str,
        user_id: &str,
        to: PollStatus,
    ) -> AppResult<poll::Model> {
        if user_id.trim().is_empty() {
            return Err(AppError::Unauthorized);
        }

        let mut tx = self.store.begin().await?;
        let mut poll = tx
            .lock_poll(poll_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Poll {poll_id}")))?;

        if poll.created_by != user_id {
            return Err(AppError::Forbidden("Not the poll owner".to_string()));
        }

        let from = poll.status;
        apply_transition(&mut poll, to, Utc::now())?;
        if from != poll.status {
            tx.update_poll(poll.clone()).await?;
        }
        tx.commit().await?;

        info!(poll_id = %poll_id, from = ?from, to = ?poll.status, "Poll status changed");
        Ok(poll)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use polly_db::entities::poll::VoteType;
    use polly_db::entities::poll_option;
    use polly_db::repositories::{MemoryPollStore, PollStore};
    use std::sync::Arc;

    fn poll_with(status: PollStatus, expires_at: Option<DateTime<Utc>>) -> poll::Model {
        let now = Utc::now();
        poll::Model {
            id: "p1".to_string(),
            title: "Standup time".to_string(),
            description: None,
            status,
            vote_type: VoteType::Single,
            allow_multiple_votes: false,
            max_votes_per_user: None,
            expires_at: expires_at.map(Into::into),
            created_by: "owner".to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    async fn seeded(status: PollStatus) -> MemoryPollStore {
        let store = MemoryPollStore::new();
        let now = Utc::now();
        let options = (0..2)
            .map(|i| poll_option::Model {
                id: format!("o{i}"),
                poll_id: "p1".to_string(),
                text: format!("Option {i}"),
                order_index: i,
                created_at: now.into(),
            })
            .collect();
        let mut tx = store.begin().await.unwrap();
        tx.insert_poll(poll_with(status, None), options).await.unwrap();
        tx.commit().await.unwrap();
        store
    }

    #[test]
    fn test_ensure_open() {
        let now = Utc::now();

        assert!(ensure_open(&poll_with(PollStatus::Active, None), now).is_ok());
        assert!(matches!(
            ensure_open(&poll_with(PollStatus::Draft, None), now),
            Err(AppError::PollInactive)
        ));
        assert!(matches!(
            ensure_open(&poll_with(PollStatus::Closed, None), now),
            Err(AppError::PollInactive)
        ));
        assert!(matches!(
            ensure_open(
                &poll_with(PollStatus::Active, Some(now - Duration::minutes(1))),
                now
            ),
            Err(AppError::PollExpired)
        ));
    }

    #[test]
    fn test_closed_and_expired_reports_inactive() {
        let now = Utc::now();
        let poll = poll_with(PollStatus::Closed, Some(now - Duration::minutes(1)));
        assert!(matches!(ensure_open(&poll, now), Err(AppError::PollInactive)));
    }

    #[test]
    fn test_effective_status() {
        let now = Utc::now();
        let expired = poll_with(PollStatus::Active, Some(now - Duration::seconds(1)));
        assert_eq!(effective_status(&expired, now), PollStatus::Closed);
        assert_eq!(
            effective_status(&poll_with(PollStatus::Draft, None), now),
            PollStatus::Draft
        );
    }

    #[test]
    fn test_transitions_only_move_forward() {
        assert!(can_transition(PollStatus::Draft, PollStatus::Active));
        assert!(can_transition(PollStatus::Active, PollStatus::Closed));
        assert!(!can_transition(PollStatus::Closed, PollStatus::Active));
        assert!(!can_transition(PollStatus::Active, PollStatus::Draft));
        assert!(!can_transition(PollStatus::Draft, PollStatus::Closed));
    }

    #[test]
    fn test_publish_expired_draft_is_rejected() {
        let now = Utc::now();
        let mut poll = poll_with(PollStatus::Draft, Some(now - Duration::hours(1)));
        assert!(matches!(
            apply_transition(&mut poll, PollStatus::Active, now),
            Err(AppError::Validation(_))
        ));
        assert_eq!(poll.status, PollStatus::Draft);
    }

    #[tokio::test]
    async fn test_publish_then_close() {
        let store = seeded(PollStatus::Draft).await;
        let service = LifecycleService::new(Arc::new(store.clone()));

        let published = service.publish("p1", "owner").await.unwrap();
        assert_eq!(published.status, PollStatus::Active);

        let closed = service.close("p1", "owner").await.unwrap();
        assert_eq!(closed.status, PollStatus::Closed);

        let stored = store.find_poll("p1").await.unwrap().unwrap();
        assert_eq!(stored.status, PollStatus::Closed);
    }

    #[tokio::test]
    async fn test_reopen_closed_poll_fails() {
        let store = seeded(PollStatus::Closed).await;
        let service = LifecycleService::new(Arc::new(store));

        let result = service.publish("p1", "owner").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_non_owner_cannot_close() {
        let store = seeded(PollStatus::Active).await;
        let service = LifecycleService::new(Arc::new(store.clone()));

        let result = service.close("p1", "someone-else").await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        let stored = store.find_poll("p1").await.unwrap().unwrap();
        assert_eq!(stored.status, PollStatus::Active);
    }

    #[tokio::test]
    async fn test_unknown_poll() {
        let service = LifecycleService::new(Arc::new(MemoryPollStore::new()));
        let result = service.close("missing", "owner").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
