//! Poll repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use polly_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, SqlErr,
    TransactionTrait,
    sea_query::{Expr, Func, LikeExpr},
};

use super::{PollFilter, PollStore, StoreTx};
use crate::entities::{Poll, PollOption, Vote, poll, poll_option, vote};

/// Map a database error, keeping uniqueness violations distinguishable.
fn db_err(e: DbErr) -> AppError {
    match e.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(msg)) => AppError::Conflict(msg),
        _ => AppError::Database(e.to_string()),
    }
}

/// Escape `LIKE` wildcards in user input.
fn like_pattern(search: &str) -> String {
    let escaped = search
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Poll repository for database operations.
#[derive(Clone)]
pub struct PollRepository {
    db: Arc<DatabaseConnection>,
}

impl PollRepository {
    /// Create a new poll repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Get reference to the database connection.
    pub fn db(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}

#[async_trait]
impl PollStore for PollRepository {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let txn = self.db.begin().await.map_err(db_err)?;
        Ok(Box::new(PollTransaction { txn }))
    }

    async fn find_poll(&self, id: &str) -> AppResult<Option<poll::Model>> {
        Poll::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(db_err)
    }

    async fn list_polls(&self, filter: &PollFilter) -> AppResult<Vec<poll::Model>> {
        let mut query = Poll::find();

        if let Some(status) = filter.status {
            query = query.filter(poll::Column::Status.eq(status));
        }

        if let Some(search) = filter.search.as_deref().map(str::trim)
            && !search.is_empty()
        {
            let pattern = like_pattern(search);
            query = query.filter(
                Condition::any()
                    .add(
                        Expr::expr(Func::lower(Expr::col(poll::Column::Title)))
                            .like(LikeExpr::new(pattern.clone()).escape('\\')),
                    )
                    .add(
                        Expr::expr(Func::lower(Expr::col(poll::Column::Description)))
                            .like(LikeExpr::new(pattern).escape('\\')),
                    ),
            );
        }

        query
            .order_by_desc(poll::Column::CreatedAt)
            .order_by_desc(poll::Column::Id)
            .offset(filter.offset)
            .limit(filter.limit)
            .all(self.db.as_ref())
            .await
            .map_err(db_err)
    }

    async fn find_options(&self, poll_ids: &[String]) -> AppResult<Vec<poll_option::Model>> {
        if poll_ids.is_empty() {
            return Ok(vec![]);
        }

        PollOption::find()
            .filter(poll_option::Column::PollId.is_in(poll_ids.iter().cloned()))
            .order_by_asc(poll_option::Column::PollId)
            .order_by_asc(poll_option::Column::OrderIndex)
            .all(self.db.as_ref())
            .await
            .map_err(db_err)
    }

    async fn count_by_option(&self, poll_id: &str) -> AppResult<HashMap<String, u64>> {
        let rows: Vec<(String, i64)> = Vote::find()
            .select_only()
            .column(vote::Column::OptionId)
            .column_as(Expr::col(vote::Column::Id).count(), "count")
            .filter(vote::Column::PollId.eq(poll_id))
            .group_by(vote::Column::OptionId)
            .into_tuple()
            .all(self.db.as_ref())
            .await
            .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(option_id, count)| (option_id, count.max(0) as u64))
            .collect())
    }

    async fn count_by_poll(&self, poll_ids: &[String]) -> AppResult<HashMap<String, u64>> {
        if poll_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<(String, i64)> = Vote::find()
            .select_only()
            .column(vote::Column::PollId)
            .column_as(Expr::col(vote::Column::Id).count(), "count")
            .filter(vote::Column::PollId.is_in(poll_ids.iter().cloned()))
            .group_by(vote::Column::PollId)
            .into_tuple()
            .all(self.db.as_ref())
            .await
            .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(poll_id, count)| (poll_id, count.max(0) as u64))
            .collect())
    }

    async fn count_by_voter(&self, poll_id: &str, voter_id: &str) -> AppResult<u64> {
        Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .filter(vote::Column::UserId.eq(voter_id))
            .count(self.db.as_ref())
            .await
            .map_err(db_err)
    }

    async fn find_votes_by_voter(
        &self,
        poll_id: &str,
        voter_id: &str,
    ) -> AppResult<Vec<vote::Model>> {
        Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .filter(vote::Column::UserId.eq(voter_id))
            .order_by_asc(vote::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(db_err)
    }
}

/// A `PostgreSQL` transaction. Rolled back on drop unless committed.
pub struct PollTransaction {
    txn: DatabaseTransaction,
}

#[async_trait]
impl StoreTx for PollTransaction {
    async fn lock_poll(&mut self, id: &str) -> AppResult<Option<poll::Model>> {
        // SELECT ... FOR UPDATE serialises writers on the same poll
        Poll::find_by_id(id)
            .lock_exclusive()
            .one(&self.txn)
            .await
            .map_err(db_err)
    }

    async fn find_options(&mut self, poll_id: &str) -> AppResult<Vec<poll_option::Model>> {
        PollOption::find()
            .filter(poll_option::Column::PollId.eq(poll_id))
            .order_by_asc(poll_option::Column::OrderIndex)
            .all(&self.txn)
            .await
            .map_err(db_err)
    }

    async fn find_votes_by_voter(
        &mut self,
        poll_id: &str,
        voter_id: &str,
    ) -> AppResult<Vec<vote::Model>> {
        Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .filter(vote::Column::UserId.eq(voter_id))
            .all(&self.txn)
            .await
            .map_err(db_err)
    }

    async fn count_votes(&mut self, poll_id: &str) -> AppResult<u64> {
        Vote::find()
            .filter(vote::Column::PollId.eq(poll_id))
            .count(&self.txn)
            .await
            .map_err(db_err)
    }

    async fn insert_poll(
        &mut self,
        poll: poll::Model,
        options: Vec<poll_option::Model>,
    ) -> AppResult<()> {
        Poll::insert(poll.into_active_model().reset_all())
            .exec_without_returning(&self.txn)
            .await
            .map_err(db_err)?;

        if !options.is_empty() {
            PollOption::insert_many(
                options
                    .into_iter()
                    .map(|o| o.into_active_model().reset_all()),
            )
            .exec_without_returning(&self.txn)
            .await
            .map_err(db_err)?;
        }

        Ok(())
    }

    async fn update_poll(&mut self, poll: poll::Model) -> AppResult<()> {
        poll.into_active_model()
            .reset_all()
            .update(&self.txn)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn replace_options(
        &mut self,
        poll_id: &str,
        options: Vec<poll_option::Model>,
    ) -> AppResult<()> {
        PollOption::delete_many()
            .filter(poll_option::Column::PollId.eq(poll_id))
            .exec(&self.txn)
            .await
            .map_err(db_err)?;

        if !options.is_empty() {
            PollOption::insert_many(
                options
                    .into_iter()
                    .map(|o| o.into_active_model().reset_all()),
            )
            .exec_without_returning(&self.txn)
            .await
            .map_err(db_err)?;
        }

        Ok(())
    }

    async fn delete_poll(&mut self, id: &str) -> AppResult<()> {
        // Options and votes follow through ON DELETE CASCADE
        Poll::delete_by_id(id)
            .exec(&self.txn)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn append_votes(&mut self, votes: Vec<vote::Model>) -> AppResult<()> {
        if votes.is_empty() {
            return Ok(());
        }

        Vote::insert_many(votes.into_iter().map(|v| v.into_active_model().reset_all()))
            .exec_without_returning(&self.txn)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.txn.commit().await.map_err(db_err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_poll(id: &str, title: &str) -> poll::Model {
        let now = Utc::now();
        poll::Model {
            id: id.to_string(),
            title: title.to_string(),
            description: None,
            status: poll::PollStatus::Active,
            vote_type: poll::VoteType::Single,
            allow_multiple_votes: false,
            max_votes_per_user: None,
            expires_at: None,
            created_by: "user1".to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    fn create_test_option(id: &str, poll_id: &str, order_index: i32) -> poll_option::Model {
        poll_option::Model {
            id: id.to_string(),
            poll_id: poll_id.to_string(),
            text: format!("Option {order_index}"),
            order_index,
            created_at: Utc::now().into(),
        }
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("Rust"), "%rust%");
        assert_eq!(like_pattern("100%_done"), "%100\\%\\_done%");
    }

    #[tokio::test]
    async fn test_find_poll() {
        let poll = create_test_poll("poll1", "Lunch?");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll.clone()]])
                .into_connection(),
        );

        let repo = PollRepository::new(db);
        let result = repo.find_poll("poll1").await.unwrap();

        assert_eq!(result.unwrap().title, "Lunch?");
    }

    #[tokio::test]
    async fn test_list_polls() {
        let p1 = create_test_poll("poll1", "Rust or Go");
        let p2 = create_test_poll("poll2", "Rust editions");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[p1, p2]])
                .into_connection(),
        );

        let repo = PollRepository::new(db);
        let filter = PollFilter {
            status: Some(poll::PollStatus::Active),
            search: Some("rust".to_string()),
            limit: 10,
            offset: 0,
        };
        let result = repo.list_polls(&filter).await.unwrap();

        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn test_find_options_with_no_ids_skips_query() {
        // No query results appended: a query would fail
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());

        let repo = PollRepository::new(db);
        let result = repo.find_options(&[]).await.unwrap();

        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_find_options_ordered() {
        let o1 = create_test_option("o1", "poll1", 0);
        let o2 = create_test_option("o2", "poll1", 1);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[o1, o2]])
                .into_connection(),
        );

        let repo = PollRepository::new(db);
        let result = repo.find_options(&["poll1".to_string()]).await.unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].order_index, 0);
        assert_eq!(result[1].order_index, 1);
    }

    #[tokio::test]
    async fn test_transaction_lock_poll_and_commit() {
        let poll = create_test_poll("poll1", "Lunch?");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[poll.clone()]])
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let repo = PollRepository::new(db);
        let mut tx = repo.begin().await.unwrap();
        let locked = tx.lock_poll("poll1").await.unwrap();
        assert_eq!(locked.unwrap().id, "poll1");

        tx.delete_poll("poll1").await.unwrap();
        tx.commit().await.unwrap();
    }
}
