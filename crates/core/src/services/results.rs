//! Poll results aggregation.

use std::collections::HashMap;

use chrono::Utc;
use polly_common::{AppError, AppResult, config::PollConfig};
use polly_db::{
    entities::{poll, poll_option},
    repositories::PollStoreRef,
};

use super::lifecycle;

/// Tally for one option.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionResult {
    pub option_id: String,
    pub text: String,
    pub order_index: i32,
    pub count: u64,
    /// Share of all votes, rounded to the configured number of decimals.
    pub percentage: f64,
}

/// Aggregated results of a poll.
#[derive(Debug, Clone)]
pub struct PollResults {
    pub poll: poll::Model,
    /// One row per option in display order.
    pub options: Vec<OptionResult>,
    /// Sum of all option counts.
    pub total_votes: u64,
    pub is_expired: bool,
    pub accepts_votes: bool,
}

/// Split 100% across `counts` in steps of `10^-decimals`.
///
/// Each share is floored to a whole step and the leftover steps go to the
/// largest remainders, earlier entries first on ties. Every share stays within
/// one step of its exact value and the shares add up to exactly 100. All zero
/// when there are no votes.
#[must_use]
pub fn apportion(counts: &[u64], decimals: u32) -> Vec<f64> {
    let total: u128 = counts.iter().map(|&c| u128::from(c)).sum();
    if total == 0 {
        return vec![0.0; counts.len()];
    }

    let scale = 10u128.pow(decimals.min(MAX_DECIMALS));
    let steps = 100 * scale;

    let mut shares: Vec<(u128, u128)> = counts
        .iter()
        .map(|&c| {
            let exact = u128::from(c) * steps;
            (exact / total, exact % total)
        })
        .collect();

    let assigned: u128 = shares.iter().map(|(floor, _)| floor).sum();
    let mut by_remainder: Vec<usize> = (0..shares.len()).collect();
    by_remainder.sort_by(|&a, &b| shares[b].1.cmp(&shares[a].1).then(a.cmp(&b)));

    let leftover = usize::try_from(steps - assigned).unwrap_or(usize::MAX);
    for &i in by_remainder.iter().take(leftover) {
        shares[i].0 += 1;
    }

    shares
        .into_iter()
        .map(|(units, _)| units as f64 / scale as f64)
        .collect()
}

const MAX_DECIMALS: u32 = 10;

/// Build result rows from options and per-option counts.
///
/// Rows follow `order_index`. Options without votes get a zero row.
#[must_use]
pub fn tally(
    options: &[poll_option::Model],
    counts: &HashMap<String, u64>,
    decimals: u32,
) -> (Vec<OptionResult>, u64) {
    let mut options: Vec<&poll_option::Model> = options.iter().collect();
    options.sort_by_key(|o| o.order_index);

    let option_counts: Vec<u64> = options
        .iter()
        .map(|o| counts.get(&o.id).copied().unwrap_or(0))
        .collect();
    let total = option_counts.iter().sum();
    let percentages = apportion(&option_counts, decimals);

    let rows = options
        .into_iter()
        .zip(option_counts.into_iter().zip(percentages))
        .map(|(o, (count, percentage))| OptionResult {
            option_id: o.id.clone(),
            text: o.text.clone(),
            order_index: o.order_index,
            count,
            percentage,
        })
        .collect();

    (rows, total)
}

/// Service computing poll results from the vote ledger.
#[derive(Clone)]
pub struct ResultsService {
    store: PollStoreRef,
    config: PollConfig,
}

impl ResultsService {
    /// Create a new results service.
    #[must_use]
    pub const fn new(store: PollStoreRef, config: PollConfig) -> Self {
        Self { store, config }
    }

    /// Compute per-option counts and percentages for a poll.
    ///
    /// Results are readable in every status, including drafts and closed polls.
    pub async fn compute_results(&self, poll_id: &str) -> AppResult<PollResults> {
        let poll = self
            .store
            .find_poll(poll_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Poll {poll_id}")))?;

        let options = self.store.find_options(&[poll.id.clone()]).await?;
        let counts = self.store.count_by_option(poll_id).await?;
        let (rows, total_votes) = tally(&options, &counts, self.config.percentage_decimals);

        let now = Utc::now();
        Ok(PollResults {
            is_expired: poll.is_expired_at(now),
            accepts_votes: lifecycle::accepts_votes(&poll, now),
            poll,
            options: rows,
            total_votes,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::vote::VoteService;
    use polly_db::entities::poll::{PollStatus, VoteType};
    use polly_db::repositories::{MemoryPollStore, PollStore};
    use std::sync::Arc;

    fn option(id: &str, order_index: i32) -> poll_option::Model {
        poll_option::Model {
            id: id.to_string(),
            poll_id: "p1".to_string(),
            text: format!("Text {id}"),
            order_index,
            created_at: Utc::now().into(),
        }
    }

    fn counts(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    fn tied(n: i32) -> (Vec<poll_option::Model>, HashMap<String, u64>) {
        let options: Vec<_> = (0..n).map(|i| option(&format!("o{i}"), i)).collect();
        let counts = options.iter().map(|o| (o.id.clone(), 1)).collect();
        (options, counts)
    }

    #[test]
    fn test_apportion_matches_plain_rounding_when_exact() {
        let shares = apportion(&[3, 1], 1);
        assert_close(shares[0], 75.0);
        assert_close(shares[1], 25.0);

        let shares = apportion(&[2, 1], 1);
        assert_close(shares[0], 66.7);
        assert_close(shares[1], 33.3);

        let shares = apportion(&[2, 1], 0);
        assert_close(shares[0], 67.0);
        assert_close(shares[1], 33.0);
    }

    #[test]
    fn test_apportion_without_votes() {
        assert_eq!(apportion(&[0, 0, 0], 1), vec![0.0; 3]);
        assert!(apportion(&[], 1).is_empty());
    }

    #[test]
    fn test_apportion_leftover_goes_to_earlier_options_on_ties() {
        let shares = apportion(&[1, 1, 1], 1);
        assert_close(shares[0], 33.4);
        assert_close(shares[1], 33.3);
        assert_close(shares[2], 33.3);
    }

    #[test]
    fn test_tied_options_always_sum_to_hundred() {
        for n in [3, 6, 7, 30] {
            let (options, counts) = tied(n);
            let (rows, total) = tally(&options, &counts, 1);

            assert_eq!(total, u64::try_from(n).unwrap());
            let sum: f64 = rows.iter().map(|r| r.percentage).sum();
            assert!((sum - 100.0).abs() < 1e-6, "{n} options sum to {sum}");

            let exact = 100.0 / f64::from(n);
            for row in &rows {
                assert!((row.percentage - exact).abs() <= 0.1 + 1e-9);
            }
        }
    }

    #[test]
    fn test_six_way_tie_shares() {
        let (options, counts) = tied(6);
        let (rows, _) = tally(&options, &counts, 1);
        let shares: Vec<f64> = rows.iter().map(|r| r.percentage).collect();

        for (actual, expected) in shares.iter().zip([16.7, 16.7, 16.7, 16.7, 16.6, 16.6]) {
            assert_close(*actual, expected);
        }
    }

    #[test]
    fn test_zero_vote_options_stay_at_zero() {
        let shares = apportion(&[1, 0, 2, 0], 1);
        assert_close(shares[0], 33.3);
        assert_close(shares[1], 0.0);
        assert_close(shares[2], 66.7);
        assert_close(shares[3], 0.0);
    }

    #[test]
    fn test_tally_three_to_one() {
        let options = vec![option("b", 1), option("a", 0)];
        let (rows, total) = tally(&options, &counts(&[("a", 3), ("b", 1)]), 1);

        assert_eq!(total, 4);
        assert_eq!(rows[0].option_id, "a");
        assert_eq!(rows[0].count, 3);
        assert!((rows[0].percentage - 75.0).abs() < 1e-9);
        assert!((rows[1].percentage - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_tally_without_votes() {
        let options = vec![option("a", 0), option("b", 1), option("c", 2)];
        let (rows, total) = tally(&options, &HashMap::new(), 1);

        assert_eq!(total, 0);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.count == 0 && r.percentage == 0.0));
    }

    #[test]
    fn test_percentages_sum_close_to_hundred() {
        let options = vec![option("a", 0), option("b", 1), option("c", 2)];
        let (rows, total) = tally(&options, &counts(&[("a", 1), ("b", 1), ("c", 1)]), 1);

        assert_eq!(rows.iter().map(|r| r.count).sum::<u64>(), total);
        let sum: f64 = rows.iter().map(|r| r.percentage).sum();
        assert!((sum - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_counts_for_foreign_options_are_ignored() {
        let options = vec![option("a", 0), option("b", 1)];
        let (rows, total) = tally(&options, &counts(&[("a", 2), ("elsewhere", 5)]), 1);

        assert_eq!(total, 2);
        assert!((rows[0].percentage - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_results_reflect_committed_votes() {
        let store = MemoryPollStore::new();
        let now = Utc::now();
        let poll = poll::Model {
            id: "p1".to_string(),
            title: "Lunch?".to_string(),
            description: None,
            status: PollStatus::Active,
            vote_type: VoteType::Single,
            allow_multiple_votes: false,
            max_votes_per_user: None,
            expires_at: None,
            created_by: "owner".to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        };
        let mut tx = store.begin().await.unwrap();
        tx.insert_poll(poll, vec![option("a", 0), option("b", 1)])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let store_ref: PollStoreRef = Arc::new(store.clone());
        let votes = VoteService::new(Arc::clone(&store_ref));
        let results = ResultsService::new(store_ref, PollConfig::default());

        for voter in ["u1", "u2", "u3"] {
            votes
                .submit_vote("p1", voter, &["a".to_string()])
                .await
                .unwrap();
        }
        votes.submit_vote("p1", "u4", &["b".to_string()]).await.unwrap();

        let computed = results.compute_results("p1").await.unwrap();
        assert_eq!(computed.total_votes, 4);
        assert_eq!(computed.options[0].count, 3);
        assert!((computed.options[0].percentage - 75.0).abs() < 1e-9);
        assert!((computed.options[1].percentage - 25.0).abs() < 1e-9);
        assert!(computed.accepts_votes);
    }

    #[tokio::test]
    async fn test_results_for_missing_poll() {
        let results = ResultsService::new(Arc::new(MemoryPollStore::new()), PollConfig::default());
        assert!(matches!(
            results.compute_results("nope").await,
            Err(AppError::NotFound(_))
        ));
    }
}
