//! Periodic recomputation of the `(category, period)` leaderboards.

use crate::activity::ActivitySource;
use crate::common::{
    LeaderboardEntry, LeaderboardId, MetricCategory, Period, Score, UserId, Window,
};
use crate::config::EngineConfig;
use crate::error::{EngineError, PartialComputationError, Result};
use crate::in_flight::InFlight;
use crate::participation::ParticipationGate;
use crate::period;
use crate::ranking;
use crate::scoring::ScoreCalculator;
use crate::store::{LeaderboardStore, ProfileStore, PublishOutcome};
use chrono::{DateTime, Utc};
use fxhash::FxHashSet;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecomputeReport {
    pub leaderboard_id: LeaderboardId,
    pub category: MetricCategory,
    pub period: Period,
    pub window: Window,
    /// Users ranked by this pass, after dropping those who opted out mid-pass.
    pub scored_users: usize,
    pub entries: usize,
    pub outcome: PublishOutcome,
    pub failures: Vec<PartialComputationError>,
}

/// A user's standing on one category's all-time leaderboard.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct UserRanking {
    pub category: MetricCategory,
    pub rank: Option<u32>,
    pub score: Option<Score>,
}

#[derive(Debug)]
pub struct LeaderboardAggregator<S, A> {
    store: Arc<S>,
    gate: ParticipationGate<S>,
    calculator: ScoreCalculator<A>,
    in_flight: InFlight<(MetricCategory, Period)>,
    config: EngineConfig,
}

impl<S, A> LeaderboardAggregator<S, A>
where
    S: LeaderboardStore + ProfileStore,
    A: ActivitySource,
{
    pub fn new(store: Arc<S>, source: Arc<A>, config: EngineConfig) -> Self {
        LeaderboardAggregator {
            gate: ParticipationGate::new(Arc::clone(&store)),
            calculator: ScoreCalculator::new(source, config.fan_out, config.batch_size),
            store,
            in_flight: InFlight::new(),
            config,
        }
    }

    /// Rescores every opted-in user for the window of `period` containing
    /// `now` and republishes the top entries as one unit.
    ///
    /// Fails with `ConcurrentRecompute` if the same leaderboard is already
    /// being recomputed, and with `TimedOut` if the pass exceeds its budget.
    /// In both cases, and on any store failure, the previously published
    /// entries stay in place.
    pub async fn recompute(
        &self,
        category: MetricCategory,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<RecomputeReport> {
        let _guard = self.in_flight.try_acquire((category, period))?;

        let budget = self.config.pass_time_budget;
        tokio::time::timeout(budget, self.run_recompute(category, period, now))
            .await
            .map_err(|_| EngineError::TimedOut {
                what: format!("recompute of {category}/{period}"),
                budget,
            })?
    }

    async fn run_recompute(
        &self,
        category: MetricCategory,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<RecomputeReport> {
        let window = period::resolve(period, now);
        let leaderboard = self
            .store
            .get_or_create_leaderboard(category, period, window)
            .await?;

        let users = self.gate.opted_in_users().await?;
        debug!(%category, %period, users = users.len(), "scoring leaderboard");
        let sheet = self
            .calculator
            .score_all(&users, category.into(), &window)
            .await;

        // Users who opted out while scores were computed are dropped before ranking.
        let still_opted_in: FxHashSet<UserId> =
            self.gate.opted_in_users().await?.into_iter().collect();
        let scores: Vec<_> = sheet
            .scores
            .into_iter()
            .filter(|s| still_opted_in.contains(&s.user_id))
            .collect();
        let scored_users = scores.len();
        let failures: Vec<_> = scores.iter().filter_map(|s| s.failure.clone()).collect();

        let entries = ranking::leaderboard_entries(scores, self.config.retention);
        let hash = ranking::entries_hash(&entries);
        let outcome = self
            .store
            .publish_entries(leaderboard.id, &entries, hash)
            .await?;

        info!(
            %category,
            %period,
            leaderboard_id = leaderboard.id,
            scored_users,
            entries = entries.len(),
            failures = failures.len(),
            ?outcome,
            "recomputed leaderboard"
        );

        Ok(RecomputeReport {
            leaderboard_id: leaderboard.id,
            category,
            period,
            window,
            scored_users,
            entries: entries.len(),
            outcome,
            failures,
        })
    }

    /// The top `limit` entries of the last published recompute.
    pub async fn top(
        &self,
        category: MetricCategory,
        period: Period,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>> {
        let Some(leaderboard) = self.store.active_leaderboard(category, period).await? else {
            return Ok(Vec::new());
        };

        let limit = limit.min(self.config.retention);
        Ok(self.store.entries(leaderboard.id, limit).await?)
    }

    /// The user's rank on every category's all-time leaderboard. Opted-out
    /// users have no ranks.
    pub async fn rankings_for(&self, user_id: UserId) -> Result<Vec<UserRanking>> {
        let opted_in = self.gate.is_opted_in(user_id).await?;

        let mut rankings = Vec::with_capacity(MetricCategory::ALL.len());
        for category in MetricCategory::ALL {
            let entry = if opted_in {
                match self.store.active_leaderboard(category, Period::AllTime).await? {
                    Some(leaderboard) => self.store.entry_for_user(leaderboard.id, user_id).await?,
                    None => None,
                }
            } else {
                None
            };

            rankings.push(UserRanking {
                category,
                rank: entry.map(|e| e.rank),
                score: entry.map(|e| e.score),
            });
        }

        Ok(rankings)
    }

    pub fn is_recomputing(&self, category: MetricCategory, period: Period) -> bool {
        self.in_flight.is_running(&(category, period))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryActivity, MemoryStore};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()
    }

    fn setup() -> (
        Arc<MemoryStore>,
        Arc<MemoryActivity>,
        LeaderboardAggregator<MemoryStore, MemoryActivity>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(MemoryActivity::new());
        let aggregator =
            LeaderboardAggregator::new(Arc::clone(&store), Arc::clone(&source), EngineConfig::default());
        (store, source, aggregator)
    }

    #[tokio::test]
    async fn recompute_reuses_the_leaderboard_of_the_current_window() {
        let (store, source, aggregator) = setup();
        store.set_opt_in(1, true).await.unwrap();
        source.add_task(1, 10, now());

        let first = aggregator
            .recompute(MetricCategory::Xp, Period::Daily, now())
            .await
            .unwrap();
        let second = aggregator
            .recompute(MetricCategory::Xp, Period::Daily, now())
            .await
            .unwrap();

        assert_eq!(first.leaderboard_id, second.leaderboard_id);
        assert_eq!(first.outcome, PublishOutcome::Published { generation: 1 });
        assert_eq!(second.outcome, PublishOutcome::Unchanged);
        assert_eq!(store.leaderboards().len(), 1);
    }

    #[tokio::test]
    async fn a_new_window_retires_the_previous_leaderboard() {
        let (store, source, aggregator) = setup();
        store.set_opt_in(1, true).await.unwrap();
        source.add_task(1, 10, now());

        aggregator
            .recompute(MetricCategory::Tasks, Period::Daily, now())
            .await
            .unwrap();
        let tomorrow = now() + chrono::Duration::days(1);
        let report = aggregator
            .recompute(MetricCategory::Tasks, Period::Daily, tomorrow)
            .await
            .unwrap();

        let active: Vec<_> = store
            .leaderboards()
            .into_iter()
            .filter(|lb| lb.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, report.leaderboard_id);

        // Yesterday's task does not count today.
        let top = aggregator
            .top(MetricCategory::Tasks, Period::Daily, 10)
            .await
            .unwrap();
        assert_eq!(top, vec![LeaderboardEntry { user_id: 1, score: 0, rank: 1 }]);
    }

    #[tokio::test]
    async fn top_is_empty_before_the_first_recompute() {
        let (_store, _source, aggregator) = setup();
        let top = aggregator
            .top(MetricCategory::Level, Period::AllTime, 10)
            .await
            .unwrap();
        assert!(top.is_empty());
    }

    #[tokio::test]
    async fn rankings_cover_every_category() {
        let (store, source, aggregator) = setup();
        for user in [1, 2] {
            store.set_opt_in(user, true).await.unwrap();
        }
        source.set_level(1, 3);
        source.set_level(2, 8);

        aggregator
            .recompute(MetricCategory::Level, Period::AllTime, now())
            .await
            .unwrap();

        let rankings = aggregator.rankings_for(1).await.unwrap();
        assert_eq!(rankings.len(), MetricCategory::ALL.len());
        let level = rankings
            .iter()
            .find(|r| r.category == MetricCategory::Level)
            .unwrap();
        assert_eq!((level.rank, level.score), (Some(2), Some(3)));
        let xp = rankings
            .iter()
            .find(|r| r.category == MetricCategory::Xp)
            .unwrap();
        assert_eq!(xp.rank, None);

        store.set_opt_in(1, false).await.unwrap();
        let hidden = aggregator.rankings_for(1).await.unwrap();
        assert!(hidden.iter().all(|r| r.rank.is_none()));
    }
}
