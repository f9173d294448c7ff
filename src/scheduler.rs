//! One scheduler round over every leaderboard and challenge.

use crate::activity::ActivitySource;
use crate::challenge::ChallengeService;
use crate::common::{ChallengeId, MetricCategory, Period};
use crate::leaderboard::LeaderboardAggregator;
use crate::store::{ChallengeStore, LeaderboardStore, ProfileStore};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub recomputed: usize,
    pub activated: Vec<ChallengeId>,
    pub scored: Vec<ChallengeId>,
    pub settled: Vec<ChallengeId>,
    /// Passes that failed. A failure is logged and never stops the round.
    pub failed: usize,
}

/// Recomputes every `(category, period)` leaderboard, promotes due
/// challenges, rescores active ones and, with `auto_settle`, settles the
/// elapsed ones on their owner's behalf.
pub async fn tick<S, A>(
    aggregator: &LeaderboardAggregator<S, A>,
    challenges: &ChallengeService<S, A>,
    auto_settle: bool,
    now: DateTime<Utc>,
) -> TickReport
where
    S: LeaderboardStore + ProfileStore + ChallengeStore,
    A: ActivitySource,
{
    let mut report = TickReport::default();

    for category in MetricCategory::ALL {
        for period in Period::ALL {
            match aggregator.recompute(category, period, now).await {
                Ok(_) => report.recomputed += 1,
                Err(e) => {
                    warn!(%category, %period, "leaderboard recompute failed: {e}");
                    report.failed += 1;
                }
            }
        }
    }

    match challenges.activate_due(now).await {
        Ok(activated) => report.activated = activated,
        Err(e) => {
            warn!("challenge activation failed: {e}");
            report.failed += 1;
        }
    }
    if !report.activated.is_empty() {
        info!(count = report.activated.len(), "activated challenges");
    }

    let active = match challenges.active().await {
        Ok(active) => active,
        Err(e) => {
            warn!("listing active challenges failed: {e}");
            report.failed += 1;
            Vec::new()
        }
    };

    for challenge in active {
        let id = challenge.id;
        if auto_settle && challenge.has_elapsed(now) {
            match challenges.settle(id, challenge.owner_id, now).await {
                Ok(_) => report.settled.push(id),
                Err(e) => {
                    warn!(challenge_id = id, "settlement failed: {e}");
                    report.failed += 1;
                }
            }
        } else {
            match challenges.update_scores(id, now).await {
                Ok(_) => report.scored.push(id),
                Err(e) => {
                    warn!(challenge_id = id, "challenge scoring failed: {e}");
                    report.failed += 1;
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::announcements;
    use crate::common::{ChallengeType, NewChallenge};
    use crate::config::EngineConfig;
    use crate::store::memory::{MemoryActivity, MemoryStore};
    use chrono::{NaiveDate, TimeZone};
    use std::sync::Arc;

    type Fixture = (
        Arc<MemoryStore>,
        LeaderboardAggregator<MemoryStore, MemoryActivity>,
        ChallengeService<MemoryStore, MemoryActivity>,
    );

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()
    }

    fn setup() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(MemoryActivity::new());
        let (sender, _receiver) = announcements::channel();
        let aggregator = LeaderboardAggregator::new(
            Arc::clone(&store),
            Arc::clone(&source),
            EngineConfig::default(),
        );
        let challenges =
            ChallengeService::new(Arc::clone(&store), source, sender, EngineConfig::default());
        (store, aggregator, challenges)
    }

    async fn two_day_challenge(challenges: &ChallengeService<MemoryStore, MemoryActivity>) -> ChallengeId {
        let challenge = challenges
            .create(
                NewChallenge {
                    owner_id: 9,
                    name: "Two days".to_owned(),
                    description: String::new(),
                    challenge_type: ChallengeType::MostTasks,
                    custom_rule: None,
                    start_date: NaiveDate::from_ymd_opt(2026, 10, 14).unwrap(),
                    end_date: NaiveDate::from_ymd_opt(2026, 10, 15).unwrap(),
                    max_participants: 4,
                    prize_xp: 100,
                    is_public: true,
                },
                now(),
            )
            .await
            .unwrap();
        for user in [1, 2] {
            challenges.join(challenge.id, user, now()).await.unwrap();
        }
        challenge.id
    }

    #[tokio::test]
    async fn a_round_covers_every_leaderboard_and_scores_running_challenges() {
        let (_store, aggregator, challenges) = setup();
        let id = two_day_challenge(&challenges).await;

        let report = tick(&aggregator, &challenges, true, now()).await;

        assert_eq!(
            report.recomputed,
            MetricCategory::ALL.len() * Period::ALL.len()
        );
        assert_eq!(report.scored, vec![id]);
        assert!(report.settled.is_empty());
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn store_failures_are_counted_and_the_round_carries_on() {
        let (store, aggregator, challenges) = setup();
        let id = two_day_challenge(&challenges).await;
        let after = Utc.with_ymd_and_hms(2026, 10, 16, 6, 0, 0).unwrap();

        store.fail_next_publish();
        store.fail_next_listing();
        let report = tick(&aggregator, &challenges, true, after).await;

        // One failed publish and the failed listing of upcoming challenges.
        assert_eq!(report.failed, 2);
        assert_eq!(report.settled, vec![id]);
        assert_eq!(store.ledger().len(), 2);

        let next = tick(&aggregator, &challenges, true, after).await;
        assert_eq!(next.failed, 0);
        assert!(next.settled.is_empty());
    }

    #[tokio::test]
    async fn elapsed_challenges_wait_for_their_owner_without_auto_settle() {
        let (store, aggregator, challenges) = setup();
        let id = two_day_challenge(&challenges).await;
        let after = Utc.with_ymd_and_hms(2026, 10, 16, 6, 0, 0).unwrap();

        let report = tick(&aggregator, &challenges, false, after).await;

        assert_eq!(report.scored, vec![id]);
        assert!(report.settled.is_empty());
        assert!(store.ledger().is_empty());
    }
}
