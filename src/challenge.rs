//! Time-boxed challenges: membership, live scoring and one-time settlement.

use crate::activity::ActivitySource;
use crate::announcements::{self, Announcement, AnnouncementSender};
use crate::common::{
    Challenge, ChallengeId, ChallengeParticipant, ChallengeStatus, ChallengeType, LedgerCredit,
    NewChallenge, Payout, Settlement, Standing, UserId, Window,
};
use crate::config::EngineConfig;
use crate::error::{EngineError, PartialComputationError, Result};
use crate::in_flight::InFlight;
use crate::ranking;
use crate::scoring::{Formula, ScoreCalculator};
use crate::store::{ChallengeStore, CommitOutcome, JoinOutcome, LeaveOutcome};
use az::SaturatingAs;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Share of `prize_xp` paid to ranks 1, 2 and 3, in tenths.
const PAYOUT_TENTHS: [u64; 3] = [10, 6, 3];

/// Payouts for the top ranks of `standings`. Ranks without a participant pay nothing.
pub fn payouts(standings: &[Standing], prize_xp: u64) -> Vec<Payout> {
    standings
        .iter()
        .filter_map(|standing| {
            let tenths = PAYOUT_TENTHS.get(standing.rank.checked_sub(1)? as usize)?;
            Some(Payout {
                user_id: standing.user_id,
                rank: standing.rank,
                score: standing.score,
                amount: (u128::from(prize_xp) * u128::from(*tenths) / 10).saturating_as(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringReport {
    pub challenge_id: ChallengeId,
    pub window: Window,
    pub standings: Vec<Standing>,
    pub failures: Vec<PartialComputationError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReport {
    pub challenge_id: ChallengeId,
    pub standings: Vec<Standing>,
    pub payouts: Vec<Payout>,
    pub failures: Vec<PartialComputationError>,
}

#[derive(Debug)]
pub struct ChallengeService<S, A> {
    store: Arc<S>,
    calculator: ScoreCalculator<A>,
    in_flight: InFlight<ChallengeId>,
    announcements: AnnouncementSender,
    config: EngineConfig,
}

impl<S, A> ChallengeService<S, A>
where
    S: ChallengeStore,
    A: ActivitySource,
{
    pub fn new(
        store: Arc<S>,
        source: Arc<A>,
        announcements: AnnouncementSender,
        config: EngineConfig,
    ) -> Self {
        ChallengeService {
            store,
            calculator: ScoreCalculator::new(source, config.fan_out, config.batch_size),
            in_flight: InFlight::new(),
            announcements,
            config,
        }
    }

    pub async fn create(&self, new: NewChallenge, now: DateTime<Utc>) -> Result<Challenge> {
        if new.name.trim().is_empty() {
            return Err(EngineError::InvalidChallenge("name is empty".to_owned()));
        }
        if new.end_date < new.start_date {
            return Err(EngineError::InvalidChallenge(format!(
                "ends ({}) before it starts ({})",
                new.end_date, new.start_date
            )));
        }
        if new.start_date < now.date_naive() {
            return Err(EngineError::InvalidChallenge(format!(
                "start date {} is in the past",
                new.start_date
            )));
        }
        if new.max_participants < 2 {
            return Err(EngineError::InvalidChallenge(
                "needs room for at least 2 participants".to_owned(),
            ));
        }
        if new.custom_rule.is_some() && new.challenge_type != ChallengeType::Custom {
            return Err(EngineError::InvalidChallenge(format!(
                "a scoring rule only applies to custom challenges, not {}",
                new.challenge_type
            )));
        }

        let challenge = self.store.insert_challenge(&new).await?;
        info!(
            challenge_id = challenge.id,
            owner_id = challenge.owner_id,
            challenge_type = %challenge.challenge_type,
            "created challenge"
        );

        let challenge = self.refresh_status(challenge, now).await?;
        Ok(challenge)
    }

    pub async fn challenge(&self, challenge_id: ChallengeId) -> Result<Challenge> {
        self.store
            .challenge(challenge_id)
            .await?
            .ok_or(EngineError::ChallengeNotFound(challenge_id))
    }

    /// Participants ordered by their last computed rank; unranked ones last.
    pub async fn standings(&self, challenge_id: ChallengeId) -> Result<Vec<ChallengeParticipant>> {
        let mut participants = self.store.participants(challenge_id).await?;
        participants.sort_by_key(|p| (p.rank.is_none(), p.rank, p.joined_at, p.user_id));
        Ok(participants)
    }

    pub async fn join(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<ChallengeParticipant> {
        let challenge = self.challenge(challenge_id).await?;
        self.refresh_status(challenge, now).await?;

        match self.store.add_participant(challenge_id, user_id, now).await? {
            JoinOutcome::Joined(participant) => {
                info!(challenge_id, user_id, "joined challenge");
                Ok(participant)
            }
            JoinOutcome::AlreadyJoined => Err(EngineError::AlreadyParticipating {
                user_id,
                challenge_id,
            }),
            JoinOutcome::Full { max_participants } => Err(EngineError::CapacityExceeded {
                challenge_id,
                max_participants,
            }),
            JoinOutcome::Closed(status) => Err(EngineError::InvalidStateTransition(format!(
                "cannot join challenge {challenge_id} while it is {status}"
            ))),
            JoinOutcome::NotFound => Err(EngineError::ChallengeNotFound(challenge_id)),
        }
    }

    pub async fn leave(&self, challenge_id: ChallengeId, user_id: UserId) -> Result<()> {
        match self.store.remove_participant(challenge_id, user_id).await? {
            LeaveOutcome::Left => {
                info!(challenge_id, user_id, "left challenge");
                Ok(())
            }
            LeaveOutcome::NotParticipant => Err(EngineError::NotParticipant {
                user_id,
                challenge_id,
            }),
            LeaveOutcome::Closed(status) => Err(EngineError::InvalidStateTransition(format!(
                "cannot leave challenge {challenge_id} once it is {status}"
            ))),
            LeaveOutcome::NotFound => Err(EngineError::ChallengeNotFound(challenge_id)),
        }
    }

    /// Deletes a challenge that has not started. Only its owner may do this.
    pub async fn delete(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let challenge = self.challenge(challenge_id).await?;
        if challenge.owner_id != user_id {
            return Err(EngineError::NotAuthorized {
                user_id,
                challenge_id,
                action: "delete",
            });
        }

        let challenge = self.refresh_status(challenge, now).await?;
        if challenge.status != ChallengeStatus::Upcoming
            || !self.store.delete_upcoming_challenge(challenge_id).await?
        {
            return Err(EngineError::InvalidStateTransition(format!(
                "challenge {challenge_id} has already started"
            )));
        }

        info!(challenge_id, "deleted challenge");
        Ok(())
    }

    pub async fn active(&self) -> Result<Vec<Challenge>> {
        Ok(self
            .store
            .challenges_with_status(ChallengeStatus::Active)
            .await?)
    }

    /// Promotes every upcoming challenge whose start date has arrived.
    pub async fn activate_due(&self, now: DateTime<Utc>) -> Result<Vec<ChallengeId>> {
        let mut activated = Vec::new();
        for challenge in self
            .store
            .challenges_with_status(ChallengeStatus::Upcoming)
            .await?
        {
            let id = challenge.id;
            if self.refresh_status(challenge, now).await?.status == ChallengeStatus::Active {
                activated.push(id);
            }
        }

        Ok(activated)
    }

    /// Rescores every participant over the elapsed part of the challenge and
    /// stores the new scores and ranks in one batch.
    ///
    /// Safe to call redundantly. A call while another pass or the settlement
    /// of the same challenge runs is rejected with `ConcurrentRecompute`.
    pub async fn update_scores(
        &self,
        challenge_id: ChallengeId,
        now: DateTime<Utc>,
    ) -> Result<ScoringReport> {
        let _guard = self.in_flight.try_acquire(challenge_id)?;
        let challenge = self.challenge(challenge_id).await?;
        let challenge = self.refresh_status(challenge, now).await?;
        if challenge.status != ChallengeStatus::Active {
            return Err(EngineError::InvalidStateTransition(format!(
                "challenge {challenge_id} is {}, only active challenges are scored",
                challenge.status
            )));
        }

        let what = format!("scoring of challenge {challenge_id}");
        self.within_budget(what, async {
            let (window, standings, failures) = self.score_participants(&challenge, now).await?;
            match self.store.save_standings(challenge_id, &standings).await? {
                CommitOutcome::Committed => {}
                outcome => return Err(rejected_commit(challenge_id, outcome)),
            }

            info!(
                challenge_id,
                participants = standings.len(),
                failures = failures.len(),
                "updated challenge scores"
            );
            Ok::<_, EngineError>(ScoringReport {
                challenge_id,
                window,
                standings,
                failures,
            })
        })
        .await
    }

    /// Finalises an elapsed challenge: scores it one last time, marks the top
    /// three as winners, credits their prizes and completes it, all as one
    /// commit. Winner announcements are queued after the commit.
    pub async fn settle(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<SettlementReport> {
        let challenge = self.challenge(challenge_id).await?;
        if challenge.owner_id != user_id {
            return Err(EngineError::NotAuthorized {
                user_id,
                challenge_id,
                action: "settle",
            });
        }

        let _guard = self.in_flight.try_acquire(challenge_id)?;
        let challenge = self.refresh_status(challenge, now).await?;
        match challenge.status {
            ChallengeStatus::Completed => {
                return Err(EngineError::InvalidStateTransition(format!(
                    "challenge {challenge_id} is already settled"
                )));
            }
            ChallengeStatus::Upcoming => {
                return Err(EngineError::InvalidStateTransition(format!(
                    "challenge {challenge_id} has not started"
                )));
            }
            ChallengeStatus::Active if !challenge.has_elapsed(now) => {
                return Err(EngineError::InvalidStateTransition(format!(
                    "challenge {challenge_id} runs until {}",
                    challenge.end_date
                )));
            }
            ChallengeStatus::Active => {}
        }

        let what = format!("settlement of challenge {challenge_id}");
        let report = self
            .within_budget(what, async {
                let (_window, standings, failures) =
                    self.score_participants(&challenge, now).await?;
                let winners = payouts(&standings, challenge.prize_xp);
                let credits = winners
                    .iter()
                    .filter(|payout| payout.amount > 0)
                    .map(|payout| LedgerCredit {
                        user_id: payout.user_id,
                        amount: payout.amount,
                        reason: format!(
                            "Placed #{} in challenge \"{}\"",
                            payout.rank, challenge.name
                        ),
                    })
                    .collect();

                let settlement = Settlement {
                    challenge_id,
                    standings,
                    payouts: winners,
                    credits,
                };
                match self.store.commit_settlement(&settlement).await? {
                    CommitOutcome::Committed => {}
                    outcome => return Err(rejected_commit(challenge_id, outcome)),
                }

                Ok::<_, EngineError>(SettlementReport {
                    challenge_id,
                    standings: settlement.standings,
                    payouts: settlement.payouts,
                    failures,
                })
            })
            .await?;

        info!(
            challenge_id,
            winners = report.payouts.len(),
            "settled challenge"
        );
        for payout in &report.payouts {
            announcements::announce(&self.announcements, Announcement::winner(&challenge, payout));
        }

        Ok(report)
    }

    pub fn is_busy(&self, challenge_id: ChallengeId) -> bool {
        self.in_flight.is_running(&challenge_id)
    }

    async fn score_participants(
        &self,
        challenge: &Challenge,
        now: DateTime<Utc>,
    ) -> Result<(Window, Vec<Standing>, Vec<PartialComputationError>)> {
        let window = challenge.scoring_window(now);
        let participants = self.store.participants(challenge.id).await?;
        let users: Vec<_> = participants.iter().map(|p| p.user_id).collect();
        let joined_at: HashMap<_, _> = participants
            .iter()
            .map(|p| (p.user_id, p.joined_at))
            .collect();

        let sheet = self
            .calculator
            .score_all(&users, Formula::for_challenge(challenge), &window)
            .await;
        let failures: Vec<_> = sheet.failures().cloned().collect();

        // Equal scores go to whoever joined first.
        let standings = ranking::rank_rows(
            sheet.scores,
            |s| s.score,
            |s| (joined_at.get(&s.user_id).copied(), s.user_id),
        )
        .into_iter()
        .map(|(s, rank)| Standing {
            user_id: s.user_id,
            score: s.score,
            rank,
        })
        .collect();

        Ok((window, standings, failures))
    }

    /// Moves an upcoming challenge to active once its start date has arrived.
    async fn refresh_status(&self, challenge: Challenge, now: DateTime<Utc>) -> Result<Challenge> {
        if challenge.status != ChallengeStatus::Upcoming || !challenge.has_started(now) {
            return Ok(challenge);
        }

        let id = challenge.id;
        if self
            .store
            .transition_status(id, ChallengeStatus::Upcoming, ChallengeStatus::Active)
            .await?
        {
            info!(challenge_id = id, "challenge started");
        }
        self.challenge(id).await
    }

    async fn within_budget<T>(
        &self,
        what: String,
        pass: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let budget = self.config.pass_time_budget;
        match tokio::time::timeout(budget, pass).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%what, ?budget, "pass abandoned");
                Err(EngineError::TimedOut { what, budget })
            }
        }
    }
}

fn rejected_commit(challenge_id: ChallengeId, outcome: CommitOutcome) -> EngineError {
    match outcome {
        CommitOutcome::StaleParticipantSet => EngineError::StaleParticipantSet(challenge_id),
        CommitOutcome::Closed(status) => EngineError::InvalidStateTransition(format!(
            "challenge {challenge_id} is {status}"
        )),
        CommitOutcome::NotFound => EngineError::ChallengeNotFound(challenge_id),
        CommitOutcome::Committed => EngineError::InvalidStateTransition(format!(
            "commit of challenge {challenge_id} was rejected"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standings(scores: &[(UserId, u64)]) -> Vec<Standing> {
        scores
            .iter()
            .zip(1..)
            .map(|(&(user_id, score), rank)| Standing {
                user_id,
                score,
                rank,
            })
            .collect()
    }

    #[test]
    fn top_three_are_paid_in_tiers() {
        let paid: Vec<_> = payouts(&standings(&[(1, 30), (2, 20), (3, 10), (4, 5)]), 1000)
            .iter()
            .map(|p| (p.user_id, p.amount))
            .collect();
        assert_eq!(paid, vec![(1, 1000), (2, 600), (3, 300)]);
    }

    #[test]
    fn missing_ranks_pay_nothing() {
        let paid: Vec<_> = payouts(&standings(&[(1, 30), (2, 20)]), 1000)
            .iter()
            .map(|p| p.amount)
            .collect();
        assert_eq!(paid, vec![1000, 600]);
        assert!(payouts(&[], 1000).is_empty());
    }

    #[test]
    fn tiers_round_down() {
        let paid: Vec<_> = payouts(&standings(&[(1, 3), (2, 2), (3, 1)]), 55)
            .iter()
            .map(|p| p.amount)
            .collect();
        assert_eq!(paid, vec![55, 33, 16]);
    }

    #[test]
    fn large_prizes_are_paid_exactly() {
        let prize = i64::MAX as u64;
        let paid: Vec<_> = payouts(&standings(&[(1, 3), (2, 2), (3, 1)]), prize)
            .iter()
            .map(|p| p.amount)
            .collect();
        assert_eq!(
            paid,
            vec![prize, 5_534_023_222_112_865_484, 2_767_011_611_056_432_742]
        );

        let top = payouts(&standings(&[(1, 1)]), u64::MAX);
        assert_eq!(top[0].amount, u64::MAX);
    }
}
