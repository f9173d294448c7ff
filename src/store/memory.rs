//! In-process implementations of the stores and collaborators.

use super::{
    ChallengeStore, CommitOutcome, JoinOutcome, LeaderboardStore, LeaveOutcome, ProfileStore,
    PublishOutcome, same_participants,
};
use crate::activity::ActivitySource;
use crate::announcements::AnnouncementFeed;
use crate::common::{
    Challenge, ChallengeId, ChallengeParticipant, ChallengeStatus, CompletedTask, Leaderboard,
    LeaderboardEntry, LeaderboardId, LedgerCredit, MetricCategory, NewChallenge, Period, Profile,
    Settlement, Standing, UserActivity, UserId, Window,
};
use crate::error::{SourceError, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug)]
struct LeaderboardSlot {
    leaderboard: Leaderboard,
    generation: i64,
    hash: Option<i64>,
    entries: Arc<Vec<LeaderboardEntry>>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    leaderboards: BTreeMap<LeaderboardId, LeaderboardSlot>,
    opt_in: HashMap<UserId, bool>,
    challenges: BTreeMap<ChallengeId, Challenge>,
    participants: BTreeMap<ChallengeId, Vec<ChallengeParticipant>>,
    ledger: Vec<LedgerCredit>,
    fail_next_publish: bool,
    fail_next_listing: bool,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Mutex-guarded store. Each leaderboard's entry set is an `Arc` swapped in
/// one assignment, so readers hold either the old or the new set.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `publish_entries` call fail before touching anything.
    pub fn fail_next_publish(&self) {
        self.lock().fail_next_publish = true;
    }

    /// Makes the next `challenges_with_status` call fail.
    pub fn fail_next_listing(&self) {
        self.lock().fail_next_listing = true;
    }

    pub fn ledger(&self) -> Vec<LedgerCredit> {
        self.lock().ledger.clone()
    }

    pub fn generation(&self, leaderboard_id: LeaderboardId) -> Option<i64> {
        self.lock()
            .leaderboards
            .get(&leaderboard_id)
            .map(|slot| slot.generation)
    }

    pub fn leaderboards(&self) -> Vec<Leaderboard> {
        self.lock()
            .leaderboards
            .values()
            .map(|slot| slot.leaderboard.clone())
            .collect()
    }
}

#[async_trait]
impl LeaderboardStore for MemoryStore {
    async fn get_or_create_leaderboard(
        &self,
        category: MetricCategory,
        period: Period,
        window: Window,
    ) -> Result<Leaderboard, StoreError> {
        let mut inner = self.lock();
        let existing = inner.leaderboards.values().find(|slot| {
            let lb = &slot.leaderboard;
            lb.category == category && lb.period == period && lb.window == window
        });
        if let Some(slot) = existing {
            return Ok(slot.leaderboard.clone());
        }

        // Becomes active on its first publish.
        let id = inner.next_id();
        let leaderboard = Leaderboard {
            id,
            category,
            period,
            window,
            is_active: false,
        };
        inner.leaderboards.insert(
            id,
            LeaderboardSlot {
                leaderboard: leaderboard.clone(),
                generation: 0,
                hash: None,
                entries: Arc::new(Vec::new()),
            },
        );

        Ok(leaderboard)
    }

    async fn active_leaderboard(
        &self,
        category: MetricCategory,
        period: Period,
    ) -> Result<Option<Leaderboard>, StoreError> {
        Ok(self
            .lock()
            .leaderboards
            .values()
            .map(|slot| &slot.leaderboard)
            .find(|lb| lb.category == category && lb.period == period && lb.is_active)
            .cloned())
    }

    async fn publish_entries(
        &self,
        leaderboard_id: LeaderboardId,
        entries: &[LeaderboardEntry],
        hash: i64,
    ) -> Result<PublishOutcome, StoreError> {
        let mut inner = self.lock();
        if std::mem::take(&mut inner.fail_next_publish) {
            return Err(StoreError::Unavailable("injected publish failure".to_owned()));
        }

        let (category, period) = {
            let slot = inner
                .leaderboards
                .get(&leaderboard_id)
                .ok_or(StoreError::Corrupt {
                    table: "leaderboards",
                    reason: format!("no leaderboard {leaderboard_id}"),
                })?;
            if slot.leaderboard.is_active && slot.hash == Some(hash) {
                return Ok(PublishOutcome::Unchanged);
            }
            (slot.leaderboard.category, slot.leaderboard.period)
        };

        for slot in inner.leaderboards.values_mut() {
            let lb = &mut slot.leaderboard;
            if lb.category == category && lb.period == period {
                lb.is_active = lb.id == leaderboard_id;
            }
        }

        let slot = inner
            .leaderboards
            .get_mut(&leaderboard_id)
            .ok_or(StoreError::OutOfRange("leaderboard_id"))?;
        slot.generation += 1;
        slot.hash = Some(hash);
        slot.entries = Arc::new(entries.to_vec());

        Ok(PublishOutcome::Published {
            generation: slot.generation,
        })
    }

    async fn entries(
        &self,
        leaderboard_id: LeaderboardId,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let current = self
            .lock()
            .leaderboards
            .get(&leaderboard_id)
            .map(|slot| Arc::clone(&slot.entries))
            .unwrap_or_default();

        Ok(current.iter().take(limit).copied().collect())
    }

    async fn entry_for_user(
        &self,
        leaderboard_id: LeaderboardId,
        user_id: UserId,
    ) -> Result<Option<LeaderboardEntry>, StoreError> {
        Ok(self
            .lock()
            .leaderboards
            .get(&leaderboard_id)
            .and_then(|slot| slot.entries.iter().find(|e| e.user_id == user_id).copied()))
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn set_opt_in(&self, user_id: UserId, opt_in: bool) -> Result<(), StoreError> {
        self.lock().opt_in.insert(user_id, opt_in);
        Ok(())
    }

    async fn is_opted_in(&self, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self.lock().opt_in.get(&user_id).copied().unwrap_or(false))
    }

    async fn opted_in_users(&self) -> Result<Vec<UserId>, StoreError> {
        let mut users: Vec<_> = self
            .lock()
            .opt_in
            .iter()
            .filter(|&(_, &opt_in)| opt_in)
            .map(|(&user_id, _)| user_id)
            .collect();
        users.sort_unstable();
        Ok(users)
    }
}

#[async_trait]
impl ChallengeStore for MemoryStore {
    async fn insert_challenge(&self, new: &NewChallenge) -> Result<Challenge, StoreError> {
        let mut inner = self.lock();
        let id = inner.next_id();
        let challenge = Challenge {
            id,
            owner_id: new.owner_id,
            name: new.name.clone(),
            description: new.description.clone(),
            challenge_type: new.challenge_type,
            custom_rule: new.custom_rule,
            start_date: new.start_date,
            end_date: new.end_date,
            max_participants: new.max_participants,
            prize_xp: new.prize_xp,
            is_public: new.is_public,
            status: ChallengeStatus::Upcoming,
        };
        inner.challenges.insert(id, challenge.clone());
        inner.participants.insert(id, Vec::new());

        Ok(challenge)
    }

    async fn challenge(&self, id: ChallengeId) -> Result<Option<Challenge>, StoreError> {
        Ok(self.lock().challenges.get(&id).cloned())
    }

    async fn challenges_with_status(
        &self,
        status: ChallengeStatus,
    ) -> Result<Vec<Challenge>, StoreError> {
        let mut inner = self.lock();
        if std::mem::take(&mut inner.fail_next_listing) {
            return Err(StoreError::Unavailable("injected listing failure".to_owned()));
        }

        Ok(inner
            .challenges
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect())
    }

    async fn transition_status(
        &self,
        id: ChallengeId,
        from: ChallengeStatus,
        to: ChallengeStatus,
    ) -> Result<bool, StoreError> {
        match self.lock().challenges.get_mut(&id) {
            Some(challenge) if challenge.status == from => {
                challenge.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_upcoming_challenge(&self, id: ChallengeId) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        match inner.challenges.get(&id) {
            Some(challenge) if challenge.status == ChallengeStatus::Upcoming => {
                inner.challenges.remove(&id);
                inner.participants.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn participants(&self, id: ChallengeId) -> Result<Vec<ChallengeParticipant>, StoreError> {
        Ok(self.lock().participants.get(&id).cloned().unwrap_or_default())
    }

    async fn add_participant(
        &self,
        id: ChallengeId,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> Result<JoinOutcome, StoreError> {
        let mut inner = self.lock();
        let Some(challenge) = inner.challenges.get(&id) else {
            return Ok(JoinOutcome::NotFound);
        };
        if challenge.status == ChallengeStatus::Completed {
            return Ok(JoinOutcome::Closed(challenge.status));
        }
        let max_participants = challenge.max_participants;

        let participants = inner.participants.entry(id).or_default();
        if participants.iter().any(|p| p.user_id == user_id) {
            return Ok(JoinOutcome::AlreadyJoined);
        }
        if participants.len() >= max_participants as usize {
            return Ok(JoinOutcome::Full { max_participants });
        }

        let participant = ChallengeParticipant {
            challenge_id: id,
            user_id,
            joined_at,
            score: 0,
            rank: None,
            is_winner: false,
        };
        participants.push(participant.clone());

        Ok(JoinOutcome::Joined(participant))
    }

    async fn remove_participant(
        &self,
        id: ChallengeId,
        user_id: UserId,
    ) -> Result<LeaveOutcome, StoreError> {
        let mut inner = self.lock();
        let Some(challenge) = inner.challenges.get(&id) else {
            return Ok(LeaveOutcome::NotFound);
        };
        if challenge.status == ChallengeStatus::Completed {
            return Ok(LeaveOutcome::Closed(challenge.status));
        }

        let participants = inner.participants.entry(id).or_default();
        let before = participants.len();
        participants.retain(|p| p.user_id != user_id);
        if participants.len() == before {
            return Ok(LeaveOutcome::NotParticipant);
        }

        Ok(LeaveOutcome::Left)
    }

    async fn save_standings(
        &self,
        id: ChallengeId,
        standings: &[Standing],
    ) -> Result<CommitOutcome, StoreError> {
        let mut inner = self.lock();
        let Some(challenge) = inner.challenges.get(&id) else {
            return Ok(CommitOutcome::NotFound);
        };
        if challenge.status != ChallengeStatus::Active {
            return Ok(CommitOutcome::Closed(challenge.status));
        }

        let participants = inner.participants.entry(id).or_default();
        if !same_participants(participants.iter().map(|p| p.user_id).collect(), standings) {
            return Ok(CommitOutcome::StaleParticipantSet);
        }
        apply_standings(participants, standings);

        Ok(CommitOutcome::Committed)
    }

    async fn commit_settlement(&self, settlement: &Settlement) -> Result<CommitOutcome, StoreError> {
        let mut inner = self.lock();
        let id = settlement.challenge_id;
        let Some(challenge) = inner.challenges.get(&id) else {
            return Ok(CommitOutcome::NotFound);
        };
        if challenge.status != ChallengeStatus::Active {
            return Ok(CommitOutcome::Closed(challenge.status));
        }

        let participants = inner.participants.entry(id).or_default();
        if !same_participants(
            participants.iter().map(|p| p.user_id).collect(),
            &settlement.standings,
        ) {
            return Ok(CommitOutcome::StaleParticipantSet);
        }
        apply_standings(participants, &settlement.standings);
        for participant in participants.iter_mut() {
            participant.is_winner = settlement
                .payouts
                .iter()
                .any(|payout| payout.user_id == participant.user_id);
        }

        inner.ledger.extend(settlement.credits.iter().cloned());
        if let Some(challenge) = inner.challenges.get_mut(&id) {
            challenge.status = ChallengeStatus::Completed;
        }

        Ok(CommitOutcome::Committed)
    }
}

fn apply_standings(participants: &mut [ChallengeParticipant], standings: &[Standing]) {
    for participant in participants {
        if let Some(standing) = standings.iter().find(|s| s.user_id == participant.user_id) {
            participant.score = standing.score;
            participant.rank = Some(standing.rank);
        }
    }
}

#[derive(Debug, Default)]
struct ActivityState {
    users: HashMap<UserId, UserActivity>,
    failing: HashSet<UserId>,
    latency: Option<Duration>,
}

/// Activity stores held in memory, with optional latency and per-user read failures.
#[derive(Debug, Default)]
pub struct MemoryActivity {
    state: Mutex<ActivityState>,
}

impl MemoryActivity {
    pub fn new() -> Self {
        MemoryActivity::default()
    }

    fn lock(&self) -> MutexGuard<'_, ActivityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_task(&self, user_id: UserId, xp_earned: i64, completed_at: DateTime<Utc>) {
        self.lock()
            .users
            .entry(user_id)
            .or_default()
            .completed_tasks
            .push(CompletedTask {
                xp_earned,
                completed_at,
            });
    }

    pub fn add_achievement(&self, user_id: UserId, unlocked_at: DateTime<Utc>) {
        self.lock()
            .users
            .entry(user_id)
            .or_default()
            .achievements_unlocked
            .push(unlocked_at);
    }

    pub fn set_streak(&self, user_id: UserId, streak: i32) {
        self.lock().users.entry(user_id).or_default().current_streak = Some(streak);
    }

    pub fn set_level(&self, user_id: UserId, level: i32) {
        let mut state = self.lock();
        let activity = state.users.entry(user_id).or_default();
        let total_xp = activity.profile.map_or(0, |p| p.total_xp);
        activity.profile = Some(Profile { level, total_xp });
    }

    /// Every read that includes `user_id` fails.
    pub fn fail_user(&self, user_id: UserId) {
        self.lock().failing.insert(user_id);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }
}

#[async_trait]
impl ActivitySource for MemoryActivity {
    async fn activity(
        &self,
        users: &[UserId],
        window: &Window,
    ) -> Result<HashMap<UserId, UserActivity>, SourceError> {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let state = self.lock();
        if let Some(user_id) = users.iter().find(|&u| state.failing.contains(u)) {
            return Err(SourceError::Unavailable(format!(
                "read failed for user {user_id}"
            )));
        }

        Ok(users
            .iter()
            .filter_map(|user_id| {
                let activity = state.users.get(user_id)?;
                let windowed = UserActivity {
                    completed_tasks: activity
                        .completed_tasks
                        .iter()
                        .filter(|t| window.contains(t.completed_at))
                        .copied()
                        .collect(),
                    achievements_unlocked: activity
                        .achievements_unlocked
                        .iter()
                        .filter(|&&at| window.contains(at))
                        .copied()
                        .collect(),
                    ..activity.clone()
                };
                Some((*user_id, windowed))
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub user_id: UserId,
    pub message: String,
    pub metadata: JsonValue,
}

/// Records posted announcements. Can be told to reject posts.
#[derive(Debug, Default)]
pub struct MemoryFeed {
    posts: Mutex<Vec<Post>>,
    failing: Mutex<bool>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        MemoryFeed::default()
    }

    pub fn posts(&self) -> Vec<Post> {
        self.posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }
}

#[async_trait]
impl AnnouncementFeed for MemoryFeed {
    async fn post(
        &self,
        user_id: UserId,
        message: &str,
        metadata: &JsonValue,
    ) -> Result<(), StoreError> {
        if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(StoreError::Unavailable("feed rejected the post".to_owned()));
        }

        self.posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Post {
                user_id,
                message: message.to_owned(),
                metadata: metadata.clone(),
            });
        Ok(())
    }
}
