//! Persistence behind the ranking engine.
//!
//! Every method that changes more than one row is all-or-nothing: either the
//! whole change becomes visible or nothing does.

use crate::common::{
    Challenge, ChallengeId, ChallengeParticipant, ChallengeStatus, Leaderboard, LeaderboardEntry,
    LeaderboardId, MetricCategory, NewChallenge, Period, Settlement, Standing, UserId, Window,
};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod memory;
pub mod postgres;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { generation: i64 },
    /// The current generation already has this content.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(ChallengeParticipant),
    AlreadyJoined,
    Full { max_participants: u32 },
    Closed(ChallengeStatus),
    NotFound,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    NotParticipant,
    Closed(ChallengeStatus),
    NotFound,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The participant set no longer matches the one that was scored.
    StaleParticipantSet,
    Closed(ChallengeStatus),
    NotFound,
}

#[async_trait]
pub trait LeaderboardStore: Send + Sync {
    /// Returns the leaderboard for `(category, period)` covering `window`,
    /// creating it if needed. A new leaderboard stays inactive until its
    /// first publish, so readers keep seeing the previous window's entries.
    async fn get_or_create_leaderboard(
        &self,
        category: MetricCategory,
        period: Period,
        window: Window,
    ) -> Result<Leaderboard, StoreError>;

    async fn active_leaderboard(
        &self,
        category: MetricCategory,
        period: Period,
    ) -> Result<Option<Leaderboard>, StoreError>;

    /// Atomically replaces the leaderboard's entry set with `entries` and
    /// makes it the active leaderboard of its `(category, period)`.
    async fn publish_entries(
        &self,
        leaderboard_id: LeaderboardId,
        entries: &[LeaderboardEntry],
        hash: i64,
    ) -> Result<PublishOutcome, StoreError>;

    /// The first `limit` entries of the current generation, by rank.
    async fn entries(
        &self,
        leaderboard_id: LeaderboardId,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, StoreError>;

    async fn entry_for_user(
        &self,
        leaderboard_id: LeaderboardId,
        user_id: UserId,
    ) -> Result<Option<LeaderboardEntry>, StoreError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn set_opt_in(&self, user_id: UserId, opt_in: bool) -> Result<(), StoreError>;

    async fn is_opted_in(&self, user_id: UserId) -> Result<bool, StoreError>;

    async fn opted_in_users(&self) -> Result<Vec<UserId>, StoreError>;
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn insert_challenge(&self, challenge: &NewChallenge) -> Result<Challenge, StoreError>;

    async fn challenge(&self, id: ChallengeId) -> Result<Option<Challenge>, StoreError>;

    async fn challenges_with_status(
        &self,
        status: ChallengeStatus,
    ) -> Result<Vec<Challenge>, StoreError>;

    /// Moves the challenge from `from` to `to`. Returns false if it was not in `from`.
    async fn transition_status(
        &self,
        id: ChallengeId,
        from: ChallengeStatus,
        to: ChallengeStatus,
    ) -> Result<bool, StoreError>;

    /// Deletes the challenge and its participants if it is still upcoming.
    async fn delete_upcoming_challenge(&self, id: ChallengeId) -> Result<bool, StoreError>;

    async fn participants(&self, id: ChallengeId) -> Result<Vec<ChallengeParticipant>, StoreError>;

    /// Adds a participant, checking status, uniqueness and capacity in one step.
    async fn add_participant(
        &self,
        id: ChallengeId,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> Result<JoinOutcome, StoreError>;

    async fn remove_participant(
        &self,
        id: ChallengeId,
        user_id: UserId,
    ) -> Result<LeaveOutcome, StoreError>;

    /// Writes the scores and ranks of one pass, provided the challenge is
    /// still active and its participants are exactly the ones in `standings`.
    async fn save_standings(
        &self,
        id: ChallengeId,
        standings: &[Standing],
    ) -> Result<CommitOutcome, StoreError>;

    /// Writes final standings, marks winners, credits the XP ledger and
    /// completes the challenge as one unit. Never applies twice.
    async fn commit_settlement(&self, settlement: &Settlement) -> Result<CommitOutcome, StoreError>;
}

/// True if `participants` are exactly the users in `standings`.
pub(crate) fn same_participants(mut participants: Vec<UserId>, standings: &[Standing]) -> bool {
    let mut scored: Vec<_> = standings.iter().map(|s| s.user_id).collect();
    participants.sort_unstable();
    scored.sort_unstable();
    participants == scored
}
