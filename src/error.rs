use crate::common::{ChallengeId, UserId};
use std::time::Duration;
use thiserror::Error;

/// One user's score could not be computed. The user is scored 0 and the pass continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not compute score for user {user_id}: {reason}")]
pub struct PartialComputationError {
    pub user_id: UserId,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("activity source unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("corrupt row in `{table}`: {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("value out of range for `{0}`")]
    OutOfRange(&'static str),

    #[error("custom rule is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("a pass for {0} is already in flight")]
    ConcurrentRecompute(String),

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("challenge {challenge_id} is full ({max_participants} participants)")]
    CapacityExceeded {
        challenge_id: ChallengeId,
        max_participants: u32,
    },

    #[error("user {user_id} may not {action} challenge {challenge_id}")]
    NotAuthorized {
        user_id: UserId,
        challenge_id: ChallengeId,
        action: &'static str,
    },

    #[error("user {user_id} already participates in challenge {challenge_id}")]
    AlreadyParticipating {
        user_id: UserId,
        challenge_id: ChallengeId,
    },

    #[error("user {user_id} does not participate in challenge {challenge_id}")]
    NotParticipant {
        user_id: UserId,
        challenge_id: ChallengeId,
    },

    #[error("challenge {0} not found")]
    ChallengeNotFound(ChallengeId),

    #[error("invalid challenge: {0}")]
    InvalidChallenge(String),

    #[error("participants of challenge {0} changed during the scoring pass")]
    StaleParticipantSet(ChallengeId),

    #[error("{what} exceeded its time budget of {budget:?}")]
    TimedOut { what: String, budget: Duration },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("activity source error: {0}")]
    Source(#[from] SourceError),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
