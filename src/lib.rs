//! Competitive ranking for a task platform: periodic leaderboards per metric,
//! time-boxed challenges with prize payouts, and the opt-in gate that decides
//! who is ranked.

#![warn(
    rust_2018_idioms,
    deprecated_in_future,
    macro_use_extern_crate,
    missing_debug_implementations,
    unused_qualifications
)]

pub mod activity;
pub mod announcements;
pub mod challenge;
pub mod common;
pub mod config;
pub mod error;
pub mod in_flight;
pub mod leaderboard;
pub mod participation;
pub mod period;
pub mod ranking;
pub mod scheduler;
pub mod scoring;
pub mod store;

pub use crate::challenge::{ChallengeService, ScoringReport, SettlementReport};
pub use crate::config::{Config, EngineConfig};
pub use crate::error::{EngineError, PartialComputationError, SourceError, StoreError};
pub use crate::leaderboard::{LeaderboardAggregator, RecomputeReport, UserRanking};
pub use crate::participation::ParticipationGate;
pub use crate::scheduler::TickReport;
pub use crate::scoring::ScoreCalculator;
