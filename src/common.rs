use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub type UserId = i64;
pub type ChallengeId = i64;
pub type LeaderboardId = i64;
pub type Score = u64;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    Xp,
    Tasks,
    Streak,
    Level,
    Achievements,
}

impl MetricCategory {
    pub const ALL: [MetricCategory; 5] = [
        MetricCategory::Xp,
        MetricCategory::Tasks,
        MetricCategory::Streak,
        MetricCategory::Level,
        MetricCategory::Achievements,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricCategory::Xp => "xp",
            MetricCategory::Tasks => "tasks",
            MetricCategory::Streak => "streak",
            MetricCategory::Level => "level",
            MetricCategory::Achievements => "achievements",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    MostXp,
    MostTasks,
    LongestStreak,
    Custom,
}

impl ChallengeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeType::MostXp => "most_xp",
            ChallengeType::MostTasks => "most_tasks",
            ChallengeType::LongestStreak => "longest_streak",
            ChallengeType::Custom => "custom",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
    AllTime,
}

impl Period {
    pub const ALL: [Period; 4] = [Period::Daily, Period::Weekly, Period::Monthly, Period::AllTime];

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
            Period::AllTime => "all_time",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Upcoming,
    Active,
    Completed,
}

impl ChallengeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeStatus::Upcoming => "upcoming",
            ChallengeStatus::Active => "active",
            ChallengeStatus::Completed => "completed",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown variant `{0}`")]
pub struct UnknownVariant(pub String);

macro_rules! impl_text_enum {
    ($ty:ty, [$($variant:expr),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                [$($variant),+]
                    .into_iter()
                    .find(|v: &$ty| v.as_str() == s)
                    .ok_or_else(|| UnknownVariant(s.to_owned()))
            }
        }
    };
}

impl_text_enum!(
    MetricCategory,
    [
        MetricCategory::Xp,
        MetricCategory::Tasks,
        MetricCategory::Streak,
        MetricCategory::Level,
        MetricCategory::Achievements,
    ]
);
impl_text_enum!(
    ChallengeType,
    [
        ChallengeType::MostXp,
        ChallengeType::MostTasks,
        ChallengeType::LongestStreak,
        ChallengeType::Custom,
    ]
);
impl_text_enum!(
    Period,
    [Period::Daily, Period::Weekly, Period::Monthly, Period::AllTime]
);
impl_text_enum!(
    ChallengeStatus,
    [
        ChallengeStatus::Upcoming,
        ChallengeStatus::Active,
        ChallengeStatus::Completed,
    ]
);

/// Half-open time range `[start, end)`. A missing bound is unbounded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Window {
    pub fn unbounded() -> Self {
        Window {
            start: None,
            end: None,
        }
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Window {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| instant >= start) && self.end.is_none_or(|end| instant < end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Leaderboard {
    pub id: LeaderboardId,
    pub category: MetricCategory,
    pub period: Period,
    pub window: Window,
    pub is_active: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub score: Score,
    pub rank: u32,
}

/// Weights for `custom` challenges. Missing weights count as zero.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomRule {
    pub xp_weight: u32,
    pub task_weight: u32,
    pub achievement_weight: u32,
    pub streak_weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Challenge {
    pub id: ChallengeId,
    pub owner_id: UserId,
    pub name: String,
    pub description: String,
    pub challenge_type: ChallengeType,
    pub custom_rule: Option<CustomRule>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub max_participants: u32,
    pub prize_xp: u64,
    pub is_public: bool,
    pub status: ChallengeStatus,
}

impl Challenge {
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.start_date.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    /// First instant after the challenge's last day.
    pub fn ends_at(&self) -> DateTime<Utc> {
        (self.end_date + Duration::days(1))
            .and_time(chrono::NaiveTime::MIN)
            .and_utc()
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.starts_at()
    }

    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.ends_at()
    }

    /// The window scored at `now`: from the first day up to `now`, capped at the end.
    pub fn scoring_window(&self, now: DateTime<Utc>) -> Window {
        let end = now.min(self.ends_at()).max(self.starts_at());
        Window::between(self.starts_at(), end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChallenge {
    pub owner_id: UserId,
    pub name: String,
    pub description: String,
    pub challenge_type: ChallengeType,
    pub custom_rule: Option<CustomRule>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub max_participants: u32,
    pub prize_xp: u64,
    pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeParticipant {
    pub challenge_id: ChallengeId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    pub score: Score,
    pub rank: Option<u32>,
    pub is_winner: bool,
}

/// A participant's position computed by one scoring pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct Standing {
    pub user_id: UserId,
    pub score: Score,
    pub rank: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct Payout {
    pub user_id: UserId,
    pub rank: u32,
    pub score: Score,
    pub amount: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CompletedTask {
    pub xp_earned: i64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Profile {
    pub level: i32,
    pub total_xp: i64,
}

/// XP credited to a user's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerCredit {
    pub user_id: UserId,
    pub amount: u64,
    pub reason: String,
}

/// Everything a settlement commits in one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub challenge_id: ChallengeId,
    pub standings: Vec<Standing>,
    pub payouts: Vec<Payout>,
    pub credits: Vec<LedgerCredit>,
}

/// Raw activity of one user, as read from the external stores.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserActivity {
    pub completed_tasks: Vec<CompletedTask>,
    pub achievements_unlocked: Vec<DateTime<Utc>>,
    pub current_streak: Option<i32>,
    pub profile: Option<Profile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn text_enums_round_trip_through_their_column_names() {
        for category in MetricCategory::ALL {
            assert_eq!(category.as_str().parse::<MetricCategory>(), Ok(category));
        }
        assert_eq!("all_time".parse::<Period>(), Ok(Period::AllTime));
        assert_eq!("most_xp".parse::<ChallengeType>(), Ok(ChallengeType::MostXp));
        assert!("weekly_ish".parse::<Period>().is_err());
    }

    #[test]
    fn unknown_column_values_name_the_offending_text() {
        let err = "weekly_ish".parse::<Period>().unwrap_err();
        assert_eq!(err.to_string(), "unknown variant `weekly_ish`");

        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn window_is_half_open() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap();
        let window = Window::between(start, end);

        assert!(window.contains(start));
        assert!(!window.contains(end));
        assert!(Window::unbounded().contains(end));
    }

    #[test]
    fn challenge_window_is_capped_at_the_day_after_the_end_date() {
        let challenge = Challenge {
            id: 1,
            owner_id: 1,
            name: "sprint".to_owned(),
            description: String::new(),
            challenge_type: ChallengeType::MostXp,
            custom_rule: None,
            start_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 3, 8).unwrap(),
            max_participants: 10,
            prize_xp: 100,
            is_public: true,
            status: ChallengeStatus::Active,
        };

        let midway = Utc.with_ymd_and_hms(2026, 3, 5, 12, 0, 0).unwrap();
        assert_eq!(challenge.scoring_window(midway).end, Some(midway));
        assert!(!challenge.has_elapsed(midway));

        let later = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap();
        assert_eq!(challenge.scoring_window(later).end, Some(end));
        assert!(challenge.has_elapsed(end));
    }
}
