use crate::activity::ActivitySource;
use crate::common::{
    Challenge, ChallengeType, CustomRule, MetricCategory, Score, UserActivity, UserId, Window,
};
use crate::error::PartialComputationError;
use az::CheckedAs;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tap::Pipe;
use tracing::warn;

/// What a score is computed from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Formula {
    Metric(MetricCategory),
    /// Challenge-supplied weights; no rule scores everyone 0.
    Custom(Option<CustomRule>),
}

impl From<MetricCategory> for Formula {
    fn from(category: MetricCategory) -> Self {
        Formula::Metric(category)
    }
}

impl Formula {
    pub fn for_challenge(challenge: &Challenge) -> Self {
        match challenge.challenge_type {
            ChallengeType::MostXp => Formula::Metric(MetricCategory::Xp),
            ChallengeType::MostTasks => Formula::Metric(MetricCategory::Tasks),
            ChallengeType::LongestStreak => Formula::Metric(MetricCategory::Streak),
            ChallengeType::Custom => Formula::Custom(challenge.custom_rule),
        }
    }
}

/// Applies `formula` to one user's raw activity.
///
/// `streak` and `level` are present values and ignore `window`.
pub fn evaluate(formula: Formula, activity: &UserActivity, window: &Window) -> Result<Score, String> {
    match formula {
        Formula::Metric(MetricCategory::Xp) => windowed_xp(activity, window),
        Formula::Metric(MetricCategory::Tasks) => Ok(windowed_tasks(activity, window)),
        Formula::Metric(MetricCategory::Streak) => current_streak(activity),
        Formula::Metric(MetricCategory::Level) => match activity.profile {
            Some(profile) => profile
                .level
                .checked_as::<u64>()
                .ok_or_else(|| format!("negative level {}", profile.level)),
            None => Ok(0),
        },
        Formula::Metric(MetricCategory::Achievements) => Ok(windowed_achievements(activity, window)),
        Formula::Custom(None) => Ok(0),
        Formula::Custom(Some(rule)) => {
            let components = [
                (windowed_xp(activity, window)?, rule.xp_weight),
                (windowed_tasks(activity, window), rule.task_weight),
                (windowed_achievements(activity, window), rule.achievement_weight),
                (current_streak(activity)?, rule.streak_weight),
            ];
            Ok(components.iter().fold(0u64, |acc, &(value, weight)| {
                acc.saturating_add(value.saturating_mul(u64::from(weight)))
            }))
        }
    }
}

fn windowed_xp(activity: &UserActivity, window: &Window) -> Result<Score, String> {
    activity
        .completed_tasks
        .iter()
        .filter(|task| window.contains(task.completed_at))
        .try_fold(0u64, |acc, task| {
            let xp = task
                .xp_earned
                .checked_as::<u64>()
                .ok_or_else(|| format!("negative xp_earned {}", task.xp_earned))?;
            Ok(acc.saturating_add(xp))
        })
}

fn windowed_tasks(activity: &UserActivity, window: &Window) -> Score {
    activity
        .completed_tasks
        .iter()
        .filter(|task| window.contains(task.completed_at))
        .count() as Score
}

fn windowed_achievements(activity: &UserActivity, window: &Window) -> Score {
    activity
        .achievements_unlocked
        .iter()
        .filter(|&&unlocked_at| window.contains(unlocked_at))
        .count() as Score
}

fn current_streak(activity: &UserActivity) -> Result<Score, String> {
    match activity.current_streak {
        Some(streak) => streak
            .checked_as::<u64>()
            .ok_or_else(|| format!("negative streak {streak}")),
        None => Ok(0),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserScore {
    pub user_id: UserId,
    pub score: Score,
    /// Set when the score was degraded to 0.
    pub failure: Option<PartialComputationError>,
}

impl UserScore {
    fn degraded(user_id: UserId, reason: impl Into<String>) -> Self {
        let failure = PartialComputationError {
            user_id,
            reason: reason.into(),
        };
        warn!(user_id, reason = %failure.reason, "score degraded to 0");

        UserScore {
            user_id,
            score: 0,
            failure: Some(failure),
        }
    }
}

/// Every user's score from one pass. Order is unspecified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreSheet {
    pub scores: Vec<UserScore>,
}

impl ScoreSheet {
    pub fn failures(&self) -> impl Iterator<Item = &PartialComputationError> {
        self.scores.iter().filter_map(|s| s.failure.as_ref())
    }
}

#[derive(Debug)]
pub struct ScoreCalculator<A> {
    source: Arc<A>,
    fan_out: usize,
    batch_size: usize,
}

impl<A: ActivitySource> ScoreCalculator<A> {
    pub fn new(source: Arc<A>, fan_out: usize, batch_size: usize) -> Self {
        ScoreCalculator {
            source,
            fan_out: fan_out.max(1),
            batch_size: batch_size.max(1),
        }
    }

    /// Scores a single user. Never fails: an unreadable user scores 0 with `failure` set.
    pub async fn score(&self, user_id: UserId, formula: Formula, window: &Window) -> UserScore {
        match self.source.activity(&[user_id], window).await {
            Ok(mut activity) => {
                let activity = activity.remove(&user_id).unwrap_or_default();
                score_activity(user_id, formula, &activity, window)
            }
            Err(e) => UserScore::degraded(user_id, e.to_string()),
        }
    }

    /// Scores every user in `users`, reading activity in batches with bounded
    /// concurrency. A batch whose read fails is retried user by user, so one
    /// bad record only degrades its own user.
    pub async fn score_all(&self, users: &[UserId], formula: Formula, window: &Window) -> ScoreSheet {
        let scores: Vec<UserScore> = users
            .chunks(self.batch_size)
            .map(|chunk| self.score_batch(chunk, formula, window))
            .pipe(stream::iter)
            .buffer_unordered(self.fan_out)
            .flat_map(stream::iter)
            .collect()
            .await;

        ScoreSheet { scores }
    }

    async fn score_batch(&self, users: &[UserId], formula: Formula, window: &Window) -> Vec<UserScore> {
        match self.source.activity(users, window).await {
            Ok(mut activity) => users
                .iter()
                .map(|&user_id| {
                    let activity = activity.remove(&user_id).unwrap_or_default();
                    score_activity(user_id, formula, &activity, window)
                })
                .collect(),
            Err(e) => {
                warn!(users = users.len(), error = %e, "batched activity read failed, retrying per user");
                users
                    .iter()
                    .map(|&user_id| self.score(user_id, formula, window))
                    .pipe(stream::iter)
                    .buffer_unordered(self.fan_out)
                    .collect()
                    .await
            }
        }
    }
}

fn score_activity(user_id: UserId, formula: Formula, activity: &UserActivity, window: &Window) -> UserScore {
    match evaluate(formula, activity, window) {
        Ok(score) => UserScore {
            user_id,
            score,
            failure: None,
        },
        Err(reason) => UserScore::degraded(user_id, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{CompletedTask, Profile};
    use crate::store::memory::MemoryActivity;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, d, 12, 0, 0).unwrap()
    }

    fn june_week() -> Window {
        Window::between(at(8), at(15))
    }

    fn sample() -> UserActivity {
        UserActivity {
            completed_tasks: vec![
                CompletedTask {
                    xp_earned: 50,
                    completed_at: at(1),
                },
                CompletedTask {
                    xp_earned: 20,
                    completed_at: at(9),
                },
                CompletedTask {
                    xp_earned: 30,
                    completed_at: at(10),
                },
            ],
            achievements_unlocked: vec![at(2), at(11)],
            current_streak: Some(12),
            profile: Some(Profile {
                level: 7,
                total_xp: 1_000,
            }),
        }
    }

    #[test]
    fn windowed_categories_only_count_activity_inside_the_window() {
        let activity = sample();
        let window = june_week();

        assert_eq!(evaluate(MetricCategory::Xp.into(), &activity, &window), Ok(50));
        assert_eq!(evaluate(MetricCategory::Tasks.into(), &activity, &window), Ok(2));
        assert_eq!(evaluate(MetricCategory::Achievements.into(), &activity, &window), Ok(1));
    }

    #[test]
    fn streak_and_level_ignore_the_window() {
        let activity = sample();
        let window = june_week();

        assert_eq!(evaluate(MetricCategory::Streak.into(), &activity, &window), Ok(12));
        assert_eq!(evaluate(MetricCategory::Level.into(), &activity, &window), Ok(7));
    }

    #[test]
    fn custom_rule_is_a_weighted_sum() {
        let rule = CustomRule {
            xp_weight: 1,
            task_weight: 10,
            achievement_weight: 100,
            streak_weight: 0,
        };
        let score = evaluate(Formula::Custom(Some(rule)), &sample(), &june_week());
        assert_eq!(score, Ok(50 + 2 * 10 + 100));

        assert_eq!(evaluate(Formula::Custom(None), &sample(), &june_week()), Ok(0));
    }

    #[test]
    fn negative_values_are_malformed() {
        let mut activity = sample();
        activity.current_streak = Some(-1);
        assert!(evaluate(MetricCategory::Streak.into(), &activity, &june_week()).is_err());

        activity.completed_tasks[1].xp_earned = -5;
        assert!(evaluate(MetricCategory::Xp.into(), &activity, &june_week()).is_err());
        // Tasks outside the window are never inspected.
        activity.completed_tasks[1].completed_at = at(20);
        assert_eq!(evaluate(MetricCategory::Xp.into(), &activity, &june_week()), Ok(30));
    }

    #[tokio::test]
    async fn failing_user_is_scored_zero_without_aborting_the_batch() {
        let source = Arc::new(MemoryActivity::new());
        for (user, xp) in [(1, 10), (2, 20), (3, 30)] {
            source.add_task(user, xp, at(9));
        }
        source.fail_user(2);

        let calculator = ScoreCalculator::new(source, 2, 2);
        let mut sheet = calculator
            .score_all(&[1, 2, 3], MetricCategory::Xp.into(), &june_week())
            .await;
        sheet.scores.sort_by_key(|s| s.user_id);

        let scores: Vec<_> = sheet.scores.iter().map(|s| (s.user_id, s.score)).collect();
        assert_eq!(scores, vec![(1, 10), (2, 0), (3, 30)]);
        let failed: Vec<_> = sheet.failures().map(|f| f.user_id).collect();
        assert_eq!(failed, vec![2]);
    }

    #[tokio::test]
    async fn single_user_score_reads_through_the_source() {
        let source = Arc::new(MemoryActivity::new());
        source.add_task(5, 40, at(9));
        source.add_task(5, 2, at(1));
        let calculator = ScoreCalculator::new(source, 1, 1);

        let score = calculator.score(5, MetricCategory::Xp.into(), &june_week()).await;
        assert_eq!(score.score, 40);
        assert!(score.failure.is_none());

        let unknown = calculator.score(6, MetricCategory::Level.into(), &june_week()).await;
        assert_eq!(unknown.score, 0);
        assert!(unknown.failure.is_none());
    }
}
