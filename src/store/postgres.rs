//! PostgreSQL-backed stores. The schema lives in `sql/schema.sql`.

use super::{
    ChallengeStore, CommitOutcome, JoinOutcome, LeaderboardStore, LeaveOutcome, ProfileStore,
    PublishOutcome, same_participants,
};
use crate::activity::ActivitySource;
use crate::announcements::AnnouncementFeed;
use crate::common::{
    Challenge, ChallengeId, ChallengeParticipant, ChallengeStatus, CompletedTask, Leaderboard,
    LeaderboardEntry, LeaderboardId, MetricCategory, NewChallenge, Period, Profile, Settlement,
    Standing, UserActivity, UserId, Window,
};
use crate::error::{SourceError, StoreError};
use async_trait::async_trait;
use az::{CheckedAs, CheckedCast};
use chrono::{DateTime, Utc};
use futures::prelude::*;
use futures::stream;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use tokio::sync::RwLock;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::{ToSql, Type as PgType};
use tokio_postgres::{Row, Transaction};
use tracing::error;

const SCHEMA: &str = include_str!("../../sql/schema.sql");

const LEADERBOARD_COLUMNS: &str = "id, category, period, start_at, end_at, is_active";

const CHALLENGE_COLUMNS: &str = "id, owner_id, name, description, challenge_type, custom_rule, \
     start_date, end_date, max_participants, prize_xp, is_public, status";

const PARTICIPANT_COLUMNS: &str = "challenge_id, user_id, joined_at, score, rank, is_winner";

/// Reads share the connection; transactions take it exclusively.
#[derive(Debug)]
pub struct PgStore {
    client: RwLock<tokio_postgres::Client>,
}

impl PgStore {
    pub fn new(client: tokio_postgres::Client) -> Self {
        PgStore {
            client: RwLock::new(client),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let (client, connection) =
            tokio_postgres::connect(database_url, tokio_postgres::NoTls).await?;

        let connection = connection.map(|r| {
            if let Err(e) = r {
                error!("connection error: {e}");
            }
        });
        tokio::spawn(connection);

        Ok(PgStore::new(client))
    }

    /// Creates any missing tables.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        self.client.read().await.batch_execute(SCHEMA).await?;
        Ok(())
    }
}

fn window_key(window: &Window) -> String {
    match window.start {
        Some(start) => start.to_rfc3339(),
        None => "all_time".to_owned(),
    }
}

fn parse_column<T>(row: &Row, idx: usize, table: &'static str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: &str = row.try_get(idx)?;
    raw.parse().map_err(|e: T::Err| StoreError::Corrupt {
        table,
        reason: e.to_string(),
    })
}

fn to_i64(value: u64, column: &'static str) -> Result<i64, StoreError> {
    value.checked_as::<i64>().ok_or(StoreError::OutOfRange(column))
}

fn to_i32(value: u32, column: &'static str) -> Result<i32, StoreError> {
    value.checked_as::<i32>().ok_or(StoreError::OutOfRange(column))
}

fn from_db<T, U>(value: U, table: &'static str, column: &str) -> Result<T, StoreError>
where
    U: CheckedCast<T> + Display + Copy,
{
    value.checked_cast().ok_or_else(|| StoreError::Corrupt {
        table,
        reason: format!("`{column}` out of range: {value}"),
    })
}

fn leaderboard_from_row(row: &Row) -> Result<Leaderboard, StoreError> {
    Ok(Leaderboard {
        id: row.try_get(0)?,
        category: parse_column(row, 1, "leaderboards")?,
        period: parse_column(row, 2, "leaderboards")?,
        window: Window {
            start: row.try_get(3)?,
            end: row.try_get(4)?,
        },
        is_active: row.try_get(5)?,
    })
}

fn entry_from_row(row: &Row) -> Result<LeaderboardEntry, StoreError> {
    Ok(LeaderboardEntry {
        user_id: row.try_get(0)?,
        score: from_db(row.try_get::<_, i64>(1)?, "leaderboard_entries", "score")?,
        rank: from_db(row.try_get::<_, i32>(2)?, "leaderboard_entries", "rank")?,
    })
}

fn challenge_from_row(row: &Row) -> Result<Challenge, StoreError> {
    let custom_rule = row
        .try_get::<_, Option<JsonValue>>(5)?
        .map(serde_json::from_value)
        .transpose()?;

    Ok(Challenge {
        id: row.try_get(0)?,
        owner_id: row.try_get(1)?,
        name: row.try_get(2)?,
        description: row.try_get(3)?,
        challenge_type: parse_column(row, 4, "challenges")?,
        custom_rule,
        start_date: row.try_get(6)?,
        end_date: row.try_get(7)?,
        max_participants: from_db(row.try_get::<_, i32>(8)?, "challenges", "max_participants")?,
        prize_xp: from_db(row.try_get::<_, i64>(9)?, "challenges", "prize_xp")?,
        is_public: row.try_get(10)?,
        status: parse_column(row, 11, "challenges")?,
    })
}

fn participant_from_row(row: &Row) -> Result<ChallengeParticipant, StoreError> {
    let rank = row
        .try_get::<_, Option<i32>>(4)?
        .map(|rank| from_db(rank, "challenge_participants", "rank"))
        .transpose()?;

    Ok(ChallengeParticipant {
        challenge_id: row.try_get(0)?,
        user_id: row.try_get(1)?,
        joined_at: row.try_get(2)?,
        score: from_db(row.try_get::<_, i64>(3)?, "challenge_participants", "score")?,
        rank,
        is_winner: row.try_get(5)?,
    })
}

/// Locks the challenge row for the rest of the transaction.
async fn lock_challenge(
    transaction: &Transaction<'_>,
    id: ChallengeId,
) -> Result<Option<(ChallengeStatus, u32)>, StoreError> {
    let Some(row) = transaction
        .query_opt(
            "SELECT status, max_participants FROM challenges WHERE id = $1 FOR UPDATE",
            &[&id],
        )
        .await?
    else {
        return Ok(None);
    };

    let status = parse_column(&row, 0, "challenges")?;
    let max_participants = from_db(row.try_get::<_, i32>(1)?, "challenges", "max_participants")?;
    Ok(Some((status, max_participants)))
}

async fn participant_ids(
    transaction: &Transaction<'_>,
    id: ChallengeId,
) -> Result<Vec<UserId>, StoreError> {
    transaction
        .query(
            "SELECT user_id FROM challenge_participants WHERE challenge_id = $1",
            &[&id],
        )
        .await?
        .iter()
        .map(|row| row.try_get(0).map_err(StoreError::from))
        .collect()
}

async fn write_standings(
    transaction: &Transaction<'_>,
    id: ChallengeId,
    standings: &[Standing],
) -> Result<(), StoreError> {
    let rows = standings
        .iter()
        .map(|s| Ok((s.user_id, to_i64(s.score, "score")?, to_i32(s.rank, "rank")?)))
        .collect::<Result<Vec<_>, StoreError>>()?;

    let stmt = &transaction
        .prepare(
            "UPDATE challenge_participants SET score = $3, rank = $4 \
             WHERE challenge_id = $1 AND user_id = $2",
        )
        .await?;
    stream::iter(&rows)
        .map(Ok)
        .try_for_each_concurrent(None, |(user_id, score, rank)| async move {
            transaction
                .execute(stmt, &[&id, user_id, score, rank])
                .map_ok(drop)
                .await
        })
        .await?;

    Ok(())
}

#[async_trait]
impl LeaderboardStore for PgStore {
    async fn get_or_create_leaderboard(
        &self,
        category: MetricCategory,
        period: Period,
        window: Window,
    ) -> Result<Leaderboard, StoreError> {
        let client = self.client.read().await;
        let key = window_key(&window);
        client
            .execute(
                "INSERT INTO leaderboards (category, period, window_key, start_at, end_at) \
                 VALUES ($1, $2, $3, $4, $5) ON CONFLICT (category, period, window_key) DO NOTHING",
                &[
                    &category.as_str(),
                    &period.as_str(),
                    &key,
                    &window.start,
                    &window.end,
                ],
            )
            .await?;

        let row = client
            .query_one(
                &format!(
                    "SELECT {LEADERBOARD_COLUMNS} FROM leaderboards \
                     WHERE category = $1 AND period = $2 AND window_key = $3"
                ),
                &[&category.as_str(), &period.as_str(), &key],
            )
            .await?;
        leaderboard_from_row(&row)
    }

    async fn active_leaderboard(
        &self,
        category: MetricCategory,
        period: Period,
    ) -> Result<Option<Leaderboard>, StoreError> {
        self.client
            .read()
            .await
            .query_opt(
                &format!(
                    "SELECT {LEADERBOARD_COLUMNS} FROM leaderboards \
                     WHERE category = $1 AND period = $2 AND is_active"
                ),
                &[&category.as_str(), &period.as_str()],
            )
            .await?
            .as_ref()
            .map(leaderboard_from_row)
            .transpose()
    }

    async fn publish_entries(
        &self,
        leaderboard_id: LeaderboardId,
        entries: &[LeaderboardEntry],
        hash: i64,
    ) -> Result<PublishOutcome, StoreError> {
        let mut client = self.client.write().await;
        let transaction = client.transaction().await?;

        let row = transaction
            .query_one(
                "SELECT category, period, is_active, current_generation, entries_hash \
                 FROM leaderboards WHERE id = $1 FOR UPDATE",
                &[&leaderboard_id],
            )
            .await?;
        let category: &str = row.try_get(0)?;
        let period: &str = row.try_get(1)?;
        let is_active: bool = row.try_get(2)?;
        let current_generation: i64 = row.try_get(3)?;
        let existing_hash: Option<i64> = row.try_get(4)?;

        if is_active && existing_hash == Some(hash) {
            return Ok(PublishOutcome::Unchanged);
        }
        let generation = current_generation + 1;

        if !entries.is_empty() {
            let sink = transaction
                .copy_in(
                    "COPY leaderboard_entries (leaderboard_id, generation, user_id, score, rank) \
                     FROM STDIN WITH (FORMAT binary)",
                )
                .await?;
            let mut writer = Box::pin(BinaryCopyInWriter::new(
                sink,
                &[
                    PgType::INT8,
                    PgType::INT8,
                    PgType::INT8,
                    PgType::INT8,
                    PgType::INT4,
                ],
            ));
            for entry in entries {
                writer
                    .as_mut()
                    .write(&[
                        &leaderboard_id,
                        &generation,
                        &entry.user_id,
                        &to_i64(entry.score, "score")?,
                        &to_i32(entry.rank, "rank")?,
                    ])
                    .await?;
            }
            writer.as_mut().finish().await?;
        }

        transaction
            .execute(
                "UPDATE leaderboards SET is_active = FALSE \
                 WHERE category = $1 AND period = $2 AND id <> $3 AND is_active",
                &[&category, &period, &leaderboard_id],
            )
            .await?;
        transaction
            .execute(
                "UPDATE leaderboards SET is_active = TRUE, current_generation = $2, \
                 entries_hash = $3, published_at = now() WHERE id = $1",
                &[&leaderboard_id, &generation, &hash],
            )
            .await?;
        transaction
            .execute(
                "DELETE FROM leaderboard_entries WHERE leaderboard_id = $1 AND generation < $2",
                &[&leaderboard_id, &generation],
            )
            .await?;

        transaction.commit().await?;
        Ok(PublishOutcome::Published { generation })
    }

    async fn entries(
        &self,
        leaderboard_id: LeaderboardId,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let limit = limit.checked_as::<i64>().unwrap_or(i64::MAX);
        self.client
            .read()
            .await
            .query(
                "SELECT e.user_id, e.score, e.rank FROM leaderboard_entries e \
                 JOIN leaderboards l ON l.id = e.leaderboard_id AND e.generation = l.current_generation \
                 WHERE l.id = $1 ORDER BY e.rank LIMIT $2",
                &[&leaderboard_id, &limit],
            )
            .await?
            .iter()
            .map(entry_from_row)
            .collect()
    }

    async fn entry_for_user(
        &self,
        leaderboard_id: LeaderboardId,
        user_id: UserId,
    ) -> Result<Option<LeaderboardEntry>, StoreError> {
        self.client
            .read()
            .await
            .query_opt(
                "SELECT e.user_id, e.score, e.rank FROM leaderboard_entries e \
                 JOIN leaderboards l ON l.id = e.leaderboard_id AND e.generation = l.current_generation \
                 WHERE l.id = $1 AND e.user_id = $2",
                &[&leaderboard_id, &user_id],
            )
            .await?
            .as_ref()
            .map(entry_from_row)
            .transpose()
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn set_opt_in(&self, user_id: UserId, opt_in: bool) -> Result<(), StoreError> {
        self.client
            .read()
            .await
            .execute(
                "INSERT INTO profiles (user_id, leaderboard_opt_in) VALUES ($1, $2) \
                 ON CONFLICT (user_id) DO UPDATE SET leaderboard_opt_in = EXCLUDED.leaderboard_opt_in",
                &[&user_id, &opt_in],
            )
            .await?;
        Ok(())
    }

    async fn is_opted_in(&self, user_id: UserId) -> Result<bool, StoreError> {
        let row = self
            .client
            .read()
            .await
            .query_opt(
                "SELECT leaderboard_opt_in FROM profiles WHERE user_id = $1",
                &[&user_id],
            )
            .await?;

        match row {
            Some(row) => Ok(row.try_get(0)?),
            None => Ok(false),
        }
    }

    async fn opted_in_users(&self) -> Result<Vec<UserId>, StoreError> {
        self.client
            .read()
            .await
            .query(
                "SELECT user_id FROM profiles WHERE leaderboard_opt_in ORDER BY user_id",
                &[],
            )
            .await?
            .iter()
            .map(|row| row.try_get(0).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl ChallengeStore for PgStore {
    async fn insert_challenge(&self, new: &NewChallenge) -> Result<Challenge, StoreError> {
        let custom_rule = new.custom_rule.map(serde_json::to_value).transpose()?;
        let row = self
            .client
            .read()
            .await
            .query_one(
                &format!(
                    "INSERT INTO challenges (owner_id, name, description, challenge_type, \
                     custom_rule, start_date, end_date, max_participants, prize_xp, is_public) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {CHALLENGE_COLUMNS}"
                ),
                &[
                    &new.owner_id,
                    &new.name,
                    &new.description,
                    &new.challenge_type.as_str(),
                    &custom_rule,
                    &new.start_date,
                    &new.end_date,
                    &to_i32(new.max_participants, "max_participants")?,
                    &to_i64(new.prize_xp, "prize_xp")?,
                    &new.is_public,
                ],
            )
            .await?;

        challenge_from_row(&row)
    }

    async fn challenge(&self, id: ChallengeId) -> Result<Option<Challenge>, StoreError> {
        self.client
            .read()
            .await
            .query_opt(
                &format!("SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE id = $1"),
                &[&id],
            )
            .await?
            .as_ref()
            .map(challenge_from_row)
            .transpose()
    }

    async fn challenges_with_status(
        &self,
        status: ChallengeStatus,
    ) -> Result<Vec<Challenge>, StoreError> {
        self.client
            .read()
            .await
            .query(
                &format!("SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE status = $1 ORDER BY id"),
                &[&status.as_str()],
            )
            .await?
            .iter()
            .map(challenge_from_row)
            .collect()
    }

    async fn transition_status(
        &self,
        id: ChallengeId,
        from: ChallengeStatus,
        to: ChallengeStatus,
    ) -> Result<bool, StoreError> {
        let updated = self
            .client
            .read()
            .await
            .execute(
                "UPDATE challenges SET status = $3 WHERE id = $1 AND status = $2",
                &[&id, &from.as_str(), &to.as_str()],
            )
            .await?;
        Ok(updated == 1)
    }

    async fn delete_upcoming_challenge(&self, id: ChallengeId) -> Result<bool, StoreError> {
        let deleted = self
            .client
            .read()
            .await
            .execute(
                "DELETE FROM challenges WHERE id = $1 AND status = $2",
                &[&id, &ChallengeStatus::Upcoming.as_str()],
            )
            .await?;
        Ok(deleted == 1)
    }

    async fn participants(&self, id: ChallengeId) -> Result<Vec<ChallengeParticipant>, StoreError> {
        self.client
            .read()
            .await
            .query(
                &format!(
                    "SELECT {PARTICIPANT_COLUMNS} FROM challenge_participants \
                     WHERE challenge_id = $1 ORDER BY joined_at, user_id"
                ),
                &[&id],
            )
            .await?
            .iter()
            .map(participant_from_row)
            .collect()
    }

    async fn add_participant(
        &self,
        id: ChallengeId,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> Result<JoinOutcome, StoreError> {
        let mut client = self.client.write().await;
        let transaction = client.transaction().await?;

        let Some((status, max_participants)) = lock_challenge(&transaction, id).await? else {
            return Ok(JoinOutcome::NotFound);
        };
        if status == ChallengeStatus::Completed {
            return Ok(JoinOutcome::Closed(status));
        }

        let current = participant_ids(&transaction, id).await?;
        if current.contains(&user_id) {
            return Ok(JoinOutcome::AlreadyJoined);
        }
        if current.len() >= max_participants as usize {
            return Ok(JoinOutcome::Full { max_participants });
        }

        let row = transaction
            .query_one(
                &format!(
                    "INSERT INTO challenge_participants (challenge_id, user_id, joined_at) \
                     VALUES ($1, $2, $3) RETURNING {PARTICIPANT_COLUMNS}"
                ),
                &[&id, &user_id, &joined_at],
            )
            .await?;
        let participant = participant_from_row(&row)?;

        transaction.commit().await?;
        Ok(JoinOutcome::Joined(participant))
    }

    async fn remove_participant(
        &self,
        id: ChallengeId,
        user_id: UserId,
    ) -> Result<LeaveOutcome, StoreError> {
        let mut client = self.client.write().await;
        let transaction = client.transaction().await?;

        let Some((status, _)) = lock_challenge(&transaction, id).await? else {
            return Ok(LeaveOutcome::NotFound);
        };
        if status == ChallengeStatus::Completed {
            return Ok(LeaveOutcome::Closed(status));
        }

        let deleted = transaction
            .execute(
                "DELETE FROM challenge_participants WHERE challenge_id = $1 AND user_id = $2",
                &[&id, &user_id],
            )
            .await?;
        if deleted == 0 {
            return Ok(LeaveOutcome::NotParticipant);
        }

        transaction.commit().await?;
        Ok(LeaveOutcome::Left)
    }

    async fn save_standings(
        &self,
        id: ChallengeId,
        standings: &[Standing],
    ) -> Result<CommitOutcome, StoreError> {
        let mut client = self.client.write().await;
        let transaction = client.transaction().await?;

        let Some((status, _)) = lock_challenge(&transaction, id).await? else {
            return Ok(CommitOutcome::NotFound);
        };
        if status != ChallengeStatus::Active {
            return Ok(CommitOutcome::Closed(status));
        }
        if !same_participants(participant_ids(&transaction, id).await?, standings) {
            return Ok(CommitOutcome::StaleParticipantSet);
        }

        write_standings(&transaction, id, standings).await?;

        transaction.commit().await?;
        Ok(CommitOutcome::Committed)
    }

    async fn commit_settlement(&self, settlement: &Settlement) -> Result<CommitOutcome, StoreError> {
        let id = settlement.challenge_id;
        let mut client = self.client.write().await;
        let transaction = client.transaction().await?;

        let Some((status, _)) = lock_challenge(&transaction, id).await? else {
            return Ok(CommitOutcome::NotFound);
        };
        if status != ChallengeStatus::Active {
            return Ok(CommitOutcome::Closed(status));
        }
        if !same_participants(participant_ids(&transaction, id).await?, &settlement.standings) {
            return Ok(CommitOutcome::StaleParticipantSet);
        }

        write_standings(&transaction, id, &settlement.standings).await?;

        let winners: Vec<UserId> = settlement.payouts.iter().map(|p| p.user_id).collect();
        transaction
            .execute(
                "UPDATE challenge_participants SET is_winner = (user_id = ANY($2)) \
                 WHERE challenge_id = $1",
                &[&id, &winners],
            )
            .await?;

        for credit in &settlement.credits {
            let amount = to_i64(credit.amount, "amount")?;
            transaction
                .execute(
                    "INSERT INTO xp_ledger (user_id, amount, reason) VALUES ($1, $2, $3)",
                    &[&credit.user_id, &amount, &credit.reason],
                )
                .await?;
            transaction
                .execute(
                    "INSERT INTO profiles (user_id, total_xp) VALUES ($1, $2) \
                     ON CONFLICT (user_id) DO UPDATE SET total_xp = profiles.total_xp + EXCLUDED.total_xp",
                    &[&credit.user_id, &amount],
                )
                .await?;
        }

        transaction
            .execute(
                "UPDATE challenges SET status = $2, completed_at = now() WHERE id = $1",
                &[&id, &ChallengeStatus::Completed.as_str()],
            )
            .await?;

        transaction.commit().await?;
        Ok(CommitOutcome::Committed)
    }
}

#[async_trait]
impl ActivitySource for PgStore {
    async fn activity(
        &self,
        users: &[UserId],
        window: &Window,
    ) -> Result<HashMap<UserId, UserActivity>, SourceError> {
        let client = self.client.read().await;
        let users = users.to_vec();
        let windowed: [&(dyn ToSql + Sync); 3] = [&users, &window.start, &window.end];
        let by_user: [&(dyn ToSql + Sync); 1] = [&users];

        let (tasks, achievements, streaks, profiles) = futures::try_join!(
            client.query(
                "SELECT user_id, xp_earned, completed_at FROM tasks \
                 WHERE user_id = ANY($1) AND completed_at IS NOT NULL \
                 AND ($2::timestamptz IS NULL OR completed_at >= $2) \
                 AND ($3::timestamptz IS NULL OR completed_at < $3)",
                &windowed,
            ),
            client.query(
                "SELECT user_id, unlocked_at FROM achievements \
                 WHERE user_id = ANY($1) \
                 AND ($2::timestamptz IS NULL OR unlocked_at >= $2) \
                 AND ($3::timestamptz IS NULL OR unlocked_at < $3)",
                &windowed,
            ),
            client.query(
                "SELECT user_id, current_streak FROM streaks WHERE user_id = ANY($1)",
                &by_user,
            ),
            client.query(
                "SELECT user_id, level, total_xp FROM profiles WHERE user_id = ANY($1)",
                &by_user,
            ),
        )?;

        let mut activity: HashMap<UserId, UserActivity> = HashMap::new();
        for row in &tasks {
            activity
                .entry(row.try_get(0)?)
                .or_default()
                .completed_tasks
                .push(CompletedTask {
                    xp_earned: row.try_get(1)?,
                    completed_at: row.try_get(2)?,
                });
        }
        for row in &achievements {
            activity
                .entry(row.try_get(0)?)
                .or_default()
                .achievements_unlocked
                .push(row.try_get(1)?);
        }
        for row in &streaks {
            activity.entry(row.try_get(0)?).or_default().current_streak = Some(row.try_get(1)?);
        }
        for row in &profiles {
            activity.entry(row.try_get(0)?).or_default().profile = Some(Profile {
                level: row.try_get(1)?,
                total_xp: row.try_get(2)?,
            });
        }

        Ok(activity)
    }
}

#[async_trait]
impl AnnouncementFeed for PgStore {
    async fn post(
        &self,
        user_id: UserId,
        message: &str,
        metadata: &JsonValue,
    ) -> Result<(), StoreError> {
        self.client
            .read()
            .await
            .execute(
                "INSERT INTO activity_feed (user_id, message, metadata) VALUES ($1, $2, $3)",
                &[&user_id, &message, metadata],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_keys_distinguish_windows() {
        let monday = Utc.with_ymd_and_hms(2026, 10, 12, 0, 0, 0).unwrap();
        let next = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();

        assert_eq!(window_key(&Window::unbounded()), "all_time");
        assert_ne!(
            window_key(&Window::between(monday, next)),
            window_key(&Window::between(next, next))
        );
    }

    #[test]
    fn schema_creates_every_table() {
        for table in [
            "leaderboards",
            "leaderboard_entries",
            "challenges",
            "challenge_participants",
            "xp_ledger",
            "activity_feed",
        ] {
            assert!(SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")));
        }
    }
}
