//! Winner announcements, posted to the activity feed after settlement commits.
//!
//! Settlement only enqueues; the dispatcher drains the queue on its own, so a
//! failing feed can never undo or delay a settlement.

use crate::common::{Challenge, Payout, UserId};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use tap::TapFallible;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[async_trait]
pub trait AnnouncementFeed: Send + Sync {
    async fn post(
        &self,
        user_id: UserId,
        message: &str,
        metadata: &JsonValue,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub user_id: UserId,
    pub message: String,
    pub metadata: JsonValue,
}

impl Announcement {
    pub fn winner(challenge: &Challenge, payout: &Payout) -> Self {
        Announcement {
            user_id: payout.user_id,
            message: format!(
                "placed #{} in the challenge \"{}\" with a score of {}",
                payout.rank, challenge.name, payout.score
            ),
            metadata: json!({
                "challenge_id": challenge.id,
                "challenge_name": challenge.name,
                "challenge_type": challenge.challenge_type,
                "rank": payout.rank,
                "score": payout.score,
                "prize_xp": payout.amount,
            }),
        }
    }
}

pub type AnnouncementSender = mpsc::UnboundedSender<Announcement>;
pub type AnnouncementReceiver = mpsc::UnboundedReceiver<Announcement>;

pub fn channel() -> (AnnouncementSender, AnnouncementReceiver) {
    mpsc::unbounded_channel()
}

/// Enqueues without waiting. A closed queue only loses the announcement.
pub fn announce(sender: &AnnouncementSender, announcement: Announcement) {
    if let Err(e) = sender.send(announcement) {
        debug!(user_id = e.0.user_id, "announcement queue closed, dropping announcement");
    }
}

/// Posts queued announcements until every sender is gone. Returns how many
/// were posted successfully.
pub async fn dispatch<F: AnnouncementFeed + ?Sized>(
    feed: &F,
    mut receiver: AnnouncementReceiver,
) -> usize {
    let mut posted = 0;
    while let Some(announcement) = receiver.recv().await {
        let result = feed
            .post(
                announcement.user_id,
                &announcement.message,
                &announcement.metadata,
            )
            .await
            .tap_err(|e| {
                warn!(
                    user_id = announcement.user_id,
                    "failed to post announcement: {e}"
                )
            });
        if result.is_ok() {
            posted += 1;
        }
    }

    posted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ChallengeStatus, ChallengeType};
    use crate::store::memory::MemoryFeed;
    use chrono::NaiveDate;

    fn challenge() -> Challenge {
        Challenge {
            id: 3,
            owner_id: 1,
            name: "October push".to_owned(),
            description: String::new(),
            challenge_type: ChallengeType::MostTasks,
            custom_rule: None,
            start_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 10, 7).unwrap(),
            max_participants: 5,
            prize_xp: 500,
            is_public: true,
            status: ChallengeStatus::Completed,
        }
    }

    #[test]
    fn winner_announcement_names_the_challenge_rank_and_score() {
        let payout = Payout {
            user_id: 42,
            rank: 2,
            score: 17,
            amount: 300,
        };
        let announcement = Announcement::winner(&challenge(), &payout);

        assert_eq!(announcement.user_id, 42);
        assert!(announcement.message.contains("October push"));
        assert_eq!(announcement.metadata["challenge_type"], "most_tasks");
        assert_eq!(announcement.metadata["rank"], 2);
        assert_eq!(announcement.metadata["score"], 17);
    }

    #[tokio::test]
    async fn dispatcher_survives_feed_failures() {
        let feed = MemoryFeed::new();
        let (sender, receiver) = channel();
        let payout = Payout {
            user_id: 1,
            rank: 1,
            score: 9,
            amount: 500,
        };

        feed.set_failing(true);
        announce(&sender, Announcement::winner(&challenge(), &payout));
        drop(sender);

        assert_eq!(dispatch(&feed, receiver).await, 0);
        assert!(feed.posts().is_empty());
    }

    #[tokio::test]
    async fn dispatcher_posts_everything_queued() {
        let feed = MemoryFeed::new();
        let (sender, receiver) = channel();
        for rank in 1..=3 {
            let payout = Payout {
                user_id: i64::from(rank),
                rank,
                score: 10,
                amount: 0,
            };
            announce(&sender, Announcement::winner(&challenge(), &payout));
        }
        drop(sender);

        assert_eq!(dispatch(&feed, receiver).await, 3);
        let users: Vec<_> = feed.posts().iter().map(|p| p.user_id).collect();
        assert_eq!(users, vec![1, 2, 3]);
    }
}
