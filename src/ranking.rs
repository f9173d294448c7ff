use crate::common::{LeaderboardEntry, Score};
use crate::scoring::UserScore;
use fxhash::FxHasher;
use itertools::Itertools;
use std::hash::{Hash, Hasher};

/// Orders `rows` by descending score, breaking ties by ascending `tie_break`,
/// and pairs each row with its dense rank `1..=N`.
///
/// Ties never share a rank; the tie-break key decides who goes first, so the
/// ranking is a total order and stable across passes over the same scores.
pub fn rank_rows<T, K: Ord>(
    rows: impl IntoIterator<Item = T>,
    score: impl Fn(&T) -> Score,
    tie_break: impl Fn(&T) -> K,
) -> Vec<(T, u32)> {
    rows.into_iter()
        .sorted_by(|a, b| {
            score(b)
                .cmp(&score(a))
                .then_with(|| tie_break(a).cmp(&tie_break(b)))
        })
        .zip(1..)
        .collect()
}

/// Ranks a leaderboard pass and keeps the top `retention` entries. Equal
/// scores are ordered by ascending user id.
pub fn leaderboard_entries(
    scores: impl IntoIterator<Item = UserScore>,
    retention: usize,
) -> Vec<LeaderboardEntry> {
    rank_rows(scores, |s| s.score, |s| s.user_id)
        .into_iter()
        .take(retention)
        .map(|(s, rank)| LeaderboardEntry {
            user_id: s.user_id,
            score: s.score,
            rank,
        })
        .collect()
}

/// Content hash of an entry set, used to skip republishing identical results.
pub fn entries_hash(entries: &[LeaderboardEntry]) -> i64 {
    let mut hasher = FxHasher::default();
    for entry in entries {
        entry.user_id.hash(&mut hasher);
        entry.score.hash(&mut hasher);
        entry.rank.hash(&mut hasher);
    }
    hasher.finish() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(user_id: i64, score: Score) -> UserScore {
        UserScore {
            user_id,
            score,
            failure: None,
        }
    }

    #[test]
    fn ranks_are_dense_and_sorted_descending() {
        let entries = leaderboard_entries(
            vec![scored(4, 10), scored(1, 30), scored(3, 0), scored(2, 20)],
            100,
        );

        let ranks: Vec<_> = entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
        assert!(entries.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(entries[0].user_id, 1);
    }

    #[test]
    fn ties_are_broken_by_user_id() {
        let entries = leaderboard_entries(vec![scored(9, 300), scored(3, 300), scored(5, 100)], 100);
        let order: Vec<_> = entries.iter().map(|e| (e.user_id, e.rank)).collect();
        assert_eq!(order, vec![(3, 1), (9, 2), (5, 3)]);
    }

    #[test]
    fn retention_keeps_the_top_entries() {
        let scores = (1..=150).map(|user| scored(user, user as Score));
        let entries = leaderboard_entries(scores, 100);

        assert_eq!(entries.len(), 100);
        assert_eq!(entries[0].user_id, 150);
        assert_eq!(entries[99].rank, 100);
        assert_eq!(entries[99].user_id, 51);
    }

    #[test]
    fn empty_input_ranks_nothing() {
        assert!(leaderboard_entries(Vec::new(), 100).is_empty());
    }

    #[test]
    fn hash_changes_with_content() {
        let a = leaderboard_entries(vec![scored(1, 5), scored(2, 3)], 100);
        let b = leaderboard_entries(vec![scored(1, 5), scored(2, 4)], 100);
        assert_eq!(entries_hash(&a), entries_hash(&a.clone()));
        assert_ne!(entries_hash(&a), entries_hash(&b));
    }
}
