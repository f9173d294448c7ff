use crate::common::{UserActivity, UserId, Window};
use crate::error::SourceError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Read-only access to the task, streak, profile and achievement stores.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Fetches the raw activity of every user in `users` in one round-trip.
    ///
    /// Windowed records (completed tasks, unlocked achievements) may be
    /// pre-filtered to `window`; callers filter again, so returning a superset
    /// is fine. Users with no activity at all may be left out of the map.
    async fn activity(
        &self,
        users: &[UserId],
        window: &Window,
    ) -> Result<HashMap<UserId, UserActivity>, SourceError>;
}
