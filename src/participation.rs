use crate::common::UserId;
use crate::error::StoreError;
use crate::store::ProfileStore;
use std::sync::Arc;
use tracing::info;

/// Per-user opt-in controlling leaderboard inclusion. Challenges ignore it.
#[derive(Debug)]
pub struct ParticipationGate<S> {
    store: Arc<S>,
}

impl<S> Clone for ParticipationGate<S> {
    fn clone(&self) -> Self {
        ParticipationGate {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ProfileStore> ParticipationGate<S> {
    pub fn new(store: Arc<S>) -> Self {
        ParticipationGate { store }
    }

    /// Takes effect on the next recompute. Published entries are left alone.
    pub async fn set_opt_in(&self, user_id: UserId, opt_in: bool) -> Result<(), StoreError> {
        self.store.set_opt_in(user_id, opt_in).await?;
        info!(user_id, opt_in, "leaderboard participation changed");
        Ok(())
    }

    pub async fn is_opted_in(&self, user_id: UserId) -> Result<bool, StoreError> {
        self.store.is_opted_in(user_id).await
    }

    pub async fn opted_in_users(&self) -> Result<Vec<UserId>, StoreError> {
        self.store.opted_in_users().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn users_are_opted_out_until_they_opt_in() {
        let gate = ParticipationGate::new(Arc::new(MemoryStore::new()));
        assert!(!gate.is_opted_in(1).await.unwrap());

        gate.set_opt_in(1, true).await.unwrap();
        gate.set_opt_in(2, true).await.unwrap();
        gate.set_opt_in(2, false).await.unwrap();

        assert!(gate.is_opted_in(1).await.unwrap());
        assert_eq!(gate.opted_in_users().await.unwrap(), vec![1]);
    }
}
