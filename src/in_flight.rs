use crate::error::EngineError;
use fxhash::FxHashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

/// Set of keys with a pass currently running. Acquiring a key that is already
/// held fails immediately instead of waiting.
#[derive(Debug)]
pub struct InFlight<K> {
    running: Arc<Mutex<FxHashSet<K>>>,
}

impl<K> Default for InFlight<K> {
    fn default() -> Self {
        InFlight {
            running: Arc::new(Mutex::new(FxHashSet::default())),
        }
    }
}

impl<K: Hash + Eq + Clone + Debug> InFlight<K> {
    pub fn new() -> Self {
        InFlight::default()
    }

    pub fn try_acquire(&self, key: K) -> Result<InFlightGuard<K>, EngineError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(key.clone()) {
            return Err(EngineError::ConcurrentRecompute(format!("{key:?}")));
        }

        Ok(InFlightGuard {
            running: Arc::clone(&self.running),
            key,
        })
    }

    pub fn is_running(&self, key: &K) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

/// Releases its key when dropped, including when the pass is cancelled.
#[derive(Debug)]
pub struct InFlightGuard<K: Hash + Eq> {
    running: Arc<Mutex<FxHashSet<K>>>,
    key: K,
}

impl<K: Hash + Eq> Drop for InFlightGuard<K> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_until_the_guard_drops() {
        let in_flight = InFlight::new();
        let guard = in_flight.try_acquire(7).unwrap();

        assert!(matches!(
            in_flight.try_acquire(7),
            Err(EngineError::ConcurrentRecompute(_))
        ));
        assert!(in_flight.try_acquire(8).is_ok());

        drop(guard);
        assert!(!in_flight.is_running(&7));
        assert!(in_flight.try_acquire(7).is_ok());
    }
}
