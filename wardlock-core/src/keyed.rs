use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mutual exclusion per key. Holders of different keys never wait on each
/// other; idle keys are dropped from the map.
#[derive(Debug)]
pub struct KeyedMutex<K: Eq + Hash + Clone> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

fn relock<'a, T>(guard: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    // The protected value is `()` or a map we only insert/remove on, so a
    // panic in another holder cannot leave it half-updated.
    guard.unwrap_or_else(PoisonError::into_inner)
}

impl<K: Eq + Hash + Clone> KeyedMutex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with<R>(&self, key: &K, f: impl FnOnce() -> R) -> R {
        let slot = {
            let mut slots = relock(self.slots.lock());
            slots.entry(key.clone()).or_default().clone()
        };

        let result = {
            let _held = relock(slot.lock());
            f()
        };

        let mut slots = relock(self.slots.lock());
        // Only the map and this call still reference the slot
        if Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
        result
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        relock(self.slots.lock()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
