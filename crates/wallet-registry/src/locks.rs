use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, PoisonError, Weak},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-key async critical sections.
///
/// Serializes read-modify-write sequences against the settings store within this process. The
/// table holds weak references, so keys nobody is waiting on cost nothing after they are pruned.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    table: Mutex<HashMap<K, Weak<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = table.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        table.retain(|_, w| w.strong_count() > 0);
        let fresh = Arc::new(AsyncMutex::new(()));
        table.insert(key.clone(), Arc::downgrade(&fresh));
        fresh
    }

    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        self.handle(key).lock_owned().await
    }
}
