use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

#[derive(Debug)]
struct Slot<T> {
    /// Bumped by every invalidation. A loader only installs its result if the generation it
    /// started from is still current.
    generation: u64,
    value: Option<Arc<T>>,
}

/// Single-slot cache with lazy population and explicit invalidation.
///
/// The lock guards only the slot swap, never the (slow) load. Readers always receive a complete
/// `Arc<T>`. A load racing an invalidation may hand its result to its own caller but never
/// installs it, so no read that starts after `invalidate` returns can observe pre-invalidation
/// data.
#[derive(Debug)]
pub struct SnapshotCache<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> Default for SnapshotCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SnapshotCache<T> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                generation: 0,
                value: None,
            }),
        }
    }

    // The slot is only ever assigned whole, so a poisoned guard still holds a consistent value.
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> Option<Arc<T>> {
        self.lock().value.clone()
    }

    pub fn invalidate(&self) {
        let mut slot = self.lock();
        slot.generation = slot.generation.wrapping_add(1);
        slot.value = None;
    }

    pub async fn get_or_populate<F, Fut, E>(&self, load: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started_at = {
            let slot = self.lock();
            if let Some(v) = &slot.value {
                return Ok(Arc::clone(v));
            }
            slot.generation
        };

        let fresh = Arc::new(load().await?);

        let mut slot = self.lock();
        if slot.generation != started_at {
            return Ok(fresh);
        }
        match &slot.value {
            // Another loader from the same generation won; converge on its snapshot.
            Some(existing) => Ok(Arc::clone(existing)),
            None => {
                slot.value = Some(Arc::clone(&fresh));
                Ok(fresh)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[tokio::test]
    async fn populates_once_until_invalidated() -> eyre::Result<()> {
        let cache = SnapshotCache::new();
        let a = cache.get_or_populate(|| async { Ok::<_, Infallible>(1_u32) }).await?;
        let b = cache.get_or_populate(|| async { Ok::<_, Infallible>(2_u32) }).await?;
        assert_eq!((*a, *b), (1, 1));

        cache.invalidate();
        let c = cache.get_or_populate(|| async { Ok::<_, Infallible>(3_u32) }).await?;
        assert_eq!(*c, 3);
        Ok(())
    }

    #[tokio::test]
    async fn load_racing_invalidation_is_not_installed() -> eyre::Result<()> {
        let cache = Arc::new(SnapshotCache::new());
        let c2 = Arc::clone(&cache);
        let stale = cache
            .get_or_populate(|| async move {
                // Mutation lands while this reader is still loading.
                c2.invalidate();
                Ok::<_, Infallible>("stale")
            })
            .await?;
        assert_eq!(*stale, "stale");
        assert!(cache.current().is_none(), "stale snapshot was installed");

        let fresh = cache
            .get_or_populate(|| async { Ok::<_, Infallible>("fresh") })
            .await?;
        assert_eq!(*fresh, "fresh");
        Ok(())
    }

    #[tokio::test]
    async fn failed_load_leaves_slot_empty() {
        let cache: SnapshotCache<u8> = SnapshotCache::new();
        let r = cache.get_or_populate(|| async { Err("store down") }).await;
        assert_eq!(r.err(), Some("store down"));
        assert!(cache.current().is_none());
    }
}
