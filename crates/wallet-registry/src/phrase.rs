use crate::{
    access::authority_over,
    directory::Directory,
    errors::Result,
    identity::IdentityRef,
    locks::KeyedLocks,
    store::{keys, StoreContext, WalletStore},
};
use rand::Rng as _;
use std::sync::Arc;

const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
pub const PHRASE_LEN: usize = 20;

// Largest multiple of 62 that fits a byte; bytes at or above it are redrawn to keep the
// distribution uniform.
const REJECT_FROM: u8 = 248;

/// A fresh random phrase of [`PHRASE_LEN`] alphanumeric characters.
pub fn random_phrase() -> String {
    let mut out = String::with_capacity(PHRASE_LEN);
    let mut buf = [0_u8; 32];
    while out.len() < PHRASE_LEN {
        rand::rng().fill_bytes(&mut buf);
        for b in buf {
            if out.len() == PHRASE_LEN {
                break;
            }
            if b < REJECT_FROM {
                if let Some(&c) = ALPHABET.get(usize::from(b % 62)) {
                    out.push(char::from(c));
                }
            }
        }
    }
    out
}

/// One-time security phrase per identity, immutable once stored.
pub struct PhraseGenerator {
    store: WalletStore,
    directory: Arc<dyn Directory>,
    locks: KeyedLocks<IdentityRef>,
}

impl std::fmt::Debug for PhraseGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhraseGenerator").finish_non_exhaustive()
    }
}

impl PhraseGenerator {
    pub fn new(store: WalletStore, directory: Arc<dyn Directory>) -> Self {
        Self {
            store,
            directory,
            locks: KeyedLocks::new(),
        }
    }

    /// The identity's phrase, generated on first call. Callers without authority over the
    /// identity get `None` rather than an error.
    pub async fn phrase_for(&self, identity: &IdentityRef, requester: &str) -> Result<Option<String>> {
        if authority_over(self.directory.as_ref(), identity, requester).await? != Some(true) {
            return Ok(None);
        }
        self.ensure_phrase(identity).await.map(Some)
    }

    /// Already-stored phrase, never generating one.
    pub async fn stored_phrase(
        &self,
        identity: &IdentityRef,
        requester: &str,
    ) -> Result<Option<String>> {
        if authority_over(self.directory.as_ref(), identity, requester).await? != Some(true) {
            return Ok(None);
        }
        self.store
            .get(&ctx(identity), keys::SECURITY_PHRASE, "read security phrase")
            .await
    }

    /// Return the stored phrase, creating it first if needed. Authorization is the caller's job.
    pub(crate) async fn ensure_phrase(&self, identity: &IdentityRef) -> Result<String> {
        let _guard = self.locks.lock(identity).await;
        let ctx = ctx(identity);
        if let Some(existing) = self
            .store
            .get(&ctx, keys::SECURITY_PHRASE, "read security phrase")
            .await?
        {
            return Ok(existing);
        }
        self.store
            .set_if_absent(
                &ctx,
                keys::SECURITY_PHRASE,
                &random_phrase(),
                "store security phrase",
            )
            .await
    }
}

fn ctx(identity: &IdentityRef) -> StoreContext {
    StoreContext::Identity(identity.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{directory::MemoryDirectory, store::MemoryStore};

    fn generator() -> Arc<PhraseGenerator> {
        let dir = Arc::new(MemoryDirectory::new());
        dir.add_user("alice", "Alice")
            .add_space("ops", "Ops")
            .add_manager("ops", "alice");
        Arc::new(PhraseGenerator::new(
            WalletStore::new(Arc::new(MemoryStore::new())),
            dir,
        ))
    }

    #[test]
    fn phrases_are_twenty_alphanumerics() {
        for _ in 0..50 {
            let p = random_phrase();
            assert_eq!(p.len(), PHRASE_LEN);
            assert!(p.chars().all(|c| c.is_ascii_alphanumeric()), "bad phrase {p}");
        }
    }

    #[tokio::test]
    async fn repeated_requests_return_the_same_phrase() -> eyre::Result<()> {
        let g = generator();
        let alice = IdentityRef::user("alice")?;
        let a = g.phrase_for(&alice, "alice").await?;
        let b = g.phrase_for(&alice, "alice").await?;
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(g.stored_phrase(&alice, "alice").await?, a);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_first_requests_agree() -> eyre::Result<()> {
        let g = generator();
        let ops = IdentityRef::space("ops")?;
        let mut handles = Vec::new();
        for _ in 0..8 {
            let g = Arc::clone(&g);
            let ops = ops.clone();
            handles.push(tokio::spawn(async move { g.phrase_for(&ops, "alice").await }));
        }
        let mut seen = Vec::new();
        for h in handles {
            seen.push(h.await??);
        }
        seen.dedup();
        assert_eq!(seen.len(), 1, "phrases diverged: {seen:?}");
        Ok(())
    }

    #[tokio::test]
    async fn outsiders_get_nothing() -> eyre::Result<()> {
        let g = generator();
        assert_eq!(g.phrase_for(&IdentityRef::user("alice")?, "mallory").await?, None);
        assert_eq!(g.phrase_for(&IdentityRef::space("ops")?, "mallory").await?, None);
        assert_eq!(g.phrase_for(&IdentityRef::space("ghost")?, "alice").await?, None);
        Ok(())
    }
}
