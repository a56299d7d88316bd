//! Scoped key-value settings store consumed by the registry.
//!
//! The store itself (persistence, transactions) lives outside this crate. This module defines the
//! contract, the key layout the registry writes under, and an in-memory adapter for tests and
//! local development.

use crate::{
    errors::{BackendError, RegistryError, Result},
    identity::{AccountKind, IdentityRef},
};
use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex},
};

/// Scope under which every registry entry is stored.
pub const WALLET_SCOPE: &str = "wallet_registry";

/// Where a setting lives: the shared global context, or the private context of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreContext {
    Global,
    Identity(IdentityRef),
}

impl fmt::Display for StoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Identity(id) => write!(f, "{id}"),
        }
    }
}

#[async_trait]
pub trait SettingStore: Send + Sync {
    async fn get(
        &self,
        ctx: &StoreContext,
        scope: &str,
        key: &str,
    ) -> Result<Option<String>, BackendError>;

    async fn set(
        &self,
        ctx: &StoreContext,
        scope: &str,
        key: &str,
        value: &str,
    ) -> Result<(), BackendError>;

    async fn remove(&self, ctx: &StoreContext, scope: &str, key: &str)
        -> Result<(), BackendError>;

    /// Ids of identity contexts of `kind` holding `key` in `scope`, in a stable order.
    async fn list_contexts(
        &self,
        kind: AccountKind,
        scope: &str,
        key: &str,
        offset: usize,
        page_size: usize,
    ) -> Result<Vec<String>, BackendError>;

    /// Store `value` unless the key already holds one; returns whatever is stored afterwards.
    ///
    /// Backends with a native conditional write should override this. The default performs a
    /// read, a tentative write and a confirming read, which is only race-free when callers
    /// serialize on the key themselves.
    async fn set_if_absent(
        &self,
        ctx: &StoreContext,
        scope: &str,
        key: &str,
        value: &str,
    ) -> Result<String, BackendError> {
        if let Some(existing) = self.get(ctx, scope, key).await? {
            return Ok(existing);
        }
        self.set(ctx, scope, key, value).await?;
        Ok(self
            .get(ctx, scope, key)
            .await?
            .unwrap_or_else(|| value.to_owned()))
    }
}

/// Key layout. Keys without an identity context are global.
pub mod keys {
    use crate::identity::Address;

    pub const GLOBAL_SETTINGS: &str = "global_settings";
    pub const WALLET_ADDRESS: &str = "wallet_address";
    pub const PREFERENCES: &str = "preferences";
    pub const SECURITY_PHRASE: &str = "security_phrase";

    pub fn forward_binding(address: &Address) -> String {
        format!("address:{address}")
    }

    pub fn contract_detail(address: &Address, network_id: u64) -> String {
        format!("contract:{address}:{network_id}")
    }

    pub fn default_contracts(network_id: u64) -> String {
        format!("default_contracts:{network_id}")
    }

    pub fn transactions(address: &Address, network_id: u64) -> String {
        format!("transactions:{address}:{network_id}")
    }

    pub fn last_watched_block(network_id: u64) -> String {
        format!("last_watched_block:{network_id}")
    }
}

/// The registry's view of the store: fixed scope, errors mapped to [`RegistryError`].
#[derive(Clone)]
pub struct WalletStore {
    inner: Arc<dyn SettingStore>,
}

impl fmt::Debug for WalletStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletStore").finish_non_exhaustive()
    }
}

impl WalletStore {
    pub fn new(inner: Arc<dyn SettingStore>) -> Self {
        Self { inner }
    }

    pub async fn get(
        &self,
        ctx: &StoreContext,
        key: &str,
        op: &'static str,
    ) -> Result<Option<String>> {
        self.inner
            .get(ctx, WALLET_SCOPE, key)
            .await
            .map_err(RegistryError::store(op))
    }

    pub async fn set(&self, ctx: &StoreContext, key: &str, value: &str, op: &'static str) -> Result<()> {
        self.inner
            .set(ctx, WALLET_SCOPE, key, value)
            .await
            .map_err(RegistryError::store(op))
    }

    pub async fn remove(&self, ctx: &StoreContext, key: &str, op: &'static str) -> Result<()> {
        self.inner
            .remove(ctx, WALLET_SCOPE, key)
            .await
            .map_err(RegistryError::store(op))
    }

    pub async fn set_if_absent(
        &self,
        ctx: &StoreContext,
        key: &str,
        value: &str,
        op: &'static str,
    ) -> Result<String> {
        self.inner
            .set_if_absent(ctx, WALLET_SCOPE, key, value)
            .await
            .map_err(RegistryError::store(op))
    }

    pub async fn list_contexts(
        &self,
        kind: AccountKind,
        key: &str,
        offset: usize,
        page_size: usize,
    ) -> Result<Vec<String>> {
        self.inner
            .list_contexts(kind, WALLET_SCOPE, key, offset, page_size)
            .await
            .map_err(RegistryError::store("list contexts"))
    }
}

type MemoryKey = (StoreContext, String, String);

/// Process-local [`SettingStore`]. Suitable for tests and development only: nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<MemoryKey, String>>,
    unavailable: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again), to exercise outage handling.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut g) = self.unavailable.lock() {
            *g = unavailable;
        }
    }

    /// Number of stored entries, across all contexts and scopes.
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |g| g.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), BackendError> {
        let down = self
            .unavailable
            .lock()
            .map_err(|e| BackendError::from(format!("memory store lock poisoned: {e}")))?;
        if *down {
            return Err("memory store marked unavailable".into());
        }
        Ok(())
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<MemoryKey, String>) -> T,
    ) -> Result<T, BackendError> {
        self.check_available()?;
        let mut g = self
            .entries
            .lock()
            .map_err(|e| BackendError::from(format!("memory store lock poisoned: {e}")))?;
        Ok(f(&mut g))
    }
}

fn memory_key(ctx: &StoreContext, scope: &str, key: &str) -> MemoryKey {
    (ctx.clone(), scope.to_owned(), key.to_owned())
}

#[async_trait]
impl SettingStore for MemoryStore {
    async fn get(
        &self,
        ctx: &StoreContext,
        scope: &str,
        key: &str,
    ) -> Result<Option<String>, BackendError> {
        self.with_entries(|m| m.get(&memory_key(ctx, scope, key)).cloned())
    }

    async fn set(
        &self,
        ctx: &StoreContext,
        scope: &str,
        key: &str,
        value: &str,
    ) -> Result<(), BackendError> {
        self.with_entries(|m| {
            m.insert(memory_key(ctx, scope, key), value.to_owned());
        })
    }

    async fn remove(
        &self,
        ctx: &StoreContext,
        scope: &str,
        key: &str,
    ) -> Result<(), BackendError> {
        self.with_entries(|m| {
            m.remove(&memory_key(ctx, scope, key));
        })
    }

    async fn list_contexts(
        &self,
        kind: AccountKind,
        scope: &str,
        key: &str,
        offset: usize,
        page_size: usize,
    ) -> Result<Vec<String>, BackendError> {
        self.with_entries(|m| {
            m.keys()
                .filter(|(ctx, s, k)| {
                    s == scope
                        && k == key
                        && matches!(ctx, StoreContext::Identity(id) if id.kind() == kind)
                })
                .filter_map(|(ctx, _, _)| match ctx {
                    StoreContext::Identity(id) => Some(id.id().to_owned()),
                    StoreContext::Global => None,
                })
                .skip(offset)
                .take(page_size)
                .collect()
        })
    }

    async fn set_if_absent(
        &self,
        ctx: &StoreContext,
        scope: &str,
        key: &str,
        value: &str,
    ) -> Result<String, BackendError> {
        self.with_entries(|m| {
            m.entry(memory_key(ctx, scope, key))
                .or_insert_with(|| value.to_owned())
                .clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_contexts_pages_by_kind() -> eyre::Result<()> {
        let store = WalletStore::new(Arc::new(MemoryStore::new()));
        for i in 0..5 {
            let ctx = StoreContext::Identity(IdentityRef::user(format!("u{i}"))?);
            store.set(&ctx, keys::WALLET_ADDRESS, "0x1", "seed").await?;
        }
        let space = StoreContext::Identity(IdentityRef::space("s0")?);
        store.set(&space, keys::WALLET_ADDRESS, "0x2", "seed").await?;

        let first = store
            .list_contexts(AccountKind::User, keys::WALLET_ADDRESS, 0, 3)
            .await?;
        let second = store
            .list_contexts(AccountKind::User, keys::WALLET_ADDRESS, 3, 3)
            .await?;
        assert_eq!(first, vec!["u0", "u1", "u2"]);
        assert_eq!(second, vec!["u3", "u4"]);
        Ok(())
    }

    #[tokio::test]
    async fn set_if_absent_keeps_first_value() -> eyre::Result<()> {
        let store = WalletStore::new(Arc::new(MemoryStore::new()));
        let ctx = StoreContext::Global;
        let a = store.set_if_absent(&ctx, "k", "first", "seed k").await?;
        let b = store.set_if_absent(&ctx, "k", "second", "seed k").await?;
        assert_eq!(a, "first");
        assert_eq!(b, "first");
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_store_maps_to_store_error() {
        let mem = Arc::new(MemoryStore::new());
        mem.set_unavailable(true);
        let store = WalletStore::new(mem);
        let err = store.get(&StoreContext::Global, "k", "read k").await;
        assert!(matches!(
            err,
            Err(RegistryError::StoreUnavailable { operation: "read k", .. })
        ));
    }
}
