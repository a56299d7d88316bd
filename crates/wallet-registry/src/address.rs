//! Address registry: the address/identity relation, stored as two independent indexes.
//!
//! Forward entries (`address:<addr>` in the global context) name the owning identity; reverse
//! entries (`wallet_address` in the identity's own context) name the bound address. Every
//! mutation goes through [`AddressRegistry::bind`] or [`AddressRegistry::unbind`], which retire
//! stale entries before installing new ones. A forward entry only counts when the identity it
//! names points back at the same address, so an interrupted reassignment can never make two
//! addresses resolve to one identity.

use crate::{
    access::authorize,
    composer::SettingsCache,
    directory::Directory,
    errors::Result,
    identity::{AccountKind, Address, IdentityRef},
    notify::{emit_logged, BindingChange, Notifier, WalletEvent},
    phrase::PhraseGenerator,
    store::{keys, StoreContext, WalletStore},
};
use std::{collections::BTreeMap, ops::ControlFlow, sync::Arc};
use tokio::sync::Mutex as AsyncMutex;

/// Page size used when walking bindings in the store.
pub const LIST_PAGE_SIZE: usize = 100;

pub struct AddressRegistry {
    store: WalletStore,
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn Notifier>,
    phrases: Arc<PhraseGenerator>,
    cache: Arc<SettingsCache>,
    // Bind and unbind each touch up to four entries; one at a time per process.
    mutations: AsyncMutex<()>,
}

impl std::fmt::Debug for AddressRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressRegistry").finish_non_exhaustive()
    }
}

impl AddressRegistry {
    pub fn new(
        store: WalletStore,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        phrases: Arc<PhraseGenerator>,
        cache: Arc<SettingsCache>,
    ) -> Self {
        Self {
            store,
            directory,
            notifier,
            phrases,
            cache,
            mutations: AsyncMutex::new(()),
        }
    }

    /// Owner of `address`, if its forward and reverse entries agree.
    pub async fn resolve(&self, address: &str) -> Result<Option<IdentityRef>> {
        let address = Address::parse(address)?;
        let Some(owner) = self.forward_owner(&address).await? else {
            return Ok(None);
        };
        if self.address_of(&owner).await?.as_ref() == Some(&address) {
            return Ok(Some(owner));
        }
        tracing::warn!(
            address = %address,
            identity = %owner,
            "forward binding not confirmed by the identity's own address; ignoring it"
        );
        Ok(None)
    }

    pub async fn address_of(&self, identity: &IdentityRef) -> Result<Option<Address>> {
        let raw = self
            .store
            .get(
                &StoreContext::Identity(identity.clone()),
                keys::WALLET_ADDRESS,
                "read identity address",
            )
            .await?;
        Ok(raw.and_then(|r| Address::parse(&r).ok()))
    }

    /// Unvalidated forward entry.
    async fn forward_owner(&self, address: &Address) -> Result<Option<IdentityRef>> {
        let raw = self
            .store
            .get(
                &StoreContext::Global,
                &keys::forward_binding(address),
                "read address owner",
            )
            .await?;
        Ok(raw.as_deref().and_then(IdentityRef::from_binding_value))
    }

    /// Bind `identity` to `address` on behalf of `requester`, returning the identity's security
    /// phrase.
    pub async fn bind(&self, identity: &IdentityRef, address: &str, requester: &str) -> Result<String> {
        let address = match Address::parse(address) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(identity = %identity, "bad request: missing wallet address");
                return Err(e);
            }
        };
        authorize(self.directory.as_ref(), identity, requester).await?;

        let guard = self.mutations.lock().await;
        let previous = self.address_of(identity).await?;

        if let Some(old) = previous.as_ref().filter(|old| **old != address) {
            if let Some(old_owner) = self.forward_owner(old).await? {
                if old_owner != *identity {
                    tracing::info!(
                        address = %old,
                        identity = %old_owner,
                        "clearing stale address of previous owner"
                    );
                    self.remove_reverse(&old_owner).await?;
                }
            }
            self.store
                .remove(&StoreContext::Global, &keys::forward_binding(old), "remove old address")
                .await?;
        }

        if let Some(holder) = self.forward_owner(&address).await? {
            if holder != *identity && self.address_of(&holder).await?.as_ref() == Some(&address) {
                tracing::info!(
                    address = %address,
                    from = %holder,
                    to = %identity,
                    "address reassigned to another identity"
                );
                self.remove_reverse(&holder).await?;
            }
        }

        self.store
            .set(
                &StoreContext::Global,
                &keys::forward_binding(&address),
                &identity.to_binding_value(),
                "save address owner",
            )
            .await?;
        self.store
            .set(
                &StoreContext::Identity(identity.clone()),
                keys::WALLET_ADDRESS,
                address.as_str(),
                "save identity address",
            )
            .await?;
        self.cache.invalidate();
        drop(guard);

        let change = BindingChange {
            identity: identity.clone(),
            address,
            previous: previous.clone(),
        };
        let event = if previous.is_some() {
            WalletEvent::AddressModified(change)
        } else {
            WalletEvent::NewAddressAssociated(change)
        };
        emit_logged(self.notifier.as_ref(), &event).await;

        self.phrases.ensure_phrase(identity).await
    }

    /// Remove the identity's binding in both directions. Returns the address it had.
    pub async fn unbind(&self, identity: &IdentityRef, requester: &str) -> Result<Option<Address>> {
        authorize(self.directory.as_ref(), identity, requester).await?;
        let guard = self.mutations.lock().await;
        let Some(address) = self.address_of(identity).await? else {
            return Ok(None);
        };
        if self.forward_owner(&address).await?.as_ref() == Some(identity) {
            self.store
                .remove(
                    &StoreContext::Global,
                    &keys::forward_binding(&address),
                    "remove address owner",
                )
                .await?;
        }
        self.remove_reverse(identity).await?;
        self.cache.invalidate();
        drop(guard);

        emit_logged(
            self.notifier.as_ref(),
            &WalletEvent::AddressRemoved(BindingChange {
                identity: identity.clone(),
                address: address.clone(),
                previous: None,
            }),
        )
        .await;
        Ok(Some(address))
    }

    async fn remove_reverse(&self, identity: &IdentityRef) -> Result<()> {
        self.store
            .remove(
                &StoreContext::Identity(identity.clone()),
                keys::WALLET_ADDRESS,
                "remove identity address",
            )
            .await
    }

    /// Every bound identity of `kind`, by id.
    pub async fn list_bindings_by_type(&self, kind: AccountKind) -> Result<BTreeMap<String, Address>> {
        self.list_bindings_by_type_with(kind, |_| ControlFlow::Continue(()))
            .await
    }

    /// Like [`Self::list_bindings_by_type`], handing each page to `on_page`. Breaking stops the
    /// walk and returns what was collected so far.
    pub async fn list_bindings_by_type_with<F>(
        &self,
        kind: AccountKind,
        mut on_page: F,
    ) -> Result<BTreeMap<String, Address>>
    where
        F: FnMut(&[(String, Address)]) -> ControlFlow<()> + Send,
    {
        let mut out = BTreeMap::new();
        let mut offset = 0;
        loop {
            let ids = self
                .store
                .list_contexts(kind, keys::WALLET_ADDRESS, offset, LIST_PAGE_SIZE)
                .await?;
            let fetched = ids.len();
            let mut page = Vec::with_capacity(fetched);
            for id in ids {
                let Ok(identity) = IdentityRef::new(kind, id.as_str()) else {
                    continue;
                };
                if let Some(address) = self.address_of(&identity).await? {
                    page.push((id, address));
                }
            }
            let flow = on_page(&page);
            out.extend(page);
            if fetched < LIST_PAGE_SIZE || flow.is_break() {
                return Ok(out);
            }
            offset += fetched;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        directory::MemoryDirectory,
        errors::RegistryError,
        notify::RecordingNotifier,
        store::{MemoryStore, SettingStore},
    };

    struct Fixture {
        registry: AddressRegistry,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let wallet_store = WalletStore::new(Arc::clone(&store) as Arc<dyn SettingStore>);
        let dir = Arc::new(MemoryDirectory::new());
        dir.add_user("alice", "Alice")
            .add_user("bob", "Bob")
            .add_space("ops", "Ops")
            .add_manager("ops", "alice");
        let notifier = Arc::new(RecordingNotifier::new());
        let phrases = Arc::new(PhraseGenerator::new(
            wallet_store.clone(),
            Arc::clone(&dir) as Arc<dyn Directory>,
        ));
        let registry = AddressRegistry::new(
            wallet_store,
            dir,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            phrases,
            Arc::new(SettingsCache::new()),
        );
        Fixture {
            registry,
            store,
            notifier,
        }
    }

    #[tokio::test]
    async fn rebinding_retires_the_old_address() -> eyre::Result<()> {
        let f = fixture();
        let alice = IdentityRef::user("alice")?;
        let first = f.registry.bind(&alice, "0xAAA", "alice").await?;
        let second = f.registry.bind(&alice, "0xbbb", "alice").await?;
        assert_eq!(first, second, "phrase changed on rebind");

        assert_eq!(f.registry.resolve("0xaaa").await?, None);
        assert_eq!(f.registry.resolve("0xBBB").await?, Some(alice.clone()));
        assert_eq!(f.registry.address_of(&alice).await?, Some(Address::parse("0xbbb")?));
        assert_eq!(
            f.notifier.names(),
            vec!["wallet.address.new", "wallet.address.modified"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn taking_an_address_clears_the_previous_holder() -> eyre::Result<()> {
        let f = fixture();
        let alice = IdentityRef::user("alice")?;
        let bob = IdentityRef::user("bob")?;
        f.registry.bind(&alice, "0xshared", "alice").await?;
        f.registry.bind(&bob, "0xSHARED", "bob").await?;
        assert_eq!(f.registry.resolve("0xshared").await?, Some(bob));
        assert_eq!(f.registry.address_of(&alice).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn unauthorized_space_bind_changes_nothing() -> eyre::Result<()> {
        let f = fixture();
        let ops = IdentityRef::space("ops")?;
        let r = f.registry.bind(&ops, "0xops", "bob").await;
        assert!(matches!(r, Err(RegistryError::Forbidden(_))));
        assert!(f.store.is_empty());
        assert!(f.notifier.events().is_empty());

        f.registry.bind(&ops, "0xops", "alice").await?;
        assert_eq!(f.registry.resolve("0xOPS").await?, Some(ops));
        Ok(())
    }

    #[tokio::test]
    async fn forward_entry_without_matching_reverse_is_ignored() -> eyre::Result<()> {
        let f = fixture();
        let alice = IdentityRef::user("alice")?;
        f.registry.bind(&alice, "0xaaa", "alice").await?;
        // Simulate a reassignment interrupted after the new forward entry was written.
        WalletStore::new(Arc::clone(&f.store) as Arc<dyn SettingStore>)
            .set(
                &StoreContext::Global,
                &keys::forward_binding(&Address::parse("0xbbb")?),
                "user:alice",
                "seed",
            )
            .await?;
        assert_eq!(f.registry.resolve("0xbbb").await?, None);
        assert_eq!(f.registry.resolve("0xaaa").await?, Some(alice));
        Ok(())
    }

    #[tokio::test]
    async fn unbind_removes_both_directions() -> eyre::Result<()> {
        let f = fixture();
        let alice = IdentityRef::user("alice")?;
        f.registry.bind(&alice, "0xaaa", "alice").await?;
        assert_eq!(f.registry.unbind(&alice, "alice").await?, Some(Address::parse("0xaaa")?));
        assert_eq!(f.registry.resolve("0xaaa").await?, None);
        assert_eq!(f.registry.address_of(&alice).await?, None);
        assert_eq!(f.registry.unbind(&alice, "alice").await?, None);
        Ok(())
    }

    async fn seed_users(f: &Fixture, count: usize) -> eyre::Result<()> {
        let ws = WalletStore::new(Arc::clone(&f.store) as Arc<dyn SettingStore>);
        for i in 0..count {
            let id = IdentityRef::user(format!("user{i:04}"))?;
            ws.set(
                &StoreContext::Identity(id),
                keys::WALLET_ADDRESS,
                &format!("0x{i:04x}"),
                "seed",
            )
            .await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn listing_walks_every_page() -> eyre::Result<()> {
        let f = fixture();
        seed_users(&f, LIST_PAGE_SIZE * 2 + 5).await?;
        let all = f.registry.list_bindings_by_type(AccountKind::User).await?;
        assert_eq!(all.len(), LIST_PAGE_SIZE * 2 + 5);
        assert!(f.registry.list_bindings_by_type(AccountKind::Space).await?.is_empty());

        let mut pages = 0;
        let partial = f
            .registry
            .list_bindings_by_type_with(AccountKind::User, |_| {
                pages += 1;
                ControlFlow::Break(())
            })
            .await?;
        assert_eq!(pages, 1);
        assert_eq!(partial.len(), LIST_PAGE_SIZE);
        Ok(())
    }

    #[tokio::test]
    async fn listing_stops_after_empty_trailing_page() -> eyre::Result<()> {
        let f = fixture();
        seed_users(&f, LIST_PAGE_SIZE * 2).await?;

        let mut sizes = Vec::new();
        let all = f
            .registry
            .list_bindings_by_type_with(AccountKind::User, |page| {
                sizes.push(page.len());
                ControlFlow::Continue(())
            })
            .await?;
        assert_eq!(all.len(), LIST_PAGE_SIZE * 2, "every binding listed");
        assert_eq!(sizes, [LIST_PAGE_SIZE, LIST_PAGE_SIZE, 0], "page sizes");
        assert!(all.contains_key("user0199"), "last seeded user present");
        Ok(())
    }
}
