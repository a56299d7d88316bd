use crate::{
    access::AccessGate,
    accounts::AccountService,
    address::AddressRegistry,
    composer::{ComposerParts, SettingsCache, SettingsComposer},
    config::RegistryConfig,
    contracts::ContractRegistry,
    directory::Directory,
    ledger::{LabelCache, TransactionLedger},
    notify::{NotificationInbox, Notifier},
    phrase::PhraseGenerator,
    store::{SettingStore, WalletStore},
};
use std::sync::Arc;

/// External services the registry is layered on.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn SettingStore>,
    pub directory: Arc<dyn Directory>,
    pub notifier: Arc<dyn Notifier>,
    pub inbox: Arc<dyn NotificationInbox>,
}

/// Every registry component, wired over one set of collaborators and one settings cache.
#[derive(Clone)]
pub struct WalletRegistry {
    addresses: Arc<AddressRegistry>,
    contracts: Arc<ContractRegistry>,
    ledger: Arc<TransactionLedger>,
    composer: Arc<SettingsComposer>,
    phrases: Arc<PhraseGenerator>,
    gate: AccessGate,
    accounts: Arc<AccountService>,
}

impl std::fmt::Debug for WalletRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletRegistry").finish_non_exhaustive()
    }
}

impl WalletRegistry {
    pub fn new(config: &RegistryConfig, c: Collaborators) -> Self {
        let store = WalletStore::new(c.store);
        let cache = Arc::new(SettingsCache::new());
        let gate = AccessGate::new(Arc::clone(&c.directory));

        let phrases = Arc::new(PhraseGenerator::new(store.clone(), Arc::clone(&c.directory)));
        let contracts = Arc::new(ContractRegistry::new(store.clone(), Arc::clone(&cache)));
        let addresses = Arc::new(AddressRegistry::new(
            store.clone(),
            Arc::clone(&c.directory),
            Arc::clone(&c.notifier),
            Arc::clone(&phrases),
            Arc::clone(&cache),
        ));
        let ledger = Arc::new(TransactionLedger::new(
            store.clone(),
            LabelCache::new(config.cache.label_ttl(), config.cache.label_capacity),
        ));
        let composer = Arc::new(SettingsComposer::new(ComposerParts {
            store,
            contracts: Arc::clone(&contracts),
            addresses: Arc::clone(&addresses),
            phrases: Arc::clone(&phrases),
            gate: gate.clone(),
            notifier: Arc::clone(&c.notifier),
            defaults: config.network_defaults(),
            cache,
        }));
        let accounts = Arc::new(AccountService::new(
            c.directory,
            Arc::clone(&addresses),
            Arc::clone(&contracts),
            Arc::clone(&composer),
            c.notifier,
            c.inbox,
        ));

        Self {
            addresses,
            contracts,
            ledger,
            composer,
            phrases,
            gate,
            accounts,
        }
    }

    pub fn addresses(&self) -> &AddressRegistry {
        &self.addresses
    }

    pub fn contracts(&self) -> &ContractRegistry {
        &self.contracts
    }

    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    pub fn composer(&self) -> &SettingsComposer {
        &self.composer
    }

    pub fn phrases(&self) -> &PhraseGenerator {
        &self.phrases
    }

    pub const fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }
}
