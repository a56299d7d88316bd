use crate::{
    access::AccessGate,
    address::AddressRegistry,
    cache::SnapshotCache,
    contracts::ContractRegistry,
    errors::{RegistryError, Result},
    identity::{Address, IdentityRef},
    notify::{emit_logged, Notifier, WalletEvent},
    phrase::PhraseGenerator,
    settings::{ComposedSettings, IdentityPreferences, NetworkSettings, UserPreferences},
    store::{keys, StoreContext, WalletStore},
};
use std::sync::Arc;

/// Identity-agnostic part of the composed settings; the only thing the composer caches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseSnapshot {
    pub settings: NetworkSettings,
    /// Registered defaults of the configured default network, followed by any configured seeds.
    pub default_network_contracts: Vec<Address>,
}

pub type SettingsCache = SnapshotCache<BaseSnapshot>;

/// Builds the per-request settings view.
pub struct SettingsComposer {
    store: WalletStore,
    contracts: Arc<ContractRegistry>,
    addresses: Arc<AddressRegistry>,
    phrases: Arc<PhraseGenerator>,
    gate: AccessGate,
    notifier: Arc<dyn Notifier>,
    defaults: NetworkSettings,
    cache: Arc<SettingsCache>,
}

impl std::fmt::Debug for SettingsComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsComposer")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

pub struct ComposerParts {
    pub store: WalletStore,
    pub contracts: Arc<ContractRegistry>,
    pub addresses: Arc<AddressRegistry>,
    pub phrases: Arc<PhraseGenerator>,
    pub gate: AccessGate,
    pub notifier: Arc<dyn Notifier>,
    pub defaults: NetworkSettings,
    pub cache: Arc<SettingsCache>,
}

impl SettingsComposer {
    pub fn new(parts: ComposerParts) -> Self {
        let ComposerParts {
            store,
            contracts,
            addresses,
            phrases,
            gate,
            notifier,
            defaults,
            cache,
        } = parts;
        Self {
            store,
            contracts,
            addresses,
            phrases,
            gate,
            notifier,
            defaults,
            cache,
        }
    }

    /// Cached global settings merged over the configured defaults.
    pub async fn base_settings(&self) -> Result<Arc<BaseSnapshot>> {
        self.cache.get_or_populate(|| self.load_base()).await
    }

    async fn load_base(&self) -> Result<BaseSnapshot> {
        let stored = self
            .store
            .get(&StoreContext::Global, keys::GLOBAL_SETTINGS, "read global settings")
            .await?;
        let settings = match stored {
            Some(raw) => NetworkSettings::merged_over(&self.defaults, &raw)?,
            None => self.defaults.clone(),
        };
        let mut contracts = self
            .contracts
            .list_defaults(settings.default_network_id)
            .await?;
        for seed in &settings.default_contract_addresses {
            if !contracts.contains(seed) {
                contracts.push(seed.clone());
            }
        }
        Ok(BaseSnapshot {
            settings,
            default_network_contracts: contracts,
        })
    }

    /// Settings as seen by `requester` (anonymous when `None`), for `network_id` (or the
    /// configured default) and, when `space_id` is given, that space's wallet.
    pub async fn get_settings(
        &self,
        requester: Option<&str>,
        network_id: Option<u64>,
        space_id: Option<&str>,
    ) -> Result<ComposedSettings> {
        let requester = requester.map(str::trim).filter(|r| !r.is_empty());
        let base = self.base_settings().await?;

        let is_admin = self.gate.is_admin(requester).await?;
        let enabled = self
            .gate
            .is_enabled_for_with_admin(requester, &base.settings, is_admin)
            .await?;
        if !enabled && !is_admin {
            return Ok(ComposedSettings::disabled());
        }

        let mut settings = base.settings.clone();
        settings.wallet_enabled = enabled;
        let network_id = settings.effective_network(network_id);
        let default_contracts_to_display = if network_id.is_some()
            && network_id == settings.default_network_id
        {
            base.default_network_contracts.clone()
        } else {
            self.contracts.list_defaults(network_id).await?
        };

        let user_preferences = match requester {
            Some(user) => Some(self.preferences_view(user, space_id).await?),
            None => None,
        };

        Ok(ComposedSettings {
            wallet_enabled: enabled,
            is_admin,
            settings: Some(settings),
            network_id,
            default_contracts_to_display,
            user_preferences,
        })
    }

    async fn preferences_view(&self, user: &str, space_id: Option<&str>) -> Result<IdentityPreferences> {
        let me = IdentityRef::user(user)?;
        let preferences = self.stored_preferences(&me).await?;
        let target = match space_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(space) => IdentityRef::space(space)?,
            None => me,
        };
        Ok(IdentityPreferences {
            preferences,
            wallet_address: self.addresses.address_of(&target).await?,
            security_phrase: self.phrases.stored_phrase(&target, user).await?,
        })
    }

    async fn stored_preferences(&self, identity: &IdentityRef) -> Result<UserPreferences> {
        let raw = self
            .store
            .get(
                &StoreContext::Identity(identity.clone()),
                keys::PREFERENCES,
                "read preferences",
            )
            .await?;
        match raw {
            None => Ok(UserPreferences::default()),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| RegistryError::StoreUnavailable {
                operation: "decode preferences",
                source: Box::new(e),
            }),
        }
    }

    /// Overwrite the global settings document.
    pub async fn save_settings(&self, new: &NetworkSettings) -> Result<()> {
        let old = self.previous_settings().await?;
        let body = serde_json::to_string(new)
            .map_err(|e| RegistryError::invalid(format!("unencodable settings: {e}")))?;
        tracing::debug!(settings = %body, "saving global wallet settings");
        self.store
            .set(&StoreContext::Global, keys::GLOBAL_SETTINGS, &body, "save global settings")
            .await?;
        self.cache.invalidate();

        emit_logged(
            self.notifier.as_ref(),
            &WalletEvent::SettingsChanged {
                old: Box::new(old),
                new: Box::new(new.clone()),
            },
        )
        .await;
        Ok(())
    }

    /// Settings being replaced. An undecodable stored document reads as the defaults, so a save
    /// can always overwrite it.
    async fn previous_settings(&self) -> Result<NetworkSettings> {
        if let Some(base) = self.cache.current() {
            return Ok(base.settings.clone());
        }
        let stored = self
            .store
            .get(&StoreContext::Global, keys::GLOBAL_SETTINGS, "read global settings")
            .await?;
        Ok(match stored {
            None => self.defaults.clone(),
            Some(raw) => NetworkSettings::merged_over(&self.defaults, &raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "stored global settings are unreadable; overwriting them");
                self.defaults.clone()
            }),
        })
    }

    /// [`Self::save_settings`] for a raw JSON document as received from a client.
    pub async fn save_settings_document(&self, document: &str) -> Result<()> {
        let parsed: Option<NetworkSettings> = serde_json::from_str(document)
            .map_err(|e| RegistryError::invalid(format!("malformed settings document: {e}")))?;
        let Some(new) = parsed else {
            tracing::warn!("bad request: empty global settings");
            return Err(RegistryError::invalid("globalSettings parameter is mandatory"));
        };
        self.save_settings(&new).await
    }

    pub async fn save_preferences(&self, identity_id: &str, preferences: &UserPreferences) -> Result<()> {
        let identity = IdentityRef::user(identity_id)?;
        let body = serde_json::to_string(&preferences.without_derived())
            .map_err(|e| RegistryError::invalid(format!("unencodable preferences: {e}")))?;
        self.store
            .set(
                &StoreContext::Identity(identity),
                keys::PREFERENCES,
                &body,
                "save preferences",
            )
            .await?;
        self.cache.invalidate();
        Ok(())
    }
}
