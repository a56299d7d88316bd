use crate::{
    composer::SettingsCache,
    errors::{RegistryError, Result},
    identity::Address,
    locks::KeyedLocks,
    store::{keys, StoreContext, WalletStore},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDetail {
    pub address: Address,
    pub network_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
}

impl ContractDetail {
    pub fn new(address: &str, network_id: u64) -> Result<Self> {
        if network_id == 0 {
            return Err(RegistryError::invalid("networkId parameter is mandatory"));
        }
        Ok(Self {
            address: Address::parse(address)?,
            network_id,
            name: None,
            symbol: None,
            decimals: None,
        })
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>, symbol: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.symbol = Some(symbol.into());
        self
    }
}

/// Parse a persisted comma-joined address set: blanks dropped, case folded, duplicates removed
/// keeping the first occurrence.
fn parse_set(raw: &str) -> Vec<Address> {
    let mut out: Vec<Address> = Vec::new();
    for a in raw.split(',').filter_map(|s| Address::parse(s).ok()) {
        if !out.contains(&a) {
            out.push(a);
        }
    }
    out
}

fn join_set(set: &[Address]) -> String {
    set.iter()
        .map(Address::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Per-network default contract sets and contract metadata.
pub struct ContractRegistry {
    store: WalletStore,
    cache: Arc<SettingsCache>,
    locks: KeyedLocks<u64>,
}

impl std::fmt::Debug for ContractRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractRegistry").finish_non_exhaustive()
    }
}

impl ContractRegistry {
    pub fn new(store: WalletStore, cache: Arc<SettingsCache>) -> Self {
        Self {
            store,
            cache,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn register_default(&self, detail: &ContractDetail) -> Result<()> {
        if detail.network_id == 0 {
            return Err(RegistryError::invalid("networkId parameter is mandatory"));
        }
        let network_id = detail.network_id;
        let body = serde_json::to_string(detail)
            .map_err(|e| RegistryError::invalid(format!("unencodable contract detail: {e}")))?;
        let _guard = self.locks.lock(&network_id).await;
        self.store
            .set(
                &StoreContext::Global,
                &keys::contract_detail(&detail.address, network_id),
                &body,
                "save contract detail",
            )
            .await?;

        let set_key = keys::default_contracts(network_id);
        let mut set = self.read_set(&set_key).await?;
        if !set.contains(&detail.address) {
            set.push(detail.address.clone());
            self.store
                .set(&StoreContext::Global, &set_key, &join_set(&set), "save default contracts")
                .await?;
        }
        self.cache.invalidate();
        tracing::debug!(address = %detail.address, network_id, "default contract registered");
        Ok(())
    }

    /// Returns false, touching nothing, when the address is blank or the network missing.
    pub async fn unregister_default(&self, address: &str, network_id: Option<u64>) -> Result<bool> {
        let Some(network_id) = network_id.filter(|n| *n != 0) else {
            tracing::warn!("can't remove a contract without a network id");
            return Ok(false);
        };
        let Ok(address) = Address::parse(address) else {
            tracing::warn!(network_id, "can't remove an empty contract address");
            return Ok(false);
        };

        let _guard = self.locks.lock(&network_id).await;
        let set_key = keys::default_contracts(network_id);
        let set = self.read_set(&set_key).await?;
        if set.contains(&address) {
            let kept: Vec<Address> = set.into_iter().filter(|a| *a != address).collect();
            self.store
                .set(&StoreContext::Global, &set_key, &join_set(&kept), "save default contracts")
                .await?;
        }
        self.store
            .remove(
                &StoreContext::Global,
                &keys::contract_detail(&address, network_id),
                "remove contract detail",
            )
            .await?;
        self.cache.invalidate();
        Ok(true)
    }

    pub async fn get_detail(&self, address: &str, network_id: u64) -> Result<Option<ContractDetail>> {
        let Ok(address) = Address::parse(address) else {
            return Ok(None);
        };
        let Some(raw) = self
            .store
            .get(
                &StoreContext::Global,
                &keys::contract_detail(&address, network_id),
                "read contract detail",
            )
            .await?
        else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| RegistryError::StoreUnavailable {
                operation: "decode contract detail",
                source: Box::new(e),
            })
    }

    /// Registered default contracts of a network, empty when the network is missing or zero.
    pub async fn list_defaults(&self, network_id: Option<u64>) -> Result<Vec<Address>> {
        match network_id.filter(|n| *n != 0) {
            Some(n) => self.read_set(&keys::default_contracts(n)).await,
            None => Ok(Vec::new()),
        }
    }

    async fn read_set(&self, key: &str) -> Result<Vec<Address>> {
        Ok(self
            .store
            .get(&StoreContext::Global, key, "read default contracts")
            .await?
            .map(|raw| parse_set(&raw))
            .unwrap_or_default())
    }
}
