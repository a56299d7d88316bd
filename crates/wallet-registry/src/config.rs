use crate::{identity::Address, paths::RegistryPaths, settings::NetworkSettings};
use eyre::Context as _;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

pub const DEFAULT_NETWORK_ID: u64 = 1;
pub const DEFAULT_GAS: u64 = 35_000;
pub const DEFAULT_BLOCKS_TO_RETRIEVE: u64 = 1_000;

/// Network settings used until an administrator saves global settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_network_id: Option<u64>,
    /// HTTP JSON-RPC endpoint handed to wallet clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_provider_url: Option<String>,
    /// Space whose members may use the wallet; unset opens it to everyone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_permission: Option<String>,
    pub default_gas: u64,
    pub default_blocks_to_retrieve: u64,
    /// Contracts displayed on the default network for everyone.
    pub default_contracts: Vec<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            default_network_id: Some(DEFAULT_NETWORK_ID),
            provider_url: None,
            websocket_provider_url: None,
            access_permission: None,
            default_gas: DEFAULT_GAS,
            default_blocks_to_retrieve: DEFAULT_BLOCKS_TO_RETRIEVE,
            default_contracts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a cached transaction label (seconds).
    pub label_ttl_seconds: u64,
    pub label_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            label_ttl_seconds: 60 * 60,
            label_capacity: 10_000,
        }
    }
}

impl CacheConfig {
    pub const fn label_ttl(&self) -> Duration {
        Duration::from_secs(self.label_ttl_seconds)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub defaults: DefaultsConfig,
    pub cache: CacheConfig,
}

impl RegistryConfig {
    /// Defaults as network settings. Malformed contract addresses are dropped here; `doctor`
    /// reports them.
    pub fn network_defaults(&self) -> NetworkSettings {
        let d = &self.defaults;
        NetworkSettings {
            wallet_enabled: true,
            default_network_id: d.default_network_id.filter(|n| *n != 0),
            provider_url: d.provider_url.clone(),
            websocket_provider_url: d.websocket_provider_url.clone(),
            access_permission: d.access_permission.clone(),
            default_gas: Some(d.default_gas),
            default_blocks_to_retrieve: Some(d.default_blocks_to_retrieve),
            default_contract_addresses: d
                .default_contracts
                .iter()
                .filter_map(|a| Address::parse(a).ok())
                .collect(),
        }
    }
}

fn parse_contract_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Apply `WALLET_REGISTRY_*` overrides. Unset, blank and unparsable values are ignored.
fn apply_env_overrides(cfg: &mut RegistryConfig, var: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| {
        var(name)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    };
    let d = &mut cfg.defaults;

    if let Some(n) = get("WALLET_REGISTRY_DEFAULT_NETWORK_ID").and_then(|v| v.parse().ok()) {
        d.default_network_id = Some(n);
    }
    if let Some(v) = get("WALLET_REGISTRY_PROVIDER_URL") {
        d.provider_url = Some(v);
    }
    if let Some(v) = get("WALLET_REGISTRY_WS_PROVIDER_URL") {
        d.websocket_provider_url = Some(v);
    }
    if let Some(v) = get("WALLET_REGISTRY_ACCESS_PERMISSION") {
        d.access_permission = Some(v);
    }
    if let Some(n) = get("WALLET_REGISTRY_DEFAULT_GAS").and_then(|v| v.parse().ok()) {
        d.default_gas = n;
    }
    if let Some(n) = get("WALLET_REGISTRY_DEFAULT_BLOCKS_TO_RETRIEVE").and_then(|v| v.parse().ok()) {
        d.default_blocks_to_retrieve = n;
    }
    if let Some(v) = get("WALLET_REGISTRY_DEFAULT_CONTRACTS") {
        d.default_contracts = parse_contract_list(&v);
    }
    if let Some(n) = get("WALLET_REGISTRY_LABEL_TTL_SECONDS")
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|n| *n > 0)
    {
        cfg.cache.label_ttl_seconds = n;
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(paths: &RegistryPaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn load_or_init_default(&self) -> eyre::Result<RegistryConfig> {
        if !self.path.exists() {
            let mut cfg = RegistryConfig::default();
            self.save(&cfg)?;
            apply_env_overrides(&mut cfg, |k| std::env::var(k).ok());
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: RegistryConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg, |k| std::env::var(k).ok());
        Ok(cfg)
    }

    pub fn save(&self, cfg: &RegistryConfig) -> eyre::Result<()> {
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_atomic(&self.path, &s, crate::fsutil::MODE_FILE_PRIVATE)
            .context("write config.toml")
    }
}
