use crate::{
    errors::{RegistryError, Result},
    identity::Address,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const fn default_true() -> bool {
    true
}

/// Global wallet settings, stored as one JSON document and overwritten wholesale on save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkSettings {
    /// Platform-wide switch; administrators still see the wallet when it is off.
    #[serde(default = "default_true")]
    pub wallet_enabled: bool,
    pub default_network_id: Option<u64>,
    #[serde(rename = "providerURL")]
    pub provider_url: Option<String>,
    #[serde(rename = "websocketProviderURL")]
    pub websocket_provider_url: Option<String>,
    /// Space (group) whose members may use the wallet. Unset means everyone.
    pub access_permission: Option<String>,
    pub default_gas: Option<u64>,
    pub default_blocks_to_retrieve: Option<u64>,
    /// Contracts shown on the default network in addition to the registered defaults.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub default_contract_addresses: Vec<Address>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            wallet_enabled: true,
            default_network_id: None,
            provider_url: None,
            websocket_provider_url: None,
            access_permission: None,
            default_gas: None,
            default_blocks_to_retrieve: None,
            default_contract_addresses: Vec::new(),
        }
    }
}

impl NetworkSettings {
    /// Overlay a stored settings document on `defaults`. Keys absent from (or null in) the
    /// stored document keep their default.
    pub fn merged_over(defaults: &Self, stored: &str) -> Result<Self> {
        let decode_err = |e: serde_json::Error| RegistryError::StoreUnavailable {
            operation: "decode global settings",
            source: Box::new(e),
        };
        let stored: Value = serde_json::from_str(stored).map_err(decode_err)?;
        let Value::Object(stored) = stored else {
            return Err(RegistryError::StoreUnavailable {
                operation: "decode global settings",
                source: "stored global settings is not a JSON object".into(),
            });
        };
        let mut merged = match serde_json::to_value(defaults).map_err(decode_err)? {
            Value::Object(m) => m,
            _ => serde_json::Map::new(),
        };
        for (k, v) in stored {
            if !v.is_null() {
                merged.insert(k, v);
            }
        }
        serde_json::from_value(Value::Object(merged)).map_err(decode_err)
    }

    /// Configured default network, ignoring the `0` placeholder some clients send.
    pub fn effective_network(&self, requested: Option<u64>) -> Option<u64> {
        requested
            .filter(|n| *n != 0)
            .or(self.default_network_id)
            .filter(|n| *n != 0)
    }
}

/// Display preferences a user stores for themself.
///
/// Wallet address and security phrase are deliberately absent: they are derived on read from the
/// address registry and phrase store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPreferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_gas: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl UserPreferences {
    const DERIVED_KEYS: [&'static str; 2] = ["walletAddress", "securityPhrase"];

    /// Copy suitable for persisting: derived keys a client may echo back are dropped.
    #[must_use]
    pub fn without_derived(&self) -> Self {
        let mut out = self.clone();
        for k in Self::DERIVED_KEYS {
            out.extra.remove(k);
        }
        out
    }
}

/// Preferences as returned to a client, with the derived fields filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPreferences {
    #[serde(flatten)]
    pub preferences: UserPreferences,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_phrase: Option<String>,
}

/// The merged, access-filtered settings view handed to one requester.
///
/// Serializes as one flat object. `walletEnabled` appears once and always carries
/// [`Self::wallet_enabled`], whether or not `settings` are present.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedSettings {
    pub wallet_enabled: bool,
    pub is_admin: bool,
    pub settings: Option<NetworkSettings>,
    pub network_id: Option<u64>,
    pub default_contracts_to_display: Vec<Address>,
    pub user_preferences: Option<IdentityPreferences>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ComposedWire<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    wallet_enabled: Option<bool>,
    is_admin: bool,
    #[serde(flatten)]
    settings: Option<NetworkSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    network_id: Option<u64>,
    #[serde(skip_serializing_if = "<[Address]>::is_empty")]
    default_contracts_to_display: &'a [Address],
    #[serde(skip_serializing_if = "Option::is_none")]
    user_preferences: Option<&'a IdentityPreferences>,
}

impl Serialize for ComposedSettings {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // The flattened settings carry their own `walletEnabled`; emit the flag there when present.
        let settings = self.settings.as_ref().map(|s| NetworkSettings {
            wallet_enabled: self.wallet_enabled,
            ..s.clone()
        });
        ComposedWire {
            wallet_enabled: settings.is_none().then_some(self.wallet_enabled),
            is_admin: self.is_admin,
            settings,
            network_id: self.network_id,
            default_contracts_to_display: &self.default_contracts_to_display,
            user_preferences: self.user_preferences.as_ref(),
        }
        .serialize(serializer)
    }
}

impl ComposedSettings {
    /// Everything but the disabled flag suppressed.
    pub const fn disabled() -> Self {
        Self {
            wallet_enabled: false,
            is_admin: false,
            settings: None,
            network_id: None,
            default_contracts_to_display: Vec::new(),
            user_preferences: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_document_overrides_only_present_keys() -> eyre::Result<()> {
        let defaults = NetworkSettings {
            default_network_id: Some(1),
            provider_url: Some("https://rpc.example".into()),
            default_gas: Some(35_000),
            ..NetworkSettings::default()
        };
        let merged = NetworkSettings::merged_over(
            &defaults,
            r#"{"defaultNetworkId": 3, "accessPermission": "finance-team", "defaultGas": null}"#,
        )?;
        assert_eq!(merged.default_network_id, Some(3));
        assert_eq!(merged.access_permission.as_deref(), Some("finance-team"));
        assert_eq!(merged.provider_url.as_deref(), Some("https://rpc.example"));
        assert_eq!(merged.default_gas, Some(35_000));
        assert!(merged.wallet_enabled);
        Ok(())
    }

    #[test]
    fn non_object_document_is_a_store_error() {
        let r = NetworkSettings::merged_over(&NetworkSettings::default(), "[1,2]");
        assert!(matches!(r, Err(RegistryError::StoreUnavailable { .. })));
    }

    #[test]
    fn zero_network_falls_back_to_default() {
        let s = NetworkSettings {
            default_network_id: Some(5),
            ..NetworkSettings::default()
        };
        assert_eq!(s.effective_network(Some(0)), Some(5));
        assert_eq!(s.effective_network(None), Some(5));
        assert_eq!(s.effective_network(Some(7)), Some(7));
        assert_eq!(NetworkSettings::default().effective_network(Some(0)), None);
    }

    #[test]
    fn disabled_view_serializes_to_flags_only() -> eyre::Result<()> {
        let v = serde_json::to_value(ComposedSettings::disabled())?;
        assert_eq!(v, serde_json::json!({"walletEnabled": false, "isAdmin": false}));
        Ok(())
    }

    #[test]
    fn derived_keys_are_not_persisted() -> eyre::Result<()> {
        let prefs: UserPreferences = serde_json::from_str(
            r#"{"defaultGas": 21000, "walletAddress": "0xabc", "securityPhrase": "x", "theme": "dark"}"#,
        )?;
        let stored = serde_json::to_value(prefs.without_derived())?;
        assert_eq!(
            stored,
            serde_json::json!({"defaultGas": 21000, "theme": "dark"})
        );
        Ok(())
    }

    /// Top-level keys of a JSON object, in order, duplicates included.
    struct Keys(Vec<String>);

    impl<'de> Deserialize<'de> for Keys {
        fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
            struct KeysVisitor;

            impl<'de> serde::de::Visitor<'de> for KeysVisitor {
                type Value = Keys;

                fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str("a JSON object")
                }

                fn visit_map<A: serde::de::MapAccess<'de>>(
                    self,
                    mut map: A,
                ) -> Result<Keys, A::Error> {
                    let mut keys = Vec::new();
                    while let Some(k) = map.next_key::<String>()? {
                        map.next_value::<serde::de::IgnoredAny>()?;
                        keys.push(k);
                    }
                    Ok(Keys(keys))
                }
            }

            d.deserialize_map(KeysVisitor)
        }
    }

    #[test]
    fn enabled_view_emits_each_key_once() -> eyre::Result<()> {
        let view = ComposedSettings {
            wallet_enabled: false,
            is_admin: true,
            settings: Some(NetworkSettings {
                default_network_id: Some(1),
                ..NetworkSettings::default()
            }),
            network_id: Some(1),
            default_contracts_to_display: vec![Address::parse("0xabc")?],
            user_preferences: Some(IdentityPreferences::default()),
        };
        let json = serde_json::to_string(&view)?;
        let Keys(mut keys) = serde_json::from_str(&json)?;
        let total = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), total, "duplicate keys in {json}");

        let v: Value = serde_json::from_str(&json)?;
        assert_eq!(v["walletEnabled"], false, "flag comes from the view, not the settings");
        assert_eq!(v["defaultNetworkId"], 1);
        Ok(())
    }
}
