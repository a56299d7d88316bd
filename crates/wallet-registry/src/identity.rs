use crate::errors::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two kinds of platform identity that can own a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    User,
    Space,
}

impl AccountKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Space => "space",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "space" => Some(Self::Space),
            _ => None,
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user or a space, by id. Construction rejects blank ids, so a held value is always usable
/// as a storage scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum IdentityRef {
    User(String),
    Space(String),
}

impl IdentityRef {
    pub fn user(id: impl Into<String>) -> Result<Self> {
        Self::new(AccountKind::User, id)
    }

    pub fn space(id: impl Into<String>) -> Result<Self> {
        Self::new(AccountKind::Space, id)
    }

    pub fn new(kind: AccountKind, id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let id = id.trim();
        if id.is_empty() {
            return Err(RegistryError::invalid("identity id is mandatory"));
        }
        Ok(match kind {
            AccountKind::User => Self::User(id.to_owned()),
            AccountKind::Space => Self::Space(id.to_owned()),
        })
    }

    /// Build from loosely-typed request fields (`type`, `id`), as received from clients.
    pub fn from_parts(kind: &str, id: &str) -> Result<Self> {
        if kind.trim().is_empty() || id.trim().is_empty() {
            return Err(RegistryError::invalid("identity id and type are mandatory"));
        }
        let kind = AccountKind::parse(kind)
            .ok_or_else(|| RegistryError::invalid(format!("unrecognized identity type: {kind}")))?;
        Self::new(kind, id)
    }

    pub const fn kind(&self) -> AccountKind {
        match self {
            Self::User(_) => AccountKind::User,
            Self::Space(_) => AccountKind::Space,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::User(id) | Self::Space(id) => id,
        }
    }

    /// Encoding used as the value of a forward (address -> identity) binding.
    pub fn to_binding_value(&self) -> String {
        format!("{}:{}", self.kind(), self.id())
    }

    pub fn from_binding_value(v: &str) -> Option<Self> {
        let (kind, id) = v.split_once(':')?;
        Self::new(AccountKind::parse(kind)?, id).ok()
    }
}

impl fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Canonical (lowercase, trimmed) wallet address.
///
/// Every read, write and comparison in the registry goes through this type, so addresses that
/// differ only by case are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self> {
        let t = raw.trim();
        if t.is_empty() {
            return Err(RegistryError::invalid("address is mandatory"));
        }
        if t.contains(',') || t.chars().any(char::is_whitespace) {
            return Err(RegistryError::invalid(format!("malformed address: {t}")));
        }
        Ok(Self(t.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for a `0x`-prefixed 20-byte hex string.
    pub fn is_evm_hex(&self) -> bool {
        self.0
            .strip_prefix("0x")
            .is_some_and(|h| h.len() == 40 && hex::decode(h).is_ok())
    }
}

impl TryFrom<String> for Address {
    type Error = RegistryError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_differing_by_case_are_equal() -> eyre::Result<()> {
        let a = Address::parse("0xABCdef0000000000000000000000000000000001")?;
        let b = Address::parse("  0xabcDEF0000000000000000000000000000000001 ")?;
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "0xabcdef0000000000000000000000000000000001");
        assert!(a.is_evm_hex());
        Ok(())
    }

    #[test]
    fn blank_or_list_like_addresses_are_rejected() {
        assert!(Address::parse("   ").is_err());
        assert!(Address::parse("0xabc,0xdef").is_err());
        assert!(!Address::parse("0xabc").is_ok_and(|a| a.is_evm_hex()));
    }

    #[test]
    fn identity_parts_are_validated() {
        assert!(matches!(
            IdentityRef::from_parts("", "alice"),
            Err(RegistryError::InvalidRequest(_))
        ));
        assert!(matches!(
            IdentityRef::from_parts("user", "  "),
            Err(RegistryError::InvalidRequest(_))
        ));
        assert!(matches!(
            IdentityRef::from_parts("group", "finance"),
            Err(RegistryError::InvalidRequest(_))
        ));
        assert!(matches!(
            IdentityRef::from_parts("SPACE", "finance"),
            Ok(IdentityRef::Space(id)) if id == "finance"
        ));
    }

    #[test]
    fn binding_value_round_trips_ids_with_colons() -> eyre::Result<()> {
        let id = IdentityRef::space("team:ops")?;
        let v = id.to_binding_value();
        assert_eq!(v, "space:team:ops");
        assert_eq!(IdentityRef::from_binding_value(&v), Some(id));
        assert_eq!(IdentityRef::from_binding_value("robot:x"), None);
        Ok(())
    }
}
