use crate::{
    errors::{RegistryError, Result},
    identity::Address,
    locks::KeyedLocks,
    store::{keys, StoreContext, WalletStore},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

/// Annotation a sender attaches to a transaction before it is mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMessage {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_label: Option<String>,
}

impl TransactionMessage {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            label: None,
            note: None,
            sender_label: None,
        }
    }

    /// What the counterparty may see: the note only.
    fn for_receiver(&self) -> Self {
        Self {
            hash: self.hash.clone(),
            label: None,
            note: self.note.clone(),
            sender_label: None,
        }
    }
}

/// Bounded, expiring, in-process store of transaction annotations keyed by hash.
#[derive(Debug)]
pub struct LabelCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, (TransactionMessage, Instant)>>,
}

impl LabelCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (TransactionMessage, Instant)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put(&self, message: TransactionMessage) -> Result<()> {
        let key = message.hash.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(RegistryError::invalid("transaction hash parameter is mandatory"));
        }
        let now = Instant::now();
        let mut entries = self.lock();
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            entries.retain(|_, (_, at)| now.duration_since(*at) < self.ttl);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, (_, at))| *at)
                    .map(|(k, _)| k.clone());
                if let Some(k) = oldest {
                    entries.remove(&k);
                }
            }
        }
        entries.insert(key, (message, now));
        Ok(())
    }

    pub fn get(&self, hash: &str) -> Option<TransactionMessage> {
        let key = hash.trim().to_ascii_lowercase();
        let mut entries = self.lock();
        match entries.get(&key) {
            Some((m, at)) if at.elapsed() < self.ttl => Some(m.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn evict(&self, hash: &str) -> Option<TransactionMessage> {
        self.lock()
            .remove(&hash.trim().to_ascii_lowercase())
            .map(|(m, _)| m)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-address transaction hash lists, newest first, overlaid with cached labels.
pub struct TransactionLedger {
    store: WalletStore,
    labels: LabelCache,
    locks: KeyedLocks<String>,
}

impl std::fmt::Debug for TransactionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionLedger")
            .field("labels", &self.labels.len())
            .finish_non_exhaustive()
    }
}

impl TransactionLedger {
    pub fn new(store: WalletStore, labels: LabelCache) -> Self {
        Self {
            store,
            labels,
            locks: KeyedLocks::new(),
        }
    }

    /// Prepend `hash` to the address's list unless it is already there.
    pub async fn record(
        &self,
        network_id: u64,
        address: &str,
        hash: &str,
        is_sender: bool,
    ) -> Result<()> {
        let address = Address::parse(address)?;
        let hash = hash.trim();
        if hash.is_empty() {
            return Err(RegistryError::invalid("transaction hash parameter is mandatory"));
        }
        let key = keys::transactions(&address, network_id);
        let _guard = self.locks.lock(&key).await;

        let mut list = self.read_list(&key).await?;
        if list.iter().any(|m| m.hash.eq_ignore_ascii_case(hash)) {
            return Ok(());
        }
        let entry = match self.labels.get(hash) {
            Some(m) if is_sender => TransactionMessage {
                hash: hash.to_owned(),
                ..m
            },
            Some(m) => TransactionMessage {
                hash: hash.to_owned(),
                ..m.for_receiver()
            },
            None => TransactionMessage::new(hash),
        };
        list.insert(0, entry);
        let body = serde_json::to_string(&list)
            .map_err(|e| RegistryError::invalid(format!("unencodable transaction list: {e}")))?;
        self.store
            .set(&StoreContext::Global, &key, &body, "save transactions")
            .await
    }

    pub async fn list(&self, network_id: u64, address: &str) -> Result<Vec<TransactionMessage>> {
        let address = Address::parse(address)?;
        self.read_list(&keys::transactions(&address, network_id)).await
    }

    async fn read_list(&self, key: &str) -> Result<Vec<TransactionMessage>> {
        let Some(raw) = self
            .store
            .get(&StoreContext::Global, key, "read transactions")
            .await?
        else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw).map_err(|e| RegistryError::StoreUnavailable {
            operation: "decode transactions",
            source: Box::new(e),
        })
    }

    pub fn cache_label(&self, message: TransactionMessage) -> Result<()> {
        self.labels.put(message)
    }

    pub fn cached_label(&self, hash: &str) -> Option<TransactionMessage> {
        self.labels.get(hash)
    }

    pub fn evict_label(&self, hash: &str) -> Option<TransactionMessage> {
        self.labels.evict(hash)
    }

    /// Last block scanned for wallet transactions on a network, 0 when none is recorded.
    pub async fn last_watched_block(&self, network_id: u64) -> Result<u64> {
        let raw = self
            .store
            .get(
                &StoreContext::Global,
                &keys::last_watched_block(network_id),
                "read last watched block",
            )
            .await?;
        match raw {
            None => Ok(0),
            Some(v) => v.trim().parse().map_err(|e| RegistryError::StoreUnavailable {
                operation: "decode last watched block",
                source: Box::new(e),
            }),
        }
    }

    pub async fn save_last_watched_block(&self, network_id: u64, block: u64) -> Result<()> {
        tracing::debug!(block, network_id, "saving last watched block");
        self.store
            .set(
                &StoreContext::Global,
                &keys::last_watched_block(network_id),
                &block.to_string(),
                "save last watched block",
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn ledger() -> TransactionLedger {
        TransactionLedger::new(
            WalletStore::new(Arc::new(MemoryStore::new())),
            LabelCache::new(Duration::from_secs(60), 16),
        )
    }

    fn labelled(hash: &str) -> TransactionMessage {
        TransactionMessage {
            label: Some("rent".into()),
            note: Some("march".into()),
            sender_label: Some("to landlord".into()),
            ..TransactionMessage::new(hash)
        }
    }

    #[tokio::test]
    async fn duplicate_hash_is_a_no_op() -> eyre::Result<()> {
        let l = ledger();
        l.record(1, "0xAA", "0x01", true).await?;
        l.record(1, "0xaa", "0x02", true).await?;
        l.record(1, "0xaa", "0X01", false).await?;
        let list = l.list(1, "0xAa").await?;
        let hashes: Vec<&str> = list.iter().map(|m| m.hash.as_str()).collect();
        assert_eq!(hashes, vec!["0x02", "0x01"]);
        Ok(())
    }

    #[tokio::test]
    async fn receiver_entry_drops_private_labels() -> eyre::Result<()> {
        let l = ledger();
        l.cache_label(labelled("0xfeed"))?;
        l.record(1, "0xsender", "0xfeed", true).await?;
        l.record(1, "0xreceiver", "0xfeed", false).await?;

        let sent = l.list(1, "0xsender").await?;
        assert_eq!(sent.first().and_then(|m| m.label.as_deref()), Some("rent"));

        let received = l.list(1, "0xreceiver").await?;
        let entry = received.first().ok_or_else(|| eyre::eyre!("missing entry"))?;
        assert_eq!(entry.label, None);
        assert_eq!(entry.sender_label, None);
        assert_eq!(entry.note.as_deref(), Some("march"));
        Ok(())
    }

    #[tokio::test]
    async fn blank_inputs_are_rejected() {
        let l = ledger();
        assert!(matches!(
            l.record(1, " ", "0x01", true).await,
            Err(RegistryError::InvalidRequest(_))
        ));
        assert!(matches!(
            l.record(1, "0xaa", "", true).await,
            Err(RegistryError::InvalidRequest(_))
        ));
    }

    #[test]
    fn label_cache_evicts_oldest_past_capacity() -> eyre::Result<()> {
        let cache = LabelCache::new(Duration::from_secs(60), 2);
        cache.put(TransactionMessage::new("a"))?;
        std::thread::sleep(Duration::from_millis(2));
        cache.put(TransactionMessage::new("b"))?;
        std::thread::sleep(Duration::from_millis(2));
        cache.put(TransactionMessage::new("c"))?;
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("B").is_some());
        assert!(cache.evict("c").is_some());
        assert!(cache.get("c").is_none());
        Ok(())
    }

    #[test]
    fn expired_labels_read_as_absent() -> eyre::Result<()> {
        let cache = LabelCache::new(Duration::from_millis(1), 8);
        cache.put(TransactionMessage::new("x"))?;
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("x").is_none());
        assert!(cache.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn watched_block_defaults_to_zero() -> eyre::Result<()> {
        let l = ledger();
        assert_eq!(l.last_watched_block(3).await?, 0);
        l.save_last_watched_block(3, 1_234).await?;
        assert_eq!(l.last_watched_block(3).await?, 1_234);
        Ok(())
    }
}
