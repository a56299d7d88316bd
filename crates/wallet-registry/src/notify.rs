//! Outbound events and the notification inbox used by fund requests.

use crate::{
    accounts::FundsRequestNotice,
    errors::BackendError,
    identity::{Address, IdentityRef},
    settings::NetworkSettings,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingChange {
    pub identity: IdentityRef,
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WalletEvent {
    NewAddressAssociated(BindingChange),
    AddressModified(BindingChange),
    AddressRemoved(BindingChange),
    SettingsChanged {
        old: Box<NetworkSettings>,
        new: Box<NetworkSettings>,
    },
    FundsRequested(Box<FundsRequestNotice>),
}

impl WalletEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewAddressAssociated(_) => "wallet.address.new",
            Self::AddressModified(_) => "wallet.address.modified",
            Self::AddressRemoved(_) => "wallet.address.removed",
            Self::SettingsChanged { .. } => "wallet.settings.changed",
            Self::FundsRequested(_) => "wallet.funds.requested",
        }
    }
}

/// Notification dispatcher of the surrounding platform.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit(&self, event: &WalletEvent) -> Result<(), BackendError>;
}

/// Emit `event`, logging a dispatch failure instead of returning it.
pub async fn emit_logged(notifier: &dyn Notifier, event: &WalletEvent) {
    if let Err(e) = notifier.emit(event).await {
        tracing::error!(event = event.name(), error = %e, "notification dispatch failed");
    }
}

/// A delivered web notification, as far as fund requests care about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationInfo {
    pub id: String,
    /// Recipient user id.
    pub to: Option<String>,
    #[serde(default)]
    pub owner_parameters: BTreeMap<String, String>,
}

#[async_trait]
pub trait NotificationInbox: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<NotificationInfo>, BackendError>;

    async fn update(&self, info: &NotificationInfo) -> Result<(), BackendError>;
}

/// [`Notifier`] that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<WalletEvent>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make dispatch fail (events are still not recorded while failing).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<WalletEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(WalletEvent::name).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn emit(&self, event: &WalletEvent) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err("notification channel down".into());
        }
        self.events
            .lock()
            .map_err(|e| BackendError::from(format!("notifier lock poisoned: {e}")))?
            .push(event.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryInbox {
    items: Mutex<HashMap<String, NotificationInfo>>,
}

impl MemoryInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an empty notification to `to` and return its id.
    pub fn deliver(&self, to: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        if let Ok(mut g) = self.items.lock() {
            g.insert(
                id.clone(),
                NotificationInfo {
                    id: id.clone(),
                    to: Some(to.to_owned()),
                    owner_parameters: BTreeMap::new(),
                },
            );
        }
        id
    }
}

#[async_trait]
impl NotificationInbox for MemoryInbox {
    async fn get(&self, id: &str) -> Result<Option<NotificationInfo>, BackendError> {
        let g = self
            .items
            .lock()
            .map_err(|e| BackendError::from(format!("inbox lock poisoned: {e}")))?;
        Ok(g.get(id).cloned())
    }

    async fn update(&self, info: &NotificationInfo) -> Result<(), BackendError> {
        let mut g = self
            .items
            .lock()
            .map_err(|e| BackendError::from(format!("inbox lock poisoned: {e}")))?;
        g.insert(info.id.clone(), info.clone());
        Ok(())
    }
}
