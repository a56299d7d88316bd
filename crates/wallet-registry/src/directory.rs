use crate::errors::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Login name; the id wallets are bound to.
    pub id: String,
    /// Directory-internal identifier.
    pub technical_id: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceProfile {
    /// Short id (last segment of the space group id); the id wallets are bound to.
    pub id: String,
    pub technical_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Identity and space directory of the surrounding platform.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn user(&self, id: &str) -> Result<Option<UserProfile>, BackendError>;

    /// Resolve a space by short id, pretty name, URL or `/spaces/<id>` group id.
    async fn space(&self, reference: &str) -> Result<Option<SpaceProfile>, BackendError>;

    async fn is_member(&self, space: &SpaceProfile, user_id: &str) -> Result<bool, BackendError>;

    async fn is_manager(&self, space: &SpaceProfile, user_id: &str)
        -> Result<bool, BackendError>;

    /// Platform-wide space super-manager.
    async fn is_super_manager(&self, user_id: &str) -> Result<bool, BackendError>;

    /// Member of the platform administrators group.
    async fn is_admin(&self, user_id: &str) -> Result<bool, BackendError>;
}

#[derive(Debug, Clone)]
struct SpaceEntry {
    profile: SpaceProfile,
    members: BTreeSet<String>,
    managers: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct DirectoryData {
    users: BTreeMap<String, UserProfile>,
    spaces: BTreeMap<String, SpaceEntry>,
    super_managers: BTreeSet<String>,
    admins: BTreeSet<String>,
}

/// In-memory [`Directory`] for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    data: Mutex<DirectoryData>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut DirectoryData)) {
        if let Ok(mut g) = self.data.lock() {
            f(&mut g);
        }
    }

    fn read<T>(&self, f: impl FnOnce(&DirectoryData) -> T) -> Result<T, BackendError> {
        let g = self
            .data
            .lock()
            .map_err(|e| BackendError::from(format!("directory lock poisoned: {e}")))?;
        Ok(f(&g))
    }

    pub fn add_user(&self, id: &str, full_name: &str) -> &Self {
        self.update(|d| {
            d.users.insert(
                id.to_owned(),
                UserProfile {
                    id: id.to_owned(),
                    technical_id: format!("identity-{id}"),
                    full_name: full_name.to_owned(),
                    avatar_url: None,
                },
            );
        });
        self
    }

    pub fn add_space(&self, id: &str, display_name: &str) -> &Self {
        self.update(|d| {
            d.spaces.insert(
                id.to_owned(),
                SpaceEntry {
                    profile: SpaceProfile {
                        id: id.to_owned(),
                        technical_id: format!("space-{id}"),
                        display_name: display_name.to_owned(),
                        avatar_url: None,
                    },
                    members: BTreeSet::new(),
                    managers: BTreeSet::new(),
                },
            );
        });
        self
    }

    pub fn add_member(&self, space_id: &str, user_id: &str) -> &Self {
        self.update(|d| {
            if let Some(s) = d.spaces.get_mut(space_id) {
                s.members.insert(user_id.to_owned());
            }
        });
        self
    }

    /// Managers are members too.
    pub fn add_manager(&self, space_id: &str, user_id: &str) -> &Self {
        self.update(|d| {
            if let Some(s) = d.spaces.get_mut(space_id) {
                s.members.insert(user_id.to_owned());
                s.managers.insert(user_id.to_owned());
            }
        });
        self
    }

    pub fn add_super_manager(&self, user_id: &str) -> &Self {
        self.update(|d| {
            d.super_managers.insert(user_id.to_owned());
        });
        self
    }

    pub fn add_admin(&self, user_id: &str) -> &Self {
        self.update(|d| {
            d.admins.insert(user_id.to_owned());
        });
        self
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn user(&self, id: &str) -> Result<Option<UserProfile>, BackendError> {
        self.read(|d| d.users.get(id).cloned())
    }

    async fn space(&self, reference: &str) -> Result<Option<SpaceProfile>, BackendError> {
        let r = reference.trim();
        let short = r.strip_prefix("/spaces/").unwrap_or(r);
        self.read(|d| {
            d.spaces
                .get(short)
                .or_else(|| {
                    d.spaces
                        .values()
                        .find(|s| s.profile.display_name.eq_ignore_ascii_case(short))
                })
                .map(|s| s.profile.clone())
        })
    }

    async fn is_member(&self, space: &SpaceProfile, user_id: &str) -> Result<bool, BackendError> {
        self.read(|d| {
            d.spaces
                .get(&space.id)
                .is_some_and(|s| s.members.contains(user_id))
        })
    }

    async fn is_manager(
        &self,
        space: &SpaceProfile,
        user_id: &str,
    ) -> Result<bool, BackendError> {
        self.read(|d| {
            d.spaces
                .get(&space.id)
                .is_some_and(|s| s.managers.contains(user_id))
        })
    }

    async fn is_super_manager(&self, user_id: &str) -> Result<bool, BackendError> {
        self.read(|d| d.super_managers.contains(user_id))
    }

    async fn is_admin(&self, user_id: &str) -> Result<bool, BackendError> {
        self.read(|d| d.admins.contains(user_id))
    }
}
