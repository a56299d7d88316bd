use crate::{
    directory::Directory,
    errors::{RegistryError, Result},
    identity::IdentityRef,
    settings::NetworkSettings,
};
use std::sync::Arc;

/// Whether `requester` may act on behalf of `identity`: a user only for themself, a space for its
/// managers and the platform super-managers. `Ok(None)` means the space does not exist.
pub async fn authority_over(
    directory: &dyn Directory,
    identity: &IdentityRef,
    requester: &str,
) -> Result<Option<bool>> {
    match identity {
        IdentityRef::User(id) => Ok(Some(id == requester)),
        IdentityRef::Space(id) => {
            let Some(space) = directory
                .space(id)
                .await
                .map_err(RegistryError::directory("space lookup"))?
            else {
                return Ok(None);
            };
            if directory
                .is_manager(&space, requester)
                .await
                .map_err(RegistryError::directory("manager check"))?
            {
                return Ok(Some(true));
            }
            directory
                .is_super_manager(requester)
                .await
                .map(Some)
                .map_err(RegistryError::directory("super-manager check"))
        }
    }
}

/// Like [`authority_over`], as a hard precondition of a mutation.
pub async fn authorize(
    directory: &dyn Directory,
    identity: &IdentityRef,
    requester: &str,
) -> Result<()> {
    match authority_over(directory, identity, requester).await? {
        Some(true) => Ok(()),
        Some(false) => {
            tracing::error!(
                identity = %identity,
                requester,
                "unauthorized attempt to act on behalf of another identity"
            );
            Err(RegistryError::forbidden(format!(
                "{requester} may not act on behalf of {identity}"
            )))
        }
        None => Err(RegistryError::not_found(format!("space {} not found", identity.id()))),
    }
}

/// Decides whether the wallet feature is visible to a requester.
#[derive(Clone)]
pub struct AccessGate {
    directory: Arc<dyn Directory>,
}

impl std::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate").finish_non_exhaustive()
    }
}

impl AccessGate {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Anonymous callers are never restricted by the access permission, nor is anyone when the
    /// configured space cannot be resolved.
    pub async fn is_enabled_for(
        &self,
        requester: Option<&str>,
        settings: &NetworkSettings,
    ) -> Result<bool> {
        self.evaluate(requester, settings, None).await
    }

    /// [`Self::is_enabled_for`] for a requester whose admin flag is already known.
    pub async fn is_enabled_for_with_admin(
        &self,
        requester: Option<&str>,
        settings: &NetworkSettings,
        is_admin: bool,
    ) -> Result<bool> {
        self.evaluate(requester, settings, Some(is_admin)).await
    }

    async fn evaluate(
        &self,
        requester: Option<&str>,
        settings: &NetworkSettings,
        known_admin: Option<bool>,
    ) -> Result<bool> {
        if !settings.wallet_enabled {
            return Ok(false);
        }
        let permission = settings
            .access_permission
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());
        let (Some(permission), Some(user)) = (permission, requester) else {
            return Ok(true);
        };
        let Some(space) = self
            .directory
            .space(permission)
            .await
            .map_err(RegistryError::directory("access permission lookup"))?
        else {
            return Ok(true);
        };
        if known_admin == Some(true)
            || self
                .directory
                .is_member(&space, user)
                .await
                .map_err(RegistryError::directory("membership check"))?
            || self
                .directory
                .is_super_manager(user)
                .await
                .map_err(RegistryError::directory("super-manager check"))?
        {
            return Ok(true);
        }
        if known_admin.is_none() && self.is_admin(Some(user)).await? {
            return Ok(true);
        }
        tracing::info!(
            user,
            space = %space.display_name,
            "wallet disabled for user outside the permitted space"
        );
        Ok(false)
    }

    pub async fn is_admin(&self, requester: Option<&str>) -> Result<bool> {
        let Some(user) = requester else {
            return Ok(false);
        };
        self.directory
            .is_admin(user)
            .await
            .map_err(RegistryError::directory("admin check"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;

    fn directory() -> Arc<MemoryDirectory> {
        let d = Arc::new(MemoryDirectory::new());
        d.add_user("alice", "Alice")
            .add_user("bob", "Bob")
            .add_user("root", "Root")
            .add_user("carol", "Carol")
            .add_space("finance-team", "Finance Team")
            .add_member("finance-team", "alice")
            .add_manager("finance-team", "carol")
            .add_admin("root");
        d
    }

    fn restricted() -> NetworkSettings {
        NetworkSettings {
            access_permission: Some("finance-team".into()),
            ..NetworkSettings::default()
        }
    }

    #[tokio::test]
    async fn only_members_and_admins_pass_the_gate() -> eyre::Result<()> {
        let gate = AccessGate::new(directory());
        let s = restricted();
        assert!(gate.is_enabled_for(Some("alice"), &s).await?);
        assert!(!gate.is_enabled_for(Some("bob"), &s).await?);
        assert!(gate.is_enabled_for(Some("root"), &s).await?);
        assert!(gate.is_enabled_for(None, &s).await?);
        Ok(())
    }

    #[tokio::test]
    async fn known_admin_flag_is_trusted() -> eyre::Result<()> {
        let gate = AccessGate::new(directory());
        let s = restricted();
        assert!(gate.is_enabled_for_with_admin(Some("bob"), &s, true).await?);
        assert!(!gate.is_enabled_for_with_admin(Some("root"), &s, false).await?);
        assert!(gate.is_enabled_for_with_admin(Some("alice"), &s, false).await?);
        Ok(())
    }

    #[tokio::test]
    async fn unresolvable_permission_does_not_restrict() -> eyre::Result<()> {
        let gate = AccessGate::new(directory());
        let s = NetworkSettings {
            access_permission: Some("no-such-space".into()),
            ..NetworkSettings::default()
        };
        assert!(gate.is_enabled_for(Some("bob"), &s).await?);
        Ok(())
    }

    #[tokio::test]
    async fn space_authority_requires_a_manager() -> eyre::Result<()> {
        let dir = directory();
        let space = IdentityRef::space("finance-team")?;
        assert!(authorize(dir.as_ref(), &space, "carol").await.is_ok());
        assert!(matches!(
            authorize(dir.as_ref(), &space, "alice").await,
            Err(RegistryError::Forbidden(_))
        ));
        assert!(matches!(
            authorize(dir.as_ref(), &IdentityRef::space("ghost")?, "carol").await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            authorize(dir.as_ref(), &IdentityRef::user("alice")?, "bob").await,
            Err(RegistryError::Forbidden(_))
        ));
        Ok(())
    }
}
