//! Account details, wallet listing and fund requests, orchestrated over the registries.

use crate::{
    access::authorize,
    address::AddressRegistry,
    composer::SettingsComposer,
    contracts::{ContractDetail, ContractRegistry},
    directory::Directory,
    errors::{RegistryError, Result},
    identity::{AccountKind, Address, IdentityRef},
    notify::{emit_logged, NotificationInbox, NotificationInfo, Notifier, WalletEvent},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Owner parameter set on a fund request notification once the funds were sent.
pub const FUNDS_REQUEST_SENT: &str = "funds_request_sent";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetail {
    pub id: String,
    pub technical_id: String,
    #[serde(rename = "type")]
    pub kind: AccountKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    pub is_manager: bool,
    pub avatar_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundsRequest {
    /// Wallet the funds are requested from.
    pub address: String,
    #[serde(alias = "receipient")]
    pub recipient: String,
    #[serde(alias = "receipientType")]
    pub recipient_type: String,
    /// Decimal amount, as typed by the requester.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    /// Token contract; must be a registered default of the default network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Payload of the funds-requested event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundsRequestNotice {
    pub requester: Option<AccountDetail>,
    pub sender: AccountDetail,
    pub receiver: Option<AccountDetail>,
    pub request: FundsRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<ContractDetail>,
}

pub struct AccountService {
    directory: Arc<dyn Directory>,
    addresses: Arc<AddressRegistry>,
    contracts: Arc<ContractRegistry>,
    composer: Arc<SettingsComposer>,
    notifier: Arc<dyn Notifier>,
    inbox: Arc<dyn NotificationInbox>,
}

impl std::fmt::Debug for AccountService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountService").finish_non_exhaustive()
    }
}

impl AccountService {
    pub fn new(
        directory: Arc<dyn Directory>,
        addresses: Arc<AddressRegistry>,
        contracts: Arc<ContractRegistry>,
        composer: Arc<SettingsComposer>,
        notifier: Arc<dyn Notifier>,
        inbox: Arc<dyn NotificationInbox>,
    ) -> Self {
        Self {
            directory,
            addresses,
            contracts,
            composer,
            notifier,
            inbox,
        }
    }

    pub async fn user_details(&self, id: &str) -> Result<Option<AccountDetail>> {
        let id = IdentityRef::user(id)?;
        let Some(profile) = self
            .directory
            .user(id.id())
            .await
            .map_err(RegistryError::directory("user lookup"))?
        else {
            return Ok(None);
        };
        let avatar_url = profile
            .avatar_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| format!("/rest/v1/social/users/{}/avatar", id.id()));
        Ok(Some(AccountDetail {
            id: id.id().to_owned(),
            technical_id: profile.technical_id,
            kind: AccountKind::User,
            name: profile.full_name,
            address: None,
            is_manager: false,
            avatar_url,
        }))
    }

    /// `is_manager` tells whether `requester` may act for the space.
    pub async fn space_details(&self, id: &str, requester: Option<&str>) -> Result<Option<AccountDetail>> {
        let id = IdentityRef::space(id)?;
        let Some(space) = self
            .directory
            .space(id.id())
            .await
            .map_err(RegistryError::directory("space lookup"))?
        else {
            return Ok(None);
        };
        let is_manager = match requester {
            Some(user) => {
                self.directory
                    .is_manager(&space, user)
                    .await
                    .map_err(RegistryError::directory("manager check"))?
                    || self
                        .directory
                        .is_super_manager(user)
                        .await
                        .map_err(RegistryError::directory("super-manager check"))?
            }
            None => false,
        };
        let avatar_url = space
            .avatar_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| format!("/rest/v1/social/spaces/{}/avatar", id.id()));
        Ok(Some(AccountDetail {
            id: id.id().to_owned(),
            technical_id: space.technical_id,
            kind: AccountKind::Space,
            name: space.display_name,
            address: None,
            is_manager,
            avatar_url,
        }))
    }

    async fn details(&self, identity: &IdentityRef, requester: Option<&str>) -> Result<Option<AccountDetail>> {
        match identity {
            IdentityRef::User(id) => self.user_details(id).await,
            IdentityRef::Space(id) => self.space_details(id, requester).await,
        }
    }

    /// Details of the identity bound to `address`, with the address attached.
    pub async fn account_by_address(
        &self,
        address: &str,
        requester: Option<&str>,
    ) -> Result<Option<AccountDetail>> {
        let address = Address::parse(address)?;
        let Some(owner) = self.addresses.resolve(address.as_str()).await? else {
            return Ok(None);
        };
        let details = self.details(&owner, requester).await?;
        if details.is_none() {
            tracing::info!(identity = %owner, address = %address, "no profile for the identity bound to address");
        }
        Ok(details.map(|d| AccountDetail {
            address: Some(address),
            ..d
        }))
    }

    /// Every bound user wallet, then every bound space wallet. Identities without a profile are
    /// skipped.
    pub async fn list_wallets(&self, requester: Option<&str>) -> Result<Vec<AccountDetail>> {
        let mut out = Vec::new();
        for kind in [AccountKind::User, AccountKind::Space] {
            for (id, address) in self.addresses.list_bindings_by_type(kind).await? {
                let identity = IdentityRef::new(kind, id)?;
                if let Some(d) = self.details(&identity, requester).await? {
                    out.push(AccountDetail {
                        address: Some(address),
                        ..d
                    });
                }
            }
        }
        Ok(out)
    }

    /// Validate a fund request and hand it to the notifier.
    pub async fn request_funds(&self, request: &FundsRequest, requester: &str) -> Result<()> {
        let Some(sender) = self.account_by_address(&request.address, Some(requester)).await? else {
            tracing::warn!(address = %request.address, "bad request: fund request from an unknown wallet");
            return Err(RegistryError::invalid("invalid sender address"));
        };
        match sender.kind {
            AccountKind::User if sender.id != requester => {
                tracing::warn!(requester, sender = %sender.id, "bad request: fund request for another user's wallet");
                return Err(RegistryError::forbidden("invalid sender address"));
            }
            AccountKind::User => {}
            AccountKind::Space => {
                authorize(
                    self.directory.as_ref(),
                    &IdentityRef::space(sender.id.as_str())?,
                    requester,
                )
                .await?;
            }
        }

        let contract = match request.contract.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            None => None,
            Some(c) => {
                let network_id = self
                    .composer
                    .base_settings()
                    .await?
                    .settings
                    .default_network_id
                    .unwrap_or_default();
                let detail = self.contracts.get_detail(c, network_id).await?;
                if detail.is_none() {
                    return Err(RegistryError::invalid(
                        "invalid contract address: only default contracts are permitted",
                    ));
                }
                detail
            }
        };

        let receiver = match AccountKind::parse(&request.recipient_type) {
            Some(AccountKind::User) => self.user_details(&request.recipient).await?,
            Some(AccountKind::Space) => self.space_details(&request.recipient, None).await?,
            None => None,
        };
        if receiver.is_none() {
            tracing::warn!(
                recipient = %request.recipient,
                recipient_type = %request.recipient_type,
                "fund request recipient not found"
            );
        }

        let notice = FundsRequestNotice {
            requester: self.user_details(requester).await?,
            sender,
            receiver,
            request: request.clone(),
            contract,
        };
        emit_logged(
            self.notifier.as_ref(),
            &WalletEvent::FundsRequested(Box::new(notice)),
        )
        .await;
        Ok(())
    }

    async fn own_notification(&self, notification_id: &str, requester: &str) -> Result<NotificationInfo> {
        let info = self
            .inbox
            .get(notification_id)
            .await
            .map_err(RegistryError::store("read notification"))?
            .ok_or_else(|| {
                RegistryError::not_found(format!("notification {notification_id} not found"))
            })?;
        if info.to.as_deref() != Some(requester) {
            return Err(RegistryError::forbidden(format!(
                "notification {notification_id} is addressed to another user"
            )));
        }
        Ok(info)
    }

    pub async fn mark_fund_request_sent(&self, notification_id: &str, requester: &str) -> Result<()> {
        let mut info = self.own_notification(notification_id, requester).await?;
        info.owner_parameters
            .insert(FUNDS_REQUEST_SENT.to_owned(), "true".to_owned());
        self.inbox
            .update(&info)
            .await
            .map_err(RegistryError::store("update notification"))
    }

    pub async fn is_fund_request_sent(&self, notification_id: &str, requester: &str) -> Result<bool> {
        let info = self.own_notification(notification_id, requester).await?;
        Ok(info
            .owner_parameters
            .get(FUNDS_REQUEST_SENT)
            .is_some_and(|v| v.eq_ignore_ascii_case("true")))
    }
}
