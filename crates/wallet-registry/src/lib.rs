//! Wallet identity and contract registry.
//!
//! Binds wallet addresses to platform identities (users and spaces), keeps per-network default
//! contract sets and per-address transaction lists, hands out one-time security phrases, and
//! composes the access-filtered wallet settings each requester sees. Persistence, the identity
//! directory and notification delivery are collaborators supplied by the host platform through
//! the traits in [`store`], [`directory`] and [`notify`].

pub mod access;
pub mod accounts;
pub mod address;
pub mod cache;
pub mod composer;
pub mod config;
pub mod contracts;
pub mod directory;
pub mod doctor;
pub mod errors;
pub mod fsutil;
pub mod identity;
pub mod ledger;
pub mod locks;
pub mod notify;
pub mod paths;
pub mod phrase;
pub mod registry;
pub mod settings;
pub mod store;

pub use errors::{ApiError, RegistryError, Result};
pub use identity::{AccountKind, Address, IdentityRef};
pub use registry::{Collaborators, WalletRegistry};
