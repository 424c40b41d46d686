//! MoneyFi session core.
//!
//! The client-side state that sits between a browser wallet, the vault's
//! chain queries, and on-chain finality:
//!
//! - [`auth`]: wallet sign-in, persisted sessions, expiry enforcement
//! - [`refetch`]: refresh-now plus one debounced delayed refresh after writes
//! - [`vault`]: session-gated deposit / withdraw orchestration
//! - [`amount`]: exact base-unit arithmetic for token figures
//!
//! Wallet, verification, chain and query-cache access are consumed through
//! the async traits in [`capability`]; nothing here signs or builds
//! transactions itself.

pub mod amount;
pub mod app;
pub mod auth;
pub mod capability;
pub mod config;
pub mod logging;
pub mod refetch;
pub mod vault;

#[cfg(test)]
pub(crate) mod test_support;

pub use amount::{format_units, parse_units, AmountError, TokenAmount};
pub use app::{AppContext, Capabilities};
pub use auth::{AuthError, AuthState, AuthStatus, Session, SessionManager, SessionStore, User};
pub use config::Config;
pub use refetch::{QueryKey, RefetchCoordinator, RefetchOptions, VaultEvent};
pub use vault::{VaultClient, VaultError};
