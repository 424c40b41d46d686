//! External capabilities consumed by the core.
//!
//! Follows the crate's trait-driven layout: the wallet adapter, the
//! session-issuing authority, the chain client and the query cache are
//! implemented elsewhere and injected as `Arc<dyn ...>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::auth::types::SignatureKind;

// ── Wallet ───────────────────────────────────────────────────────

/// The account a wallet exposes after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    pub public_key: String,
}

/// Message the wallet is asked to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignMessageRequest {
    pub message: String,
    pub nonce: String,
}

/// What the wallet returns for a signed message. `full_message` is the exact
/// byte string the wallet signed, which may wrap `message` with a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub signature: String,
    pub full_message: String,
}

/// Opaque transaction payload produced by the chain client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPayload {
    pub function: String,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait WalletAdapter: Send + Sync {
    /// Connect to the named wallet. `Ok(None)` means the wallet connected
    /// but exposed no account.
    async fn connect(&self, wallet_id: &str) -> anyhow::Result<Option<Account>>;

    async fn disconnect(&self) -> anyhow::Result<()>;

    /// Whether the transport link to the wallet is currently up.
    async fn is_connected(&self) -> bool;

    async fn sign_message(&self, request: SignMessageRequest) -> anyhow::Result<SignedMessage>;

    async fn sign_and_submit_transaction(&self, payload: TxPayload) -> anyhow::Result<TxHash>;
}

// ── Verification ─────────────────────────────────────────────────

/// Payload handed to the authority that confers sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationPayload {
    pub message: String,
    pub signature: String,
    pub public_key: String,
    pub address: String,
    pub wallet_name: Option<String>,
    pub signature_kind: SignatureKind,
}

/// Credentials returned by a successful verification. When the authority
/// does not state an expiry, the configured session duration applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, payload: VerificationPayload) -> anyhow::Result<SessionGrant>;
}

// ── Chain reads ──────────────────────────────────────────────────

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Amounts (base units) the address would receive by withdrawing now.
    async fn preview_withdraw(&self, address: &str) -> anyhow::Result<Vec<u128>>;

    async fn get_deposit_tx_payload(&self, address: &str, amount: u128)
        -> anyhow::Result<TxPayload>;

    async fn get_withdraw_tx_payload(
        &self,
        address: &str,
        amount: u128,
    ) -> anyhow::Result<TxPayload>;

    /// Resolve once the transaction is committed; fail if it aborted.
    async fn wait_for_transaction(&self, hash: &TxHash) -> anyhow::Result<()>;
}

// ── Query cache ──────────────────────────────────────────────────

/// Which cached queries a refetch should touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefetchMode {
    /// Only queries with a mounted observer.
    #[default]
    Active,
    All,
}

#[async_trait]
pub trait QueryCache: Send + Sync {
    async fn refetch(&self, key: &str, mode: RefetchMode) -> anyhow::Result<()>;

    fn invalidate(&self, key: &str);
}
