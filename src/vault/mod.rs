//! Session-gated vault actions.
//!
//! Every action requires an authenticated, unexpired session. Amounts are
//! converted to base units exactly before anything reaches the chain, and
//! each outcome is published as a [`VaultEvent`] for the refetch loop.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::amount::{format_units, parse_units, AmountError};
use crate::auth::{AuthError, SessionManager};
use crate::capability::{ChainReader, TxHash, WalletAdapter};
use crate::refetch::{VaultEvent, VaultOperation};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error("Amount must be greater than zero")]
    ZeroAmount,
    #[error("Requested {requested} exceeds withdrawable {available}")]
    InsufficientWithdrawable { requested: String, available: String },
    #[error("Chain request failed: {0}")]
    Chain(String),
    #[error("Wallet transaction failed: {0}")]
    Wallet(String),
    #[error("Transaction {hash} did not commit: {reason}")]
    Transaction { hash: TxHash, reason: String },
}

/// What the connected account could withdraw right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawPreview {
    /// Per-asset amounts in base units, as reported by the chain.
    pub amounts: Vec<u128>,
    pub total: u128,
    pub decimals: u8,
}

impl WithdrawPreview {
    pub fn total_display(&self) -> String {
        format_units(self.total, self.decimals)
    }
}

pub struct VaultClient {
    auth: SessionManager,
    wallet: Arc<dyn WalletAdapter>,
    chain: Arc<dyn ChainReader>,
    events: mpsc::Sender<VaultEvent>,
    decimals: u8,
}

impl VaultClient {
    pub fn new(
        auth: SessionManager,
        wallet: Arc<dyn WalletAdapter>,
        chain: Arc<dyn ChainReader>,
        events: mpsc::Sender<VaultEvent>,
        decimals: u8,
    ) -> Self {
        Self {
            auth,
            wallet,
            chain,
            events,
            decimals,
        }
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Deposit `amount` (display units) from the signed-in account.
    pub async fn deposit(&self, amount: &str) -> Result<TxHash, VaultError> {
        let user = self.auth.require_user()?;
        let base_units = self.parse_positive(amount)?;

        let result = self
            .submit(VaultOperation::Deposit, &user.address, base_units)
            .await;
        self.report(VaultOperation::Deposit, &user.address, &result)
            .await;
        result
    }

    /// Withdraw `amount` (display units), bounded by the current preview.
    pub async fn withdraw(&self, amount: &str) -> Result<TxHash, VaultError> {
        let user = self.auth.require_user()?;
        let base_units = self.parse_positive(amount)?;

        let result = self.withdraw_checked(&user.address, base_units).await;
        self.report(VaultOperation::Withdraw, &user.address, &result)
            .await;
        result
    }

    pub async fn preview_withdraw(&self) -> Result<WithdrawPreview, VaultError> {
        let user = self.auth.require_user()?;
        self.preview_for(&user.address).await
    }

    async fn withdraw_checked(&self, address: &str, base_units: u128) -> Result<TxHash, VaultError> {
        let preview = self.preview_for(address).await?;
        if base_units > preview.total {
            return Err(VaultError::InsufficientWithdrawable {
                requested: format_units(base_units, self.decimals),
                available: preview.total_display(),
            });
        }
        self.submit(VaultOperation::Withdraw, address, base_units)
            .await
    }

    async fn preview_for(&self, address: &str) -> Result<WithdrawPreview, VaultError> {
        let amounts = self
            .chain
            .preview_withdraw(address)
            .await
            .map_err(|e| VaultError::Chain(format!("{e:#}")))?;
        let total = amounts
            .iter()
            .try_fold(0u128, |acc, a| acc.checked_add(*a))
            .ok_or(AmountError::Overflow)?;
        Ok(WithdrawPreview {
            amounts,
            total,
            decimals: self.decimals,
        })
    }

    async fn submit(
        &self,
        op: VaultOperation,
        address: &str,
        base_units: u128,
    ) -> Result<TxHash, VaultError> {
        let payload = match op {
            VaultOperation::Deposit => {
                self.chain
                    .get_deposit_tx_payload(address, base_units)
                    .await
            }
            VaultOperation::Withdraw => {
                self.chain
                    .get_withdraw_tx_payload(address, base_units)
                    .await
            }
        }
        .map_err(|e| VaultError::Chain(format!("{e:#}")))?;

        let hash = self
            .wallet
            .sign_and_submit_transaction(payload)
            .await
            .map_err(|e| VaultError::Wallet(format!("{e:#}")))?;
        tracing::info!(%op, address = %address, hash = %hash, "Transaction submitted");

        self.chain
            .wait_for_transaction(&hash)
            .await
            .map_err(|e| VaultError::Transaction {
                hash: hash.clone(),
                reason: format!("{e:#}"),
            })?;
        Ok(hash)
    }

    fn parse_positive(&self, amount: &str) -> Result<u128, VaultError> {
        let base_units = parse_units(amount, self.decimals)?;
        if base_units == 0 {
            return Err(VaultError::ZeroAmount);
        }
        Ok(base_units)
    }

    async fn report(&self, op: VaultOperation, address: &str, result: &Result<TxHash, VaultError>) {
        let event = match result {
            Ok(hash) => VaultEvent::Succeeded {
                op,
                address: address.to_string(),
                hash: hash.clone(),
            },
            Err(e) => VaultEvent::Failed {
                op,
                address: address.to_string(),
                reason: e.to_string(),
            },
        };
        if self.events.send(event).await.is_err() {
            tracing::debug!(%op, "Vault event loop stopped, outcome not published");
        }
    }
}
