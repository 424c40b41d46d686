//! Vault operation outcomes, delivered to the coordinator over a channel.
//!
//! Operations publish what happened; only this loop decides what that means
//! for the cache.

use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

use super::coordinator::{QueryKey, RefetchCoordinator, RefetchOptions};
use crate::capability::TxHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultOperation {
    Deposit,
    Withdraw,
}

impl fmt::Display for VaultOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit => f.write_str("deposit"),
            Self::Withdraw => f.write_str("withdraw"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    /// The transaction committed on chain.
    Succeeded {
        op: VaultOperation,
        address: String,
        hash: TxHash,
    },
    /// The operation failed after it was authorized.
    Failed {
        op: VaultOperation,
        address: String,
        reason: String,
    },
}

impl VaultEvent {
    pub fn address(&self) -> &str {
        match self {
            Self::Succeeded { address, .. } | Self::Failed { address, .. } => address,
        }
    }
}

/// Apply one event: refresh the address's queries on success, drop their
/// stale timers on failure.
pub async fn handle(coordinator: &RefetchCoordinator, event: VaultEvent) {
    match &event {
        VaultEvent::Succeeded { op, address, hash } => {
            tracing::info!(%op, address = %address, hash = %hash, "Vault operation confirmed, refetching");
            for key in QueryKey::affected_by(address) {
                coordinator
                    .trigger_refetch(&key, RefetchOptions::default())
                    .await;
            }
        }
        VaultEvent::Failed { op, address, reason } => {
            tracing::warn!(%op, address = %address, "Vault operation failed: {reason}");
            for key in QueryKey::affected_by(address) {
                coordinator.cancel(&key);
            }
        }
    }
}

/// Consume events until every sender is dropped.
pub async fn run(coordinator: RefetchCoordinator, mut rx: mpsc::Receiver<VaultEvent>) {
    while let Some(event) = rx.recv().await {
        handle(&coordinator, event).await;
    }
    tracing::debug!("Vault event channel closed");
}
