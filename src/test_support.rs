//! In-process fakes for the capability traits, shared by unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::auth::store::{KeyValueStore, StorageError};
use crate::auth::types::{Session, User};
use crate::capability::{
    Account, ChainReader, QueryCache, RefetchMode, SessionGrant, SessionVerifier,
    SignMessageRequest, SignedMessage, TxHash, TxPayload, VerificationPayload, WalletAdapter,
};

pub const ED25519_KEY: &str = "0xA1B2C3D4E5F60718293A4B5C6D7E8F90A1B2C3D4E5F60718293A4B5C6D7E8F90";
pub const ADDRESS: &str = "0xa11ce";

pub fn sample_user() -> User {
    User {
        address: ADDRESS.into(),
        public_key: ED25519_KEY.into(),
        wallet_name: None,
    }
}

/// Session for [`sample_user`] expiring `valid_for` from now.
pub fn sample_session(valid_for: ChronoDuration) -> Session {
    Session {
        access_token: "access-token".into(),
        refresh_token: Some("refresh-token".into()),
        expires_at: Utc::now() + valid_for,
        user: sample_user(),
    }
}

// ── Storage ─────────────────────────────────────────────────────

pub struct FailingKeyValueStore;

impl KeyValueStore for FailingKeyValueStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(std::io::Error::other("disk unavailable").into())
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(std::io::Error::other("disk unavailable").into())
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Err(std::io::Error::other("disk unavailable").into())
    }
}

// ── Wallet ──────────────────────────────────────────────────────

pub struct MockWallet {
    account: Mutex<Option<Account>>,
    connect_error: Mutex<Option<String>>,
    sign_error: Mutex<Option<String>>,
    submit_error: Mutex<Option<String>>,
    sign_gate: Mutex<Option<Arc<Notify>>>,
    connected: AtomicBool,
    disconnects: AtomicUsize,
    connects: Mutex<Vec<String>>,
    sign_requests: Mutex<Vec<SignMessageRequest>>,
    submitted: Mutex<Vec<TxPayload>>,
}

impl MockWallet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            account: Mutex::new(Some(Account {
                address: "0xA11CE".into(),
                public_key: ED25519_KEY.into(),
            })),
            connect_error: Mutex::new(None),
            sign_error: Mutex::new(None),
            submit_error: Mutex::new(None),
            sign_gate: Mutex::new(None),
            connected: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
            connects: Mutex::new(Vec::new()),
            sign_requests: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
        })
    }

    pub fn set_account(&self, account: Option<Account>) {
        *self.account.lock() = account;
    }

    pub fn fail_connect(&self, reason: &str) {
        *self.connect_error.lock() = Some(reason.to_string());
    }

    pub fn fail_sign(&self, reason: &str) {
        *self.sign_error.lock() = Some(reason.to_string());
    }

    pub fn allow_sign(&self) {
        *self.sign_error.lock() = None;
    }

    pub fn fail_submit(&self, reason: &str) {
        *self.submit_error.lock() = Some(reason.to_string());
    }

    /// Hold `sign_message` until the returned notify fires.
    pub fn gate_signing(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.sign_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn is_connected_now(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> Vec<String> {
        self.connects.lock().clone()
    }

    pub fn sign_requests(&self) -> Vec<SignMessageRequest> {
        self.sign_requests.lock().clone()
    }

    pub fn submitted(&self) -> Vec<TxPayload> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl WalletAdapter for MockWallet {
    async fn connect(&self, wallet_id: &str) -> Result<Option<Account>> {
        self.connects.lock().push(wallet_id.to_string());
        if let Some(reason) = self.connect_error.lock().clone() {
            return Err(anyhow!(reason));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(self.account.lock().clone())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.is_connected_now()
    }

    async fn sign_message(&self, request: SignMessageRequest) -> Result<SignedMessage> {
        self.sign_requests.lock().push(request.clone());
        let gate = self.sign_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(reason) = self.sign_error.lock().clone() {
            return Err(anyhow!(reason));
        }
        Ok(SignedMessage {
            signature: format!("sig-{}", request.nonce),
            full_message: format!(
                "APTOS\nmessage: {}\nnonce: {}",
                request.message, request.nonce
            ),
        })
    }

    async fn sign_and_submit_transaction(&self, payload: TxPayload) -> Result<TxHash> {
        if let Some(reason) = self.submit_error.lock().clone() {
            return Err(anyhow!(reason));
        }
        let mut submitted = self.submitted.lock();
        submitted.push(payload);
        Ok(TxHash(format!("0xtx{}", submitted.len())))
    }
}

// ── Verifier ────────────────────────────────────────────────────

pub struct MockVerifier {
    expires_in: Mutex<Option<ChronoDuration>>,
    rejection: Mutex<Option<String>>,
    payloads: Mutex<Vec<VerificationPayload>>,
}

impl MockVerifier {
    /// Grants a session; `expires_in` of `None` leaves expiry to the caller.
    pub fn granting(expires_in: Option<ChronoDuration>) -> Arc<Self> {
        Arc::new(Self {
            expires_in: Mutex::new(expires_in),
            rejection: Mutex::new(None),
            payloads: Mutex::new(Vec::new()),
        })
    }

    pub fn rejecting(reason: &str) -> Arc<Self> {
        let verifier = Self::granting(None);
        *verifier.rejection.lock() = Some(reason.to_string());
        verifier
    }

    pub fn set_expiry(&self, expires_in: Option<ChronoDuration>) {
        *self.expires_in.lock() = expires_in;
    }

    pub fn payloads(&self) -> Vec<VerificationPayload> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl SessionVerifier for MockVerifier {
    async fn verify(&self, payload: VerificationPayload) -> Result<SessionGrant> {
        self.payloads.lock().push(payload);
        if let Some(reason) = self.rejection.lock().clone() {
            return Err(anyhow!(reason));
        }
        Ok(SessionGrant {
            access_token: format!("access-{}", self.payloads.lock().len()),
            refresh_token: None,
            expires_at: self.expires_in.lock().map(|d| Utc::now() + d),
        })
    }
}

// ── Chain ───────────────────────────────────────────────────────

pub struct MockChain {
    withdrawable: Mutex<HashMap<String, Vec<u128>>>,
    aborted: AtomicBool,
    preview_error: Mutex<Option<String>>,
    payload_requests: Mutex<Vec<(String, String, u128)>>,
    awaited: Mutex<Vec<TxHash>>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            withdrawable: Mutex::new(HashMap::new()),
            aborted: AtomicBool::new(false),
            preview_error: Mutex::new(None),
            payload_requests: Mutex::new(Vec::new()),
            awaited: Mutex::new(Vec::new()),
        })
    }

    pub fn set_withdrawable(&self, address: &str, amounts: Vec<u128>) {
        self.withdrawable.lock().insert(address.to_string(), amounts);
    }

    /// Make every awaited transaction report an abort.
    pub fn abort_transactions(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn fail_preview(&self, reason: &str) {
        *self.preview_error.lock() = Some(reason.to_string());
    }

    pub fn payload_requests(&self) -> Vec<(String, String, u128)> {
        self.payload_requests.lock().clone()
    }

    pub fn awaited(&self) -> Vec<TxHash> {
        self.awaited.lock().clone()
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn preview_withdraw(&self, address: &str) -> Result<Vec<u128>> {
        if let Some(reason) = self.preview_error.lock().clone() {
            return Err(anyhow!(reason));
        }
        Ok(self
            .withdrawable
            .lock()
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_deposit_tx_payload(&self, address: &str, amount: u128) -> Result<TxPayload> {
        self.payload_requests
            .lock()
            .push(("deposit".into(), address.to_string(), amount));
        Ok(TxPayload {
            function: "vault::deposit".into(),
            arguments: vec![address.to_string(), amount.to_string()],
        })
    }

    async fn get_withdraw_tx_payload(&self, address: &str, amount: u128) -> Result<TxPayload> {
        self.payload_requests
            .lock()
            .push(("withdraw".into(), address.to_string(), amount));
        Ok(TxPayload {
            function: "vault::withdraw".into(),
            arguments: vec![address.to_string(), amount.to_string()],
        })
    }

    async fn wait_for_transaction(&self, hash: &TxHash) -> Result<()> {
        self.awaited.lock().push(hash.clone());
        if self.aborted.load(Ordering::SeqCst) {
            return Err(anyhow!("transaction {hash} aborted"));
        }
        Ok(())
    }
}

// ── Query cache ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MockCache {
    refetches: Mutex<Vec<String>>,
    invalidated: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl MockCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_refetches(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    pub fn refetches(&self) -> Vec<String> {
        self.refetches.lock().clone()
    }

    pub fn refetch_count(&self, key: &str) -> usize {
        self.refetches.lock().iter().filter(|k| *k == key).count()
    }

    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().clone()
    }
}

#[async_trait]
impl QueryCache for MockCache {
    async fn refetch(&self, key: &str, _mode: RefetchMode) -> Result<()> {
        self.refetches.lock().push(key.to_string());
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("network unreachable"));
        }
        Ok(())
    }

    fn invalidate(&self, key: &str) {
        self.invalidated.lock().push(key.to_string());
    }
}
