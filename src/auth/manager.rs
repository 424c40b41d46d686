//! Session state machine.
//!
//! ```text
//! Unauthenticated --sign_in--> Connecting --account--> Loading --verified--> Authenticated
//!        ^                          |                     |                      |
//!        +------- failure ----------+---------------------+                      |
//!        +------- sign_out / expiry within buffer ------------------------------+
//! ```
//!
//! Transitions happen under a single lifecycle lock that is never held
//! across an await. Each entry into `Authenticated` and each sign-out bumps
//! an epoch; background work (the expiry watch, an in-flight sign-in)
//! captures the epoch it was started under and drops its result if the epoch
//! has moved on.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::error::AuthError;
use super::message::SignInMessage;
use super::store::SessionStore;
use super::types::{normalize_address, normalize_hex, AuthState, AuthStatus, Session, SignatureKind, User};
use crate::capability::{
    Account, SessionGrant, SessionVerifier, SignMessageRequest, SignedMessage, VerificationPayload,
    WalletAdapter,
};
use crate::config::SessionConfig;

/// Invoked once, before state is cleared, when a session is force-expired.
pub type ExpiredCallback = Arc<dyn Fn(&Session) + Send + Sync>;

struct ExpiryWatch {
    epoch: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Lifecycle {
    epoch: u64,
    expiry_watch: Option<ExpiryWatch>,
}

struct Inner {
    wallet: Arc<dyn WalletAdapter>,
    verifier: Arc<dyn SessionVerifier>,
    store: SessionStore,
    config: SessionConfig,
    state: watch::Sender<AuthState>,
    lifecycle: Mutex<Lifecycle>,
    on_expired: Mutex<Option<ExpiredCallback>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(watch) = self.lifecycle.get_mut().expiry_watch.take() {
            watch.handle.abort();
        }
    }
}

/// Owns authentication state for one app instance.
///
/// Cheap to clone; clones share the same state. Construct one per app (or
/// per test) and pass it where it is needed.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

enum SignInStart {
    Started(u64),
    InProgress,
    AlreadyAuthenticated(User),
    /// Authenticated on paper, but the session has run out.
    Lapsed,
}

impl SessionManager {
    pub fn new(
        wallet: Arc<dyn WalletAdapter>,
        verifier: Arc<dyn SessionVerifier>,
        store: SessionStore,
        config: SessionConfig,
    ) -> Self {
        let (state, _rx) = watch::channel(AuthState::default());
        Self {
            inner: Arc::new(Inner {
                wallet,
                verifier,
                store,
                config,
                state,
                lifecycle: Mutex::new(Lifecycle::default()),
                on_expired: Mutex::new(None),
            }),
        }
    }

    /// Register the forced-expiry notification, replacing any previous one.
    pub fn on_session_expired(&self, callback: impl Fn(&Session) + Send + Sync + 'static) {
        *self.inner.on_expired.lock() = Some(Arc::new(callback));
    }

    // ── Reads ────────────────────────────────────────────────────

    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    pub fn current_user(&self) -> Option<User> {
        self.require_user().ok()
    }

    /// The signed-in user, if the session is authenticated and unexpired.
    /// Gate for every operation that needs an account.
    pub fn require_user(&self) -> Result<User, AuthError> {
        let state = self.state();
        match state.session {
            Some(session) if state.status == AuthStatus::Authenticated && session.is_valid() => {
                Ok(session.user)
            }
            _ => Err(AuthError::NoActiveSession),
        }
    }

    /// Whether a background expiry check is currently scheduled.
    pub fn has_expiry_watch(&self) -> bool {
        self.inner.lifecycle.lock().expiry_watch.is_some()
    }

    // ── Startup ─────────────────────────────────────────────────

    /// Restore a persisted session, if any, without asking for a signature.
    pub async fn init(&self) -> AuthStatus {
        if self.state().status != AuthStatus::Unauthenticated {
            return self.state().status;
        }

        match self.inner.store.load() {
            Some(session) => {
                let restored = {
                    let mut lc = self.inner.lifecycle.lock();
                    if self.inner.state.borrow().status == AuthStatus::Unauthenticated {
                        lc.epoch += 1;
                        let epoch = lc.epoch;
                        tracing::info!(
                            address = %session.user.address,
                            expires_at = %session.expires_at,
                            "Restored persisted session"
                        );
                        self.enter_authenticated(&mut lc, epoch, session);
                        true
                    } else {
                        false
                    }
                };
                if restored {
                    self.reconcile_wallet().await;
                }
            }
            None => tracing::debug!("No persisted session to restore"),
        }

        self.state().status
    }

    // ── Sign-in ─────────────────────────────────────────────────

    /// Connect `wallet_id`, sign a fresh challenge, and exchange it for a
    /// session. Any failure rolls back to `Unauthenticated` with the error
    /// message recorded in state.
    pub async fn sign_in(&self, wallet_id: &str) -> Result<User, AuthError> {
        let mut start = self.begin_sign_in();
        if matches!(start, SignInStart::Lapsed) {
            self.check_expiry().await;
            start = self.begin_sign_in();
        }
        let attempt = match start {
            SignInStart::Started(epoch) => epoch,
            SignInStart::InProgress => return Err(AuthError::SignInInProgress),
            SignInStart::AlreadyAuthenticated(user) => return Ok(user),
            SignInStart::Lapsed => return Err(AuthError::NoActiveSession),
        };

        tracing::info!(wallet = wallet_id, "Sign-in started");

        let mut connected = false;
        let result = self.attempt_sign_in(wallet_id, attempt, &mut connected).await;
        let superseded = self.inner.lifecycle.lock().epoch != attempt;

        match result {
            Ok(user) => {
                tracing::info!(address = %user.address, wallet = wallet_id, "Signed in");
                Ok(user)
            }
            Err(AuthError::SignInCancelled) => {
                tracing::info!(wallet = wallet_id, "Sign-in superseded by sign-out");
                self.release_superseded(connected).await;
                Err(AuthError::SignInCancelled)
            }
            Err(err) if superseded => {
                tracing::info!(wallet = wallet_id, "Superseded sign-in failed: {err}");
                self.release_superseded(connected).await;
                Err(err)
            }
            Err(err) => {
                tracing::warn!(wallet = wallet_id, "Sign-in failed: {err}");
                if connected {
                    self.disconnect_wallet().await;
                }
                let mut lc = self.inner.lifecycle.lock();
                if lc.epoch == attempt {
                    lc.epoch += 1;
                    self.inner.state.send_replace(AuthState {
                        error: Some(err.to_string()),
                        ..AuthState::default()
                    });
                }
                Err(err)
            }
        }
    }

    /// Disconnect a superseded attempt's wallet unless a newer attempt or
    /// session owns the transport now.
    async fn release_superseded(&self, connected: bool) {
        let state = self.state();
        if connected && !state.is_signing_in() && !state.is_authenticated() {
            self.disconnect_wallet().await;
        }
    }

    fn begin_sign_in(&self) -> SignInStart {
        let lc = self.inner.lifecycle.lock();
        let mut start = SignInStart::Started(lc.epoch);
        self.inner.state.send_if_modified(|s| match s.status {
            AuthStatus::Connecting | AuthStatus::Loading => {
                start = SignInStart::InProgress;
                false
            }
            AuthStatus::Authenticated => {
                start = match &s.session {
                    Some(session) if session.is_valid() => {
                        SignInStart::AlreadyAuthenticated(session.user.clone())
                    }
                    _ => SignInStart::Lapsed,
                };
                false
            }
            AuthStatus::Unauthenticated => {
                *s = AuthState {
                    status: AuthStatus::Connecting,
                    ..AuthState::default()
                };
                true
            }
        });
        start
    }

    async fn attempt_sign_in(
        &self,
        wallet_id: &str,
        attempt: u64,
        connected: &mut bool,
    ) -> Result<User, AuthError> {
        let cfg = &self.inner.config;

        let account = self
            .inner
            .wallet
            .connect(wallet_id)
            .await
            .map_err(|e| AuthError::WalletConnectionFailed(AuthError::describe(&e)))?;
        *connected = true;
        let account = account.ok_or(AuthError::NoAccountAvailable)?;
        let address = normalize_address(&account.address);

        self.advance(attempt, AuthStatus::Loading)?;

        let challenge = SignInMessage::new(&cfg.app_name, &address);
        tracing::debug!(address = %address, nonce = %challenge.nonce, "Requesting signature");
        let signed = self
            .inner
            .wallet
            .sign_message(SignMessageRequest {
                message: challenge.text(),
                nonce: challenge.nonce.clone(),
            })
            .await
            .map_err(|e| AuthError::SignatureRejected(AuthError::describe(&e)))?;
        self.ensure_current(attempt)?;

        let payload = verification_payload(&account, &address, wallet_id, signed);
        let grant = self
            .inner
            .verifier
            .verify(payload)
            .await
            .map_err(|e| AuthError::VerificationFailed(AuthError::describe(&e)))?;

        let user = User {
            address,
            public_key: account.public_key.clone(),
            wallet_name: Some(wallet_id.to_string()),
        };
        let session = build_session(grant, user.clone(), cfg.duration(), Utc::now())?;

        let mut lc = self.inner.lifecycle.lock();
        if lc.epoch != attempt {
            return Err(AuthError::SignInCancelled);
        }
        lc.epoch += 1;
        let epoch = lc.epoch;
        if let Err(e) = self.inner.store.save(&session) {
            tracing::warn!(address = %user.address, "Failed to persist session: {e}");
        }
        self.enter_authenticated(&mut lc, epoch, session);
        Ok(user)
    }

    /// Move an in-flight attempt to `status`, unless it has been superseded.
    fn advance(&self, attempt: u64, status: AuthStatus) -> Result<(), AuthError> {
        let lc = self.inner.lifecycle.lock();
        if lc.epoch != attempt {
            return Err(AuthError::SignInCancelled);
        }
        self.inner.state.send_modify(|s| s.status = status);
        Ok(())
    }

    fn ensure_current(&self, attempt: u64) -> Result<(), AuthError> {
        if self.inner.lifecycle.lock().epoch != attempt {
            return Err(AuthError::SignInCancelled);
        }
        Ok(())
    }

    // ── Sign-out ────────────────────────────────────────────────

    /// Clear the session, stop the expiry watch and disconnect the wallet.
    /// Safe to call in any state, any number of times.
    pub async fn sign_out(&self) {
        let previous = {
            let mut lc = self.inner.lifecycle.lock();
            lc.epoch += 1;
            if let Some(watch) = lc.expiry_watch.take() {
                watch.handle.abort();
            }
            self.inner.store.clear();
            self.inner.state.send_replace(AuthState::default())
        };

        self.disconnect_wallet().await;

        if let Some(user) = previous.user {
            tracing::info!(address = %user.address, "Signed out");
        }
    }

    /// Extend the current session by the configured duration and re-persist.
    pub fn refresh_session(&self) -> Result<Session, AuthError> {
        let _lc = self.inner.lifecycle.lock();
        let state = self.state();
        let now = Utc::now();
        let current = match state.session {
            Some(s) if state.status == AuthStatus::Authenticated && s.is_valid_at(now) => s,
            _ => return Err(AuthError::NoActiveSession),
        };

        let mut session = current;
        session.expires_at = session
            .expires_at
            .max(expiry_after(now, self.inner.config.duration()));
        if let Err(e) = self.inner.store.save(&session) {
            tracing::warn!(address = %session.user.address, "Failed to persist refreshed session: {e}");
        }
        self.inner
            .state
            .send_replace(AuthState::authenticated(session.clone()));
        tracing::debug!(expires_at = %session.expires_at, "Session refreshed");
        Ok(session)
    }

    pub fn clear_error(&self) {
        self.inner.state.send_if_modified(|s| s.error.take().is_some());
    }

    // ── Wallet transport ────────────────────────────────────────

    /// Re-establish the wallet transport for an authenticated session whose
    /// wallet reports disconnected. Never prompts for a signature. If the
    /// wallet comes back with a different account the session is ended.
    pub async fn reconcile_wallet(&self) {
        if !self.inner.config.auto_reconnect {
            return;
        }
        let Ok(user) = self.require_user() else {
            return;
        };
        if self.inner.wallet.is_connected().await {
            return;
        }
        let Some(wallet_id) = user.wallet_name.clone() else {
            tracing::debug!(address = %user.address, "No remembered wallet to reconnect");
            return;
        };

        match self.inner.wallet.connect(&wallet_id).await {
            Ok(Some(account)) if normalize_address(&account.address) == user.address => {
                tracing::info!(wallet = %wallet_id, "Wallet transport re-established");
            }
            Ok(Some(account)) => {
                tracing::warn!(
                    expected = %user.address,
                    actual = %normalize_address(&account.address),
                    "Wallet reconnected with a different account, signing out"
                );
                self.sign_out().await;
            }
            Ok(None) => tracing::warn!(wallet = %wallet_id, "Wallet reconnected without an account"),
            Err(e) => tracing::warn!(wallet = %wallet_id, "Silent wallet reconnection failed: {e:#}"),
        }
    }

    async fn disconnect_wallet(&self) {
        if let Err(e) = self.inner.wallet.disconnect().await {
            tracing::warn!("Wallet disconnect failed: {e:#}");
        }
    }

    // ── Expiry ──────────────────────────────────────────────────

    /// Stop background work without changing auth state (app teardown).
    pub fn shutdown(&self) {
        let mut lc = self.inner.lifecycle.lock();
        lc.epoch += 1;
        if let Some(watch) = lc.expiry_watch.take() {
            watch.handle.abort();
        }
    }

    /// Run the expiry check now instead of waiting for the next tick.
    /// Returns `true` if the session was force-expired.
    pub async fn check_expiry(&self) -> bool {
        let epoch = self.inner.lifecycle.lock().epoch;
        matches!(self.expire_if_due(epoch).await, ExpiryCheck::Expired)
    }

    fn enter_authenticated(&self, lc: &mut Lifecycle, epoch: u64, session: Session) {
        self.inner
            .state
            .send_replace(AuthState::authenticated(session));
        if let Some(old) = lc.expiry_watch.take() {
            old.handle.abort();
        }
        lc.expiry_watch = Some(ExpiryWatch {
            epoch,
            handle: spawn_expiry_watch(Arc::downgrade(&self.inner), epoch, self.inner.config.check_interval()),
        });
    }

    async fn expire_if_due(&self, epoch: u64) -> ExpiryCheck {
        let session = {
            let mut lc = self.inner.lifecycle.lock();
            if lc.epoch != epoch {
                return ExpiryCheck::Stale;
            }
            let state = self.state();
            let session = match state.session {
                Some(s) if state.status == AuthStatus::Authenticated => s,
                _ => return ExpiryCheck::Stale,
            };
            if !session.expires_within(self.inner.config.expiry_buffer(), Utc::now()) {
                return ExpiryCheck::Valid;
            }
            // Detach rather than abort: this may be the watch task itself.
            if lc.expiry_watch.as_ref().is_some_and(|w| w.epoch == epoch) {
                lc.expiry_watch = None;
            }
            lc.epoch += 1;
            (session, lc.epoch)
        };
        let (session, expired_epoch) = session;

        tracing::warn!(
            address = %session.user.address,
            expires_at = %session.expires_at,
            "Session expiring, signing out"
        );

        let callback = self.inner.on_expired.lock().clone();
        if let Some(callback) = callback {
            callback(&session);
        }

        let torn_down = {
            let lc = self.inner.lifecycle.lock();
            // A sign-out or a newer sign-in during the callback owns state now.
            if lc.epoch == expired_epoch {
                self.inner.store.clear();
                self.inner.state.send_replace(AuthState::default());
                true
            } else {
                false
            }
        };
        if torn_down {
            self.disconnect_wallet().await;
        }
        ExpiryCheck::Expired
    }
}

enum ExpiryCheck {
    Valid,
    Expired,
    /// The session this check was scheduled for no longer exists.
    Stale,
}

fn spawn_expiry_watch(inner: Weak<Inner>, epoch: u64, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let manager = SessionManager { inner };
            match manager.expire_if_due(epoch).await {
                ExpiryCheck::Valid => {}
                ExpiryCheck::Expired | ExpiryCheck::Stale => break,
            }
        }
    })
}

/// Shape the verification payload according to how the account signs.
fn verification_payload(
    account: &Account,
    address: &str,
    wallet_id: &str,
    signed: SignedMessage,
) -> VerificationPayload {
    let kind = SignatureKind::probe(&account.public_key);
    let public_key = match kind {
        SignatureKind::Ed25519 => normalize_hex(&account.public_key),
        SignatureKind::Keyless => account.public_key.trim().to_string(),
    };
    VerificationPayload {
        message: signed.full_message,
        signature: signed.signature,
        public_key,
        address: address.to_string(),
        wallet_name: Some(wallet_id.to_string()),
        signature_kind: kind,
    }
}

fn build_session(
    grant: SessionGrant,
    user: User,
    duration: Duration,
    now: DateTime<Utc>,
) -> Result<Session, AuthError> {
    let expires_at = grant.expires_at.unwrap_or_else(|| expiry_after(now, duration));
    if expires_at <= now {
        return Err(AuthError::VerificationFailed(
            "issued session is already expired".into(),
        ));
    }
    Ok(Session {
        access_token: grant.access_token,
        refresh_token: grant.refresh_token,
        expires_at,
        user,
    })
}

fn expiry_after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
