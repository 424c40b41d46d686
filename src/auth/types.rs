use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Identity ────────────────────────────────────────────────────

/// Wallet-bound identity. Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Account address, always `0x`-prefixed.
    pub address: String,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_name: Option<String>,
}

/// Time-bounded proof of authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

impl Session {
    /// A session is valid only while `now < expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// True once `now` is within `buffer` of expiry (or past it).
    pub fn expires_within(&self, buffer: Duration, now: DateTime<Utc>) -> bool {
        let buffer = ChronoDuration::from_std(buffer).unwrap_or(ChronoDuration::MAX);
        match now.checked_add_signed(buffer) {
            Some(deadline) => deadline >= self.expires_at,
            None => true,
        }
    }

    /// Time left before expiry, zero if already expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or_default()
    }
}

/// Canonical `0x`-prefixed, lower-case form of an account address.
pub fn normalize_address(raw: &str) -> String {
    normalize_hex(raw)
}

/// `0x`-prefixed, lower-case form of a hex string (address or key).
pub fn normalize_hex(raw: &str) -> String {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    format!("0x{}", body.to_ascii_lowercase())
}

// ── Signature kind ──────────────────────────────────────────────

/// How the connected account signs, which decides the shape of the
/// verification payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    /// Plain 32-byte Ed25519 key.
    Ed25519,
    /// OIDC-backed keyless account; the public key is an opaque encoding.
    Keyless,
}

impl SignatureKind {
    /// Probe a wallet-reported public key.
    pub fn probe(public_key: &str) -> Self {
        let body = public_key
            .trim()
            .strip_prefix("0x")
            .unwrap_or(public_key.trim());
        if body.len() == 64 && body.bytes().all(|b| b.is_ascii_hexdigit()) {
            Self::Ed25519
        } else {
            Self::Keyless
        }
    }
}

// ── Auth state ──────────────────────────────────────────────────

/// Phase of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    #[default]
    Unauthenticated,
    /// Waiting for the wallet to connect.
    Connecting,
    /// Wallet connected; signing and verifying.
    Loading,
    Authenticated,
}

/// Snapshot of authentication state as seen by the UI.
///
/// `user` and `session` are populated only in `Authenticated`. Serializes
/// with `isAuthenticated` / `isConnecting` / `isLoading` flags alongside
/// `status` for UI consumers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthState {
    pub status: AuthStatus,
    pub user: Option<User>,
    pub session: Option<Session>,
    pub error: Option<String>,
}

impl Serialize for AuthState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire<'a> {
            status: AuthStatus,
            is_authenticated: bool,
            is_connecting: bool,
            is_loading: bool,
            user: &'a Option<User>,
            session: &'a Option<Session>,
            error: &'a Option<String>,
        }

        Wire {
            status: self.status,
            is_authenticated: self.is_authenticated(),
            is_connecting: self.is_connecting(),
            is_loading: self.is_loading(),
            user: &self.user,
            session: &self.session,
            error: &self.error,
        }
        .serialize(serializer)
    }
}

impl AuthState {
    pub fn authenticated(session: Session) -> Self {
        Self {
            status: AuthStatus::Authenticated,
            user: Some(session.user.clone()),
            session: Some(session),
            error: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == AuthStatus::Authenticated
    }

    pub fn is_connecting(&self) -> bool {
        self.status == AuthStatus::Connecting
    }

    pub fn is_loading(&self) -> bool {
        self.status == AuthStatus::Loading
    }

    /// A sign-in attempt is between its first wallet call and verification.
    pub fn is_signing_in(&self) -> bool {
        matches!(self.status, AuthStatus::Connecting | AuthStatus::Loading)
    }
}
