//! Sign-in message construction.
//!
//! Every attempt gets a fresh nonce so a captured signature cannot be
//! replayed against a later attempt.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// The message a wallet is asked to sign during sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInMessage {
    pub app_name: String,
    pub address: String,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
}

impl SignInMessage {
    pub fn new(app_name: &str, address: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            address: address.to_string(),
            nonce: generate_nonce(),
            issued_at: Utc::now(),
        }
    }

    /// Text presented to the user in the wallet prompt.
    pub fn text(&self) -> String {
        format!(
            "Sign in to {app}\n\nAddress: {addr}\nNonce: {nonce}\nIssued At: {issued}",
            app = self.app_name,
            addr = self.address,
            nonce = self.nonce,
            issued = self.issued_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }
}

/// Random 128-bit nonce, hex-encoded.
pub fn generate_nonce() -> String {
    Uuid::new_v4().simple().to_string()
}
