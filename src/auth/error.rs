use thiserror::Error;

/// Failures surfaced by the session state machine. The `Display` text is
/// what ends up in `AuthState.error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Failed to connect wallet: {0}")]
    WalletConnectionFailed(String),
    #[error("No account available from wallet")]
    NoAccountAvailable,
    #[error("Signature rejected: {0}")]
    SignatureRejected(String),
    #[error("Verification failed: {0}")]
    VerificationFailed(String),
    #[error("No active session")]
    NoActiveSession,
    #[error("A sign-in attempt is already in progress")]
    SignInInProgress,
    #[error("Sign-in was cancelled")]
    SignInCancelled,
}

impl AuthError {
    /// Flatten a capability error into a single line, keeping the causes.
    pub(crate) fn describe(err: &anyhow::Error) -> String {
        format!("{err:#}")
    }
}
