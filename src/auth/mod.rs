//! Wallet-signature authentication.
//!
//! A user proves control of an account by signing a fresh challenge; the
//! verifying authority answers with a time-bounded session. The session is
//! persisted so a reload does not prompt for another signature, and is torn
//! down shortly before it lapses.
//!
//! - [`types`]: user, session and observable state
//! - [`message`]: challenge text and nonces
//! - [`store`]: persisted {session, user} record
//! - [`manager`]: the sign-in / sign-out state machine

pub mod error;
pub mod manager;
pub mod message;
pub mod store;
pub mod types;

pub use error::AuthError;
pub use manager::{ExpiredCallback, SessionManager};
pub use message::{generate_nonce, SignInMessage};
pub use store::{KeyValueStore, SessionStore, SqliteKeyValueStore, StorageError};
pub use types::{normalize_address, AuthState, AuthStatus, Session, SignatureKind, User};
