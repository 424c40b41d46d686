use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ── Session ─────────────────────────────────────────────────────

/// Session lifetime and expiry enforcement.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Application string embedded in every sign-in message.
    pub app_name: String,
    /// Lifetime of a freshly issued or refreshed session, in seconds.
    pub duration_secs: u64,
    /// Sessions this close to expiry are force-signed-out, in seconds.
    pub expiry_buffer_secs: u64,
    /// Period of the background expiry check, in seconds.
    pub check_interval_secs: u64,
    /// Silently re-establish the wallet transport for a restored session.
    pub auto_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_name: "MoneyFi".into(),
            duration_secs: 24 * 60 * 60,
            expiry_buffer_secs: 5 * 60,
            check_interval_secs: 60,
            auto_reconnect: true,
        }
    }
}

impl SessionConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn expiry_buffer(&self) -> Duration {
        Duration::from_secs(self.expiry_buffer_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

// ── Storage ─────────────────────────────────────────────────────

/// Where and under which keys the session record is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub session_key: String,
    pub user_key: String,
    /// SQLite file backing the key/value namespace. Defaults to the
    /// platform data directory.
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            session_key: "moneyfi_auth_session".into(),
            user_key: "moneyfi_auth_user".into(),
            path: None,
        }
    }
}

// ── Refetch ─────────────────────────────────────────────────────

/// Timing of the post-write confirmation refresh.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct RefetchConfig {
    /// Delay before the follow-up refresh, in milliseconds.
    pub delay_ms: u64,
    /// Extra time the confirmation window stays open, in milliseconds.
    pub grace_ms: u64,
}

impl Default for RefetchConfig {
    fn default() -> Self {
        Self {
            delay_ms: 4_000,
            grace_ms: 1_000,
        }
    }
}

impl RefetchConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Total length of the confirmation window (delay + grace).
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.delay_ms.saturating_add(self.grace_ms))
    }
}

// ── Vault ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct VaultConfig {
    /// Fixed-point decimals of the deposited asset.
    pub decimals: u8,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self { decimals: 6 }
    }
}

// ── Logging ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Root ────────────────────────────────────────────────────────

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub refetch: RefetchConfig,
    pub vault: VaultConfig,
    pub logging: LoggingConfig,
}
