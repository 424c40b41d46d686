//! Configuration loading.
//!
//! Every section is optional in the TOML file; missing fields fall back to
//! the defaults in [`schema`]. A handful of environment variables override
//! the file so that the CLI can be pointed at another store without editing
//! config.

pub mod schema;

pub use schema::{Config, LoggingConfig, RefetchConfig, SessionConfig, StorageConfig, VaultConfig};

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

/// Largest supported fixed-point scale (10^18 still fits comfortably in u128).
pub const MAX_DECIMALS: u8 = 18;

impl Config {
    /// Parse the config file at `path`. A missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` (or the default location) if it exists, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if path.exists() {
            Self::load(&path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Apply `MONEYFI_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = get("MONEYFI_STORAGE_PATH").filter(|v| !v.trim().is_empty()) {
            self.storage.path = Some(PathBuf::from(path));
        }
        if let Some(level) = get("MONEYFI_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.logging.level = level;
        }
        if let Some(raw) = get("MONEYFI_AUTO_RECONNECT") {
            self.session.auto_reconnect = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => bail!("MONEYFI_AUTO_RECONNECT must be a boolean, got '{other}'"),
            };
        }
        Ok(())
    }

    /// Reject configurations the session machine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.session;
        if s.duration_secs == 0 {
            bail!("session.duration_secs must be greater than zero");
        }
        if s.check_interval_secs == 0 {
            bail!("session.check_interval_secs must be greater than zero");
        }
        if s.expiry_buffer_secs >= s.duration_secs {
            bail!(
                "session.expiry_buffer_secs ({}) must be smaller than session.duration_secs ({})",
                s.expiry_buffer_secs,
                s.duration_secs
            );
        }
        if s.check_interval_secs > s.expiry_buffer_secs {
            bail!(
                "session.check_interval_secs ({}) must not exceed session.expiry_buffer_secs ({}), \
                 or a session can lapse between checks",
                s.check_interval_secs,
                s.expiry_buffer_secs
            );
        }
        if s.app_name.trim().is_empty() {
            bail!("session.app_name cannot be empty");
        }

        let st = &self.storage;
        if st.session_key.trim().is_empty() || st.user_key.trim().is_empty() {
            bail!("storage keys cannot be empty");
        }
        if st.session_key == st.user_key {
            bail!("storage.session_key and storage.user_key must differ");
        }

        if self.refetch.delay_ms == 0 {
            bail!("refetch.delay_ms must be greater than zero");
        }
        if self.vault.decimals > MAX_DECIMALS {
            bail!(
                "vault.decimals must be at most {MAX_DECIMALS}, got {}",
                self.vault.decimals
            );
        }
        Ok(())
    }

    /// Resolved SQLite path for the session store.
    pub fn storage_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .or_else(|| project_dirs().map(|d| d.data_dir().join("session.db")))
            .unwrap_or_else(|| PathBuf::from(".moneyfi").join("session.db"))
    }
}

/// JSON schema of the full configuration, for editor tooling.
pub fn config_schema() -> Result<String> {
    let schema = schemars::schema_for!(Config);
    serde_json::to_string_pretty(&schema).context("Failed to serialize config schema")
}

/// `<config_dir>/config.toml` for this application.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join("config.toml"))
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("fi", "MoneyFi", "moneyfi-session")
}
