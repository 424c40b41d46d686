//! Wiring for one app instance: store, session manager, refetch
//! coordinator, vault-event loop and vault client.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::{AuthStatus, KeyValueStore, SessionManager, SessionStore, SqliteKeyValueStore};
use crate::capability::{ChainReader, QueryCache, SessionVerifier, WalletAdapter};
use crate::config::Config;
use crate::refetch::{events, RefetchCoordinator, VaultEvent};
use crate::vault::VaultClient;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// The external collaborators the core is built on.
#[derive(Clone)]
pub struct Capabilities {
    pub wallet: Arc<dyn WalletAdapter>,
    pub verifier: Arc<dyn SessionVerifier>,
    pub chain: Arc<dyn ChainReader>,
    pub cache: Arc<dyn QueryCache>,
}

pub struct AppContext {
    config: Config,
    auth: SessionManager,
    refetch: RefetchCoordinator,
    vault: VaultClient,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl AppContext {
    /// Open the configured on-disk store and build the core around it.
    /// Must be called from within a Tokio runtime.
    pub fn start(config: Config, caps: Capabilities) -> Result<Self> {
        let path = config.storage_path();
        let kv = SqliteKeyValueStore::open(&path)
            .with_context(|| format!("Failed to open session store at {}", path.display()))?;
        Ok(Self::with_store(config, caps, Arc::new(kv)))
    }

    pub fn with_store(config: Config, caps: Capabilities, kv: Arc<dyn KeyValueStore>) -> Self {
        let store = SessionStore::new(kv, &config.storage);
        let auth = SessionManager::new(
            caps.wallet.clone(),
            caps.verifier,
            store,
            config.session.clone(),
        );
        let refetch = RefetchCoordinator::new(caps.cache, &config.refetch);

        let (tx, rx) = mpsc::channel::<VaultEvent>(EVENT_CHANNEL_CAPACITY);
        let event_loop = tokio::spawn(events::run(refetch.clone(), rx));
        let vault = VaultClient::new(
            auth.clone(),
            caps.wallet,
            caps.chain,
            tx,
            config.vault.decimals,
        );

        Self {
            config,
            auth,
            refetch,
            vault,
            event_loop: Mutex::new(Some(event_loop)),
        }
    }

    /// Restore any persisted session.
    pub async fn init(&self) -> AuthStatus {
        self.auth.init().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn auth(&self) -> &SessionManager {
        &self.auth
    }

    pub fn refetch(&self) -> &RefetchCoordinator {
        &self.refetch
    }

    pub fn vault(&self) -> &VaultClient {
        &self.vault
    }

    /// Stop every background task. Auth state and the persisted record are
    /// left as they are.
    pub fn shutdown(&self) {
        self.refetch.shutdown();
        self.auth.shutdown();
        if let Some(handle) = self.event_loop.lock().take() {
            handle.abort();
        }
        tracing::debug!("App context shut down");
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
