//! Refresh-now plus one delayed refresh per query key.
//!
//! Each key has at most one pending delayed refresh. Re-triggering a key
//! aborts the pending task and schedules a fresh one (last call wins); the
//! immediate refreshes are never coalesced.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::capability::{QueryCache, RefetchMode};
use crate::config::RefetchConfig;

// ── Query keys ──────────────────────────────────────────────────

pub const ACCOUNT_BALANCE: &str = "account-balance";
pub const WITHDRAW_PREVIEW: &str = "withdraw-preview";

/// Cache key for an address-scoped query. Renders as `scope:address`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub scope: String,
    pub address: String,
}

impl QueryKey {
    pub fn new(scope: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            address: address.into(),
        }
    }

    pub fn account_balance(address: &str) -> Self {
        Self::new(ACCOUNT_BALANCE, address)
    }

    pub fn withdraw_preview(address: &str) -> Self {
        Self::new(WITHDRAW_PREVIEW, address)
    }

    /// Queries whose results change when `address` deposits or withdraws.
    pub fn affected_by(address: &str) -> [Self; 2] {
        [Self::account_balance(address), Self::withdraw_preview(address)]
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.address)
    }
}

/// Which refreshes a trigger performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefetchOptions {
    pub immediate: bool,
    pub delayed: bool,
}

impl Default for RefetchOptions {
    fn default() -> Self {
        Self {
            immediate: true,
            delayed: true,
        }
    }
}

/// Whether reads may still lag the chain: true until `window` has elapsed
/// since `last_refresh`.
pub fn confirmation_window_active(
    last_refresh: Option<Instant>,
    now: Instant,
    window: Duration,
) -> bool {
    match last_refresh {
        Some(at) => now.saturating_duration_since(at) < window,
        None => false,
    }
}

// ── Coordinator ─────────────────────────────────────────────────

struct PendingRefetch {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Timers {
    next_generation: u64,
    closed: bool,
    pending: HashMap<QueryKey, PendingRefetch>,
}

struct Inner {
    cache: Arc<dyn QueryCache>,
    delay: Duration,
    window: Duration,
    timers: Mutex<Timers>,
    last_refreshed: Mutex<HashMap<QueryKey, Instant>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, pending) in self.timers.get_mut().pending.drain() {
            pending.handle.abort();
        }
    }
}

/// Owns the delayed-refresh timers for one app instance.
#[derive(Clone)]
pub struct RefetchCoordinator {
    inner: Arc<Inner>,
}

impl RefetchCoordinator {
    pub fn new(cache: Arc<dyn QueryCache>, config: &RefetchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                delay: config.delay(),
                window: config.window(),
                timers: Mutex::new(Timers::default()),
                last_refreshed: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Refresh `key` now and/or schedule the delayed follow-up.
    ///
    /// Refresh failures are logged and swallowed; a failed immediate refresh
    /// still schedules the delayed one.
    pub async fn trigger_refetch(&self, key: &QueryKey, options: RefetchOptions) {
        if self.inner.timers.lock().closed {
            tracing::debug!(key = %key, "Refetch coordinator shut down, ignoring trigger");
            return;
        }
        if options.immediate {
            refresh(&self.inner, key, "immediate").await;
        }
        if options.delayed {
            self.schedule(key);
        }
    }

    fn schedule(&self, key: &QueryKey) {
        let mut timers = self.inner.timers.lock();
        if timers.closed {
            return;
        }
        timers.next_generation += 1;
        let generation = timers.next_generation;
        let handle = spawn_delayed(
            Arc::downgrade(&self.inner),
            key.clone(),
            generation,
            self.inner.delay,
        );
        if let Some(previous) = timers
            .pending
            .insert(key.clone(), PendingRefetch { generation, handle })
        {
            previous.handle.abort();
            tracing::debug!(key = %key, "Replaced pending delayed refetch");
        }
    }

    /// Drop the pending delayed refresh for `key`, if any.
    pub fn cancel(&self, key: &QueryKey) -> bool {
        match self.inner.timers.lock().pending.remove(key) {
            Some(pending) => {
                pending.handle.abort();
                tracing::debug!(key = %key, "Cancelled delayed refetch");
                true
            }
            None => false,
        }
    }

    /// Mark `key` stale in the cache and forget its timer and timestamp.
    pub fn invalidate(&self, key: &QueryKey) {
        self.cancel(key);
        self.inner.last_refreshed.lock().remove(key);
        self.inner.cache.invalidate(&key.to_string());
    }

    pub fn has_pending(&self, key: &QueryKey) -> bool {
        self.inner.timers.lock().pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.timers.lock().pending.len()
    }

    /// Abort every pending timer and refuse new triggers.
    pub fn shutdown(&self) {
        let mut timers = self.inner.timers.lock();
        timers.closed = true;
        let count = timers.pending.len();
        for (_, pending) in timers.pending.drain() {
            pending.handle.abort();
        }
        if count > 0 {
            tracing::debug!(count, "Aborted pending delayed refetches");
        }
    }

    pub fn last_refreshed(&self, key: &QueryKey) -> Option<Instant> {
        self.inner.last_refreshed.lock().get(key).copied()
    }

    /// Note that `key`'s data was refreshed by some other path.
    pub fn record_refresh(&self, key: &QueryKey) {
        self.inner
            .last_refreshed
            .lock()
            .insert(key.clone(), Instant::now());
    }

    /// True while reads for `key` may not yet reflect a recent write.
    pub fn is_confirmation_window_active(&self, key: &QueryKey) -> bool {
        confirmation_window_active(self.last_refreshed(key), Instant::now(), self.inner.window)
    }
}

fn spawn_delayed(
    inner: Weak<Inner>,
    key: QueryKey,
    generation: u64,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        {
            let mut timers = inner.timers.lock();
            let current = timers
                .pending
                .get(&key)
                .is_some_and(|p| p.generation == generation);
            if timers.closed || !current {
                return;
            }
            timers.pending.remove(&key);
        }
        refresh(&inner, &key, "delayed").await;
    })
}

async fn refresh(inner: &Inner, key: &QueryKey, phase: &'static str) -> bool {
    match inner.cache.refetch(&key.to_string(), RefetchMode::Active).await {
        Ok(()) => {
            inner
                .last_refreshed
                .lock()
                .insert(key.clone(), Instant::now());
            tracing::debug!(key = %key, phase, "Refetched");
            true
        }
        Err(e) => {
            tracing::warn!(key = %key, phase, "Refetch failed: {e:#}");
            false
        }
    }
}
