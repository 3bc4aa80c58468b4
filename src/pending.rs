//! Pending-request registry.
//!
//! The wire protocol is push-based and multiplexed: a command flow that
//! asks the server something (WHOIS, a control-panel query) cannot read
//! its answer from the stream directly. Instead it registers a one-shot
//! future under a correlation key and suspends; the raw handler that
//! later recognizes the reply resolves the key.
//!
//! Query types that share one reply channel (`bindhost`, `bncadmin`,
//! `ns_info`) must additionally hold that type's named lock for the full
//! register → send → await → consume cycle, so two concurrent flows never
//! fight over the same key.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Prefix for per-nick WHOIS account correlation keys.
pub const WHOIS_ACCT_PREFIX: &str = "whois_acct_";

#[derive(Debug, Error)]
pub enum PendingError {
    /// A request for this key is already in flight. Registering again
    /// would orphan the first waiter, so it is rejected instead.
    #[error("a lookup for '{0}' is already in progress")]
    AlreadyPending(String),
    /// The pending entry was dropped before a reply arrived (connection
    /// teardown, or the owning flow cancelled it).
    #[error("lookup '{0}' was cancelled before a reply arrived")]
    Cancelled(String),
}

/// Registry of in-flight correlation futures and named critical sections.
#[derive(Default)]
pub struct Pending {
    futures: Mutex<HashMap<String, oneshot::Sender<String>>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Pending {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a correlation key and get the future for its reply.
    ///
    /// At most one request may be pending per key; a second `begin` for a
    /// live key is rejected. The owning flow must consume the receiver
    /// and, on its own error paths, call [`cancel`](Self::cancel) so the
    /// entry is never left behind.
    ///
    /// No timeout is imposed here: a reply that never arrives suspends
    /// the owning flow until the transport closes under it.
    pub fn begin(&self, key: &str) -> Result<oneshot::Receiver<String>, PendingError> {
        let mut futures = self.futures.lock();
        if futures.contains_key(key) {
            return Err(PendingError::AlreadyPending(key.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        futures.insert(key.to_string(), tx);
        Ok(rx)
    }

    /// Resolve a pending key with a reply value, removing the entry.
    ///
    /// Resolving an absent key is a safe no-op; returns whether a waiter
    /// was actually resolved.
    pub fn resolve(&self, key: &str, value: impl Into<String>) -> bool {
        let tx = self.futures.lock().remove(key);
        match tx {
            Some(tx) => tx.send(value.into()).is_ok(),
            None => false,
        }
    }

    /// Drop a pending entry without resolving it.
    pub fn cancel(&self, key: &str) {
        self.futures.lock().remove(key);
    }

    /// Whether a key is currently pending.
    pub fn is_pending(&self, key: &str) -> bool {
        self.futures.lock().contains_key(key)
    }

    /// End-of-WHOIS: resolve every pending WHOIS-account key for `nick`
    /// with the empty value ("not identified"). Keys for other nicks are
    /// left alone. Returns how many waiters were resolved.
    pub fn resolve_whois_end(&self, nick: &str) -> usize {
        let matched: Vec<(String, oneshot::Sender<String>)> = {
            let mut futures = self.futures.lock();
            let keys: Vec<String> = futures
                .keys()
                .filter(|k| k.starts_with(WHOIS_ACCT_PREFIX) && k.ends_with(nick))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| futures.remove_entry(&k))
                .collect()
        };
        let count = matched.len();
        for (_, tx) in matched {
            let _ = tx.send(String::new());
        }
        count
    }

    /// Acquire the named mutual-exclusion lock for a shared query type.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}
