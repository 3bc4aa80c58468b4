//! Durable account and queue state.
//!
//! One JSON document holds both collections: the request queue
//! (requester -> registration-time text) and the active accounts
//! (username -> bindhost). The file is read fully at startup and
//! rewritten fully after every mutation. Concurrent edits to the backing
//! file from outside the process are not supported.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access data file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode data file: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The persisted document. BTreeMaps keep the on-disk JSON sorted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BncState {
    /// Pending requests: requester account -> registration-time text.
    #[serde(default)]
    pub queue: BTreeMap<String, String>,
    /// Active accounts: username -> bindhost (None until synced).
    #[serde(default)]
    pub users: BTreeMap<String, Option<String>>,
}

/// Full-document store over a single JSON file.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    pub state: BncState,
}

impl Store {
    /// Load from `path`, creating the file with empty collections when it
    /// does not exist yet.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            BncState::default()
        };
        let store = Self { path, state };
        store.save()?;
        Ok(store)
    }

    /// Rewrite the whole document.
    pub fn save(&self) -> Result<(), StoreError> {
        let body = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.path, body)?;
        Ok(())
    }

    /// Reload from disk, replacing the in-memory state.
    pub fn reload(&mut self) -> Result<(), StoreError> {
        self.state = serde_json::from_str(&std::fs::read_to_string(&self.path)?)?;
        Ok(())
    }
}

/// Bindhosts assigned to more than one account.
///
/// A bindhost should be unique per account; duplicates are reported to
/// the operational log channel as a warning, not treated as fatal.
pub fn duplicate_bindhosts(users: &BTreeMap<String, Option<String>>) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for host in users.values().flatten() {
        *counts.entry(host.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(host, _)| host.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_creates_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bnc.json");
        let store = Store::load(&path).unwrap();
        assert!(store.state.queue.is_empty());
        assert!(store.state.users.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn mutations_survive_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bnc.json");
        let mut store = Store::load(&path).unwrap();
        store
            .state
            .queue
            .insert("alice".into(), "May 30 00:53:54 2017 UTC".into());
        store
            .state
            .users
            .insert("bob".into(), Some("127.0.1.5".into()));
        store.save().unwrap();

        let other = Store::load(&path).unwrap();
        assert_eq!(
            other.state.queue.get("alice").map(String::as_str),
            Some("May 30 00:53:54 2017 UTC")
        );
        assert_eq!(
            other.state.users.get("bob"),
            Some(&Some("127.0.1.5".to_string()))
        );

        store.state.queue.clear();
        store.save().unwrap();
        let mut reloaded = other;
        reloaded.reload().unwrap();
        assert!(reloaded.state.queue.is_empty());
    }

    #[test]
    fn partial_documents_default_missing_collections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bnc.json");
        std::fs::write(&path, r#"{"users": {"bob": "127.0.1.5"}}"#).unwrap();
        let store = Store::load(&path).unwrap();
        assert!(store.state.queue.is_empty());
        assert_eq!(store.state.users.len(), 1);
    }

    #[test]
    fn duplicate_scan_flags_shared_hosts_once() {
        let mut users: BTreeMap<String, Option<String>> = BTreeMap::new();
        users.insert("a".into(), Some("127.0.1.5".into()));
        users.insert("b".into(), Some("127.0.1.5".into()));
        users.insert("c".into(), Some("127.0.2.9".into()));
        users.insert("d".into(), None);
        assert_eq!(duplicate_bindhosts(&users), vec!["127.0.1.5".to_string()]);

        users.insert("b".into(), Some("127.0.3.1".into()));
        assert!(duplicate_bindhosts(&users).is_empty());
    }
}
