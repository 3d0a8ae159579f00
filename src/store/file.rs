//! File-backed store: one JSON document, rewritten on every mutation.

use super::KvStore;
use crate::error::{WalletError, WalletResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl FileStore {
    /// Open the store at `path`. A missing file is an empty store; it is
    /// created on first write.
    pub fn open(path: impl Into<PathBuf>) -> WalletResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| WalletError::Storage(format!("store read: {e}")))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| WalletError::Storage(format!("store json: {e}")))?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    /// `<root>/<app>/data/store.json`, root from `WALLETLINK_ROOT` or the
    /// platform data directory.
    pub fn default_path(app: &str) -> PathBuf {
        let root = std::env::var("WALLETLINK_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")));
        root.join(app).join("data").join("store.json")
    }

    pub fn path(&self) -> &Path { &self.path }

    fn mutate<T>(&self, f: impl FnOnce(&mut BTreeMap<String, Value>) -> T) -> WalletResult<T> {
        let mut entries = self.entries.lock().map_err(|_| WalletError::Storage("file store lock".into()))?;
        let out = f(&mut entries);
        self.flush(&entries)?;
        Ok(out)
    }

    fn flush(&self, entries: &BTreeMap<String, Value>) -> WalletResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| WalletError::Storage(format!("store mkdir: {e}")))?;
        }
        let raw = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw).map_err(|e| WalletError::Storage(format!("store write: {e}")))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| WalletError::Storage(format!("store rename: {e}")))
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> WalletResult<Option<Value>> {
        let entries = self.entries.lock().map_err(|_| WalletError::Storage("file store lock".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> WalletResult<()> {
        self.mutate(|entries| { entries.insert(key.to_string(), value); })
    }

    fn remove(&self, key: &str) -> WalletResult<bool> {
        self.mutate(|entries| entries.remove(key).is_some())
    }

    fn keys(&self, prefix: &str) -> WalletResult<Vec<String>> {
        let entries = self.entries.lock().map_err(|_| WalletError::Storage("file store lock".into()))?;
        Ok(entries.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }

    fn remove_prefix(&self, prefix: &str) -> WalletResult<usize> {
        self.mutate(|entries| {
            let before = entries.len();
            entries.retain(|k, _| !k.starts_with(prefix));
            before - entries.len()
        })
    }
}
