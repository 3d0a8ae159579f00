//! In-memory store for tests and ephemeral sessions

use super::KvStore;
use crate::error::{WalletError, WalletResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.entries.lock().map(|e| e.len()).unwrap_or(0) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn lock(&self) -> WalletResult<std::sync::MutexGuard<'_, BTreeMap<String, Value>>> {
        self.entries.lock().map_err(|_| WalletError::Storage("memory store lock".into()))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> WalletResult<Option<Value>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> WalletResult<()> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> WalletResult<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    fn keys(&self, prefix: &str) -> WalletResult<Vec<String>> {
        Ok(self.lock()?.range(prefix.to_string()..).take_while(|(k, _)| k.starts_with(prefix)).map(|(k, _)| k.clone()).collect())
    }

    fn remove_prefix(&self, prefix: &str) -> WalletResult<usize> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }
}
