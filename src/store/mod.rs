//! Key-value persisted store
//!
//! Injected collaborator replacing ambient page storage. Values are JSON.
//! Keys are flat strings laid out in [`crate::core::keys`]; prefix enumeration
//! and prefix deletion back the session isolation wipe.
//!
//! | Store | Backing | Use |
//! |-------|---------|-----|
//! | [`MemoryStore`] | in-process map | tests, ephemeral sessions |
//! | [`FileStore`] | single JSON file | CLI, native apps (`native` feature) |

#[cfg(feature = "native")]
mod file;
mod memory;

#[cfg(feature = "native")]
pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::WalletResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> WalletResult<Option<Value>>;
    fn put(&self, key: &str, value: Value) -> WalletResult<()>;
    /// Returns whether the key existed.
    fn remove(&self, key: &str) -> WalletResult<bool>;
    /// Keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> WalletResult<Vec<String>>;

    /// Delete every key under `prefix`, returning how many were removed.
    fn remove_prefix(&self, prefix: &str) -> WalletResult<usize> {
        let mut removed = 0;
        for key in self.keys(prefix)? {
            if self.remove(&key)? { removed += 1; }
        }
        Ok(removed)
    }
}

/// Read and deserialize a value. Undecodable values read as absent.
pub fn read_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> WalletResult<Option<T>> {
    Ok(store.get(key)?.and_then(|v| match serde_json::from_value(v) {
        Ok(t) => Some(t),
        Err(e) => {
            tracing::warn!(key, error = %e, "discarding undecodable stored value");
            None
        }
    }))
}

pub fn write_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> WalletResult<()> {
    store.put(key, serde_json::to_value(value)?)
}
