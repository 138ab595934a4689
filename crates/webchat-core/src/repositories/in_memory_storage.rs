use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::{StorageError, StorageResult};
use super::storage::{BoxFuture, StorageBackend, projected_size};

/// In-memory storage medium
/// Useful for testing and for sessions that should not touch disk
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
    quota: Option<u64>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: u64) -> Self {
        Self {
            entries: Arc::default(),
            quota: Some(quota),
        }
    }

    pub fn used_bytes(&self) -> u64 {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }
}

impl StorageBackend for InMemoryStorage {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let value = self.entries.lock().get(key).cloned();
        Box::pin(async move { Ok(value) })
    }

    fn set(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>> {
        let result = {
            let mut store = self.entries.lock();
            let entry_len = (key.len() + value.len()) as u64;
            let total: u64 = store.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum();
            let old_len = store
                .get(key)
                .map(|v| (key.len() + v.len()) as u64)
                .unwrap_or_default();
            let needed = projected_size(total, old_len, entry_len);

            match self.quota {
                Some(quota) if needed > quota => Err(StorageError::QuotaExceeded { needed, quota }),
                _ => {
                    store.insert(key.to_string(), value);
                    Ok(())
                }
            }
        };
        Box::pin(async move { result })
    }

    fn remove(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
        self.entries.lock().remove(key);
        Box::pin(async { Ok(()) })
    }
}
