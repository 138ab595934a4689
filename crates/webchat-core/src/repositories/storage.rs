use std::future::Future;
use std::pin::Pin;

use super::error::StorageResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Size-bounded string key-value medium.
///
/// A `set` that would push the total stored size over the quota fails with
/// [`StorageError::QuotaExceeded`](super::StorageError::QuotaExceeded) and
/// leaves the previous value untouched.
pub trait StorageBackend: Send + Sync + 'static {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>>;

    fn set(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>>;

    fn remove(&self, key: &str) -> BoxFuture<'static, StorageResult<()>>;
}

/// Projected total once `key` holds `new_len` bytes.
pub(crate) fn projected_size(current_total: u64, old_len: u64, new_len: u64) -> u64 {
    current_total.saturating_sub(old_len) + new_len
}
