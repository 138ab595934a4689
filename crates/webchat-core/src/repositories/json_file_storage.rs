use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::error::{StorageError, StorageResult};
use super::storage::{BoxFuture, StorageBackend, projected_size};

const ENTRY_EXTENSION: &str = "json";

/// Browser local-storage budget.
pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

/// File-backed storage: each key is a `<key>.json` file in one directory.
///
/// The quota covers key names plus values across the whole directory.
pub struct JsonFileStorage {
    dir: PathBuf,
    quota: u64,
}

impl JsonFileStorage {
    pub fn new(dir: impl Into<PathBuf>, quota: u64) -> Self {
        Self {
            dir: dir.into(),
            quota,
        }
    }

    fn entry_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{}.{}", key, ENTRY_EXTENSION))
    }
}

/// Sum of key and value sizes for every entry currently stored.
async fn used_bytes(dir: &Path) -> StorageResult<u64> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut total = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some(ENTRY_EXTENSION) {
            continue;
        }
        let key_len = path
            .file_stem()
            .map(|s| s.len() as u64)
            .unwrap_or_default();
        total += key_len + entry.metadata().await?.len();
    }
    Ok(total)
}

async fn file_len(path: &Path) -> StorageResult<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

impl StorageBackend for JsonFileStorage {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let path = Self::entry_path(&self.dir, key);

        Box::pin(async move {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => Ok(Some(content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn set(&self, key: &str, value: String) -> BoxFuture<'static, StorageResult<()>> {
        let dir = self.dir.clone();
        let path = Self::entry_path(&self.dir, key);
        let key_len = key.len() as u64;
        let quota = self.quota;

        Box::pin(async move {
            let existing = file_len(&path).await?;
            let old_len = if existing > 0 { key_len + existing } else { 0 };
            let needed = projected_size(used_bytes(&dir).await?, old_len, key_len + value.len() as u64);
            if needed > quota {
                warn!(path = %path.display(), needed, quota, "Storage quota exceeded");
                return Err(StorageError::QuotaExceeded { needed, quota });
            }

            tokio::fs::create_dir_all(&dir).await?;

            // Write to file atomically (write to temp, then rename)
            let temp_path = path.with_extension("json.tmp");
            tokio::fs::write(&temp_path, value).await?;
            tokio::fs::rename(&temp_path, &path).await?;

            debug!(path = %path.display(), used = needed, "Stored entry");
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
        let path = Self::entry_path(&self.dir, key);

        Box::pin(async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}
