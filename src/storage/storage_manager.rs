use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::fs::{self, File as TokioFile};
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Path '{0}' escapes the storage root")]
    PathOutsideRoot(String),
    #[error("Storing {requested} bytes would exceed the capacity ({available} bytes left)")]
    CapacityExceeded { requested: u64, available: u64 },
}

///
/// Owns the storage root directory and the load figures derived from it.
///
/// `stored_bytes` is refreshed by every directory scan and bumped by uploads.
///
#[derive(Debug)]
pub struct StorageManager {
    storage_root_path: PathBuf,
    max_capacity_bytes: u64,
    stored_bytes: AtomicU64,
}

impl StorageManager {
    pub fn new(storage_root_path: PathBuf, max_capacity_bytes: u64) -> StorageManager {
        StorageManager {
            storage_root_path,
            max_capacity_bytes: max_capacity_bytes.max(1),
            stored_bytes: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.storage_root_path
    }

    /// Creates the storage root when it does not exist yet.
    pub async fn ensure_root(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.storage_root_path).await?;
        Ok(())
    }

    pub fn max_capacity_bytes(&self) -> u64 {
        self.max_capacity_bytes
    }

    pub fn stored_bytes(&self) -> u64 {
        self.stored_bytes.load(Ordering::Relaxed)
    }

    pub fn set_stored_bytes(&self, bytes: u64) {
        self.stored_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn available_storage_bytes(&self) -> u64 {
        self.max_capacity_bytes.saturating_sub(self.stored_bytes())
    }

    /// Percentage of the capacity in use, clamped to 0..=100.
    pub fn current_load(&self) -> u8 {
        let percent = (self.stored_bytes() as u128 * 100) / self.max_capacity_bytes as u128;
        percent.min(100) as u8
    }

    ///
    /// Joins a relative path onto the storage root.
    ///
    /// Absolute paths and any `..` component are rejected, the result always stays under the root.
    ///
    pub fn resolve(&self, relative_path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(relative_path);
        let is_plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if relative_path.is_empty() || !is_plain {
            return Err(StorageError::PathOutsideRoot(relative_path.to_string()));
        }
        Ok(self.storage_root_path.join(relative))
    }

    /// Path of `absolute` relative to the storage root, with `/` separators.
    pub fn relative_path(&self, absolute: &Path) -> Option<String> {
        let relative = absolute.strip_prefix(&self.storage_root_path).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    pub async fn open(&self, relative_path: &str) -> Result<TokioFile, StorageError> {
        let path = self.resolve(relative_path)?;
        Ok(TokioFile::open(path).await?)
    }

    ///
    /// Writes `data` under `relative_path`, creating parent directories as needed.
    ///
    /// An existing file at that path is replaced and its size no longer counts as stored. A
    /// partially written file is removed before the error is returned.
    ///
    pub async fn save_file(&self, relative_path: &str, data: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.resolve(relative_path)?;
        let requested = data.len() as u64;
        let replaced = match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata.len(),
            _ => 0,
        };
        let available = self.available_storage_bytes().saturating_add(replaced);
        if requested > available {
            return Err(StorageError::CapacityExceeded {
                requested,
                available,
            });
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let written = Self::write_all(&path, data).await;
        self.release_bytes(replaced);
        if let Err(e) = written {
            if let Err(remove_error) = fs::remove_file(&path).await {
                log::warn!(
                    "Unable to remove partial file {}: {}",
                    path.display(),
                    remove_error
                );
            }
            return Err(e.into());
        }

        self.stored_bytes.fetch_add(requested, Ordering::Relaxed);
        Ok(path)
    }

    fn release_bytes(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let _ = self
            .stored_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |stored| {
                Some(stored.saturating_sub(bytes))
            });
    }

    async fn write_all(path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = TokioFile::create(path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }
}
