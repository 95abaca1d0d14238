//! Disk-backed persistent image store.
//!
//! The disk is a hint, not a source of truth: read failures of any kind
//! are misses, and write failures are logged without ever reaching the
//! waiter chain.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task;
use tracing::{debug, trace, warn};

use crate::domain::entities::{DecodedImage, ResourceKey};
use crate::domain::ports::{CompressionProvider, PathProvider};

/// Persistent store for encoded images, addressed by resource key.
///
/// Layout and codec are delegated to the configured providers. All file
/// I/O and codec work runs on the blocking-task executor, so callers on
/// the async runtime never stall on the filesystem.
pub struct DiskStore {
    root: PathBuf,
    paths: Arc<dyn PathProvider>,
    compression: Arc<dyn CompressionProvider>,
}

impl DiskStore {
    /// Creates a store rooted at `root`. The directory is created lazily
    /// on first write.
    #[must_use]
    pub fn new(
        root: PathBuf,
        paths: Arc<dyn PathProvider>,
        compression: Arc<dyn CompressionProvider>,
    ) -> Self {
        Self {
            root,
            paths,
            compression,
        }
    }

    /// Returns the default storage root, under the platform cache
    /// directory (falling back to the system temp directory).
    #[must_use]
    pub fn default_root() -> PathBuf {
        directories::ProjectDirs::from("io", "linuxmobile", crate::NAME).map_or_else(
            || std::env::temp_dir().join(crate::NAME).join("images"),
            |dirs| dirs.cache_dir().join("images"),
        )
    }

    /// Returns the absolute path an entry for (`url`, `key`) lives at.
    #[must_use]
    pub fn file_path(&self, url: &str, key: &ResourceKey) -> PathBuf {
        self.root
            .join(self.paths.relative_path(url, key, self.compression.extension()))
    }

    /// Reads and decodes the entry for `key`.
    ///
    /// Every failure mode (absent file, I/O error, undecodable bytes) is
    /// a miss.
    pub async fn read(&self, url: &str, key: &ResourceKey) -> Option<DecodedImage> {
        let path = self.file_path(url, key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => {
                trace!(key = %key, "disk store miss");
                return None;
            }
        };

        let compression = self.compression.clone();
        let decoded = task::spawn_blocking(move || compression.decompress(&bytes)).await;
        match decoded {
            Ok(Ok(image)) => {
                debug!(key = %key, path = %path.display(), "disk store hit");
                Some(Arc::new(image))
            }
            Ok(Err(error)) => {
                warn!(key = %key, error = %error, "failed to decode stored image");
                None
            }
            Err(error) => {
                warn!(key = %key, error = %error, "decode task panicked");
                None
            }
        }
    }

    /// Encodes and writes an image for `key`, atomically.
    ///
    /// The bytes land in a temp file in the destination directory and are
    /// renamed into place, so concurrent readers observe either the old
    /// or the new entry, never a torn file.
    ///
    /// # Errors
    /// Returns the underlying I/O or encoding error. Callers treat writes
    /// as best-effort and only log failures.
    pub async fn write(&self, url: &str, key: &ResourceKey, image: &DecodedImage) -> io::Result<()> {
        let path = self.file_path(url, key);
        let compression = self.compression.clone();
        let image = image.clone();
        let written = task::spawn_blocking(move || -> io::Result<u64> {
            let bytes = compression.compress(&image)?;
            let parent = path
                .parent()
                .ok_or_else(|| io::Error::other("storage path has no parent"))?;
            std::fs::create_dir_all(parent)?;
            let mut file = tempfile::NamedTempFile::new_in(parent)?;
            io::Write::write_all(&mut file, &bytes)?;
            file.persist(&path).map_err(|e| e.error)?;
            Ok(bytes.len() as u64)
        })
        .await
        .map_err(io::Error::other)??;

        debug!(key = %key, size = written, "stored image on disk");
        Ok(())
    }

    /// Deletes the entry for `key`, if present. Idempotent.
    pub async fn remove(&self, url: &str, key: &ResourceKey) {
        let path = self.file_path(url, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(key = %key, "removed stored image"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(key = %key, error = %error, "failed to remove stored image"),
        }
    }

    /// Deletes every entry under the storage root. Idempotent.
    pub async fn clear(&self) {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(root = %self.root.display(), "cleared disk store"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(error = %error, "failed to clear disk store"),
        }
    }

    /// Returns the total size in bytes of all stored entries.
    pub async fn size_bytes(&self) -> u64 {
        self.scan().await.1
    }

    /// Returns the number of stored entries.
    pub async fn count(&self) -> usize {
        self.scan().await.0
    }

    async fn scan(&self) -> (usize, u64) {
        let root = self.root.clone();
        task::spawn_blocking(move || {
            let mut count = 0usize;
            let mut bytes = 0u64;
            scan_dir(&root, &mut count, &mut bytes);
            (count, bytes)
        })
        .await
        .unwrap_or((0, 0))
    }
}

/// Walks `dir` recursively, accumulating file count and size. The layout
/// providers may nest entries arbitrarily deep.
fn scan_dir(dir: &Path, count: &mut usize, bytes: &mut u64) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.is_dir() {
            scan_dir(&entry.path(), count, bytes);
        } else if metadata.is_file() {
            *count += 1;
            *bytes += metadata.len();
        }
    }
}

impl std::fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStore")
            .field("root", &self.root)
            .field("paths", &self.paths.name())
            .field("compression", &self.compression.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::{
        AdaptiveCompression, DomainPathProvider, FlatPathProvider, LosslessCompression,
        LossyCompression,
    };
    use crate::test_support::test_image;
    use tempfile::TempDir;

    fn store_with(
        dir: &TempDir,
        paths: Arc<dyn PathProvider>,
        compression: Arc<dyn CompressionProvider>,
    ) -> DiskStore {
        DiskStore::new(dir.path().to_path_buf(), paths, compression)
    }

    fn flat_store(dir: &TempDir) -> DiskStore {
        store_with(dir, Arc::new(FlatPathProvider), Arc::new(LosslessCompression))
    }

    const URL: &str = "https://cdn.example.com/images/pic.png";

    fn key() -> ResourceKey {
        ResourceKey::new("cafebabe")
    }

    #[tokio::test]
    async fn test_round_trip_lossless() {
        let dir = TempDir::new().unwrap();
        let store = flat_store(&dir);

        store.write(URL, &key(), &test_image(6, 9)).await.unwrap();
        let restored = store.read(URL, &key()).await.unwrap();

        assert_eq!(restored.width(), 6);
        assert_eq!(restored.height(), 9);
    }

    #[tokio::test]
    async fn test_round_trip_lossy_preserves_dimensions() {
        let dir = TempDir::new().unwrap();
        let store = store_with(
            &dir,
            Arc::new(FlatPathProvider),
            Arc::new(LossyCompression::new(70)),
        );

        store.write(URL, &key(), &test_image(12, 8)).await.unwrap();
        let restored = store.read(URL, &key()).await.unwrap();

        assert_eq!((restored.width(), restored.height()), (12, 8));
    }

    #[tokio::test]
    async fn test_round_trip_adaptive() {
        let dir = TempDir::new().unwrap();
        let store = store_with(
            &dir,
            Arc::new(FlatPathProvider),
            Arc::new(AdaptiveCompression::new(4, 80)),
        );

        store.write(URL, &key(), &test_image(12, 8)).await.unwrap();
        assert!(store.read(URL, &key()).await.is_some());
    }

    #[tokio::test]
    async fn test_missing_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let store = flat_store(&dir);
        assert!(store.read(URL, &key()).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let store = flat_store(&dir);
        let path = store.file_path(URL, &key());
        std::fs::write(&path, b"not an image").unwrap();

        assert!(store.read(URL, &key()).await.is_none());
    }

    #[tokio::test]
    async fn test_domain_layout_creates_subdirectories() {
        let dir = TempDir::new().unwrap();
        let store = store_with(
            &dir,
            Arc::new(DomainPathProvider),
            Arc::new(LosslessCompression),
        );

        store.write(URL, &key(), &test_image(4, 4)).await.unwrap();

        let expected = dir.path().join("cdn.example.com").join("cafebabe.png");
        assert!(expected.exists());
        assert_eq!(store.count().await, 1);
        assert!(store.size_bytes().await > 0);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = flat_store(&dir);
        store.write(URL, &key(), &test_image(4, 4)).await.unwrap();

        store.remove(URL, &key()).await;
        store.remove(URL, &key()).await;

        assert!(store.read(URL, &key()).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let store = flat_store(&dir);
        store.write(URL, &key(), &test_image(4, 4)).await.unwrap();
        store
            .write("https://example.com/b.png", &ResourceKey::new("other"), &test_image(4, 4))
            .await
            .unwrap();

        store.clear().await;
        store.clear().await;

        assert_eq!(store.count().await, 0);
        assert_eq!(store.size_bytes().await, 0);
    }
}
