//! Port definitions for the pluggable storage providers.

use std::io;
use std::path::PathBuf;

use crate::domain::entities::ResourceKey;

/// Derives a stable cache/storage key from a URL.
///
/// The mapping must be deterministic, collision-resistant for practical
/// URL sets, and stable across process restarts so that on-disk entries
/// remain addressable. Two URLs mapping to the same key are treated as
/// the same resource.
pub trait IdProvider: Send + Sync {
    /// Derives the key for `url`. The canonical form of a URL is its
    /// string representation.
    fn key_for(&self, url: &str) -> ResourceKey;

    /// Short stable name, included in the configuration fingerprint.
    fn name(&self) -> &'static str;
}

/// Encodes images for storage and decodes them back.
pub trait CompressionProvider: Send + Sync {
    /// Encodes an image into storable bytes.
    ///
    /// # Errors
    /// Returns an I/O error if encoding fails.
    fn compress(&self, image: &image::DynamicImage) -> io::Result<Vec<u8>>;

    /// Decodes stored bytes back into an image.
    ///
    /// # Errors
    /// Returns an I/O error if the bytes are not decodable.
    fn decompress(&self, bytes: &[u8]) -> io::Result<image::DynamicImage>;

    /// File extension for entries written by this provider.
    fn extension(&self) -> &'static str;

    /// Short stable name, included in the configuration fingerprint.
    fn name(&self) -> &'static str;
}

/// Decides where an entry lives under the storage root.
///
/// The layout is determined once by the configured provider; switching
/// providers does not re-path existing entries.
pub trait PathProvider: Send + Sync {
    /// Returns the path of an entry relative to the storage root.
    fn relative_path(&self, url: &str, key: &ResourceKey, extension: &str) -> PathBuf;

    /// Returns the directories (relative to the root) that must exist
    /// before an entry for `url` can be written.
    fn parent_dirs(&self, url: &str) -> Vec<PathBuf>;

    /// Short stable name, included in the configuration fingerprint.
    fn name(&self) -> &'static str;
}
