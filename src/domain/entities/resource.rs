//! Resource identity and delivery types.

use std::sync::Arc;

/// Decoded image handle, shared and immutable once produced.
pub type DecodedImage = Arc<image::DynamicImage>;

/// Stable identifier for a resource, derived from its URL.
///
/// The key is the sole identity used by the cache, the store, and the
/// downloader; the raw URL string never addresses anything directly.
/// Keys are produced by an [`IdProvider`](crate::domain::ports::IdProvider)
/// and must be stable across process restarts so that on-disk entries
/// remain addressable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Creates a key from any string-like input.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ResourceKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// The layer that produced a successfully delivered image.
///
/// Exactly one source is attributed to every successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Served from the in-memory cache.
    Memory,
    /// Served from the disk store.
    Disk,
    /// Fetched from the network.
    Network,
}

impl ImageSource {
    /// Returns a short label for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::Network => "network",
        }
    }
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successfully resolved image together with its source attribution.
#[derive(Debug, Clone)]
pub struct DeliveredImage {
    /// The decoded image.
    pub image: DecodedImage,
    /// The layer that produced it.
    pub source: ImageSource,
}

impl DeliveredImage {
    /// Creates a delivery record.
    #[must_use]
    pub fn new(image: DecodedImage, source: ImageSource) -> Self {
        Self { image, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_equality() {
        let a = ResourceKey::new("abc123");
        let b = ResourceKey::from("abc123");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "abc123");
    }

    #[test]
    fn test_source_labels() {
        assert_eq!(ImageSource::Memory.as_str(), "memory");
        assert_eq!(ImageSource::Disk.as_str(), "disk");
        assert_eq!(ImageSource::Network.to_string(), "network");
    }
}
