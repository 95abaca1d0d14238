//! Built-in resource key derivations.

use sha2::{Digest, Sha256};

use crate::domain::entities::ResourceKey;
use crate::domain::ports::IdProvider;

/// Default key derivation: MD5 of the URL string, lowercase hex.
///
/// MD5 is fine here; the digest is an addressing key, not an integrity
/// check. Stable across process restarts.
#[derive(Debug, Default, Clone, Copy)]
pub struct Md5IdProvider;

impl IdProvider for Md5IdProvider {
    fn key_for(&self, url: &str) -> ResourceKey {
        ResourceKey::new(format!("{:x}", md5::compute(url.as_bytes())))
    }

    fn name(&self) -> &'static str {
        "md5"
    }
}

/// Alternate key derivation: first 32 hex characters of SHA-256 of the URL
/// string. Stable across process restarts.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256IdProvider;

impl IdProvider for Sha256IdProvider {
    fn key_for(&self, url: &str) -> ResourceKey {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let digest = hasher.finalize();
        ResourceKey::new(hex::encode(&digest[..16]))
    }

    fn name(&self) -> &'static str {
        "sha256"
    }
}
