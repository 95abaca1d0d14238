//! Infrastructure layer: concrete cache, storage, and download adapters.

/// Two-tier in-memory image cache.
pub mod cache;
/// Default wall-clock sleeper.
pub mod clock;
/// Default image decoder backed by the `image` crate.
pub mod decoder;
/// Bounded-parallelism download scheduler.
pub mod download;
/// Disk-backed persistent store and its providers.
pub mod storage;
/// HTTP transport backed by `reqwest`.
pub mod transport;
