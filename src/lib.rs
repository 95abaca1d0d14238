//! Oximage - An async image fetching and caching engine.
//!
//! The crate coordinates image requests through a three-layer pipeline:
//! a two-tier in-memory LRU cache, a disk-backed persistent store with
//! pluggable compression and layout, and a bounded-parallelism download
//! scheduler with priority queuing, request coalescing, and retry with
//! exponential backoff.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the coordinator and the public manager API.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing cache, storage, and download adapters.
pub mod infrastructure;

#[cfg(test)]
pub(crate) mod test_support;

pub use application::config::{
    CacheConfig, ImageConfig, NetworkConfig, RequestOptions, StorageConfig,
};
pub use application::manager::{ImageManager, ProgressStream, RequestFuture};
pub use domain::entities::{
    CacheTier, CallerToken, DecodedImage, DeliveredImage, ImageSource, LatencyHint, Priority,
    ResourceKey,
};
pub use domain::errors::{FetchError, FetchResult};
pub use domain::ports::{
    CompressionProvider, FetchObserver, IdProvider, ImageDecoder, NetworkTransport, PathProvider,
    Sleeper, TransportRequest,
};
pub use infrastructure::cache::CacheStats;
pub use infrastructure::download::retry::RetryPolicy;

/// Current version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, used for default storage directories.
pub const NAME: &str = "oximage";
