//! Disk-backed persistent store and its pluggable providers.

mod compression;
mod disk_store;
mod id;
mod path;

pub use compression::{AdaptiveCompression, LosslessCompression, LossyCompression};
pub use disk_store::DiskStore;
pub use id::{Md5IdProvider, Sha256IdProvider};
pub use path::{DatePathProvider, DomainPathProvider, FlatPathProvider};
