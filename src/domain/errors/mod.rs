//! Error taxonomy surfaced to callers.

mod fetch_error;

pub use fetch_error::{FetchError, FetchResult};
