//! Port definition for request lifecycle observers.

use crate::domain::entities::ImageSource;
use crate::domain::errors::FetchError;

/// Observes the lifecycle of requests flowing through the engine.
///
/// Observers are held weakly and invoked in registration order; a panic in
/// one observer is isolated and does not block the others. All methods
/// have empty defaults so implementors override only what they need.
#[allow(unused_variables)]
pub trait FetchObserver: Send + Sync {
    /// A request for `url` entered the engine.
    fn on_start(&self, url: &str) {}

    /// A download for `url` reported fractional progress.
    fn on_progress(&self, url: &str, value: f64) {}

    /// A request for `url` resolved successfully from `source`.
    fn on_success(&self, url: &str, source: ImageSource) {}

    /// A request for `url` terminated with `error`.
    fn on_failure(&self, url: &str, error: &FetchError) {}
}
