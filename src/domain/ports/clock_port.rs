//! Port definition for time, so retry backoffs are testable.

use std::time::Duration;

use async_trait::async_trait;

/// Suspends the current task for a duration.
///
/// The default implementation wraps `tokio::time::sleep`; tests inject a
/// recording fake so backoff sequences can be asserted without waiting.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Sleeps for at least `duration`.
    async fn sleep(&self, duration: Duration);
}
