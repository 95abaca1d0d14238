//! Wall-clock sleeper backed by the tokio timer.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ports::Sleeper;

/// Default [`Sleeper`] that suspends on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
