//! Terminal errors delivered to waiters.

use thiserror::Error;

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors surfaced to callers of the engine.
///
/// Retries are internal to a download job; a caller only ever observes the
/// terminal outcome of its request.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The URL failed construction or was rejected by the transport.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Transport-level failure (connection refused, reset, DNS, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// A single attempt exceeded the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-2xx status.
    #[error("http status {0}")]
    HttpStatus(u16),

    /// The request was cancelled by the caller or the engine.
    #[error("request cancelled")]
    Cancelled,

    /// Bytes arrived but could not be decoded into an image.
    #[error("image decoding failed: {0}")]
    DecodingFailed(String),

    /// The resource is absent. Only surfaced by probe-style APIs; a 404
    /// from the network is reported as [`FetchError::HttpStatus`].
    #[error("resource not found")]
    NotFound,

    /// Catch-all for failures outside the taxonomy.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl FetchError {
    /// Returns true if a retry policy may re-attempt after this error.
    ///
    /// Transport failures, timeouts, HTTP 429, and HTTP 5xx are retryable;
    /// everything else is terminal on first occurrence.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::HttpStatus(code) => *code == 429 || (*code >= 500 && *code <= 599),
            Self::InvalidUrl(_)
            | Self::Cancelled
            | Self::DecodingFailed(_)
            | Self::NotFound
            | Self::Unknown(_) => false,
        }
    }
}
