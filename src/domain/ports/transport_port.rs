//! Port definition for the network transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::FetchResult;

/// Callback invoked with fractional progress values in `[0.0, 1.0]`.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Hook that may mutate an outgoing request, e.g. to attach a bearer
/// token. Invoked once per attempt, after the configured headers are set.
pub type AuthHook = Arc<dyn Fn(&mut TransportRequest) + Send + Sync>;

/// A single outgoing HTTP attempt, fully resolved.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Target URL.
    pub url: String,
    /// Headers merged from the configuration and the authentication hook.
    pub headers: Vec<(String, String)>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Whether the request may go out over a metered cellular interface.
    /// The bundled transport carries the flag but cannot inspect interface
    /// types portably; custom transports should honor it.
    pub allows_cellular: bool,
}

/// Per-configuration template from which each attempt's request is built.
#[derive(Clone)]
pub struct RequestTemplate {
    headers: Vec<(String, String)>,
    timeout: Duration,
    allows_cellular: bool,
    auth_hook: Option<AuthHook>,
}

impl RequestTemplate {
    /// Creates a template from frozen configuration values.
    #[must_use]
    pub fn new(
        headers: Vec<(String, String)>,
        timeout: Duration,
        allows_cellular: bool,
        auth_hook: Option<AuthHook>,
    ) -> Self {
        Self {
            headers,
            timeout,
            allows_cellular,
            auth_hook,
        }
    }

    /// Builds the request for one attempt, applying the auth hook.
    #[must_use]
    pub fn build(&self, url: &str) -> TransportRequest {
        let mut request = TransportRequest {
            url: url.to_owned(),
            headers: self.headers.clone(),
            timeout: self.timeout,
            allows_cellular: self.allows_cellular,
        };
        if let Some(hook) = &self.auth_hook {
            hook(&mut request);
        }
        request
    }
}

impl std::fmt::Debug for RequestTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTemplate")
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("allows_cellular", &self.allows_cellular)
            .field("auth_hook", &self.auth_hook.is_some())
            .finish()
    }
}

/// Issues an HTTP-like GET and yields the response body.
///
/// Implementations report fractional progress through the supplied
/// callback and must support cancellation by future drop: when the engine
/// aborts the task awaiting `fetch`, the underlying connection is torn
/// down. Injected for testability.
#[async_trait]
pub trait NetworkTransport: Send + Sync {
    /// Performs one attempt and returns the full response body.
    ///
    /// # Errors
    /// Maps transport failures onto the
    /// [`FetchError`](crate::domain::errors::FetchError) taxonomy: timeouts
    /// to `Timeout`, non-2xx statuses to `HttpStatus`, connection-level
    /// failures to `Network`.
    async fn fetch(&self, request: TransportRequest, progress: ProgressFn) -> FetchResult<Bytes>;
}
