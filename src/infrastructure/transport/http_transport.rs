//! Default network transport.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use crate::domain::errors::{FetchError, FetchResult};
use crate::domain::ports::{NetworkTransport, ProgressFn, TransportRequest};

/// Transport issuing GETs through a shared `reqwest` client.
///
/// The response body is streamed chunk by chunk so fractional progress can
/// be reported while the transfer runs. Cancellation works by dropping the
/// future: `reqwest` tears down the connection when the in-flight request
/// is dropped.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a fresh connection pool. Timeouts are
    /// applied per request, so no builder options are needed here.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Creates a transport reusing an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn map_reqwest_error(error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        return FetchError::Timeout;
    }
    if error.is_builder() {
        return FetchError::InvalidUrl(error.to_string());
    }
    if error.is_connect() || error.is_request() || error.is_body() || error.is_decode() {
        return FetchError::Network(error.to_string());
    }
    FetchError::Unknown(error.to_string())
}

#[async_trait]
impl NetworkTransport for HttpTransport {
    async fn fetch(&self, request: TransportRequest, progress: ProgressFn) -> FetchResult<Bytes> {
        if !request.allows_cellular {
            // Interface selection is not portable; the flag is forwarded
            // for transports that can honor it.
            trace!(url = %request.url, "cellular access disallowed by configuration");
        }

        let mut builder = self
            .client
            .get(&request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let mut response = builder.send().await.map_err(|e| map_reqwest_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let total = response.content_length();
        let mut body: Vec<u8> = Vec::with_capacity(usize::try_from(total.unwrap_or(0)).unwrap_or(0));
        while let Some(chunk) = response.chunk().await.map_err(|e| map_reqwest_error(&e))? {
            body.extend_from_slice(&chunk);
            if let Some(total) = total.filter(|t| *t > 0) {
                #[allow(clippy::cast_precision_loss)]
                progress((body.len() as f64 / total as f64).min(1.0));
            }
        }
        progress(1.0);

        trace!(url = %request.url, bytes = body.len(), "transfer complete");
        Ok(Bytes::from(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unresolvable_host_maps_to_network_error() {
        let transport = HttpTransport::new();
        let request = TransportRequest {
            url: "http://nonexistent.invalid/image.png".into(),
            headers: Vec::new(),
            timeout: Duration::from_secs(5),
            allows_cellular: true,
        };
        let result = transport.fetch(request, Arc::new(|_| {})).await;
        assert!(matches!(
            result,
            Err(FetchError::Network(_) | FetchError::Timeout)
        ));
    }
}
