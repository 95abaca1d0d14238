//! Port definition for platform image decoding.

use crate::domain::errors::FetchResult;

/// Decodes raw downloaded bytes into an image.
///
/// Injected once at construction. Decoding is CPU-bound and synchronous;
/// the engine always invokes it on a blocking-task executor, never on the
/// scheduler path.
pub trait ImageDecoder: Send + Sync {
    /// Decodes `bytes` into an image.
    ///
    /// # Errors
    /// Returns [`FetchError::DecodingFailed`](crate::domain::errors::FetchError::DecodingFailed)
    /// if the bytes are not a decodable image.
    fn decode(&self, bytes: &[u8]) -> FetchResult<image::DynamicImage>;
}
