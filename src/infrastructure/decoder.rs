//! Default image decoder backed by the `image` crate.

use crate::domain::errors::{FetchError, FetchResult};
use crate::domain::ports::ImageDecoder;

/// Decodes bytes with format sniffing via [`image::load_from_memory`].
///
/// Handles every format the enabled `image` features support (PNG, JPEG,
/// WebP).
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDecoder;

impl ImageDecoder for DefaultDecoder {
    fn decode(&self, bytes: &[u8]) -> FetchResult<image::DynamicImage> {
        image::load_from_memory(bytes).map_err(|e| FetchError::DecodingFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::png_bytes;

    #[test]
    fn test_decodes_png() {
        let decoder = DefaultDecoder;
        let image = decoder.decode(&png_bytes(3, 5)).unwrap();
        assert_eq!(image.width(), 3);
        assert_eq!(image.height(), 5);
    }

    #[test]
    fn test_rejects_garbage() {
        let decoder = DefaultDecoder;
        let result = decoder.decode(b"definitely not an image");
        assert!(matches!(result, Err(FetchError::DecodingFailed(_))));
    }
}
