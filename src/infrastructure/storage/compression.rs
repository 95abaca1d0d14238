//! Built-in storage codecs.

use std::io::{self, Cursor};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};

use crate::domain::ports::CompressionProvider;

fn invalid_data(error: image::ImageError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, error)
}

fn decode(bytes: &[u8]) -> io::Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(invalid_data)
}

/// Lossless codec: PNG container, byte-exact round trips.
#[derive(Debug, Default, Clone, Copy)]
pub struct LosslessCompression;

impl CompressionProvider for LosslessCompression {
    fn compress(&self, image: &DynamicImage) -> io::Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(invalid_data)?;
        Ok(buffer.into_inner())
    }

    fn decompress(&self, bytes: &[u8]) -> io::Result<DynamicImage> {
        decode(bytes)
    }

    fn extension(&self) -> &'static str {
        "png"
    }

    fn name(&self) -> &'static str {
        "lossless"
    }
}

/// Lossy codec: JPEG at a fixed quality. Alpha channels are flattened to
/// RGB since JPEG has no transparency. Round trips preserve dimensions,
/// not bytes.
#[derive(Debug, Clone, Copy)]
pub struct LossyCompression {
    /// JPEG quality, 1-100.
    pub quality: u8,
}

impl Default for LossyCompression {
    fn default() -> Self {
        Self { quality: 80 }
    }
}

impl LossyCompression {
    /// Creates a lossy codec with the given JPEG quality (1-100).
    #[must_use]
    pub const fn new(quality: u8) -> Self {
        Self { quality }
    }

    fn encode_jpeg(quality: u8, image: &DynamicImage) -> io::Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
        // JPEG cannot carry alpha.
        let flattened = image.to_rgb8();
        encoder.encode_image(&flattened).map_err(invalid_data)?;
        Ok(buffer.into_inner())
    }
}

impl CompressionProvider for LossyCompression {
    fn compress(&self, image: &DynamicImage) -> io::Result<Vec<u8>> {
        Self::encode_jpeg(self.quality, image)
    }

    fn decompress(&self, bytes: &[u8]) -> io::Result<DynamicImage> {
        decode(bytes)
    }

    fn extension(&self) -> &'static str {
        "jpg"
    }

    fn name(&self) -> &'static str {
        "lossy-jpeg"
    }
}

/// Adaptive codec: PNG when the lossless encoding stays under a size
/// threshold, JPEG otherwise. Decoding sniffs the container, so entries
/// written under either branch read back transparently.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveCompression {
    /// Lossless encodings larger than this many bytes fall back to JPEG.
    pub threshold_bytes: usize,
    /// JPEG quality used for the fallback branch.
    pub quality: u8,
}

impl Default for AdaptiveCompression {
    fn default() -> Self {
        Self {
            threshold_bytes: 1024 * 1024,
            quality: 80,
        }
    }
}

impl AdaptiveCompression {
    /// Creates an adaptive codec with the given size threshold.
    #[must_use]
    pub const fn new(threshold_bytes: usize, quality: u8) -> Self {
        Self {
            threshold_bytes,
            quality,
        }
    }
}

impl CompressionProvider for AdaptiveCompression {
    fn compress(&self, image: &DynamicImage) -> io::Result<Vec<u8>> {
        let lossless = LosslessCompression.compress(image)?;
        if lossless.len() <= self.threshold_bytes {
            return Ok(lossless);
        }
        LossyCompression::encode_jpeg(self.quality, image)
    }

    fn decompress(&self, bytes: &[u8]) -> io::Result<DynamicImage> {
        decode(bytes)
    }

    fn extension(&self) -> &'static str {
        "img"
    }

    fn name(&self) -> &'static str {
        "adaptive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let mut buffer = image::RgbaImage::new(width, height);
        for (x, y, pixel) in buffer.enumerate_pixels_mut() {
            *pixel = image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255]);
        }
        DynamicImage::ImageRgba8(buffer)
    }

    #[test]
    fn test_lossless_round_trip_preserves_pixels() {
        let original = gradient(16, 16);
        let bytes = LosslessCompression.compress(&original).unwrap();
        let restored = LosslessCompression.decompress(&bytes).unwrap();
        assert_eq!(restored.to_rgba8(), original.to_rgba8());
    }

    #[test]
    fn test_lossy_round_trip_preserves_dimensions() {
        let original = gradient(20, 10);
        let bytes = LossyCompression::new(75).compress(&original).unwrap();
        let restored = LossyCompression::default().decompress(&bytes).unwrap();
        assert_eq!(restored.width(), 20);
        assert_eq!(restored.height(), 10);
    }

    #[test]
    fn test_adaptive_picks_png_below_threshold() {
        let codec = AdaptiveCompression::new(10 * 1024 * 1024, 80);
        let bytes = codec.compress(&gradient(8, 8)).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn test_adaptive_falls_back_to_jpeg_above_threshold() {
        let codec = AdaptiveCompression::new(8, 80);
        let bytes = codec.compress(&gradient(32, 32)).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let restored = codec.decompress(&bytes).unwrap();
        assert_eq!(restored.width(), 32);
    }
}
