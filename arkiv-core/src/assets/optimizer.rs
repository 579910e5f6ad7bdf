//! Raster image optimization.
//!
//! Remote images arrive at whatever size the origin serves. Before they are
//! handed to the renderer they are bounded to a print-reasonable width and
//! re-encoded, which caps both PDF size and decode memory. Anything that is
//! not recognizably JPEG or PNG passes through untouched, and any failure
//! returns the original bytes — optimization must never fail a conversion.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tracing::debug;

/// Images wider than this are downscaled to exactly this many pixels.
/// 1240 px covers an A4 content width at ~150 DPI.
pub const MAX_RASTER_WIDTH: u32 = 1240;

const JPEG_QUALITY: u8 = 85;

/// Raster formats the optimizer understands, detected by magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    Jpeg,
    Png,
}

/// Sniff the image format from leading magic bytes.
pub fn sniff_format(bytes: &[u8]) -> Option<RasterFormat> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(RasterFormat::Jpeg)
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some(RasterFormat::Png)
    } else {
        None
    }
}

/// Stateless image optimizer; safe to call concurrently.
pub struct ImageOptimizer;

impl ImageOptimizer {
    /// Bound the pixel width of a raster image.
    ///
    /// Images at or below [`MAX_RASTER_WIDTH`] are returned byte-identical.
    /// Wider images are uniformly downscaled (Lanczos3) so the width becomes
    /// exactly the cap, then re-encoded: JPEG at a fixed quality factor, PNG
    /// losslessly with the alpha channel preserved.
    pub fn optimize(bytes: &[u8]) -> Vec<u8> {
        match Self::try_optimize(bytes) {
            Some(optimized) => optimized,
            None => bytes.to_vec(),
        }
    }

    fn try_optimize(bytes: &[u8]) -> Option<Vec<u8>> {
        let format = sniff_format(bytes)?;
        let img_format = match format {
            RasterFormat::Jpeg => ImageFormat::Jpeg,
            RasterFormat::Png => ImageFormat::Png,
        };
        let decoded = image::load_from_memory_with_format(bytes, img_format).ok()?;

        let (width, height) = (decoded.width(), decoded.height());
        if width <= MAX_RASTER_WIDTH {
            return None;
        }

        let scale = MAX_RASTER_WIDTH as f64 / width as f64;
        let target_height = ((height as f64 * scale).round() as u32).max(1);
        let resized = decoded.resize_exact(MAX_RASTER_WIDTH, target_height, FilterType::Lanczos3);

        let mut out = Vec::new();
        match format {
            RasterFormat::Jpeg => {
                let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
                let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
                rgb.write_with_encoder(encoder).ok()?;
            }
            RasterFormat::Png => {
                let flattened = if decoded.color().has_alpha() {
                    DynamicImage::ImageRgba8(resized.to_rgba8())
                } else {
                    DynamicImage::ImageRgb8(resized.to_rgb8())
                };
                flattened
                    .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
                    .ok()?;
            }
        }

        debug!(
            from_width = width,
            to_width = MAX_RASTER_WIDTH,
            from_bytes = bytes.len(),
            to_bytes = out.len(),
            "image downscaled"
        );
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba, RgbImage, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn rgba_png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, _| {
            Rgba([200, 100, 50, (x % 256) as u8])
        });
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([90, 120, 200]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_with_encoder(JpegEncoder::new_with_quality(&mut out, 90))
            .unwrap();
        out
    }

    fn decoded_dimensions(bytes: &[u8]) -> (u32, u32) {
        let img = image::load_from_memory(bytes).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn test_sniff_format() {
        assert_eq!(sniff_format(&jpeg_bytes(4, 4)), Some(RasterFormat::Jpeg));
        assert_eq!(sniff_format(&png_bytes(4, 4)), Some(RasterFormat::Png));
        assert_eq!(sniff_format(b"GIF89a...."), None);
        assert_eq!(sniff_format(b""), None);
    }

    #[test]
    fn test_small_image_is_byte_identical() {
        let original = png_bytes(800, 600);
        assert_eq!(ImageOptimizer::optimize(&original), original);

        let exactly_at_cap = png_bytes(MAX_RASTER_WIDTH, 10);
        assert_eq!(ImageOptimizer::optimize(&exactly_at_cap), exactly_at_cap);
    }

    #[test]
    fn test_oversized_png_is_downscaled_to_cap() {
        let original = png_bytes(2480, 700);
        let optimized = ImageOptimizer::optimize(&original);
        let (w, h) = decoded_dimensions(&optimized);
        assert_eq!(w, MAX_RASTER_WIDTH);
        // height = round(700 * 1240/2480) = 350
        assert_eq!(h, 350);
    }

    #[test]
    fn test_downscaled_height_is_rounded() {
        let original = png_bytes(3000, 101);
        let optimized = ImageOptimizer::optimize(&original);
        let (w, h) = decoded_dimensions(&optimized);
        assert_eq!(w, MAX_RASTER_WIDTH);
        let expected = ((101f64 * 1240.0 / 3000.0).round()) as u32;
        assert_eq!(h, expected);
    }

    #[test]
    fn test_oversized_jpeg_stays_jpeg() {
        let original = jpeg_bytes(2000, 400);
        let optimized = ImageOptimizer::optimize(&original);
        assert_eq!(sniff_format(&optimized), Some(RasterFormat::Jpeg));
        let (w, h) = decoded_dimensions(&optimized);
        assert_eq!((w, h), (MAX_RASTER_WIDTH, 248));
    }

    #[test]
    fn test_alpha_channel_survives_downscale() {
        let original = rgba_png_bytes(2480, 100);
        let optimized = ImageOptimizer::optimize(&original);
        let img = image::load_from_memory(&optimized).unwrap();
        assert!(img.color().has_alpha());
    }

    #[test]
    fn test_unrecognized_format_passes_through() {
        let not_an_image = b"GIF89a not really an image".to_vec();
        assert_eq!(ImageOptimizer::optimize(&not_an_image), not_an_image);
    }

    #[test]
    fn test_corrupt_image_passes_through() {
        // Valid magic, garbage body: decode fails, original returned.
        let mut corrupt = vec![0x89, 0x50, 0x4E, 0x47];
        corrupt.extend_from_slice(&[0u8; 64]);
        assert_eq!(ImageOptimizer::optimize(&corrupt), corrupt);
    }
}
