//! Image budgeting: fit a user photo into a resolution and byte envelope.
//!
//! The re-encoded output is always JPEG. Decoding or encoding failures never
//! reach the caller; the original bytes are handed back instead.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageEncoder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ImagesConfig;
use crate::error::Result;

/// MIME type of every re-encoded image.
pub const JPEG_MIME: &str = "image/jpeg";

/// Limits applied to the images of one user turn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageBudget {
    /// Images kept from the request; the rest are dropped
    pub max_images: usize,
    /// Pixel count ceiling, in millions
    pub max_megapixels: f64,
    /// Encoded size ceiling per image
    pub max_bytes: usize,
}

impl ImageBudget {
    pub fn new(max_images: usize, max_megapixels: f64, max_bytes: usize) -> Self {
        Self {
            max_images,
            max_megapixels,
            max_bytes,
        }
    }

    /// Cap the image count, e.g. by the caller's entitlement.
    pub fn with_max_images(mut self, max_images: usize) -> Self {
        self.max_images = self.max_images.min(max_images);
        self
    }

    /// `true` when every limit of `self` is at most the matching limit of `other`.
    pub fn fits_within(&self, other: &ImageBudget) -> bool {
        self.max_images <= other.max_images
            && self.max_megapixels <= other.max_megapixels
            && self.max_bytes <= other.max_bytes
    }
}

/// Re-encoded image bytes and their MIME type.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Downscales and recompresses images to fit an [`ImageBudget`].
#[derive(Debug, Clone, Copy)]
pub struct ImageBudgeter {
    high_quality: u8,
    min_quality: u8,
    search_iterations: u32,
}

impl Default for ImageBudgeter {
    fn default() -> Self {
        Self::from_config(&ImagesConfig::default())
    }
}

impl ImageBudgeter {
    pub fn from_config(config: &ImagesConfig) -> Self {
        Self {
            high_quality: config.high_quality.clamp(1, 100),
            min_quality: config.min_quality.clamp(1, 100),
            search_iterations: config.search_iterations,
        }
    }

    /// Fit `data` into `max_megapixels` and `max_bytes`.
    ///
    /// Returns the highest-quality JPEG that fits, or the smallest candidate
    /// tried when none does. The result is never larger than the first
    /// high-quality encode. Undecodable input comes back unchanged.
    pub fn fit(&self, data: &[u8], mime: &str, max_megapixels: f64, max_bytes: usize) -> BudgetedImage {
        match self.try_fit(data, max_megapixels, max_bytes) {
            Ok(bytes) => BudgetedImage {
                bytes,
                mime: JPEG_MIME.to_string(),
            },
            Err(e) => {
                warn!(error = %e, size = data.len(), "Image budgeting failed, sending original");
                BudgetedImage {
                    bytes: data.to_vec(),
                    mime: mime.to_string(),
                }
            }
        }
    }

    fn try_fit(&self, data: &[u8], max_megapixels: f64, max_bytes: usize) -> Result<Vec<u8>> {
        let decoded = image::load_from_memory(data)?;
        let image = downscale(to_encodable(decoded), max_megapixels);

        let first = encode_jpeg(&image, self.high_quality)?;
        if first.len() <= max_bytes {
            return Ok(first);
        }

        let mut smallest = first;
        let mut best_fit: Option<Vec<u8>> = None;
        let mut lo = i32::from(self.min_quality);
        let mut hi = i32::from(self.high_quality);

        for _ in 0..self.search_iterations {
            if lo > hi {
                break;
            }
            let mid = (lo + hi) / 2;
            let candidate = encode_jpeg(&image, mid as u8)?;
            debug!(quality = mid, size = candidate.len(), max_bytes, "JPEG quality probe");
            if candidate.len() <= max_bytes {
                best_fit = Some(candidate);
                lo = mid + 1;
            } else {
                if candidate.len() < smallest.len() {
                    smallest = candidate;
                }
                hi = mid - 1;
            }
        }

        Ok(best_fit.unwrap_or(smallest))
    }
}

/// JPEG takes 8-bit RGB or grayscale only.
fn to_encodable(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => image,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

fn downscale(image: DynamicImage, max_megapixels: f64) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let megapixels = f64::from(width) * f64::from(height) / 1_000_000.0;
    if megapixels <= max_megapixels || max_megapixels <= 0.0 {
        return image;
    }

    let scale = (max_megapixels / megapixels).sqrt();
    let new_width = ((f64::from(width) * scale) as u32).max(1);
    let new_height = ((f64::from(height) * scale) as u32).max(1);
    image.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality).write_image(
        image.as_bytes(),
        image.width(),
        image.height(),
        image.color().into(),
    )?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgba};

    /// Busy RGBA test pattern; noisy enough that JPEG size tracks quality.
    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let v = (x.wrapping_mul(31) ^ y.wrapping_mul(17) ^ x.wrapping_mul(y)) as u8;
            Rgba([v, v.wrapping_mul(3), 255 - v, 200])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn decoded_megapixels(bytes: &[u8]) -> f64 {
        let img = image::load_from_memory(bytes).unwrap();
        f64::from(img.width()) * f64::from(img.height()) / 1_000_000.0
    }

    #[test]
    fn test_generous_budget_returns_first_encode() {
        let data = png_bytes(200, 150);
        let out = ImageBudgeter::default().fit(&data, "image/png", 3.0, 10_000_000);
        assert_eq!(out.mime, JPEG_MIME);
        let naive = encode_jpeg(
            &to_encodable(image::load_from_memory(&data).unwrap()),
            88,
        )
        .unwrap();
        assert_eq!(out.bytes, naive);
    }

    #[test]
    fn test_downscales_to_megapixel_ceiling() {
        let data = png_bytes(1600, 1000);
        let out = ImageBudgeter::default().fit(&data, "image/png", 0.5, 10_000_000);
        assert!(decoded_megapixels(&out.bytes) <= 0.5);
    }

    #[test]
    fn test_tight_budget_fits_or_beats_naive_encode() {
        let data = png_bytes(640, 480);
        let budgeter = ImageBudgeter::default();
        let naive = encode_jpeg(
            &to_encodable(image::load_from_memory(&data).unwrap()),
            88,
        )
        .unwrap();

        for max_bytes in [naive.len() / 2, naive.len() / 4, 1_000] {
            let out = budgeter.fit(&data, "image/png", 3.0, max_bytes);
            assert_eq!(out.mime, JPEG_MIME);
            assert!(out.bytes.len() <= max_bytes || out.bytes.len() <= naive.len());
            assert!(out.bytes.len() <= naive.len());
        }
    }

    #[test]
    fn test_undecodable_input_passes_through() {
        let data = b"definitely not an image".to_vec();
        let out = ImageBudgeter::default().fit(&data, "image/heic", 3.0, 10);
        assert_eq!(out.bytes, data);
        assert_eq!(out.mime, "image/heic");
    }

    #[test]
    fn test_budget_helpers() {
        let primary = ImageBudget::new(4, 3.0, 1_200_000);
        let fallback = ImageBudget::new(1, 2.0, 900_000);
        assert!(fallback.fits_within(&primary));
        assert!(!primary.fits_within(&fallback));
        assert_eq!(primary.with_max_images(2).max_images, 2);
        assert_eq!(fallback.with_max_images(3).max_images, 1);
    }
}
