//! Image decoding seam
//!
//! The core never decodes formats itself; it asks a [`Decoder`]. The shipped
//! [`ImageCrateDecoder`] covers what the `image` crate can read.

use crate::AppError;
use app_fs::ImageFormat;
use image::{imageops, ImageReader, RgbaImage};
use std::path::Path;

/// A decoded image, RGBA8
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self { width, height, pixels }
    }

    /// Bytes held in memory for this image
    pub fn memory_size(&self) -> u64 {
        self.pixels.len() as u64
    }

    /// Downscale so the longest edge is at most `max_edge`, keeping aspect.
    /// Images already small enough are returned unchanged.
    pub fn thumbnail(&self, max_edge: u32) -> Result<DecodedImage, AppError> {
        let (w, h) = fit_within(self.width, self.height, max_edge);
        if (w, h) == (self.width, self.height) {
            return Ok(self.clone());
        }

        let rgba = RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| {
                AppError::UnsupportedFormat(format!(
                    "pixel buffer of {} bytes does not match {}x{} RGBA",
                    self.pixels.len(),
                    self.width,
                    self.height
                ))
            })?;

        let thumb = imageops::thumbnail(&rgba, w, h);
        Ok(DecodedImage::new(w, h, thumb.into_raw()))
    }
}

/// Dimensions scaled to fit a `max_edge` square, never upscaled, never zero
pub fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_edge || longest == 0 {
        return (width, height);
    }

    let scale = max_edge as f64 / longest as f64;
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    (w, h)
}

/// Turns a file into pixels. Called from the main thread for full loads and
/// from thumbnail workers for previews.
pub trait Decoder: Send + Sync {
    fn decode(&self, path: &Path, format: ImageFormat) -> Result<DecodedImage, AppError>;
}

/// Decoder backed by the `image` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateDecoder;

impl Decoder for ImageCrateDecoder {
    fn decode(&self, path: &Path, format: ImageFormat) -> Result<DecodedImage, AppError> {
        if matches!(format, ImageFormat::Dds | ImageFormat::Exr) {
            return Err(AppError::UnsupportedFormat(format.to_string()));
        }

        tracing::debug!("Decoding image: {}", path.display());

        let img = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| AppError::decode(path, e))?;

        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(DecodedImage::new(width, height, rgba.into_raw()))
    }
}
