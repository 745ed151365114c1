//! Still-image decoding for the gallery path

use std::path::Path;

use image::RgbImage;
use tracing::debug;

use crate::error::InvalidImageError;

/// Decode an encoded still image (JPEG or PNG) into interleaved RGB.
pub fn decode_image(data: &[u8]) -> Result<RgbImage, InvalidImageError> {
    let decoded = image::load_from_memory(data).map_err(InvalidImageError::Decode)?;
    finish(decoded)
}

/// Decode a still image from disk.
pub fn open_image<P: AsRef<Path>>(path: P) -> Result<RgbImage, InvalidImageError> {
    let decoded = image::open(path.as_ref()).map_err(InvalidImageError::Decode)?;
    finish(decoded)
}

fn finish(decoded: image::DynamicImage) -> Result<RgbImage, InvalidImageError> {
    let rgb = decoded.into_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(InvalidImageError::ZeroArea { width, height });
    }
    debug!(width, height, "decoded still image");
    Ok(rgb)
}
