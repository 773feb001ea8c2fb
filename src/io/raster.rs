//! Upload bytes to RGB raster
//!
//! The estimator expects interleaved RGB8. Whatever the container format and
//! pixel layout (grayscale, RGBA, 16-bit), the decoded image is normalized to
//! that layout here.

use image::RgbImage;

pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    Ok(decoded.to_rgb8())
}
