use super::DecodedImage;
use crate::error::DecodeError;

/// Decode an image file embedded in the catalog (PNG, JPEG)
pub fn decode(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
    let format = image::guess_format(bytes)?;
    let decoded = image::load_from_memory_with_format(bytes, format)?;

    DecodedImage::from_image(decoded.to_rgba8())
}
