use super::DecodedImage;
use crate::{catalog::BitmapFormat, error::DecodeError};

/// Convert premultiplied catalog pixels to straight RGBA8
///
/// Rows may be padded: any buffer of `height` equal rows at least
/// `width * bpp` bytes long is accepted.
pub fn normalize(
    format: BitmapFormat,
    raw: &[u8],
    width: u32,
    height: u32,
) -> Result<DecodedImage, DecodeError> {
    let bpp = format.bytes_per_pixel();
    let (width, height) = (width as usize, height as usize);
    let min_row = width * bpp;

    if raw.len() < min_row * height {
        return Err(DecodeError::corrupt(format!(
            "{} bytes of pixels for a {width}x{height} bitmap",
            raw.len()
        )));
    }

    let row_bytes = if raw.len() % height == 0 {
        raw.len() / height
    } else {
        min_row
    };

    let mut rgba = Vec::with_capacity(width * height * 4);

    for row in raw.chunks_exact(row_bytes).take(height) {
        let row = &row[..min_row];

        match format {
            BitmapFormat::Argb => {
                for px in row.chunks_exact(4) {
                    let [b, g, r, a] = [px[0], px[1], px[2], px[3]];
                    rgba.extend_from_slice(&[
                        unpremultiply(r, a),
                        unpremultiply(g, a),
                        unpremultiply(b, a),
                        a,
                    ]);
                }
            }

            BitmapFormat::Ga8 => {
                for px in row.chunks_exact(2) {
                    let gray = unpremultiply(px[0], px[1]);
                    rgba.extend_from_slice(&[gray, gray, gray, px[1]]);
                }
            }
        }
    }

    DecodedImage::from_rgba8(width as u32, height as u32, rgba)
}

/// Undo alpha premultiplication of a single channel
pub fn unpremultiply(channel: u8, alpha: u8) -> u8 {
    match alpha {
        0 => 0,
        255 => channel,
        alpha => {
            let (c, a) = (u16::from(channel), u16::from(alpha));
            ((c * 255 + a / 2) / a).min(255) as u8
        }
    }
}
