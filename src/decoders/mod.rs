mod bitmap;
mod compressed;
mod encoded;
mod rle;
mod svg;

use std::{fmt, io::Cursor, sync::Arc};

use byteorder::{LittleEndian, ReadBytesExt};
use image::RgbaImage;

use crate::{
    catalog::{Compression, PayloadEncoding, Rect},
    error::DecodeError,
};

/// Largest width or height accepted for a decoded image
pub const MAX_DIMENSION: u32 = 16_384;

/// In-memory layout of every decoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit red, green, blue, alpha; not premultiplied
    Rgba8,
}

/// A decoded bitmap, always in [`PixelFormat::Rgba8`]
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    image: RgbaImage,
}

impl DecodedImage {
    /// Wrap straight RGBA8 pixels, checking the buffer matches the dimensions
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, DecodeError> {
        check_dimensions(width, height)?;

        let len = pixels.len();
        RgbaImage::from_raw(width, height, pixels)
            .map(|image| Self { image })
            .ok_or_else(|| {
                DecodeError::corrupt(format!(
                    "{len} bytes of pixels for a {width}x{height} image"
                ))
            })
    }

    pub(crate) fn from_image(image: RgbaImage) -> Result<Self, DecodeError> {
        check_dimensions(image.width(), image.height())?;
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgba8
    }

    /// Row-major RGBA8 pixels
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn as_rgba_image(&self) -> &RgbaImage {
        &self.image
    }

    /// Copy out a rectangle of the image
    pub fn crop(&self, rect: Rect) -> Result<Self, DecodeError> {
        let fits = rect.x.checked_add(rect.width).is_some_and(|r| r <= self.width())
            && rect.y.checked_add(rect.height).is_some_and(|b| b <= self.height());

        if !fits {
            return Err(DecodeError::corrupt(format!(
                "region {}x{}+{}+{} is outside of a {}x{} atlas",
                rect.width,
                rect.height,
                rect.x,
                rect.y,
                self.width(),
                self.height()
            )));
        }

        let view = image::imageops::crop_imm(&self.image, rect.x, rect.y, rect.width, rect.height);
        Self::from_image(view.to_image())
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("pixel_format", &self.pixel_format())
            .finish()
    }
}

/// Source of the atlases internal links point into
pub trait LinkResolver {
    /// Decoded rendition stored under `target`
    fn resolve(&self, target: &[u16]) -> Result<Arc<DecodedImage>, DecodeError>;
}

/// Decode a rendition payload
///
/// `width` and `height` are the dimensions declared by the rendition header;
/// encodings that carry their own dimensions ignore them.
pub fn decode_payload(
    encoding: &PayloadEncoding,
    width: u32,
    height: u32,
    payload: &[u8],
    links: &dyn LinkResolver,
) -> Result<DecodedImage, DecodeError> {
    match encoding {
        PayloadEncoding::Bitmap {
            format,
            compression,
        } => {
            check_dimensions(width, height)?;

            let body = celm_body(payload)?;
            let min_len = width as usize * height as usize * format.bytes_per_pixel();

            let pixels = match compression {
                Compression::None => body.to_vec(),
                Compression::RunLength => rle::expand(body, format.bytes_per_pixel(), min_len)?,
                Compression::Zlib => compressed::inflate_zlib(body, min_len)?,
                Compression::Lzvn | Compression::Lzfse => compressed::decode_lzfse(body, min_len)?,
            };

            bitmap::normalize(*format, &pixels, width, height)
        }

        PayloadEncoding::EncodedImage => encoded::decode(raw_data(payload)?),

        PayloadEncoding::Svg => svg::rasterize(raw_data(payload)?, width, height),

        PayloadEncoding::InternalLink { target, rect } => links.resolve(target)?.crop(*rect),

        PayloadEncoding::Unsupported(what) => Err(DecodeError::unsupported(what.clone())),

        PayloadEncoding::Malformed(what) => Err(DecodeError::corrupt(what.clone())),
    }
}

/// Body of a `RAWD` payload: the bytes of an image file stored verbatim
pub fn raw_data(payload: &[u8]) -> Result<&[u8], DecodeError> {
    let mut cur = Cursor::new(payload);
    let len = cur
        .read_u32::<LittleEndian>()
        .and_then(|_tag| cur.read_u32::<LittleEndian>())
        .and_then(|_version| cur.read_u32::<LittleEndian>())
        .map_err(|_| DecodeError::corrupt("truncated RAWD header"))?;

    body(payload, 12, len as usize, "RAWD")
}

/// Body of a `CELM` payload: the possibly compressed pixels
fn celm_body(payload: &[u8]) -> Result<&[u8], DecodeError> {
    let mut cur = Cursor::new(payload);
    let len = cur
        .read_u32::<LittleEndian>()
        .and_then(|_tag| cur.read_u32::<LittleEndian>())
        .and_then(|_version| cur.read_u32::<LittleEndian>())
        .and_then(|_compression| cur.read_u32::<LittleEndian>())
        .map_err(|_| DecodeError::corrupt("truncated CELM header"))?;

    body(payload, 16, len as usize, "CELM")
}

fn body<'a>(
    payload: &'a [u8],
    start: usize,
    len: usize,
    what: &str,
) -> Result<&'a [u8], DecodeError> {
    start
        .checked_add(len)
        .and_then(|end| payload.get(start..end))
        .ok_or_else(|| {
            DecodeError::corrupt(format!(
                "{what} declares {len} bytes but only {} are available",
                payload.len().saturating_sub(start)
            ))
        })
}

fn check_dimensions(width: u32, height: u32) -> Result<(), DecodeError> {
    if width == 0 || height == 0 {
        return Err(DecodeError::corrupt(format!(
            "empty image ({width}x{height})"
        )));
    }

    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(DecodeError::corrupt(format!(
            "image is too large: {width}x{height} (max {MAX_DIMENSION}x{MAX_DIMENSION})"
        )));
    }

    Ok(())
}
