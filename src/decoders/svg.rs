use super::{bitmap::unpremultiply, DecodedImage, MAX_DIMENSION};
use crate::error::DecodeError;

/// Rasterize an SVG document
///
/// Renders at `width`x`height` when the rendition declares a size, at the
/// document's intrinsic size otherwise.
pub fn rasterize(bytes: &[u8], width: u32, height: u32) -> Result<DecodedImage, DecodeError> {
    let options = usvg::Options::default();
    let tree = usvg::Tree::from_data(bytes, &options)
        .map_err(|err| DecodeError::Vector(format!("parse svg tree: {err}")))?;

    let size = tree.size();
    let (width, height) = if width > 0 && height > 0 {
        (width, height)
    } else {
        (to_px(size.width())?, to_px(size.height())?)
    };

    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(DecodeError::Vector(format!(
            "svg raster size too large: {width}x{height}"
        )));
    }

    let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| DecodeError::Vector("failed to allocate svg pixmap".to_owned()))?;

    let sx = (width as f32) / size.width();
    let sy = (height as f32) / size.height();
    let xform = resvg::tiny_skia::Transform::from_scale(sx, sy);

    resvg::render(&tree, xform, &mut pixmap.as_mut());

    let mut rgba = pixmap.take();
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3];
        px[0] = unpremultiply(px[0], a);
        px[1] = unpremultiply(px[1], a);
        px[2] = unpremultiply(px[2], a);
    }

    DecodedImage::from_rgba8(width, height, rgba)
}

fn to_px(v: f32) -> Result<u32, DecodeError> {
    if !v.is_finite() || v <= 0.0 {
        return Err(DecodeError::Vector("svg has invalid width/height".to_owned()));
    }
    Ok((v.ceil() as u32).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &[u8] = br##"<svg xmlns="http://www.w3.org/2000/svg" width="4" height="2">
        <rect x="0" y="0" width="4" height="2" fill="#ff0000"/>
    </svg>"##;

    #[test]
    fn renders_at_intrinsic_size() {
        let image = rasterize(SQUARE, 0, 0).unwrap();
        assert_eq!((image.width(), image.height()), (4, 2));
        assert_eq!(&image.pixels()[..4], [255, 0, 0, 255]);
    }

    #[test]
    fn renders_at_declared_size() {
        let image = rasterize(SQUARE, 8, 4).unwrap();
        assert_eq!((image.width(), image.height()), (8, 4));
    }

    #[test]
    fn invalid_documents_fail() {
        assert!(matches!(
            rasterize(b"<svg", 0, 0),
            Err(DecodeError::Vector(_))
        ));
    }
}
