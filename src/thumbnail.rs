use image::imageops::{self, FilterType};

use crate::{decoders::DecodedImage, settings::ThumbnailSize};

/// Dimensions of `width`x`height` scaled to fit in `bound`, keeping the aspect ratio
///
/// Images that already fit are left untouched. A zero bound counts as one pixel.
pub fn fit_within(width: u32, height: u32, bound: ThumbnailSize) -> (u32, u32) {
    let bound = ThumbnailSize::new(bound.width.max(1), bound.height.max(1));

    if width <= bound.width && height <= bound.height {
        return (width, height);
    }

    let scale = f64::min(
        f64::from(bound.width) / f64::from(width),
        f64::from(bound.height) / f64::from(height),
    );

    let scaled = |v: u32, max: u32| ((f64::from(v) * scale).round() as u32).clamp(1, max);

    (scaled(width, bound.width), scaled(height, bound.height))
}

/// Produce a copy of `image` scaled down to fit in `bound`
pub fn thumbnail(image: &DecodedImage, bound: ThumbnailSize) -> DecodedImage {
    let (width, height) = fit_within(image.width(), image.height(), bound);

    if (width, height) == (image.width(), image.height()) {
        return image.clone();
    }

    let resized = imageops::resize(image.as_rgba_image(), width, height, FilterType::Triangle);

    // Dimensions come from a valid image and are clamped to at least 1
    DecodedImage::from_image(resized).unwrap_or_else(|_| image.clone())
}
