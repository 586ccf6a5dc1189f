use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::catalog::Idiom;

/// Options of a catalog read, fixed for the whole operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Bounding box the thumbnails are scaled into
    pub thumbnail_size: ThumbnailSize,

    /// Keep assets coming from theme stores apart from catalog assets with the same name
    pub distinguish_catalogs_from_theme_stores: bool,

    /// Skip the atlases packed assets are bundled into
    pub ignore_packed_assets: bool,

    /// Idiom preferred when several renditions of an asset have the same scale
    pub preferred_idiom: Idiom,

    /// Attach an `image::RgbaImage` copy of the primary image to each record
    pub attach_bitmap_rep: bool,

    /// Number of threads decoding asset groups (0 = one per logical core, up to 16)
    pub worker_threads: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            thumbnail_size: ThumbnailSize::default(),
            distinguish_catalogs_from_theme_stores: false,
            ignore_packed_assets: false,
            preferred_idiom: Idiom::platform_default(),
            attach_bitmap_rep: false,
            worker_threads: 0,
        }
    }
}

impl ReadOptions {
    /// How many decoding threads to use
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }

        std::thread::available_parallelism()
            .map(|cores| cores.get().min(16))
            .unwrap_or(1)
    }
}

/// Width and height bound, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailSize {
    pub width: u32,
    pub height: u32,
}

impl ThumbnailSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for ThumbnailSize {
    fn default() -> Self {
        Self::new(138, 138)
    }
}

impl fmt::Display for ThumbnailSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for ThumbnailSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;

        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| format!("invalid dimension {v:?}"))
        };

        Ok(Self::new(parse(width)?, parse(height)?))
    }
}
