use std::path::PathBuf;

use carreader::{Idiom, ReadOptions, ThumbnailSize};
use clap::Parser;

#[derive(Parser)]
#[clap(about = "List the image assets of a compiled asset catalog")]
pub struct Args {
    #[clap(help = "Path to the catalog (.car) to read")]
    pub path: PathBuf,

    #[clap(long, help = "Extract at most this many assets")]
    pub max: Option<usize>,

    #[clap(long, default_value_t = ThumbnailSize::default(), help = "Thumbnail bounding box, as WIDTHxHEIGHT")]
    pub thumb: ThumbnailSize,

    #[clap(long, help = "Keep theme store assets apart from catalog assets with the same name")]
    pub distinguish_theme_stores: bool,

    #[clap(long, help = "Skip the atlases packed assets are bundled into")]
    pub ignore_packed: bool,

    #[clap(long, help = "Idiom to prefer between renditions of the same scale (e.g. phone, pad, mac)")]
    pub idiom: Option<Idiom>,

    #[clap(long, help = "Number of decoding threads (default: one per core)")]
    pub threads: Option<usize>,
}

impl Args {
    pub fn read_options(&self) -> ReadOptions {
        let defaults = ReadOptions::default();

        ReadOptions {
            thumbnail_size: self.thumb,
            distinguish_catalogs_from_theme_stores: self.distinguish_theme_stores,
            ignore_packed_assets: self.ignore_packed,
            preferred_idiom: self.idiom.unwrap_or(defaults.preferred_idiom),
            worker_threads: self.threads.unwrap_or(defaults.worker_threads),
            ..defaults
        }
    }
}
