//! Read the image assets of compiled asset catalogs (`.car` files)
//!
//! [`CatalogReader`] opens a catalog in the background, decodes the best
//! rendition of every asset and hands the resulting [`AssetImageRecord`]s to a
//! completion callback, while [`ReadProgress`] reports how far it got.

pub mod assembler;
pub mod catalog;
pub mod decoders;
mod error;
mod gap_vec;
mod reader;
mod settings;
pub mod thumbnail;

pub use self::{
    assembler::AssetImageRecord,
    catalog::{Idiom, Qualifiers, SourceKind},
    decoders::{DecodedImage, PixelFormat},
    error::{DecodeError, ReadError, Signature},
    reader::{CatalogReader, ReadHandle, ReadOutcome, ReadProgress, ReadState},
    settings::{ReadOptions, ThumbnailSize},
};
