//! Compiled asset catalog (`.car`) container
//!
//! A catalog is a `BOMStore` file (see [`bom`]) whose named blocks hold the
//! CoreUI structures: `CARHEADER`, `KEYFORMAT`, the `FACETKEYS` tree mapping
//! asset names to identifiers, the optional `APPEARANCEKEYS` tree and the
//! `RENDITIONS` tree mapping rendition keys to CSI blocks.
//!
//! [`CatalogHandle::open`] parses everything but the renditions themselves;
//! these are described lazily by [`CatalogHandle::renditions`].

pub mod bom;
mod car;
mod enumerate;
mod rendition;

pub use car::{Attribute, CarHeader, FourCc, Idiom, KeyFormat};
pub use enumerate::{EnumerateOptions, Renditions};
pub use rendition::{
    is_packed_asset_name, BitmapFormat, Compression, CsiHeader, Layout, PayloadEncoding,
    Qualifiers, Rect, RenditionDescriptor, SourceKind,
};

use std::{
    collections::HashMap,
    fs::File,
    io,
    ops::Deref,
    path::{Path, PathBuf},
};

use memmap2::Mmap;

use self::{
    bom::BomStore,
    car::{appearance_identifier, facet_identifier, name_table},
    rendition::theme_store_name,
};
use crate::error::{DecodeError, FormatError, ReadError};

/// Bytes of an opened catalog
enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for Backing {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Owned(bytes) => bytes,
        }
    }
}

/// Rendition index: keys stored back to back, `stride` values each
struct RenditionIndex {
    stride: usize,
    keys: Vec<u16>,
    blocks: Vec<u32>,
}

impl RenditionIndex {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn key(&self, entry: usize) -> &[u16] {
        &self.keys[entry * self.stride..(entry + 1) * self.stride]
    }
}

/// An opened catalog and its parsed top-level index
///
/// Read-only; one handle belongs to one read at a time.
pub struct CatalogHandle {
    path: PathBuf,
    bytes: Backing,
    store: BomStore,
    header: CarHeader,
    key_format: KeyFormat,
    facets: HashMap<u16, String>,
    appearances: HashMap<u16, String>,
    index: RenditionIndex,
    by_key: HashMap<Vec<u16>, usize>,
}

impl CatalogHandle {
    /// Open and validate a catalog file
    pub fn open(path: &Path) -> Result<Self, ReadError> {
        let could_not_open = |source: io::Error| ReadError::CouldNotOpenCatalog {
            path: path.to_owned(),
            source,
        };

        let file = File::open(path).map_err(could_not_open)?;
        let metadata = file.metadata().map_err(could_not_open)?;

        if !metadata.is_file() {
            return Err(could_not_open(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }

        let bytes = if metadata.len() == 0 {
            // Empty files cannot be mapped on every platform
            Backing::Owned(vec![])
        } else {
            // SAFETY: the mapping is read-only and private to this handle.
            // Catalogs are not expected to change while they are being read.
            Backing::Mapped(unsafe { Mmap::map(&file) }.map_err(could_not_open)?)
        };

        Self::from_backing(path.to_owned(), bytes)
    }

    /// Parse a catalog that is already in memory
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Result<Self, ReadError> {
        Self::from_backing(path.into(), Backing::Owned(bytes))
    }

    fn from_backing(path: PathBuf, bytes: Backing) -> Result<Self, ReadError> {
        match Self::parse(&bytes) {
            Ok(parts) => Ok(Self::assemble(path, bytes, parts)),
            Err(err) => Err(ReadError::incompatible(path, err, &bytes)),
        }
    }

    fn parse(bytes: &[u8]) -> Result<Parts, FormatError> {
        let store = BomStore::parse(bytes)?;

        let header = CarHeader::parse(store.block(bytes, store.required_var("CARHEADER")?)?)?;
        let key_format = KeyFormat::parse(store.block(bytes, store.required_var("KEYFORMAT")?)?)?;

        let facets = match store.var("FACETKEYS") {
            Some(tree) => name_table(
                resolve_entries(&store, bytes, tree)?.into_iter(),
                facet_identifier,
            ),
            None => HashMap::new(),
        };

        let appearances = match store.var("APPEARANCEKEYS") {
            Some(tree) => name_table(
                resolve_entries(&store, bytes, tree)?.into_iter(),
                appearance_identifier,
            ),
            None => HashMap::new(),
        };

        let renditions = store.tree_entries(bytes, store.required_var("RENDITIONS")?)?;

        let mut index = RenditionIndex {
            stride: key_format.len(),
            // Sized as keys are read: the declared key length is not trusted yet
            keys: Vec::new(),
            blocks: Vec::with_capacity(renditions.len()),
        };

        for entry in renditions {
            let key = store.block(bytes, entry.key)?;
            let key = key_format
                .read_key(key)
                .ok_or(FormatError::Truncated("rendition key"))?;

            index.keys.extend_from_slice(&key);
            index.blocks.push(entry.value);
        }

        Ok(Parts {
            store,
            header,
            key_format,
            facets,
            appearances,
            index,
        })
    }

    fn assemble(path: PathBuf, bytes: Backing, parts: Parts) -> Self {
        let Parts {
            store,
            header,
            key_format,
            facets,
            appearances,
            index,
        } = parts;

        let mut by_key = HashMap::with_capacity(index.len());
        for entry in 0..index.len() {
            by_key.entry(index.key(entry).to_vec()).or_insert(entry);
        }

        Self {
            path,
            bytes,
            store,
            header,
            key_format,
            facets,
            appearances,
            index,
            by_key,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    pub fn key_format(&self) -> &KeyFormat {
        &self.key_format
    }

    /// Number of entries in the rendition tree (images or not)
    pub fn rendition_count(&self) -> usize {
        self.index.len()
    }

    /// Names of the catalog's assets, by identifier
    pub fn facet_names(&self) -> impl Iterator<Item = &str> {
        self.facets.values().map(String::as_str)
    }

    /// Start a new pass over the renditions, in storage order
    pub fn renditions(&self, options: EnumerateOptions) -> Renditions<'_> {
        Renditions::new(self, options)
    }

    /// Describe the rendition stored under `key`, regardless of filters
    pub fn find_rendition(&self, key: &[u16]) -> Option<RenditionDescriptor> {
        let entry = *self.by_key.get(key)?;
        self.describe(entry).ok().flatten()
    }

    /// Payload bytes of a rendition, checked against its declared length
    pub fn payload(&self, desc: &RenditionDescriptor) -> Result<&[u8], DecodeError> {
        desc.payload_offset
            .checked_add(desc.payload_len)
            .and_then(|end| self.bytes.get(desc.payload_offset..end))
            .ok_or_else(|| {
                DecodeError::corrupt(format!(
                    "payload of {} bytes at offset {} runs past the end of the catalog",
                    desc.payload_len, desc.payload_offset
                ))
            })
    }

    /// Describe entry `entry` of the rendition index.
    /// Returns `None` for renditions that are not images.
    fn describe(&self, entry: usize) -> Result<Option<RenditionDescriptor>, FormatError> {
        let key = self.index.key(entry);
        let range = self.store.range(&self.bytes, self.index.blocks[entry])?;
        let block = &self.bytes[range.offset..range.end()];

        let csi = CsiHeader::parse(block)?;

        if !csi.layout.is_image() {
            return Ok(None);
        }

        let facet = self
            .key_format
            .value_of(key, Attribute::Identifier)
            .and_then(|id| self.facets.get(&id));

        let (name, kind) = match facet {
            Some(name) => (name.clone(), SourceKind::Catalog),
            None => (
                theme_store_name(&csi.name).to_owned(),
                SourceKind::ThemeStore,
            ),
        };

        if name.is_empty() {
            return Ok(None);
        }

        let payload_start = csi.payload_offset();
        let available = block.get(payload_start..).unwrap_or_default();
        let encoding = PayloadEncoding::detect(csi.pixel_format, available, &self.key_format);

        let scale = match self.key_format.value_of(key, Attribute::Scale) {
            Some(scale) if scale > 0 => u32::from(scale),
            _ => (csi.scale_factor / 100).max(1),
        };

        let qualifiers = Qualifiers {
            idiom: self
                .key_format
                .value_of(key, Attribute::Idiom)
                .map(Idiom::from)
                .unwrap_or(Idiom::Universal),
            scale,
            appearance: self
                .key_format
                .value_of(key, Attribute::Appearance)
                .filter(|id| *id != 0)
                .map(|id| {
                    self.appearances
                        .get(&id)
                        .cloned()
                        .unwrap_or_else(|| format!("appearance{id}"))
                }),
            subtype: self
                .key_format
                .value_of(key, Attribute::Subtype)
                .unwrap_or(0),
        };

        Ok(Some(RenditionDescriptor {
            index: entry,
            packed: is_packed_asset_name(&name) || csi.layout == Layout::PACKED_IMAGE,
            name,
            kind,
            qualifiers,
            encoding,
            width: csi.width,
            height: csi.height,
            pixel_format: csi.pixel_format,
            key: key.to_vec(),
            payload_offset: range.offset + payload_start,
            payload_len: csi.rendition_length as usize,
        }))
    }
}

struct Parts {
    store: BomStore,
    header: CarHeader,
    key_format: KeyFormat,
    facets: HashMap<u16, String>,
    appearances: HashMap<u16, String>,
    index: RenditionIndex,
}

fn resolve_entries<'a>(
    store: &BomStore,
    bytes: &'a [u8],
    tree: u32,
) -> Result<Vec<(&'a [u8], &'a [u8])>, FormatError> {
    store
        .tree_entries(bytes, tree)?
        .into_iter()
        .map(|entry| Ok((store.block(bytes, entry.key)?, store.block(bytes, entry.value)?)))
        .collect()
}
