use std::{
    cmp::Reverse,
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use image::RgbaImage;
use tracing::debug;

use crate::{
    catalog::{
        CatalogHandle, Idiom, PayloadEncoding, Qualifiers, RenditionDescriptor, SourceKind,
    },
    decoders::{decode_payload, raw_data, DecodedImage, LinkResolver},
    error::DecodeError,
    settings::ReadOptions,
    thumbnail::thumbnail,
};

/// One asset extracted from a catalog
#[derive(Debug, Clone)]
pub struct AssetImageRecord {
    /// Name of the asset
    pub name: String,
    /// Best rendition of the asset
    pub image: DecodedImage,
    /// Smaller version of `image`, fitting in the requested thumbnail size
    pub thumbnail: DecodedImage,
    /// Suggested file name when exporting the asset
    pub filename: String,
    /// Deprecated: encoded image file, only present when the catalog stored
    /// the rendition as one
    pub raw_encoded_data: Option<Vec<u8>>,
    /// Bitmap representation of `image`, when requested by the read options
    pub image_rep: Option<RgbaImage>,
    /// Whether the asset comes from the catalog's named assets or theme store artwork
    pub kind: SourceKind,
    /// Qualifiers of the rendition `image` was decoded from
    pub qualifiers: Qualifiers,
}

/// Renditions sharing a logical name
#[derive(Debug, Clone)]
pub struct AssetGroup {
    pub name: String,
    pub kind: SourceKind,
    /// In enumeration order
    pub renditions: Vec<RenditionDescriptor>,
}

impl AssetGroup {
    /// Renditions from best to worst candidate for the primary image:
    /// highest scale, then preferred idiom, then universal, then storage order
    pub fn ranked(&self, preferred_idiom: Idiom) -> Vec<&RenditionDescriptor> {
        let idiom_rank = |idiom: Idiom| match idiom {
            idiom if idiom == preferred_idiom => 0,
            Idiom::Universal => 1,
            _ => 2,
        };

        let mut ranked = self.renditions.iter().collect::<Vec<_>>();
        ranked.sort_by_key(|desc| {
            (
                Reverse(desc.qualifiers.scale),
                idiom_rank(desc.qualifiers.idiom),
                desc.index,
            )
        });
        ranked
    }

    /// File name for `chosen`, a rendition of this group
    ///
    /// Scale and idiom suffixes are only added when the group has renditions
    /// that differ in them.
    pub fn suggested_filename(&self, chosen: &RenditionDescriptor) -> String {
        let scales = self
            .renditions
            .iter()
            .map(|desc| desc.qualifiers.scale)
            .collect::<HashSet<_>>();
        let idioms = self
            .renditions
            .iter()
            .map(|desc| desc.qualifiers.idiom)
            .collect::<HashSet<_>>();

        let mut filename = sanitize_file_name(&self.name);

        if scales.len() > 1 && chosen.qualifiers.scale > 1 {
            filename.push_str(&format!("@{}x", chosen.qualifiers.scale));
        }

        if idioms.len() > 1 && chosen.qualifiers.idiom != Idiom::Universal {
            filename.push('~');
            filename.push_str(&chosen.qualifiers.idiom.suffix());
        }

        filename.push_str(".png");
        filename
    }
}

/// Group descriptors by name (and source kind, when `distinguish_kinds` is set)
///
/// Groups are returned in the order their first rendition was enumerated.
pub fn group_renditions(
    descriptors: impl IntoIterator<Item = RenditionDescriptor>,
    distinguish_kinds: bool,
) -> Vec<AssetGroup> {
    let mut groups: Vec<AssetGroup> = vec![];
    let mut positions = HashMap::<(String, Option<SourceKind>), usize>::new();

    for desc in descriptors {
        let key = (desc.name.clone(), distinguish_kinds.then_some(desc.kind));

        match positions.get(&key) {
            Some(&pos) => groups[pos].renditions.push(desc),
            None => {
                positions.insert(key, groups.len());
                groups.push(AssetGroup {
                    name: desc.name.clone(),
                    kind: desc.kind,
                    renditions: vec![desc],
                });
            }
        }
    }

    groups
}

/// Replace characters that are not allowed in file names
pub fn sanitize_file_name(name: &str) -> String {
    let sanitized = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "unnamed".to_owned()
    } else {
        sanitized
    }
}

/// Make suggested file names unique across records by numbering repeats
pub fn dedupe_filenames(records: &mut [AssetImageRecord]) {
    let mut seen = HashSet::new();

    for record in records {
        if seen.insert(record.filename.to_lowercase()) {
            continue;
        }

        let (stem, ext) = match record.filename.rsplit_once('.') {
            Some((stem, ext)) => (stem.to_owned(), format!(".{ext}")),
            None => (record.filename.clone(), String::new()),
        };

        let mut n = 2;
        let renamed = loop {
            let candidate = format!("{stem}-{n}{ext}");
            if seen.insert(candidate.to_lowercase()) {
                break candidate;
            }
            n += 1;
        };

        record.filename = renamed;
    }
}

/// Turns asset groups into records, decoding renditions from one catalog
pub struct Assembler<'a> {
    handle: &'a CatalogHandle,
    options: &'a ReadOptions,
    cancelled: &'a AtomicBool,
    atlases: Mutex<HashMap<Vec<u16>, Arc<DecodedImage>>>,
}

impl<'a> Assembler<'a> {
    pub fn new(handle: &'a CatalogHandle, options: &'a ReadOptions, cancelled: &'a AtomicBool) -> Self {
        Self {
            handle,
            options,
            cancelled,
            atlases: Mutex::new(HashMap::new()),
        }
    }

    /// Build the record of a group, trying its renditions from best to worst.
    /// Returns `None` when none of them can be decoded, or when the read is cancelled.
    pub fn assemble(&self, group: &AssetGroup) -> Option<AssetImageRecord> {
        // Best rendition first, the next one is only tried if decoding fails
        for desc in group.ranked(self.options.preferred_idiom) {
            if self.cancelled.load(Ordering::Acquire) {
                return None;
            }

            match self.decode(desc) {
                Ok(image) => return Some(self.package(group, desc, image)),
                Err(err) => debug!(
                    name = %group.name,
                    rendition = desc.index,
                    %err,
                    "skipping rendition that could not be decoded"
                ),
            }
        }

        debug!(name = %group.name, "asset has no decodable rendition");
        None
    }

    fn decode(&self, desc: &RenditionDescriptor) -> Result<DecodedImage, DecodeError> {
        let payload = self.handle.payload(desc)?;
        decode_payload(&desc.encoding, desc.width, desc.height, payload, self)
    }

    fn package(
        &self,
        group: &AssetGroup,
        desc: &RenditionDescriptor,
        image: DecodedImage,
    ) -> AssetImageRecord {
        let raw_encoded_data = match desc.encoding {
            PayloadEncoding::EncodedImage => self
                .handle
                .payload(desc)
                .and_then(raw_data)
                .ok()
                .map(<[u8]>::to_vec),
            _ => None,
        };

        AssetImageRecord {
            name: group.name.clone(),
            thumbnail: thumbnail(&image, self.options.thumbnail_size),
            filename: group.suggested_filename(desc),
            raw_encoded_data,
            image_rep: self
                .options
                .attach_bitmap_rep
                .then(|| image.as_rgba_image().clone()),
            image,
            kind: group.kind,
            qualifiers: desc.qualifiers.clone(),
        }
    }
}

impl LinkResolver for Assembler<'_> {
    fn resolve(&self, target: &[u16]) -> Result<Arc<DecodedImage>, DecodeError> {
        // Atlases are decoded once per read and shared by every link into them
        if let Some(atlas) = self
            .atlases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
        {
            return Ok(Arc::clone(atlas));
        }

        let desc = self
            .handle
            .find_rendition(target)
            .ok_or_else(|| DecodeError::corrupt(format!("link target {target:?} not found")))?;

        let payload = self.handle.payload(&desc)?;
        let atlas = Arc::new(decode_payload(
            &desc.encoding,
            desc.width,
            desc.height,
            payload,
            &NoNestedLinks,
        )?);

        // Two workers may decode the same atlas at once, the last one wins
        self.atlases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.to_vec(), Arc::clone(&atlas));

        Ok(atlas)
    }
}

/// Atlases are plain images; a link pointing to another link is rejected
struct NoNestedLinks;

impl LinkResolver for NoNestedLinks {
    fn resolve(&self, target: &[u16]) -> Result<Arc<DecodedImage>, DecodeError> {
        Err(DecodeError::corrupt(format!(
            "link target {target:?} is itself a link"
        )))
    }
}
