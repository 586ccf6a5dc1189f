use std::io::{self, Cursor};

use byteorder::{LittleEndian, ReadBytesExt};

use super::car::{read_fixed_str, FourCc, Idiom, KeyFormat};
use crate::error::FormatError;

pub const CSI_HEADER_LEN: usize = 184;

const CSI_TAG: FourCc = FourCc::new(b"CTSI");
const CELM_TAG: FourCc = FourCc::new(b"CELM");
const RAWD_TAG: FourCc = FourCc::new(b"RAWD");
const INLK_TAG: FourCc = FourCc::new(b"INLK");

pub const PIXEL_ARGB: FourCc = FourCc::new(b"ARGB");
pub const PIXEL_GA8: FourCc = FourCc::new(b"GA8 ");
pub const PIXEL_DATA: FourCc = FourCc::new(b"DATA");
pub const PIXEL_JPEG: FourCc = FourCc::new(b"JPEG");
pub const PIXEL_SVG: FourCc = FourCc::new(b"SVG ");
pub const PIXEL_PDF: FourCc = FourCc::new(b"PDF ");

/// Header of a CSI block, the value stored for each rendition key
#[derive(Debug, Clone)]
pub struct CsiHeader {
    pub version: u32,
    pub flags: u32,
    pub width: u32,
    pub height: u32,
    /// Scale factor multiplied by 100
    pub scale_factor: u32,
    pub pixel_format: FourCc,
    pub color_model: u32,
    pub layout: Layout,
    pub name: String,
    pub tlv_length: u32,
    pub rendition_length: u32,
}

impl CsiHeader {
    pub fn parse(block: &[u8]) -> Result<Self, FormatError> {
        let header = block
            .get(..CSI_HEADER_LEN)
            .ok_or(FormatError::Truncated("CSI header"))?;
        let mut cur = Cursor::new(header);

        let tag = FourCc::read(&mut cur).map_err(|_| FormatError::Truncated("CSI header"))?;
        if tag != CSI_TAG {
            return Err(FormatError::bad_magic("CSI", "ISTC", &header[..4]));
        }

        Self::read(&mut cur).map_err(|_| FormatError::Truncated("CSI header"))
    }

    fn read(cur: &mut Cursor<&[u8]>) -> io::Result<Self> {
        let version = cur.read_u32::<LittleEndian>()?;
        let flags = cur.read_u32::<LittleEndian>()?;
        let width = cur.read_u32::<LittleEndian>()?;
        let height = cur.read_u32::<LittleEndian>()?;
        let scale_factor = cur.read_u32::<LittleEndian>()?;
        let pixel_format = FourCc::read(cur)?;
        let color_model = cur.read_u32::<LittleEndian>()?;

        let _mod_time = cur.read_u32::<LittleEndian>()?;
        let layout = Layout(cur.read_u16::<LittleEndian>()?);
        let _zero = cur.read_u16::<LittleEndian>()?;
        let name = read_fixed_str(cur, 128)?;

        let tlv_length = cur.read_u32::<LittleEndian>()?;
        let _unknown = cur.read_u32::<LittleEndian>()?;
        let _zero = cur.read_u32::<LittleEndian>()?;
        let rendition_length = cur.read_u32::<LittleEndian>()?;

        Ok(Self {
            version,
            flags,
            width,
            height,
            scale_factor,
            pixel_format,
            color_model,
            layout,
            name,
            tlv_length,
            rendition_length,
        })
    }

    /// Offset of the rendition payload from the start of the block
    pub fn payload_offset(&self) -> usize {
        CSI_HEADER_LEN + self.tlv_length as usize
    }
}

/// Rendition layout (how CoreUI draws it), used to tell images from other data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout(pub u16);

impl Layout {
    pub const VECTOR: Self = Self(9);
    pub const ONE_PART_FIXED_SIZE: Self = Self(10);
    pub const ANIMATION_FILMSTRIP: Self = Self(50);
    pub const RAW_DATA: Self = Self(1000);
    pub const INTERNAL_REFERENCE: Self = Self(1003);
    pub const PACKED_IMAGE: Self = Self(1004);
    pub const COLOR: Self = Self(1009);

    /// Whether renditions with this layout hold something drawable
    pub fn is_image(&self) -> bool {
        matches!(
            *self,
            Self::VECTOR | Self::RAW_DATA | Self::INTERNAL_REFERENCE | Self::PACKED_IMAGE
        ) || (Self::ONE_PART_FIXED_SIZE.0..=Self::ANIMATION_FILMSTRIP.0).contains(&self.0)
    }
}

/// Uncompressed bitmap layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapFormat {
    /// Premultiplied BGRA, 4 bytes per pixel
    Argb,
    /// Premultiplied gray + alpha, 2 bytes per pixel
    Ga8,
}

impl BitmapFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Argb => 4,
            Self::Ga8 => 2,
        }
    }
}

/// Compression applied to a bitmap payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    RunLength,
    Zlib,
    Lzvn,
    Lzfse,
}

/// Rectangle of an atlas a packed sub-asset occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Declared encoding of a rendition payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// Raw pixels, possibly compressed
    Bitmap {
        format: BitmapFormat,
        compression: Compression,
    },
    /// An image file (PNG, JPEG, ...) stored as is
    EncodedImage,
    /// SVG document, rasterized at the rendition's size
    Svg,
    /// A region of another rendition (a packed atlas)
    InternalLink { target: Vec<u16>, rect: Rect },
    /// Known or unknown encoding this reader cannot decode
    Unsupported(String),
    /// Payload header could not be read
    Malformed(String),
}

impl PayloadEncoding {
    /// Work out the encoding from the pixel format and the payload's first bytes
    pub fn detect(pixel_format: FourCc, payload: &[u8], key_format: &KeyFormat) -> Self {
        let mut cur = Cursor::new(payload);

        let Ok(tag) = FourCc::read(&mut cur) else {
            return Self::Malformed("payload is shorter than its header".to_owned());
        };

        match tag {
            CELM_TAG => {
                let compression = cur
                    .read_u32::<LittleEndian>()
                    .and_then(|_version| cur.read_u32::<LittleEndian>());

                let Ok(compression) = compression else {
                    return Self::Malformed("truncated CELM header".to_owned());
                };

                let format = match pixel_format {
                    PIXEL_ARGB => BitmapFormat::Argb,
                    PIXEL_GA8 => BitmapFormat::Ga8,
                    other => return Self::Unsupported(format!("{other:?} pixels")),
                };

                let compression = match compression {
                    0 => Compression::None,
                    1 => Compression::RunLength,
                    2 => Compression::Zlib,
                    3 => Compression::Lzvn,
                    4 => Compression::Lzfse,
                    5 => return Self::Unsupported("JPEG+LZFSE".to_owned()),
                    6 => return Self::Unsupported("blurred image".to_owned()),
                    7 => return Self::Unsupported("ASTC".to_owned()),
                    8 => return Self::Unsupported("palette image".to_owned()),
                    9 => return Self::Unsupported("HEVC".to_owned()),
                    10 | 11 => return Self::Unsupported("deepmap".to_owned()),
                    other => return Self::Unsupported(format!("compression {other}")),
                };

                Self::Bitmap {
                    format,
                    compression,
                }
            }

            RAWD_TAG => match pixel_format {
                PIXEL_SVG => Self::Svg,
                PIXEL_PDF => Self::Unsupported("PDF".to_owned()),
                _ => Self::EncodedImage,
            },

            INLK_TAG => match read_internal_link(&mut cur, key_format) {
                Ok(Some((target, rect))) => Self::InternalLink { target, rect },
                Ok(None) | Err(_) => Self::Malformed("truncated INLK header".to_owned()),
            },

            other => Self::Unsupported(format!("payload tag {other:?}")),
        }
    }
}

fn read_internal_link(
    cur: &mut Cursor<&[u8]>,
    key_format: &KeyFormat,
) -> io::Result<Option<(Vec<u16>, Rect)>> {
    let _version = cur.read_u32::<LittleEndian>()?;
    let rect = Rect {
        x: cur.read_u32::<LittleEndian>()?,
        y: cur.read_u32::<LittleEndian>()?,
        width: cur.read_u32::<LittleEndian>()?,
        height: cur.read_u32::<LittleEndian>()?,
    };
    let _layout = cur.read_u16::<LittleEndian>()?;
    let key_len = cur.read_u32::<LittleEndian>()? as usize;

    let start = cur.position() as usize;
    let raw = cur.get_ref();
    let Some(raw_key) = start
        .checked_add(key_len)
        .and_then(|end| raw.get(start..end))
    else {
        return Ok(None);
    };

    Ok(key_format.read_key(raw_key).map(|key| (key, rect)))
}

/// Where a descriptor's logical name came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    /// Named through the catalog's facet table
    Catalog,
    /// Only named by its CSI header, like theme store artwork
    ThemeStore,
}

/// Variant qualifiers of a rendition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qualifiers {
    pub idiom: Idiom,
    /// Integral scale factor (1, 2, 3...)
    pub scale: u32,
    pub appearance: Option<String>,
    pub subtype: u16,
}

/// One stored rendition, as yielded by enumeration
#[derive(Debug, Clone)]
pub struct RenditionDescriptor {
    /// Position in the container's storage order
    pub index: usize,
    pub name: String,
    pub kind: SourceKind,
    pub packed: bool,
    pub qualifiers: Qualifiers,
    pub encoding: PayloadEncoding,
    pub width: u32,
    pub height: u32,
    pub pixel_format: FourCc,
    /// Rendition key, in the catalog's key format
    pub key: Vec<u16>,
    /// Absolute offset of the payload in the container
    pub payload_offset: usize,
    /// Declared payload length
    pub payload_len: usize,
}

/// Prefixes of the atlases packed assets are bundled into
pub const PACKED_ASSET_PREFIXES: &[&str] = &["ZZZZPackedAsset", "ZZZZExplicitlyPackedAsset"];

pub fn is_packed_asset_name(name: &str) -> bool {
    PACKED_ASSET_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Logical name of a rendition that only has a CSI file name
/// (`button@2x~ipad.png` → `button`)
pub fn theme_store_name(file_name: &str) -> &str {
    let stem = match file_name.rfind('.') {
        Some(dot) if dot > 0 => &file_name[..dot],
        _ => file_name,
    };

    let stem = stem.split('~').next().unwrap_or(stem);

    match stem.rfind('@') {
        Some(at)
            if at > 0
                && stem[at + 1..].ends_with('x')
                && stem[at + 1..stem.len() - 1]
                    .chars()
                    .all(|c| c.is_ascii_digit())
                && stem.len() > at + 2 =>
        {
            &stem[..at]
        }
        _ => stem,
    }
}
