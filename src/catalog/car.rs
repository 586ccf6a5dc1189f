//! CoreUI structures stored in the BOM blocks (little-endian)

use std::{
    collections::HashMap,
    fmt,
    io::{self, Cursor, Read},
    str::FromStr,
};

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::FormatError;

/// Four-character code, as read from a little-endian `u32`
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub u32);

impl FourCc {
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(u32::from_be_bytes(*code))
    }

    pub fn read(cur: &mut Cursor<&[u8]>) -> io::Result<Self> {
        cur.read_u32::<LittleEndian>().map(Self)
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.0.to_be_bytes().escape_ascii())
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_be_bytes().escape_ascii())
    }
}

const CAR_HEADER_TAG: FourCc = FourCc::new(b"CTAR");
const KEY_FORMAT_TAG: FourCc = FourCc::new(b"kfmt");

/// `CARHEADER` block
#[derive(Debug, Clone)]
pub struct CarHeader {
    pub coreui_version: u32,
    pub storage_version: u32,
    pub storage_timestamp: u32,
    pub rendition_count: u32,
    pub main_version: String,
    pub version: String,
    pub uuid: [u8; 16],
    pub associated_checksum: u32,
    pub schema_version: u32,
    pub color_space_id: u32,
    pub key_semantics: u32,
}

impl CarHeader {
    pub fn parse(block: &[u8]) -> Result<Self, FormatError> {
        let mut cur = Cursor::new(block);

        let tag = FourCc::read(&mut cur).map_err(|_| FormatError::Truncated("CARHEADER"))?;
        if tag != CAR_HEADER_TAG {
            return Err(FormatError::bad_magic(
                "CARHEADER",
                "RATC",
                block.get(..4).unwrap_or_default(),
            ));
        }

        Self::read(&mut cur).map_err(|_| FormatError::Truncated("CARHEADER"))
    }

    fn read(cur: &mut Cursor<&[u8]>) -> io::Result<Self> {
        let coreui_version = cur.read_u32::<LittleEndian>()?;
        let storage_version = cur.read_u32::<LittleEndian>()?;
        let storage_timestamp = cur.read_u32::<LittleEndian>()?;
        let rendition_count = cur.read_u32::<LittleEndian>()?;
        let main_version = read_fixed_str(cur, 128)?;
        let version = read_fixed_str(cur, 256)?;

        let mut uuid = [0; 16];
        cur.read_exact(&mut uuid)?;

        Ok(Self {
            coreui_version,
            storage_version,
            storage_timestamp,
            rendition_count,
            main_version,
            version,
            uuid,
            associated_checksum: cur.read_u32::<LittleEndian>()?,
            schema_version: cur.read_u32::<LittleEndian>()?,
            color_space_id: cur.read_u32::<LittleEndian>()?,
            key_semantics: cur.read_u32::<LittleEndian>()?,
        })
    }
}

/// Rendition key attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Element,
    Part,
    Size,
    Direction,
    Value,
    Appearance,
    Dimension1,
    Dimension2,
    State,
    Layer,
    Scale,
    PresentationState,
    Idiom,
    Subtype,
    Identifier,
    PreviousValue,
    PreviousState,
    HorizontalSizeClass,
    VerticalSizeClass,
    MemoryClass,
    GraphicsClass,
    DisplayGamut,
    DeploymentTarget,
    Other(u32),
}

impl From<u32> for Attribute {
    fn from(id: u32) -> Self {
        match id {
            1 => Self::Element,
            2 => Self::Part,
            3 => Self::Size,
            4 => Self::Direction,
            6 => Self::Value,
            7 => Self::Appearance,
            8 => Self::Dimension1,
            9 => Self::Dimension2,
            10 => Self::State,
            11 => Self::Layer,
            12 => Self::Scale,
            14 => Self::PresentationState,
            15 => Self::Idiom,
            16 => Self::Subtype,
            17 => Self::Identifier,
            18 => Self::PreviousValue,
            19 => Self::PreviousState,
            20 => Self::HorizontalSizeClass,
            21 => Self::VerticalSizeClass,
            22 => Self::MemoryClass,
            23 => Self::GraphicsClass,
            24 => Self::DisplayGamut,
            25 => Self::DeploymentTarget,
            other => Self::Other(other),
        }
    }
}

/// `KEYFORMAT` block: which attribute each slot of a rendition key holds
#[derive(Debug, Clone)]
pub struct KeyFormat {
    attributes: Vec<Attribute>,
}

impl KeyFormat {
    pub fn parse(block: &[u8]) -> Result<Self, FormatError> {
        let mut cur = Cursor::new(block);

        let tag = FourCc::read(&mut cur).map_err(|_| FormatError::Truncated("KEYFORMAT"))?;
        if tag != KEY_FORMAT_TAG {
            return Err(FormatError::bad_magic(
                "KEYFORMAT",
                "tmfk",
                block.get(..4).unwrap_or_default(),
            ));
        }

        let read = |cur: &mut Cursor<&[u8]>| -> io::Result<Vec<Attribute>> {
            let _version = cur.read_u32::<LittleEndian>()?;
            let count = cur.read_u32::<LittleEndian>()?;
            (0..count)
                .map(|_| cur.read_u32::<LittleEndian>().map(Attribute::from))
                .collect()
        };

        let attributes = read(&mut cur).map_err(|_| FormatError::Truncated("KEYFORMAT"))?;
        Ok(Self { attributes })
    }

    /// Number of `u16` values in a rendition key
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Value of an attribute inside a key, if the format has that attribute
    pub fn value_of(&self, key: &[u16], attribute: Attribute) -> Option<u16> {
        let slot = self.attributes.iter().position(|a| *a == attribute)?;
        key.get(slot).copied()
    }

    /// Decode a raw key (`len()` little-endian `u16` values)
    pub fn read_key(&self, raw: &[u8]) -> Option<Vec<u16>> {
        let raw = raw.get(..self.len() * 2)?;
        Some(
            raw.chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect(),
        )
    }
}

/// Device family a rendition is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Idiom {
    Universal,
    Phone,
    Pad,
    Tv,
    Car,
    Watch,
    Marketing,
    Mac,
    Vision,
    Other(u16),
}

impl Idiom {
    /// Idiom of the platform the crate is compiled for
    pub fn platform_default() -> Self {
        if cfg!(target_os = "ios") {
            Self::Phone
        } else if cfg!(target_os = "tvos") {
            Self::Tv
        } else if cfg!(target_os = "watchos") {
            Self::Watch
        } else if cfg!(target_os = "macos") {
            Self::Mac
        } else {
            Self::Universal
        }
    }

    /// Name used in file name suffixes (`icon~ipad.png`)
    pub fn suffix(&self) -> String {
        match self {
            Self::Universal => "universal".to_owned(),
            Self::Phone => "iphone".to_owned(),
            Self::Pad => "ipad".to_owned(),
            Self::Tv => "tv".to_owned(),
            Self::Car => "carplay".to_owned(),
            Self::Watch => "watch".to_owned(),
            Self::Marketing => "marketing".to_owned(),
            Self::Mac => "mac".to_owned(),
            Self::Vision => "vision".to_owned(),
            Self::Other(id) => format!("idiom{id}"),
        }
    }
}

impl From<u16> for Idiom {
    fn from(id: u16) -> Self {
        match id {
            0 => Self::Universal,
            1 => Self::Phone,
            2 => Self::Pad,
            3 => Self::Tv,
            4 => Self::Car,
            5 => Self::Watch,
            6 => Self::Marketing,
            7 => Self::Mac,
            8 => Self::Vision,
            other => Self::Other(other),
        }
    }
}

impl FromStr for Idiom {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "universal" => Self::Universal,
            "phone" | "iphone" => Self::Phone,
            "pad" | "ipad" => Self::Pad,
            "tv" => Self::Tv,
            "car" | "carplay" => Self::Car,
            "watch" => Self::Watch,
            "marketing" => Self::Marketing,
            "mac" => Self::Mac,
            "vision" => Self::Vision,
            other => return Err(format!("unknown idiom {other:?}")),
        })
    }
}

/// Parse a `FACETKEYS` value: the attributes identifying a named asset.
/// Returns the value of the `Identifier` attribute.
pub fn facet_identifier(value: &[u8]) -> Option<u16> {
    let mut cur = Cursor::new(value);

    let read = |cur: &mut Cursor<&[u8]>| -> io::Result<Option<u16>> {
        let _hot_spot_x = cur.read_u16::<LittleEndian>()?;
        let _hot_spot_y = cur.read_u16::<LittleEndian>()?;
        let count = cur.read_u16::<LittleEndian>()?;

        for _ in 0..count {
            let attribute = cur.read_u16::<LittleEndian>()?;
            let value = cur.read_u16::<LittleEndian>()?;

            if Attribute::from(u32::from(attribute)) == Attribute::Identifier {
                return Ok(Some(value));
            }
        }

        Ok(None)
    };

    read(&mut cur).ok().flatten()
}

/// Build an id → name table out of a names tree (`FACETKEYS` or `APPEARANCEKEYS`)
pub fn name_table<'a>(
    entries: impl Iterator<Item = (&'a [u8], &'a [u8])>,
    id_of: impl Fn(&[u8]) -> Option<u16>,
) -> HashMap<u16, String> {
    let mut table = HashMap::new();

    for (key, value) in entries {
        let Some(id) = id_of(value) else { continue };
        let name = String::from_utf8_lossy(trim_nul(key)).into_owned();

        // First name wins, like the storage order of the tree
        table.entry(id).or_insert(name);
    }

    table
}

/// `APPEARANCEKEYS` values are a bare identifier
pub fn appearance_identifier(value: &[u8]) -> Option<u16> {
    let raw = value.get(..2)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

pub(crate) fn read_fixed_str(cur: &mut Cursor<&[u8]>, len: usize) -> io::Result<String> {
    let mut raw = vec![0; len];
    cur.read_exact(&mut raw)?;
    Ok(String::from_utf8_lossy(trim_nul(&raw)).into_owned())
}

fn trim_nul(raw: &[u8]) -> &[u8] {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    &raw[..end]
}

#[cfg(test)]
mod tests {
    use byteorder::WriteBytesExt;

    use super::*;

    fn key_format(attrs: &[u32]) -> Vec<u8> {
        let mut out = b"tmfk".to_vec();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(attrs.len() as u32).unwrap();
        for a in attrs {
            out.write_u32::<LittleEndian>(*a).unwrap();
        }
        out
    }

    #[test]
    fn four_cc_matches_little_endian_storage() {
        let mut cur = Cursor::new(&b"RATC"[..]);
        assert_eq!(FourCc::read(&mut cur).unwrap(), FourCc::new(b"CTAR"));
        assert_eq!(FourCc::new(b"GA8 ").to_string(), "GA8 ");
    }

    #[test]
    fn reads_car_header() {
        let mut block = b"RATC".to_vec();
        for v in [975u32, 17, 0, 3] {
            block.write_u32::<LittleEndian>(v).unwrap();
        }
        let mut main_version = b"@(#)PROGRAM:CoreUI".to_vec();
        main_version.resize(128, 0);
        block.extend_from_slice(&main_version);
        let mut version = b"IBCocoaTouchImageCatalogTool-10.0".to_vec();
        version.resize(256, 0);
        block.extend_from_slice(&version);
        block.extend_from_slice(&[7; 16]);
        for v in [0u32, 2, 0, 2] {
            block.write_u32::<LittleEndian>(v).unwrap();
        }

        let header = CarHeader::parse(&block).unwrap();
        assert_eq!(header.coreui_version, 975);
        assert_eq!(header.storage_version, 17);
        assert_eq!(header.rendition_count, 3);
        assert_eq!(header.main_version, "@(#)PROGRAM:CoreUI");
        assert_eq!(header.version, "IBCocoaTouchImageCatalogTool-10.0");
        assert_eq!(header.uuid, [7; 16]);
        assert_eq!(header.key_semantics, 2);

        assert!(matches!(
            CarHeader::parse(&block[..200]),
            Err(FormatError::Truncated("CARHEADER"))
        ));
        assert!(matches!(
            CarHeader::parse(b"XXXX"),
            Err(FormatError::BadMagic { .. })
        ));
    }

    #[test]
    fn key_values_follow_the_format() {
        let format = KeyFormat::parse(&key_format(&[12, 15, 17])).unwrap();
        let key = format.read_key(&[2, 0, 1, 0, 42, 0]).unwrap();

        assert_eq!(key, [2, 1, 42]);
        assert_eq!(format.value_of(&key, Attribute::Scale), Some(2));
        assert_eq!(format.value_of(&key, Attribute::Idiom), Some(1));
        assert_eq!(format.value_of(&key, Attribute::Identifier), Some(42));
        assert_eq!(format.value_of(&key, Attribute::Appearance), None);
        assert_eq!(format.read_key(&[2, 0]), None);
    }

    #[test]
    fn facet_identifier_is_found_among_attributes() {
        let mut value = vec![];
        for v in [0u16, 0, 2, 1, 85, 17, 9001] {
            value.write_u16::<LittleEndian>(v).unwrap();
        }
        assert_eq!(facet_identifier(&value), Some(9001));
        assert_eq!(facet_identifier(&value[..8]), None);
    }

    #[test]
    fn idioms_parse_and_suffix() {
        assert_eq!("iPad".parse::<Idiom>(), Ok(Idiom::Pad));
        assert_eq!(Idiom::from(1), Idiom::Phone);
        assert_eq!(Idiom::from(42).suffix(), "idiom42");
        assert!("toaster".parse::<Idiom>().is_err());
    }
}
