use std::{fmt, io, path::PathBuf};

/// Fatal conditions reported through a read's completion callback.
///
/// Each variant maps to a distinct user-facing message; see [`ReadError::code`]
/// for a stable numeric identifier.
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// The file is missing, unreadable or could not be mapped.
    #[error("could not open catalog {}: {source}", path.display())]
    CouldNotOpenCatalog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file opened fine but is not an asset catalog this reader understands.
    #[error("{} is not a compatible asset catalog ({reason})", path.display())]
    IncompatibleCatalog {
        path: PathBuf,
        reason: String,
        /// First bytes of the file, when there were any
        signature: Option<Signature>,
    },

    /// The catalog is valid but no rendition could be turned into an image.
    #[error("no images found in {}", path.display())]
    NoImagesFound { path: PathBuf },

    /// The read was cancelled before it completed.
    #[error("the catalog read was cancelled")]
    Cancelled,
}

impl ReadError {
    /// Numeric identifier of the error kind
    pub fn code(&self) -> u32 {
        match self {
            Self::CouldNotOpenCatalog { .. } => 0,
            Self::IncompatibleCatalog { .. } => 1,
            Self::NoImagesFound { .. } => 2,
            Self::Cancelled => 3,
        }
    }

    pub(crate) fn incompatible(path: impl Into<PathBuf>, err: FormatError, bytes: &[u8]) -> Self {
        Self::IncompatibleCatalog {
            path: path.into(),
            reason: err.to_string(),
            signature: Signature::sniff(bytes),
        }
    }
}

/// Leading bytes of a file, kept for diagnostics when its format is rejected
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 8]);

impl Signature {
    pub(crate) fn sniff(bytes: &[u8]) -> Option<Self> {
        let head = bytes.get(..8)?;
        let mut sig = [0; 8];
        sig.copy_from_slice(head);
        Some(Self(sig))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(\"{}\")", self.0.escape_ascii())
    }
}

/// Structural problems found while parsing the container.
///
/// Always surfaced to callers as [`ReadError::IncompatibleCatalog`] when they
/// happen while opening, and only logged when they affect a single rendition.
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("unexpected end of data while reading {0}")]
    Truncated(&'static str),

    #[error("bad {what} signature: expected {expected:?}, found {found:?}")]
    BadMagic {
        what: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("unsupported {what} version {version}")]
    UnsupportedVersion { what: &'static str, version: u32 },

    #[error("missing `{0}` entry")]
    MissingVariable(&'static str),

    #[error("block {id} is out of bounds")]
    BlockOutOfBounds { id: u32 },

    #[error("tree node {id} was visited twice")]
    TreeCycle { id: u32 },
}

impl FormatError {
    pub(crate) fn bad_magic(what: &'static str, expected: &'static str, found: &[u8]) -> Self {
        Self::BadMagic {
            what,
            expected,
            found: found.escape_ascii().to_string(),
        }
    }
}

/// Failure to turn a single rendition into an image.
///
/// Never fatal to a read: the rendition is dropped and the next candidate of
/// its group is tried.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("unsupported payload encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("corrupt payload: {0}")]
    CorruptPayload(String),

    #[error("failed to decode embedded image: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to rasterize vector payload: {0}")]
    Vector(String),
}

impl DecodeError {
    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedEncoding(msg.into())
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptPayload(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_and_stable() {
        let open = ReadError::CouldNotOpenCatalog {
            path: "a.car".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        let incompatible = ReadError::IncompatibleCatalog {
            path: "a.car".into(),
            reason: "nope".into(),
            signature: None,
        };
        let empty = ReadError::NoImagesFound {
            path: "a.car".into(),
        };

        assert_eq!(open.code(), 0);
        assert_eq!(incompatible.code(), 1);
        assert_eq!(empty.code(), 2);
        assert_eq!(ReadError::Cancelled.code(), 3);
    }

    #[test]
    fn open_error_keeps_io_cause() {
        let err = ReadError::CouldNotOpenCatalog {
            path: "missing.car".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };

        let source = std::error::Error::source(&err).unwrap();
        assert!(source.downcast_ref::<io::Error>().is_some());
        assert!(err.to_string().contains("missing.car"));
    }

    #[test]
    fn signature_needs_eight_bytes() {
        assert_eq!(Signature::sniff(b"BOMSto"), None);
        assert_eq!(
            Signature::sniff(b"BOMStore\0\0\0\x01"),
            Some(Signature(*b"BOMStore"))
        );
        assert_eq!(
            format!("{:?}", Signature(*b"PK\x03\x04abcd")),
            "Signature(\"PK\\x03\\x04abcd\")"
        );
    }
}
