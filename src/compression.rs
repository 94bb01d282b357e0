//! Possible ZIP compression methods.

use std::fmt;

/// Identifies the storage format used to compress a file within a ZIP archive.
///
/// Only [`Stored`](CompressionMethod::Stored) and [`Deflated`](CompressionMethod::Deflated)
/// payloads can be read or written; every other method id found in an archive is kept as
/// [`Unsupported`](CompressionMethod::Unsupported) so the entry can still be listed.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[non_exhaustive]
pub enum CompressionMethod {
    /// Store the file as is
    Stored,
    /// Compress the file using Deflate
    Deflated,
    /// Any other method id
    Unsupported(u16),
}

impl CompressionMethod {
    pub(crate) const STORE: u16 = 0;
    pub(crate) const DEFLATE: u16 = 8;
    /// Marker written by WinZip for AES-encrypted entries.
    pub(crate) const AES: u16 = 99;

    /// Converts a method id read from a header.
    pub const fn parse_from_u16(val: u16) -> Self {
        match val {
            Self::STORE => CompressionMethod::Stored,
            Self::DEFLATE => CompressionMethod::Deflated,
            v => CompressionMethod::Unsupported(v),
        }
    }

    /// Converts to the id stored in headers.
    pub const fn serialize_to_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => Self::STORE,
            CompressionMethod::Deflated => Self::DEFLATE,
            CompressionMethod::Unsupported(v) => v,
        }
    }

    pub(crate) const fn is_supported(self) -> bool {
        !matches!(self, CompressionMethod::Unsupported(_))
    }
}

impl Default for CompressionMethod {
    fn default() -> Self {
        CompressionMethod::Deflated
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionMethod::Stored => f.write_str("Stored"),
            CompressionMethod::Deflated => f.write_str("Deflated"),
            CompressionMethod::Unsupported(v) => write!(f, "Unsupported({v})"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::CompressionMethod;

    #[test]
    fn from_eq_to() {
        for v in 0..=u16::MAX {
            let from = CompressionMethod::parse_from_u16(v);
            assert_eq!(from.serialize_to_u16(), v);
        }
    }

    #[test]
    fn known_ids() {
        assert_eq!(
            CompressionMethod::parse_from_u16(0),
            CompressionMethod::Stored
        );
        assert_eq!(
            CompressionMethod::parse_from_u16(8),
            CompressionMethod::Deflated
        );
        assert!(!CompressionMethod::parse_from_u16(12).is_supported());
        assert_eq!(
            CompressionMethod::parse_from_u16(14).to_string(),
            "Unsupported(14)"
        );
    }
}
