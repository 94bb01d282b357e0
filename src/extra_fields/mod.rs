//! Types for extra fields
//!
//! The extra data of a header is a chain of `(tag: u16, len: u16, payload)` sub-records.
//! Only a few tags mean anything to this crate; the rest are kept as raw bytes and skipped.

use crate::result::{ZipError, ZipResult};
use crate::spec::LittleEndianReadExt;

mod extended_timestamp;
mod ntfs;
mod zip64_extended_information;

pub use extended_timestamp::ExtendedTimestamp;
pub use ntfs::Ntfs;
pub use zip64_extended_information::Zip64ExtendedInformation;

/// contains one recognized extra field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    /// zip64 extended information
    Zip64(Zip64ExtendedInformation),
    /// extended timestamp, as described in <https://libzip.org/specifications/extrafld.txt>
    ExtendedTimestamp(ExtendedTimestamp),
    /// NTFS file times
    Ntfs(Ntfs),
}

/// Extra field used in this crate
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum UsedExtraField {
    /// ZIP64 extended information extra field
    Zip64ExtendedInfo = 0x0001,
    /// NTFS
    Ntfs = 0x000a,
    /// extended timestamp
    ExtendedTimestamp = 0x5455,
}

impl UsedExtraField {
    pub(crate) const fn to_le_bytes(self) -> [u8; 2] {
        (self as u16).to_le_bytes()
    }

    /// Tags the writer emits itself; callers may not add them as raw extra data.
    pub(crate) const fn is_reserved_for_writing(tag: u16) -> bool {
        tag == UsedExtraField::Zip64ExtendedInfo as u16
            || tag == UsedExtraField::ExtendedTimestamp as u16
    }
}

/// Iterates the `(tag, payload)` sub-records of an extra data block.
///
/// Fewer than four trailing bytes are treated as padding.
#[derive(Debug, Clone)]
pub(crate) struct ExtraFieldIter<'a> {
    data: &'a [u8],
}

impl<'a> ExtraFieldIter<'a> {
    pub(crate) const fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for ExtraFieldIter<'a> {
    type Item = ZipResult<(u16, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < 4 {
            return None;
        }
        let mut header = &self.data[..4];
        let (tag, len) = match (header.read_u16_le(), header.read_u16_le()) {
            (Ok(tag), Ok(len)) => (tag, len as usize),
            _ => return None,
        };
        let rest = &self.data[4..];
        if len > rest.len() {
            self.data = &[];
            return Some(Err(ZipError::MalformedArchive(
                "extra field length exceeds its record".into(),
            )));
        }
        let (payload, rest) = rest.split_at(len);
        self.data = rest;
        Some(Ok((tag, payload)))
    }
}

/// Which 32-bit fields of the owning header hold the `0xFFFFFFFF` sentinel and must be
/// supplied by a zip64 extra field, in the order they appear there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Zip64Wants {
    pub uncompressed_size: bool,
    pub compressed_size: bool,
    pub header_start: bool,
}

/// Decodes the recognized sub-records of an extra data block.
pub(crate) fn parse_extra_fields(data: &[u8], wants: Zip64Wants) -> ZipResult<Vec<ExtraField>> {
    let mut fields = Vec::new();
    for record in ExtraFieldIter::new(data) {
        let (tag, payload) = record?;
        match tag {
            t if t == UsedExtraField::Zip64ExtendedInfo as u16 => {
                fields.push(ExtraField::Zip64(Zip64ExtendedInformation::parse(
                    payload, wants,
                )?));
            }
            t if t == UsedExtraField::ExtendedTimestamp as u16 => {
                fields.push(ExtraField::ExtendedTimestamp(ExtendedTimestamp::parse(
                    payload,
                )?));
            }
            t if t == UsedExtraField::Ntfs as u16 => {
                if let Some(ntfs) = Ntfs::parse(payload)? {
                    fields.push(ExtraField::Ntfs(ntfs));
                }
            }
            _ => {}
        }
    }
    Ok(fields)
}
