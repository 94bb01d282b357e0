//! 4.5.3 -Zip64 Extended Information Extra Field (0x0001)
//!
//! | Value                  | Size    | Description                                  |
//! | ---------------------- | ------- | -------------------------------------------- |
//! | `0x0001`               | 2 bytes | Tag for this "extra" block type              |
//! | Size                   | 2 bytes | Size of this "extra" block                   |
//! | Original Size          | 8 bytes | Original uncompressed file size              |
//! | Compressed Size        | 8 bytes | Size of compressed data                      |
//! | Relative Header Offset | 8 bytes | Offset of local header record                |
//! | Disk Start Number      | 4 bytes | Number of the disk on which this file starts |
//!
//! A field is only present when the matching 32-bit field of the header holds `0xFFFFFFFF`.

use crate::extra_fields::{UsedExtraField, Zip64Wants};
use crate::result::{ZipResult, malformed};
use crate::spec::{LittleEndianReadExt, ZIP64_BYTES_THR};

/// Zip64 extended information extra field
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Zip64ExtendedInformation {
    uncompressed_size: Option<u64>,
    compressed_size: Option<u64>,
    header_start: Option<u64>,
}

impl Zip64ExtendedInformation {
    pub(crate) fn parse(payload: &[u8], wants: Zip64Wants) -> ZipResult<Self> {
        let mut reader = payload;
        let mut take = |wanted: bool| -> ZipResult<Option<u64>> {
            if !wanted {
                return Ok(None);
            }
            if reader.len() < 8 {
                return malformed("zip64 extended information field is truncated");
            }
            Ok(Some(reader.read_u64_le()?))
        };
        Ok(Self {
            uncompressed_size: take(wants.uncompressed_size)?,
            compressed_size: take(wants.compressed_size)?,
            header_start: take(wants.header_start)?,
        })
    }

    /// A local header copy always carries both sizes.
    pub(crate) fn serialize_local(uncompressed_size: u64, compressed_size: u64) -> [u8; 20] {
        let mut out = [0u8; 20];
        out[..2].copy_from_slice(&UsedExtraField::Zip64ExtendedInfo.to_le_bytes());
        out[2..4].copy_from_slice(&16u16.to_le_bytes());
        out[4..12].copy_from_slice(&uncompressed_size.to_le_bytes());
        out[12..].copy_from_slice(&compressed_size.to_le_bytes());
        out
    }

    /// The central directory copy carries only the values that overflow; `None` if none do.
    pub(crate) fn serialize_central(
        uncompressed_size: u64,
        compressed_size: u64,
        header_start: u64,
    ) -> Option<Vec<u8>> {
        let values: Vec<u64> = [uncompressed_size, compressed_size, header_start]
            .into_iter()
            .filter(|&v| v >= ZIP64_BYTES_THR)
            .collect();
        if values.is_empty() {
            return None;
        }
        let mut out = Vec::with_capacity(4 + 8 * values.len());
        out.extend(UsedExtraField::Zip64ExtendedInfo.to_le_bytes());
        out.extend((8 * values.len() as u16).to_le_bytes());
        for v in values {
            out.extend(v.to_le_bytes());
        }
        Some(out)
    }

    /// 64-bit uncompressed size, if the header needed it
    pub fn uncompressed_size(&self) -> Option<u64> {
        self.uncompressed_size
    }

    /// 64-bit compressed size, if the header needed it
    pub fn compressed_size(&self) -> Option<u64> {
        self.compressed_size
    }

    /// 64-bit local header offset, if the header needed it
    pub fn header_start(&self) -> Option<u64> {
        self.header_start
    }
}
