//! Cross-checks between a local file header and its central directory record.

use std::io::{Read, Seek, SeekFrom};

use crate::extra_fields::{ExtraField, Zip64Wants, parse_extra_fields};
use crate::result::{ZipResult, malformed};
use crate::spec::{FixedSizeBlock, ZipLocalEntryBlock, flags};
use crate::types::ZipEntryData;

/// The byte range holding an entry's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DataWindow {
    /// Absolute offset of the first payload byte.
    pub start: u64,
    /// Compressed length, including a ZipCrypto header when present.
    pub len: u64,
}

/// Where the local header lives and what may follow it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Placement {
    /// Bytes before the archive content, added to every recorded offset.
    pub base_offset: u64,
    /// No payload may extend past this absolute offset (the start of the central directory).
    pub data_limit: u64,
}

/// Checks that would let a reader walk off into unrelated bytes: signature, version needed,
/// flags and method. Enough before reading an entry, since its CRC and size are verified as
/// the payload is consumed.
pub(crate) fn validate_for_read<R: Read + Seek>(
    reader: &mut R,
    placement: Placement,
    entry: &ZipEntryData,
) -> ZipResult<DataWindow> {
    let (block, header_pos) = read_block(reader, placement, entry)?;
    compare_common_fields(&block, entry)?;
    data_window(&block, header_pos, placement, entry)
}

/// Everything [`validate_for_read`] checks, plus the name and, unless the values were
/// deferred to a data descriptor, the CRC and both sizes.
pub(crate) fn validate_for_integrity<R: Read + Seek>(
    reader: &mut R,
    placement: Placement,
    entry: &ZipEntryData,
) -> ZipResult<DataWindow> {
    let (block, header_pos) = read_block(reader, placement, entry)?;
    compare_common_fields(&block, entry)?;

    let mut name = vec![0u8; block.file_name_length as usize];
    reader.read_exact(&mut name)?;
    let mut extra = vec![0u8; block.extra_field_length as usize];
    reader.read_exact(&mut extra)?;
    if *name != *entry.file_name_raw {
        return mismatch();
    }

    if block.flags & flags::DATA_DESCRIPTOR == 0 {
        let wants = Zip64Wants {
            uncompressed_size: block.uncompressed_size == u32::MAX,
            compressed_size: block.compressed_size == u32::MAX,
            header_start: false,
        };
        let zip64 = parse_extra_fields(&extra, wants)?
            .into_iter()
            .find_map(|field| match field {
                ExtraField::Zip64(info) => Some(info),
                _ => None,
            })
            .unwrap_or_default();
        let compressed_size = zip64
            .compressed_size()
            .unwrap_or(block.compressed_size.into());
        let uncompressed_size = zip64
            .uncompressed_size()
            .unwrap_or(block.uncompressed_size.into());
        if block.crc32 != entry.crc32
            || compressed_size != entry.compressed_size
            || uncompressed_size != entry.uncompressed_size
        {
            return mismatch();
        }
    }

    data_window(&block, header_pos, placement, entry)
}

fn mismatch<T>() -> ZipResult<T> {
    malformed("central/local header mismatch")
}

fn read_block<R: Read + Seek>(
    reader: &mut R,
    placement: Placement,
    entry: &ZipEntryData,
) -> ZipResult<(ZipLocalEntryBlock, u64)> {
    let Some(header_pos) = placement.base_offset.checked_add(entry.header_start) else {
        return malformed("local header offset out of range");
    };
    reader.seek(SeekFrom::Start(header_pos))?;
    let block = ZipLocalEntryBlock::parse(reader)?;
    Ok((block, header_pos))
}

fn compare_common_fields(block: &ZipLocalEntryBlock, entry: &ZipEntryData) -> ZipResult<()> {
    if block.version_needed != entry.version_needed
        || block.flags != entry.flags
        || block.compression_method != entry.compression_method.serialize_to_u16()
    {
        return mismatch();
    }
    Ok(())
}

fn data_window(
    block: &ZipLocalEntryBlock,
    header_pos: u64,
    placement: Placement,
    entry: &ZipEntryData,
) -> ZipResult<DataWindow> {
    let start = header_pos
        + ZipLocalEntryBlock::SIZE as u64
        + block.file_name_length as u64
        + block.extra_field_length as u64;
    match start.checked_add(entry.compressed_size) {
        Some(end) if end <= placement.data_limit => Ok(DataWindow {
            start,
            len: entry.compressed_size,
        }),
        _ => malformed("entry data extends past the central directory"),
    }
}
