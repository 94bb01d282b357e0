//! Wire-level records of the ZIP format and the little-endian primitives used to encode them.

use crate::result::{ZipError, ZipResult, malformed};
use std::io::{self, Read, Write};

pub(crate) type Magic = u32;

pub(crate) const LOCAL_FILE_HEADER_SIGNATURE: Magic = 0x04034b50;
pub(crate) const CENTRAL_DIRECTORY_HEADER_SIGNATURE: Magic = 0x02014b50;
pub(crate) const CENTRAL_DIRECTORY_END_SIGNATURE: Magic = 0x06054b50;
pub(crate) const ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE: Magic = 0x06064b50;
pub(crate) const ZIP64_CENTRAL_DIRECTORY_END_LOCATOR_SIGNATURE: Magic = 0x07064b50;
pub(crate) const DATA_DESCRIPTOR_SIGNATURE: Magic = 0x08074b50;
/// Written at the very start of an archive that was split across several volumes.
pub(crate) const SPLIT_ARCHIVE_SIGNATURE: Magic = DATA_DESCRIPTOR_SIGNATURE;
/// Written at the very start of a single-volume archive produced by a spanning writer.
pub(crate) const SPANNED_NO_SPLIT_SIGNATURE: Magic = 0x30304b50;

/// Values at or above this threshold don't fit in a 32-bit field and need a zip64 record.
pub const ZIP64_BYTES_THR: u64 = u32::MAX as u64;
/// Entry counts at or above this threshold don't fit in a 16-bit field.
pub const ZIP64_ENTRY_THR: usize = u16::MAX as usize;

/// Byte offset of the CRC-32 field inside a local file header.
pub(crate) const LOCAL_HEADER_CRC_OFFSET: u64 = 14;

/// General purpose flag bits.
pub(crate) mod flags {
    pub(crate) const ENCRYPTED: u16 = 1 << 0;
    /// Bits 1-2 carry the deflate sub-option.
    pub(crate) const DEFLATE_OPTION_MASK: u16 = 0b110;
    pub(crate) const DATA_DESCRIPTOR: u16 = 1 << 3;
    pub(crate) const STRONG_ENCRYPTION: u16 = 1 << 6;
    pub(crate) const UTF8: u16 = 1 << 11;
    pub(crate) const MASKED_HEADER: u16 = 1 << 13;
}

/// Little-endian integer reads that fail with `UnexpectedEof` on short input.
pub(crate) trait LittleEndianReadExt: Read {
    /// Reads a `u16` stored little-endian.
    fn read_u16_le(&mut self) -> io::Result<u16> {
        let mut bytes = [0u8; 2];
        self.read_exact(&mut bytes)?;
        Ok(u16::from_le_bytes(bytes))
    }

    /// Reads a `u32` stored little-endian.
    fn read_u32_le(&mut self) -> io::Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Reads a `u64` stored little-endian.
    fn read_u64_le(&mut self) -> io::Result<u64> {
        let mut bytes = [0u8; 8];
        self.read_exact(&mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }
}

impl<R: Read + ?Sized> LittleEndianReadExt for R {}

/// Little-endian counterparts of [`LittleEndianReadExt`].
pub(crate) trait LittleEndianWriteExt: Write {
    /// Writes a `u16` little-endian.
    fn write_u16_le(&mut self, value: u16) -> io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    /// Writes a `u32` little-endian.
    fn write_u32_le(&mut self, value: u32) -> io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    /// Writes a `u64` little-endian.
    fn write_u64_le(&mut self, value: u64) -> io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }
}

impl<W: Write + ?Sized> LittleEndianWriteExt for W {}

/// A fixed-size record introduced by a 4-byte signature.
pub(crate) trait FixedSizeBlock: Sized {
    const MAGIC: Magic;
    /// Total encoded length including the signature.
    const SIZE: usize;
    const WRONG_MAGIC_ERROR: &'static str;

    /// Decodes the fields that follow the signature.
    fn decode_fields(reader: &mut &[u8]) -> io::Result<Self>;

    /// Appends the fields that follow the signature.
    fn encode_fields(&self, out: &mut Vec<u8>);

    fn interpret(block: &[u8]) -> ZipResult<Self> {
        let mut reader = block;
        if reader.read_u32_le()? != Self::MAGIC {
            return malformed(Self::WRONG_MAGIC_ERROR);
        }
        Ok(Self::decode_fields(&mut reader)?)
    }

    fn parse<R: Read + ?Sized>(reader: &mut R) -> ZipResult<Self> {
        let mut block = [0u8; 64];
        let block = &mut block[..Self::SIZE];
        reader.read_exact(block)?;
        Self::interpret(block)
    }

    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend(Self::MAGIC.to_le_bytes());
        self.encode_fields(&mut out);
        debug_assert_eq!(out.len(), Self::SIZE);
        out
    }

    fn write<W: Write + ?Sized>(&self, writer: &mut W) -> ZipResult<()> {
        writer.write_all(&self.serialize())?;
        Ok(())
    }
}

/// Lists the fields of a block once and derives both directions of the codec from it.
macro_rules! block_fields {
    ($name:ident { $($field:ident: $ty:ty),+ $(,)? }) => {
        fn decode_fields(reader: &mut &[u8]) -> io::Result<Self> {
            Ok($name {
                $($field: <$ty>::from_le_bytes({
                    let mut bytes = [0u8; size_of::<$ty>()];
                    reader.read_exact(&mut bytes)?;
                    bytes
                }),)+
            })
        }

        fn encode_fields(&self, out: &mut Vec<u8>) {
            $(out.extend(self.$field.to_le_bytes());)+
        }
    };
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ZipLocalEntryBlock {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl FixedSizeBlock for ZipLocalEntryBlock {
    const MAGIC: Magic = LOCAL_FILE_HEADER_SIGNATURE;
    const SIZE: usize = 30;
    const WRONG_MAGIC_ERROR: &'static str = "bad local header signature";

    block_fields!(ZipLocalEntryBlock {
        version_needed: u16,
        flags: u16,
        compression_method: u16,
        last_mod_time: u16,
        last_mod_date: u16,
        crc32: u32,
        compressed_size: u32,
        uncompressed_size: u32,
        file_name_length: u16,
        extra_field_length: u16,
    });
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ZipCentralEntryBlock {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
    pub file_comment_length: u16,
    pub disk_number: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub offset: u32,
}

impl FixedSizeBlock for ZipCentralEntryBlock {
    const MAGIC: Magic = CENTRAL_DIRECTORY_HEADER_SIGNATURE;
    const SIZE: usize = 46;
    const WRONG_MAGIC_ERROR: &'static str = "bad central record signature";

    block_fields!(ZipCentralEntryBlock {
        version_made_by: u16,
        version_needed: u16,
        flags: u16,
        compression_method: u16,
        last_mod_time: u16,
        last_mod_date: u16,
        crc32: u32,
        compressed_size: u32,
        uncompressed_size: u32,
        file_name_length: u16,
        extra_field_length: u16,
        file_comment_length: u16,
        disk_number: u16,
        internal_file_attributes: u16,
        external_file_attributes: u32,
        offset: u32,
    });
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Zip32CDEBlock {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub number_of_files_on_this_disk: u16,
    pub number_of_files: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub zip_file_comment_length: u16,
}

impl FixedSizeBlock for Zip32CDEBlock {
    const MAGIC: Magic = CENTRAL_DIRECTORY_END_SIGNATURE;
    const SIZE: usize = 22;
    const WRONG_MAGIC_ERROR: &'static str = "bad end of central directory signature";

    block_fields!(Zip32CDEBlock {
        disk_number: u16,
        disk_with_central_directory: u16,
        number_of_files_on_this_disk: u16,
        number_of_files: u16,
        central_directory_size: u32,
        central_directory_offset: u32,
        zip_file_comment_length: u16,
    });
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Zip64CDELocatorBlock {
    pub disk_with_central_directory: u32,
    pub end_of_central_directory_offset: u64,
    pub number_of_disks: u32,
}

impl FixedSizeBlock for Zip64CDELocatorBlock {
    const MAGIC: Magic = ZIP64_CENTRAL_DIRECTORY_END_LOCATOR_SIGNATURE;
    const SIZE: usize = 20;
    const WRONG_MAGIC_ERROR: &'static str = "bad zip64 end of central directory locator signature";

    block_fields!(Zip64CDELocatorBlock {
        disk_with_central_directory: u32,
        end_of_central_directory_offset: u64,
        number_of_disks: u32,
    });
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Zip64CDEBlock {
    pub record_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub number_of_files_on_this_disk: u64,
    pub number_of_files: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl Zip64CDEBlock {
    /// `record_size` counts the bytes after itself.
    pub(crate) const RECORD_SIZE: u64 = Self::SIZE as u64 - 12;
}

impl FixedSizeBlock for Zip64CDEBlock {
    const MAGIC: Magic = ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE;
    const SIZE: usize = 56;
    const WRONG_MAGIC_ERROR: &'static str = "bad zip64 end of central directory signature";

    block_fields!(Zip64CDEBlock {
        record_size: u64,
        version_made_by: u16,
        version_needed: u16,
        disk_number: u32,
        disk_with_central_directory: u32,
        number_of_files_on_this_disk: u64,
        number_of_files: u64,
        central_directory_size: u64,
        central_directory_offset: u64,
    });
}

/// The end-of-central-directory record together with the archive comment that trails it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Zip32CentralDirectoryEnd {
    pub block: Zip32CDEBlock,
    pub zip_file_comment: Box<[u8]>,
}

impl Zip32CentralDirectoryEnd {
    pub(crate) fn parse<R: Read + ?Sized>(reader: &mut R) -> ZipResult<Self> {
        let block = Zip32CDEBlock::parse(reader)?;
        let mut zip_file_comment = vec![0u8; block.zip_file_comment_length as usize];
        reader.read_exact(&mut zip_file_comment)?;
        Ok(Self {
            block,
            zip_file_comment: zip_file_comment.into_boxed_slice(),
        })
    }

    pub(crate) fn write<W: Write + ?Sized>(&self, writer: &mut W) -> ZipResult<()> {
        if self.zip_file_comment.len() > u16::MAX as usize {
            return Err(ZipError::invalid_operation(
                "archive comment is longer than 65535 bytes",
            ));
        }
        self.block.write(writer)?;
        writer.write_all(&self.zip_file_comment)?;
        Ok(())
    }

    /// Whether any field holds the sentinel announcing a zip64 record.
    pub(crate) fn requires_zip64(&self) -> bool {
        let block = &self.block;
        block.number_of_files == u16::MAX
            || block.number_of_files_on_this_disk == u16::MAX
            || block.central_directory_size == u32::MAX
            || block.central_directory_offset == u32::MAX
    }
}

/// Trailing record written after the payload of an entry whose sizes were deferred.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    pub(crate) fn write<W: Write + ?Sized>(&self, writer: &mut W, zip64: bool) -> ZipResult<()> {
        let mut out = Vec::with_capacity(24);
        out.write_u32_le(DATA_DESCRIPTOR_SIGNATURE)?;
        out.write_u32_le(self.crc32)?;
        if zip64 {
            out.write_u64_le(self.compressed_size)?;
            out.write_u64_le(self.uncompressed_size)?;
        } else {
            out.write_u32_le(self.compressed_size as u32)?;
            out.write_u32_le(self.uncompressed_size as u32)?;
        }
        writer.write_all(&out)?;
        Ok(())
    }

    /// Reads a descriptor whose signature is optional.
    pub(crate) fn parse<R: Read + ?Sized>(reader: &mut R, zip64: bool) -> ZipResult<Self> {
        let first = reader.read_u32_le()?;
        let crc32 = if first == DATA_DESCRIPTOR_SIGNATURE {
            reader.read_u32_le()?
        } else {
            first
        };
        let (compressed_size, uncompressed_size) = if zip64 {
            (reader.read_u64_le()?, reader.read_u64_le()?)
        } else {
            (
                reader.read_u32_le()?.into(),
                reader.read_u32_le()?.into(),
            )
        };
        Ok(Self {
            crc32,
            compressed_size,
            uncompressed_size,
        })
    }
}
