//! Reading archives front to back from a source that can't seek.

use std::io::{self, BufReader, Read};

use log::{debug, warn};

use super::decode_text;
use crate::compression::CompressionMethod;
use crate::crc32::Crc32Reader;
use crate::extra_fields::{ExtraField, Zip64Wants, parse_extra_fields};
use crate::read::entry::{CryptoReader, Decompressor, check_supported, crypto_validator, is_codec_error};
use crate::result::{ZipError, ZipResult, malformed, unsupported};
use crate::spec::{self, DataDescriptor, FixedSizeBlock, LittleEndianReadExt, ZipLocalEntryBlock, flags};
use crate::types::{DateTime, ZipEntryData};
use crate::zipcrypto::ZipCryptoReader;

/// What an entry left behind in the stream when it was dropped before its end.
#[derive(Debug, Clone, Copy)]
struct Leftover {
    /// Raw payload bytes not consumed yet.
    payload: u64,
    /// A data descriptor follows the payload; `true` for the 64-bit layout.
    descriptor: Option<bool>,
}

type EntryPipeline<'a, R> = Crc32Reader<Decompressor<CryptoReader<io::Take<&'a mut BufReader<R>>>>>;

/// Stream decoder for zip.
///
/// Entries are decoded one at a time from their local headers, so the central directory is
/// never consulted: entry comments and attributes are unavailable, and reading stops at the
/// first central directory record.
#[derive(Debug)]
pub struct ZipStreamReader<R> {
    reader: BufReader<R>,
    password: Option<Box<[u8]>>,
    leftover: Option<Leftover>,
    entries_seen: usize,
    finished: bool,
    /// Set while the position relative to entry boundaries is unknown.
    lost: bool,
}

impl<R: Read> ZipStreamReader<R> {
    /// Create a new ZipStreamReader
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            password: None,
            leftover: None,
            entries_seen: 0,
            finished: false,
            lost: false,
        }
    }

    /// Create a reader that decrypts encrypted entries with `password`.
    pub fn with_password(reader: R, password: &[u8]) -> Self {
        Self {
            password: Some(password.into()),
            ..Self::new(reader)
        }
    }

    /// Skips whatever the previous entry didn't consume.
    fn drain_leftover(&mut self) -> ZipResult<()> {
        let Some(Leftover {
            payload,
            descriptor,
        }) = self.leftover.take()
        else {
            return Ok(());
        };
        self.lost = true;
        let skipped = io::copy(&mut (&mut self.reader).take(payload), &mut io::sink())?;
        if skipped < payload {
            return Err(ZipError::corrupt("archive ends inside entry data"));
        }
        if let Some(zip64) = descriptor {
            DataDescriptor::parse(&mut self.reader, zip64)?;
        }
        self.lost = false;
        Ok(())
    }

    /// Decodes the next local header.
    ///
    /// Returns `Ok(None)` once the central directory is reached. The previous entry, if it
    /// wasn't read to the end, has already been skipped by the time this returns.
    pub fn next_entry(&mut self) -> ZipResult<Option<StreamingZipEntry<'_, R>>> {
        if self.lost {
            return malformed("lost track of entry boundaries after an earlier failure");
        }
        if self.finished {
            return Ok(None);
        }
        self.drain_leftover()?;

        let signature = match self.reader.read_u32_le() {
            Ok(signature) => signature,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("stream ended after {} entries", self.entries_seen);
                self.finished = true;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        match signature {
            spec::LOCAL_FILE_HEADER_SIGNATURE => {}
            spec::CENTRAL_DIRECTORY_HEADER_SIGNATURE
            | spec::CENTRAL_DIRECTORY_END_SIGNATURE
            | spec::ZIP64_CENTRAL_DIRECTORY_END_SIGNATURE => {
                debug!(
                    "reached the central directory after {} entries",
                    self.entries_seen
                );
                self.finished = true;
                return Ok(None);
            }
            spec::SPLIT_ARCHIVE_SIGNATURE | spec::SPANNED_NO_SPLIT_SIGNATURE
                if self.entries_seen == 0 =>
            {
                return unsupported("split or spanned archives");
            }
            _ => return malformed("bad local header signature"),
        }

        let mut block = [0u8; ZipLocalEntryBlock::SIZE];
        block[..4].copy_from_slice(&signature.to_le_bytes());
        self.reader.read_exact(&mut block[4..])?;
        let block = ZipLocalEntryBlock::interpret(&block)?;
        let mut name_raw = vec![0u8; block.file_name_length as usize];
        self.reader.read_exact(&mut name_raw)?;
        let mut extra = vec![0u8; block.extra_field_length as usize];
        self.reader.read_exact(&mut extra)?;

        let data = local_header_to_zip_entry(&block, name_raw, extra, self.entries_seen)?;
        self.entries_seen += 1;

        let zip64 = data
            .extra_fields
            .iter()
            .any(|field| matches!(field, ExtraField::Zip64(_)));
        let has_descriptor = data.flags & flags::DATA_DESCRIPTOR != 0;
        let descriptor = has_descriptor.then_some(zip64);
        // With bit 3 the sizes are normally zero; a non-zero size was filled in afterwards.
        let deferred = has_descriptor && data.compressed_size == 0;
        let remaining = (!deferred).then_some(data.compressed_size);

        if let Err(err) = check_supported(data.flags, data.compression_method) {
            return Err(abandon(&mut self.leftover, &mut self.lost, remaining, descriptor, err));
        }
        if deferred && data.compression_method == CompressionMethod::Stored {
            let err = ZipError::UnsupportedFeature("stored entry of unknown size".into());
            return Err(abandon(&mut self.leftover, &mut self.lost, None, descriptor, err));
        }
        let password = match (data.encrypted(), self.password.as_deref()) {
            (false, _) => None,
            (true, Some(password)) => Some(password),
            (true, None) => {
                let err = ZipError::PasswordRequired;
                return Err(abandon(&mut self.leftover, &mut self.lost, remaining, descriptor, err));
            }
        };

        let limit = remaining.unwrap_or(u64::MAX);
        let raw = (&mut self.reader).take(limit);
        let decrypted = match password {
            None => CryptoReader::Plaintext(raw),
            Some(password) => {
                let validator = crypto_validator(
                    data.flags,
                    data.crc32,
                    data.last_modified_time.timepart(),
                );
                match ZipCryptoReader::new(raw, password).validate_or_recover(validator) {
                    Ok(reader) => CryptoReader::ZipCrypto(reader),
                    Err((err, raw)) => {
                        let left = remaining.map(|_| raw.limit());
                        return Err(abandon(&mut self.leftover, &mut self.lost, left, descriptor, err));
                    }
                }
            }
        };
        let decompressed = Decompressor::new(decrypted, data.compression_method)?;

        Ok(Some(StreamingZipEntry {
            data,
            reader: Some(Crc32Reader::new(decompressed, None)),
            limit,
            deferred,
            descriptor,
            leftover: &mut self.leftover,
            lost: &mut self.lost,
        }))
    }

    /// Iterate over the stream and hand every entry to `visitor`.
    pub fn visit<V: ZipStreamVisitor>(mut self, visitor: &mut V) -> ZipResult<()> {
        while let Some(mut file) = self.next_entry()? {
            visitor.visit_file(&mut file)?;
        }
        Ok(())
    }
}

/// Gives up on an entry before its payload was read, leaving the stream positioned for the
/// next header when the payload length is known.
fn abandon(
    leftover: &mut Option<Leftover>,
    lost: &mut bool,
    remaining: Option<u64>,
    descriptor: Option<bool>,
    err: ZipError,
) -> ZipError {
    match remaining {
        Some(payload) => {
            *leftover = Some(Leftover {
                payload,
                descriptor,
            })
        }
        None => *lost = true,
    }
    err
}

/// Builds an entry from a local header; sizes come from the zip64 field when the header
/// holds sentinels.
fn local_header_to_zip_entry(
    block: &ZipLocalEntryBlock,
    name_raw: Vec<u8>,
    extra: Vec<u8>,
    index: usize,
) -> ZipResult<ZipEntryData> {
    let wants = Zip64Wants {
        uncompressed_size: block.uncompressed_size == u32::MAX,
        compressed_size: block.compressed_size == u32::MAX,
        header_start: false,
    };
    let extra_fields = parse_extra_fields(&extra, wants)?;
    let zip64 = extra_fields.iter().find_map(|field| match field {
        ExtraField::Zip64(info) => Some(*info),
        _ => None,
    });
    let uncompressed_size = zip64
        .and_then(|info| info.uncompressed_size())
        .unwrap_or(block.uncompressed_size.into());
    let compressed_size = zip64
        .and_then(|info| info.compressed_size())
        .unwrap_or(block.compressed_size.into());

    Ok(ZipEntryData {
        index,
        version_made_by: 0,
        version_needed: block.version_needed,
        flags: block.flags,
        compression_method: CompressionMethod::parse_from_u16(block.compression_method),
        last_modified_time: DateTime::from_msdos(block.last_mod_date, block.last_mod_time),
        crc32: block.crc32,
        compressed_size,
        uncompressed_size,
        file_name: decode_text(&name_raw, block.flags & flags::UTF8 != 0),
        file_name_raw: name_raw.into_boxed_slice(),
        extra_data: extra.into_boxed_slice(),
        extra_fields,
        file_comment: Box::default(),
        header_start: 0,
        internal_attributes: 0,
        external_attributes: 0,
    })
}

/// A struct for reading a zip file from a stream.
///
/// Reading to the end verifies the entry's size and CRC-32 against the local header or, for
/// deferred entries, the data descriptor that follows the payload. Dropping it early skips
/// the rest of the entry.
#[derive(Debug)]
pub struct StreamingZipEntry<'a, R: Read> {
    data: ZipEntryData,
    reader: Option<EntryPipeline<'a, R>>,
    /// Raw bytes the payload may take; unbounded while deferred.
    limit: u64,
    deferred: bool,
    descriptor: Option<bool>,
    leftover: &'a mut Option<Leftover>,
    lost: &'a mut bool,
}

impl<R: Read> StreamingZipEntry<'_, R> {
    /// The entry as described by its local header; CRC and sizes of a deferred entry are
    /// filled in once it has been read to the end.
    pub fn entry(&self) -> &ZipEntryData {
        &self.data
    }

    /// Name of the entry
    pub fn name(&self) -> &str {
        self.data.name()
    }

    /// Returns whether the file is actually a directory
    pub fn is_dir(&self) -> bool {
        self.data.is_dir()
    }

    /// Returns whether the file is a regular file
    pub fn is_file(&self) -> bool {
        self.data.is_file()
    }

    /// Consumes what is left of the payload and checks it against the recorded values.
    fn complete(&mut self) -> ZipResult<()> {
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };
        *self.lost = true;
        let crc32 = reader.crc32();
        let size = reader.bytes_read();
        let mut raw = reader.into_inner().into_inner().into_inner();
        let consumed = self.limit - raw.limit();
        if !self.deferred {
            // The codec may stop before the end of the declared payload.
            io::copy(&mut raw, &mut io::sink())?;
            if raw.limit() > 0 {
                return Err(ZipError::corrupt("archive ends inside entry data"));
            }
        }
        let compressed_size = if self.deferred { consumed } else { self.limit };
        let source = raw.into_inner();
        let expected = match self.descriptor {
            Some(zip64) => DataDescriptor::parse(source, zip64)?,
            None => DataDescriptor {
                crc32: self.data.crc32,
                compressed_size: self.data.compressed_size,
                uncompressed_size: self.data.uncompressed_size,
            },
        };
        *self.lost = false;

        if expected.compressed_size != compressed_size || expected.uncompressed_size != size {
            return Err(ZipError::corrupt(format!(
                "{}: entry ended after {size} of {} bytes",
                self.data.file_name, expected.uncompressed_size
            )));
        }
        if expected.crc32 != crc32 {
            return Err(ZipError::corrupt(format!(
                "{}: invalid checksum",
                self.data.file_name
            )));
        }
        self.data.crc32 = crc32;
        self.data.compressed_size = compressed_size;
        self.data.uncompressed_size = size;
        Ok(())
    }
}

impl<R: Read> Read for StreamingZipEntry<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(0);
        };
        let count = reader.read(buf).map_err(|err| {
            if is_codec_error(&err) {
                io::Error::from(ZipError::corrupt(format!("{}: {err}", self.data.file_name)))
            } else {
                err
            }
        });
        let count = match count {
            Ok(count) => count,
            Err(err) => {
                // The decoder's position in the payload is unknown now.
                if let Some(reader) = self.reader.take()
                    && !self.deferred
                {
                    let raw = reader.into_inner().into_inner().into_inner();
                    *self.leftover = Some(Leftover {
                        payload: raw.limit(),
                        descriptor: self.descriptor,
                    });
                } else {
                    *self.lost = true;
                }
                return Err(err);
            }
        };
        if count == 0 && !buf.is_empty() {
            self.complete()?;
        }
        Ok(count)
    }
}

impl<R: Read> Drop for StreamingZipEntry<'_, R> {
    fn drop(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        if !self.deferred {
            // Known length: the next header read skips the raw bytes.
            let raw = reader.into_inner().into_inner().into_inner();
            *self.leftover = Some(Leftover {
                payload: raw.limit(),
                descriptor: self.descriptor,
            });
            return;
        }
        // Only the codec knows where a deferred payload ends.
        self.reader = Some(reader);
        let name = self.data.file_name.clone();
        if let Err(e) = io::copy(self, &mut io::sink()) {
            warn!("discarding {name}: {e}");
        }
    }
}

/// Visitor for ZipStreamReader
pub trait ZipStreamVisitor {
    ///  * `file` - contains the content of the file and the metadata of its local header.
    ///    The comment is empty and the attributes are zero, since those only live in the
    ///    central directory.
    fn visit_file<R: Read>(&mut self, file: &mut StreamingZipEntry<'_, R>) -> ZipResult<()>;
}
