//! Types for creating ZIP archives

use crate::compression::CompressionMethod;
use crate::extra_fields::{ExtendedTimestamp, UsedExtraField, Zip64ExtendedInformation};
use crate::result::{ZipError, ZipResult, unsupported};
use crate::spec::{
    self, DataDescriptor, FixedSizeBlock, LittleEndianWriteExt, Zip32CDEBlock,
    Zip32CentralDirectoryEnd, Zip64CDEBlock, Zip64CDELocatorBlock, ZipCentralEntryBlock,
    ZipLocalEntryBlock, flags,
};
use crate::types::{
    DateTime, Pending, System, VERSION_MADE_BY, VERSION_NEEDED_DEFAULT, VERSION_NEEDED_ZIP64,
    ZipEntryData,
};
use crate::zipcrypto::{ENCRYPTION_HEADER_LEN, ZipCryptoValidator, ZipCryptoWriter};
use crc32fast::Hasher;
use flate2::Compression;
use flate2::write::DeflateEncoder;
use log::{debug, trace, warn};
use std::io::{self, Seek, SeekFrom, Write};
use std::mem;

const DEFAULT_DEFLATE_LEVEL: u32 = 6;
const MAX_DEFLATE_LEVEL: u32 = 9;

/// MS-DOS directory attribute
const DOS_DIRECTORY_ATTRIBUTE: u32 = 0x10;
const UNIX_DIRECTORY_MODE: u32 = 0o040000;
const UNIX_FILE_MODE: u32 = 0o100000;
/// Largest zip64 field a central record can need: three 64-bit values plus the tag and length.
const CENTRAL_ZIP64_EXTRA_LEN: usize = 4 + 3 * 8;

/// Counts the bytes that pass through, giving the position relative to the archive start.
#[derive(Debug)]
struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.written += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[derive(Debug)]
enum MaybeEncrypted<W> {
    Unencrypted(W),
    ZipCrypto(ZipCryptoWriter<W>),
}

impl<W> MaybeEncrypted<W> {
    fn into_inner(self) -> W {
        match self {
            MaybeEncrypted::Unencrypted(w) => w,
            MaybeEncrypted::ZipCrypto(w) => w.into_inner(),
        }
    }

    fn get_ref(&self) -> &W {
        match self {
            MaybeEncrypted::Unencrypted(w) => w,
            MaybeEncrypted::ZipCrypto(w) => w.get_ref(),
        }
    }
}

impl<W: Write> Write for MaybeEncrypted<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            MaybeEncrypted::Unencrypted(w) => w.write(buf),
            MaybeEncrypted::ZipCrypto(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            MaybeEncrypted::Unencrypted(w) => w.flush(),
            MaybeEncrypted::ZipCrypto(w) => w.flush(),
        }
    }
}

/// The sink in whatever wrapping the open entry needs.
#[derive(Debug)]
enum GenericZipWriter<W: Write> {
    Closed,
    Storer(MaybeEncrypted<W>),
    Deflater(DeflateEncoder<MaybeEncrypted<W>>),
}

impl<W: Write> GenericZipWriter<W> {
    fn get_plain(&mut self) -> Option<&mut W> {
        match self {
            GenericZipWriter::Storer(MaybeEncrypted::Unencrypted(w)) => Some(w),
            _ => None,
        }
    }

    fn get_ref(&self) -> Option<&W> {
        match self {
            GenericZipWriter::Closed => None,
            GenericZipWriter::Storer(w) => Some(w.get_ref()),
            GenericZipWriter::Deflater(w) => Some(w.get_ref().get_ref()),
        }
    }

    /// Flushes any compressor and encryption state and returns the bare sink.
    fn into_sink(self) -> io::Result<Option<W>> {
        Ok(match self {
            GenericZipWriter::Closed => None,
            GenericZipWriter::Storer(w) => Some(w.into_inner()),
            GenericZipWriter::Deflater(w) => Some(w.finish()?.into_inner()),
        })
    }
}

impl<W: Write> Write for GenericZipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            GenericZipWriter::Closed => Err(io::Error::from(io::ErrorKind::BrokenPipe)),
            GenericZipWriter::Storer(w) => w.write(buf),
            GenericZipWriter::Deflater(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            GenericZipWriter::Closed => Ok(()),
            GenericZipWriter::Storer(w) => w.flush(),
            GenericZipWriter::Deflater(w) => w.flush(),
        }
    }
}

/// Wrapper that lets a [`ZipWriter`] write to a sink that can't seek.
///
/// Only `SeekFrom::Current(0)` is supported, which reports the number of bytes written so far.
#[derive(Debug)]
pub struct StreamWriter<W> {
    inner: W,
    bytes_written: u64,
}

impl<W> StreamWriter<W> {
    /// Wraps a non-seekable sink
    pub const fn new(inner: W) -> StreamWriter<W> {
        Self {
            inner,
            bytes_written: 0,
        }
    }

    /// Consumes this wrapper, returning the underlying sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for StreamWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.bytes_written += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W> Seek for StreamWriter<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.bytes_written),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "StreamWriter does not support seeking",
            )),
        }
    }
}

/// Metadata for a file to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOptions<'k> {
    pub(crate) compression_method: CompressionMethod,
    pub(crate) compression_level: Option<u32>,
    pub(crate) last_modified_time: DateTime,
    pub(crate) permissions: Option<u32>,
    pub(crate) large_file: bool,
    pub(crate) password: Option<&'k [u8]>,
    pub(crate) declared_size: Pending<u64>,
    pub(crate) declared_crc32: Pending<u32>,
    pub(crate) extended_timestamp: Option<u32>,
    pub(crate) comment: Box<str>,
    pub(crate) extra_data: Vec<u8>,
}

/// Options for a file that borrows nothing.
pub type SimpleFileOptions = FileOptions<'static>;

impl Default for FileOptions<'_> {
    /// Construct a new FileOptions object
    fn default() -> Self {
        Self {
            compression_method: CompressionMethod::default(),
            compression_level: None,
            last_modified_time: DateTime::default_for_write(),
            permissions: None,
            large_file: false,
            password: None,
            declared_size: Pending::Deferred,
            declared_crc32: Pending::Deferred,
            extended_timestamp: None,
            comment: Box::default(),
            extra_data: Vec::new(),
        }
    }
}

impl<'k> FileOptions<'k> {
    /// Set the compression method for the new file
    ///
    /// The default is [`CompressionMethod::Deflated`].
    #[must_use]
    pub fn compression_method(mut self, method: CompressionMethod) -> Self {
        self.compression_method = method;
        self
    }

    /// Set the compression level for the new file
    ///
    /// `None` is the default level (6). Deflate accepts 0 through 9; other values make
    /// [`ZipWriter::begin_entry`] fail. Stored entries ignore the level.
    #[must_use]
    pub fn compression_level(mut self, level: Option<u32>) -> Self {
        self.compression_level = level;
        self
    }

    /// Set the last modified time
    ///
    /// The default is the current time when the `time` feature is enabled, and 1980-01-01
    /// otherwise.
    #[must_use]
    pub fn last_modified_time(mut self, mod_time: DateTime) -> Self {
        self.last_modified_time = mod_time;
        self
    }

    /// Set the permissions for the new file.
    ///
    /// The format is represented with unix-style permissions. Only the lower 12 bits are kept.
    /// Setting them marks the entry as created on Unix.
    #[must_use]
    pub fn unix_permissions(mut self, mode: u32) -> Self {
        self.permissions = Some(mode & 0o7777);
        self
    }

    /// Set whether the new file's compressed and uncompressed size may reach 4 GiB.
    ///
    /// If set to `false` and the file exceeds the limit, an I/O error is thrown and the file is
    /// aborted. If set to `true`, readers will require ZIP64 support and if the file does not
    /// exceed the limit, 20 B are wasted. The default is `false`.
    #[must_use]
    pub fn large_file(mut self, large: bool) -> Self {
        self.large_file = large;
        self
    }

    /// Encrypt the file with the legacy ZipCrypto cipher.
    ///
    /// ZipCrypto is weak and only kept for compatibility with older tools.
    #[must_use]
    pub fn with_password(mut self, password: &'k [u8]) -> Self {
        self.password = Some(password);
        self
    }

    /// Declare the uncompressed size before writing. Closing the entry fails with
    /// [`ZipError::SizeMismatch`] if a different number of bytes was written.
    #[must_use]
    pub fn declared_size(mut self, size: u64) -> Self {
        self.declared_size = Pending::Known(size);
        self
    }

    /// Declare the CRC-32 of the content before writing. Closing the entry fails with
    /// [`ZipError::CrcMismatch`] if the written bytes hash differently.
    #[must_use]
    pub fn declared_crc32(mut self, crc32: u32) -> Self {
        self.declared_crc32 = Pending::Known(crc32);
        self
    }

    /// Record a modification time in UNIX epoch seconds, in an extended timestamp field.
    #[must_use]
    pub fn extended_timestamp(mut self, mod_time: u32) -> Self {
        self.extended_timestamp = Some(mod_time);
        self
    }

    /// Set the entry comment, stored in the central directory.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<Box<str>>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Adds an extra data field, written to both the local header and the central directory.
    ///
    /// Tags the writer emits itself (zip64 and extended timestamp) are rejected, as is a
    /// field that doesn't fit the 16-bit length. [`ZipWriter::begin_entry`] also needs 28 bytes
    /// to spare for a zip64 field in the central directory.
    pub fn add_extra_data(&mut self, tag: u16, payload: &[u8]) -> ZipResult<()> {
        if UsedExtraField::is_reserved_for_writing(tag) {
            return Err(ZipError::invalid_operation(format!(
                "extra field {tag:#06x} is written by the library"
            )));
        }
        let Ok(len) = u16::try_from(payload.len()) else {
            return Err(ZipError::invalid_operation("extra field is too large"));
        };
        if self.extra_data.len() + 4 + payload.len() > u16::MAX as usize {
            return Err(ZipError::invalid_operation("extra data is too large"));
        }
        self.extra_data.write_u16_le(tag)?;
        self.extra_data.write_u16_le(len)?;
        self.extra_data.extend_from_slice(payload);
        Ok(())
    }
}

/// How the local header of the open entry gets its final values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    /// The header was written with final values.
    Final,
    /// The header holds zeros; seek back and fill them in.
    Patch,
    /// The header holds zeros and flag bit 3; a data descriptor follows the payload.
    Descriptor,
    /// Bit 3 and a descriptor, and the header is patched as well.
    PatchAndDescriptor,
}

impl Completion {
    const fn patches(self) -> bool {
        matches!(self, Completion::Patch | Completion::PatchAndDescriptor)
    }

    const fn has_descriptor(self) -> bool {
        matches!(
            self,
            Completion::Descriptor | Completion::PatchAndDescriptor
        )
    }
}

/// The entry between `begin_entry` and `close_entry`.
#[derive(Debug)]
struct OpenEntry {
    data: ZipEntryData,
    completion: Completion,
    declared_size: Pending<u64>,
    declared_crc32: Pending<u32>,
    large_file: bool,
    /// Offset of the first payload byte, relative to the archive start.
    data_start: u64,
    hasher: Hasher,
    written: u64,
}

/// ZIP archive generator
///
/// Handles the bookkeeping involved in building an archive, and provides an API to edit its
/// contents. One entry is open at a time; opening the next one closes the previous.
///
/// ```
/// # fn doit() -> zipcodec::result::ZipResult<()>
/// # {
/// # use zipcodec::ZipWriter;
/// use std::io::Write;
/// use zipcodec::write::SimpleFileOptions;
///
/// // We use a buffer here, though you'd normally use a `File`
/// let mut buf = [0; 65536];
/// let mut zip = ZipWriter::new(std::io::Cursor::new(&mut buf[..]));
///
/// let options = SimpleFileOptions::default().compression_method(zipcodec::CompressionMethod::Stored);
/// zip.begin_entry("hello_world.txt", options)?;
/// zip.write_all(b"Hello, World!")?;
///
/// // Apply the changes you've made.
/// // Dropping the `ZipWriter` will have the same effect, but may silently fail
/// zip.finish()?;
///
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
#[derive(Debug)]
pub struct ZipWriter<W: Write + Seek> {
    inner: GenericZipWriter<CountingWriter<W>>,
    files: Vec<ZipEntryData>,
    open: Option<OpenEntry>,
    seekable: bool,
    finished: bool,
    comment: Box<[u8]>,
}

impl<W: Write + Seek> ZipWriter<W> {
    /// Initializes the archive.
    ///
    /// Before writing to this object, the [`ZipWriter::begin_entry`] function should be called.
    /// Entries whose sizes aren't declared are completed by seeking back to their local
    /// header once they are closed.
    pub fn new(inner: W) -> ZipWriter<W> {
        Self::with_seekable(inner, true)
    }

    fn with_seekable(inner: W, seekable: bool) -> ZipWriter<W> {
        ZipWriter {
            inner: GenericZipWriter::Storer(MaybeEncrypted::Unencrypted(CountingWriter {
                inner,
                written: 0,
            })),
            files: Vec::new(),
            open: None,
            seekable,
            finished: false,
            comment: Box::default(),
        }
    }

    /// Set the archive comment, written by [`finish`](Self::finish).
    pub fn set_comment<S: Into<Box<str>>>(&mut self, comment: S) {
        let comment: Box<str> = comment.into();
        self.comment = comment.into_boxed_bytes();
    }

    /// Returns true if an entry is open for writing.
    pub const fn is_writing_entry(&self) -> bool {
        self.open.is_some()
    }

    /// The entries closed so far, in the order they'll appear in the central directory.
    pub fn entries(&self) -> &[ZipEntryData] {
        &self.files
    }

    /// Gets a reference to the underlying writer.
    ///
    /// `None` while the writer is between states after a failed operation.
    pub fn get_ref(&self) -> Option<&W> {
        self.inner.get_ref().map(|counting| &counting.inner)
    }

    fn ensure_not_finished(&self) -> ZipResult<()> {
        if self.finished {
            return Err(ZipError::invalid_operation("archive is already finished"));
        }
        Ok(())
    }

    fn sink(&mut self) -> ZipResult<&mut CountingWriter<W>> {
        self.inner
            .get_plain()
            .ok_or(ZipError::invalid_operation("archive writer is in an invalid state"))
    }

    /// Create an entry in the archive and start writing its contents. If an entry is already
    /// open it is closed first.
    ///
    /// The data should be written using the [`Write`] implementation on this [`ZipWriter`].
    /// Length limits on the name, comment and extra data are checked before anything is
    /// written.
    pub fn begin_entry<S: AsRef<str>>(&mut self, name: S, options: FileOptions<'_>) -> ZipResult<()> {
        self.ensure_not_finished()?;
        let name = name.as_ref();
        let mut options = options;
        check_length(name.len(), "entry name")?;
        check_length(options.comment.len(), "entry comment")?;
        check_length(options.extra_data.len(), "extra data")?;
        // Whether the central record needs zip64 is only known at close, so leave it room now.
        check_length(
            central_extra(&options).len() + CENTRAL_ZIP64_EXTRA_LEN,
            "extra data",
        )?;
        if !options.compression_method.is_supported() {
            return unsupported(format!(
                "compression method {}",
                options.compression_method
            ));
        }
        let level = options.compression_level.unwrap_or(DEFAULT_DEFLATE_LEVEL);
        if level > MAX_DEFLATE_LEVEL {
            return Err(ZipError::invalid_operation(format!(
                "compression level {level} is out of range"
            )));
        }
        if let Some(open) = &self.open {
            debug!("closing {} to begin the next entry", open.data.file_name);
            self.close_entry()?;
        }

        if options.declared_size.known().is_some_and(|size| size >= spec::ZIP64_BYTES_THR) {
            options.large_file = true;
        }
        let final_header = options.compression_method == CompressionMethod::Stored
            && !options.declared_size.is_deferred()
            && !options.declared_crc32.is_deferred();
        if !final_header
            && !self.seekable
            && options.compression_method == CompressionMethod::Stored
        {
            debug!("{name}: stored entry of unknown size on a non-seekable sink, deflating");
            options.compression_method = CompressionMethod::Deflated;
        }

        let encrypted = options.password.is_some();
        // The encryption header's check byte is the CRC unless bit 3 is set, so an unknown
        // CRC forces bit 3 even when the header can be patched.
        let completion = match (final_header, self.seekable) {
            (true, _) => Completion::Final,
            (false, false) => Completion::Descriptor,
            (false, true) if encrypted && options.declared_crc32.is_deferred() => {
                Completion::PatchAndDescriptor
            }
            (false, true) => Completion::Patch,
        };

        let mut entry_flags = 0;
        if encrypted {
            entry_flags |= flags::ENCRYPTED;
        }
        if completion.has_descriptor() {
            entry_flags |= flags::DATA_DESCRIPTOR;
        }
        if !name.is_ascii() || !options.comment.is_ascii() {
            entry_flags |= flags::UTF8;
        }

        let header_start = self.sink()?.written;
        let (uncompressed_size, compressed_size, crc32) = if final_header {
            let size = options.declared_size.known().unwrap_or_default();
            let header = if encrypted { ENCRYPTION_HEADER_LEN } else { 0 };
            (
                size,
                size + header,
                options.declared_crc32.known().unwrap_or_default(),
            )
        } else {
            (0, 0, 0)
        };

        let mut local_extra = Vec::new();
        if options.large_file {
            local_extra.extend(Zip64ExtendedInformation::serialize_local(
                uncompressed_size,
                compressed_size,
            ));
        }
        if let Some(mod_time) = options.extended_timestamp {
            local_extra.extend(ExtendedTimestamp::serialize_mod_time(mod_time));
        }
        local_extra.extend_from_slice(&options.extra_data);
        check_length(local_extra.len(), "extra data")?;

        let (version_made_by, external_attributes) = match options.permissions {
            Some(mode) => {
                let kind = if name.ends_with('/') {
                    UNIX_DIRECTORY_MODE
                } else {
                    UNIX_FILE_MODE
                };
                let dos = if name.ends_with('/') {
                    DOS_DIRECTORY_ATTRIBUTE
                } else {
                    0
                };
                (
                    ((u8::from(System::Unix) as u16) << 8) | VERSION_MADE_BY,
                    ((kind | mode) << 16) | dos,
                )
            }
            None if name.ends_with('/') => (VERSION_MADE_BY, DOS_DIRECTORY_ATTRIBUTE),
            None => (VERSION_MADE_BY, 0),
        };

        let data = ZipEntryData {
            index: self.files.len(),
            version_made_by,
            version_needed: if options.large_file {
                VERSION_NEEDED_ZIP64
            } else {
                VERSION_NEEDED_DEFAULT
            },
            flags: entry_flags,
            compression_method: options.compression_method,
            last_modified_time: options.last_modified_time,
            crc32,
            compressed_size,
            uncompressed_size,
            file_name: name.into(),
            file_name_raw: name.as_bytes().into(),
            extra_data: central_extra(&options),
            extra_fields: Vec::new(),
            file_comment: options.comment.clone(),
            header_start,
            internal_attributes: 0,
            external_attributes,
        };

        let block = ZipLocalEntryBlock {
            version_needed: data.version_needed,
            flags: data.flags,
            compression_method: data.compression_method.serialize_to_u16(),
            last_mod_time: data.last_modified_time.timepart(),
            last_mod_date: data.last_modified_time.datepart(),
            crc32: data.crc32,
            compressed_size: local_size(compressed_size, options.large_file),
            uncompressed_size: local_size(uncompressed_size, options.large_file),
            file_name_length: name.len() as u16,
            extra_field_length: local_extra.len() as u16,
        };
        let mut header = block.serialize();
        header.extend_from_slice(name.as_bytes());
        header.extend_from_slice(&local_extra);

        let sink = self.sink()?;
        sink.write_all(&header)?;
        let data_start = sink.written;

        let validator = if completion.has_descriptor() {
            ZipCryptoValidator::InfoZipMsdosTime(data.last_modified_time.timepart())
        } else {
            // A patched header ends up with the declared CRC, or close_entry fails.
            ZipCryptoValidator::PkzipCrc32(options.declared_crc32.known().unwrap_or(data.crc32))
        };
        self.switch_to(options.compression_method, level, options.password, validator)?;

        self.open = Some(OpenEntry {
            data,
            completion,
            declared_size: options.declared_size,
            declared_crc32: options.declared_crc32,
            large_file: options.large_file,
            data_start,
            hasher: Hasher::new(),
            written: 0,
        });
        Ok(())
    }

    fn switch_to(
        &mut self,
        method: CompressionMethod,
        level: u32,
        password: Option<&[u8]>,
        validator: ZipCryptoValidator,
    ) -> ZipResult<()> {
        let Some(sink) = mem::replace(&mut self.inner, GenericZipWriter::Closed).into_sink()? else {
            return Err(ZipError::invalid_operation("archive writer is in an invalid state"));
        };
        let sink = match password {
            Some(password) => MaybeEncrypted::ZipCrypto(ZipCryptoWriter::new(sink, password, validator)?),
            None => MaybeEncrypted::Unencrypted(sink),
        };
        self.inner = match method {
            CompressionMethod::Stored => GenericZipWriter::Storer(sink),
            CompressionMethod::Deflated => {
                GenericZipWriter::Deflater(DeflateEncoder::new(sink, Compression::new(level)))
            }
            other => return unsupported(format!("compression method {other}")),
        };
        Ok(())
    }

    /// Finishes the open entry: flushes the compressor, checks declared values and fills in
    /// the final CRC and sizes, either in place or in a data descriptor.
    ///
    /// Closing when no entry is open does nothing.
    pub fn close_entry(&mut self) -> ZipResult<()> {
        let Some(mut open) = self.open.take() else {
            return Ok(());
        };
        let Some(sink) = mem::replace(&mut self.inner, GenericZipWriter::Closed).into_sink()? else {
            return Err(ZipError::invalid_operation("archive writer is in an invalid state"));
        };
        self.inner = GenericZipWriter::Storer(MaybeEncrypted::Unencrypted(sink));

        let crc32 = open.hasher.clone().finalize();
        let size = open.written;
        let compressed_size = self.sink()?.written - open.data_start;
        if let Pending::Known(expected) = open.declared_size
            && expected != size
        {
            return Err(ZipError::SizeMismatch {
                expected,
                actual: size,
            });
        }
        if let Pending::Known(expected) = open.declared_crc32
            && expected != crc32
        {
            return Err(ZipError::CrcMismatch {
                expected,
                actual: crc32,
            });
        }
        if !open.large_file
            && (size >= spec::ZIP64_BYTES_THR || compressed_size >= spec::ZIP64_BYTES_THR)
        {
            return Err(ZipError::invalid_operation(
                "entry reached 4 GiB without large_file",
            ));
        }

        let data = &mut open.data;
        data.crc32 = crc32;
        data.uncompressed_size = size;
        data.compressed_size = compressed_size;

        if open.completion.has_descriptor() {
            let descriptor = DataDescriptor {
                crc32,
                compressed_size,
                uncompressed_size: size,
            };
            descriptor.write(self.sink()?, open.large_file)?;
        }
        if open.completion.patches() {
            self.patch_local_header(data, open.large_file)?;
        }

        self.files.push(open.data);
        Ok(())
    }

    /// Overwrites the CRC and sizes of a local header that was written with zeros.
    fn patch_local_header(&mut self, data: &ZipEntryData, large_file: bool) -> ZipResult<()> {
        let sink = self.sink()?;
        let written = sink.written;
        let inner = &mut sink.inner;
        let end = inner.stream_position()?;
        let archive_start = end - written;
        let crc_pos = archive_start + data.header_start + spec::LOCAL_HEADER_CRC_OFFSET;
        trace!("patching local header of {} at {crc_pos}", data.file_name);

        inner.seek(SeekFrom::Start(crc_pos))?;
        inner.write_u32_le(data.crc32)?;
        inner.write_u32_le(local_size(data.compressed_size, large_file))?;
        inner.write_u32_le(local_size(data.uncompressed_size, large_file))?;
        if large_file {
            // The zip64 field is the first in the local extra data, past its tag and length.
            let zip64_pos = archive_start
                + data.header_start
                + ZipLocalEntryBlock::SIZE as u64
                + data.file_name_raw.len() as u64
                + 4;
            inner.seek(SeekFrom::Start(zip64_pos))?;
            inner.write_u64_le(data.uncompressed_size)?;
            inner.write_u64_le(data.compressed_size)?;
        }
        inner.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    /// Add a directory entry.
    ///
    /// A `/` is appended to the name if it doesn't end in one. Directories are stored
    /// unencrypted with no content, whatever the options say.
    pub fn add_directory<S: Into<String>>(&mut self, name: S, options: FileOptions<'_>) -> ZipResult<()> {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        let options = FileOptions {
            compression_method: CompressionMethod::Stored,
            password: None,
            declared_size: Pending::Known(0),
            declared_crc32: Pending::Known(0),
            large_file: false,
            ..options
        };
        self.begin_entry(name, options)?;
        self.close_entry()
    }

    /// Finish the last entry and write the central directory and end records.
    ///
    /// Calling this again does nothing. No entries can be added afterwards.
    pub fn finish(&mut self) -> ZipResult<()> {
        if self.finished {
            return Ok(());
        }
        self.close_entry()?;
        check_length(self.comment.len(), "archive comment")?;

        let files = mem::take(&mut self.files);
        let result = self.write_central_directory(&files);
        self.files = files;
        result?;
        self.finished = true;
        Ok(())
    }

    fn write_central_directory(&mut self, files: &[ZipEntryData]) -> ZipResult<()> {
        let comment = self.comment.clone();
        let sink = self.sink()?;
        let directory_start = sink.written;
        for file in files {
            write_central_directory_header(sink, file)?;
        }
        let directory_end = sink.written;
        let directory_size = directory_end - directory_start;
        let number_of_files = files.len() as u64;

        let needs_zip64 = files.len() >= spec::ZIP64_ENTRY_THR
            || directory_size >= spec::ZIP64_BYTES_THR
            || directory_start >= spec::ZIP64_BYTES_THR;
        if needs_zip64 {
            let record = Zip64CDEBlock {
                record_size: Zip64CDEBlock::RECORD_SIZE,
                version_made_by: VERSION_MADE_BY,
                version_needed: VERSION_NEEDED_ZIP64,
                disk_number: 0,
                disk_with_central_directory: 0,
                number_of_files_on_this_disk: number_of_files,
                number_of_files,
                central_directory_size: directory_size,
                central_directory_offset: directory_start,
            };
            record.write(sink)?;
            let locator = Zip64CDELocatorBlock {
                disk_with_central_directory: 0,
                end_of_central_directory_offset: directory_end,
                number_of_disks: 1,
            };
            locator.write(sink)?;
        }

        let entry_count = number_of_files.min(spec::ZIP64_ENTRY_THR as u64) as u16;
        let footer = Zip32CentralDirectoryEnd {
            block: Zip32CDEBlock {
                disk_number: 0,
                disk_with_central_directory: 0,
                number_of_files_on_this_disk: entry_count,
                number_of_files: entry_count,
                central_directory_size: directory_size.min(spec::ZIP64_BYTES_THR) as u32,
                central_directory_offset: directory_start.min(spec::ZIP64_BYTES_THR) as u32,
                zip_file_comment_length: comment.len() as u16,
            },
            zip_file_comment: comment,
        };
        footer.write(sink)?;
        sink.flush()?;
        debug!(
            "wrote central directory: {number_of_files} entries, {directory_size} bytes, zip64 {needs_zip64}"
        );
        Ok(())
    }

    /// Finishes the archive and returns the underlying writer.
    pub fn into_inner(mut self) -> ZipResult<W> {
        self.finish()?;
        match mem::replace(&mut self.inner, GenericZipWriter::Closed).into_sink()? {
            Some(counting) => Ok(counting.inner),
            None => Err(ZipError::invalid_operation("archive writer is in an invalid state")),
        }
    }
}

impl<W: Write> ZipWriter<StreamWriter<W>> {
    /// Creates a writer for a sink that can't seek, such as a pipe or socket.
    ///
    /// Entries whose size and CRC aren't both declared up front carry their final values in a
    /// data descriptor after the payload. Stored entries of that kind are deflated instead,
    /// since a reader could not otherwise find where they end.
    pub fn new_stream(inner: W) -> ZipWriter<StreamWriter<W>> {
        ZipWriter::with_seekable(StreamWriter::new(inner), false)
    }
}

impl<W: Write + Seek> Write for ZipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(open) = self.open.as_mut() else {
            return Err(ZipError::invalid_operation("no entry is open for writing").into());
        };
        let count = self.inner.write(buf)?;
        open.hasher.update(&buf[..count]);
        open.written += count as u64;
        if !open.large_file && open.written >= spec::ZIP64_BYTES_THR {
            return Err(
                ZipError::invalid_operation("entry reached 4 GiB without large_file").into(),
            );
        }
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Seek> Drop for ZipWriter<W> {
    fn drop(&mut self) {
        if !self.finished
            && !std::thread::panicking()
            && let Err(e) = self.finish()
        {
            warn!("ZipWriter drop failed to finish the archive: {e}");
        }
    }
}

fn check_length(len: usize, what: &str) -> ZipResult<()> {
    if len > u16::MAX as usize {
        return Err(ZipError::invalid_operation(format!(
            "{what} is longer than 65535 bytes"
        )));
    }
    Ok(())
}

/// A size as the local header records it.
fn local_size(size: u64, large_file: bool) -> u32 {
    if large_file {
        spec::ZIP64_BYTES_THR as u32
    } else {
        size as u32
    }
}

/// Extra data for the central record, minus the zip64 field which depends on final values.
fn central_extra(options: &FileOptions<'_>) -> Box<[u8]> {
    let mut extra = Vec::with_capacity(9 + options.extra_data.len());
    if let Some(mod_time) = options.extended_timestamp {
        extra.extend(ExtendedTimestamp::serialize_mod_time(mod_time));
    }
    extra.extend_from_slice(&options.extra_data);
    extra.into_boxed_slice()
}

fn write_central_directory_header<T: Write>(writer: &mut T, file: &ZipEntryData) -> ZipResult<()> {
    let zip64 = Zip64ExtendedInformation::serialize_central(
        file.uncompressed_size,
        file.compressed_size,
        file.header_start,
    );
    let mut extra = zip64.unwrap_or_default();
    extra.extend_from_slice(&file.extra_data);
    check_length(extra.len(), "extra data")?;

    let block = ZipCentralEntryBlock {
        version_made_by: file.version_made_by,
        version_needed: file.version_needed,
        flags: file.flags,
        compression_method: file.compression_method.serialize_to_u16(),
        last_mod_time: file.last_modified_time.timepart(),
        last_mod_date: file.last_modified_time.datepart(),
        crc32: file.crc32,
        compressed_size: file.compressed_size.min(spec::ZIP64_BYTES_THR) as u32,
        uncompressed_size: file.uncompressed_size.min(spec::ZIP64_BYTES_THR) as u32,
        file_name_length: file.file_name_raw.len() as u16,
        extra_field_length: extra.len() as u16,
        file_comment_length: file.file_comment.len() as u16,
        disk_number: 0,
        internal_file_attributes: file.internal_attributes,
        external_file_attributes: file.external_attributes,
        offset: file.header_start.min(spec::ZIP64_BYTES_THR) as u32,
    };
    let mut record = block.serialize();
    record.extend_from_slice(&file.file_name_raw);
    record.extend_from_slice(&extra);
    record.extend_from_slice(file.file_comment.as_bytes());
    writer.write_all(&record)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::read::ZipArchive;
    use crate::result::ZipError;
    use std::io::{Cursor, Read};

    fn read_back(data: Vec<u8>, name: &str) -> Vec<u8> {
        let archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let mut content = Vec::new();
        archive.by_name(name).unwrap().read_to_end(&mut content).unwrap();
        content
    }

    #[test]
    fn write_empty_zip() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.set_comment("ZIP");
        let result = writer.into_inner().unwrap();
        assert_eq!(result.get_ref().len(), 25);
        assert_eq!(
            *result.get_ref(),
            [80, 75, 5, 6, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 0, 90, 73, 80]
        );
    }

    #[test]
    fn write_without_entry() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let err = ZipError::from(writer.write_all(b"orphan").unwrap_err());
        assert!(matches!(err, ZipError::InvalidOperation(_)));
    }

    #[test]
    fn finish_is_idempotent() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.begin_entry("a.txt", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"a").unwrap();
        writer.finish().unwrap();
        let len = writer.get_ref().unwrap().get_ref().len();
        writer.finish().unwrap();
        assert_eq!(writer.get_ref().unwrap().get_ref().len(), len);
        assert!(matches!(
            writer.begin_entry("b.txt", SimpleFileOptions::default()),
            Err(ZipError::InvalidOperation(_))
        ));
    }

    #[test]
    fn seekable_sink_patches_header() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.begin_entry("patched.txt", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"patched content").unwrap();
        let data = writer.into_inner().unwrap().into_inner();
        let block = ZipLocalEntryBlock::interpret(&data[..ZipLocalEntryBlock::SIZE]).unwrap();
        assert_eq!(block.flags & flags::DATA_DESCRIPTOR, 0);
        assert_eq!(block.crc32, crate::crc32::checksum(b"patched content"));
        assert_eq!(block.uncompressed_size, 15);
        assert_eq!(read_back(data, "patched.txt"), b"patched content");
    }

    #[test]
    fn stream_sink_uses_descriptor() {
        let mut writer = ZipWriter::new_stream(Vec::new());
        writer.begin_entry("streamed.txt", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"streamed content").unwrap();
        let data = writer.into_inner().unwrap().into_inner();
        let block = ZipLocalEntryBlock::interpret(&data[..ZipLocalEntryBlock::SIZE]).unwrap();
        assert_ne!(block.flags & flags::DATA_DESCRIPTOR, 0);
        assert_eq!(block.crc32, 0);
        assert_eq!(block.compressed_size, 0);
        assert_eq!(read_back(data, "streamed.txt"), b"streamed content");
    }

    #[test]
    fn stored_of_unknown_size_is_deflated_on_streams() {
        let mut writer = ZipWriter::new_stream(Vec::new());
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        writer.begin_entry("unknown.txt", options.clone()).unwrap();
        writer.write_all(b"unknown").unwrap();
        let known = options
            .declared_size(5)
            .declared_crc32(crate::crc32::checksum(b"known"));
        writer.begin_entry("known.txt", known).unwrap();
        writer.write_all(b"known").unwrap();
        writer.finish().unwrap();
        let methods: Vec<_> = writer.entries().iter().map(|e| e.compression()).collect();
        assert_eq!(
            methods,
            [CompressionMethod::Deflated, CompressionMethod::Stored]
        );
    }

    #[test]
    fn declared_values_are_checked() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .begin_entry("sized.txt", SimpleFileOptions::default().declared_size(3))
            .unwrap();
        writer.write_all(b"four").unwrap();
        assert!(matches!(
            writer.close_entry(),
            Err(ZipError::SizeMismatch {
                expected: 3,
                actual: 4
            })
        ));

        writer
            .begin_entry("crc.txt", SimpleFileOptions::default().declared_crc32(1))
            .unwrap();
        writer.write_all(b"four").unwrap();
        assert!(matches!(
            writer.close_entry(),
            Err(ZipError::CrcMismatch { expected: 1, .. })
        ));
        assert!(!writer.is_writing_entry());
    }

    #[test]
    fn length_limits() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let long = "a".repeat(65536);
        assert!(matches!(
            writer.begin_entry(&long, SimpleFileOptions::default()),
            Err(ZipError::InvalidOperation(_))
        ));
        assert!(matches!(
            writer.begin_entry("x", SimpleFileOptions::default().comment(long)),
            Err(ZipError::InvalidOperation(_))
        ));
        assert_eq!(writer.get_ref().unwrap().get_ref().len(), 0);
    }

    #[test]
    fn reserved_extra_fields() {
        let mut options = SimpleFileOptions::default();
        assert!(options.add_extra_data(0x0001, &[0; 8]).is_err());
        assert!(options.add_extra_data(0x5455, &[1, 0, 0, 0, 0]).is_err());
        options.add_extra_data(0xcafe, b"custom").unwrap();
        assert_eq!(options.extra_data, b"\xfe\xca\x06\x00custom");

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.begin_entry("extra.txt", options).unwrap();
        let data = writer.into_inner().unwrap().into_inner();
        let archive = ZipArchive::new(Cursor::new(data)).unwrap();
        assert_eq!(archive.entries()[0].extra_data(), b"\xfe\xca\x06\x00custom");
    }

    #[test]
    fn extra_data_leaves_room_for_zip64() {
        let mut options = SimpleFileOptions::default();
        options
            .add_extra_data(0xcafe, &vec![0; u16::MAX as usize - 4])
            .unwrap();
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.begin_entry("first.txt", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"kept").unwrap();
        let written = writer.get_ref().unwrap().get_ref().len();
        assert!(matches!(
            writer.begin_entry("big.txt", options),
            Err(ZipError::InvalidOperation(_))
        ));
        // rejected before the previous entry was closed or anything was emitted
        assert!(writer.is_writing_entry());
        assert_eq!(writer.get_ref().unwrap().get_ref().len(), written);

        let mut options = SimpleFileOptions::default();
        options
            .add_extra_data(0xcafe, &vec![0; u16::MAX as usize - 4 - CENTRAL_ZIP64_EXTRA_LEN])
            .unwrap();
        writer.begin_entry("big.txt", options).unwrap();
        let archive = ZipArchive::new(Cursor::new(writer.into_inner().unwrap().into_inner()))
            .unwrap();
        assert_eq!(archive.len(), 2);
    }

    #[test]
    fn bad_compression_level() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        assert!(
            writer
                .begin_entry("x", SimpleFileOptions::default().compression_level(Some(10)))
                .is_err()
        );
    }

    #[test]
    fn directories_and_permissions() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .add_directory("dir", SimpleFileOptions::default().unix_permissions(0o755))
            .unwrap();
        writer
            .begin_entry(
                "dir/exec.sh",
                SimpleFileOptions::default().unix_permissions(0o755),
            )
            .unwrap();
        writer.write_all(b"#!/bin/sh\n").unwrap();
        let data = writer.into_inner().unwrap().into_inner();
        let archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let dir = archive.entry_by_name("dir/").unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.unix_mode(), Some(0o040755));
        assert_eq!(dir.system(), System::Unix);
        let file = archive.entry_by_name("dir/exec.sh").unwrap();
        assert!(file.is_file());
        assert_eq!(file.unix_mode(), Some(0o100755));
    }

    #[test]
    fn large_file_writes_zip64_local_header() {
        for seekable in [true, false] {
            let options = SimpleFileOptions::default().large_file(true);
            let data = if seekable {
                let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
                writer.begin_entry("big.bin", options).unwrap();
                writer.write_all(&[7; 1000]).unwrap();
                writer.into_inner().unwrap().into_inner()
            } else {
                let mut writer = ZipWriter::new_stream(Vec::new());
                writer.begin_entry("big.bin", options).unwrap();
                writer.write_all(&[7; 1000]).unwrap();
                writer.into_inner().unwrap().into_inner()
            };
            let block = ZipLocalEntryBlock::interpret(&data[..ZipLocalEntryBlock::SIZE]).unwrap();
            assert_eq!(block.version_needed, VERSION_NEEDED_ZIP64);
            assert_eq!(block.uncompressed_size, u32::MAX);
            let archive = ZipArchive::new(Cursor::new(data.clone())).unwrap();
            archive.verify(None).unwrap();
            assert_eq!(read_back(data, "big.bin"), vec![7; 1000]);
        }
    }
}
