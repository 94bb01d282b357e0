//! Types for reading ZIP archives

use crate::compression::CompressionMethod;
use crate::cp437::FromCp437;
use crate::extra_fields::{ExtraField, Zip64Wants, parse_extra_fields};
use crate::result::{ZipError, ZipResult, malformed, unsupported};
use crate::spec::{
    self, FixedSizeBlock, LittleEndianReadExt, Zip32CentralDirectoryEnd, Zip64CDEBlock,
    Zip64CDELocatorBlock, ZipCentralEntryBlock, flags,
};
use crate::types::{DateTime, ZipEntryData};
use indexmap::IndexMap;
use log::debug;
use std::borrow::Cow;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, PoisonError};

mod config;
pub(crate) mod entry;
pub(crate) mod local_header;
mod magic_finder;

/// Provides high level API for reading from a stream.
pub mod stream;

pub use config::*;
pub use entry::ZipEntryReader;

use local_header::{Placement, validate_for_integrity, validate_for_read};

/// What the end-of-central-directory records say about the central directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CentralDirectoryInfo {
    /// Bytes in front of the archive content.
    archive_offset: u64,
    /// Absolute offset of the first central directory record.
    directory_start: u64,
    directory_size: u64,
    number_of_files: u64,
    /// Where the central directory must end: the zip64 record, or the end record.
    directory_end_limit: u64,
    is_zip64: bool,
}

/// Everything decoded when the archive was opened.
#[derive(Debug)]
struct Shared<R> {
    reader: Arc<Mutex<R>>,
    files: Vec<ZipEntryData>,
    names: IndexMap<Box<str>, usize>,
    info: CentralDirectoryInfo,
    comment: Box<[u8]>,
    config: Config,
}

/// ZIP archive reader
///
/// The entry table is decoded once, when the archive is opened. Entries are then read through
/// [`open_entry`](Self::open_entry) and friends, which only need `&self`: readers opened from
/// the same archive, on the same thread or on several, share the underlying stream behind a
/// mutex and seek before each read.
///
/// ```no_run
/// use std::io::prelude::*;
/// fn list_zip_contents(reader: impl Read + Seek) -> zipcodec::result::ZipResult<()> {
///     let zip = zipcodec::ZipArchive::new(reader)?;
///
///     for entry in zip.entries() {
///         println!("Filename: {}", entry.name());
///         let mut reader = zip.open_entry(entry, None)?;
///         std::io::copy(&mut reader, &mut std::io::stdout())?;
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct ZipArchive<R> {
    shared: Option<Shared<R>>,
}

impl<R> ZipArchive<R> {
    fn shared(&self) -> ZipResult<&Shared<R>> {
        self.shared
            .as_ref()
            .ok_or(ZipError::InvalidOperation(Cow::Borrowed("archive is closed")))
    }

    /// The entries in central directory order; empty once the archive is closed.
    pub fn entries(&self) -> &[ZipEntryData] {
        self.shared.as_ref().map_or(&[], |shared| &shared.files)
    }

    /// Number of files contained in this zip.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether this zip archive contains no files
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the offset from the beginning of the underlying reader that this zip begins at, in
    /// bytes.
    ///
    /// Normally this value is zero, but if the zip has arbitrary data prepended to it (such as
    /// a self-extracting stub), this value is the size of that prepended data.
    pub fn offset(&self) -> u64 {
        self.shared.as_ref().map_or(0, |shared| shared.info.archive_offset)
    }

    /// Whether the central directory was located through zip64 records.
    pub fn is_zip64(&self) -> bool {
        self.shared.as_ref().is_some_and(|shared| shared.info.is_zip64)
    }

    /// Get the comment of the zip archive.
    pub fn comment(&self) -> &[u8] {
        self.shared.as_ref().map_or(&[], |shared| &shared.comment)
    }

    /// Returns an iterator over all the file and directory names in this archive.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.entries().iter().map(ZipEntryData::name)
    }

    /// Get the index of a file entry by name, if it's present. The first of several entries
    /// with the same name wins.
    pub fn index_for_name(&self, name: &str) -> Option<usize> {
        let shared = self.shared.as_ref()?;
        let key = name_key(name, &shared.config);
        shared.names.get(&*key).copied()
    }

    /// Get the name of a file entry, if it's present.
    pub fn name_for_index(&self, index: usize) -> Option<&str> {
        self.entries().get(index).map(ZipEntryData::name)
    }

    /// The entry at `index`.
    pub fn entry(&self, index: usize) -> ZipResult<&ZipEntryData> {
        self.shared()?.files.get(index).ok_or(ZipError::FileNotFound)
    }

    /// The entry called `name`.
    pub fn entry_by_name(&self, name: &str) -> ZipResult<&ZipEntryData> {
        self.shared()?;
        let index = self.index_for_name(name).ok_or(ZipError::FileNotFound)?;
        self.entry(index)
    }

    /// Releases the entry table and this handle's reference to the stream.
    ///
    /// Later lookups fail with [`ZipError::InvalidOperation`]. Closing twice is harmless, and
    /// readers that are already open keep working until they are dropped.
    pub fn close(&mut self) {
        if self.shared.take().is_some() {
            debug!("archive closed");
        }
    }

    /// Returns the stream, or `None` if the archive is closed or entry readers still hold it.
    pub fn into_inner(self) -> Option<R> {
        let shared = self.shared?;
        let mutex = Arc::into_inner(shared.reader)?;
        Some(mutex.into_inner().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<R: Read + Seek> ZipArchive<R> {
    /// Read a ZIP archive, collecting the files it contains.
    ///
    /// This uses the central directory record of the ZIP file, and ignores local file headers
    /// until an entry is opened. A default [`Config`] is used.
    pub fn new(reader: R) -> ZipResult<ZipArchive<R>> {
        Self::with_config(Config::default(), reader)
    }

    /// Read a ZIP archive providing a read configuration, collecting the files it contains.
    pub fn with_config(config: Config, mut reader: R) -> ZipResult<ZipArchive<R>> {
        let len = reader.seek(SeekFrom::End(0))?;
        let (footer_pos, footer) = magic_finder::find_central_directory_end(&mut reader, len)?;
        let info = Self::get_directory_info(&config, &mut reader, footer_pos, &footer)?;

        let files = Self::read_central_directory(&mut reader, &info)?;
        let mut names = IndexMap::with_capacity(files.len());
        for file in &files {
            names
                .entry(name_key(&file.file_name, &config).into_owned().into_boxed_str())
                .or_insert(file.index);
        }

        debug!(
            "opened archive: {} entries, offset {}, zip64 {}",
            files.len(),
            info.archive_offset,
            info.is_zip64
        );

        Ok(ZipArchive {
            shared: Some(Shared {
                reader: Arc::new(Mutex::new(reader)),
                files,
                names,
                info,
                comment: footer.zip_file_comment,
                config,
            }),
        })
    }

    fn get_directory_info(
        config: &Config,
        reader: &mut R,
        footer_pos: u64,
        footer: &Zip32CentralDirectoryEnd,
    ) -> ZipResult<CentralDirectoryInfo> {
        let block = &footer.block;
        let zip64 = Self::find_zip64_record(reader, footer_pos, footer)?;

        let (disks_ok, number_of_files, directory_size, directory_offset, directory_end_limit) =
            match &zip64 {
                Some((record_pos, record)) => (
                    record.disk_number == 0
                        && record.disk_with_central_directory == 0
                        && record.number_of_files_on_this_disk == record.number_of_files,
                    record.number_of_files,
                    record.central_directory_size,
                    record.central_directory_offset,
                    *record_pos,
                ),
                None => (
                    block.disk_number == 0
                        && block.disk_with_central_directory == 0
                        && block.number_of_files_on_this_disk == block.number_of_files,
                    block.number_of_files.into(),
                    block.central_directory_size.into(),
                    block.central_directory_offset.into(),
                    footer_pos,
                ),
            };
        if !disks_ok {
            return unsupported("multi-disk archives");
        }

        let archive_offset = match config.archive_offset {
            ArchiveOffset::Known(n) => n,
            ArchiveOffset::Detect => {
                // Prepended bytes shift where the directory actually ends relative to where it
                // says it starts.
                let Some(offset) = directory_end_limit
                    .checked_sub(directory_size)
                    .and_then(|start| start.checked_sub(directory_offset))
                else {
                    return malformed("invalid SFX prefix");
                };
                if offset > 0
                    && !Self::has_central_header_at(reader, offset + directory_offset)?
                    && Self::has_central_header_at(reader, directory_offset)?
                {
                    // Padding between directory and end record rather than an SFX stub.
                    0
                } else {
                    offset
                }
            }
        };

        let Some(directory_start) = directory_offset.checked_add(archive_offset) else {
            return malformed("invalid central directory offset");
        };
        match directory_start.checked_add(directory_size) {
            Some(end) if end <= directory_end_limit => {}
            _ => return malformed("central directory extends past its end record"),
        }
        // Every record takes at least 46 bytes; reject counts the directory can't hold before
        // allocating for them.
        if number_of_files > directory_size / ZipCentralEntryBlock::SIZE as u64 {
            return malformed("entry count exceeds central directory size");
        }

        Ok(CentralDirectoryInfo {
            archive_offset,
            directory_start,
            directory_size,
            number_of_files,
            directory_end_limit,
            is_zip64: zip64.is_some(),
        })
    }

    fn has_central_header_at(reader: &mut R, pos: u64) -> ZipResult<bool> {
        reader.seek(SeekFrom::Start(pos))?;
        match reader.read_u32_le() {
            Ok(magic) => Ok(magic == spec::CENTRAL_DIRECTORY_HEADER_SIGNATURE),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Locates the zip64 end record through the locator that precedes the end record.
    ///
    /// The record normally sits right before the locator; otherwise the locator's recorded
    /// offset is tried, which is only right when nothing was prepended to the archive.
    fn find_zip64_record(
        reader: &mut R,
        footer_pos: u64,
        footer: &Zip32CentralDirectoryEnd,
    ) -> ZipResult<Option<(u64, Zip64CDEBlock)>> {
        let locator = match footer_pos.checked_sub(Zip64CDELocatorBlock::SIZE as u64) {
            Some(locator_pos) => {
                reader.seek(SeekFrom::Start(locator_pos))?;
                Zip64CDELocatorBlock::parse(reader)
                    .ok()
                    .map(|locator| (locator_pos, locator))
            }
            None => None,
        };
        let Some((locator_pos, locator)) = locator else {
            if footer.requires_zip64() {
                return malformed("missing zip64 end of central directory locator");
            }
            return Ok(None);
        };
        if footer.requires_zip64()
            && (locator.disk_with_central_directory != 0 || locator.number_of_disks > 1)
        {
            return unsupported("multi-disk archives");
        }

        let adjacent = locator_pos.checked_sub(Zip64CDEBlock::SIZE as u64);
        for pos in adjacent
            .into_iter()
            .chain([locator.end_of_central_directory_offset])
        {
            match pos.checked_add(Zip64CDEBlock::SIZE as u64) {
                Some(end) if end <= locator_pos => {}
                _ => continue,
            }
            reader.seek(SeekFrom::Start(pos))?;
            if let Ok(record) = Zip64CDEBlock::parse(reader) {
                return Ok(Some((pos, record)));
            }
        }
        if footer.requires_zip64() {
            return malformed("zip64 end of central directory record not found");
        }
        // The locator signature was payload bytes that happened to sit there.
        Ok(None)
    }

    fn read_central_directory(
        reader: &mut R,
        info: &CentralDirectoryInfo,
    ) -> ZipResult<Vec<ZipEntryData>> {
        reader.seek(SeekFrom::Start(info.directory_start))?;
        let mut directory = Vec::new();
        reader
            .by_ref()
            .take(info.directory_size)
            .read_to_end(&mut directory)?;
        if (directory.len() as u64) < info.directory_size {
            return malformed("central directory is truncated");
        }

        let mut records = &directory[..];
        let mut files = Vec::with_capacity(info.number_of_files as usize);
        for index in 0..info.number_of_files as usize {
            let file = central_header_to_zip_entry(&mut records, index)?;
            match info.archive_offset.checked_add(file.header_start) {
                Some(start) if start < info.directory_start => {}
                _ => return malformed("local header offset out of range"),
            }
            files.push(file);
        }
        Ok(files)
    }

    fn placement(shared: &Shared<R>) -> Placement {
        Placement {
            base_offset: shared.info.archive_offset,
            data_limit: shared.info.directory_start,
        }
    }

    /// Checks that `entry` came from this archive.
    fn own_entry<'a>(shared: &'a Shared<R>, entry: &ZipEntryData) -> ZipResult<&'a ZipEntryData> {
        match shared.files.get(entry.index) {
            Some(own) if own == entry => Ok(own),
            _ => Err(ZipError::invalid_operation(
                "entry does not belong to this archive",
            )),
        }
    }

    /// Opens an entry for reading, decrypting it with `password` if it is encrypted.
    ///
    /// Fails with [`ZipError::PasswordRequired`] before reading anything if the entry is
    /// encrypted and no password was given, and with [`ZipError::InvalidPassword`] if the
    /// password doesn't match the entry's encryption header.
    pub fn open_entry(
        &self,
        entry: &ZipEntryData,
        password: Option<&[u8]>,
    ) -> ZipResult<ZipEntryReader<R>> {
        let shared = self.shared()?;
        let entry = Self::own_entry(shared, entry)?;
        entry::check_supported(entry.flags, entry.compression_method)?;
        if entry.encrypted() && password.is_none() {
            return Err(ZipError::PasswordRequired);
        }
        let window = {
            let mut stream = shared.reader.lock().unwrap_or_else(PoisonError::into_inner);
            validate_for_read(&mut *stream, Self::placement(shared), entry)?
        };
        ZipEntryReader::new(shared.reader.clone(), window, entry, password)
    }

    /// Opens the entry at `index`.
    pub fn by_index(&self, index: usize) -> ZipResult<ZipEntryReader<R>> {
        self.open_entry(self.entry(index)?, None)
    }

    /// Opens the encrypted entry at `index`.
    pub fn by_index_decrypt(&self, index: usize, password: &[u8]) -> ZipResult<ZipEntryReader<R>> {
        self.open_entry(self.entry(index)?, Some(password))
    }

    /// Opens the entry called `name`.
    pub fn by_name(&self, name: &str) -> ZipResult<ZipEntryReader<R>> {
        self.open_entry(self.entry_by_name(name)?, None)
    }

    /// Opens the encrypted entry called `name`.
    pub fn by_name_decrypt(&self, name: &str, password: &[u8]) -> ZipResult<ZipEntryReader<R>> {
        self.open_entry(self.entry_by_name(name)?, Some(password))
    }

    /// Tests the whole archive: every local header is checked strictly against its central
    /// record, then every entry that can be read is read to the end, verifying size and CRC.
    ///
    /// Encrypted entries are skipped when no password is given.
    pub fn verify(&self, password: Option<&[u8]>) -> ZipResult<()> {
        let shared = self.shared()?;
        for entry in &shared.files {
            {
                let mut stream = shared.reader.lock().unwrap_or_else(PoisonError::into_inner);
                validate_for_integrity(&mut *stream, Self::placement(shared), entry)?;
            }
            let readable = entry::check_supported(entry.flags, entry.compression_method).is_ok()
                && (password.is_some() || !entry.encrypted());
            if entry.is_dir() || !readable {
                continue;
            }
            let mut reader = self.open_entry(entry, password)?;
            io::copy(&mut reader, &mut io::sink())?;
        }
        Ok(())
    }
}

fn name_key<'a>(name: &'a str, config: &Config) -> Cow<'a, str> {
    if config.case_insensitive_names {
        Cow::Owned(name.to_ascii_lowercase())
    } else {
        Cow::Borrowed(name)
    }
}

fn read_variable_length_byte_field(reader: &mut &[u8], len: usize) -> ZipResult<Box<[u8]>> {
    if reader.len() < len {
        return malformed("central directory record is truncated");
    }
    let (field, rest) = reader.split_at(len);
    *reader = rest;
    Ok(field.into())
}

fn decode_text(raw: &[u8], is_utf8: bool) -> Box<str> {
    if is_utf8 {
        String::from_utf8_lossy(raw).into()
    } else {
        raw.from_cp437()
    }
}

/// Parse a central directory record to collect the information for the entry.
fn central_header_to_zip_entry(records: &mut &[u8], index: usize) -> ZipResult<ZipEntryData> {
    if records.len() < ZipCentralEntryBlock::SIZE {
        return malformed("central directory record is truncated");
    }
    let block = ZipCentralEntryBlock::interpret(&records[..ZipCentralEntryBlock::SIZE])?;
    *records = &records[ZipCentralEntryBlock::SIZE..];

    let ZipCentralEntryBlock {
        version_made_by,
        version_needed,
        flags,
        compression_method,
        last_mod_time,
        last_mod_date,
        crc32,
        compressed_size,
        uncompressed_size,
        file_name_length,
        extra_field_length,
        file_comment_length,
        internal_file_attributes,
        external_file_attributes,
        offset,
        ..
    } = block;

    let is_utf8 = flags & flags::UTF8 != 0;
    let file_name_raw = read_variable_length_byte_field(records, file_name_length as usize)?;
    let extra_data = read_variable_length_byte_field(records, extra_field_length as usize)?;
    let file_comment_raw = read_variable_length_byte_field(records, file_comment_length as usize)?;

    let wants = Zip64Wants {
        uncompressed_size: uncompressed_size == u32::MAX,
        compressed_size: compressed_size == u32::MAX,
        header_start: offset == u32::MAX,
    };
    let extra_fields = parse_extra_fields(&extra_data, wants)?;

    let mut result = ZipEntryData {
        index,
        version_made_by,
        version_needed,
        flags,
        compression_method: CompressionMethod::parse_from_u16(compression_method),
        last_modified_time: DateTime::from_msdos(last_mod_date, last_mod_time),
        crc32,
        compressed_size: compressed_size.into(),
        uncompressed_size: uncompressed_size.into(),
        file_name: decode_text(&file_name_raw, is_utf8),
        file_name_raw,
        extra_data,
        extra_fields,
        file_comment: decode_text(&file_comment_raw, is_utf8),
        header_start: offset.into(),
        internal_attributes: internal_file_attributes,
        external_attributes: external_file_attributes,
    };

    let zip64 = result.extra_fields.iter().find_map(|field| match field {
        ExtraField::Zip64(info) => Some(*info),
        _ => None,
    });
    if let Some(zip64) = zip64 {
        if let Some(size) = zip64.uncompressed_size() {
            result.uncompressed_size = size;
        }
        if let Some(size) = zip64.compressed_size() {
            result.compressed_size = size;
        }
        if let Some(start) = zip64.header_start() {
            result.header_start = start;
        }
    } else if wants != Zip64Wants::default() {
        return malformed("zip64 sentinel without zip64 extended information");
    }

    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::write::{FileOptions, ZipWriter};
    use std::io::{Cursor, Write};

    fn archive_bytes() -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .begin_entry("first.txt", FileOptions::default())
            .unwrap();
        writer.write_all(b"hello").unwrap();
        writer
            .begin_entry(
                "Second.txt",
                FileOptions::default().compression_method(CompressionMethod::Stored),
            )
            .unwrap();
        writer.write_all(b"world").unwrap();
        writer.set_comment("archive comment");
        writer.into_inner().unwrap().into_inner()
    }

    #[test]
    fn invalid_offset() {
        let mut data = archive_bytes();
        let len = data.len();
        // central directory offset in the end record
        data[len - 22 - 15 + 16..len - 22 - 15 + 20].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(ZipArchive::new(Cursor::new(data)).is_err());
    }

    #[test]
    fn lookups() {
        let archive = ZipArchive::new(Cursor::new(archive_bytes())).unwrap();
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.comment(), b"archive comment");
        assert_eq!(archive.index_for_name("Second.txt"), Some(1));
        assert_eq!(archive.index_for_name("second.txt"), None);
        assert_eq!(archive.name_for_index(0), Some("first.txt"));
        assert_eq!(
            archive.file_names().collect::<Vec<_>>(),
            ["first.txt", "Second.txt"]
        );
        assert!(matches!(
            archive.by_name("missing"),
            Err(ZipError::FileNotFound)
        ));
    }

    #[test]
    fn case_insensitive_lookup() {
        let config = Config {
            case_insensitive_names: true,
            ..Config::default()
        };
        let archive = ZipArchive::with_config(config, Cursor::new(archive_bytes())).unwrap();
        assert_eq!(archive.index_for_name("SECOND.TXT"), Some(1));
        let mut content = String::new();
        archive
            .by_name("second.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "world");
    }

    #[test]
    fn closed_archive() {
        let mut archive = ZipArchive::new(Cursor::new(archive_bytes())).unwrap();
        let entry = archive.entries()[0].clone();
        let mut open = archive.open_entry(&entry, None).unwrap();
        archive.close();
        archive.close();
        assert!(archive.entries().is_empty());
        assert!(matches!(
            archive.open_entry(&entry, None),
            Err(ZipError::InvalidOperation(_))
        ));
        assert!(matches!(
            archive.by_index(0),
            Err(ZipError::InvalidOperation(_))
        ));
        // readers opened before closing still work
        let mut content = Vec::new();
        open.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"hello");
    }

    #[test]
    fn foreign_entry() {
        let archive = ZipArchive::new(Cursor::new(archive_bytes())).unwrap();
        let mut entry = archive.entries()[0].clone();
        entry.header_start += 1;
        assert!(matches!(
            archive.open_entry(&entry, None),
            Err(ZipError::InvalidOperation(_))
        ));
    }

    #[test]
    fn local_header_mismatch() {
        let mut data = archive_bytes();
        // compression method of the first local header
        data[8] = 0;
        let archive = ZipArchive::new(Cursor::new(data)).unwrap();
        match archive.by_index(0) {
            Err(ZipError::MalformedArchive(msg)) => {
                assert_eq!(msg, "central/local header mismatch")
            }
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("mismatch went unnoticed"),
        }
    }

    #[test]
    fn strict_check_catches_crc_change() {
        let mut data = archive_bytes();
        // the lenient check ignores the local CRC, the strict one doesn't
        data[14] ^= 0xff;
        let archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let mut content = Vec::new();
        archive
            .by_index(0)
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert!(matches!(
            archive.verify(None),
            Err(ZipError::MalformedArchive(_))
        ));
    }

    #[test]
    fn multi_disk_is_unsupported() {
        let mut data = archive_bytes();
        let footer = data.len() - 22 - 15;
        // number of this disk
        data[footer + 4] = 1;
        assert!(matches!(
            ZipArchive::new(Cursor::new(data)),
            Err(ZipError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn overlarge_entry_count() {
        let mut data = archive_bytes();
        let footer = data.len() - 22 - 15;
        data[footer + 8..footer + 12].copy_from_slice(&[0xff, 0x0f, 0xff, 0x0f]);
        assert!(matches!(
            ZipArchive::new(Cursor::new(data)),
            Err(ZipError::MalformedArchive(_))
        ));
    }
}
