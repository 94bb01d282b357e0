//! The decompression pipeline behind [`ZipArchive::open_entry`](super::ZipArchive::open_entry):
//! a window of the shared stream, then decryption, then decompression, then verification.

use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, PoisonError};

use flate2::bufread::DeflateDecoder;

use crate::compression::CompressionMethod;
use crate::crc32::{Crc32Reader, Expected};
use crate::read::local_header::DataWindow;
use crate::result::{ZipError, ZipResult, malformed, unsupported};
use crate::spec::flags;
use crate::types::ZipEntryData;
use crate::zipcrypto::{ENCRYPTION_HEADER_LEN, ZipCryptoReader, ZipCryptoReaderValid, ZipCryptoValidator};

/// Reads `[pos, end)` of a stream shared with other readers.
///
/// The stream position belongs to whoever holds the lock, so every read seeks first.
#[derive(Debug)]
pub(crate) struct BoundedReader<R> {
    shared: Arc<Mutex<R>>,
    pos: u64,
    end: u64,
}

impl<R> BoundedReader<R> {
    pub(crate) fn new(shared: Arc<Mutex<R>>, window: DataWindow) -> Self {
        Self {
            shared,
            pos: window.start,
            end: window.start + window.len,
        }
    }
}

impl<R: Read + Seek> Read for BoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end - self.pos;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let len = (buf.len() as u64).min(remaining) as usize;
        let count = {
            // A reader that panicked mid-read leaves nothing behind that a seek doesn't reset.
            let mut stream = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
            stream.seek(SeekFrom::Start(self.pos))?;
            stream.read(&mut buf[..len])?
        };
        if count == 0 {
            return Err(ZipError::corrupt("archive ends inside entry data").into());
        }
        self.pos += count as u64;
        Ok(count)
    }
}

const READ_BUFFER_SIZE: usize = 32 * 1024;

#[derive(Debug)]
pub(crate) enum CryptoReader<R> {
    Plaintext(R),
    ZipCrypto(ZipCryptoReaderValid<R>),
}

impl<R: BufRead> Read for CryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            CryptoReader::Plaintext(r) => r.read(buf),
            CryptoReader::ZipCrypto(r) => r.read(buf),
        }
    }
}

impl<R: BufRead> BufRead for CryptoReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            CryptoReader::Plaintext(r) => r.fill_buf(),
            CryptoReader::ZipCrypto(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            CryptoReader::Plaintext(r) => r.consume(amt),
            CryptoReader::ZipCrypto(r) => r.consume(amt),
        }
    }
}

impl<R> CryptoReader<R> {
    pub(crate) fn into_inner(self) -> R {
        match self {
            CryptoReader::Plaintext(r) => r,
            CryptoReader::ZipCrypto(r) => r.into_inner(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Decompressor<R> {
    Stored(R),
    Deflated(DeflateDecoder<R>),
}

impl<R: BufRead> Decompressor<R> {
    pub(crate) fn new(reader: R, method: CompressionMethod) -> ZipResult<Self> {
        match method {
            CompressionMethod::Stored => Ok(Decompressor::Stored(reader)),
            CompressionMethod::Deflated => Ok(Decompressor::Deflated(DeflateDecoder::new(reader))),
            other => unsupported(format!("compression method {other}")),
        }
    }

    pub(crate) fn into_inner(self) -> R {
        match self {
            Decompressor::Stored(r) => r,
            Decompressor::Deflated(r) => r.into_inner(),
        }
    }
}

impl<R: BufRead> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::Stored(r) => r.read(buf),
            Decompressor::Deflated(r) => r.read(buf),
        }
    }
}

/// Rejects entries this crate can't decode, before any byte of them is read.
pub(crate) fn check_supported(entry_flags: u16, method: CompressionMethod) -> ZipResult<()> {
    if entry_flags & flags::STRONG_ENCRYPTION != 0
        || method.serialize_to_u16() == CompressionMethod::AES
    {
        return unsupported("strong encryption");
    }
    if entry_flags & flags::MASKED_HEADER != 0 {
        return unsupported("masked local headers");
    }
    if !method.is_supported() {
        return unsupported(format!("compression method {method}"));
    }
    Ok(())
}

/// Chooses what the decrypted ZipCrypto header is checked against.
pub(crate) fn crypto_validator(entry_flags: u16, crc32: u32, dos_time: u16) -> ZipCryptoValidator {
    if entry_flags & flags::DATA_DESCRIPTOR != 0 {
        ZipCryptoValidator::InfoZipMsdosTime(dos_time)
    } else {
        ZipCryptoValidator::PkzipCrc32(crc32)
    }
}

/// Wraps a raw payload reader with decryption when the entry needs it.
pub(crate) fn make_crypto_reader<R: BufRead>(
    reader: R,
    password: Option<&[u8]>,
    validator: ZipCryptoValidator,
) -> ZipResult<CryptoReader<R>> {
    match password {
        None => Ok(CryptoReader::Plaintext(reader)),
        Some(password) => Ok(CryptoReader::ZipCrypto(
            ZipCryptoReader::new(reader, password).validate(validator)?,
        )),
    }
}

/// Errors the codecs raise on bad input, as opposed to failures of the stream itself.
pub(crate) fn is_codec_error(err: &io::Error) -> bool {
    err.get_ref().is_none_or(|inner| !inner.is::<ZipError>())
        && matches!(
            err.kind(),
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData
        )
}

/// A decompressing, verifying reader for one archive entry.
///
/// End of stream is only reported once the entry's declared size has been produced and its
/// CRC-32 matches; anything else fails with [`ZipError::CorruptEntry`].
#[derive(Debug)]
pub struct ZipEntryReader<R> {
    inner: Crc32Reader<Decompressor<CryptoReader<BufReader<BoundedReader<R>>>>>,
    entry: ZipEntryData,
}

impl<R: Read + Seek> ZipEntryReader<R> {
    pub(crate) fn new(
        shared: Arc<Mutex<R>>,
        window: DataWindow,
        entry: &ZipEntryData,
        password: Option<&[u8]>,
    ) -> ZipResult<Self> {
        let encrypted = entry.encrypted();
        if encrypted && window.len < ENCRYPTION_HEADER_LEN {
            return malformed("encrypted entry is shorter than its header");
        }
        if !encrypted
            && entry.compression_method == CompressionMethod::Stored
            && entry.compressed_size != entry.uncompressed_size
        {
            return malformed("stored entry sizes differ");
        }

        let raw = BufReader::with_capacity(READ_BUFFER_SIZE, BoundedReader::new(shared, window));
        let validator = crypto_validator(
            entry.flags,
            entry.crc32,
            entry.last_modified_time.timepart(),
        );
        let password = if encrypted { password } else { None };
        let decrypted = make_crypto_reader(raw, password, validator)?;
        let decompressed = Decompressor::new(decrypted, entry.compression_method)?;
        let expected = Expected {
            crc32: entry.crc32,
            size: entry.uncompressed_size,
        };
        Ok(Self {
            inner: Crc32Reader::new(decompressed, Some(expected)),
            entry: entry.clone(),
        })
    }
}

impl<R> ZipEntryReader<R> {
    /// The entry being read
    pub fn entry(&self) -> &ZipEntryData {
        &self.entry
    }

    /// Name of the entry being read
    pub fn name(&self) -> &str {
        self.entry.name()
    }

    /// Size of the entry once extracted
    pub fn size(&self) -> u64 {
        self.entry.size()
    }
}

impl<R: Read + Seek> Read for ZipEntryReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|err| {
            if is_codec_error(&err) {
                ZipError::corrupt(format!("{}: {err}", self.entry.file_name)).into()
            } else {
                err
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn bounded_reader_stays_in_window() {
        let shared = Arc::new(Mutex::new(Cursor::new(b"0123456789".to_vec())));
        let mut reader = BoundedReader::new(shared.clone(), DataWindow { start: 3, len: 4 });
        // another user moving the cursor doesn't matter
        shared.lock().unwrap().set_position(9);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "3456");
    }

    #[test]
    fn truncated_stream_is_corrupt() {
        let shared = Arc::new(Mutex::new(Cursor::new(b"0123".to_vec())));
        let mut reader = BoundedReader::new(shared, DataWindow { start: 2, len: 10 });
        let mut out = Vec::new();
        let err = ZipError::from(reader.read_to_end(&mut out).unwrap_err());
        assert!(matches!(err, ZipError::CorruptEntry(_)));
    }

    #[test]
    fn unsupported_entries() {
        assert!(check_supported(0, CompressionMethod::Deflated).is_ok());
        assert!(matches!(
            check_supported(flags::STRONG_ENCRYPTION | 1, CompressionMethod::Deflated),
            Err(ZipError::UnsupportedFeature(_))
        ));
        assert!(matches!(
            check_supported(1, CompressionMethod::Unsupported(99)),
            Err(ZipError::UnsupportedFeature(msg)) if msg == "strong encryption"
        ));
        assert!(matches!(
            check_supported(flags::MASKED_HEADER, CompressionMethod::Stored),
            Err(ZipError::UnsupportedFeature(_))
        ));
        assert!(matches!(
            check_supported(0, CompressionMethod::Unsupported(14)),
            Err(ZipError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn validator_choice() {
        assert_eq!(
            crypto_validator(flags::DATA_DESCRIPTOR, 0xAABBCCDD, 0x1234),
            ZipCryptoValidator::InfoZipMsdosTime(0x1234)
        );
        assert_eq!(
            crypto_validator(0, 0xAABBCCDD, 0x1234),
            ZipCryptoValidator::PkzipCrc32(0xAABBCCDD)
        );
    }
}
