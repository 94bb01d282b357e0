//! Implementation of the ZipCrypto algorithm
//!
//! The legacy PKWARE stream cipher. Both directions advance the keys with the plaintext byte,
//! so decryption updates with the byte it produces and encryption with the byte it consumes.

use std::fmt::{Debug, Formatter};
use std::io::{self, BufRead, Read, Write};
use std::num::Wrapping;

use crate::crc32::update_byte;
use crate::result::{ZipError, ZipResult};

/// Length of the random header that precedes every encrypted payload.
pub(crate) const ENCRYPTION_HEADER_LEN: u64 = 12;

/// A container to hold the current key state
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct ZipCryptoKeys {
    key_0: Wrapping<u32>,
    key_1: Wrapping<u32>,
    key_2: Wrapping<u32>,
}

impl Debug for ZipCryptoKeys {
    // The key state is as sensitive as the password it was derived from.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("ZipCryptoKeys(..)")
    }
}

impl ZipCryptoKeys {
    const fn new() -> ZipCryptoKeys {
        ZipCryptoKeys {
            key_0: Wrapping(0x12345678),
            key_1: Wrapping(0x23456789),
            key_2: Wrapping(0x34567890),
        }
    }

    /// Seeds the three key words from a password.
    pub(crate) fn derive(password: &[u8]) -> ZipCryptoKeys {
        let mut keys = ZipCryptoKeys::new();
        for &byte in password {
            keys.update(byte);
        }
        keys
    }

    #[inline]
    fn update(&mut self, input: u8) {
        self.key_0 = Wrapping(update_byte(self.key_0.0, input));
        self.key_1 = (self.key_1 + (self.key_0 & Wrapping(0xff))) * Wrapping(0x08088405) + Wrapping(1);
        self.key_2 = Wrapping(update_byte(self.key_2.0, (self.key_1 >> 24).0 as u8));
    }

    #[inline]
    fn stream_byte(&self) -> u8 {
        let temp = Wrapping(self.key_2.0 as u16) | Wrapping(2);
        ((temp * (temp ^ Wrapping(1))) >> 8).0 as u8
    }

    #[inline]
    pub(crate) fn decrypt_byte(&mut self, cipher_byte: u8) -> u8 {
        let plain_byte = self.stream_byte() ^ cipher_byte;
        self.update(plain_byte);
        plain_byte
    }

    #[inline]
    pub(crate) fn encrypt_byte(&mut self, plain_byte: u8) -> u8 {
        let cipher_byte = self.stream_byte() ^ plain_byte;
        self.update(plain_byte);
        cipher_byte
    }
}

/// What the last byte of the decrypted header is checked against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ZipCryptoValidator {
    /// High byte of the entry's CRC-32.
    PkzipCrc32(u32),
    /// High byte of the DOS time, used when the CRC was unknown as the header was written.
    InfoZipMsdosTime(u16),
}

impl ZipCryptoValidator {
    pub(crate) const fn check_byte(self) -> u8 {
        match self {
            ZipCryptoValidator::PkzipCrc32(crc32) => (crc32 >> 24) as u8,
            ZipCryptoValidator::InfoZipMsdosTime(time) => (time >> 8) as u8,
        }
    }
}

/// A ZipCrypto reader whose header has not been checked yet.
#[derive(Debug)]
pub(crate) struct ZipCryptoReader<R> {
    file: R,
    keys: ZipCryptoKeys,
}

impl<R: BufRead> ZipCryptoReader<R> {
    pub(crate) fn new(file: R, password: &[u8]) -> ZipCryptoReader<R> {
        ZipCryptoReader {
            file,
            keys: ZipCryptoKeys::derive(password),
        }
    }

    /// Consumes the 12-byte header and checks the password against it.
    ///
    /// A single check byte means a wrong password slips through about once in 256 tries;
    /// the CRC check at the end of the entry catches those.
    pub(crate) fn validate(
        self,
        validator: ZipCryptoValidator,
    ) -> ZipResult<ZipCryptoReaderValid<R>> {
        self.validate_or_recover(validator).map_err(|(err, _)| err)
    }

    /// Like [`validate`](Self::validate), but hands the source back on failure so the caller
    /// can skip the rest of the entry.
    pub(crate) fn validate_or_recover(
        mut self,
        validator: ZipCryptoValidator,
    ) -> Result<ZipCryptoReaderValid<R>, (ZipError, R)> {
        let mut header = [0u8; ENCRYPTION_HEADER_LEN as usize];
        if let Err(err) = self.file.read_exact(&mut header) {
            return Err((err.into(), self.file));
        }
        let mut last = 0;
        for byte in header {
            last = self.keys.decrypt_byte(byte);
        }
        if last != validator.check_byte() {
            return Err((ZipError::InvalidPassword, self.file));
        }
        Ok(ZipCryptoReaderValid {
            reader: self,
            plain: Vec::new(),
        })
    }
}

/// Decrypting reader over a buffered source.
///
/// The buffered window is decrypted with a copy of the keys; the real keys only advance over
/// bytes that are consumed, so nothing past the point the consumer stops at is taken from the
/// source.
#[derive(Debug)]
pub(crate) struct ZipCryptoReaderValid<R> {
    reader: ZipCryptoReader<R>,
    plain: Vec<u8>,
}

impl<R> ZipCryptoReaderValid<R> {
    pub(crate) fn into_inner(self) -> R {
        self.reader.file
    }
}

impl<R: BufRead> BufRead for ZipCryptoReaderValid<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.plain.is_empty() {
            let mut keys = self.reader.keys;
            let cipher = self.reader.file.fill_buf()?;
            self.plain
                .extend(cipher.iter().map(|&byte| keys.decrypt_byte(byte)));
        }
        Ok(&self.plain)
    }

    fn consume(&mut self, amt: usize) {
        let amt = amt.min(self.plain.len());
        for &byte in &self.plain[..amt] {
            self.reader.keys.update(byte);
        }
        self.plain.drain(..amt);
        self.reader.file.consume(amt);
    }
}

impl<R: BufRead> Read for ZipCryptoReaderValid<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.consume(count);
        Ok(count)
    }
}

/// Encrypting writer; emits the 12-byte header on construction.
pub(crate) struct ZipCryptoWriter<W> {
    writer: W,
    keys: ZipCryptoKeys,
    scratch: Vec<u8>,
}

impl<W> Debug for ZipCryptoWriter<W> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipCryptoWriter").finish_non_exhaustive()
    }
}

impl<W: Write> ZipCryptoWriter<W> {
    pub(crate) fn new(
        mut writer: W,
        password: &[u8],
        validator: ZipCryptoValidator,
    ) -> io::Result<ZipCryptoWriter<W>> {
        let mut keys = ZipCryptoKeys::derive(password);
        let mut header = [0u8; ENCRYPTION_HEADER_LEN as usize];
        getrandom::fill(&mut header).map_err(io::Error::from)?;
        header[ENCRYPTION_HEADER_LEN as usize - 1] = validator.check_byte();
        for byte in header.iter_mut() {
            *byte = keys.encrypt_byte(*byte);
        }
        writer.write_all(&header)?;
        Ok(ZipCryptoWriter {
            writer,
            keys,
            scratch: Vec::new(),
        })
    }
}

impl<W> ZipCryptoWriter<W> {
    pub(crate) fn get_ref(&self) -> &W {
        &self.writer
    }

    pub(crate) fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Write for ZipCryptoWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // The keys advance as bytes are encrypted, so the whole chunk must reach the sink.
        self.scratch.clear();
        let keys = &mut self.keys;
        self.scratch
            .extend(buf.iter().map(|&byte| keys.encrypt_byte(byte)));
        self.writer.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
