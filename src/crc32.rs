//! Helper module to compute a CRC32 checksum

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

use crate::result::ZipError;

/// IEEE CRC-32 table without the pre/post inversion that [`Hasher`] applies, for callers that
/// fold single bytes into a raw register (the ZipCrypto key schedule).
const RAW_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xedb8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
};

/// Folds one byte into a raw CRC-32 register.
#[inline]
pub(crate) const fn update_byte(crc: u32, byte: u8) -> u32 {
    (crc >> 8) ^ RAW_TABLE[((crc ^ byte as u32) & 0xff) as usize]
}

/// CRC-32 of a whole buffer.
pub(crate) fn checksum(buf: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(buf);
    hasher.finalize()
}

/// Size and checksum the stream must end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Expected {
    pub crc32: u32,
    pub size: u64,
}

/// Reader that validates the size and CRC32 when it reaches the EOF.
///
/// A mismatch surfaces as [`ZipError::CorruptEntry`] tunnelled through [`io::Error`]. Without
/// an expectation the reader only accumulates, and the caller checks the totals itself.
#[derive(Debug)]
pub(crate) struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    read: u64,
    expected: Option<Expected>,
}

impl<R> Crc32Reader<R> {
    pub(crate) fn new(inner: R, expected: Option<Expected>) -> Self {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            read: 0,
            expected,
        }
    }

    fn check_matches(&self) -> Result<(), ZipError> {
        let Some(expected) = self.expected else {
            return Ok(());
        };
        if self.read != expected.size {
            return Err(ZipError::corrupt(format!(
                "entry ended after {} of {} bytes",
                self.read, expected.size
            )));
        }
        if self.crc32() != expected.crc32 {
            return Err(ZipError::corrupt("invalid checksum"));
        }
        Ok(())
    }

    /// Checksum of everything read so far
    pub(crate) fn crc32(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Number of bytes read so far
    pub(crate) fn bytes_read(&self) -> u64 {
        self.read
    }

    pub(crate) fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub(crate) fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // An empty buffer still pulls from the source so that i/o errors surface.
        if buf.is_empty() {
            return self.inner.read(buf);
        }

        let count = self.inner.read(buf)?;
        if count == 0 {
            self.check_matches()?;
            return Ok(0);
        }
        self.read += count as u64;
        if let Some(expected) = self.expected
            && self.read > expected.size
        {
            return Err(ZipError::corrupt(format!(
                "entry is longer than its declared {} bytes",
                expected.size
            ))
            .into());
        }
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}
