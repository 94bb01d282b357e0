//! Error types that can be emitted from this library

use displaydoc::Display;
use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::io;
use std::num::TryFromIntError;
use thiserror::Error;

/// Generic result type with ZipError as its error variant
pub type ZipResult<T> = Result<T, ZipError>;

/// Error type for Zip
#[derive(Debug, Display, Error)]
#[non_exhaustive]
pub enum ZipError {
    /// i/o error: {0}
    Io(#[source] io::Error),

    /// malformed Zip archive: {0}
    MalformedArchive(Cow<'static, str>),

    /// unsupported Zip feature: {0}
    UnsupportedFeature(Cow<'static, str>),

    /// a password is required to read this entry
    PasswordRequired,

    /// the password provided is incorrect
    InvalidPassword,

    /// corrupt entry: {0}
    CorruptEntry(Cow<'static, str>),

    /// entry size mismatch: declared {expected} bytes, wrote {actual}
    SizeMismatch {
        /// size the caller declared before writing
        expected: u64,
        /// number of bytes actually written
        actual: u64,
    },

    /// entry CRC-32 mismatch: declared {expected:#010x}, computed {actual:#010x}
    CrcMismatch {
        /// checksum the caller declared before writing
        expected: u32,
        /// checksum of the bytes actually written
        actual: u32,
    },

    /// invalid operation: {0}
    InvalidOperation(Cow<'static, str>),

    /// specified file not found in archive
    FileNotFound,
}

impl ZipError {
    pub(crate) fn corrupt<M: Into<Cow<'static, str>>>(message: M) -> Self {
        ZipError::CorruptEntry(message.into())
    }

    pub(crate) fn invalid_operation<M: Into<Cow<'static, str>>>(message: M) -> Self {
        ZipError::InvalidOperation(message.into())
    }
}

pub(crate) fn malformed<T, M: Into<Cow<'static, str>>>(message: M) -> ZipResult<T> {
    Err(ZipError::MalformedArchive(message.into()))
}

pub(crate) fn unsupported<T, M: Into<Cow<'static, str>>>(message: M) -> ZipResult<T> {
    Err(ZipError::UnsupportedFeature(message.into()))
}

impl From<io::Error> for ZipError {
    /// Recovers a [`ZipError`] that was tunnelled through a [`Read`](io::Read) or
    /// [`Write`](io::Write) implementation; any other i/o error is wrapped as [`ZipError::Io`].
    fn from(err: io::Error) -> ZipError {
        if !err.get_ref().is_some_and(|inner| inner.is::<ZipError>()) {
            return ZipError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<ZipError>()) {
            Some(Ok(zip_err)) => *zip_err,
            Some(Err(other)) => ZipError::Io(io::Error::new(kind, other)),
            None => ZipError::Io(io::Error::from(kind)),
        }
    }
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> io::Error {
        let kind = match &err {
            ZipError::Io(err) => err.kind(),
            ZipError::MalformedArchive(_) | ZipError::CorruptEntry(_) => {
                io::ErrorKind::InvalidData
            }
            ZipError::UnsupportedFeature(_) => io::ErrorKind::Unsupported,
            ZipError::PasswordRequired | ZipError::InvalidPassword => {
                io::ErrorKind::PermissionDenied
            }
            ZipError::SizeMismatch { .. } | ZipError::CrcMismatch { .. } => {
                io::ErrorKind::InvalidInput
            }
            ZipError::InvalidOperation(_) => io::ErrorKind::Other,
            ZipError::FileNotFound => io::ErrorKind::NotFound,
        };
        if let ZipError::Io(inner) = err {
            return inner;
        }
        io::Error::new(kind, err)
    }
}

/// Error type for time parsing
#[derive(Debug, Clone, Copy)]
pub struct DateTimeRangeError;

// TryFromIntError is also an out-of-range error.
impl From<TryFromIntError> for DateTimeRangeError {
    fn from(_value: TryFromIntError) -> Self {
        DateTimeRangeError
    }
}

impl fmt::Display for DateTimeRangeError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "a date could not be represented within the bounds the MS-DOS date range (1980-2107)"
        )
    }
}

impl Error for DateTimeRangeError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tunnelled_error_survives_io_round_trip() {
        let io_err: io::Error = ZipError::corrupt("bad crc").into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
        match ZipError::from(io_err) {
            ZipError::CorruptEntry(msg) => assert_eq!(msg, "bad crc"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn plain_io_error_is_wrapped() {
        let err = ZipError::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(matches!(err, ZipError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn io_variant_is_unwrapped() {
        let err: io::Error = ZipError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).into();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(err.get_ref().is_none());
    }

    #[test]
    fn display_messages() {
        let err = ZipError::SizeMismatch {
            expected: 3,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            "entry size mismatch: declared 3 bytes, wrote 4"
        );
        let err = ZipError::CrcMismatch {
            expected: 1,
            actual: 0xdeadbeef,
        };
        assert_eq!(
            err.to_string(),
            "entry CRC-32 mismatch: declared 0x00000001, computed 0xdeadbeef"
        );
    }
}
