//! A library for reading and writing ZIP archives.
//!
//! ZIP is a format designed for cross-platform file "archiving": storing a directory tree
//! together with the metadata of each file. Each entry is compressed on its own, so single
//! entries can be extracted without decompressing the rest.
//!
//! This crate reads archives through their central directory ([`ZipArchive`]), front to
//! back from a non-seekable source ([`read::stream::ZipStreamReader`]), and writes them to
//! seekable or non-seekable sinks ([`ZipWriter`]).
//!
//! Supported compression methods are Stored and Deflate. Entries can be encrypted with the
//! legacy ZipCrypto cipher, which is weak and only kept for compatibility. Zip64 records are
//! read and written when sizes, offsets or entry counts need them.
//!
//! ```
//! use std::io::{Cursor, Read, Write};
//! use zipcodec::write::SimpleFileOptions;
//!
//! # fn main() -> zipcodec::result::ZipResult<()> {
//! let mut writer = zipcodec::create_archive(Cursor::new(Vec::new()));
//! writer.begin_entry("hello.txt", SimpleFileOptions::default())?;
//! writer.write_all(b"Hello, World!")?;
//! let archive = writer.into_inner()?;
//!
//! let archive = zipcodec::open_archive(archive)?;
//! let mut content = String::new();
//! archive.by_name("hello.txt")?.read_to_string(&mut content)?;
//! assert_eq!(content, "Hello, World!");
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

use std::io::{Read, Seek, Write};

pub use crate::compression::CompressionMethod;
pub use crate::read::ZipArchive;
pub use crate::read::stream::ZipStreamReader;
pub use crate::spec::{ZIP64_BYTES_THR, ZIP64_ENTRY_THR};
pub use crate::types::{DateTime, Pending, System, ZipEntryData};
pub use crate::write::ZipWriter;

mod compression;
mod cp437;
mod crc32;
pub mod extra_fields;
pub mod read;
pub mod result;
mod spec;
mod types;
pub mod write;
mod zipcrypto;

/// Starts a new archive on a seekable sink.
pub fn create_archive<W: Write + Seek>(sink: W) -> ZipWriter<W> {
    ZipWriter::new(sink)
}

/// Opens an existing archive, decoding its central directory.
pub fn open_archive<R: Read + Seek>(source: R) -> result::ZipResult<ZipArchive<R>> {
    ZipArchive::new(source)
}
