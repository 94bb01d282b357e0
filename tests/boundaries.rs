use std::io::{Cursor, Read, Write};

use zipcodec::result::ZipError;
use zipcodec::write::SimpleFileOptions;
use zipcodec::{ZIP64_ENTRY_THR, ZipArchive, ZipWriter};

#[test]
fn longest_name() {
    let name = "n".repeat(u16::MAX as usize);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .begin_entry(&name, SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"content").unwrap();
    let archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    assert_eq!(archive.name_for_index(0), Some(name.as_str()));
    let mut content = String::new();
    archive
        .by_name(&name)
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, "content");
}

#[test]
fn name_too_long() {
    let name = "n".repeat(u16::MAX as usize + 1);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let err = writer
        .begin_entry(&name, SimpleFileOptions::default())
        .unwrap_err();
    assert!(matches!(err, ZipError::InvalidOperation(_)));
    assert!(!writer.is_writing_entry());
    // nothing of the rejected entry reached the sink
    assert_eq!(writer.get_ref().unwrap().get_ref().len(), 0);

    // the writer is still usable
    writer
        .begin_entry("short", SimpleFileOptions::default())
        .unwrap();
    let archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    assert_eq!(archive.len(), 1);
}

#[test]
fn longest_archive_comment() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .begin_entry("a.txt", SimpleFileOptions::default())
        .unwrap();
    writer.set_comment("c".repeat(u16::MAX as usize));
    let archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    assert_eq!(archive.comment().len(), u16::MAX as usize);
    assert_eq!(archive.len(), 1);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.set_comment("c".repeat(u16::MAX as usize + 1));
    assert!(matches!(
        writer.finish(),
        Err(ZipError::InvalidOperation(_))
    ));
}

#[test]
fn end_record_beyond_search_window() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .begin_entry("a.txt", SimpleFileOptions::default())
        .unwrap();
    let mut data = writer.into_inner().unwrap().into_inner();

    // trailing bytes up to the largest comment still leave the record in reach
    let mut padded = data.clone();
    padded.extend(vec![0u8; u16::MAX as usize]);
    assert_eq!(ZipArchive::new(Cursor::new(padded)).unwrap().len(), 1);

    // one more byte and the scan gives up
    data.extend(vec![0u8; u16::MAX as usize + 1]);
    assert!(matches!(
        ZipArchive::new(Cursor::new(data)),
        Err(ZipError::MalformedArchive(_))
    ));
}

#[test]
fn entry_count_needs_zip64() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for i in 0..ZIP64_ENTRY_THR + 1 {
        writer
            .add_directory(format!("{i}"), SimpleFileOptions::default())
            .unwrap();
    }
    let archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    assert!(archive.is_zip64());
    assert_eq!(archive.len(), ZIP64_ENTRY_THR + 1);
    assert_eq!(archive.name_for_index(ZIP64_ENTRY_THR), Some("65535/"));
}

#[test]
fn exact_entry_count_limit() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for i in 0..ZIP64_ENTRY_THR {
        writer
            .add_directory(format!("{i}"), SimpleFileOptions::default())
            .unwrap();
    }
    let archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();
    assert_eq!(archive.len(), ZIP64_ENTRY_THR);
}
