use std::io::{Cursor, Write};

use zipcodec::read::stream::ZipStreamReader;
use zipcodec::write::SimpleFileOptions;
use zipcodec::{ZipArchive, ZipWriter};

#[test]
fn test_extended_timestamp() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .begin_entry(
            "test.txt",
            SimpleFileOptions::default().extended_timestamp(1714635025),
        )
        .unwrap();
    writer.write_all(b"hello").unwrap();
    writer
        .begin_entry("plain.txt", SimpleFileOptions::default())
        .unwrap();
    let data = writer.into_inner().unwrap().into_inner();

    let archive = ZipArchive::new(Cursor::new(data.clone())).expect("couldn't open test zip file");
    let ts = archive
        .entry_by_name("test.txt")
        .unwrap()
        .extended_timestamp()
        .expect("no extended timestamp");
    assert!(ts.ac_time().is_none());
    assert!(ts.cr_time().is_none());
    assert_eq!(ts.mod_time().unwrap(), 1714635025);
    assert_eq!(
        archive.entry_by_name("test.txt").unwrap().unix_timestamp(),
        Some(1714635025)
    );
    assert!(
        archive
            .entry_by_name("plain.txt")
            .unwrap()
            .extended_timestamp()
            .is_none()
    );

    // the local header carries the same field
    let mut reader = ZipStreamReader::new(Cursor::new(data));
    let entry = reader.next_entry().unwrap().unwrap();
    assert_eq!(
        entry.entry().extended_timestamp().and_then(|ts| ts.mod_time()),
        Some(1714635025)
    );
}

#[test]
fn reserved_and_unknown_fields() {
    // the writer owns the "UT" tag; unknown tags pass through untouched
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut options = SimpleFileOptions::default();
    options.add_extra_data(0x5455, &[]).unwrap_err();
    options.add_extra_data(0xcafe, &[]).unwrap();
    writer.begin_entry("test.txt", options).unwrap();
    let data = writer.into_inner().unwrap().into_inner();
    let archive = ZipArchive::new(Cursor::new(data)).unwrap();
    assert!(archive.entry(0).unwrap().extended_timestamp().is_none());
    assert_eq!(archive.entry(0).unwrap().extra_data(), [0xfe, 0xca, 0, 0]);
}
