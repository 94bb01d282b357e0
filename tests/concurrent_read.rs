use std::io::{Cursor, Read, Write};
use std::thread;

use zipcodec::write::SimpleFileOptions;
use zipcodec::{ZipArchive, ZipWriter};

fn content_of(i: usize) -> Vec<u8> {
    format!("entry {i} ").repeat(1000 + i * 37).into_bytes()
}

#[test]
fn concurrent_reads_of_one_archive() {
    const ENTRIES: usize = 16;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for i in 0..ENTRIES {
        writer
            .begin_entry(format!("{i}.txt"), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(&content_of(i)).unwrap();
    }
    let archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();

    thread::scope(|scope| {
        let archive = &archive;
        let handles: Vec<_> = (0..ENTRIES)
            .map(|i| {
                scope.spawn(move || {
                    // several passes so reads on different threads interleave
                    for _ in 0..4 {
                        let mut file = archive.by_name(&format!("{i}.txt")).unwrap();
                        let mut content = Vec::new();
                        let mut chunk = [0u8; 333];
                        loop {
                            let count = file.read(&mut chunk).unwrap();
                            if count == 0 {
                                break;
                            }
                            content.extend_from_slice(&chunk[..count]);
                        }
                        assert_eq!(content, content_of(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    });
}

#[test]
fn closed_archive() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .begin_entry("a.txt", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"still readable").unwrap();
    let mut archive = ZipArchive::new(writer.into_inner().unwrap()).unwrap();

    // a reader opened before closing keeps working
    let mut file = archive.by_index(0).unwrap();
    archive.close();
    assert!(archive.by_index(0).is_err());
    assert!(archive.entries().is_empty());
    assert!(archive.into_inner().is_none());

    let mut content = String::new();
    file.read_to_string(&mut content).unwrap();
    assert_eq!(content, "still readable");
}
