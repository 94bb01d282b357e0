use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};

use zipcodec::read::stream::{StreamingZipEntry, ZipStreamReader, ZipStreamVisitor};
use zipcodec::result::{ZipError, ZipResult};
use zipcodec::write::SimpleFileOptions;
use zipcodec::{CompressionMethod, ZipArchive, ZipWriter};

/// A sink that can't seek, like a socket.
struct Pipe(Vec<u8>);

impl Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Collect(BTreeMap<String, (Vec<u8>, u32)>);

impl ZipStreamVisitor for Collect {
    fn visit_file<R: Read>(&mut self, file: &mut StreamingZipEntry<'_, R>) -> ZipResult<()> {
        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        self.0
            .insert(file.name().to_owned(), (content, file.entry().crc32()));
        Ok(())
    }
}

fn entries() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("a.txt", b"first".to_vec()),
        ("b/c.txt", b"second entry, longer than the first".repeat(50)),
        ("empty", Vec::new()),
    ]
}

#[test]
fn deferred_round_trip() {
    let mut writer = ZipWriter::new_stream(Pipe(Vec::new()));
    for (name, content) in entries() {
        // stored entries of unknown size are deflated on a pipe
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        writer.begin_entry(name, options).unwrap();
        writer.write_all(&content).unwrap();
    }
    let data = writer.into_inner().unwrap().into_inner().0;

    let mut visitor = Collect::default();
    ZipStreamReader::new(Cursor::new(data.clone()))
        .visit(&mut visitor)
        .unwrap();
    assert_eq!(visitor.0.len(), 3);
    for (name, content) in entries() {
        let (read, crc32) = &visitor.0[name];
        assert_eq!(read, &content);
        assert_eq!(*crc32, crc32fast::hash(&content));
    }

    // the central directory agrees with what the sequential reader saw
    let archive = ZipArchive::new(Cursor::new(data)).unwrap();
    for entry in archive.entries() {
        assert_eq!(entry.compression(), CompressionMethod::Deflated);
        assert!(entry.has_data_descriptor());
        assert_eq!(entry.crc32(), visitor.0[entry.name()].1);
    }
}

#[test]
fn stream_reader_on_seekable_output() {
    // headers patched in place read the same as deferred ones
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries() {
        writer
            .begin_entry(name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(&content).unwrap();
    }
    let data = writer.into_inner().unwrap().into_inner();

    let mut reader = ZipStreamReader::new(Cursor::new(data));
    let mut seen = Vec::new();
    while let Some(mut entry) = reader.next_entry().unwrap() {
        assert!(!entry.entry().has_data_descriptor());
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        seen.push((entry.name().to_owned(), content));
    }
    let expected: Vec<_> = entries()
        .into_iter()
        .map(|(name, content)| (name.to_owned(), content))
        .collect();
    assert_eq!(seen, expected);
}

#[test]
fn truncated_stream() {
    let mut writer = ZipWriter::new_stream(Pipe(Vec::new()));
    writer
        .begin_entry("a.txt", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(&[7u8; 10_000]).unwrap();
    let data = writer.into_inner().unwrap().into_inner().0;

    // cut inside the first payload
    let mut reader = ZipStreamReader::new(Cursor::new(data[..40].to_vec()));
    let mut entry = reader.next_entry().unwrap().unwrap();
    assert!(io::copy(&mut entry, &mut io::sink()).is_err());
    drop(entry);
    // the reader can't tell where the next header would have been
    assert!(matches!(
        reader.next_entry(),
        Err(ZipError::MalformedArchive(_))
    ));
}
