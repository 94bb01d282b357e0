// Some zip files can contain garbage after the comment. For example, python zipfile generates
// it when opening a zip in 'a' mode:
//
// >>> from zipfile import ZipFile
// >>> with ZipFile('comment_garbage.zip', 'a') as z:
// ...     z.comment = b'long comment bla bla bla'
// ...
// >>> with ZipFile('comment_garbage.zip', 'a') as z:
// ...     z.comment = b'short.'
// ...
// >>>
//
// Hexdump:
//
// 00000000  50 4b 05 06 00 00 00 00  00 00 00 00 00 00 00 00  |PK..............|
// 00000010  00 00 00 00 06 00 73 68  6f 72 74 2e 6f 6d 6d 65  |......short.omme|
// 00000020  6e 74 20 62 6c 61 20 62  6c 61 20 62 6c 61        |nt bla bla bla|
// 0000002e

use std::io::Cursor;

use zipcodec::ZipArchive;
use zipcodec::ZipWriter;

const COMMENT_GARBAGE: &[u8] = b"PK\x05\x06\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x06\0short.omment bla bla bla";

#[test]
fn correctly_handle_zip_with_garbage_after_comment() {
    assert_eq!(COMMENT_GARBAGE.len(), 0x2e);
    let archive =
        ZipArchive::new(Cursor::new(COMMENT_GARBAGE)).expect("couldn't open test zip file");

    assert_eq!(archive.comment(), "short.".as_bytes());
    assert!(archive.is_empty());
}

/// A signature straddling the boundary between two search windows is still found.
#[test]
fn correctly_handle_cde_on_window() {
    for comment_len in 2020..2040 {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.set_comment("x".repeat(comment_len));
        let data = writer.into_inner().unwrap().into_inner();
        assert_eq!(data.len(), 22 + comment_len);

        let archive = ZipArchive::new(Cursor::new(data)).expect("couldn't open test zip");
        assert_eq!(archive.comment().len(), comment_len);
    }
}

/// A comment that claims more bytes than the file has left marks a false match.
#[test]
fn comment_longer_than_file() {
    let mut data = COMMENT_GARBAGE[..22].to_vec();
    data[20..22].copy_from_slice(&100u16.to_le_bytes());
    data.extend_from_slice(b"short");
    assert!(ZipArchive::new(Cursor::new(data)).is_err());
}
