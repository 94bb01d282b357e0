use std::io::{Read, Seek, SeekFrom};

use log::trace;
use memchr::memmem::FinderRev;

use crate::result::{ZipResult, malformed};
use crate::spec::{FixedSizeBlock, Zip32CDEBlock, Zip32CentralDirectoryEnd};

/// Finds a signature from the end of a seekable reader, scanning backwards through a bounded
/// range in fixed-size windows.
pub(crate) struct MagicFinder<'a> {
    buffer: Box<[u8]>,
    finder: FinderRev<'a>,
    cursor: u64,
    /// Matches at or after this offset of the current window were already yielded.
    mid_buffer_offset: Option<usize>,
    bounds: (u64, u64),
}

impl<'a> MagicFinder<'a> {
    const BUFFER_SIZE: usize = 2048;

    /// Looks for `magic_bytes` lying entirely within `bounds.0..bounds.1`.
    pub(crate) fn new(magic_bytes: &'a [u8], bounds: (u64, u64)) -> Self {
        debug_assert!(Self::BUFFER_SIZE > magic_bytes.len());

        Self {
            buffer: vec![0; Self::BUFFER_SIZE].into_boxed_slice(),
            finder: FinderRev::new(magic_bytes),
            cursor: bounds
                .1
                .saturating_sub(Self::BUFFER_SIZE as u64)
                .clamp(bounds.0, bounds.1),
            mid_buffer_offset: None,
            bounds,
        }
    }

    /// Yields the next match closer to the start, or `None` once the range is exhausted.
    pub(crate) fn next_back<R: Read + Seek>(&mut self, reader: &mut R) -> ZipResult<Option<u64>> {
        loop {
            let window_start = self.cursor;
            let window_end = self
                .cursor
                .saturating_add(self.buffer.len() as u64)
                .min(self.bounds.1);
            if window_end <= window_start {
                return Ok(None);
            }

            let window = &mut self.buffer[..(window_end - window_start) as usize];
            if self.mid_buffer_offset.is_none() {
                reader.seek(SeekFrom::Start(window_start))?;
                reader.read_exact(window)?;
            }

            let searched = self.mid_buffer_offset.unwrap_or(window.len());
            if let Some(offset) = self.finder.rfind(&window[..searched]) {
                // Leave room for the needle's own tail on the next search in this window.
                self.mid_buffer_offset = Some(offset + self.finder.needle().len() - 1);
                return Ok(Some(window_start + offset as u64));
            }
            self.mid_buffer_offset = None;

            if window_start == self.bounds.0 {
                self.bounds.1 = self.bounds.0;
                return Ok(None);
            }

            // The next window ends where a signature straddling this window's start would end.
            self.bounds.1 = window_start + self.finder.needle().len() as u64 - 1;
            self.cursor = self
                .bounds
                .1
                .saturating_sub(self.buffer.len() as u64)
                .max(self.bounds.0);
        }
    }
}

/// Locates and decodes the end-of-central-directory record.
///
/// The record can only start between `len - 22 - 65535` and `len - 22`, the span its own
/// comment length allows; the scan never looks further back. A candidate is accepted when its
/// comment fits in what is left of the file.
pub(crate) fn find_central_directory_end<R: Read + Seek>(
    reader: &mut R,
    len: u64,
) -> ZipResult<(u64, Zip32CentralDirectoryEnd)> {
    const SIZE: u64 = Zip32CDEBlock::SIZE as u64;
    if len < SIZE {
        return malformed("central directory not found");
    }
    let last_start = len - SIZE;
    let first_start = last_start.saturating_sub(u16::MAX as u64);
    let magic = Zip32CDEBlock::MAGIC.to_le_bytes();
    let mut finder = MagicFinder::new(&magic, (first_start, last_start + magic.len() as u64));

    while let Some(pos) = finder.next_back(reader)? {
        reader.seek(SeekFrom::Start(pos))?;
        let end = Zip32CentralDirectoryEnd::parse(&mut *reader);
        match end {
            Ok(end) if pos + SIZE + end.zip_file_comment.len() as u64 <= len => {
                trace!("end of central directory at {pos}");
                return Ok((pos, end));
            }
            _ => trace!("rejected end of central directory candidate at {pos}"),
        }
    }
    malformed("central directory not found")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::result::ZipError;
    use std::io::Cursor;

    fn eocd(comment_len: u16) -> Vec<u8> {
        let mut out = Vec::from(Zip32CDEBlock::MAGIC.to_le_bytes());
        out.extend([0u8; 16]);
        out.extend(comment_len.to_le_bytes());
        out.extend(vec![b'c'; comment_len as usize]);
        out
    }

    #[test]
    fn finds_all_matches_back_to_front() {
        let mut data = vec![0u8; 5000];
        for pos in [10usize, 905, 2950, 4000] {
            data[pos..pos + 4].copy_from_slice(b"PK\x05\x06");
        }
        let magic = Zip32CDEBlock::MAGIC.to_le_bytes();
        let mut finder = MagicFinder::new(&magic, (0, data.len() as u64));
        let mut cursor = Cursor::new(&data);
        let mut found = Vec::new();
        while let Some(pos) = finder.next_back(&mut cursor).unwrap() {
            found.push(pos);
        }
        assert_eq!(found, vec![4000, 2950, 905, 10]);
    }

    #[test]
    fn record_with_maximum_comment() {
        let mut data = vec![0u8; 100];
        data.extend(eocd(u16::MAX));
        let (pos, end) = find_central_directory_end(&mut Cursor::new(&data), data.len() as u64)
            .unwrap();
        assert_eq!(pos, 100);
        assert_eq!(end.zip_file_comment.len(), 65535);
    }

    #[test]
    fn record_beyond_the_window() {
        let mut data = eocd(0);
        data.extend(vec![0u8; 65536]);
        let err = find_central_directory_end(&mut Cursor::new(&data), data.len() as u64)
            .unwrap_err();
        assert!(
            matches!(err, ZipError::MalformedArchive(msg) if msg == "central directory not found")
        );
    }

    #[test]
    fn too_short() {
        let data = b"PK\x05\x06";
        assert!(find_central_directory_end(&mut Cursor::new(&data), 4).is_err());
    }
}
