use crate::result::ZipResult;
use crate::spec::LittleEndianReadExt;

/// NTFS extra field (`0x000a`): file times as Windows `FILETIME` values, i.e. 100ns ticks
/// since 1601-01-01 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ntfs {
    mtime: u64,
    atime: u64,
    ctime: u64,
}

impl Ntfs {
    const TIMES_ATTRIBUTE: u16 = 0x0001;

    /// Returns `None` when the record has no times attribute.
    pub(crate) fn parse(payload: &[u8]) -> ZipResult<Option<Self>> {
        // 4 reserved bytes, then (tag, size, data) attributes
        let Some(mut attributes) = payload.get(4..) else {
            return Ok(None);
        };
        while attributes.len() >= 4 {
            let tag = attributes.read_u16_le()?;
            let size = attributes.read_u16_le()? as usize;
            let Some(data) = attributes.get(..size) else {
                return Ok(None);
            };
            if tag == Self::TIMES_ATTRIBUTE && size >= 24 {
                let mut data = data;
                return Ok(Some(Self {
                    mtime: data.read_u64_le()?,
                    atime: data.read_u64_le()?,
                    ctime: data.read_u64_le()?,
                }));
            }
            attributes = &attributes[size..];
        }
        Ok(None)
    }

    /// Last modification time
    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    /// Last access time
    pub fn atime(&self) -> u64 {
        self.atime
    }

    /// Creation time
    pub fn ctime(&self) -> u64 {
        self.ctime
    }
}
