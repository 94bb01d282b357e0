use crate::extra_fields::UsedExtraField;
use crate::result::{ZipResult, malformed};
use crate::spec::LittleEndianReadExt;

/// extended timestamp, as described in <https://libzip.org/specifications/extrafld.txt>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedTimestamp {
    mod_time: Option<u32>,
    ac_time: Option<u32>,
    cr_time: Option<u32>,
}

impl ExtendedTimestamp {
    const MOD_TIME: u8 = 0b001;
    const AC_TIME: u8 = 0b010;
    const CR_TIME: u8 = 0b100;

    /// Decodes the payload of a `0x5455` record.
    ///
    /// The flags describe the local header; a central directory copy usually carries only the
    /// modification time whatever the flags say, so times are taken while bytes remain.
    pub(crate) fn parse(payload: &[u8]) -> ZipResult<Self> {
        let Some((&flags, mut rest)) = payload.split_first() else {
            return malformed("extended timestamp field is empty");
        };
        let mut take = |bit: u8| {
            if flags & bit != 0 && rest.len() >= 4 {
                rest.read_u32_le().ok()
            } else {
                None
            }
        };
        let mod_time = take(Self::MOD_TIME);
        let ac_time = take(Self::AC_TIME);
        let cr_time = take(Self::CR_TIME);
        Ok(Self {
            mod_time,
            ac_time,
            cr_time,
        })
    }

    /// Encodes a record that carries only a modification time.
    pub(crate) fn serialize_mod_time(mod_time: u32) -> [u8; 9] {
        let mut out = [0u8; 9];
        out[..2].copy_from_slice(&UsedExtraField::ExtendedTimestamp.to_le_bytes());
        out[2..4].copy_from_slice(&5u16.to_le_bytes());
        out[4] = Self::MOD_TIME;
        out[5..].copy_from_slice(&mod_time.to_le_bytes());
        out
    }

    /// returns the last modification timestamp, if defined, as UNIX epoch seconds
    #[must_use]
    pub fn mod_time(&self) -> Option<u32> {
        self.mod_time
    }

    /// returns the last access timestamp, if defined, as UNIX epoch seconds
    #[must_use]
    pub fn ac_time(&self) -> Option<u32> {
        self.ac_time
    }

    /// returns the creation timestamp, if defined, as UNIX epoch seconds
    #[must_use]
    pub fn cr_time(&self) -> Option<u32> {
        self.cr_time
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::result::ZipError;

    #[test]
    fn empty_field_is_rejected() {
        assert!(matches!(
            ExtendedTimestamp::parse(&[]),
            Err(ZipError::MalformedArchive(_))
        ));
    }

    #[test]
    fn central_copy_with_local_flags() {
        // flags announce all three times, but only the modification time follows
        let ts = ExtendedTimestamp::parse(&[0b111, 1, 0, 0, 0]).unwrap();
        assert_eq!(ts.mod_time(), Some(1));
        assert_eq!(ts.ac_time(), None);
        assert_eq!(ts.cr_time(), None);
    }

    #[test]
    fn all_times() {
        let ts = ExtendedTimestamp::parse(&[0b101, 1, 0, 0, 0, 3, 0, 0, 0]).unwrap();
        assert_eq!(ts.mod_time(), Some(1));
        assert_eq!(ts.ac_time(), None);
        assert_eq!(ts.cr_time(), Some(3));
    }

    #[test]
    fn serialized_record_parses_back() {
        let bytes = ExtendedTimestamp::serialize_mod_time(1_700_000_000);
        assert_eq!(&bytes[..4], &[0x55, 0x54, 5, 0]);
        let ts = ExtendedTimestamp::parse(&bytes[4..]).unwrap();
        assert_eq!(ts.mod_time(), Some(1_700_000_000));
    }
}
