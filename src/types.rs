//! Types that specify what is contained in a ZIP.

use crate::compression::CompressionMethod;
use crate::extra_fields::{ExtendedTimestamp, ExtraField, Ntfs, Zip64ExtendedInformation};
use crate::result::DateTimeRangeError;
use crate::spec::{ZIP64_BYTES_THR, flags};

#[cfg(feature = "time")]
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, error::ComponentRange};

/// Version (4.5) written into `version made by`; the upper byte holds the host system.
pub(crate) const VERSION_MADE_BY: u16 = 45;
pub(crate) const VERSION_NEEDED_DEFAULT: u16 = 20;
pub(crate) const VERSION_NEEDED_ZIP64: u16 = 45;

/// Host system recorded in the upper byte of `version made by`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum System {
    /// MS-DOS and compatible attribute layout
    Dos,
    /// Unix mode bits in the upper half of the external attributes
    Unix,
    /// Anything else
    Unknown(u8),
}

impl From<u8> for System {
    fn from(value: u8) -> Self {
        match value {
            0 => System::Dos,
            3 => System::Unix,
            v => System::Unknown(v),
        }
    }
}

impl From<System> for u8 {
    fn from(system: System) -> u8 {
        match system {
            System::Dos => 0,
            System::Unix => 3,
            System::Unknown(v) => v,
        }
    }
}

/// A value that is either known when a header is emitted or only after the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pending<T> {
    /// The final value.
    Known(T),
    /// Not known yet; the header carries zeros and flag bit 3.
    Deferred,
}

impl<T: Copy> Pending<T> {
    /// The final value, if known.
    pub const fn known(&self) -> Option<T> {
        match self {
            Pending::Known(v) => Some(*v),
            Pending::Deferred => None,
        }
    }

    /// Whether the value is still deferred.
    pub const fn is_deferred(&self) -> bool {
        matches!(self, Pending::Deferred)
    }
}

impl<T> From<Option<T>> for Pending<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Pending::Known(v),
            None => Pending::Deferred,
        }
    }
}

/// Representation of a moment in time.
///
/// Zip files use an old format from DOS to store timestamps, with a resolution of 2 seconds
/// and no time zone. A [`DateTime`] can be stored with
/// [`FileOptions::last_modified_time`](crate::write::FileOptions::last_modified_time) and read
/// back with [`ZipEntryData::last_modified`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateTime {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
}

impl Default for DateTime {
    /// 1980-01-01 00:00:00, the earliest representable moment
    fn default() -> DateTime {
        DateTime {
            year: 1980,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }
}

impl DateTime {
    /// Unpacks the MS-DOS (date, time) pair found in headers.
    pub const fn from_msdos(datepart: u16, timepart: u16) -> DateTime {
        DateTime {
            year: (datepart >> 9) + 1980,
            month: ((datepart >> 5) & 0x0f) as u8,
            day: (datepart & 0x1f) as u8,
            hour: (timepart >> 11) as u8,
            minute: ((timepart >> 5) & 0x3f) as u8,
            second: ((timepart & 0x1f) << 1) as u8,
        }
    }

    /// Constructs a DateTime from a specific date and time
    ///
    /// The bounds are:
    /// * year: [1980, 2107]
    /// * month: [1, 12]
    /// * day: [1, 31]
    /// * hour: [0, 23]
    /// * minute: [0, 59]
    /// * second: [0, 60]
    pub fn from_date_and_time(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Result<DateTime, DateTimeRangeError> {
        let in_range = (1980..=2107).contains(&year)
            && (1..=12).contains(&month)
            && (1..=31).contains(&day)
            && hour <= 23
            && minute <= 59
            && second <= 60;
        if !in_range {
            return Err(DateTimeRangeError);
        }
        Ok(DateTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
        })
    }

    /// The timestamp given to new entries when the caller doesn't pick one: the current UTC
    /// time with the `time` feature, 1980-01-01 otherwise.
    pub fn default_for_write() -> DateTime {
        #[cfg(feature = "time")]
        {
            DateTime::try_from(OffsetDateTime::now_utc()).unwrap_or_default()
        }
        #[cfg(not(feature = "time"))]
        {
            DateTime::default()
        }
    }

    /// The time half of the MS-DOS representation
    pub const fn timepart(&self) -> u16 {
        ((self.second as u16) >> 1) | ((self.minute as u16) << 5) | ((self.hour as u16) << 11)
    }

    /// The date half of the MS-DOS representation
    pub const fn datepart(&self) -> u16 {
        (self.day as u16) | ((self.month as u16) << 5) | ((self.year - 1980) << 9)
    }

    #[cfg(feature = "time")]
    /// Converts to an [`OffsetDateTime`], assuming the stored time was UTC.
    pub fn to_time(&self) -> Result<OffsetDateTime, ComponentRange> {
        let date =
            Date::from_calendar_date(self.year as i32, Month::try_from(self.month)?, self.day)?;
        let time = Time::from_hms(self.hour, self.minute, self.second)?;
        Ok(PrimitiveDateTime::new(date, time).assume_utc())
    }

    /// Get the year. There is no epoch, i.e. 2018 will be returned as 2018.
    pub const fn year(&self) -> u16 {
        self.year
    }

    /// Get the month, where 1 = january and 12 = december.
    ///
    /// Values read from an archive are not validated.
    pub const fn month(&self) -> u8 {
        self.month
    }

    /// Get the day of the month
    pub const fn day(&self) -> u8 {
        self.day
    }

    /// Get the hour
    pub const fn hour(&self) -> u8 {
        self.hour
    }

    /// Get the minute
    pub const fn minute(&self) -> u8 {
        self.minute
    }

    /// Get the second; always even
    pub const fn second(&self) -> u8 {
        self.second
    }
}

#[cfg(feature = "time")]
impl TryFrom<OffsetDateTime> for DateTime {
    type Error = DateTimeRangeError;

    fn try_from(dt: OffsetDateTime) -> Result<Self, Self::Error> {
        DateTime::from_date_and_time(
            dt.year().try_into()?,
            dt.month().into(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
        )
    }
}

/// Everything the central directory records about one archive member.
///
/// Instances handed out by [`ZipArchive`](crate::ZipArchive) are immutable snapshots; clone
/// them freely and pass them back to [`ZipArchive::open_entry`](crate::ZipArchive::open_entry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntryData {
    pub(crate) index: usize,
    pub(crate) version_made_by: u16,
    pub(crate) version_needed: u16,
    pub(crate) flags: u16,
    pub(crate) compression_method: CompressionMethod,
    pub(crate) last_modified_time: DateTime,
    pub(crate) crc32: u32,
    pub(crate) compressed_size: u64,
    pub(crate) uncompressed_size: u64,
    pub(crate) file_name: Box<str>,
    pub(crate) file_name_raw: Box<[u8]>,
    /// Raw extra sub-records from the central directory record.
    pub(crate) extra_data: Box<[u8]>,
    pub(crate) extra_fields: Vec<ExtraField>,
    pub(crate) file_comment: Box<str>,
    /// Offset of the local header from the start of the archive content, i.e. without the
    /// prefix of a self-extracting stub.
    pub(crate) header_start: u64,
    pub(crate) internal_attributes: u16,
    pub(crate) external_attributes: u32,
}

impl ZipEntryData {
    /// Position of this entry in the central directory
    pub fn index(&self) -> usize {
        self.index
    }

    /// Name of the entry, with forward slashes as separators
    pub fn name(&self) -> &str {
        &self.file_name
    }

    /// Name of the entry exactly as stored
    pub fn name_raw(&self) -> &[u8] {
        &self.file_name_raw
    }

    /// Comment attached to the entry
    pub fn comment(&self) -> &str {
        &self.file_comment
    }

    /// Compression method of the payload
    pub fn compression(&self) -> CompressionMethod {
        self.compression_method
    }

    /// Size of the payload in the archive, including a ZipCrypto header if present
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    /// Size of the entry once extracted
    pub fn size(&self) -> u64 {
        self.uncompressed_size
    }

    /// CRC-32 of the extracted content
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// General purpose bit flags
    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Whether the payload is encrypted
    pub fn encrypted(&self) -> bool {
        self.flags & flags::ENCRYPTED != 0
    }

    /// Whether the sizes and CRC were written after the payload
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & flags::DATA_DESCRIPTOR != 0
    }

    /// Last modified time, 2 second precision
    pub fn last_modified(&self) -> DateTime {
        self.last_modified_time
    }

    /// Offset of the local header, relative to the first byte of archive content
    pub fn header_start(&self) -> u64 {
        self.header_start
    }

    /// Raw `(tag, len, payload)` extra sub-records of the central directory record
    pub fn extra_data(&self) -> &[u8] {
        &self.extra_data
    }

    /// Returns whether the entry is a directory
    pub fn is_dir(&self) -> bool {
        self.file_name_raw
            .last()
            .is_some_and(|&c| c == b'/' || c == b'\\')
    }

    /// Returns whether the entry is a regular file
    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// Host system that produced the entry
    pub fn system(&self) -> System {
        System::from((self.version_made_by >> 8) as u8)
    }

    /// `version made by`, with the host system in the upper byte
    pub fn version_made_by(&self) -> u16 {
        self.version_made_by
    }

    /// Minimum format version needed to extract the entry
    pub fn version_needed(&self) -> u16 {
        self.version_needed
    }

    /// External file attributes, whose meaning depends on [`system`](Self::system)
    pub fn external_attributes(&self) -> u32 {
        self.external_attributes
    }

    /// Unix mode bits, when the entry was produced on a Unix host
    pub fn unix_mode(&self) -> Option<u32> {
        match self.system() {
            System::Unix if self.external_attributes != 0 => Some(self.external_attributes >> 16),
            _ => None,
        }
    }

    /// Modification time in seconds since the Unix epoch from the extended timestamp field
    pub fn unix_timestamp(&self) -> Option<u32> {
        self.extra_fields.iter().find_map(|field| match field {
            ExtraField::ExtendedTimestamp(ts) => ts.mod_time(),
            _ => None,
        })
    }

    /// Times from the NTFS extra field
    pub fn ntfs_times(&self) -> Option<Ntfs> {
        self.extra_fields.iter().find_map(|field| match field {
            ExtraField::Ntfs(ntfs) => Some(*ntfs),
            _ => None,
        })
    }

    /// The zip64 extended information, if the record carried one
    pub fn zip64_sizes(&self) -> Option<Zip64ExtendedInformation> {
        self.extra_fields.iter().find_map(|field| match field {
            ExtraField::Zip64(info) => Some(*info),
            _ => None,
        })
    }

    /// Extended timestamp, if the record carried one
    pub fn extended_timestamp(&self) -> Option<&ExtendedTimestamp> {
        self.extra_fields.iter().find_map(|field| match field {
            ExtraField::ExtendedTimestamp(ts) => Some(ts),
            _ => None,
        })
    }

    /// Whether any size or offset needs the zip64 extra field
    pub(crate) const fn needs_zip64(&self) -> bool {
        self.uncompressed_size >= ZIP64_BYTES_THR
            || self.compressed_size >= ZIP64_BYTES_THR
            || self.header_start >= ZIP64_BYTES_THR
    }
}
