/// Configuration for reading ZIP archives.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Config {
    /// Where the archive content starts within the reader.
    pub archive_offset: ArchiveOffset,

    /// Match names in [`by_name`](super::ZipArchive::by_name) and
    /// [`index_for_name`](super::ZipArchive::index_for_name) ignoring ASCII case.
    pub case_insensitive_names: bool,
}

/// The offset of the start of the archive from the beginning of the reader.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum ArchiveOffset {
    /// Infer the offset from where the central directory was found compared to where the
    /// end-of-central-directory record says it should be. Bytes prepended to the archive, such
    /// as a self-extracting stub, shift every recorded offset by the same amount.
    #[default]
    Detect,
    /// The caller knows the offset.
    Known(u64),
}
