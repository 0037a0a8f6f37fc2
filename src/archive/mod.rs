//! In-memory model of an IDCL resource archive.
//!
//! An archive is a header, a table of resource entries, a string chunk the
//! entries reference by index, dependency tables, a repeated `IDCL` marker,
//! and an 8-byte-aligned data region. The model owns every section; the
//! on-disk bytes are regenerated by a dedicated encoder rather than patched
//! in place.

mod data;
mod read;
mod write;

pub use data::{entry_data, entry_data_stream, EntryDataCode, EntryScratch};
pub use read::read_archive;
pub use write::{encode_archive, encode_metadata, ArchiveBuilder};

use std::path::{Path, PathBuf};

use crate::error::{ModError, Result};
use crate::hash::resource_hash_str;

pub const ARCHIVE_MAGIC: &[u8; 4] = b"IDCL";
/// Format version produced by the builder.
pub const ARCHIVE_VERSION: u32 = 13;
/// Versions the reader accepts. Below 13 a small meta header follows the
/// main header.
pub const SUPPORTED_VERSIONS: [u32; 2] = [12, 13];

/// Serialized header block size. The named fields occupy 112 bytes; the
/// block is zero-padded to a fixed 128.
pub const HEADER_SIZE: u64 = 128;
pub const META_HEADER_SIZE: u64 = 12;
pub const ENTRY_SIZE: u64 = 144;
pub const DEPENDENCY_SIZE: u64 = 32;

/// `generationTimeStamp` sentinel marking a rewritten container-mask entry.
pub const MODDED_TIMESTAMP: u64 = 123456;

/// Reserved strings at the start of every synthesized string table. Entries
/// reference their type string by table index, so the modifiable types come
/// first.
pub const STRING_TABLE_PREAMBLE: [&str; 2] = ["rs_streamfile", "entityDef"];

/// How much of an archive to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Header, all metadata sections, and the data region.
    ReadEverything,
    /// Header and all metadata sections; data stays on disk.
    SkipData,
    /// Header (and version-gated meta header) only.
    HeaderOnly,
    /// Header plus the entry table.
    StopAfterEntries,
}

/// Fixed-layout archive header (magic excluded, it is implied).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceHeader {
    pub version: u32,
    pub flags: u32,
    pub num_segments: u32,
    pub segment_size: u64,
    pub metadata_hash: u64,
    pub num_resources: u32,
    pub num_dependencies: u32,
    pub num_dep_indices: u32,
    pub num_string_indices: u32,
    pub num_special_hashes: u32,
    pub num_meta_entries: u32,
    pub string_table_size: u32,
    pub meta_entries_size: u32,
    pub string_table_offset: u64,
    pub meta_entries_offset: u64,
    pub resource_entries_offset: u64,
    pub resource_deps_offset: u64,
    pub resource_special_hash_offset: u64,
    pub data_offset: u64,
}

impl ResourceHeader {
    /// Offset of the `I` in the repeated `IDCL` marker that closes the meta
    /// section.
    pub fn expected_meta_offset(&self) -> u64 {
        self.resource_deps_offset
            + self.num_dependencies as u64 * DEPENDENCY_SIZE
            + self.num_dep_indices as u64 * 4
            + self.num_string_indices as u64 * 8
    }

    /// Bytes between the meta-section marker and the data region (marker
    /// included).
    pub fn gap_size(&self) -> u64 {
        self.data_offset - self.expected_meta_offset()
    }
}

/// Packed trailer following the header in archives older than version 13.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceMetaHeader {
    pub unknown: u32,
    /// Address of the `I` in the repeated `IDCL` marker.
    pub meta_offset: u64,
}

/// One asset's metadata inside an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceEntry {
    pub resource_type_string: i64,
    pub name_string: i64,
    pub desc_string: i64,
    pub dep_indices: u64,
    pub strings: u64,
    pub special_hashes: u64,
    pub meta_entries: u64,
    pub data_offset: u64,
    pub data_size: u64,
    pub uncompressed_size: u64,
    pub data_checksum: u64,
    pub generation_timestamp: u64,
    pub default_hash: u64,
    pub version: u32,
    pub flags: u32,
    pub comp_mode: u8,
    pub reserved0: u8,
    pub variation: u16,
    pub reserved2: u32,
    pub reserved_for_variations: u64,
    pub num_strings: u16,
    pub num_sources: u16,
    pub num_dependencies: u16,
    pub num_special_hashes: u16,
    pub num_meta_entries: u16,
}

/// The archive's internal string table.
///
/// `offsets` are relative to the first byte after the offset list; `blob`
/// holds the zero-terminated strings followed by the chunk's alignment
/// padding, exactly as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringChunk {
    pub offsets: Vec<u64>,
    pub blob: Vec<u8>,
}

impl StringChunk {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Fetch string `index`, or an error naming the bad slot.
    pub fn get(&self, index: u64) -> Result<&str> {
        let off = *self
            .offsets
            .get(index as usize)
            .ok_or_else(|| ModError::Other(format!("string index {index} out of range")))? as usize;
        let rest = self
            .blob
            .get(off..)
            .ok_or_else(|| ModError::Other(format!("string offset {off} out of range")))?;
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ModError::Other("unterminated string in chunk".into()))?;
        std::str::from_utf8(&rest[..nul])
            .map_err(|_| ModError::Other(format!("string {index} is not UTF-8")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceDependency {
    pub dep_type_string: u64,
    pub dep_name_string: u64,
    pub dep_type: u32,
    pub dep_sub_type: u32,
    pub first_int: u32,
    pub second_int: u32,
}

/// A fully parsed archive. Owns all of its sections; `data` holds the raw
/// data region (everything from `header.data_offset` to end of file) and is
/// populated only under [`LoadMode::ReadEverything`].
#[derive(Debug, Default)]
pub struct ResourceArchive {
    pub path: PathBuf,
    pub header: ResourceHeader,
    pub meta_header: Option<ResourceMetaHeader>,
    pub entries: Vec<ResourceEntry>,
    pub strings: StringChunk,
    pub dependencies: Vec<ResourceDependency>,
    pub dependency_index: Vec<u32>,
    pub string_index: Vec<u64>,
    pub data: Option<Vec<u8>>,
}

impl ResourceArchive {
    /// Resolve an entry's `(type, name)` string pair.
    pub fn entry_strings(&self, entry: &ResourceEntry) -> Result<(&str, &str)> {
        let base = entry.strings as usize;
        let type_slot = *self
            .string_index
            .get(base)
            .ok_or_else(|| ModError::Other(format!("entry string base {base} out of range")))?;
        let name_slot = *self
            .string_index
            .get(base + 1)
            .ok_or_else(|| ModError::Other(format!("entry string base {base} out of range")))?;
        Ok((self.strings.get(type_slot)?, self.strings.get(name_slot)?))
    }
}

/// The pair identifying an archive inside the container mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskIdentity {
    pub fingerprint: u64,
    pub num_resources: u32,
}

/// Fingerprint an archive for container-mask lookup: the resource hash of
/// its filesystem basename, paired with the header's entry count so callers
/// can size bitmaps.
pub fn container_identity(path: &Path) -> Result<MaskIdentity> {
    let basename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ModError::Other(format!("'{}' has no basename", path.display())))?;
    let archive = read_archive(path, LoadMode::HeaderOnly)?;
    Ok(MaskIdentity {
        fingerprint: resource_hash_str(basename),
        num_resources: archive.header.num_resources,
    })
}
