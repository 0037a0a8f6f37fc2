//! Archive encoder and builder.
//!
//! `encode_archive` regenerates an archive's on-disk bytes from the model
//! using the offsets the model already carries, so read → encode → read is
//! byte-identical. `ArchiveBuilder` computes a fresh canonical layout for
//! synthesized archives.

use std::path::Path;

use crate::binary::ByteWriter;
use crate::error::{ModError, Result};
use crate::hash::resource_hash;
use crate::restype::ResourceType;

use super::{
    ResourceArchive, ResourceEntry, ResourceHeader, ARCHIVE_MAGIC, ARCHIVE_VERSION, ENTRY_SIZE,
    HEADER_SIZE, META_HEADER_SIZE, STRING_TABLE_PREAMBLE,
};

/// Serialize the metadata region: header through the repeated `IDCL` marker
/// and its alignment pad, i.e. everything before `header.data_offset`.
pub fn encode_metadata(archive: &ResourceArchive) -> Result<Vec<u8>> {
    let h = &archive.header;
    let mut w = ByteWriter::with_capacity(h.data_offset as usize);

    w.write_bytes(ARCHIVE_MAGIC);
    write_header(&mut w, h);
    pad_to(&mut w, HEADER_SIZE);

    if let Some(meta) = &archive.meta_header {
        w.write_u32(meta.unknown);
        w.write_u64(meta.meta_offset);
    }

    pad_to(&mut w, h.resource_entries_offset);
    for entry in &archive.entries {
        write_entry(&mut w, entry);
    }

    pad_to(&mut w, h.string_table_offset);
    w.write_u64(archive.strings.len() as u64);
    for off in &archive.strings.offsets {
        w.write_u64(*off);
    }
    w.write_bytes(&archive.strings.blob);

    pad_to(&mut w, h.resource_deps_offset);
    for dep in &archive.dependencies {
        w.write_u64(dep.dep_type_string);
        w.write_u64(dep.dep_name_string);
        w.write_u32(dep.dep_type);
        w.write_u32(dep.dep_sub_type);
        w.write_u32(dep.first_int);
        w.write_u32(dep.second_int);
    }
    for idx in &archive.dependency_index {
        w.write_u32(*idx);
    }
    for idx in &archive.string_index {
        w.write_u64(*idx);
    }

    // Repeated magic closes the meta section; the remaining gap bytes
    // 8-align the data region. Always emitted, both gap widths.
    pad_to(&mut w, h.expected_meta_offset());
    w.write_bytes(ARCHIVE_MAGIC);
    pad_to(&mut w, h.data_offset);

    Ok(w.into_vec())
}

/// Serialize a fully loaded archive (metadata plus its data region).
pub fn encode_archive(archive: &ResourceArchive) -> Result<Vec<u8>> {
    let data = archive.data.as_ref().ok_or_else(|| {
        ModError::Other(format!(
            "'{}' was loaded without its data region",
            archive.path.display()
        ))
    })?;
    let mut bytes = encode_metadata(archive)?;
    bytes.extend_from_slice(data);
    Ok(bytes)
}

fn write_header(w: &mut ByteWriter, h: &ResourceHeader) {
    w.write_u32(h.version);
    w.write_u32(h.flags);
    w.write_u32(h.num_segments);
    w.write_u64(h.segment_size);
    w.write_u64(h.metadata_hash);
    w.write_u32(h.num_resources);
    w.write_u32(h.num_dependencies);
    w.write_u32(h.num_dep_indices);
    w.write_u32(h.num_string_indices);
    w.write_u32(h.num_special_hashes);
    w.write_u32(h.num_meta_entries);
    w.write_u32(h.string_table_size);
    w.write_u32(h.meta_entries_size);
    w.write_u64(h.string_table_offset);
    w.write_u64(h.meta_entries_offset);
    w.write_u64(h.resource_entries_offset);
    w.write_u64(h.resource_deps_offset);
    w.write_u64(h.resource_special_hash_offset);
    w.write_u64(h.data_offset);
}

fn write_entry(w: &mut ByteWriter, e: &ResourceEntry) {
    w.write_i64(e.resource_type_string);
    w.write_i64(e.name_string);
    w.write_i64(e.desc_string);
    w.write_u64(e.dep_indices);
    w.write_u64(e.strings);
    w.write_u64(e.special_hashes);
    w.write_u64(e.meta_entries);
    w.write_u64(e.data_offset);
    w.write_u64(e.data_size);
    w.write_u64(e.uncompressed_size);
    w.write_u64(e.data_checksum);
    w.write_u64(e.generation_timestamp);
    w.write_u64(e.default_hash);
    w.write_u32(e.version);
    w.write_u32(e.flags);
    w.write_u8(e.comp_mode);
    w.write_u8(e.reserved0);
    w.write_u16(e.variation);
    w.write_u32(e.reserved2);
    w.write_u64(e.reserved_for_variations);
    w.write_u16(e.num_strings);
    w.write_u16(e.num_sources);
    w.write_u16(e.num_dependencies);
    w.write_u16(e.num_special_hashes);
    w.write_u16(e.num_meta_entries);
    w.write_bytes(&[0u8; 6]);
}

fn pad_to(w: &mut ByteWriter, offset: u64) {
    debug_assert!(w.len() as u64 <= offset, "section overran its offset");
    while (w.len() as u64) < offset {
        w.write_u8(0);
    }
}

/// One pending asset in a synthesized archive.
struct PendingFile {
    type_table_index: u64,
    name: String,
    data: Vec<u8>,
}

/// Builds a fresh archive containing uncompressed assets.
///
/// Synthesized archives carry the reserved string-table preamble, two
/// string slots per entry, no dependencies, and sequential 8-byte-aligned
/// data blocks.
pub struct ArchiveBuilder {
    version: u32,
    files: Vec<PendingFile>,
}

impl ArchiveBuilder {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            files: Vec::new(),
        }
    }

    pub fn with_default_version() -> Self {
        Self::new(ARCHIVE_VERSION)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Queue an asset. Only types cleared for injection are accepted.
    pub fn add_file(&mut self, ty: ResourceType, asset_path: &str, data: &[u8]) -> Result<()> {
        if !ty.allows_mod_files() {
            return Err(ModError::Other(format!(
                "resource type '{ty}' cannot be placed in a synthesized archive"
            )));
        }
        let type_table_index = STRING_TABLE_PREAMBLE
            .iter()
            .position(|s| *s == ty.type_string())
            .expect("mod-allowed types are part of the preamble") as u64;
        self.files.push(PendingFile {
            type_table_index,
            name: asset_path.to_string(),
            data: data.to_vec(),
        });
        Ok(())
    }

    /// Lay out and serialize the archive.
    pub fn build(&self) -> Result<Vec<u8>> {
        let n = self.files.len() as u64;
        let mut h = ResourceHeader {
            version: self.version,
            num_segments: 1,
            segment_size: 1_099_511_627_775,
            num_resources: n as u32,
            ..Default::default()
        };

        let meta_header_size = if self.version < 13 { META_HEADER_SIZE } else { 0 };
        h.resource_entries_offset = HEADER_SIZE + meta_header_size;
        h.string_table_offset = h.resource_entries_offset + n * ENTRY_SIZE;

        // String chunk: preamble strings first, then one name per asset.
        let mut offsets = Vec::with_capacity(STRING_TABLE_PREAMBLE.len() + self.files.len());
        let mut blob = Vec::new();
        for s in STRING_TABLE_PREAMBLE {
            offsets.push(blob.len() as u64);
            blob.extend_from_slice(s.as_bytes());
            blob.push(0);
        }
        for f in &self.files {
            offsets.push(blob.len() as u64);
            blob.extend_from_slice(f.name.as_bytes());
            blob.push(0);
        }
        let unpadded = 8 + offsets.len() as u64 * 8 + blob.len() as u64;
        let chunk_padding = (8 - unpadded % 8) % 8;
        h.string_table_size = (unpadded + chunk_padding) as u32;
        blob.extend(std::iter::repeat(0).take(chunk_padding as usize));

        h.resource_deps_offset = h.string_table_offset + h.string_table_size as u64;
        h.meta_entries_offset = h.resource_deps_offset;
        h.resource_special_hash_offset = h.resource_deps_offset;
        h.num_string_indices = (n * 2) as u32;

        let marker_offset = h.resource_deps_offset + n * 2 * 8;
        let marker_size = if marker_offset % 8 == 0 { 8 } else { 4 };
        h.data_offset = marker_offset + marker_size;
        debug_assert_eq!(h.data_offset % 8, 0);

        // Entries and their data layout.
        let mut entries = Vec::with_capacity(self.files.len());
        let mut string_index = Vec::with_capacity(self.files.len() * 2);
        let mut running = h.data_offset;
        for (i, f) in self.files.iter().enumerate() {
            let len = f.data.len() as u64;
            entries.push(ResourceEntry {
                resource_type_string: 0,
                name_string: 1,
                desc_string: -1,
                strings: i as u64 * 2,
                data_offset: running,
                data_size: len,
                uncompressed_size: len,
                data_checksum: resource_hash(&f.data),
                default_hash: resource_hash(&f.data),
                num_strings: 2,
                ..Default::default()
            });
            string_index.push(f.type_table_index);
            string_index.push(STRING_TABLE_PREAMBLE.len() as u64 + i as u64);
            running += len;
            running += (8 - running % 8) % 8;
        }

        let mut w = ByteWriter::with_capacity(running as usize);
        w.write_bytes(ARCHIVE_MAGIC);
        write_header(&mut w, &h);
        pad_to(&mut w, HEADER_SIZE);
        if self.version < 13 {
            w.write_u32(0);
            w.write_u64(marker_offset);
        }
        for e in &entries {
            write_entry(&mut w, e);
        }
        w.write_u64(offsets.len() as u64);
        for off in &offsets {
            w.write_u64(*off);
        }
        w.write_bytes(&blob);
        for idx in &string_index {
            w.write_u64(*idx);
        }
        w.write_bytes(ARCHIVE_MAGIC);
        pad_to(&mut w, h.data_offset);
        for (e, f) in entries.iter().zip(&self.files) {
            pad_to(&mut w, e.data_offset);
            w.write_bytes(&f.data);
        }
        // Every data block is padded to the next boundary, the last included.
        pad_to(&mut w, running);

        Ok(w.into_vec())
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.build()?;
        std::fs::write(path, bytes).map_err(|e| ModError::io(e, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{read_archive, LoadMode};
    use crate::codec::COMP_MODE_RAW;
    use crate::hash::resource_hash;

    #[test]
    fn empty_archive_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.resources");
        ArchiveBuilder::with_default_version().write_to(&path).unwrap();

        let archive = read_archive(&path, LoadMode::ReadEverything).unwrap();
        assert_eq!(archive.header.version, ARCHIVE_VERSION);
        assert_eq!(archive.header.num_resources, 0);
        assert!(archive.entries.is_empty());
        assert_eq!(archive.header.resource_entries_offset, HEADER_SIZE);
        assert_eq!(archive.header.string_table_offset, HEADER_SIZE);
        assert_eq!(archive.header.data_offset % 8, 0);
        // Preamble strings are always present.
        assert_eq!(archive.strings.len(), 2);
        assert_eq!(archive.strings.get(0).unwrap(), "rs_streamfile");
        assert_eq!(archive.strings.get(1).unwrap(), "entityDef");

        let original = std::fs::read(&path).unwrap();
        assert_eq!(encode_archive(&archive).unwrap(), original);
    }

    #[test]
    fn synthesized_entries_satisfy_invariants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mod.resources");
        let mut b = ArchiveBuilder::with_default_version();
        b.add_file(ResourceType::RsStreamfile, "a/b/one.decl", b"payload one")
            .unwrap();
        b.add_file(ResourceType::RsStreamfile, "a/b/two.decl", &[0xCC; 17])
            .unwrap();
        b.write_to(&path).unwrap();

        let archive = read_archive(&path, LoadMode::ReadEverything).unwrap();
        for (i, e) in archive.entries.iter().enumerate() {
            assert_eq!(e.comp_mode, COMP_MODE_RAW);
            assert_eq!(e.data_size, e.uncompressed_size);
            assert_eq!(e.data_checksum, e.default_hash);
            assert_eq!(e.data_offset % 8, 0);
            assert_eq!(e.strings, i as u64 * 2);
            assert_eq!(e.num_strings, 2);
            assert_eq!(e.num_dependencies, 0);
            assert_eq!(e.desc_string, -1);
        }
        assert_eq!(
            archive.entries[0].data_checksum,
            resource_hash(b"payload one")
        );
        let (ty, name) = archive.entry_strings(&archive.entries[1]).unwrap();
        assert_eq!(ty, "rs_streamfile");
        assert_eq!(name, "a/b/two.decl");
    }

    #[test]
    fn marker_pad_covers_both_widths() {
        // Version 13 layout lands the marker on an aligned offset (4 pad
        // bytes), version 12's meta header shifts it (0 pad bytes). Both
        // must read back cleanly.
        let dir = tempfile::tempdir().unwrap();
        for version in [12, 13] {
            let path = dir.path().join(format!("v{version}.resources"));
            let mut b = ArchiveBuilder::new(version);
            b.add_file(ResourceType::RsStreamfile, "x.decl", b"x").unwrap();
            b.write_to(&path).unwrap();

            let archive = read_archive(&path, LoadMode::ReadEverything).unwrap();
            let gap = archive.header.gap_size();
            assert_eq!(gap, if version < 13 { 4 } else { 8 });
            assert_eq!(archive.header.data_offset % 8, 0);
            assert_eq!(
                encode_archive(&archive).unwrap(),
                std::fs::read(&path).unwrap()
            );
        }
    }

    #[test]
    fn rejects_non_moddable_types() {
        let mut b = ArchiveBuilder::with_default_version();
        let err = b.add_file(ResourceType::Image, "icon.png", b"data");
        assert!(err.is_err());
    }

    #[test]
    fn data_blocks_are_sequential_and_aligned() {
        let mut b = ArchiveBuilder::with_default_version();
        b.add_file(ResourceType::RsStreamfile, "a", &[1u8; 5]).unwrap();
        b.add_file(ResourceType::RsStreamfile, "b", &[2u8; 8]).unwrap();
        b.add_file(ResourceType::RsStreamfile, "c", &[3u8; 1]).unwrap();
        let bytes = b.build().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aligned.resources");
        std::fs::write(&path, &bytes).unwrap();
        let archive = read_archive(&path, LoadMode::ReadEverything).unwrap();

        let mut expected = archive.header.data_offset;
        for e in &archive.entries {
            assert_eq!(e.data_offset, expected);
            expected += e.data_size;
            expected += (8 - expected % 8) % 8;
        }
        assert_eq!(bytes.len() as u64, expected);
    }
}
