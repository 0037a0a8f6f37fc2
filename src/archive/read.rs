//! Archive read path and structural audits.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::binary::ByteReader;
use crate::error::{ModError, Result};

use super::{
    LoadMode, ResourceArchive, ResourceDependency, ResourceEntry, ResourceHeader,
    ResourceMetaHeader, StringChunk, ARCHIVE_MAGIC, ENTRY_SIZE, HEADER_SIZE, SUPPORTED_VERSIONS,
};

/// Load an archive from disk.
///
/// The file is memory-mapped and the metadata sections are parsed by
/// absolute offset. Audits run on everything that was read; any failure is
/// fatal for this archive.
pub fn read_archive(path: &Path, mode: LoadMode) -> Result<ResourceArchive> {
    let file = File::open(path).map_err(|e| ModError::io(e, path))?;
    // Read-only map; the archive set is never written while being read.
    let map = unsafe { Mmap::map(&file) }.map_err(|e| ModError::io(e, path))?;
    let mut r = ByteReader::new(&map);

    let mut archive = ResourceArchive {
        path: path.to_path_buf(),
        ..Default::default()
    };

    if r.remaining() < HEADER_SIZE as usize || r.read_bytes(4)? != ARCHIVE_MAGIC {
        return Err(ModError::BadMagic {
            path: path.to_path_buf(),
        });
    }

    archive.header = read_header(&mut r)?;
    let h = &archive.header;
    if !SUPPORTED_VERSIONS.contains(&h.version) {
        return Err(ModError::UnsupportedVersion {
            version: h.version,
            path: path.to_path_buf(),
        });
    }

    r.seek(HEADER_SIZE as usize)?;
    if h.version < 13 {
        archive.meta_header = Some(ResourceMetaHeader {
            unknown: r.read_u32()?,
            meta_offset: r.read_u64()?,
        });
    }

    audit_header(&archive, map.len() as u64)?;
    if mode == LoadMode::HeaderOnly {
        return Ok(archive);
    }

    r.seek(archive.header.resource_entries_offset as usize)?;
    archive.entries = (0..archive.header.num_resources)
        .map(|_| read_entry(&mut r))
        .collect::<std::result::Result<_, _>>()?;

    audit_entries(&archive)?;
    if mode == LoadMode::StopAfterEntries {
        return Ok(archive);
    }

    let h = &archive.header;
    r.seek(h.string_table_offset as usize)?;
    archive.strings = read_string_chunk(&mut r, h.string_table_size)?;

    r.seek(h.resource_deps_offset as usize)?;
    archive.dependencies = (0..h.num_dependencies)
        .map(|_| {
            Ok(ResourceDependency {
                dep_type_string: r.read_u64()?,
                dep_name_string: r.read_u64()?,
                dep_type: r.read_u32()?,
                dep_sub_type: r.read_u32()?,
                first_int: r.read_u32()?,
                second_int: r.read_u32()?,
            })
        })
        .collect::<Result<_>>()?;
    archive.dependency_index = (0..h.num_dep_indices)
        .map(|_| r.read_u32())
        .collect::<std::result::Result<_, _>>()?;
    archive.string_index = (0..h.num_string_indices)
        .map(|_| r.read_u64())
        .collect::<std::result::Result<_, _>>()?;

    audit_meta_marker(&archive, &mut r)?;

    if mode == LoadMode::ReadEverything {
        r.seek(archive.header.data_offset as usize)?;
        archive.data = Some(r.read_bytes(r.remaining())?.to_vec());
    }

    Ok(archive)
}

fn read_header(r: &mut ByteReader) -> Result<ResourceHeader> {
    Ok(ResourceHeader {
        version: r.read_u32()?,
        flags: r.read_u32()?,
        num_segments: r.read_u32()?,
        segment_size: r.read_u64()?,
        metadata_hash: r.read_u64()?,
        num_resources: r.read_u32()?,
        num_dependencies: r.read_u32()?,
        num_dep_indices: r.read_u32()?,
        num_string_indices: r.read_u32()?,
        num_special_hashes: r.read_u32()?,
        num_meta_entries: r.read_u32()?,
        string_table_size: r.read_u32()?,
        meta_entries_size: r.read_u32()?,
        string_table_offset: r.read_u64()?,
        meta_entries_offset: r.read_u64()?,
        resource_entries_offset: r.read_u64()?,
        resource_deps_offset: r.read_u64()?,
        resource_special_hash_offset: r.read_u64()?,
        data_offset: r.read_u64()?,
    })
}

fn read_entry(r: &mut ByteReader) -> Result<ResourceEntry> {
    let e = ResourceEntry {
        resource_type_string: r.read_i64()?,
        name_string: r.read_i64()?,
        desc_string: r.read_i64()?,
        dep_indices: r.read_u64()?,
        strings: r.read_u64()?,
        special_hashes: r.read_u64()?,
        meta_entries: r.read_u64()?,
        data_offset: r.read_u64()?,
        data_size: r.read_u64()?,
        uncompressed_size: r.read_u64()?,
        data_checksum: r.read_u64()?,
        generation_timestamp: r.read_u64()?,
        default_hash: r.read_u64()?,
        version: r.read_u32()?,
        flags: r.read_u32()?,
        comp_mode: r.read_u8()?,
        reserved0: r.read_u8()?,
        variation: r.read_u16()?,
        reserved2: r.read_u32()?,
        reserved_for_variations: r.read_u64()?,
        num_strings: r.read_u16()?,
        num_sources: r.read_u16()?,
        num_dependencies: r.read_u16()?,
        num_special_hashes: r.read_u16()?,
        num_meta_entries: r.read_u16()?,
    };
    r.skip(6)?; // trailing entry padding
    Ok(e)
}

fn read_string_chunk(r: &mut ByteReader, table_size: u32) -> Result<StringChunk> {
    let count = r.read_u64()?;
    let list_bytes = count
        .checked_mul(8)
        .and_then(|v| v.checked_add(8))
        .ok_or(crate::binary::BinaryError::BadLength)?;
    let blob_len = (table_size as u64)
        .checked_sub(list_bytes)
        .ok_or(crate::binary::BinaryError::BadLength)?;
    let offsets: Vec<u64> = (0..count)
        .map(|_| r.read_u64())
        .collect::<std::result::Result<_, _>>()?;
    // Everything else in the declared table size is blob plus alignment
    // padding; strings are addressed through the offset list so the
    // trailing zeros are harmless to keep.
    let blob = r.read_bytes(blob_len as usize)?.to_vec();
    Ok(StringChunk { offsets, blob })
}

fn audit_header(archive: &ResourceArchive, file_len: u64) -> Result<()> {
    let h = &archive.header;
    let corrupt = |detail: String| ModError::Corrupt {
        path: archive.path.clone(),
        detail,
    };

    if h.string_table_offset != h.resource_entries_offset + h.num_resources as u64 * ENTRY_SIZE {
        return Err(corrupt(format!(
            "string table at {} but entry table ends at {}",
            h.string_table_offset,
            h.resource_entries_offset + h.num_resources as u64 * ENTRY_SIZE
        )));
    }
    if h.resource_deps_offset != h.string_table_offset + h.string_table_size as u64 {
        return Err(corrupt("dependency region does not follow string table".into()));
    }
    if (h.string_table_size as u64) < 8 {
        return Err(corrupt("string table too small for its count field".into()));
    }
    if h.data_offset % 8 != 0 {
        return Err(corrupt(format!("data offset {} not 8-byte aligned", h.data_offset)));
    }
    if h.data_offset > file_len {
        return Err(corrupt("data offset past end of file".into()));
    }
    // The gap holds the repeated magic plus at most one alignment word.
    let gap = h.gap_size();
    if gap != 4 && gap != 8 {
        return Err(corrupt(format!("meta/data gap of {gap} bytes")));
    }
    if let Some(meta) = &archive.meta_header {
        if meta.meta_offset != h.expected_meta_offset() {
            return Err(corrupt(format!(
                "meta header points at {}, sections end at {}",
                meta.meta_offset,
                h.expected_meta_offset()
            )));
        }
    }
    Ok(())
}

fn audit_entries(archive: &ResourceArchive) -> Result<()> {
    for (index, entry) in archive.entries.iter().enumerate() {
        if entry.strings != index as u64 * 2 {
            return Err(ModError::Corrupt {
                path: archive.path.clone(),
                detail: format!(
                    "entry {index} string base {} (expected {})",
                    entry.strings,
                    index * 2
                ),
            });
        }
        if entry.data_offset < archive.header.data_offset {
            return Err(ModError::Corrupt {
                path: archive.path.clone(),
                detail: format!("entry {index} data offset inside metadata region"),
            });
        }
    }
    Ok(())
}

/// The meta section ends with a second `IDCL`; verify it and the alignment
/// bytes before the data region.
fn audit_meta_marker(archive: &ResourceArchive, r: &mut ByteReader) -> Result<()> {
    let h = &archive.header;
    let corrupt = |detail: String| ModError::Corrupt {
        path: archive.path.clone(),
        detail,
    };

    r.seek(h.expected_meta_offset() as usize)
        .map_err(|_| corrupt("meta marker past end of file".into()))?;
    let marker = r.read_bytes(4)?;
    if marker != ARCHIVE_MAGIC {
        return Err(corrupt("repeated IDCL marker missing".into()));
    }
    let pad = (h.gap_size() - 4) as usize;
    if r.read_bytes(pad)?.iter().any(|&b| b != 0) {
        return Err(corrupt("non-zero padding before data region".into()));
    }
    Ok(())
}
