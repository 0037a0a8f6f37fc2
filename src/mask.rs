//! Container-mask engine.
//!
//! The game ships a single-entry archive (`meta.resources`) whose payload is
//! a list of `{fingerprint, word count, bitmap}` triples, one per archive.
//! Bit `i` of an archive's bitmap enables resource entry `i` in that
//! archive's on-disk order; an archive with no triple is fully enabled.
//! Injection appends an all-ones triple for the synthesized archive and
//! stamps the wrapping entry so later runs can tell the file is modded.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

use crate::archive::{
    container_identity, encode_metadata, entry_data, read_archive, EntryDataCode, EntryScratch,
    LoadMode, ResourceArchive, MODDED_TIMESTAMP,
};
use crate::binary::{ByteReader, ByteWriter};
use crate::codec::{CodecHandle, COMP_MODE_RAW};
use crate::error::{ModError, Result};
use crate::hash::resource_hash;

/// Decoded container-mask payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerMask {
    /// Optional leading timestamp word some payload revisions carry.
    pub compact_timestamp: Option<u32>,
    pub entries: Vec<MaskEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskEntry {
    pub fingerprint: u64,
    pub bits: Vec<u64>,
}

impl ContainerMask {
    /// Parse a decompressed mask payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload);
        let mut compact_timestamp = None;

        // A timestamp word is distinguishable from a plausible entry count
        // by its magnitude.
        let mut entry_count = r.read_u32()?;
        if entry_count & 0xFFFF_F000 != 0 {
            compact_timestamp = Some(entry_count);
            entry_count = r.read_u32()?;
        }

        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let fingerprint = r.read_u64()?;
            let word_count = r.read_u32()?;
            let bits = (0..word_count)
                .map(|_| r.read_u64())
                .collect::<std::result::Result<_, _>>()?;
            entries.push(MaskEntry { fingerprint, bits });
        }
        if !r.reached_eof() {
            return Err(ModError::Other(format!(
                "{} trailing bytes after container mask",
                r.remaining()
            )));
        }
        Ok(Self {
            compact_timestamp,
            entries,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        if let Some(ts) = self.compact_timestamp {
            w.write_u32(ts);
        }
        w.write_u32(self.entries.len() as u32);
        for e in &self.entries {
            w.write_u64(e.fingerprint);
            w.write_u32(e.bits.len() as u32);
            for word in &e.bits {
                w.write_u64(*word);
            }
        }
        w.into_vec()
    }

    pub fn find(&self, fingerprint: u64) -> Option<&MaskEntry> {
        self.entries.iter().find(|e| e.fingerprint == fingerprint)
    }

    /// Whether entry `index` of the archive with this fingerprint is
    /// enabled. No bitmap means everything is enabled.
    pub fn is_enabled(&self, fingerprint: u64, index: u32) -> bool {
        match self.find(fingerprint) {
            Some(entry) => {
                let word = (index / 64) as usize;
                let bit = index % 64;
                entry
                    .bits
                    .get(word)
                    .map(|w| w & (1 << bit) != 0)
                    .unwrap_or(false)
            }
            None => true,
        }
    }

    /// Append an all-ones bitmap for a newly synthesized archive.
    ///
    /// Bitmaps are sized to `num_resources / 64` words, plus one for any
    /// remainder, plus one extra; zero-word bitmaps never occur.
    pub fn append_enabled_archive(&mut self, fingerprint: u64, num_resources: u32) {
        let words = bitmask_words(num_resources);
        self.entries.push(MaskEntry {
            fingerprint,
            bits: vec![u64::MAX; words as usize],
        });
    }
}

pub fn bitmask_words(num_resources: u32) -> u32 {
    num_resources / 64 + u32::from(num_resources % 64 != 0) + 1
}

/// Load and decode the mask carried by the `meta.resources` archive.
pub fn read_mask_archive(path: &Path, codec: &CodecHandle) -> Result<ContainerMask> {
    let archive = read_archive(path, LoadMode::ReadEverything)?;
    let payload = mask_payload(&archive, codec)?;
    ContainerMask::parse(&payload)
}

fn mask_payload(archive: &ResourceArchive, codec: &CodecHandle) -> Result<Vec<u8>> {
    if archive.entries.len() != 1 {
        return Err(ModError::Corrupt {
            path: archive.path.clone(),
            detail: format!(
                "container-mask archive holds {} entries, expected 1",
                archive.entries.len()
            ),
        });
    }
    let mut scratch = EntryScratch::default();
    let (code, bytes) = entry_data(archive, &archive.entries[0], &mut scratch, codec);
    if code != EntryDataCode::Ok {
        return Err(ModError::Corrupt {
            path: archive.path.clone(),
            detail: format!("container-mask payload unreadable ({code:?})"),
        });
    }
    Ok(bytes.to_vec())
}

/// Whether the mask archive has already been rewritten by an injection.
pub fn is_modded_meta(path: &Path) -> Result<bool> {
    let archive = read_archive(path, LoadMode::StopAfterEntries)?;
    Ok(archive
        .entries
        .first()
        .is_some_and(|e| e.generation_timestamp == MODDED_TIMESTAMP))
}

/// Register a synthesized archive in the on-disk container mask.
///
/// The decompressed payload gains one all-ones triple; the wrapping entry is
/// rewritten uncompressed with fresh sizes and hashes and the modded
/// timestamp sentinel.
pub fn register_archive_in_mask(
    mask_path: &Path,
    new_archive_path: &Path,
    codec: &CodecHandle,
) -> Result<()> {
    let mut archive = read_archive(mask_path, LoadMode::ReadEverything)?;
    let mut mask = ContainerMask::parse(&mask_payload(&archive, codec)?)?;

    let identity = container_identity(new_archive_path)?;
    mask.append_enabled_archive(identity.fingerprint, identity.num_resources);
    let payload = mask.serialize();
    debug!(
        "container mask now holds {} archive bitmaps",
        mask.entries.len()
    );

    let entry = &mut archive.entries[0];
    entry.comp_mode = COMP_MODE_RAW;
    entry.data_size = payload.len() as u64;
    entry.uncompressed_size = payload.len() as u64;
    entry.data_checksum = resource_hash(&payload);
    entry.default_hash = entry.data_checksum;
    entry.generation_timestamp = MODDED_TIMESTAMP;

    let mut bytes = encode_metadata(&archive)?;
    bytes.extend_from_slice(&payload);
    std::fs::write(mask_path, bytes).map_err(|e| ModError::io(e, mask_path))?;
    info!(
        "registered '{}' in container mask ({} entries enabled)",
        new_archive_path.display(),
        identity.num_resources
    );
    Ok(())
}

/// Priority-aware de-duplication for extraction.
///
/// Archives are visited highest priority first. The first archive holding an
/// asset emits it; a later archive re-emits (overwrites) only when the first
/// copy was mask-disabled and its own copy is enabled. The audio flow walks
/// in reverse priority and feeds the same rule.
#[derive(Default)]
pub struct EmitTracker {
    seen: HashMap<String, bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitDecision {
    /// First sighting: write the file.
    Emit,
    /// Better copy of something already written: overwrite it.
    Reemit,
    Skip,
}

impl EmitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Record an `(asset key, enabled)` observation and decide whether to
    /// write. The rule is commutative over observation order for enabled
    /// copies: the surviving file always comes from the highest-priority
    /// enabled archive when visiting in priority order.
    pub fn observe(&mut self, key: &str, enabled: bool) -> EmitDecision {
        match self.seen.get_mut(key) {
            None => {
                self.seen.insert(key.to_string(), enabled);
                EmitDecision::Emit
            }
            Some(was_enabled) => {
                if !*was_enabled && enabled {
                    *was_enabled = true;
                    EmitDecision::Reemit
                } else {
                    EmitDecision::Skip
                }
            }
        }
    }
}
