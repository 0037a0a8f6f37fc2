//! Audio-bank extraction.
//!
//! Sound samples live in `.snd` archives next to the game's sound metadata
//! file. A second container mask — same bit semantics as the resource mask,
//! different framing — says which samples each archive actually loads. The
//! extraction pool is the only concurrent region in the toolchain: workers
//! split an archive's entry range, copy the encoded samples through
//! per-worker temp files, and hand them to an external decoder CLI.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, error, info, warn};

use crate::binary::ByteReader;
use crate::error::{ModError, Result};

/// Hard ceiling on extraction workers, whatever the config asks for.
pub const THREADMAX: usize = 16;

/// External program that turns an encoded sample into a WAV file.
const AUDIO_DECODER: &str = "vgmstream-cli";

/// Entries per worker batch between progress-counter updates.
const PROGRESS_BATCH: u64 = 32;

/// Parsed `.snd` archive header and entry table.
pub struct SndArchive {
    pub path: PathBuf,
    pub version: u32,
    pub header_size: u32,
    entry_meta: Vec<u8>,
    pub entries: Vec<SndEntry>,
}

/// One sample's metadata (32 bytes on disk).
#[derive(Debug, Clone, Copy)]
pub struct SndEntry {
    pub unknown: u64,
    pub id: u32,
    pub encoded_size: u32,
    /// Absolute offset of the encoded bytes.
    pub offset: u32,
    pub decoded_size: u32,
    pub meta_size: u32,
    /// Offset of this entry's RIFF header copy, relative to the start of the
    /// meta section.
    pub meta_offset: u32,
}

impl SndArchive {
    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| ModError::io(e, path))?;
        let mut r = ByteReader::new(&bytes);

        let version = r.read_u32()?;
        let header_size = r.read_u32()?;
        let entry_meta_size = r.read_u32()?;
        let table_bytes = header_size
            .checked_sub(entry_meta_size + 4)
            .ok_or_else(|| ModError::Corrupt {
                path: path.to_path_buf(),
                detail: "sound header smaller than its meta section".into(),
            })?;
        let num_entries = table_bytes / 32;

        let entry_meta = r.read_bytes(entry_meta_size as usize)?.to_vec();
        let mut entries = Vec::with_capacity(num_entries as usize);
        for _ in 0..num_entries {
            entries.push(SndEntry {
                unknown: r.read_u64()?,
                id: r.read_u32()?,
                encoded_size: r.read_u32()?,
                offset: r.read_u32()?,
                decoded_size: r.read_u32()?,
                meta_size: r.read_u32()?,
                meta_offset: r.read_u32()?,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            version,
            header_size,
            entry_meta,
            entries,
        })
    }

    /// Output file name for a sample: the RIFF `adtllabl` label when one is
    /// embedded in the entry's meta chunk, then the numeric id.
    pub fn sample_name(&self, entry: &SndEntry, search_for_label: bool) -> String {
        let mut name = String::new();
        if search_for_label {
            if let Some(label) = self.find_label(entry) {
                name.push_str(&label);
                name.push('_');
            }
        }
        name.push_str(&entry.id.to_string());
        name.push_str(".wav");
        name
    }

    fn find_label(&self, entry: &SndEntry) -> Option<String> {
        let chunk = self
            .entry_meta
            .get(entry.meta_offset as usize..(entry.meta_offset + entry.meta_size) as usize)?;
        let at = chunk.windows(8).position(|w| w == b"adtllabl")?;
        // After the tag: u32 length (covering 4 leading null bytes), the
        // nulls themselves, then the label text.
        let rest = &chunk[at + 8..];
        if rest.len() < 8 {
            return None;
        }
        let len = u32::from_le_bytes(rest[..4].try_into().unwrap()).checked_sub(4)? as usize;
        let text = rest.get(8..8 + len)?;
        Some(String::from_utf8_lossy(text).into_owned())
    }

    /// Copy one sample's encoded bytes from an open archive stream.
    pub fn sample_data(&self, entry: &SndEntry, stream: &mut File, buf: &mut Vec<u8>) -> Result<()> {
        buf.resize(entry.encoded_size as usize, 0);
        stream
            .seek(SeekFrom::Start(entry.offset as u64))
            .and_then(|_| stream.read_exact(buf))
            .map_err(|e| ModError::io(e, &self.path))
    }
}

/// The audio container mask: per-archive bitmaps keyed by archive file name.
#[derive(Debug, Default)]
pub struct SndMask {
    pub entries: Vec<SndMaskEntry>,
}

#[derive(Debug)]
pub struct SndMaskEntry {
    /// Group this archive belongs to (mask group name without `.snd`).
    pub group: String,
    pub archive_name: String,
    bits: Vec<u32>,
}

impl SndMaskEntry {
    pub fn is_enabled(&self, index: u32) -> bool {
        let word = (index / 32) as usize;
        let bit = index % 32;
        self.bits
            .get(word)
            .map(|w| w & (1 << bit) != 0)
            .unwrap_or(false)
    }

    pub fn bit_capacity(&self) -> u32 {
        self.bits.len() as u32 * 32
    }
}

impl SndMask {
    /// Parse the mask region that closes the sound metadata file.
    ///
    /// Layout per group: name (length-prefixed, ends in `.snd`), archive
    /// count, then per archive an id word, a word count, and the bitmap.
    /// Patch archives are named `<stem>_patch_<n>.snd` in listing order.
    pub fn parse(region: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(region);
        let mut mask = SndMask::default();

        let group_count = r.read_u32()?;
        for _ in 0..group_count {
            let name_len = r.read_u32()? as usize;
            let raw_name = r.read_bytes(name_len)?;
            let group_name = String::from_utf8_lossy(raw_name).into_owned();
            let stem = group_name.strip_suffix(".snd").unwrap_or(&group_name);

            let archive_count = r.read_u32()?;
            for archive_index in 0..archive_count {
                r.skip(4)?; // container id
                let word_count = r.read_u32()?;
                let bits = (0..word_count)
                    .map(|_| r.read_u32())
                    .collect::<std::result::Result<_, _>>()?;
                let archive_name = if archive_index == 0 {
                    format!("{stem}.snd")
                } else {
                    format!("{stem}_patch_{archive_index}.snd")
                };
                mask.entries.push(SndMaskEntry {
                    group: stem.to_string(),
                    archive_name,
                    bits,
                });
            }
        }
        if !r.reached_eof() {
            return Err(ModError::Other(format!(
                "{} trailing bytes after audio container mask",
                r.remaining()
            )));
        }
        Ok(mask)
    }

    /// Read the sound metadata file and parse the mask region at its tail.
    pub fn from_metadata_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| ModError::io(e, path))?;
        let start = locate_mask_region(&bytes).map_err(|e| ModError::Corrupt {
            path: path.to_path_buf(),
            detail: format!("while walking sound metadata: {e}"),
        })?;
        Self::parse(&bytes[start..])
    }
}

/// Skip the event/state sections preceding the mask region and return the
/// region's offset. The walk mirrors the metadata file's section order; it
/// carries no meaning here beyond finding the end.
fn locate_mask_region(bytes: &[u8]) -> std::result::Result<usize, crate::binary::BinaryError> {
    let mut r = ByteReader::new(bytes);

    let skip_str = |r: &mut ByteReader| -> std::result::Result<(), crate::binary::BinaryError> {
        let len = r.read_u32()? as usize;
        r.skip(len)
    };

    // Sound events: name, bank id, language id, language name.
    let count = r.read_u32()?;
    for _ in 0..count {
        skip_str(&mut r)?;
        r.skip(4)?;
        r.skip(1)?;
        skip_str(&mut r)?;
    }

    // Two id/name listing sections, opposite field orders.
    let count = r.read_u32()?;
    for _ in 0..count {
        r.skip(4)?;
        skip_str(&mut r)?;
    }
    let count = r.read_u32()?;
    for _ in 0..count {
        skip_str(&mut r)?;
        r.skip(4)?;
    }

    // Music switches and music states: id, name, sub-list of id/name pairs.
    for _ in 0..2 {
        let count = r.read_u32()?;
        for _ in 0..count {
            r.skip(4)?;
            skip_str(&mut r)?;
            let sub = r.read_u32()?;
            for _ in 0..sub {
                r.skip(4)?;
                skip_str(&mut r)?;
            }
        }
    }

    // Mixed section: name, id, 11 opaque bytes, then either a language list
    // (two string tables) or a plain id/name list.
    let count = r.read_u32()?;
    for _ in 0..count {
        skip_str(&mut r)?;
        r.skip(4)?;
        r.skip(11)?;
        let list_len = r.read_u32()?;

        let is_language_list = {
            let mark = r.position();
            let probe_len = r.read_u32()? as usize;
            let result = probe_len == 11 && r.read_bytes(11)? == b"English(US)";
            r.seek(mark)?;
            result
        };

        if is_language_list {
            for lang in 0..list_len {
                if lang > 0 {
                    r.skip(4)?;
                }
                skip_str(&mut r)?;
            }
            r.skip(4)?;
            let second = r.read_u32()?;
            for _ in 0..second {
                r.skip(4)?;
                skip_str(&mut r)?;
            }
        } else {
            for _ in 0..list_len {
                r.skip(4)?;
                skip_str(&mut r)?;
            }
        }
    }

    Ok(r.position())
}

/// Settings for one audio-extraction run.
pub struct AudioExtractOptions<'a> {
    pub sound_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Group names to extract; empty means everything.
    pub groups: &'a [String],
    pub max_threads: usize,
}

/// Extract every selected audio archive referenced by the mask.
///
/// Archives inside a group are walked in reverse priority (base archive
/// first, patches after), so an enabled higher-priority copy simply
/// overwrites the file. The shared map keeps the override rule commutative.
pub fn run_audio_extraction(opts: &AudioExtractOptions) -> Result<()> {
    let metadata_path = opts.sound_dir.join("soundmetadata.bin");
    let mask = SndMask::from_metadata_file(&metadata_path)?;
    info!("audio container mask lists {} archives", mask.entries.len());

    let emitted: Mutex<HashMap<u32, bool>> = Mutex::new(HashMap::new());
    let progress = AtomicU64::new(0);

    for entry in &mask.entries {
        if !opts.groups.is_empty() && !opts.groups.contains(&entry.group) {
            continue;
        }
        let archive_path = opts.sound_dir.join(&entry.archive_name);
        if !archive_path.is_file() {
            warn!("audio archive '{}' listed but missing", archive_path.display());
            continue;
        }
        let archive = SndArchive::read_from(&archive_path)?;
        if entry.bit_capacity() < archive.entries.len() as u32 {
            error!(
                "skipping '{}': mask covers {} samples, archive has {}",
                archive_path.display(),
                entry.bit_capacity(),
                archive.entries.len()
            );
            continue;
        }
        extract_snd_archive(&archive, entry, opts, &emitted, &progress)?;
    }

    info!(
        "audio extraction complete: {} samples written",
        progress.load(Ordering::Relaxed)
    );
    Ok(())
}

fn worker_count(entry_count: usize, configured_cap: usize) -> usize {
    // One worker per 256 entries, within the configured and compiled caps.
    let by_size = entry_count.div_ceil(256).max(1);
    by_size
        .min(configured_cap.max(1))
        .min(THREADMAX)
        .min(num_cpus::get())
}

fn extract_snd_archive(
    archive: &SndArchive,
    mask_entry: &SndMaskEntry,
    opts: &AudioExtractOptions,
    emitted: &Mutex<HashMap<u32, bool>>,
    progress: &AtomicU64,
) -> Result<()> {
    let out_dir = opts.output_dir.join(&mask_entry.group);
    std::fs::create_dir_all(&out_dir).map_err(|e| ModError::io(e, &out_dir))?;

    let workers = worker_count(archive.entries.len(), opts.max_threads);
    let chunk = archive.entries.len().div_ceil(workers.max(1)).max(1);
    info!(
        "extracting {} samples from {:?} with {workers} workers",
        archive.entries.len(),
        archive.path.file_name().unwrap_or_default()
    );

    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for (worker_id, slice) in archive.entries.chunks(chunk).enumerate() {
            let out_dir = out_dir.clone();
            let base_index = (worker_id * chunk) as u32;
            handles.push(scope.spawn(move || {
                audio_worker(
                    worker_id, base_index, archive, mask_entry, slice, &out_dir, emitted, progress,
                )
            }));
        }
        // Workers run their whole range; failures surface after the join.
        let mut first_err = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => first_err = first_err.or(Some(e)),
                Err(_) => {
                    first_err =
                        first_err.or(Some(ModError::Other("audio worker panicked".into())))
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn audio_worker(
    worker_id: usize,
    base_index: u32,
    archive: &SndArchive,
    mask_entry: &SndMaskEntry,
    entries: &[SndEntry],
    out_dir: &Path,
    emitted: &Mutex<HashMap<u32, bool>>,
    progress: &AtomicU64,
) -> Result<()> {
    // Each worker owns its stream and temp file; only the override map is
    // shared and it sits behind the mutex.
    let mut stream = File::open(&archive.path).map_err(|e| ModError::io(e, &archive.path))?;
    let mut temp = tempfile::NamedTempFile::new().map_err(ModError::from)?;
    let mut buf = Vec::new();
    let mut local_batch = 0u64;

    for (i, entry) in entries.iter().enumerate() {
        let enabled = mask_entry.is_enabled(base_index + i as u32);

        {
            let mut map = emitted.lock().expect("audio override map poisoned");
            match map.get(&entry.id) {
                None => {
                    map.insert(entry.id, enabled);
                }
                Some(true) => {
                    debug!("duplicate usage of sample {}", entry.id);
                    continue;
                }
                Some(false) if enabled => {
                    debug!("re-emitting sample {} from an enabled archive", entry.id);
                    map.insert(entry.id, true);
                }
                Some(false) => {
                    debug!("duplicate usage of sample {}", entry.id);
                    continue;
                }
            }
        }

        if let Err(e) = decode_sample(archive, entry, &mut stream, &mut temp, &mut buf, out_dir) {
            error!("worker {worker_id}: sample {} failed: {e}", entry.id);
            continue;
        }

        local_batch += 1;
        if local_batch == PROGRESS_BATCH {
            progress.fetch_add(local_batch, Ordering::Relaxed);
            local_batch = 0;
        }
    }
    progress.fetch_add(local_batch, Ordering::Relaxed);
    Ok(())
}

fn decode_sample(
    archive: &SndArchive,
    entry: &SndEntry,
    stream: &mut File,
    temp: &mut tempfile::NamedTempFile,
    buf: &mut Vec<u8>,
    out_dir: &Path,
) -> Result<()> {
    archive.sample_data(entry, stream, buf)?;

    temp.as_file_mut()
        .set_len(0)
        .and_then(|_| temp.as_file_mut().seek(SeekFrom::Start(0)))
        .and_then(|_| temp.as_file_mut().write_all(buf))
        .and_then(|_| temp.as_file_mut().flush())
        .map_err(|e| ModError::io(e, temp.path()))?;

    let out_path = out_dir.join(archive.sample_name(entry, true));
    let status = Command::new(AUDIO_DECODER)
        .arg("-o")
        .arg(&out_path)
        .arg(temp.path())
        .status()
        .map_err(|e| ModError::Other(format!("running {AUDIO_DECODER}: {e}")))?;
    if !status.success() {
        return Err(ModError::Other(format!(
            "{AUDIO_DECODER} exited with {status} for sample {}",
            entry.id
        )));
    }
    Ok(())
}
