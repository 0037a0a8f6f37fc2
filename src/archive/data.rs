//! Per-entry payload extraction.
//!
//! Payloads come out of either a preloaded archive buffer or an open file
//! handle. Compressed entries are expanded through the external codec into
//! a reusable scratch buffer; unknown compression modes surface the raw
//! bytes so callers can still dump them.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::codec::{CodecHandle, COMP_MODE_CODEC, COMP_MODE_RAW};

use super::{ResourceArchive, ResourceEntry};

/// Outcome of a payload fetch. Rides alongside the bytes rather than
/// replacing them: `UnknownCompression` still carries the raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDataCode {
    Ok,
    /// The archive was loaded without its data region.
    DataNotRead,
    /// Unrecognized `comp_mode`; the raw on-disk bytes are surfaced.
    UnknownCompression,
    /// The external codec failed to expand the payload.
    CodecError,
    Unused,
}

/// Reusable buffers for streaming entry reads. Buffers grow to the largest
/// entry seen and stay allocated across calls.
#[derive(Default)]
pub struct EntryScratch {
    raw: Vec<u8>,
    decomp: Vec<u8>,
}

/// Fetch an entry's payload from a preloaded archive.
///
/// Raw payloads borrow straight from the archive's data buffer; compressed
/// payloads land in `scratch`.
pub fn entry_data<'a>(
    archive: &'a ResourceArchive,
    entry: &ResourceEntry,
    scratch: &'a mut EntryScratch,
    codec: &CodecHandle,
) -> (EntryDataCode, &'a [u8]) {
    let Some(data) = archive.data.as_ref() else {
        return (EntryDataCode::DataNotRead, &[]);
    };
    let start = (entry.data_offset - archive.header.data_offset) as usize;
    let Some(raw) = data.get(start..start + entry.data_size as usize) else {
        return (EntryDataCode::DataNotRead, &[]);
    };

    match entry.comp_mode {
        COMP_MODE_RAW => (EntryDataCode::Ok, raw),
        COMP_MODE_CODEC => decompress_into(raw, entry.uncompressed_size, scratch, codec),
        _ => (EntryDataCode::UnknownCompression, raw),
    }
}

/// Fetch an entry's payload through an open archive stream.
///
/// Use this when the archive was loaded with `SkipData` and entries are
/// being walked one at a time.
pub fn entry_data_stream<'a>(
    entry: &ResourceEntry,
    stream: &mut File,
    scratch: &'a mut EntryScratch,
    codec: &CodecHandle,
) -> std::io::Result<(EntryDataCode, &'a [u8])> {
    if scratch.raw.len() < entry.data_size as usize {
        scratch.raw.resize(entry.data_size as usize, 0);
    }
    stream.seek(SeekFrom::Start(entry.data_offset))?;
    stream.read_exact(&mut scratch.raw[..entry.data_size as usize])?;

    match entry.comp_mode {
        COMP_MODE_RAW => Ok((EntryDataCode::Ok, &scratch.raw[..entry.data_size as usize])),
        COMP_MODE_CODEC => {
            // Split borrows: decompress from `raw` into `decomp`.
            let EntryScratch { raw, decomp } = scratch;
            if decomp.len() < entry.uncompressed_size as usize {
                decomp.resize(entry.uncompressed_size as usize, 0);
            }
            let dst = &mut decomp[..entry.uncompressed_size as usize];
            match codec.decompress(&raw[..entry.data_size as usize], dst) {
                Ok(_) => Ok((EntryDataCode::Ok, dst)),
                Err(_) => Ok((EntryDataCode::CodecError, &[])),
            }
        }
        _ => Ok((
            EntryDataCode::UnknownCompression,
            &scratch.raw[..entry.data_size as usize],
        )),
    }
}

fn decompress_into<'a>(
    raw: &[u8],
    uncompressed_size: u64,
    scratch: &'a mut EntryScratch,
    codec: &CodecHandle,
) -> (EntryDataCode, &'a [u8]) {
    if scratch.decomp.len() < uncompressed_size as usize {
        scratch.decomp.resize(uncompressed_size as usize, 0);
    }
    let dst = &mut scratch.decomp[..uncompressed_size as usize];
    match codec.decompress(raw, dst) {
        Ok(_) => (EntryDataCode::Ok, dst),
        Err(_) => (EntryDataCode::CodecError, &[]),
    }
}
