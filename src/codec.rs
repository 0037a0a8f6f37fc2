//! External compression codec boundary.
//!
//! Archive entries with `comp_mode == COMP_MODE_CODEC` hold streams produced
//! by a third-party compressor. The toolchain only ever talks to it through
//! the [`Codec`] trait so the backing library can be swapped (or faked in
//! tests) without touching the archive code.

use std::sync::Arc;

use crate::error::{ModError, Result};

/// Entry payload stored raw.
pub const COMP_MODE_RAW: u8 = 0;
/// Entry payload compressed by the external codec.
pub const COMP_MODE_CODEC: u8 = 2;

/// The compress/decompress contract of the external library.
pub trait Codec: Send + Sync {
    /// Decompress `src` into `dst`, which is exactly the advertised
    /// uncompressed size. Returns the number of bytes produced.
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize>;

    /// Compress `src` into a fresh buffer.
    fn compress(&self, src: &[u8]) -> Result<Vec<u8>>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

pub type CodecHandle = Arc<dyn Codec>;

/// Production codec backed by zstd.
pub struct ZstdCodec;

impl Codec for ZstdCodec {
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let n = zstd::bulk::decompress_to_buffer(src, dst)
            .map_err(|e| ModError::Codec(format!("decompress: {e}")))?;
        if n != dst.len() {
            return Err(ModError::Codec(format!(
                "short decompress: expected {} bytes, got {n}",
                dst.len()
            )));
        }
        Ok(n)
    }

    fn compress(&self, src: &[u8]) -> Result<Vec<u8>> {
        zstd::bulk::compress(src, 0).map_err(|e| ModError::Codec(format!("compress: {e}")))
    }

    fn name(&self) -> &'static str {
        "zstd"
    }
}

/// Verify the codec is usable before any archive work starts.
///
/// The hook exists because a dynamically loaded backend may need fetching or
/// probing on first run; the built-in backend only proves it round-trips.
pub fn init(codec: &CodecHandle) -> Result<()> {
    let probe = b"codec self-check";
    let packed = codec.compress(probe)?;
    let mut out = vec![0u8; probe.len()];
    codec.decompress(&packed, &mut out)?;
    if out != probe {
        return Err(ModError::Codec(format!(
            "{} failed its round-trip self-check",
            codec.name()
        )));
    }
    tracing::debug!("codec '{}' initialized", codec.name());
    Ok(())
}

/// The default production codec.
pub fn default_codec() -> CodecHandle {
    Arc::new(ZstdCodec)
}
