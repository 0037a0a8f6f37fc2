use std::path::PathBuf;

use crate::binary::BinaryError;

/// The primary error type for all operations in the `modforge` crate.
#[derive(Debug, thiserror::Error)]
pub enum ModError {
    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },

    /// A file failed its magic-bytes check and is not a resource archive.
    #[error("'{}' is not a resource archive (magic bytes mismatch)", path.display())]
    BadMagic { path: PathBuf },

    /// The archive declares a format version this crate does not read.
    #[error("unsupported archive version {version} in '{}'", path.display())]
    UnsupportedVersion { version: u32, path: PathBuf },

    /// A structural audit of archive metadata failed; the archive is corrupt.
    #[error("archive audit failed for '{}': {detail}", path.display())]
    Corrupt { path: PathBuf, detail: String },

    /// A bounded read of a binary buffer went wrong.
    #[error("binary decode error: {0}")]
    Binary(#[from] BinaryError),

    /// The external compression codec reported a failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// An error during (de)serialization of a JSON document.
    #[error("serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// An error raised by the zip reader/writer.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A textual configuration file could not be parsed.
    #[error("config error in '{}': {detail}", path.display())]
    Config { path: PathBuf, detail: String },

    /// The external executable patcher failed and mod loading was aborted.
    #[error("patcher failed (code {code}, {failed} failed patches)")]
    PatcherFailed { code: u16, failed: u8 },

    /// A wrapper for any other error that doesn't fit the specific variants.
    #[error("{0}")]
    Other(String),
}

impl ModError {
    /// Attach a path to a bare `std::io::Error`.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ModError::Io {
            source,
            path: path.into(),
        }
    }
}

impl From<std::io::Error> for ModError {
    fn from(err: std::io::Error) -> Self {
        ModError::Io {
            source: err,
            path: PathBuf::new(), // Generic path
        }
    }
}

pub type Result<T> = std::result::Result<T, ModError>;
