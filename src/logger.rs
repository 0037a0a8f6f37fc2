//! Logging setup: everything goes to the console and to a per-tool log
//! file, so users can attach the log when reporting a broken mod setup.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::fmt::MakeWriter;

/// Writer that tees every log line into the tool's log file.
struct TeeFile {
    file: Mutex<File>,
}

struct TeeHandle<'a> {
    file: &'a Mutex<File>,
}

impl Write for TeeHandle<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut file = self.file.lock().expect("log file lock poisoned");
        file.write_all(buf)?;
        std::io::stderr().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.lock().expect("log file lock poisoned").flush()?;
        std::io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for TeeFile {
    type Writer = TeeHandle<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        TeeHandle { file: &self.file }
    }
}

/// Install the global subscriber writing to `log_path`.
///
/// Returns an error string rather than panicking; a missing log file should
/// not stop the tool, callers just run console-only.
pub fn init(log_path: &Path, verbose: bool) -> Result<(), String> {
    let file = File::create(log_path)
        .map_err(|e| format!("could not create '{}': {e}", log_path.display()))?;

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(false)
        .without_time()
        .with_writer(TeeFile {
            file: Mutex::new(file),
        })
        .try_init()
        .map_err(|e| format!("logger already installed: {e}"))
}

/// Console-only fallback when the log file cannot be created.
pub fn init_console_only(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .try_init();
}
