//! Mod packager: fold a mods working tree into one redistributable zip.
//!
//! Files keep their tree-relative paths, so a bundle unzips straight into a
//! loadable layout. Serialized asset classes travel as-is; turning edited
//! text back into engine binaries is the reserializer's job, not ours.

use std::io::Write;
use std::path::PathBuf;

use tracing::{info, warn};
use zip::write::FileOptions;

use crate::config;
use crate::error::{ModError, Result};
use crate::mods::MOD_MANIFEST_NAME;

/// Path prefix excluded from packaging: raw leftovers from a previous
/// package run that must not override the real files.
const NOLOAD_PREFIX: &str = "noload";

#[derive(Debug)]
pub struct PackageOptions {
    pub mods_dir: PathBuf,
    pub output_zip: PathBuf,
}

/// Build the package zip. Returns the number of files bundled.
pub fn run_packager(opts: &PackageOptions) -> Result<usize> {
    if !opts.mods_dir.is_dir() {
        return Err(ModError::Other(format!(
            "could not find mods folder '{}'",
            opts.mods_dir.display()
        )));
    }

    // Aliases only matter for classifying files; the zip keeps real names.
    let mut aliases = std::collections::HashMap::new();
    let manifest_path = opts.mods_dir.join(MOD_MANIFEST_NAME);
    if manifest_path.is_file() {
        info!("found {MOD_MANIFEST_NAME}");
        let text =
            std::fs::read_to_string(&manifest_path).map_err(|e| ModError::io(e, &manifest_path))?;
        match config::parse_str(&text) {
            Ok(root) => {
                for alias in &root.child("aliasing").children {
                    if !alias.value.is_empty() {
                        aliases.insert(alias.name.replace('\\', "/"), alias.value.clone());
                    }
                }
                if !aliases.is_empty() {
                    info!("found {} alias definitions", aliases.len());
                }
            }
            Err(detail) => warn!("failed to read {MOD_MANIFEST_NAME}: {detail}"),
        }
    }

    let file = std::fs::File::create(&opts.output_zip)
        .map_err(|e| ModError::io(e, &opts.output_zip))?;
    let mut zip = zip::ZipWriter::new(file);
    let mut bundled = 0usize;

    for entry in walkdir::WalkDir::new(&opts.mods_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| ModError::Other(format!("scanning mods: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
        {
            continue;
        }

        let zipped_name = path
            .strip_prefix(&opts.mods_dir)
            .map_err(|_| ModError::Other(format!("'{}' outside mods dir", path.display())))?
            .to_string_lossy()
            .replace('\\', "/");

        if classify_prefix(&zipped_name, &aliases) == Some(NOLOAD_PREFIX.to_string()) {
            continue;
        }

        info!("packaging {zipped_name}");
        zip.start_file(&zipped_name, FileOptions::default())?;
        let data = std::fs::read(path).map_err(|e| ModError::io(e, path))?;
        zip.write_all(&data).map_err(|e| ModError::io(e, path))?;
        bundled += 1;
    }

    zip.finish()?;
    info!(
        "wrote {} ({bundled} files)",
        opts.output_zip.display()
    );
    Ok(bundled)
}

/// First path segment after alias rewriting; `None` when there is none.
fn classify_prefix(
    zipped_name: &str,
    aliases: &std::collections::HashMap<String, String>,
) -> Option<String> {
    let effective = aliases
        .get(zipped_name)
        .map(String::as_str)
        .unwrap_or(zipped_name);
    effective.split(['/', '@']).next().map(str::to_string)
}
