//! Mod injection: fold every user mod into one synthesized archive and
//! register it with the game's archive set.
//!
//! The flow is restore-first: backups of the two files injection touches
//! (`packagemapspec.json`, `meta.resources`) are created or restored before
//! anything else, so a failed run always leaves a recoverable vanilla
//! state and `--reset-vanilla` is just "stop after the restore".

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{error, info, warn};

use crate::archive::ArchiveBuilder;
use crate::codec::{self, CodecHandle};
use crate::error::{ModError, Result};
use crate::hash::resource_hash;
use crate::mapspec::{is_modded_spec, PackageMapSpec};
use crate::mask::{is_modded_meta, register_archive_in_mask};
use crate::mods::{self, ModDef};

/// Name of the single archive every injection produces.
pub const OUT_ARCHIVE_NAME: &str = "common_mod.resources";
/// Spec-relative path of the synthesized archive.
pub const OUT_ARCHIVE_RELATIVE: &str = "modarchives/common_mod.resources";
/// Staging zip some packagers leave behind for the loose tree.
const LOOSE_TEMP_ZIP: &str = "TEMPORARY_unzipped_modfiles.zip";

const PATCHER_EXE: &str = "DarkAgesPatcher.exe";
const GAME_EXE: &str = "DOOMTheDarkAges.exe";
const CACHE_FILE: &str = "modloader_cache.bin";
const MANIFEST_PREFIX_LEN: usize = 256;

/// Flags controlling one injection run.
#[derive(Debug, Clone, Default)]
pub struct InjectOptions {
    pub game_dir: PathBuf,
    pub reset_vanilla: bool,
    pub verbose: bool,
    pub no_launch: bool,
    pub force_load: bool,
    pub never_patch: bool,
    pub no_exit_timer: bool,
}

/// Persisted record comparing runs: did the game update, did the patcher
/// work last time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderCache {
    pub manifest_hash: u64,
    pub patcher_succeeded: u64,
}

impl Default for LoaderCache {
    fn default() -> Self {
        Self {
            manifest_hash: u64::MAX,
            patcher_succeeded: 0,
        }
    }
}

impl LoaderCache {
    /// Read the cache record; anything but an exact-size file is treated as
    /// corruption and replaced by defaults.
    pub fn read_from(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) if bytes.len() == 16 => Self {
                manifest_hash: u64::from_le_bytes(bytes[..8].try_into().unwrap()),
                patcher_succeeded: u64::from_le_bytes(bytes[8..].try_into().unwrap()),
            },
            Ok(_) => {
                warn!("corrupted loader cache detected, falling back to defaults");
                Self::default()
            }
            Err(_) => Self::default(),
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&self.manifest_hash.to_le_bytes());
        bytes.extend_from_slice(&self.patcher_succeeded.to_le_bytes());
        std::fs::write(path, bytes).map_err(|e| ModError::io(e, path))
    }
}

/// Hash the head of the build manifest; a change means the game updated.
pub fn manifest_hash(manifest_path: &Path) -> Result<u64> {
    let bytes = std::fs::read(manifest_path).map_err(|e| ModError::io(e, manifest_path))?;
    let prefix = &bytes[..bytes.len().min(MANIFEST_PREFIX_LEN)];
    Ok(resource_hash(prefix))
}

/// Entry point for the injector.
pub fn run_injection(opts: &InjectOptions, codec_handle: &CodecHandle) -> Result<()> {
    if !opts.game_dir.is_dir() {
        return Err(ModError::Other(format!(
            "'{}' is not a valid directory",
            opts.game_dir.display()
        )));
    }
    let manifest_path = opts.game_dir.join("base/build-manifest.bin");
    if !manifest_path.is_file() {
        return Err(ModError::Other(format!(
            "could not find '{}'",
            manifest_path.display()
        )));
    }

    codec::init(codec_handle)?;

    let cache_path = opts.game_dir.join(CACHE_FILE);
    let cache = LoaderCache::read_from(&cache_path);
    let new_hash = manifest_hash(&manifest_path)?;
    let game_updated = new_hash != cache.manifest_hash;
    if game_updated {
        info!("game has been updated, or no loader cache was found; performing update operations");
    }

    // The executable patch has to hold before any archive edits are worth
    // making; a failed patcher aborts with every game file untouched.
    let patcher_succeeded = if opts.never_patch {
        cache.patcher_succeeded
    } else if game_updated || cache.patcher_succeeded == 0 {
        match run_patcher(&opts.game_dir) {
            Ok(()) => 1,
            Err(e) if opts.force_load => {
                warn!("{e}; proceeding anyway due to --forceload");
                0
            }
            Err(e) => {
                error!(
                    "{e}; loading mods with an unpatched executable can break the game, aborting. \
                     Re-run with --forceload to bypass at your own risk"
                );
                return Err(e);
            }
        }
    } else {
        cache.patcher_succeeded
    };

    let new_cache = LoaderCache {
        manifest_hash: new_hash,
        patcher_succeeded,
    };
    if new_cache != cache {
        new_cache.write_to(&cache_path)?;
    }

    load_mods(opts, game_updated, codec_handle)?;

    info!("mod loading complete");
    if opts.no_launch {
        info!("game will not launch due to --nolaunch");
    } else {
        launch_game(&opts.game_dir);
    }
    Ok(())
}

/// Backup protocol plus the end-to-end mod build.
fn load_mods(opts: &InjectOptions, game_updated: bool, codec_handle: &CodecHandle) -> Result<()> {
    let base_dir = opts.game_dir.join("base");
    let mods_dir = opts.game_dir.join("mods");
    let out_dir = base_dir.join("modarchives");
    let out_archive = out_dir.join(OUT_ARCHIVE_NAME);
    let spec_path = base_dir.join("packagemapspec.json");
    let meta_path = base_dir.join("meta.resources");

    manage_backup(&spec_path, game_updated, is_modded_spec(&spec_path)?)?;
    manage_backup(&meta_path, game_updated, is_modded_meta(&meta_path)?)?;

    // Clean residue from previous injections.
    std::fs::create_dir_all(&mods_dir).map_err(|e| ModError::io(e, &mods_dir))?;
    std::fs::create_dir_all(&out_dir).map_err(|e| ModError::io(e, &out_dir))?;
    for entry in std::fs::read_dir(&out_dir).map_err(|e| ModError::io(e, &out_dir))? {
        let path = entry.map_err(|e| ModError::io(e, &out_dir))?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "resources") {
            std::fs::remove_file(&path).map_err(|e| ModError::io(e, &path))?;
        }
    }
    let stale_zip = mods_dir.join(LOOSE_TEMP_ZIP);
    if stale_zip.exists() {
        std::fs::remove_file(&stale_zip).map_err(|e| ModError::io(e, &stale_zip))?;
    }

    if opts.reset_vanilla {
        info!("uninstalled all mods");
        return Ok(());
    }

    // Read every mod: the loose tree plus each zip bundle.
    let scan = mods::scan_mods_dir(&mods_dir)?;
    info!(
        "zipped mods found: {}, loose files found: {}",
        scan.zip_mods.len(),
        scan.loose_files.len()
    );

    let mut all_mods: Vec<ModDef> = Vec::with_capacity(scan.zip_mods.len() + 1);
    all_mods.push(mods::read_loose_mod(&mods_dir, &scan.loose_files)?);
    for zip_path in &scan.zip_mods {
        match mods::read_zip_mod(zip_path) {
            Ok(def) => all_mods.push(def),
            // A broken bundle skips that mod, not the run.
            Err(e) => error!("skipping mod '{}': {e}", zip_path.display()),
        }
    }

    info!("checking for conflicts");
    let winners = mods::resolve_conflicts(&all_mods);
    if winners.is_empty() {
        info!("no mods will be loaded; all previously loaded mods are removed");
        return Ok(());
    }

    // One archive holds the consolidated mod set.
    let mut builder = ArchiveBuilder::with_default_version();
    for file in &winners {
        builder.add_file(file.asset_type, &file.asset_path, &file.data)?;
    }
    builder.write_to(&out_archive)?;
    info!(
        "built '{}' with {} entries",
        out_archive.display(),
        builder.file_count()
    );

    let mut spec = PackageMapSpec::from_file(&spec_path)?;
    spec.inject_archive(OUT_ARCHIVE_RELATIVE);
    spec.save_to(&spec_path)?;

    register_archive_in_mask(&meta_path, &out_archive, codec_handle)?;
    Ok(())
}

/// Create, refresh, or restore one tracked file's `.backup`.
///
/// First run: copy the original aside. Game updated and the file is still
/// vanilla: the update is the new vanilla, refresh the backup. Anything
/// else: restore the original from the backup, undoing the last injection.
fn manage_backup(original: &Path, game_updated: bool, is_modded: bool) -> Result<()> {
    if !original.exists() {
        return Err(ModError::Other(format!(
            "could not find '{}'",
            original.display()
        )));
    }
    let backup = original.with_extension(format!(
        "{}.backup",
        original.extension().unwrap_or_default().to_string_lossy()
    ));

    if !backup.exists() {
        std::fs::copy(original, &backup).map_err(|e| ModError::io(e, &backup))?;
        info!("created backup {}", backup.display());
    } else if game_updated && !is_modded {
        std::fs::copy(original, &backup).map_err(|e| ModError::io(e, &backup))?;
        info!("game updated; refreshed backup {}", backup.display());
    } else {
        std::fs::copy(&backup, original).map_err(|e| ModError::io(e, original))?;
        info!("restored {} from backup", original.display());
    }
    Ok(())
}

/// Run the external executable patcher and interpret its structured exit
/// status: a 16-bit code plus per-byte success/failure patch counts.
fn run_patcher(game_dir: &Path) -> Result<()> {
    let patcher_path = game_dir.join(PATCHER_EXE);
    let exe_path = game_dir.join(GAME_EXE);
    if !patcher_path.is_file() {
        return Err(ModError::Other(format!(
            "could not find '{}'",
            patcher_path.display()
        )));
    }

    info!("running {PATCHER_EXE}");
    // Update pass first; its outcome doesn't gate anything.
    let _ = Command::new(&patcher_path).arg("--update").status();

    let status = Command::new(&patcher_path)
        .arg("--patch")
        .arg(&exe_path)
        .status()
        .map_err(|e| ModError::Other(format!("running {PATCHER_EXE}: {e}")))?;

    let raw = status.code().unwrap_or(-1) as u32;
    let code = (raw & 0xFFFF) as u16;
    let successful = ((raw >> 16) & 0xFF) as u8;
    let failed = ((raw >> 24) & 0xFF) as u8;
    info!("patcher return codes: {code} {successful} {failed}");

    let success = match code {
        // Executable already fully patched.
        6 => true,
        // Patches applied; partial failures still count as failure.
        0 => failed == 0,
        _ => false,
    };
    if success {
        Ok(())
    } else {
        Err(ModError::PatcherFailed { code, failed })
    }
}

fn launch_game(game_dir: &Path) {
    if game_dir.join("steam_api64.dll").is_file() {
        info!("launching game through Steam");
        #[cfg(windows)]
        {
            let _ = Command::new("cmd")
                .args(["/C", "start", "", "steam://run/3017860//"])
                .spawn();
        }
        #[cfg(not(windows))]
        {
            let _ = Command::new("xdg-open").arg("steam://run/3017860//").spawn();
        }
    } else {
        info!("could not determine how to launch the game automatically; please launch it manually");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_roundtrip_and_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILE);

        // Missing file: defaults.
        let cache = LoaderCache::read_from(&path);
        assert_eq!(cache, LoaderCache::default());
        assert_eq!(cache.manifest_hash, u64::MAX);
        assert_eq!(cache.patcher_succeeded, 0);

        let written = LoaderCache {
            manifest_hash: 0x1122_3344_5566_7788,
            patcher_succeeded: 1,
        };
        written.write_to(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16);
        assert_eq!(LoaderCache::read_from(&path), written);

        // Wrong size: corruption, defaults again.
        std::fs::write(&path, [0u8; 15]).unwrap();
        assert_eq!(LoaderCache::read_from(&path), LoaderCache::default());
    }

    #[test]
    fn manifest_hash_uses_prefix_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build-manifest.bin");

        let mut long = vec![0xABu8; 1000];
        std::fs::write(&path, &long).unwrap();
        let h1 = manifest_hash(&path).unwrap();

        // Changing bytes past the prefix doesn't change the hash.
        long[999] = 0;
        std::fs::write(&path, &long).unwrap();
        assert_eq!(manifest_hash(&path).unwrap(), h1);

        // Changing bytes inside the prefix does.
        long[0] = 0;
        std::fs::write(&path, &long).unwrap();
        assert_ne!(manifest_hash(&path).unwrap(), h1);
    }

    #[test]
    fn backup_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("packagemapspec.json");
        let backup = dir.path().join("packagemapspec.json.backup");
        std::fs::write(&original, b"vanilla").unwrap();

        // First run creates the backup.
        manage_backup(&original, false, false).unwrap();
        assert_eq!(std::fs::read(&backup).unwrap(), b"vanilla");

        // Modded original, no update: restore from backup.
        std::fs::write(&original, b"modded").unwrap();
        manage_backup(&original, false, true).unwrap();
        assert_eq!(std::fs::read(&original).unwrap(), b"vanilla");

        // Game updated and file is vanilla again: new content becomes the
        // new backup.
        std::fs::write(&original, b"vanilla v2").unwrap();
        manage_backup(&original, true, false).unwrap();
        assert_eq!(std::fs::read(&backup).unwrap(), b"vanilla v2");

        // Game updated but file still modded: the update didn't replace it,
        // restore from backup.
        std::fs::write(&original, b"modded v2").unwrap();
        manage_backup(&original, true, true).unwrap();
        assert_eq!(std::fs::read(&original).unwrap(), b"vanilla v2");
    }

    #[test]
    fn missing_original_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = manage_backup(&dir.path().join("nope.json"), false, false);
        assert!(err.is_err());
    }
}
