//! Mod definitions: scanning, reading, and conflict resolution.
//!
//! A mod is either a zip bundle at the top of the mods directory or the
//! synthetic mod formed by every loose file under it. Each mod file's zip
//! path starts with the resource-type prefix it targets
//! (`rs_streamfile/<asset path>`); an optional `darkagesmod.txt` manifest
//! supplies a load priority and aliasing rules.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config;
use crate::error::{ModError, Result};
use crate::restype::ResourceType;

/// Manifest file recognized inside zips and at the top of the mods folder.
pub const MOD_MANIFEST_NAME: &str = "darkagesmod.txt";

/// Priority assigned to the synthetic loose-file mod. Priorities compare
/// lower-wins, so the loose tree loses every conflict with a packaged mod.
pub const LOOSE_MOD_PRIORITY: i32 = i32::MAX;

/// Path prefix for files a packager bundled for humans, not the loader.
const NOLOAD_PREFIX: &str = "noload/";

/// One user mod and the asset files it supplies.
#[derive(Debug, Default)]
pub struct ModDef {
    pub name: String,
    pub load_priority: i32,
    pub is_unzipped: bool,
    pub files: Vec<ModFile>,
}

/// One asset supplied by a mod. The owning `ModDef` keeps the data alive
/// until the synthesized archive has been written.
#[derive(Debug)]
pub struct ModFile {
    pub asset_type: ResourceType,
    /// Path used as the resource name in the synthesized archive.
    pub asset_path: String,
    /// Verbatim source path, for conflict logs.
    pub real_path: String,
    pub data: Vec<u8>,
    pub default_hash: u64,
    pub resource_version: u32,
}

/// Paths discovered by a mods-directory scan.
#[derive(Debug, Default)]
pub struct ModScan {
    pub zip_mods: Vec<PathBuf>,
    pub loose_files: Vec<PathBuf>,
}

/// Find zip bundles at the top of the mods directory and loose files
/// anywhere under it.
pub fn scan_mods_dir(mods_dir: &Path) -> Result<ModScan> {
    let mut scan = ModScan::default();
    for entry in std::fs::read_dir(mods_dir).map_err(|e| ModError::io(e, mods_dir))? {
        let entry = entry.map_err(|e| ModError::io(e, mods_dir))?;
        let path = entry.path();
        if path.is_file() && has_extension(&path, "zip") {
            scan.zip_mods.push(path);
        }
    }
    scan.zip_mods.sort();

    for entry in walkdir::WalkDir::new(mods_dir) {
        let entry = entry.map_err(|e| ModError::Other(format!("scanning mods: {e}")))?;
        if entry.file_type().is_file() && !has_extension(entry.path(), "zip") {
            scan.loose_files.push(entry.path().to_path_buf());
        }
    }
    scan.loose_files.sort();
    Ok(scan)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Manifest contents: a priority plus source-path → asset-path rewrites.
#[derive(Debug, Default)]
struct ModManifest {
    load_priority: Option<i32>,
    aliases: HashMap<String, String>,
}

fn parse_manifest(text: &str, origin: &str) -> ModManifest {
    let root = match config::parse_str(text) {
        Ok(root) => root,
        Err(detail) => {
            warn!("ignoring malformed manifest in {origin}: {detail}");
            return ModManifest::default();
        }
    };
    let mut manifest = ModManifest {
        load_priority: root
            .child("loadPriority")
            .value_str()
            .and_then(|v| v.parse().ok()),
        aliases: HashMap::new(),
    };
    for alias in &root.child("aliasing").children {
        if alias.value.is_empty() {
            continue;
        }
        manifest
            .aliases
            .insert(normalize_separators(&alias.name), alias.value.clone());
    }
    if !manifest.aliases.is_empty() {
        info!("found {} alias definitions in {origin}", manifest.aliases.len());
    }
    manifest
}

fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Split `rs_streamfile/some/asset` into its type and asset path, honoring
/// manifest aliases. `None` means the file is not loadable and was logged.
fn classify(stored_path: &str, manifest: &ModManifest, mod_name: &str) -> Option<(ResourceType, String)> {
    let normalized = normalize_separators(stored_path);
    let effective = manifest
        .aliases
        .get(&normalized)
        .cloned()
        .unwrap_or(normalized);

    if effective.starts_with(NOLOAD_PREFIX) || effective == MOD_MANIFEST_NAME {
        return None;
    }

    let Some((prefix, rest)) = effective.split_once('/') else {
        warn!("'{stored_path}' in {mod_name} has no resource-type prefix, skipping");
        return None;
    };
    let Some(ty) = ResourceType::from_type_string(prefix) else {
        warn!("'{stored_path}' in {mod_name} has unknown type prefix '{prefix}', skipping");
        return None;
    };
    if !ty.allows_mod_files() {
        warn!("'{stored_path}' in {mod_name}: type '{prefix}' cannot be modded, skipping");
        return None;
    }
    if rest.is_empty() {
        warn!("'{stored_path}' in {mod_name} has an empty asset path, skipping");
        return None;
    }
    Some((ty, rest.to_string()))
}

/// Read one zip bundle into a `ModDef`.
pub fn read_zip_mod(zip_path: &Path) -> Result<ModDef> {
    let name = zip_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let file = std::fs::File::open(zip_path).map_err(|e| ModError::io(e, zip_path))?;
    let mut zip = zip::ZipArchive::new(file)?;

    // Manifest first, so aliases apply to every other entry.
    let mut manifest = ModManifest::default();
    if let Ok(mut entry) = zip.by_name(MOD_MANIFEST_NAME) {
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .map_err(|e| ModError::io(e, zip_path))?;
        manifest = parse_manifest(&text, &name);
    }

    let mut def = ModDef {
        load_priority: manifest.load_priority.unwrap_or(0),
        name,
        ..Default::default()
    };

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() || entry.name() == MOD_MANIFEST_NAME {
            continue;
        }
        let stored = entry.name().to_string();
        let Some((ty, asset_path)) = classify(&stored, &manifest, &def.name) else {
            continue;
        };
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| ModError::io(e, zip_path))?;
        def.files.push(ModFile {
            asset_type: ty,
            asset_path,
            real_path: format!("{}:{stored}", zip_path.display()),
            data,
            default_hash: 0,
            resource_version: 0,
        });
    }

    info!(
        "mod '{}': {} files, priority {}",
        def.name,
        def.files.len(),
        def.load_priority
    );
    Ok(def)
}

/// Fold every loose file under the mods directory into one synthetic mod.
/// A `darkagesmod.txt` at the top of the tree supplies aliases; its
/// priority field is ignored, the loose tree always ranks last.
pub fn read_loose_mod(mods_dir: &Path, loose_files: &[PathBuf]) -> Result<ModDef> {
    let mut manifest = ModManifest::default();
    let manifest_path = mods_dir.join(MOD_MANIFEST_NAME);
    if manifest_path.is_file() {
        let text =
            std::fs::read_to_string(&manifest_path).map_err(|e| ModError::io(e, &manifest_path))?;
        manifest = parse_manifest(&text, "the loose mods folder");
    }

    let mut def = ModDef {
        name: "loose mod files".to_string(),
        load_priority: LOOSE_MOD_PRIORITY,
        is_unzipped: true,
        files: Vec::new(),
    };

    for path in loose_files {
        if path == &manifest_path {
            continue;
        }
        let relative = path
            .strip_prefix(mods_dir)
            .map_err(|_| ModError::Other(format!("'{}' outside mods dir", path.display())))?;
        let stored = relative.to_string_lossy();
        let Some((ty, asset_path)) = classify(&stored, &manifest, &def.name) else {
            continue;
        };
        let data = std::fs::read(path).map_err(|e| ModError::io(e, path))?;
        def.files.push(ModFile {
            asset_type: ty,
            asset_path,
            real_path: path.display().to_string(),
            data,
            default_hash: 0,
            resource_version: 0,
        });
    }

    if !def.files.is_empty() {
        info!("loose mod: {} files", def.files.len());
    }
    Ok(def)
}

/// Resolve conflicts across all mods: for each asset path keep the file
/// from the mod with the lowest priority number; equal priorities go to the
/// later-encountered mod. Returns borrowed winners in deterministic
/// (asset-path) order.
pub fn resolve_conflicts(mods: &[ModDef]) -> Vec<&ModFile> {
    let mut winners: HashMap<&str, (&ModDef, &ModFile)> = HashMap::new();
    for current in mods {
        for file in &current.files {
            match winners.get_mut(file.asset_path.as_str()) {
                None => {
                    winners.insert(&file.asset_path, (current, file));
                }
                Some(existing) => {
                    let replace = current.load_priority <= existing.0.load_priority;
                    info!(
                        "CONFLICT on {}\n(A): {} - {}\n(B): {} - {}\nWinner: {}",
                        file.asset_path,
                        current.name,
                        file.real_path,
                        existing.0.name,
                        existing.1.real_path,
                        if replace { "(A)" } else { "(B)" }
                    );
                    if replace {
                        *existing = (current, file);
                    }
                }
            }
        }
    }
    let mut files: Vec<&ModFile> = winners.into_values().map(|(_, f)| f).collect();
    files.sort_by(|a, b| a.asset_path.cmp(&b.asset_path));
    files
}
