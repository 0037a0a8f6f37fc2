//! The game's top-level archive manifest (`packagemapspec.json`).
//!
//! The JSON names every archive on disk (`files`), every logical map
//! (`maps`), and which archives belong to each map (`mapFilesMap`).
//! Discovery order across maps defines global priority: the list is
//! accumulated map by map and then reversed, so the archives of
//! later-registered maps override earlier ones.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ModError, Result};

/// Map name registered for injected archives. Its presence in the raw file
/// doubles as the "spec is modded" heuristic.
pub const MOD_MAP_NAME: &str = "modarchives";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageMapSpec {
    pub files: Vec<String>,
    pub maps: Vec<String>,
    /// Map name → indices into `files`, in load order.
    #[serde(rename = "mapFilesMap")]
    pub map_files_map: BTreeMap<String, Vec<usize>>,
}

impl PackageMapSpec {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ModError::io(e, path))?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| ModError::io(e, path))
    }

    /// Archive paths ordered by priority, element 0 highest.
    ///
    /// Walks `maps` in declaration order appending each map's unseen file
    /// indices, then reverses: the first archive discovered loads first and
    /// is overridden by everything after it.
    pub fn prioritized_archives(&self) -> Vec<String> {
        let mut ordered: Vec<usize> = Vec::with_capacity(self.files.len());
        for map in &self.maps {
            let Some(indices) = self.map_files_map.get(map) else {
                continue;
            };
            for &idx in indices {
                if idx < self.files.len() && !ordered.contains(&idx) {
                    ordered.push(idx);
                }
            }
        }
        ordered
            .into_iter()
            .rev()
            .map(|i| self.files[i].clone())
            .collect()
    }

    /// Register a synthesized archive at the highest global priority.
    ///
    /// The archive path joins `files` if absent and a dedicated map is
    /// appended after every existing map, so the reversed discovery order
    /// resolves it first. Idempotent.
    pub fn inject_archive(&mut self, relative_path: &str) {
        let file_index = match self.files.iter().position(|f| f == relative_path) {
            Some(i) => i,
            None => {
                self.files.push(relative_path.to_string());
                self.files.len() - 1
            }
        };
        if !self.maps.iter().any(|m| m == MOD_MAP_NAME) {
            self.maps.push(MOD_MAP_NAME.to_string());
        }
        let indices = self.map_files_map.entry(MOD_MAP_NAME.to_string()).or_default();
        if !indices.contains(&file_index) {
            indices.push(file_index);
        }
        info!("package map spec now lists '{relative_path}' under '{MOD_MAP_NAME}'");
    }
}

/// Whether the spec file has already been edited by an injection. A plain
/// substring probe, so it works without parsing a possibly damaged file.
pub fn is_modded_spec(path: &Path) -> Result<bool> {
    let bytes = std::fs::read(path).map_err(|e| ModError::io(e, path))?;
    Ok(bytes
        .windows(MOD_MAP_NAME.len())
        .any(|w| w == MOD_MAP_NAME.as_bytes()))
}
