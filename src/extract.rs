//! Resource extraction: walk the prioritized archive set and dump every
//! selected asset to an editable file tree.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::archive::{
    entry_data_stream, read_archive, EntryDataCode, EntryScratch, LoadMode,
};
use crate::codec::{self, CodecHandle};
use crate::config::{self, EntNode};
use crate::error::{ModError, Result};
use crate::hash::resource_hash_str;
use crate::mapspec::PackageMapSpec;
use crate::mask::{read_mask_archive, ContainerMask, EmitDecision, EmitTracker};
use crate::restype::{parse_type_set, ResourceType, TypeSet};

/// Paths beyond this many characters tend to break other tooling; warn.
const SAFE_PATH_LIMIT: usize = 250;

/// Settings read from the extractor config file.
#[derive(Debug)]
pub struct ExtractConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub run_extractor: bool,
    pub run_deserializer: bool,
    pub run_audio_extractor: bool,
    pub resource_types: TypeSet,
    pub audio_types: Vec<String>,
    pub max_threads: usize,
    /// Guard against over-long output trees; a soft limit on the output
    /// directory path length.
    pub output_length_limit: usize,
    pub deserializer: DeserializerConfig,
}

/// Flags forwarded to the external reflection deserializer.
#[derive(Debug, Default)]
pub struct DeserializerConfig {
    pub entity_defs: bool,
    pub logic_decls: bool,
    pub level_files: bool,
    pub remove_binaries: bool,
    pub indent: bool,
    pub include_originals: bool,
}

impl ExtractConfig {
    /// Parse and validate the config file.
    pub fn load(path: &Path) -> Result<Self> {
        let root = config::parse_file(path)?;
        let core = root.child("core");

        let input_dir = core
            .child("input_folder")
            .value_path()
            .ok_or_else(|| missing(path, "core/input_folder"))?;
        let output_dir = core
            .child("output_folder")
            .value_path()
            .ok_or_else(|| missing(path, "core/output_folder"))?;
        if !input_dir.is_dir() {
            return Err(ModError::Other(format!(
                "'{}' is not a valid directory; set your input/output folders in {}",
                input_dir.display(),
                path.display()
            )));
        }
        if !output_dir.is_dir() {
            return Err(ModError::Other(format!(
                "'{}' is not a valid directory; set your input/output folders in {}",
                output_dir.display(),
                path.display()
            )));
        }

        let deserial = root.child("deserializer");
        let cfg = ExtractConfig {
            input_dir,
            output_dir,
            run_extractor: core
                .child("run_extractor")
                .value_bool_or("core/run_extractor", true),
            run_deserializer: core
                .child("run_deserializer")
                .value_bool_or("core/run_deserializer", true),
            run_audio_extractor: core
                .child("run_audio_extractor")
                .value_bool_or("core/run_audio_extractor", false),
            resource_types: parse_type_set(
                root.child("extractor")
                    .child("resource_types")
                    .children
                    .iter()
                    .map(|c| c.name.as_str()),
            ),
            audio_types: root
                .child("audio_extractor")
                .child("audio_types")
                .children
                .iter()
                .map(|c| c.name.clone())
                .collect(),
            max_threads: root
                .child("audio_extractor")
                .child("max_threads")
                .value_int_or("audio_extractor/max_threads", 4) as usize,
            output_length_limit: core
                .child("output_length_limit")
                .value_int_or("core/output_length_limit", 16) as usize,
            deserializer: read_deserializer_flags(deserial),
        };

        let out_len = cfg.output_dir.as_os_str().len();
        if out_len >= cfg.output_length_limit {
            warn!(
                "output directory is {out_len} characters (limit {}); long asset names may fail to export",
                cfg.output_length_limit
            );
        }
        info!("found {} resource types", cfg.resource_types.len());
        Ok(cfg)
    }
}

fn read_deserializer_flags(deserial: &EntNode) -> DeserializerConfig {
    DeserializerConfig {
        entity_defs: deserial
            .child("deserialize_entity_defs")
            .value_bool_or("deserializer/deserialize_entity_defs", true),
        logic_decls: deserial
            .child("deserialize_logic_decls")
            .value_bool_or("deserializer/deserialize_logic_decls", true),
        level_files: deserial
            .child("deserialize_level_files")
            .value_bool_or("deserializer/deserialize_level_files", true),
        remove_binaries: deserial
            .child("remove_binary_files")
            .value_bool_or("deserializer/remove_binary_files", true),
        indent: deserial
            .child("add_indentation")
            .value_bool_or("deserializer/add_indentation", true),
        include_originals: deserial
            .child("include_originals")
            .value_bool_or("deserializer/include_originals", false),
    }
}

fn missing(path: &Path, key: &str) -> ModError {
    ModError::Config {
        path: path.to_path_buf(),
        detail: format!("missing required key {key}"),
    }
}

/// Numeric aliasing for assets whose names cannot be used as file names.
#[derive(Default)]
struct DescriptorAliases {
    lines: String,
    total: u32,
}

impl DescriptorAliases {
    fn next_alias(&mut self, original_name: &str) -> String {
        let alias = format!("logicObjectDescriptor_{}.bin", self.total);
        self.total += 1;
        self.lines
            .push_str(&format!("\"{alias}\" = \"logicObjectDescriptor/{original_name}\"\n"));
        alias
    }
}

/// Run the full resource-extraction pass.
pub fn run_extraction(cfg: &ExtractConfig, codec_handle: &CodecHandle) -> Result<()> {
    codec::init(codec_handle)?;

    let base_dir = cfg.input_dir.join("base");
    let spec = PackageMapSpec::from_file(&base_dir.join("packagemapspec.json"))?;
    let packages = spec.prioritized_archives();
    if packages.is_empty() {
        return Err(ModError::Other(format!(
            "no archives listed by '{}'; is this the right game folder?",
            base_dir.join("packagemapspec.json").display()
        )));
    }
    info!("found game folder, dumping data to {}", cfg.output_dir.display());

    let mask_path = base_dir.join("meta.resources");
    let mask = if mask_path.is_file() {
        read_mask_archive(&mask_path, codec_handle)?
    } else {
        warn!("no container mask at '{}'; treating all entries as enabled", mask_path.display());
        ContainerMask::default()
    };

    let out_root = cfg.output_dir.clone();
    std::fs::create_dir_all(&out_root).map_err(|e| ModError::io(e, &out_root))?;
    migrate_legacy_decls(&out_root)?;

    let mut tracker = EmitTracker::new();
    let mut scratch = EntryScratch::default();
    let mut aliases = DescriptorAliases::default();

    for package in &packages {
        let archive_path = base_dir.join(package);
        if let Err(e) = extract_archive(
            cfg,
            &archive_path,
            &mask,
            &mut tracker,
            &mut scratch,
            &mut aliases,
            codec_handle,
        ) {
            // Per-archive failures skip the archive, not the run.
            error!("skipping '{}': {e}", archive_path.display());
        }
    }

    if aliases.total > 0 {
        let alias_path = out_root.join("logicObjectDescriptor/aliases.txt");
        std::fs::write(&alias_path, &aliases.lines).map_err(|e| ModError::io(e, &alias_path))?;
    }

    info!("extraction complete: {} files extracted in total", tracker.len());
    Ok(())
}

/// Older output trees kept decls under the type directory; move them to the
/// synthetic top-level tree before extracting into it.
fn migrate_legacy_decls(out_root: &Path) -> Result<()> {
    let legacy = out_root.join("rs_streamfile/generated/decls");
    if !legacy.is_dir() {
        return Ok(());
    }
    let target = out_root.join("decls");
    if target.exists() {
        return Err(ModError::Other(format!(
            "cannot migrate legacy '{}': '{}' already exists; merge or remove one of them",
            legacy.display(),
            target.display()
        )));
    }
    info!("migrating legacy decls tree to {}", target.display());
    std::fs::rename(&legacy, &target).map_err(|e| ModError::io(e, &legacy))
}

#[allow(clippy::too_many_arguments)]
fn extract_archive(
    cfg: &ExtractConfig,
    archive_path: &Path,
    mask: &ContainerMask,
    tracker: &mut EmitTracker,
    scratch: &mut EntryScratch,
    aliases: &mut DescriptorAliases,
    codec_handle: &CodecHandle,
) -> Result<()> {
    info!("extracting from {:?}", archive_path.file_name().unwrap_or_default());
    let archive = read_archive(archive_path, LoadMode::SkipData)?;
    let mut stream = File::open(archive_path).map_err(|e| ModError::io(e, archive_path))?;

    let basename = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let fingerprint = resource_hash_str(basename);
    if let Some(entry) = mask.find(fingerprint) {
        if (entry.bits.len() as u64) * 64 < archive.header.num_resources as u64 {
            return Err(ModError::Corrupt {
                path: archive_path.to_path_buf(),
                detail: format!(
                    "container-mask bitmap covers {} entries, archive has {}",
                    entry.bits.len() * 64,
                    archive.header.num_resources
                ),
            });
        }
    }

    let mut file_count = 0usize;
    for (index, entry) in archive.entries.iter().enumerate() {
        let (type_string, name_string) = archive.entry_strings(entry)?;
        let Some(ty) = ResourceType::from_type_string(type_string) else {
            continue;
        };
        if !cfg.resource_types.contains(&ty) {
            continue;
        }

        let key = format!("{type_string}/{name_string}");
        let enabled = mask.is_enabled(fingerprint, index as u32);
        match tracker.observe(&key, enabled) {
            EmitDecision::Skip => continue,
            EmitDecision::Emit | EmitDecision::Reemit => {}
        }

        let output_path = output_path_for(cfg, ty, name_string, aliases);
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ModError::io(e, parent))?;
        }
        if output_path.as_os_str().len() > SAFE_PATH_LIMIT {
            warn!(
                "filepath '{}' exceeds the safe limit; unexpected behavior may occur",
                output_path.display()
            );
        }

        let (code, bytes) = entry_data_stream(entry, &mut stream, scratch, codec_handle)
            .map_err(|e| ModError::io(e, archive_path))?;
        match code {
            EntryDataCode::Ok => {}
            EntryDataCode::UnknownCompression => {
                // Raw bytes still get dumped; someone may decode them later.
                error!(
                    "unknown compression mode {} on '{}', writing raw bytes",
                    entry.comp_mode,
                    output_path.display()
                );
            }
            other => {
                error!("failure {other:?} on '{}', skipping entry", output_path.display());
                continue;
            }
        }

        std::fs::write(&output_path, bytes).map_err(|e| ModError::io(e, &output_path))?;
        file_count += 1;
    }

    info!("extracted {file_count} files from archive");
    Ok(())
}

/// Map an asset to its on-disk output path, applying the per-type rewrites.
fn output_path_for(
    cfg: &ExtractConfig,
    ty: ResourceType,
    name_string: &str,
    aliases: &mut DescriptorAliases,
) -> PathBuf {
    let mut path = match ty {
        // Streamed decls get their own top-level tree.
        ResourceType::RsStreamfile => match name_string.strip_prefix("generated/decls/") {
            Some(rest) => cfg.output_dir.join("decls").join(rest),
            None => cfg.output_dir.join(ty.type_string()).join(name_string),
        },
        // Level names contain slashes that would collide with folder names.
        ResourceType::MapEntities => cfg
            .output_dir
            .join(ty.type_string())
            .join(name_string.replace('/', "@")),
        // Descriptor names use characters that are illegal in file names.
        ResourceType::LogicObjectDescriptor => cfg
            .output_dir
            .join(ty.type_string())
            .join(aliases.next_alias(name_string)),
        _ => cfg.output_dir.join(ty.type_string()).join(name_string),
    };
    if path.extension().is_none() {
        path.set_extension("bin");
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(out: &Path) -> ExtractConfig {
        ExtractConfig {
            input_dir: out.to_path_buf(),
            output_dir: out.to_path_buf(),
            run_extractor: true,
            run_deserializer: false,
            run_audio_extractor: false,
            resource_types: TypeSet::new(),
            audio_types: Vec::new(),
            max_threads: 1,
            output_length_limit: 16,
            deserializer: DeserializerConfig::default(),
        }
    }

    #[test]
    fn decls_get_their_own_tree() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let mut aliases = DescriptorAliases::default();

        let path = output_path_for(
            &cfg,
            ResourceType::RsStreamfile,
            "generated/decls/weapon/pistol.decl",
            &mut aliases,
        );
        assert_eq!(path, dir.path().join("decls/weapon/pistol.decl"));

        let path = output_path_for(&cfg, ResourceType::RsStreamfile, "other/file.txt", &mut aliases);
        assert_eq!(path, dir.path().join("rs_streamfile/other/file.txt"));
    }

    #[test]
    fn mapentities_names_flatten_slashes() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let mut aliases = DescriptorAliases::default();
        let path = output_path_for(&cfg, ResourceType::MapEntities, "maps/hell/m1", &mut aliases);
        assert_eq!(path, dir.path().join("mapentities/maps@hell@m1.bin"));
    }

    #[test]
    fn descriptor_names_are_aliased() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let mut aliases = DescriptorAliases::default();

        let first = output_path_for(
            &cfg,
            ResourceType::LogicObjectDescriptor,
            "desc:with*bad|chars",
            &mut aliases,
        );
        let second = output_path_for(
            &cfg,
            ResourceType::LogicObjectDescriptor,
            "another:one",
            &mut aliases,
        );
        assert_eq!(
            first,
            dir.path().join("logicObjectDescriptor/logicObjectDescriptor_0.bin")
        );
        assert_eq!(
            second,
            dir.path().join("logicObjectDescriptor/logicObjectDescriptor_1.bin")
        );
        assert_eq!(aliases.total, 2);
        assert!(aliases.lines.contains(
            "\"logicObjectDescriptor_0.bin\" = \"logicObjectDescriptor/desc:with*bad|chars\""
        ));
    }

    #[test]
    fn missing_extensions_become_bin() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let mut aliases = DescriptorAliases::default();
        let path = output_path_for(&cfg, ResourceType::EntityDef, "some/entity", &mut aliases);
        assert_eq!(path, dir.path().join("entityDef/some/entity.bin"));
    }

    #[test]
    fn legacy_decls_migration() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join("rs_streamfile/generated/decls");
        std::fs::create_dir_all(&legacy).unwrap();
        std::fs::write(legacy.join("a.decl"), b"a").unwrap();

        migrate_legacy_decls(dir.path()).unwrap();
        assert!(dir.path().join("decls/a.decl").is_file());
        assert!(!legacy.exists());

        // With both trees present the migration must refuse.
        std::fs::create_dir_all(&legacy).unwrap();
        assert!(migrate_legacy_decls(dir.path()).is_err());
    }

    #[test]
    fn config_file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::create_dir_all(&output).unwrap();

        let config_path = dir.path().join("extractor_config.txt");
        std::fs::write(
            &config_path,
            format!(
                r#"core {{
                    input_folder = "{}"
                    output_folder = "{}"
                    run_extractor = true
                    run_deserializer = false
                }}
                extractor {{ resource_types {{ rs_streamfile image }} }}
                audio_extractor {{ max_threads = 2 }}
                "#,
                input.display(),
                output.display()
            ),
        )
        .unwrap();

        let cfg = ExtractConfig::load(&config_path).unwrap();
        assert_eq!(cfg.input_dir, input);
        assert!(cfg.run_extractor);
        assert!(!cfg.run_deserializer);
        assert!(!cfg.run_audio_extractor);
        assert_eq!(cfg.resource_types.len(), 2);
        assert_eq!(cfg.max_threads, 2);
        assert_eq!(cfg.output_length_limit, 16);
    }

    #[test]
    fn config_requires_valid_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("extractor_config.txt");
        std::fs::write(
            &config_path,
            r#"core {
                input_folder = "/definitely/not/a/real/location"
                output_folder = "/also/not/real"
            }"#,
        )
        .unwrap();
        assert!(ExtractConfig::load(&config_path).is_err());
    }
}
