//! End-to-end injection over a synthetic game folder: backups, the
//! synthesized archive, the spec and mask edits, idempotence, and reset.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use modforge::archive::{read_archive, ArchiveBuilder, LoadMode, MODDED_TIMESTAMP};
use modforge::codec::default_codec;
use modforge::hash::resource_hash_str;
use modforge::inject::{run_injection, InjectOptions, OUT_ARCHIVE_RELATIVE};
use modforge::mapspec::{is_modded_spec, PackageMapSpec};
use modforge::mask::{is_modded_meta, read_mask_archive, ContainerMask, MaskEntry};
use modforge::restype::ResourceType;
use zip::write::FileOptions;

struct GameDir {
    root: PathBuf,
}

impl GameDir {
    /// A minimal vanilla installation: spec, mask archive, build manifest.
    fn vanilla(root: &Path) -> Self {
        let base = root.join("base");
        std::fs::create_dir_all(&base).unwrap();

        let spec = PackageMapSpec {
            files: vec!["gameresources.resources".into()],
            maps: vec!["common".into()],
            map_files_map: BTreeMap::from([("common".into(), vec![0])]),
        };
        spec.save_to(&base.join("packagemapspec.json")).unwrap();

        let mask = ContainerMask {
            compact_timestamp: None,
            entries: vec![MaskEntry {
                fingerprint: resource_hash_str("gameresources.resources"),
                bits: vec![u64::MAX; 2],
            }],
        };
        let mut meta = ArchiveBuilder::with_default_version();
        meta.add_file(ResourceType::RsStreamfile, "containermask", &mask.serialize())
            .unwrap();
        meta.write_to(&base.join("meta.resources")).unwrap();

        std::fs::write(base.join("build-manifest.bin"), vec![0x5Au8; 512]).unwrap();

        Self {
            root: root.to_path_buf(),
        }
    }

    fn base(&self, rel: &str) -> PathBuf {
        self.root.join("base").join(rel)
    }

    fn add_mod_zip(&self, name: &str, entries: &[(&str, &[u8])]) {
        let mods = self.root.join("mods");
        std::fs::create_dir_all(&mods).unwrap();
        let file = std::fs::File::create(mods.join(name)).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (path, data) in entries {
            zip.start_file(*path, FileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn inject(&self, reset_vanilla: bool) {
        let opts = InjectOptions {
            game_dir: self.root.clone(),
            reset_vanilla,
            no_launch: true,
            never_patch: true,
            no_exit_timer: true,
            ..Default::default()
        };
        run_injection(&opts, &default_codec()).unwrap();
    }
}

#[test]
fn injection_from_vanilla() {
    let dir = tempfile::tempdir().unwrap();
    let game = GameDir::vanilla(dir.path());
    let vanilla_spec = std::fs::read(game.base("packagemapspec.json")).unwrap();
    let vanilla_meta = std::fs::read(game.base("meta.resources")).unwrap();

    game.add_mod_zip("my_mod.zip", &[("rs_streamfile/bar", b"bar contents")]);
    game.inject(false);

    // Backups hold the pre-injection bytes.
    assert_eq!(
        std::fs::read(game.base("packagemapspec.json.backup")).unwrap(),
        vanilla_spec
    );
    assert_eq!(
        std::fs::read(game.base("meta.resources.backup")).unwrap(),
        vanilla_meta
    );

    // The synthesized archive holds the one mod file.
    let out_path = game.base("modarchives/common_mod.resources");
    let archive = read_archive(&out_path, LoadMode::ReadEverything).unwrap();
    assert_eq!(archive.header.num_resources, 1);
    let (ty, name) = archive.entry_strings(&archive.entries[0]).unwrap();
    assert_eq!(ty, "rs_streamfile");
    assert_eq!(name, "bar");

    // The spec lists it at highest priority and reads as modded.
    let spec = PackageMapSpec::from_file(&game.base("packagemapspec.json")).unwrap();
    assert_eq!(spec.prioritized_archives()[0], OUT_ARCHIVE_RELATIVE);
    assert!(is_modded_spec(&game.base("packagemapspec.json")).unwrap());

    // The mask gained one all-ones entry and reads as modded.
    assert!(is_modded_meta(&game.base("meta.resources")).unwrap());
    let mask = read_mask_archive(&game.base("meta.resources"), &default_codec()).unwrap();
    assert_eq!(mask.entries.len(), 2);
    let added = mask
        .find(resource_hash_str("common_mod.resources"))
        .unwrap();
    assert!(added.bits.iter().all(|w| *w == u64::MAX));
    assert!(mask.is_enabled(resource_hash_str("common_mod.resources"), 0));

    let meta = read_archive(&game.base("meta.resources"), LoadMode::StopAfterEntries).unwrap();
    assert_eq!(meta.entries[0].generation_timestamp, MODDED_TIMESTAMP);

    // The loader cache landed next to the game.
    assert_eq!(
        std::fs::metadata(game.root.join("modloader_cache.bin"))
            .unwrap()
            .len(),
        16
    );
}

#[test]
fn repeated_injection_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let game = GameDir::vanilla(dir.path());
    game.add_mod_zip("my_mod.zip", &[("rs_streamfile/bar", b"bar contents")]);

    game.inject(false);
    let spec_once = std::fs::read(game.base("packagemapspec.json")).unwrap();
    let meta_once = std::fs::read(game.base("meta.resources")).unwrap();
    let archive_once = std::fs::read(game.base("modarchives/common_mod.resources")).unwrap();

    game.inject(false);
    assert_eq!(std::fs::read(game.base("packagemapspec.json")).unwrap(), spec_once);
    assert_eq!(std::fs::read(game.base("meta.resources")).unwrap(), meta_once);
    assert_eq!(
        std::fs::read(game.base("modarchives/common_mod.resources")).unwrap(),
        archive_once
    );
}

#[test]
fn reset_restores_vanilla() {
    let dir = tempfile::tempdir().unwrap();
    let game = GameDir::vanilla(dir.path());
    let vanilla_spec = std::fs::read(game.base("packagemapspec.json")).unwrap();
    let vanilla_meta = std::fs::read(game.base("meta.resources")).unwrap();

    game.add_mod_zip("my_mod.zip", &[("rs_streamfile/bar", b"bar contents")]);
    game.inject(false);
    assert!(is_modded_spec(&game.base("packagemapspec.json")).unwrap());

    game.inject(true);
    assert_eq!(std::fs::read(game.base("packagemapspec.json")).unwrap(), vanilla_spec);
    assert_eq!(std::fs::read(game.base("meta.resources")).unwrap(), vanilla_meta);
    assert!(!game.base("modarchives/common_mod.resources").exists());
    assert!(!is_modded_spec(&game.base("packagemapspec.json")).unwrap());
    assert!(!is_modded_meta(&game.base("meta.resources")).unwrap());
}

#[test]
fn reset_then_reinject_matches_single_injection() {
    let dir = tempfile::tempdir().unwrap();
    let game = GameDir::vanilla(dir.path());
    game.add_mod_zip("my_mod.zip", &[("rs_streamfile/bar", b"bar contents")]);

    game.inject(false);
    let spec_once = std::fs::read(game.base("packagemapspec.json")).unwrap();
    let meta_once = std::fs::read(game.base("meta.resources")).unwrap();

    game.inject(true);
    game.inject(false);
    assert_eq!(std::fs::read(game.base("packagemapspec.json")).unwrap(), spec_once);
    assert_eq!(std::fs::read(game.base("meta.resources")).unwrap(), meta_once);
}

#[test]
fn mod_with_no_known_types_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let game = GameDir::vanilla(dir.path());
    let vanilla_spec = std::fs::read(game.base("packagemapspec.json")).unwrap();
    let vanilla_meta = std::fs::read(game.base("meta.resources")).unwrap();

    game.add_mod_zip(
        "useless.zip",
        &[("readme.txt", b"hello" as &[u8]), ("bogus/file.bin", b"x")],
    );
    game.inject(false);

    assert!(!game.base("modarchives/common_mod.resources").exists());
    assert_eq!(std::fs::read(game.base("packagemapspec.json")).unwrap(), vanilla_spec);
    assert_eq!(std::fs::read(game.base("meta.resources")).unwrap(), vanilla_meta);
}

#[test]
fn conflicting_mods_resolve_by_priority() {
    let dir = tempfile::tempdir().unwrap();
    let game = GameDir::vanilla(dir.path());

    game.add_mod_zip(
        "a_low_priority.zip",
        &[
            ("darkagesmod.txt", b"loadPriority = 10" as &[u8]),
            ("rs_streamfile/shared", b"from a"),
        ],
    );
    game.add_mod_zip(
        "b_high_priority.zip",
        &[
            ("darkagesmod.txt", b"loadPriority = 1" as &[u8]),
            ("rs_streamfile/shared", b"from b"),
            ("rs_streamfile/extra", b"extra"),
        ],
    );
    game.inject(false);

    let out = game.base("modarchives/common_mod.resources");
    let archive = read_archive(&out, LoadMode::ReadEverything).unwrap();
    assert_eq!(archive.header.num_resources, 2);

    let data = archive.data.as_ref().unwrap();
    let by_name = |wanted: &str| -> Vec<u8> {
        for e in &archive.entries {
            let (_, name) = archive.entry_strings(e).unwrap();
            if name == wanted {
                let start = (e.data_offset - archive.header.data_offset) as usize;
                return data[start..start + e.data_size as usize].to_vec();
            }
        }
        panic!("entry '{wanted}' not found");
    };
    assert_eq!(by_name("shared"), b"from b");
    assert_eq!(by_name("extra"), b"extra");
}

#[test]
fn loose_files_lose_to_zipped_mods() {
    let dir = tempfile::tempdir().unwrap();
    let game = GameDir::vanilla(dir.path());

    let loose = game.root.join("mods/rs_streamfile");
    std::fs::create_dir_all(&loose).unwrap();
    std::fs::write(loose.join("shared"), b"from loose").unwrap();
    game.add_mod_zip("packaged.zip", &[("rs_streamfile/shared", b"from zip")]);

    game.inject(false);

    let out = game.base("modarchives/common_mod.resources");
    let archive = read_archive(&out, LoadMode::ReadEverything).unwrap();
    assert_eq!(archive.header.num_resources, 1);
    let data = archive.data.as_ref().unwrap();
    let e = &archive.entries[0];
    let start = (e.data_offset - archive.header.data_offset) as usize;
    assert_eq!(&data[start..start + e.data_size as usize], b"from zip");
}

#[test]
fn game_update_refreshes_backups() {
    let dir = tempfile::tempdir().unwrap();
    let game = GameDir::vanilla(dir.path());
    game.add_mod_zip("my_mod.zip", &[("rs_streamfile/bar", b"bar")]);
    game.inject(false);

    // Simulate a game patch: new manifest, new vanilla spec and meta.
    game.inject(true); // back to vanilla first
    std::fs::write(game.base("build-manifest.bin"), vec![0xA5u8; 512]).unwrap();
    let spec_path = game.base("packagemapspec.json");
    let mut spec = PackageMapSpec::from_file(&spec_path).unwrap();
    spec.files.push("gameresources_patch1.resources".into());
    spec.map_files_map.get_mut("common").unwrap().push(1);
    spec.save_to(&spec_path).unwrap();
    let updated_spec = std::fs::read(&spec_path).unwrap();

    game.inject(false);

    // The updated vanilla became the new backup.
    assert_eq!(
        std::fs::read(game.base("packagemapspec.json.backup")).unwrap(),
        updated_spec
    );
    // And the new injection builds on top of it.
    let spec = PackageMapSpec::from_file(&spec_path).unwrap();
    assert!(spec.files.iter().any(|f| f == "gameresources_patch1.resources"));
    assert_eq!(spec.prioritized_archives()[0], OUT_ARCHIVE_RELATIVE);
}
