//! End-to-end extraction over a synthetic game folder.

use std::collections::BTreeMap;
use std::path::Path;

use modforge::archive::ArchiveBuilder;
use modforge::codec::default_codec;
use modforge::extract::{DeserializerConfig, ExtractConfig, run_extraction};
use modforge::hash::resource_hash_str;
use modforge::mapspec::PackageMapSpec;
use modforge::mask::{ContainerMask, MaskEntry};
use modforge::restype::{ResourceType, TypeSet};

/// Lay out `base/` with the given archives (first = highest priority) and
/// an optional container mask.
fn build_game_dir(root: &Path, archives: &[(&str, Vec<(&str, &[u8])>)], mask: Option<&ContainerMask>) {
    let base = root.join("base");
    std::fs::create_dir_all(&base).unwrap();

    for (name, files) in archives {
        let mut builder = ArchiveBuilder::with_default_version();
        for (asset, data) in files {
            builder
                .add_file(ResourceType::RsStreamfile, asset, data)
                .unwrap();
        }
        builder.write_to(&base.join(name)).unwrap();
    }

    // Highest priority must be discovered last, so register the archives in
    // reverse order.
    let indices: Vec<usize> = (0..archives.len()).rev().collect();
    let spec = PackageMapSpec {
        files: archives.iter().map(|(n, _)| n.to_string()).collect(),
        maps: vec!["common".into()],
        map_files_map: BTreeMap::from([("common".into(), indices)]),
    };
    spec.save_to(&base.join("packagemapspec.json")).unwrap();

    if let Some(mask) = mask {
        let mut meta = ArchiveBuilder::with_default_version();
        meta.add_file(ResourceType::RsStreamfile, "containermask", &mask.serialize())
            .unwrap();
        meta.write_to(&base.join("meta.resources")).unwrap();
    }
}

fn extract_config(game: &Path, out: &Path) -> ExtractConfig {
    let mut types = TypeSet::new();
    types.insert(ResourceType::RsStreamfile);
    ExtractConfig {
        input_dir: game.to_path_buf(),
        output_dir: out.to_path_buf(),
        run_extractor: true,
        run_deserializer: false,
        run_audio_extractor: false,
        resource_types: types,
        audio_types: Vec::new(),
        max_threads: 1,
        output_length_limit: 64,
        deserializer: DeserializerConfig::default(),
    }
}

fn read_out(out: &Path, rel: &str) -> Vec<u8> {
    std::fs::read(out.join(rel)).unwrap_or_else(|e| panic!("missing {rel}: {e}"))
}

#[test]
fn highest_priority_archive_wins() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();

    build_game_dir(
        dir.path(),
        &[
            ("patch.resources", vec![("shared.decl", b"patched" as &[u8])]),
            ("gameresources.resources", vec![
                ("shared.decl", b"original"),
                ("only_base.decl", b"base-only"),
            ]),
        ],
        None,
    );

    run_extraction(&extract_config(dir.path(), &out), &default_codec()).unwrap();

    assert_eq!(read_out(&out, "rs_streamfile/shared.decl"), b"patched");
    assert_eq!(read_out(&out, "rs_streamfile/only_base.decl"), b"base-only");
}

#[test]
fn mask_disabled_copy_is_overridden() {
    // Archive A outranks B but its copy is mask-disabled; the emitted file
    // must come from B.
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();

    let mask = ContainerMask {
        compact_timestamp: None,
        entries: vec![MaskEntry {
            fingerprint: resource_hash_str("a.resources"),
            bits: vec![0], // entry 0 disabled
        }],
    };
    build_game_dir(
        dir.path(),
        &[
            ("a.resources", vec![("foo.decl", b"from-a" as &[u8])]),
            ("b.resources", vec![("foo.decl", b"from-b")]),
        ],
        Some(&mask),
    );

    run_extraction(&extract_config(dir.path(), &out), &default_codec()).unwrap();
    assert_eq!(read_out(&out, "rs_streamfile/foo.decl"), b"from-b");
}

#[test]
fn enabled_high_priority_copy_survives() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();

    // Enabled everywhere: the high-priority copy must win even though the
    // low-priority archive is visited afterwards.
    let mask = ContainerMask {
        compact_timestamp: None,
        entries: vec![
            MaskEntry {
                fingerprint: resource_hash_str("a.resources"),
                bits: vec![u64::MAX],
            },
            MaskEntry {
                fingerprint: resource_hash_str("b.resources"),
                bits: vec![u64::MAX],
            },
        ],
    };
    build_game_dir(
        dir.path(),
        &[
            ("a.resources", vec![("foo.decl", b"from-a" as &[u8])]),
            ("b.resources", vec![("foo.decl", b"from-b")]),
        ],
        Some(&mask),
    );

    run_extraction(&extract_config(dir.path(), &out), &default_codec()).unwrap();
    assert_eq!(read_out(&out, "rs_streamfile/foo.decl"), b"from-a");
}

#[test]
fn generated_decls_are_rehomed() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();

    build_game_dir(
        dir.path(),
        &[(
            "gameresources.resources",
            vec![("generated/decls/weapon/rocket.decl", b"boom" as &[u8])],
        )],
        None,
    );

    run_extraction(&extract_config(dir.path(), &out), &default_codec()).unwrap();
    assert_eq!(read_out(&out, "decls/weapon/rocket.decl"), b"boom");
    assert!(!out.join("rs_streamfile/generated").exists());
}

#[test]
fn type_filter_limits_output() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();

    build_game_dir(
        dir.path(),
        &[("gameresources.resources", vec![("a.decl", b"a" as &[u8])])],
        None,
    );

    let mut cfg = extract_config(dir.path(), &out);
    cfg.resource_types = TypeSet::new(); // nothing selected
    run_extraction(&cfg, &default_codec()).unwrap();
    assert!(!out.join("rs_streamfile").exists());
}

#[test]
fn undersized_bitmap_skips_the_archive() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();

    // 70 entries but a one-word bitmap: the archive is treated as corrupt
    // and skipped; extraction itself still succeeds.
    let files: Vec<(String, Vec<u8>)> = (0..70)
        .map(|i| (format!("file_{i}.decl"), vec![i as u8]))
        .collect();
    let file_refs: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(n, d)| (n.as_str(), d.as_slice()))
        .collect();

    let mask = ContainerMask {
        compact_timestamp: None,
        entries: vec![MaskEntry {
            fingerprint: resource_hash_str("big.resources"),
            bits: vec![u64::MAX],
        }],
    };
    build_game_dir(dir.path(), &[("big.resources", file_refs)], Some(&mask));

    run_extraction(&extract_config(dir.path(), &out), &default_codec()).unwrap();
    assert!(!out.join("rs_streamfile/file_0.decl").exists());
}

#[test]
fn missing_spec_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::create_dir_all(dir.path().join("base")).unwrap();

    let err = run_extraction(&extract_config(dir.path(), &out), &default_codec());
    assert!(err.is_err());
}
