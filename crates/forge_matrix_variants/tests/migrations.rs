use forge_matrix_variants::{
    MigrationError, MigrationOrigin, MigrationSource, SelectorConfig, VariantAlgebraError,
    combine_spec, load_migrations, upstream_migrations_dir,
};
use pretty_assertions::assert_eq;
use rattler_conda_types::Platform;
use std::path::{Path, PathBuf};

fn test_data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test-data")
}

fn pinning_file() -> PathBuf {
    test_data_dir().join("pinning/conda_build_config.yaml")
}

fn local_migrations() -> PathBuf {
    test_data_dir().join("feedstock/migrations")
}

fn file_names(sources: &[MigrationSource]) -> Vec<(String, MigrationOrigin)> {
    sources
        .iter()
        .map(|source| {
            (
                source.path.file_name().unwrap().to_string_lossy().to_string(),
                source.origin,
            )
        })
        .collect()
}

fn values(variant: &forge_matrix_variants::Variant, key: &str) -> Vec<String> {
    variant.get(&key.into()).cloned().unwrap_or_default()
}

#[test]
fn test_upstream_dir_of_test_data() {
    assert_eq!(
        upstream_migrations_dir(&pinning_file()),
        test_data_dir().join("pinning/share/conda-forge/migrations")
    );
}

#[test]
fn test_load_migrations_without_upstream() {
    let selection = load_migrations(&local_migrations(), None).unwrap();
    assert!(selection.expired.is_empty());
    assert_eq!(
        file_names(&selection.sources),
        [
            ("local_only.yaml".to_string(), MigrationOrigin::Local),
            ("old_migration.yaml".to_string(), MigrationOrigin::Local),
            ("pinned.yaml".to_string(), MigrationOrigin::Local),
            ("python312.yaml".to_string(), MigrationOrigin::Local),
            ("openssl4.yaml".to_string(), MigrationOrigin::Local),
        ]
    );
}

#[test]
fn test_load_migrations_with_upstream() {
    let upstream = upstream_migrations_dir(&pinning_file());
    let selection = load_migrations(&local_migrations(), Some(&upstream)).unwrap();

    // unset timestamp first, then by timestamp
    assert_eq!(
        file_names(&selection.sources),
        [
            ("local_only.yaml".to_string(), MigrationOrigin::Local),
            ("pinned.yaml".to_string(), MigrationOrigin::Local),
            ("python312.yaml".to_string(), MigrationOrigin::Upstream),
            ("openssl4.yaml".to_string(), MigrationOrigin::Local),
        ]
    );
    assert_eq!(selection.sources[2].path, upstream.join("python312.yaml"));
    assert_eq!(selection.sources[3].migration_number, 1);

    // upstream-only migrations are not picked up
    assert!(
        selection
            .sources
            .iter()
            .all(|source| !source.path.ends_with("libpng17.yaml"))
    );
    assert_eq!(
        selection.expired,
        [local_migrations().join("old_migration.yaml")]
    );

    // the expired file is not deleted by loading
    assert!(local_migrations().join("old_migration.yaml").exists());
}

#[test]
fn test_missing_upstream_dir_keeps_everything() {
    let selection = load_migrations(
        &local_migrations(),
        Some(Path::new("/this/path/does/not/exist")),
    )
    .unwrap();
    assert_eq!(selection.sources.len(), 5);
    assert!(selection.expired.is_empty());
}

#[test]
fn test_remove_expired() {
    let upstream = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    fs_err::write(
        upstream.path().join("current.yaml"),
        "migrator_ts: 2\nfoo: [2]\n",
    )
    .unwrap();
    fs_err::write(local.path().join("current.yaml"), "migrator_ts: 2\nfoo: [2]\n").unwrap();
    fs_err::write(local.path().join("gone.yaml"), "migrator_ts: 1\nfoo: [1]\n").unwrap();
    fs_err::write(local.path().join("notes.txt"), "not a migration").unwrap();

    let selection = load_migrations(local.path(), Some(upstream.path())).unwrap();
    assert_eq!(selection.expired, [local.path().join("gone.yaml")]);

    selection.remove_expired().unwrap();
    assert!(!local.path().join("gone.yaml").exists());
    assert!(local.path().join("current.yaml").exists());
    assert!(local.path().join("notes.txt").exists());
}

#[test]
fn test_combine_spec_linux() {
    let upstream = upstream_migrations_dir(&pinning_file());
    let selection = load_migrations(&local_migrations(), Some(&upstream)).unwrap();
    let combined = combine_spec(
        &pinning_file(),
        &selection.sources,
        &SelectorConfig::new(Platform::Linux64),
    )
    .unwrap();

    assert_eq!(values(&combined, "c_compiler"), ["gcc"]);
    assert_eq!(values(&combined, "c_compiler_version"), ["13"]);
    assert_eq!(
        values(&combined, "python"),
        [
            "3.9.* *_cpython",
            "3.10.* *_cpython",
            "3.11.* *_cpython",
            "3.12.* *_cpython"
        ]
    );
    assert_eq!(values(&combined, "numpy"), ["1.22", "1.22", "1.23", "1.26"]);
    assert_eq!(values(&combined, "python_impl").len(), 4);
    assert_eq!(values(&combined, "openssl"), ["4"]);
    assert_eq!(values(&combined, "libpng"), ["1.6"]);
    assert_eq!(values(&combined, "zlib"), ["1.3"]);
    assert!(!combined.contains_key(&"libffi".into()));

    assert_eq!(combined.zip_groups().len(), 1);
    assert!(
        combined
            .pin_run_as_build
            .as_ref()
            .unwrap()
            .contains_key("python")
    );
}

#[test]
fn test_combine_spec_evaluates_selectors_per_platform() {
    let upstream = upstream_migrations_dir(&pinning_file());
    let selection = load_migrations(&local_migrations(), Some(&upstream)).unwrap();
    let combined = combine_spec(
        &pinning_file(),
        &selection.sources,
        &SelectorConfig::new(Platform::OsxArm64),
    )
    .unwrap();

    assert_eq!(values(&combined, "c_compiler"), ["clang"]);
    // the linux-only bump in pinned.yaml does not apply
    assert_eq!(values(&combined, "c_compiler_version"), ["16"]);
    assert_eq!(values(&combined, "python").len(), 4);
}

#[test]
fn test_combine_spec_reports_failing_migration() {
    let dir = tempfile::tempdir().unwrap();
    let migration = dir.path().join("broken.yaml");
    fs_err::write(
        &migration,
        "__migrator:\n  operation: key_add\n  primary_key: python\npython:\n  - 3.13.* *_cpython\nmigrator_ts: 5\n",
    )
    .unwrap();

    let sources = [MigrationSource::from_path(migration.clone(), MigrationOrigin::Local).unwrap()];
    let err = combine_spec(
        &pinning_file(),
        &sources,
        &SelectorConfig::new(Platform::Linux64),
    )
    .unwrap_err();

    match err {
        MigrationError::Apply { path, source } => {
            assert_eq!(path, migration);
            assert!(matches!(source, VariantAlgebraError::MissingOrdering { .. }));
        }
        err => panic!("unexpected error: {err}"),
    }
}

#[test]
fn test_fold_order_follows_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let pinning = dir.path().join("conda_build_config.yaml");
    fs_err::write(&pinning, "python:\n  - 3.10\n  - 3.11\n").unwrap();

    // sorted by name the removal would run first
    fs_err::write(
        dir.path().join("a_remove.yaml"),
        "__migrator:\n  operation: key_remove\n  primary_key: python\npython:\n  - 3.12\nmigrator_ts: 20\n",
    )
    .unwrap();
    fs_err::write(
        dir.path().join("b_add.yaml"),
        "__migrator:\n  operation: key_add\n  primary_key: python\n  ordering:\n    python:\n      - 3.10\n      - 3.11\n      - 3.12\npython:\n  - 3.12\nmigrator_ts: 10\n",
    )
    .unwrap();

    let selection = load_migrations(dir.path(), None).unwrap();
    // the pinning file itself is picked up as an unset-timestamp addition
    let sources = selection
        .sources
        .into_iter()
        .filter(|source| source.path != pinning)
        .collect::<Vec<_>>();

    let combined = combine_spec(&pinning, &sources, &SelectorConfig::new(Platform::Linux64)).unwrap();
    assert_eq!(values(&combined, "python"), ["3.10", "3.11"]);
}

#[test]
fn test_keys_repeated_under_selectors() {
    let dir = tempfile::tempdir().unwrap();
    fs_err::write(
        dir.path().join("compilers.yaml"),
        "\
__migrator:
  migration_number: 1
c_compiler_version:   # [linux]
  - 14                # [linux]
c_compiler_version:   # [osx]
  - 18                # [osx]
migrator_ts: 1720000000
",
    )
    .unwrap();

    let selection = load_migrations(dir.path(), None).unwrap();
    assert_eq!(selection.sources.len(), 1);
    assert_eq!(selection.sources[0].timestamp, Some(1720000000.0));

    let linux = combine_spec(
        &pinning_file(),
        &selection.sources,
        &SelectorConfig::new(Platform::Linux64),
    )
    .unwrap();
    assert_eq!(values(&linux, "c_compiler_version"), ["14"]);

    let osx = combine_spec(
        &pinning_file(),
        &selection.sources,
        &SelectorConfig::new(Platform::OsxArm64),
    )
    .unwrap();
    assert_eq!(values(&osx, "c_compiler_version"), ["18"]);
}
