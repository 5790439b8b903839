use forge_matrix::{
    Feedstock, configure,
    forge_config::DEFAULT_DOCKER_IMAGE,
    opt::FeedstockOpts,
    rendered_outputs::{self, PlatformOutputs},
};
use forge_matrix_variants::Variant;
use std::path::{Path, PathBuf};

fn variants_test_data() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("crates/forge_matrix_variants/test-data")
}

/// A feedstock with the test migrations, a stale config and a
/// `conda-forge.yml` pointing at the test pinning.
fn setup_feedstock(dir: &Path) -> Feedstock {
    let migrations = dir.join(".ci_support/migrations");
    fs_err::create_dir_all(&migrations).unwrap();
    for entry in fs_err::read_dir(variants_test_data().join("feedstock/migrations")).unwrap() {
        let path = entry.unwrap().path();
        fs_err::copy(&path, migrations.join(path.file_name().unwrap())).unwrap();
    }
    fs_err::write(
        dir.join(".ci_support/linux_64_python3.8.____cpython.yaml"),
        "python:\n- 3.8.* *_cpython\n",
    )
    .unwrap();

    let pinning = variants_test_data().join("pinning/conda_build_config.yaml");
    fs_err::write(
        dir.join("conda-forge.yml"),
        format!(
            "exclusive_config_file: '{}'\nbot:\n  automerge: true\n",
            pinning.display()
        ),
    )
    .unwrap();

    Feedstock::from_opts(&FeedstockOpts {
        feedstock_dir: dir.to_path_buf(),
        forge_config: None,
        exclusive_config_file: None,
    })
    .unwrap()
}

fn rendered() -> Vec<PlatformOutputs> {
    let rows = [
        ("3.9.* *_cpython", "1.22"),
        ("3.10.* *_cpython", "1.22"),
        ("3.11.* *_cpython", "1.23"),
        ("3.12.* *_cpython", "1.26"),
    ];
    let outputs = rows
        .iter()
        .map(|(python, numpy)| {
            format!(
                "    - used_vars: [python, numpy, c_compiler, target_platform]\n      used_variant:\n        python: '{python}'\n        numpy: '{numpy}'\n        c_compiler: gcc\n        target_platform: linux-64\n"
            )
        })
        .collect::<String>();
    rendered_outputs::from_yaml_str(&format!(
        "- platform: linux-64\n  outputs:\n{outputs}- platform: osx-arm64\n  outputs: []\n"
    ))
    .unwrap()
}

#[test]
fn test_configure_dry_run_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let feedstock = setup_feedstock(dir.path());

    let summary = configure(&feedstock, &rendered(), true).unwrap();
    assert_eq!(summary.entries.len(), 4);
    assert!(summary.written.is_empty());
    assert_eq!(
        summary.expired_migrations,
        [feedstock.migrations_dir().join("old_migration.yaml")]
    );

    assert!(feedstock.migrations_dir().join("old_migration.yaml").exists());
    assert!(
        feedstock
            .ci_support_dir()
            .join("linux_64_python3.8.____cpython.yaml")
            .exists()
    );
}

#[test]
fn test_configure_writes_ci_support() {
    let dir = tempfile::tempdir().unwrap();
    let feedstock = setup_feedstock(dir.path());

    let summary = configure(&feedstock, &rendered(), false).unwrap();

    let names = summary
        .written
        .iter()
        .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    insta::assert_snapshot!(names, @r"
    linux_64_numpy1.22python3.10.____cpython.yaml
    linux_64_numpy1.22python3.9.____cpython.yaml
    linux_64_numpy1.23python3.11.____cpython.yaml
    linux_64_numpy1.26python3.12.____cpython.yaml
    ");

    // expired migrations and stale configs are gone
    assert!(!feedstock.migrations_dir().join("old_migration.yaml").exists());
    assert!(feedstock.migrations_dir().join("python312.yaml").exists());
    assert!(
        !feedstock
            .ci_support_dir()
            .join("linux_64_python3.8.____cpython.yaml")
            .exists()
    );

    for (entry, path) in summary.entries.iter().zip(&summary.written) {
        assert_eq!(entry.platform, "linux-64");
        let written = Variant::from_yaml_str(&fs_err::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written, entry.config);
        assert_eq!(
            written.get(&"docker_image".into()).unwrap(),
            &[DEFAULT_DOCKER_IMAGE]
        );
        assert_eq!(written.get(&"c_compiler".into()).unwrap(), &["gcc"]);
    }
}

#[test]
fn test_configure_is_deterministic() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();

    let a = configure(&setup_feedstock(first.path()), &rendered(), false).unwrap();
    let b = configure(&setup_feedstock(second.path()), &rendered(), false).unwrap();

    assert_eq!(a.entries, b.entries);
    for (path_a, path_b) in a.written.iter().zip(&b.written) {
        assert_eq!(
            fs_err::read_to_string(path_a).unwrap(),
            fs_err::read_to_string(path_b).unwrap()
        );
    }
}
