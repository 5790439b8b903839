//! Writing the per-job configs into `.ci_support`.

use std::path::{Path, PathBuf};

use forge_matrix_variants::{ConfigEntry, NormalizedKey, TARGET_PLATFORM, Variant};
use miette::Diagnostic;
use rattler_conda_types::Platform;
use serde::Serialize;
use thiserror::Error;

/// The key holding the image a Linux job runs in.
pub const DOCKER_IMAGE: &str = "docker_image";

/// Errors while writing configs
#[derive(Debug, Error, Diagnostic)]
pub enum CiSupportError {
    /// Reading, writing or deleting a config failed
    #[error("Could not write config ({}): {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),

    /// A config could not be serialized
    #[error("Could not serialize config {name}: {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// One CI job of the matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixEntry {
    /// The full config name
    pub config_name: String,
    /// The config name shortened with a hash
    pub short_config_name: String,
    /// The platform the job builds for
    pub platform: String,
    /// The stem of the file the config is written to
    #[serde(skip)]
    pub file_stem: String,
    /// The resolved variant of the job
    pub config: Variant,
}

impl MatrixEntry {
    /// The platform is the config's `target_platform`, or `render_platform`
    /// when the config has none (all outputs are noarch).
    pub fn new(entry: ConfigEntry, render_platform: Platform) -> Self {
        let platform = entry
            .variant
            .get(&NormalizedKey::from(TARGET_PLATFORM))
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or_else(|| render_platform.to_string());
        Self {
            file_stem: entry.file_stem().to_string(),
            config_name: entry.name,
            short_config_name: entry.short_name,
            platform,
            config: entry.variant,
        }
    }

    /// The file name inside `.ci_support`.
    pub fn file_name(&self) -> String {
        format!("{}.yaml", self.file_stem)
    }
}

/// Make sure a config that builds on Linux names exactly one docker image:
/// its first `docker_image` value, or `fallback_image`.
pub fn finalize_config(config: &mut Variant, build_platform: Platform, fallback_image: &str) {
    if !build_platform.is_linux() {
        return;
    }
    let key = NormalizedKey::from(DOCKER_IMAGE);
    let image = config
        .get(&key)
        .and_then(|images| images.first())
        .cloned()
        .unwrap_or_else(|| fallback_image.to_string());
    config.insert(key, vec![image]);
}

/// Replace the configs in `ci_support_dir` with `entries`.
///
/// Every `*.yaml` file directly inside the directory that is not part of
/// `entries` is removed. Subdirectories (like `migrations`) are left alone.
/// Returns the paths that were written.
pub fn write_configs(
    ci_support_dir: &Path,
    entries: &[MatrixEntry],
) -> Result<Vec<PathBuf>, CiSupportError> {
    fs_err::create_dir_all(ci_support_dir)
        .map_err(|e| CiSupportError::IoError(ci_support_dir.to_path_buf(), e))?;

    let file_names = entries
        .iter()
        .map(MatrixEntry::file_name)
        .collect::<Vec<_>>();
    remove_stale_configs(ci_support_dir, &file_names)?;

    let mut written = Vec::with_capacity(entries.len());
    for (entry, file_name) in entries.iter().zip(file_names) {
        let path = ci_support_dir.join(file_name);
        let content =
            serde_yaml::to_string(&entry.config).map_err(|source| CiSupportError::Serialize {
                name: entry.config_name.clone(),
                source,
            })?;
        fs_err::write(&path, content).map_err(|e| CiSupportError::IoError(path.clone(), e))?;
        tracing::info!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

fn remove_stale_configs(ci_support_dir: &Path, keep: &[String]) -> Result<(), CiSupportError> {
    let read_dir = fs_err::read_dir(ci_support_dir)
        .map_err(|e| CiSupportError::IoError(ci_support_dir.to_path_buf(), e))?;
    for entry in read_dir {
        let path = entry
            .map_err(|e| CiSupportError::IoError(ci_support_dir.to_path_buf(), e))?
            .path();
        let is_config = path.is_file() && path.extension().is_some_and(|ext| ext == "yaml");
        let is_kept = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| keep.iter().any(|k| k == name));
        if is_config && !is_kept {
            tracing::info!("Removing stale config {}", path.display());
            fs_err::remove_file(&path).map_err(|e| CiSupportError::IoError(path.clone(), e))?;
        }
    }
    Ok(())
}
