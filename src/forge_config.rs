//! The parts of `conda-forge.yml` that influence the build matrix.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    str::FromStr,
};

use miette::Diagnostic;
use rattler_conda_types::Platform;
use serde::Deserialize;
use thiserror::Error;

/// The image used for Linux builds when a config does not name one.
pub const DEFAULT_DOCKER_IMAGE: &str = "quay.io/condaforge/linux-anvil-x86_64:alma9";

/// Errors while reading `conda-forge.yml`
#[derive(Debug, Error, Diagnostic)]
pub enum ForgeConfigError {
    /// The file could not be read
    #[error("Could not read {}: {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),

    /// The file is not valid YAML or has the wrong shape
    #[error("Could not parse {}: {source}", path.display())]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A `build_platform` entry does not name a known platform
    #[error("Unknown platform '{0}' in build_platform")]
    #[diagnostic(help = "use a conda subdir such as `linux-64` or `osx_arm64`")]
    InvalidPlatform(String),
}

/// Docker settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Image for configs without a `docker_image` value
    pub fallback_image: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            fallback_image: DEFAULT_DOCKER_IMAGE.to_string(),
        }
    }
}

/// Feedstock configuration. Keys that are not needed for the matrix are
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// The global pinning file
    pub exclusive_config_file: Option<PathBuf>,

    /// Docker settings
    pub docker: DockerConfig,

    /// The platform each target platform is built on, e.g.
    /// `osx_arm64: osx_64` for cross compilation. Subdirs may be written
    /// with `_` instead of `-`.
    pub build_platform: BTreeMap<String, String>,
}

fn parse_platform(name: &str) -> Result<Platform, ForgeConfigError> {
    Platform::from_str(&name.replace('_', "-"))
        .map_err(|_| ForgeConfigError::InvalidPlatform(name.to_string()))
}

impl ForgeConfig {
    /// Parse the configuration from a YAML string. An empty document is the
    /// default configuration.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value)
    }

    /// Load `conda-forge.yml`. A missing file is the default configuration.
    pub fn from_path(path: &Path) -> Result<Self, ForgeConfigError> {
        if !path.exists() {
            tracing::debug!("{} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs_err::read_to_string(path)
            .map_err(|e| ForgeConfigError::IoError(path.to_path_buf(), e))?;
        let config = Self::from_yaml_str(&content).map_err(|source| {
            ForgeConfigError::ParseError {
                path: path.to_path_buf(),
                source,
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every `build_platform` entry names a known platform.
    pub fn validate(&self) -> Result<(), ForgeConfigError> {
        for (target, build) in &self.build_platform {
            parse_platform(target)?;
            parse_platform(build)?;
        }
        Ok(())
    }

    /// The platform that builds for `target_platform`.
    pub fn build_platform_for(&self, target_platform: Platform) -> Result<Platform, ForgeConfigError> {
        let target = target_platform.to_string();
        let build = self
            .build_platform
            .iter()
            .find(|(key, _)| key.replace('_', "-") == target)
            .map(|(_, build)| build);
        match build {
            Some(build) => parse_platform(build),
            None => Ok(target_platform),
        }
    }

    /// The pinning file, resolved against the feedstock directory.
    pub fn exclusive_config_file_in(&self, feedstock_dir: &Path) -> Option<PathBuf> {
        self.exclusive_config_file
            .as_ref()
            .map(|path| feedstock_dir.join(path))
    }
}
