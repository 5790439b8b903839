//! Reading the variable usage reported by the recipe renderer.

use std::path::{Path, PathBuf};

use forge_matrix_variants::{OutputUsage, quote_numeric_scalars};
use miette::Diagnostic;
use rattler_conda_types::Platform;
use serde::Deserialize;
use thiserror::Error;

/// Errors while reading the rendered outputs file
#[derive(Debug, Error, Diagnostic)]
pub enum RenderedOutputsError {
    /// The file could not be read
    #[error("Could not read rendered outputs {}: {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),

    /// The file does not have the expected shape
    #[error("Could not parse rendered outputs {}: {source}", path.display())]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// The outputs of a recipe rendered for one platform.
///
/// ```yaml
/// - platform: linux-64
///   outputs:
///     - used_vars: [python, numpy]
///       used_variant:
///         python: 3.10.* *_cpython
///         numpy: "1.22"
///       noarch: false
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlatformOutputs {
    /// The platform the recipe was rendered for
    pub platform: Platform,
    /// One entry per rendered output. Empty when every output is skipped.
    #[serde(default)]
    pub outputs: Vec<OutputUsage>,
}

/// Parse the rendered outputs from a YAML string. Unquoted numbers in the
/// used variants are kept as written.
pub fn from_yaml_str(yaml: &str) -> Result<Vec<PlatformOutputs>, serde_yaml::Error> {
    let value: serde_yaml::Value = serde_yaml::from_str(&quote_numeric_scalars(yaml))?;
    if value.is_null() {
        return Ok(Vec::new());
    }
    serde_yaml::from_value(value)
}

/// Load the rendered outputs file.
pub fn load(path: &Path) -> Result<Vec<PlatformOutputs>, RenderedOutputsError> {
    let content = fs_err::read_to_string(path)
        .map_err(|e| RenderedOutputsError::IoError(path.to_path_buf(), e))?;
    let rendered = from_yaml_str(&content).map_err(|source| RenderedOutputsError::ParseError {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(
        "Loaded rendered outputs for {} platforms from {}",
        rendered.len(),
        path.display()
    );
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_matrix_variants::NormalizedKey;

    #[test]
    fn test_parse_rendered_outputs() {
        let rendered = from_yaml_str(
            r#"
- platform: linux-64
  outputs:
    - used_vars: [python, numpy, target_platform]
      used_variant:
        python: 3.10.* *_cpython
        numpy: "1.22"
        target_platform: linux-64
    - used_vars: [python]
      used_variant:
        python: 3.10.* *_cpython
      noarch: true
- platform: osx-arm64
"#,
        )
        .unwrap();

        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].platform, Platform::Linux64);
        assert_eq!(rendered[0].outputs.len(), 2);
        assert!(!rendered[0].outputs[0].is_noarch);
        assert!(rendered[0].outputs[1].is_noarch);
        assert!(rendered[0].outputs[0].used_vars.contains(&NormalizedKey::from("numpy")));
        assert_eq!(
            rendered[0].outputs[0]
                .used_variant
                .get(&"numpy".into())
                .unwrap(),
            &["1.22"]
        );
        assert_eq!(rendered[1].platform, Platform::OsxArm64);
        assert!(rendered[1].outputs.is_empty());
    }

    #[test]
    fn test_unquoted_versions_are_kept() {
        let rendered = from_yaml_str(
            "- platform: linux-64\n  outputs:\n    - used_vars: [numpy]\n      used_variant:\n        numpy: 1.10\n    - used_vars: [numpy]\n      used_variant:\n        numpy: 1.20\n",
        )
        .unwrap();
        let numpy = rendered[0]
            .outputs
            .iter()
            .map(|output| output.used_variant.get(&"numpy".into()).unwrap()[0].clone())
            .collect::<Vec<_>>();
        assert_eq!(numpy, ["1.10", "1.20"]);
    }

    #[test]
    fn test_empty_file() {
        assert!(from_yaml_str("").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_platform() {
        assert!(from_yaml_str("- platform: amiga-68k\n").is_err());
    }
}
