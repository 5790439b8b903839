//! Migrations: a variant plus the `__migrator` directive that says how to add it.

use std::{collections::BTreeMap, path::Path};

use forge_matrix_types::NormalizedKey;
use serde::{Deserialize, Deserializer};

use crate::{
    error::VariantParseError,
    selectors::{SelectorConfig, quote_numeric_scalars, select_lines},
    variant::{MIGRATOR_KEY, MIGRATOR_TS_KEY, Scalar, ScalarList, Variant},
};

/// The structural operations a migration can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    /// Insert new values into the primary key
    KeyAdd,
    /// Remove values from the primary key
    KeyRemove,
}

/// The `__migrator` block of a migration file.
///
/// Only the fields that influence the variant algebra and migration
/// sequencing are read, everything else in the block is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MigrationDirective {
    /// `key_add`, `key_remove` or nothing for a plain addition. Kept as
    /// written so that unknown operations surface when the migration is
    /// applied.
    #[serde(default)]
    pub operation: Option<String>,

    /// The key `operation` acts on
    #[serde(default)]
    pub primary_key: Option<NormalizedKey>,

    /// Keys to zip with the primary key when adding values
    #[serde(default)]
    pub additional_zip_keys: Vec<NormalizedKey>,

    /// Explicit value orderings that replace version ordering for a key
    #[serde(default, deserialize_with = "deserialize_ordering")]
    pub ordering: BTreeMap<NormalizedKey, Vec<String>>,

    /// Bumped when the content of a migration with the same timestamp changes
    #[serde(
        default = "default_migration_number",
        deserialize_with = "deserialize_migration_number"
    )]
    pub migration_number: u64,

    /// Keep the feedstock copy even if the pinning carries the same migration
    #[serde(default)]
    pub use_local: bool,
}

impl Default for MigrationDirective {
    fn default() -> Self {
        Self {
            operation: None,
            primary_key: None,
            additional_zip_keys: Vec::new(),
            ordering: BTreeMap::new(),
            migration_number: default_migration_number(),
            use_local: false,
        }
    }
}

fn default_migration_number() -> u64 {
    1
}

fn deserialize_migration_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let Scalar(number) = Scalar::deserialize(deserializer)?;
    number
        .trim()
        .parse()
        .map_err(|_| serde::de::Error::custom(format!("invalid migration_number '{number}'")))
}

fn deserialize_ordering<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<NormalizedKey, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let ordering = Option::<BTreeMap<NormalizedKey, ScalarList>>::deserialize(deserializer)?;
    Ok(ordering
        .unwrap_or_default()
        .into_iter()
        .map(|(key, values)| (key, values.0))
        .collect())
}

/// The parts of a migration file that decide whether and when it applies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationHeader {
    /// `migrator_ts` as written, `None` when unset
    pub timestamp: Option<String>,
    /// `__migrator.migration_number`
    pub migration_number: u64,
    /// `__migrator.use_local`
    pub use_local: bool,
}

#[derive(Deserialize)]
struct RawHeader {
    #[serde(default, rename = "__migrator")]
    directive: Option<MigrationDirective>,
    #[serde(default, rename = "migrator_ts")]
    timestamp: Option<Scalar>,
}

impl RawHeader {
    fn from_value(value: serde_yaml::Value) -> Result<Self, serde_yaml::Error> {
        if value.is_null() {
            return Ok(RawHeader {
                directive: None,
                timestamp: None,
            });
        }
        serde_yaml::from_value(value)
    }
}

/// Whether `line` starts the top-level mapping entry `key`.
fn is_top_level_key(line: &str, key: &str) -> bool {
    line.strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(':'))
        .is_some_and(|rest| rest.is_empty() || rest.starts_with([' ', '\t']))
}

/// The top-level `__migrator` block and `migrator_ts` entry of a migration
/// document. The remaining keys may repeat under different selectors and
/// only form valid YAML once selectors are evaluated.
fn header_lines(yaml: &str) -> String {
    let mut header = Vec::new();
    let mut in_directive = false;
    for line in yaml.lines() {
        let starts_entry =
            !line.trim().is_empty() && !line.starts_with([' ', '\t', '-', '#']);
        if starts_entry {
            in_directive = is_top_level_key(line, MIGRATOR_KEY);
            if in_directive || is_top_level_key(line, MIGRATOR_TS_KEY) {
                header.push(line);
            }
        } else if in_directive {
            header.push(line);
        }
    }
    header.join("\n")
}

impl MigrationHeader {
    /// Read the header of a migration document. Selectors are not evaluated,
    /// the header is the same on every platform.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let header = quote_numeric_scalars(&header_lines(yaml));
        let raw = RawHeader::from_value(serde_yaml::from_str(&header)?)?;
        let directive = raw.directive.unwrap_or_default();
        Ok(Self {
            timestamp: raw.timestamp.map(|ts| ts.0),
            migration_number: directive.migration_number,
            use_local: directive.use_local,
        })
    }

    /// Read the header of a migration file.
    pub fn from_path(path: &Path) -> Result<Self, VariantParseError> {
        let content = fs_err::read_to_string(path)
            .map_err(|e| VariantParseError::IoError(path.to_path_buf(), e))?;
        Self::from_yaml_str(&content).map_err(|source| VariantParseError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A parsed migration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Migration {
    /// `migrator_ts`, `None` when the file does not set one
    pub timestamp: Option<f64>,
    /// The `__migrator` block
    pub directive: Option<MigrationDirective>,
    /// Everything else
    pub variant: Variant,
}

impl From<Variant> for Migration {
    fn from(variant: Variant) -> Self {
        Self {
            timestamp: None,
            directive: None,
            variant,
        }
    }
}

impl Migration {
    /// The timestamp used to order migrations. Unset timestamps sort first.
    pub fn sort_timestamp(&self) -> f64 {
        self.timestamp.unwrap_or(-1.0)
    }

    /// The explicit ordering for `key`, if the directive has one.
    pub fn ordering(&self, key: &NormalizedKey) -> Option<&[String]> {
        self.directive
            .as_ref()
            .and_then(|d| d.ordering.get(key))
            .map(Vec::as_slice)
    }

    /// Parse a migration from YAML without evaluating selectors.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let value: serde_yaml::Value = serde_yaml::from_str(&quote_numeric_scalars(yaml))?;
        let header = RawHeader::from_value(value.clone())?;
        let timestamp = header
            .timestamp
            .map(|Scalar(ts)| {
                ts.trim().parse::<f64>().map_err(|_| {
                    <serde_yaml::Error as serde::de::Error>::custom(format!(
                        "invalid {MIGRATOR_TS_KEY} '{ts}'"
                    ))
                })
            })
            .transpose()?;
        let variant = if value.is_null() {
            Variant::default()
        } else {
            serde_yaml::from_value(value)?
        };
        Ok(Self {
            timestamp,
            directive: header.directive,
            variant,
        })
    }
}

/// Parse a variant document after evaluating its line selectors.
pub fn parse_variant(
    content: &str,
    selector_config: &SelectorConfig,
) -> Result<Variant, VariantParseError> {
    let selected = select_lines(content, selector_config)?;
    Ok(Variant::from_yaml_str(&selected)?)
}

/// Parse a migration document after evaluating its line selectors.
///
/// The `__migrator` block is split off into [`Migration::directive`].
pub fn parse_migration(
    content: &str,
    selector_config: &SelectorConfig,
) -> Result<Migration, VariantParseError> {
    let selected = select_lines(content, selector_config)?;
    Ok(Migration::from_yaml_str(&selected)?)
}

fn read_file(path: &Path) -> Result<String, VariantParseError> {
    fs_err::read_to_string(path).map_err(|e| VariantParseError::IoError(path.to_path_buf(), e))
}

fn with_path(path: &Path) -> impl FnOnce(VariantParseError) -> VariantParseError + '_ {
    move |err| match err {
        VariantParseError::Yaml(source) => VariantParseError::ParseError {
            path: path.to_path_buf(),
            source,
        },
        err => err,
    }
}

/// Load a variant file (e.g. the global pinning) and evaluate its selectors.
pub fn load_variant_file(
    path: &Path,
    selector_config: &SelectorConfig,
) -> Result<Variant, VariantParseError> {
    tracing::debug!("Loading variant file {}", path.display());
    parse_variant(&read_file(path)?, selector_config).map_err(with_path(path))
}

/// Load a migration file and evaluate its selectors.
pub fn load_migration_file(
    path: &Path,
    selector_config: &SelectorConfig,
) -> Result<Migration, VariantParseError> {
    tracing::debug!("Loading migration {}", path.display());
    parse_migration(&read_file(path)?, selector_config).map_err(with_path(path))
}
