//! Error types for variant algebra, migrations and matrix expansion

use std::path::PathBuf;
use thiserror::Error;

#[cfg(feature = "miette")]
use miette::Diagnostic;

/// Errors raised while adding a migration to a variant.
///
/// All of them are deterministic problems with the migration content. They
/// abort the matrix generation of the whole recipe.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "miette", derive(Diagnostic))]
pub enum VariantAlgebraError {
    /// The migration targets a key that does not exist in the base variant
    #[error("migration targets key '{0}' which is not part of the base variant")]
    MigrationTargetMissing(String),

    /// An ordered merge is missing the explicit ordering it needs
    #[error("no ordering for value '{value}' of key '{key}'")]
    #[cfg_attr(
        feature = "miette",
        diagnostic(help("add the value to `__migrator.ordering.{key}`"))
    )]
    MissingOrdering { key: String, value: String },

    /// A zipped key cannot be kept aligned with the primary key
    #[error("migration does not provide a value for zipped key '{key}' (zipped with '{primary_key}')")]
    MissingZipValue { key: String, primary_key: String },

    /// Unknown operation, or an operation that is not defined for the input
    #[error("unsupported migration: {0}")]
    UnsupportedMigration(String),
}

/// Errors that can occur while parsing variant and migration files
#[derive(Debug, Error)]
#[cfg_attr(feature = "miette", derive(Diagnostic))]
pub enum VariantParseError {
    /// Failed to parse the YAML document
    #[error("Could not parse variant file {}: {source}", path.display())]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Failed to parse a YAML document that does not come from a file
    #[error("Could not parse variant: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Failed to read file from disk
    #[error("Could not open file ({}): {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),

    /// A selector could not be evaluated
    #[error("Could not evaluate selector `{selector}`: {source}")]
    Selector {
        selector: String,
        #[source]
        source: minijinja::Error,
    },
}

/// Errors that can occur while discovering and applying migrations
#[derive(Debug, Error)]
#[cfg_attr(feature = "miette", derive(Diagnostic))]
pub enum MigrationError {
    /// Failed to list or delete migration files
    #[error("Could not access migration file or directory ({}): {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),

    /// A migration file could not be parsed
    #[error(transparent)]
    #[cfg_attr(feature = "miette", diagnostic(transparent))]
    Parse(#[from] VariantParseError),

    /// `migrator_ts` is not a number
    #[error("Invalid migrator_ts '{timestamp}' in {}", path.display())]
    InvalidTimestamp { path: PathBuf, timestamp: String },

    /// Adding the migration to the combined spec failed
    #[error("Could not apply migration {}", path.display())]
    Apply {
        path: PathBuf,
        #[source]
        #[cfg_attr(feature = "miette", diagnostic_source)]
        source: VariantAlgebraError,
    },
}

/// Errors that can occur while expanding a reduced variant into configs
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "miette", derive(Diagnostic))]
pub enum DecomposeError {
    /// Zip key elements have mismatched lengths
    #[error("Zip key elements do not all have same length: {0}")]
    InvalidZipKeyLength(String),
}
