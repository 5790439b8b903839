//! Discovery, selection and folding of migration files.
//!
//! A feedstock carries copies of the migrations it is part of in
//! `.ci_support/migrations`. The global pinning ships the migrations that
//! are still running. A local copy is replaced by the pinning's copy of the
//! same migration, and removed once the pinning no longer carries it.

use std::path::{Path, PathBuf};

use crate::{
    algebra::variant_add,
    error::MigrationError,
    migration::{MigrationHeader, load_migration_file, load_variant_file},
    selectors::SelectorConfig,
    variant::Variant,
};

/// Where a migration file was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum MigrationOrigin {
    /// The feedstock's own migrations directory
    Local,
    /// The migrations directory of the global pinning
    Upstream,
}

/// A migration file selected for folding, not parsed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationSource {
    /// The migration file
    pub path: PathBuf,
    /// Where the file was found
    pub origin: MigrationOrigin,
    /// `migrator_ts`, `None` when the file does not set one
    pub timestamp: Option<f64>,
    /// `__migrator.migration_number`
    pub migration_number: u64,
    /// `__migrator.use_local`
    pub use_local: bool,
}

impl MigrationSource {
    /// Read the header of a migration file.
    pub fn from_path(path: PathBuf, origin: MigrationOrigin) -> Result<Self, MigrationError> {
        let header = MigrationHeader::from_path(&path)?;
        let timestamp = header
            .timestamp
            .as_deref()
            .map(|ts| {
                ts.trim()
                    .parse::<f64>()
                    .map_err(|_| MigrationError::InvalidTimestamp {
                        path: path.clone(),
                        timestamp: ts.to_string(),
                    })
            })
            .transpose()?;
        Ok(Self {
            path,
            origin,
            timestamp,
            migration_number: header.migration_number,
            use_local: header.use_local,
        })
    }

    /// The timestamp migrations are folded by. Unset timestamps come first.
    pub fn sort_timestamp(&self) -> f64 {
        self.timestamp.unwrap_or(-1.0)
    }
}

/// The outcome of [`load_migrations`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationSelection {
    /// The migrations to fold, in fold order
    pub sources: Vec<MigrationSource>,
    /// Local migration files the pinning no longer carries
    pub expired: Vec<PathBuf>,
}

impl MigrationSelection {
    /// Delete the expired local migration files.
    pub fn remove_expired(&self) -> Result<(), MigrationError> {
        for path in &self.expired {
            tracing::info!("Removing expired migration {}", path.display());
            fs_err::remove_file(path).map_err(|e| MigrationError::IoError(path.clone(), e))?;
        }
        Ok(())
    }
}

/// The migrations directory that ships with a pinning file.
pub fn upstream_migrations_dir(exclusive_config_file: &Path) -> PathBuf {
    exclusive_config_file
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join("share")
        .join("conda-forge")
        .join("migrations")
}

/// The `*.yaml` files directly inside `dir`, sorted.
fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>, MigrationError> {
    let mut files = Vec::new();
    for entry in fs_err::read_dir(dir).map_err(|e| MigrationError::IoError(dir.to_path_buf(), e))? {
        let path = entry
            .map_err(|e| MigrationError::IoError(dir.to_path_buf(), e))?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "yaml") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn scan(dir: &Path, origin: MigrationOrigin) -> Result<Vec<MigrationSource>, MigrationError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    yaml_files(dir)?
        .into_iter()
        .map(|path| MigrationSource::from_path(path, origin))
        .collect()
}

/// Select the migrations that apply to a feedstock.
///
/// Without an upstream directory every local migration applies. Otherwise a
/// local migration with a timestamp is replaced by the upstream file with the
/// same timestamp and migration number, kept when the upstream file has a
/// different migration number, and marked as expired when no upstream file
/// has its timestamp. Local migrations without a timestamp or with
/// `use_local` are always kept.
///
/// Nothing is deleted, see [`MigrationSelection::remove_expired`]. The
/// sources are sorted by timestamp, then path.
pub fn load_migrations(
    local_dir: &Path,
    upstream_dir: Option<&Path>,
) -> Result<MigrationSelection, MigrationError> {
    let local = scan(local_dir, MigrationOrigin::Local)?;

    let mut selection = match upstream_dir.filter(|dir| dir.is_dir()) {
        None => MigrationSelection {
            sources: local,
            expired: Vec::new(),
        },
        Some(upstream_dir) => {
            let upstream = scan(upstream_dir, MigrationOrigin::Upstream)?;
            select(local, &upstream)
        }
    };

    selection.sources.sort_by(|a, b| {
        a.sort_timestamp()
            .total_cmp(&b.sort_timestamp())
            .then_with(|| a.path.cmp(&b.path))
    });
    Ok(selection)
}

fn select(local: Vec<MigrationSource>, upstream: &[MigrationSource]) -> MigrationSelection {
    let mut selection = MigrationSelection::default();
    for source in local {
        let Some(timestamp) = source.timestamp.filter(|_| !source.use_local) else {
            tracing::debug!("Using local migration {}", source.path.display());
            selection.sources.push(source);
            continue;
        };

        let mut same_timestamp = upstream
            .iter()
            .filter(|candidate| candidate.timestamp == Some(timestamp))
            .peekable();
        if same_timestamp.peek().is_none() {
            tracing::info!(
                "Migration {} is no longer part of the pinning",
                source.path.display()
            );
            selection.expired.push(source.path);
            continue;
        }

        match same_timestamp.find(|candidate| candidate.migration_number == source.migration_number)
        {
            Some(candidate) => {
                tracing::debug!(
                    "Using {} instead of {}",
                    candidate.path.display(),
                    source.path.display()
                );
                selection.sources.push(candidate.clone());
            }
            None => {
                tracing::debug!(
                    "Keeping local migration {}, the pinning has a different migration number",
                    source.path.display()
                );
                selection.sources.push(source);
            }
        }
    }
    selection
}

/// Fold migrations into a base variant.
///
/// Migrations are parsed with `selector_config` and added in the order of
/// their timestamp, then path.
pub fn fold_migrations(
    base: &Variant,
    sources: &[MigrationSource],
    selector_config: &SelectorConfig,
) -> Result<Variant, MigrationError> {
    let mut migrations = sources
        .iter()
        .map(|source| {
            let migration = load_migration_file(&source.path, selector_config)?;
            Ok((source.path.as_path(), migration))
        })
        .collect::<Result<Vec<_>, MigrationError>>()?;
    migrations.sort_by(|(path_a, a), (path_b, b)| {
        a.sort_timestamp()
            .total_cmp(&b.sort_timestamp())
            .then_with(|| path_a.cmp(path_b))
    });

    let mut combined = base.clone();
    for (path, migration) in &migrations {
        tracing::info!("Applying migration {}", path.display());
        combined = variant_add(&combined, migration).map_err(|source| MigrationError::Apply {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(combined)
}

/// Load the pinning file and fold the migrations into it.
pub fn combine_spec(
    pinning_file: &Path,
    sources: &[MigrationSource],
    selector_config: &SelectorConfig,
) -> Result<Variant, MigrationError> {
    let base = load_variant_file(pinning_file, selector_config)?;
    fold_migrations(&base, sources, selector_config)
}
