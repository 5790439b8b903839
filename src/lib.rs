//! Compute the CI build matrix of a conda-forge style feedstock.
//!
//! The pure variant algebra lives in [`forge_matrix_variants`]. This crate is
//! the layer around it: the feedstock configuration, the rendered outputs
//! reported by the recipe renderer and the `.ci_support` directory.

pub mod ci_support;
pub mod console_utils;
pub mod forge_config;
pub mod opt;
pub mod rendered_outputs;

use std::path::{Path, PathBuf};

use forge_matrix_variants::{
    DecomposeError, MigrationError, MigrationSelection, SelectorConfig, TARGET_PLATFORM, Variant,
    combine_spec, decompose, load_migrations, reduce_outputs, upstream_migrations_dir,
};
use itertools::Itertools;
use miette::Diagnostic;
use rattler_conda_types::Platform;
use thiserror::Error;

use crate::{
    ci_support::{CiSupportError, MatrixEntry, finalize_config, write_configs},
    forge_config::{ForgeConfig, ForgeConfigError},
    opt::{CombineOpts, ConfigureOpts, FeedstockOpts, MigrationsOpts},
    rendered_outputs::{PlatformOutputs, RenderedOutputsError},
};

/// Errors of a configure run
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigureError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    ForgeConfig(#[from] ForgeConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    RenderedOutputs(#[from] RenderedOutputsError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Decompose(#[from] DecomposeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    CiSupport(#[from] CiSupportError),

    #[error("No pinning file configured")]
    #[diagnostic(help(
        "pass `--exclusive-config-file` or set `exclusive_config_file` in conda-forge.yml"
    ))]
    NoPinningFile,
}

/// The feedstock a command works on.
#[derive(Debug, Clone)]
pub struct Feedstock {
    /// The feedstock directory
    pub dir: PathBuf,
    /// The feedstock configuration
    pub config: ForgeConfig,
    /// The global pinning file
    pub exclusive_config_file: PathBuf,
}

impl Feedstock {
    /// Load the feedstock configuration and find the pinning file.
    pub fn from_opts(opts: &FeedstockOpts) -> Result<Self, ConfigureError> {
        let forge_config_path = opts
            .forge_config
            .clone()
            .unwrap_or_else(|| opts.feedstock_dir.join("conda-forge.yml"));
        let config = ForgeConfig::from_path(&forge_config_path)?;
        let exclusive_config_file = opts
            .exclusive_config_file
            .clone()
            .or_else(|| config.exclusive_config_file_in(&opts.feedstock_dir))
            .ok_or(ConfigureError::NoPinningFile)?;
        Ok(Self {
            dir: opts.feedstock_dir.clone(),
            config,
            exclusive_config_file,
        })
    }

    /// `.ci_support`
    pub fn ci_support_dir(&self) -> PathBuf {
        self.dir.join(".ci_support")
    }

    /// The feedstock's copies of the migrations it is part of.
    pub fn migrations_dir(&self) -> PathBuf {
        self.ci_support_dir().join("migrations")
    }

    /// Select the migrations that apply. Nothing is deleted.
    pub fn select_migrations(&self) -> Result<MigrationSelection, ConfigureError> {
        let upstream = upstream_migrations_dir(&self.exclusive_config_file);
        Ok(load_migrations(&self.migrations_dir(), Some(&upstream))?)
    }

    /// The pinning combined with the selected migrations, for one platform.
    pub fn combined_spec(
        &self,
        selection: &MigrationSelection,
        target_platform: Platform,
    ) -> Result<Variant, ConfigureError> {
        let selector_config = SelectorConfig {
            build_platform: self.config.build_platform_for(target_platform)?,
            ..SelectorConfig::new(target_platform)
        };
        let mut combined = combine_spec(
            &self.exclusive_config_file,
            &selection.sources,
            &selector_config,
        )?;
        combined.insert(TARGET_PLATFORM, vec![target_platform.to_string()]);
        Ok(combined)
    }

    /// The CI jobs of one platform.
    pub fn matrix_for_platform(
        &self,
        selection: &MigrationSelection,
        rendered: &PlatformOutputs,
    ) -> Result<Vec<MatrixEntry>, ConfigureError> {
        let platform = rendered.platform;
        if rendered.outputs.is_empty() {
            tracing::info!("No outputs for {platform}, skipping");
            return Ok(Vec::new());
        }

        let combined = self.combined_spec(selection, platform)?;
        let (reduced, top_level) = reduce_outputs(&rendered.outputs, &combined);
        let build_platform = self.config.build_platform_for(platform)?;

        let entries = decompose(&reduced, &top_level, platform)?
            .into_iter()
            .map(|mut entry| {
                finalize_config(
                    &mut entry.variant,
                    build_platform,
                    &self.config.docker.fallback_image,
                );
                MatrixEntry::new(entry, platform)
            })
            .collect::<Vec<_>>();
        tracing::info!(
            "{platform}: {} configs, split on {}",
            entries.len(),
            if top_level.is_empty() {
                "nothing".to_string()
            } else {
                top_level.iter().join(", ")
            }
        );
        Ok(entries)
    }
}

/// The outcome of a configure run
#[derive(Debug, Clone, Default)]
pub struct ConfigureSummary {
    /// All CI jobs, sorted by config name
    pub entries: Vec<MatrixEntry>,
    /// The config files that were written
    pub written: Vec<PathBuf>,
    /// Local migrations the pinning no longer carries
    pub expired_migrations: Vec<PathBuf>,
}

/// Compute the matrix of a feedstock and, unless `dry_run`, write the configs
/// and remove expired migrations.
pub fn configure(
    feedstock: &Feedstock,
    rendered: &[PlatformOutputs],
    dry_run: bool,
) -> Result<ConfigureSummary, ConfigureError> {
    let selection = feedstock.select_migrations()?;

    let mut entries = Vec::new();
    for platform_outputs in rendered {
        entries.extend(feedstock.matrix_for_platform(&selection, platform_outputs)?);
    }
    entries.sort_by(|a, b| a.config_name.cmp(&b.config_name));

    if dry_run {
        for entry in &entries {
            tracing::info!("Would write {}", entry.file_name());
        }
        for path in &selection.expired {
            tracing::info!("Would remove expired migration {}", path.display());
        }
        return Ok(ConfigureSummary {
            entries,
            written: Vec::new(),
            expired_migrations: selection.expired,
        });
    }

    selection.remove_expired()?;
    let written = write_configs(&feedstock.ci_support_dir(), &entries)?;
    Ok(ConfigureSummary {
        entries,
        written,
        expired_migrations: selection.expired,
    })
}

/// Run the `configure` command.
pub fn configure_from_args(args: ConfigureOpts) -> Result<ConfigureSummary, ConfigureError> {
    let feedstock = Feedstock::from_opts(&args.feedstock)?;
    let rendered = rendered_outputs::load(&args.rendered_outputs)?;
    configure(&feedstock, &rendered, args.dry_run)
}

/// Run the `combine` command and return the combined spec as YAML.
pub fn combine_from_args(args: CombineOpts) -> Result<String, ConfigureError> {
    let feedstock = Feedstock::from_opts(&args.feedstock)?;
    let selection = feedstock.select_migrations()?;
    let combined = feedstock.combined_spec(&selection, args.target_platform)?;
    let yaml = combined
        .to_yaml_string()
        .map_err(|source| CiSupportError::Serialize {
            name: args.target_platform.to_string(),
            source,
        })?;
    Ok(yaml)
}

/// Run the `migrations` command and describe the selection, one line per
/// migration.
pub fn migrations_from_args(args: MigrationsOpts) -> Result<Vec<String>, ConfigureError> {
    let feedstock = Feedstock::from_opts(&args.feedstock)?;
    let selection = feedstock.select_migrations()?;
    Ok(describe_selection(&selection, &feedstock.dir))
}

fn describe_selection(selection: &MigrationSelection, base: &Path) -> Vec<String> {
    let display = |path: &Path| {
        path.strip_prefix(base)
            .unwrap_or(path)
            .display()
            .to_string()
    };
    selection
        .sources
        .iter()
        .map(|source| {
            let timestamp = source
                .timestamp
                .map(|ts| ts.to_string())
                .unwrap_or_else(|| "-".to_string());
            format!(
                "{:<8} {:>14} {}",
                source.origin.to_string(),
                timestamp,
                display(&source.path)
            )
        })
        .chain(
            selection
                .expired
                .iter()
                .map(|path| format!("{:<8} {:>14} {}", "expired", "", display(path))),
        )
        .collect()
}
