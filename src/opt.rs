//! Command-line options.

use std::path::PathBuf;

use clap::{Parser, crate_version};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use rattler_conda_types::Platform;

/// Application subcommands.
#[derive(Parser)]
pub enum SubCommands {
    /// Compute the build matrix of a feedstock and write `.ci_support`
    ///
    /// The global pinning is combined with the feedstock's migrations, reduced
    /// to the variables the recipe uses and split into one config file per CI
    /// job. Expired migrations are removed from `.ci_support/migrations`.
    Configure(ConfigureOpts),

    /// Print the pinning combined with all migrations for one platform
    Combine(CombineOpts),

    /// List the migrations that apply, in the order they are added
    Migrations(MigrationsOpts),
}

#[allow(missing_docs)]
#[derive(Parser)]
#[clap(version = crate_version!())]
pub struct App {
    /// Subcommand.
    #[clap(subcommand)]
    pub subcommand: SubCommands,

    /// Enable verbose logging.
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

/// Options shared by all subcommands that work on a feedstock
#[derive(Parser, Clone, Debug)]
pub struct FeedstockOpts {
    /// The feedstock directory
    #[arg(short, long, default_value = ".")]
    pub feedstock_dir: PathBuf,

    /// The feedstock configuration. Defaults to `<feedstock-dir>/conda-forge.yml`.
    #[arg(long)]
    pub forge_config: Option<PathBuf>,

    /// The global pinning file. Overrides `exclusive_config_file` of the
    /// feedstock configuration.
    #[arg(short = 'm', long, env = "FORGE_MATRIX_PINNING_FILE")]
    pub exclusive_config_file: Option<PathBuf>,
}

/// Options for the `configure` command
#[derive(Parser, Clone, Debug)]
pub struct ConfigureOpts {
    #[allow(missing_docs)]
    #[clap(flatten)]
    pub feedstock: FeedstockOpts,

    /// The variable usage of the rendered recipe outputs, per platform
    #[arg(short, long)]
    pub rendered_outputs: PathBuf,

    /// Compute the matrix without writing configs or removing migrations
    #[arg(long)]
    pub dry_run: bool,
}

/// Options for the `combine` command
#[derive(Parser, Clone, Debug)]
pub struct CombineOpts {
    #[allow(missing_docs)]
    #[clap(flatten)]
    pub feedstock: FeedstockOpts,

    /// The platform selectors are evaluated for
    #[arg(long, default_value_t = Platform::current())]
    pub target_platform: Platform,
}

/// Options for the `migrations` command
#[derive(Parser, Clone, Debug)]
pub struct MigrationsOpts {
    #[allow(missing_docs)]
    #[clap(flatten)]
    pub feedstock: FeedstockOpts,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_valid() {
        App::command().debug_assert();
    }

    #[test]
    fn test_parse_configure() {
        let app = App::try_parse_from([
            "forge-matrix",
            "configure",
            "--feedstock-dir",
            "my-feedstock",
            "-m",
            "pinning/conda_build_config.yaml",
            "--rendered-outputs",
            "outputs.yaml",
            "--dry-run",
        ])
        .unwrap();
        let SubCommands::Configure(opts) = app.subcommand else {
            panic!("expected the configure subcommand");
        };
        assert_eq!(opts.feedstock.feedstock_dir, PathBuf::from("my-feedstock"));
        assert_eq!(
            opts.feedstock.exclusive_config_file,
            Some(PathBuf::from("pinning/conda_build_config.yaml"))
        );
        assert!(opts.dry_run);
    }

    #[test]
    fn test_parse_combine_platform() {
        let app =
            App::try_parse_from(["forge-matrix", "combine", "--target-platform", "osx-arm64"])
                .unwrap();
        let SubCommands::Combine(opts) = app.subcommand else {
            panic!("expected the combine subcommand");
        };
        assert_eq!(opts.target_platform, Platform::OsxArm64);
        assert!(App::try_parse_from(["forge-matrix", "combine", "--target-platform", "amiga"]).is_err());
    }
}
