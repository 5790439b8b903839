//! This is the main entry point for the `forge-matrix` binary.

use std::str::FromStr;

use clap::Parser;
use forge_matrix::{
    combine_from_args, configure_from_args,
    console_utils::init_logging,
    migrations_from_args,
    opt::{App, SubCommands},
};
use tracing_subscriber::filter::LevelFilter;

fn main() -> miette::Result<()> {
    let app = App::parse();

    let verbose = LevelFilter::from_str(&app.verbose.log_level_filter().to_string())
        .unwrap_or(LevelFilter::INFO);
    init_logging(verbose);

    match app.subcommand {
        SubCommands::Configure(args) => {
            let summary = configure_from_args(args)?;
            tracing::info!(
                "Configured {} jobs, {} expired migrations",
                summary.entries.len(),
                summary.expired_migrations.len()
            );
        }
        SubCommands::Combine(args) => {
            print!("{}", combine_from_args(args)?);
        }
        SubCommands::Migrations(args) => {
            for line in migrations_from_args(args)? {
                println!("{line}");
            }
        }
    }
    Ok(())
}
