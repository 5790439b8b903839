//! Logging setup for the `forge-matrix` binary.

use std::{fmt::Write as _, io, str::FromStr};

use tracing_core::{Event, Subscriber};
use tracing_subscriber::{
    EnvFilter,
    filter::{Directive, LevelFilter},
    fmt::{
        self, FmtContext, FormatEvent, FormatFields,
        format::{Format, Writer},
    },
    prelude::*,
    registry::LookupSpan,
};

/// The crates whose INFO events are printed without decoration.
const OWN_TARGETS: &[&str] = &["forge_matrix", "forge_matrix_variants"];

/// Prints INFO events of our own crates as plain messages and everything
/// else in the default format.
pub struct TracingFormatter;

impl<S, N> FormatEvent<S, N> for TracingFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();

        if *metadata.level() == tracing_core::metadata::Level::INFO
            && is_own_target(metadata.target())
        {
            ctx.format_fields(writer.by_ref(), event)?;
            writeln!(writer)
        } else {
            let default_format = Format::default();
            default_format.format_event(ctx, writer, event)
        }
    }
}

fn is_own_target(target: &str) -> bool {
    OWN_TARGETS.iter().any(|own| {
        target == *own
            || target
                .strip_prefix(own)
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

fn default_directives(verbose: LevelFilter) -> Vec<String> {
    let level = verbose.to_string().to_lowercase();
    OWN_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .chain(["minijinja=warn".to_string()])
        .collect()
}

/// Constructs a default [`EnvFilter`] that is used when the user did not
/// specify a custom `RUST_LOG`.
pub fn get_default_env_filter(verbose: LevelFilter) -> EnvFilter {
    let mut result = EnvFilter::new("warn");
    for directive in default_directives(verbose) {
        if let Ok(directive) = Directive::from_str(&directive) {
            result = result.add_directive(directive);
        }
    }
    result
}

/// Install the global tracing subscriber. Directives from `RUST_LOG` are
/// layered on top of the defaults derived from `verbose`.
pub fn init_logging(verbose: LevelFilter) {
    let mut filter = get_default_env_filter(verbose);
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        for directive in rust_log.split(',').filter(|d| !d.trim().is_empty()) {
            match Directive::from_str(directive.trim()) {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(err) => eprintln!("Ignoring invalid RUST_LOG directive '{directive}': {err}"),
            }
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .event_format(TracingFormatter),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("forge_matrix", true)]
    #[case("forge_matrix::ci_support", true)]
    #[case("forge_matrix_variants::sequencer", true)]
    #[case("forge_matrix_extra", false)]
    #[case("minijinja", false)]
    fn test_own_targets(#[case] target: &str, #[case] expected: bool) {
        assert_eq!(is_own_target(target), expected);
    }

    #[test]
    fn test_default_directives_follow_verbosity() {
        assert_eq!(
            default_directives(LevelFilter::DEBUG),
            [
                "forge_matrix=debug",
                "forge_matrix_variants=debug",
                "minijinja=warn"
            ]
        );
        assert_eq!(default_directives(LevelFilter::OFF)[0], "forge_matrix=off");
    }
}
