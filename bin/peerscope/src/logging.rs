//! Logging setup.

use eyre::{Result, eyre};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::cli::LogArgs;

/// Initialize logging to stderr.
///
/// The filter is built with the following precedence:
/// 1. If `--quiet` is set, only errors are shown
/// 2. Otherwise, start with `RUST_LOG` if set, or a level from `-v`
/// 3. Add any directives from `--log.filter`
pub(crate) fn init_logging(args: &LogArgs) -> Result<()> {
    let mut rejected = Vec::new();
    let filter = if args.quiet {
        EnvFilter::new("error")
    } else {
        let base_level = match args.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_level));

        if let Some(custom) = &args.filter {
            for directive in custom.split(',').filter(|d| !d.trim().is_empty()) {
                match directive.parse() {
                    Ok(d) => filter = filter.add_directive(d),
                    Err(_) => rejected.push(directive.to_string()),
                }
            }
        }
        filter
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init()
        .map_err(|e| eyre!("failed to install log subscriber: {e}"))?;

    for directive in rejected {
        warn!(%directive, "Ignoring invalid log filter directive");
    }
    Ok(())
}
