//! `probe`: resolve a peer, connect to it and print the protocols it speaks.

mod cli;
mod logging;

use std::process::ExitCode;

use clap::Parser;
use eyre::{Result, WrapErr};
use peerscope_probe::{ProbeConfig, ProbeEvent, Prober};
use tracing::debug;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(&cli.logs)?;

    let mut config = match &cli.probe.config {
        Some(path) => ProbeConfig::load(path)
            .wrap_err_with(|| format!("could not load config {}", path.display()))?,
        None => ProbeConfig::default(),
    };
    cli.probe.apply(&mut config);
    config.validate().wrap_err("invalid configuration")?;

    let print = |event: &ProbeEvent| println!("{event}");
    match Prober::new(config).run(&cli.target, &print).await {
        Ok(report) => {
            debug!(?report, "Probe report");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            debug!(kind = %e.kind(), "Probe failed");
            eprintln!("{e}");
            Ok(ExitCode::FAILURE)
        }
    }
}
