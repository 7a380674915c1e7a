//! Command-line interface.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};
use peerscope_identity::Multiaddr;
use peerscope_probe::ProbeConfig;

/// Resolve a peer, connect to it securely and list the protocols it speaks.
#[derive(Debug, Parser)]
#[command(name = "probe", author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Overlay multiaddr (`/ip4/1.2.3.4/tcp/4001/p2p/<id>`) or bare peer id.
    #[arg(value_name = "TARGET")]
    pub(crate) target: String,

    #[command(flatten)]
    pub(crate) probe: ProbeArgs,

    #[command(flatten)]
    pub(crate) logs: LogArgs,
}

/// Overrides applied on top of the config file.
#[derive(Debug, Args, Clone, Default)]
#[command(next_help_heading = "Probe")]
pub(crate) struct ProbeArgs {
    /// TOML config file.
    #[arg(long, value_name = "FILE")]
    pub(crate) config: Option<PathBuf>,

    /// Listen on these addresses while probing.
    #[arg(long, value_name = "MULTIADDR", value_delimiter = ',')]
    pub(crate) listen: Vec<Multiaddr>,

    /// Bootstrap from these peers instead of the built-in seeds.
    #[arg(long, value_name = "MULTIADDR", value_delimiter = ',')]
    pub(crate) bootstrap: Vec<Multiaddr>,

    /// Do not expand `/dnsaddr` seeds through DNS.
    #[arg(long)]
    pub(crate) no_dnsaddr: bool,

    /// Connection manager low watermark.
    #[arg(long, value_name = "COUNT")]
    pub(crate) low_water: Option<usize>,

    /// Connection manager high watermark.
    #[arg(long, value_name = "COUNT")]
    pub(crate) high_water: Option<usize>,

    /// Age below which connections are never trimmed.
    #[arg(long, value_name = "SECS")]
    pub(crate) grace_period: Option<u64>,

    /// Deadline for dialing one address.
    #[arg(long, value_name = "SECS")]
    pub(crate) dial_timeout: Option<u64>,

    /// Deadline for the whole probe.
    #[arg(long, value_name = "SECS")]
    pub(crate) timeout: Option<u64>,
}

impl ProbeArgs {
    /// Apply the flags that were given to `config`.
    pub(crate) fn apply(&self, config: &mut ProbeConfig) {
        if !self.listen.is_empty() {
            config.host.listen_addrs = self.listen.clone();
        }
        if !self.bootstrap.is_empty() {
            config.bootstrap.seeds = self.bootstrap.clone();
        }
        if self.no_dnsaddr {
            config.bootstrap.resolve_dnsaddr = false;
        }

        let conn_manager = &mut config.host.conn_manager;
        if let Some(low) = self.low_water {
            conn_manager.low_water = low;
        }
        if let Some(high) = self.high_water {
            conn_manager.high_water = high;
        }
        if let Some(secs) = self.grace_period {
            conn_manager.grace_period = Duration::from_secs(secs);
        }

        if let Some(secs) = self.dial_timeout {
            config.host.dial_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeout {
            config.probe_timeout = Duration::from_secs(secs);
        }
    }
}

/// Logging configuration.
#[derive(Debug, Args, Clone, Default)]
#[command(next_help_heading = "Logging")]
pub(crate) struct LogArgs {
    /// Only log errors.
    #[arg(short, long)]
    pub(crate) quiet: bool,

    /// Verbose mode (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub(crate) verbosity: u8,

    /// Log filter directive (e.g., "peerscope_kad=trace").
    #[arg(long = "log.filter", value_name = "DIRECTIVE")]
    pub(crate) filter: Option<String>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "probe",
            "--bootstrap",
            "/ip4/127.0.0.1/tcp/4001/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
            "--no-dnsaddr",
            "--low-water",
            "5",
            "--high-water",
            "10",
            "--timeout",
            "7",
            "-vv",
            "--log.filter",
            "peerscope_kad=trace",
            "QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
        ])
        .unwrap();

        assert_eq!(cli.target, "QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ");
        assert_eq!(cli.logs.verbosity, 2);
        assert_eq!(cli.logs.filter.as_deref(), Some("peerscope_kad=trace"));

        let mut config = ProbeConfig::default();
        cli.probe.apply(&mut config);
        assert_eq!(config.bootstrap.seeds.len(), 1);
        assert!(!config.bootstrap.resolve_dnsaddr);
        assert_eq!(config.host.conn_manager.low_water, 5);
        assert_eq!(config.host.conn_manager.high_water, 10);
        assert_eq!(config.probe_timeout, Duration::from_secs(7));
        // Untouched settings keep their values.
        assert_eq!(config.host.dial_timeout, ProbeConfig::default().host.dial_timeout);
    }

    #[test]
    fn test_target_is_required() {
        assert!(Cli::try_parse_from(["probe"]).is_err());
    }
}
