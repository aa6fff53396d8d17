//! Command-line interface for mockbridge-daemon.

use std::path::PathBuf;

use clap::Parser;

/// Capture-to-mock bridge daemon.
///
/// Receives sidecar tap captures, sanitizes and deduplicates them,
/// and installs the survivors as canned rules on a mock server.
#[derive(Debug, Parser)]
#[command(name = "mockbridge-daemon", version, about)]
pub struct Cli {
    /// Path to the mockbridge.toml configuration file.
    #[arg(long, short = 'c', default_value = "/etc/mockbridge/mockbridge.toml")]
    pub config: PathBuf,

    /// Validate the configuration and exit without starting.
    #[arg(long)]
    pub check_config: bool,
}
