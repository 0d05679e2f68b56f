//! Command-line argument parsing for unimux
//!
//! Uses clap for argument parsing with derive macros.

use std::path::PathBuf;

use clap::Parser;

use crate::config::AppConfig;

/// unimux - share one exclusive downstream tool between many local processes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to $XDG_CONFIG_HOME/unimux/config.toml)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Loopback port shared by every instance
    #[arg(long, short = 'p', env = "UNIMUX_PORT")]
    pub port: Option<u16>,

    /// Timeout in milliseconds when probing for a running hub
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Log filter directive (e.g. "debug" or "unimux_proxy=trace")
    #[arg(long, env = "UNIMUX_LOG")]
    pub log: Option<String>,

    /// Mirror logs to stderr in addition to the log file
    #[arg(long, default_value_t = false)]
    pub log_stderr: bool,

    /// Downstream command to launch when this instance becomes the hub
    ///
    /// Example: unimux -- npx -y @satelliteoflove/godot-mcp
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Args {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Layer command-line overrides on top of the file configuration
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.hub.port = port;
        }
        if let Some(timeout) = self.connect_timeout {
            config.resolver.connect_timeout_ms = timeout;
        }
        if let Some((command, args)) = self.command.split_first() {
            config.downstream.command = command.clone();
            config.downstream.args = args.to_vec();
        }
    }
}
