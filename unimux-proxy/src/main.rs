//! unimux - share one exclusive downstream tool between many local processes
//!
//! Stdout carries the protocol, so all diagnostics go to the log file.

use tokio_util::sync::CancellationToken;

use unimux_proxy::cli::Args;
use unimux_proxy::signals::spawn_signal_listener;
use unimux_proxy::{CommandLauncher, ConfigLoader, LocalCaller, Supervisor};
use unimux_utils::{init_logging_with_config, LogConfig, LogOutput, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    let mut config = ConfigLoader::load_optional(args.config.as_deref())?;
    args.apply(&mut config);
    ConfigLoader::validate(&config)?;

    let mut log_config = LogConfig::proxy();
    if let Some(filter) = &args.log {
        log_config = log_config.with_filter(filter.clone());
    }
    if args.log_stderr {
        log_config = log_config.with_output(LogOutput::Both);
    }
    init_logging_with_config(log_config)?;

    tracing::info!(
        pid = std::process::id(),
        hub = %config.hub_addr(),
        downstream = %config.downstream.command_line(),
        "unimux starting"
    );

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let launcher = CommandLauncher::new(config.downstream.clone());
    let supervisor = Supervisor::new(config, launcher);
    let outcome = supervisor.run(LocalCaller::stdio(), cancel).await;

    tracing::info!(pid = std::process::id(), "unimux exiting: {}", outcome);

    // The stdin reader can stay parked in a blocking read; don't wait on it
    std::process::exit(0)
}
