mod access;
mod config;
mod manager;
mod outage;
mod probe;
mod signals;
mod watchdog;

use clap::Parser;
use config::WatchdogConfig;
use manager::WatchdogManager;
use signals::SignalHandler;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Watches a tunnel endpoint and cuts off network access for selected
/// processes while it is unreachable, restoring it when the endpoint
/// answers again.
#[derive(Parser, Debug)]
#[command(name = "tunnel-watchdog", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "tunnel-watchdog.toml")]
    config: PathBuf,

    /// Host to watch (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Consecutive failed checks before cutting off access (overrides config)
    #[arg(long)]
    threshold: Option<u32>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (every health check)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn default_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }

    /// Apply command-line overrides on top of the file config.
    fn apply_overrides(&self, config: &mut WatchdogConfig) {
        if let Some(host) = &self.host {
            config.watchdog.host = host.clone();
        }
        if let Some(threshold) = self.threshold {
            config.watchdog.outage_threshold = threshold;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.default_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match WatchdogConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };
    cli.apply_overrides(&mut config);

    if cli.dry_run {
        return match config.validate() {
            Ok(settings) => {
                println!("Config file: {}", cli.config.display());
                println!("{settings:#?}");
                println!("Dry run mode, config validated, not running.");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(error = %e, "invalid config");
                ExitCode::FAILURE
            }
        };
    }

    let mut signals = match SignalHandler::install() {
        Ok(handler) => handler,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    let mut manager = WatchdogManager::new(config);
    if let Err(e) = manager.start() {
        tracing::error!(error = %e, "failed to start watchdog");
        return ExitCode::FAILURE;
    }
    tracing::info!(config = %cli.config.display(), "tunnel-watchdog running");

    let code = tokio::select! {
        signal = signals.recv() => {
            tracing::info!(?signal, "shutdown requested");
            ExitCode::SUCCESS
        }
        result = manager.wait() => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "watchdog exited");
                ExitCode::FAILURE
            }
        },
    };

    manager.shutdown().await;
    code
}
