//! pilomar-setup - Main entry point
//!
//! Parses flags, loads configuration, installs signal handlers and hands the
//! run to the orchestrator.

use anyhow::Result;
use pilomar_setup::cli::Cli;
use pilomar_setup::command_runner::SystemRunner;
use pilomar_setup::config::{ColorMode, SetupConfig};
use pilomar_setup::console::Console;
use pilomar_setup::orchestrator::Orchestrator;
use pilomar_setup::process_guard;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Diagnostics go to stderr; `RUST_LOG` overrides the verbosity flags
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<SetupConfig> {
    match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            SetupConfig::load_from_file(path)
        }
        None => Ok(SetupConfig::default()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.log_level());
    tracing::info!("pilomar-setup {} starting", env!("CARGO_PKG_VERSION"));

    // Child apt-get processes are terminated if we receive SIGINT/SIGTERM
    if let Err(e) = process_guard::init_signal_handlers() {
        tracing::warn!("Failed to initialize signal handlers: {}", e);
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            Console::new(ColorMode::Auto).error(&format!("{:#}", e));
            return ExitCode::FAILURE;
        }
    };

    let color = if cli.no_color {
        ColorMode::Never
    } else {
        config.color
    };

    let mut runner = SystemRunner::new(cli.dry_run);
    let mut orchestrator = Orchestrator::new(&config, &mut runner, Console::new(color));

    match orchestrator.run_from_current_dir() {
        Ok(summary) => {
            tracing::info!(
                "Run finished with {} problem(s), {} log write failure(s)",
                summary.failures.len(),
                summary.log_write_failures
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            Console::new(color).error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
