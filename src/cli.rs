use clap::Parser;
use std::path::PathBuf;

/// Pilomar setup - provision a Raspberry Pi for the Pilomar telescope
#[derive(Parser, Debug)]
#[command(name = "pilomar-setup")]
#[command(about = "Prepare a Raspberry Pi to run the Pilomar telescope software")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: show what would be executed without making changes.
    ///
    /// Package operations and permission changes are skipped and logged.
    /// Inventory listings still run so the log is realistic.
    #[arg(long)]
    pub dry_run: bool,

    /// JSON configuration file (all fields optional)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Disable colored console output
    #[arg(long)]
    pub no_color: bool,

    /// Increase diagnostic output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Default `tracing` directive for the verbosity level
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}
