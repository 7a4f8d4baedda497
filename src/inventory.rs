//! Installed-software inventory snapshots
//!
//! Three package-tracking subsystems are listed before and after the package
//! operations so that a reader of the log can diff them. Capturing never
//! fails: an absent or broken query yields a single "unavailable" line so the
//! pre and post sections always have the same shape.

use crate::command_args::{CommandArgs, Invocation, Privilege};
use crate::command_runner::CommandRunner;
use strum::{Display, EnumIter, IntoEnumIterator};

/// Package-tracking subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum InventoryKind {
    /// System package database
    Dpkg,
    /// Python package registry
    Pip,
    /// Repository package index
    Apt,
}

/// Query that lists one inventory kind
#[derive(Debug, Clone)]
pub struct InventoryQuery {
    pub kind: InventoryKind,
    pip_command: String,
}

impl InventoryQuery {
    pub fn new(kind: InventoryKind, pip_command: &str) -> Self {
        Self {
            kind,
            pip_command: pip_command.to_string(),
        }
    }
}

impl CommandArgs for InventoryQuery {
    fn program(&self) -> &str {
        match self.kind {
            InventoryKind::Dpkg => "dpkg",
            InventoryKind::Pip => self.pip_command.as_str(),
            InventoryKind::Apt => "apt",
        }
    }

    fn to_cli_args(&self) -> Vec<String> {
        match self.kind {
            InventoryKind::Dpkg => vec!["-l".to_string()],
            InventoryKind::Pip => vec!["list".to_string()],
            InventoryKind::Apt => vec!["list".to_string(), "--installed".to_string()],
        }
    }

    fn mutates_system(&self) -> bool {
        false
    }
}

/// One captured listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventorySnapshot {
    pub kind: InventoryKind,
    /// Command that produced the listing, for the section header
    pub command: String,
    pub lines: Vec<String>,
}

impl InventorySnapshot {
    /// Header line written above the listing in the log
    pub fn header(&self) -> String {
        format!("{} packages ({}):", self.kind, self.command)
    }
}

/// Captures inventory listings through a command runner.
pub struct InventorySnapshotter<'r> {
    runner: &'r mut dyn CommandRunner,
    pip_command: String,
}

impl<'r> InventorySnapshotter<'r> {
    pub fn new(runner: &'r mut dyn CommandRunner, pip_command: &str) -> Self {
        Self {
            runner,
            pip_command: pip_command.to_string(),
        }
    }

    /// Capture one kind. Never fails.
    pub fn capture(&mut self, kind: InventoryKind) -> InventorySnapshot {
        let query = InventoryQuery::new(kind, &self.pip_command);
        let invocation = Invocation::from_args(&query, Privilege::Direct);
        let command = invocation.command_line();

        let lines = match self.runner.run(&invocation) {
            Ok(output) if output.success || !output.stdout.trim().is_empty() => {
                // apt warns about its unstable CLI on stderr; the listing is on stdout
                output.stdout_lines()
            }
            Ok(output) => {
                tracing::warn!("{} returned {}", command, output.status());
                vec![format!("{} inventory unavailable ({})", kind, output.status())]
            }
            Err(e) => {
                tracing::warn!("{} could not be run: {}", command, e);
                vec![format!("{} inventory unavailable ({})", kind, e)]
            }
        };

        InventorySnapshot {
            kind,
            command,
            lines,
        }
    }

    /// Capture every kind, in fixed order
    pub fn capture_all(&mut self) -> Vec<InventorySnapshot> {
        InventoryKind::iter().map(|kind| self.capture(kind)).collect()
    }
}
