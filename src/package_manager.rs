//! apt-get integration
//!
//! Wraps the four package-manager operations a provisioning run needs. Every
//! invocation goes through the [`CommandRunner`] and its result is classified
//! explicitly: a non-zero exit, a signal, or a failure to launch all become
//! `PackageOperation` errors naming the operation.
//!
//! # Records
//!
//! Each executed command is kept as an [`OperationRecord`] until the caller
//! drains them with [`PackageManager::take_records`], so the orchestrator can
//! write command lines and failure details into the session log.

use crate::command_args::{CommandArgs, Invocation, Privilege};
use crate::command_runner::{CommandOutput, CommandRunner};
use crate::config::PackageRequirement;
use crate::error::{OperationStatus, ProvisionError, Result};
use std::fmt;

const APT_GET: &str = "apt-get";

/// A single apt-get operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOperation {
    /// `apt-get update`
    RefreshIndex,
    /// `apt-get -y upgrade`
    UpgradeAll,
    /// `apt-get -y install <name>`
    Install(String),
    /// `apt-get -y autoremove`
    Autoremove,
    /// `apt-get clean`
    ClearCache,
}

impl PackageOperation {
    /// Short operation name used in errors and the summary
    pub fn name(&self) -> String {
        match self {
            Self::RefreshIndex => "update".to_string(),
            Self::UpgradeAll => "upgrade".to_string(),
            Self::Install(package) => format!("install {}", package),
            Self::Autoremove => "autoremove".to_string(),
            Self::ClearCache => "clean".to_string(),
        }
    }
}

impl fmt::Display for PackageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl CommandArgs for PackageOperation {
    fn program(&self) -> &str {
        APT_GET
    }

    fn to_cli_args(&self) -> Vec<String> {
        let args: &[&str] = match self {
            Self::RefreshIndex => &["update"],
            Self::UpgradeAll => &["-y", "upgrade"],
            Self::Install(package) => {
                return vec!["-y".to_string(), "install".to_string(), package.clone()];
            }
            Self::Autoremove => &["-y", "autoremove"],
            Self::ClearCache => &["clean"],
        };
        args.iter().map(|a| a.to_string()).collect()
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string())]
    }

    fn mutates_system(&self) -> bool {
        true
    }

    fn needs_privilege(&self) -> bool {
        true
    }

    fn echo_output(&self) -> bool {
        true
    }
}

/// What happened when one operation ran
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub operation: PackageOperation,
    pub command_line: String,
    /// None when the process could not be launched
    pub output: Option<CommandOutput>,
    /// Launch failure reason
    pub launch_error: Option<String>,
}

impl OperationRecord {
    pub fn succeeded(&self) -> bool {
        self.output.as_ref().is_some_and(|o| o.success)
    }

    /// Classify as Ok or `PackageOperation`
    pub fn to_result(&self) -> Result<()> {
        match (&self.output, &self.launch_error) {
            (Some(output), _) => output.ensure_success(&self.operation.name()),
            (None, reason) => Err(ProvisionError::package_operation(
                self.operation.name(),
                OperationStatus::NotLaunched(reason.clone().unwrap_or_default()),
            )),
        }
    }
}

/// apt-get adapter over a command runner.
pub struct PackageManager<'r> {
    runner: &'r mut dyn CommandRunner,
    privilege: Privilege,
    records: Vec<OperationRecord>,
}

impl<'r> PackageManager<'r> {
    pub fn new(runner: &'r mut dyn CommandRunner, privilege: Privilege) -> Self {
        Self {
            runner,
            privilege,
            records: Vec::new(),
        }
    }

    /// Refresh the package index. Must precede any install.
    pub fn refresh_index(&mut self) -> Result<()> {
        self.execute(PackageOperation::RefreshIndex).to_result()
    }

    /// Upgrade every installed package.
    pub fn upgrade_all(&mut self) -> Result<()> {
        self.execute(PackageOperation::UpgradeAll).to_result()
    }

    /// Install exactly one named package.
    pub fn install_named(&mut self, requirement: &PackageRequirement) -> Result<()> {
        self.execute(PackageOperation::Install(requirement.name.clone()))
            .to_result()
    }

    /// Remove unneeded dependencies, then clear the download cache.
    /// Both steps run; the first failure is returned.
    pub fn cleanup(&mut self) -> Result<()> {
        let autoremove = self.execute(PackageOperation::Autoremove).to_result();
        let clean = self.execute(PackageOperation::ClearCache).to_result();
        autoremove.and(clean)
    }

    /// Run one operation and record the outcome. Never fails.
    pub fn execute(&mut self, operation: PackageOperation) -> &OperationRecord {
        let invocation = Invocation::from_args(&operation, self.privilege);
        let command_line = invocation.command_line();

        let record = match self.runner.run(&invocation) {
            Ok(output) => {
                if !output.success {
                    tracing::warn!("{} failed: {}", command_line, output.status());
                }
                OperationRecord {
                    operation,
                    command_line,
                    output: Some(output),
                    launch_error: None,
                }
            }
            Err(e) => {
                tracing::warn!("{} could not be launched: {}", command_line, e);
                OperationRecord {
                    operation,
                    command_line,
                    output: None,
                    launch_error: Some(e.to_string()),
                }
            }
        };

        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    /// Drain the records accumulated since the last call
    pub fn take_records(&mut self) -> Vec<OperationRecord> {
        std::mem::take(&mut self.records)
    }
}
