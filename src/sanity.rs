//! Pre-flight environment checks
//!
//! Verifies that the package tools are on `PATH` and that package operations
//! can run with root privileges. Nothing here is fatal: findings are reported
//! as warnings and the run proceeds, so that a partially provisioned image can
//! still be brought up to date.

use crate::command_args::{Privilege, SUDO_NON_INTERACTIVE};
use crate::config::SetupConfig;

/// Binaries every package operation depends on
const REQUIRED_BINARIES: &[&str] = &["apt-get", "dpkg"];

/// Result of environment verification
#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
    pub sudo_available: bool,
    /// `sudo -n true` succeeded, so package steps will not need a password
    pub sudo_cached: bool,
    /// Inventory tools that will report "unavailable"
    pub missing_inventory_tools: Vec<String>,
}

impl PreflightReport {
    /// Human-readable warnings for the given escalation strategy
    pub fn warnings(&self, privilege: Privilege) -> Vec<String> {
        let mut warnings = Vec::new();

        for binary in &self.missing_binaries {
            warnings.push(format!(
                "Required binary '{}' not found; package operations will fail",
                binary
            ));
        }

        match privilege {
            Privilege::Sudo if !self.sudo_available => warnings.push(
                "sudo not found; package operations need root privileges".to_string(),
            ),
            Privilege::Sudo if !self.is_root && !self.sudo_cached => warnings.push(
                "sudo needs a password and cannot prompt during setup; run 'sudo -v' first \
                 or package operations will fail"
                    .to_string(),
            ),
            Privilege::Direct if !self.is_root => warnings.push(
                "Not running as root and sudo is disabled; package operations will likely fail"
                    .to_string(),
            ),
            _ => {}
        }

        for tool in &self.missing_inventory_tools {
            warnings.push(format!(
                "'{}' not found; its inventory will be recorded as unavailable",
                tool
            ));
        }

        warnings
    }

    pub fn is_ok(&self, privilege: Privilege) -> bool {
        self.warnings(privilege).is_empty()
    }
}

/// Check if a binary is available in PATH
pub fn binary_exists(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Check if running as root (EUID 0)
pub fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// True if sudo can run without prompting (NOPASSWD or a cached timestamp)
pub fn sudo_runs_without_password() -> bool {
    std::process::Command::new("sudo")
        .args([SUDO_NON_INTERACTIVE, "true"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

/// Perform all checks
pub fn verify_environment(config: &SetupConfig) -> PreflightReport {
    let missing_binaries = REQUIRED_BINARIES
        .iter()
        .filter(|b| !binary_exists(b))
        .map(|b| (*b).to_string())
        .collect();

    let missing_inventory_tools = ["apt", config.pip_command.as_str()]
        .iter()
        .filter(|b| !binary_exists(b))
        .map(|b| (*b).to_string())
        .collect();

    let is_root = is_running_as_root();
    let sudo_available = binary_exists("sudo");
    let report = PreflightReport {
        missing_binaries,
        is_root,
        sudo_available,
        sudo_cached: is_root || (sudo_available && sudo_runs_without_password()),
        missing_inventory_tools,
    };
    tracing::debug!("Preflight: {:?}", report);
    report
}
