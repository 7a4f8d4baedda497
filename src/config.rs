//! Configuration for a provisioning run.
//!
//! Tool behaviour (names, privilege escalation, console color) is read from an
//! optional JSON file. The permission targets and package requirements are
//! fixed tables and deliberately not configurable.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};

/// Directories whose files must be executable, relative to the project root.
pub const PERMISSION_TARGETS: &[(&str, bool)] = &[
    ("src", false),                    // Application sources
    ("setup", false),                  // Setup scripts
    ("circuitpython", false),          // Microcontroller firmware (tiny2040)
    ("circuitpython/tiny2350", false), // Microcontroller firmware (tiny2350)
];

/// Python dependencies installed through apt, in install order.
pub const REQUIRED_PACKAGES: &[&str] = &[
    "python3-skyfield",
    "python3-opencv",
    "python3-astroalign",
    "python3-pandas",
    "python3-astropy",
];

/// A directory whose contained files are marked executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionTarget {
    /// Path relative to the project root
    pub path: PathBuf,
    /// Descend into subdirectories
    pub recursive: bool,
}

impl PermissionTarget {
    pub fn new(path: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            path: path.into(),
            recursive,
        }
    }

    /// The fixed target list
    pub fn defaults() -> Vec<Self> {
        PERMISSION_TARGETS
            .iter()
            .map(|(path, recursive)| Self::new(*path, *recursive))
            .collect()
    }
}

/// A single named package to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequirement {
    pub name: String,
}

impl PackageRequirement {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The fixed requirement sequence, in declared order
    pub fn defaults() -> Vec<Self> {
        REQUIRED_PACKAGES.iter().map(|name| Self::new(*name)).collect()
    }
}

/// When package operations are run through `sudo`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SudoMode {
    /// Only when not already running as root
    #[default]
    Auto,
    Always,
    Never,
}

/// Console color policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ColorMode {
    /// Color when stdout is a terminal and NO_COLOR is unset
    #[default]
    Auto,
    Always,
    Never,
}

/// Tool configuration that can be loaded from a JSON file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    /// Name of the directory the tool must be launched from
    pub scripts_dir_name: String,
    /// Base name of the session log file (`log/<tool_name>.log`)
    pub tool_name: String,
    pub use_sudo: SudoMode,
    pub color: ColorMode,
    /// Command used for the language-package inventory
    pub pip_command: String,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            scripts_dir_name: "setup".to_string(),
            tool_name: "setup".to_string(),
            use_sudo: SudoMode::Auto,
            color: ColorMode::Auto,
            pip_command: "pip3".to_string(),
        }
    }
}

impl SetupConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_name("scripts_dir_name", &self.scripts_dir_name)?;
        validate_name("tool_name", &self.tool_name)?;

        if self.pip_command.trim().is_empty() {
            anyhow::bail!("pip_command must be specified");
        }
        if self.pip_command.contains(char::is_whitespace) {
            anyhow::bail!("pip_command cannot contain whitespace");
        }

        Ok(())
    }
}

/// Names become single path components, so separators and `..` are rejected.
fn validate_name(field: &str, value: &str) -> Result<()> {
    let value = value.trim();
    if value.is_empty() {
        anyhow::bail!("{} must be specified", field);
    }
    if value.contains('/') || value.contains('\\') {
        anyhow::bail!("{} cannot contain path separators", field);
    }
    if value == "." || value == ".." {
        anyhow::bail!("{} cannot be '.' or '..'", field);
    }
    Ok(())
}
