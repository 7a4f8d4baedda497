//! Session path resolution
//!
//! The tool is launched from the project's scripts directory. Everything else
//! (the project root, the log file) is derived from that location once, at
//! startup, and carried in an immutable `ProvisioningSession`.

use crate::config::SetupConfig;
use crate::error::{ProvisionError, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Directory under the project root that holds session logs
pub const LOG_DIR_NAME: &str = "log";

/// Immutable facts about one provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisioningSession {
    root_path: PathBuf,
    log_path: PathBuf,
    started_at: DateTime<Local>,
}

impl ProvisioningSession {
    /// Resolve the session from the process working directory.
    pub fn from_current_dir(config: &SetupConfig) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| {
            ProvisionError::configuration(format!("Cannot determine working directory: {}", e))
        })?;
        Self::resolve(&cwd, config)
    }

    /// Resolve the session from an explicit launch directory.
    ///
    /// # Errors
    ///
    /// `Configuration` if the launch directory cannot be canonicalized, is not
    /// named `config.scripts_dir_name`, has no parent, or the parent is not an
    /// existing directory.
    pub fn resolve(launch_dir: &Path, config: &SetupConfig) -> Result<Self> {
        let launch_dir = launch_dir.canonicalize().map_err(|e| {
            ProvisionError::configuration(format!(
                "Cannot resolve launch directory {}: {}",
                launch_dir.display(),
                e
            ))
        })?;

        let dir_name = launch_dir.file_name().and_then(|n| n.to_str());
        if dir_name != Some(config.scripts_dir_name.as_str()) {
            return Err(ProvisionError::configuration(format!(
                "Must be launched from the '{}' directory (launched from {})",
                config.scripts_dir_name,
                launch_dir.display()
            )));
        }

        let root_path = launch_dir
            .parent()
            .ok_or_else(|| {
                ProvisionError::configuration(format!(
                    "Launch directory {} has no parent",
                    launch_dir.display()
                ))
            })?
            .to_path_buf();

        if !root_path.is_dir() {
            return Err(ProvisionError::configuration(format!(
                "Project root {} is not a directory",
                root_path.display()
            )));
        }

        let log_path = root_path
            .join(LOG_DIR_NAME)
            .join(format!("{}.log", config.tool_name));

        tracing::debug!(
            "Session resolved: root={}, log={}",
            root_path.display(),
            log_path.display()
        );

        Ok(Self {
            root_path,
            log_path,
            started_at: Local::now(),
        })
    }

    #[inline]
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    #[inline]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    #[inline]
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }
}
