//! Error handling module for pilomar-setup
//!
//! Provides the error taxonomy for a provisioning run using thiserror.
//! Only `Configuration` is fatal; every other variant is recorded by the
//! orchestrator and the run advances to the next stage.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for a provisioning run
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Root path unresolvable or configuration invalid (fatal)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A permission target directory is absent
    #[error("Permission target not found: {}", path.display())]
    MissingTarget { path: PathBuf },

    /// A file inside a permission target could not be read or marked
    #[error("Cannot mark {} executable: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The session log could not be written
    #[error("Log write failed: {source}")]
    LogWrite {
        #[source]
        source: std::io::Error,
    },

    /// A package-manager operation did not complete successfully
    #[error("Package operation '{operation}' failed ({status})")]
    PackageOperation {
        operation: String,
        status: OperationStatus,
    },

    /// IO errors outside the log write path (opening, traversal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a failed external operation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// Process exited with a non-zero code
    Exited(i32),
    /// Process was terminated by a signal
    Signaled,
    /// Process could not be launched at all
    NotLaunched(String),
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit status {}", code),
            Self::Signaled => write!(f, "terminated by signal"),
            Self::NotLaunched(reason) => write!(f, "not launched: {}", reason),
        }
    }
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a missing-target error
    pub fn missing_target(path: impl Into<PathBuf>) -> Self {
        Self::MissingTarget { path: path.into() }
    }

    /// Create a file access error
    pub fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileAccess {
            path: path.into(),
            source,
        }
    }

    /// Create a package operation error
    pub fn package_operation(operation: impl Into<String>, status: OperationStatus) -> Self {
        Self::PackageOperation {
            operation: operation.into(),
            status,
        }
    }

    /// Returns true if this error must abort the run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
