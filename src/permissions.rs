//! Executable-bit adjustment for application and firmware directories.

use crate::config::PermissionTarget;
use crate::error::{ProvisionError, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// `a+x`
const EXECUTE_BITS: u32 = 0o111;

/// Files handled for one target
#[derive(Debug)]
pub struct TargetOutcome {
    pub target: PathBuf,
    /// Every regular file marked, whether or not its mode changed
    pub files: Vec<PathBuf>,
    /// Files whose mode actually changed
    pub changed: usize,
    /// Entries that could not be read or marked; the rest of the target still is
    pub failures: Vec<ProvisionError>,
}

/// Result of applying a target list. One target failing never stops the others.
#[derive(Debug, Default)]
pub struct PermissionReport {
    pub applied: Vec<TargetOutcome>,
    pub failures: Vec<ProvisionError>,
}

impl PermissionReport {
    pub fn file_count(&self) -> usize {
        self.applied.iter().map(|o| o.files.len()).sum()
    }

    /// No target-level or per-file failures
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.applied.iter().all(|o| o.failures.is_empty())
    }
}

/// Marks files executable.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionSetter {
    dry_run: bool,
}

impl PermissionSetter {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Apply every target under `root`, collecting per-target failures.
    pub fn apply(&self, root: &Path, targets: &[PermissionTarget]) -> PermissionReport {
        let mut report = PermissionReport::default();

        for target in targets {
            match self.apply_target(root, target) {
                Ok(outcome) => {
                    tracing::debug!(
                        "{}: {} file(s), {} changed, {} failed",
                        outcome.target.display(),
                        outcome.files.len(),
                        outcome.changed,
                        outcome.failures.len()
                    );
                    report.applied.push(outcome);
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    report.failures.push(e);
                }
            }
        }

        report
    }

    /// Set the executable bit on every regular file in one target. A file that
    /// cannot be marked is recorded as `FileAccess` and the others still are.
    ///
    /// # Errors
    ///
    /// - `MissingTarget` if the directory does not exist
    /// - `Io` if it is not a directory or cannot be read
    pub fn apply_target(&self, root: &Path, target: &PermissionTarget) -> Result<TargetOutcome> {
        let dir = root.join(&target.path);

        if !dir.exists() {
            return Err(ProvisionError::missing_target(dir));
        }
        if !dir.is_dir() {
            return Err(ProvisionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("{} is not a directory", dir.display()),
            )));
        }

        let max_depth = if target.recursive { usize::MAX } else { 1 };
        let mut outcome = TargetOutcome {
            target: dir.clone(),
            files: Vec::new(),
            changed: 0,
            failures: Vec::new(),
        };

        // Links are followed like chmod does; a dangling one is a per-entry failure
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map_or_else(|| dir.clone(), Path::to_path_buf);
                    outcome.failures.push(ProvisionError::file_access(path, e.into()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            match self.mark_executable(entry.path()) {
                Ok(changed) => {
                    if changed {
                        outcome.changed += 1;
                    }
                    outcome.files.push(entry.into_path());
                }
                Err(e) => {
                    outcome
                        .failures
                        .push(ProvisionError::file_access(entry.into_path(), e));
                }
            }
        }

        Ok(outcome)
    }

    /// Returns true if the mode changed (or would change, in dry-run mode)
    fn mark_executable(&self, path: &Path) -> std::io::Result<bool> {
        let mut permissions = fs::metadata(path)?.permissions();
        let mode = permissions.mode();
        if mode & EXECUTE_BITS == EXECUTE_BITS {
            return Ok(false);
        }

        if !self.dry_run {
            permissions.set_mode(mode | EXECUTE_BITS);
            fs::set_permissions(path, permissions)?;
        }
        Ok(true)
    }
}
