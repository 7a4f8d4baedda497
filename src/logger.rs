//! Append-only session log
//!
//! Every provisioning run appends to the same `log/<tool>.log` file. Nothing
//! is ever truncated, so the file holds the history of every run in order.
//! Each record is one line prefixed with a local timestamp and is flushed as
//! soon as it is written.

use crate::error::{ProvisionError, Result};
use crate::session::ProvisioningSession;
use chrono::{DateTime, Local};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Timestamp format used at the start of every record
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One line of the session log
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub text: String,
}

impl LogEntry {
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            text: text.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.timestamp.format(TIMESTAMP_FORMAT), self.text)
    }
}

/// Writer for the session log.
///
/// Generic over the sink so that tests can substitute an in-memory or
/// failing writer. A log without a sink accepts writes and discards them;
/// the orchestrator uses that when the file cannot be opened.
pub struct SessionLog<W: Write = File> {
    sink: Option<W>,
    path: Option<PathBuf>,
    entries_written: usize,
}

impl SessionLog<File> {
    /// Open the session log in append mode, creating `log/` and the file if needed.
    ///
    /// Records whether the file was freshly started or appended to, followed by
    /// a session header.
    pub fn open(session: &ProvisioningSession) -> Result<Self> {
        let path = session.log_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let existing = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let mut log = Self {
            sink: Some(file),
            path: Some(path.to_path_buf()),
            entries_written: 0,
        };

        if existing {
            log.write(format!("Appending to existing log {}", path.display()))?;
        } else {
            log.write(format!("Starting new log {}", path.display()))?;
        }
        log.write(format!(
            "==== Provisioning session started {} (root {}) ====",
            session.started_at().format(TIMESTAMP_FORMAT),
            session.root_path().display()
        ))?;

        tracing::info!("Session log opened: {}", path.display());
        Ok(log)
    }
}

impl<W: Write> SessionLog<W> {
    /// Wrap an arbitrary writer
    pub fn from_writer(sink: W) -> Self {
        Self {
            sink: Some(sink),
            path: None,
            entries_written: 0,
        }
    }

    /// A log that discards everything
    pub fn disabled() -> Self {
        Self {
            sink: None,
            path: None,
            entries_written: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Path of the underlying file, if file-backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of records written this session
    pub fn entries_written(&self) -> usize {
        self.entries_written
    }

    /// Append one timestamped record. Embedded newlines produce one record per line.
    ///
    /// # Errors
    ///
    /// `LogWrite` if the underlying write or flush fails.
    pub fn write(&mut self, text: impl AsRef<str>) -> Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };

        let text = text.as_ref();
        let lines: Vec<&str> = if text.is_empty() {
            vec![""]
        } else {
            text.lines().collect()
        };

        for line in lines {
            let entry = LogEntry::now(line);
            writeln!(sink, "{}", entry).map_err(|source| ProvisionError::LogWrite { source })?;
            self.entries_written += 1;
        }
        sink.flush()
            .map_err(|source| ProvisionError::LogWrite { source })
    }

    /// Append a header record followed by one record per line
    pub fn write_section<S: AsRef<str>>(&mut self, header: &str, lines: &[S]) -> Result<()> {
        self.write(header)?;
        for line in lines {
            self.write(line.as_ref())?;
        }
        Ok(())
    }

    /// Flush and release the handle
    pub fn close(mut self) -> Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.flush()
                .map_err(|source| ProvisionError::LogWrite { source })?;
        }
        Ok(())
    }

    /// Consume the log and hand back the sink
    pub fn into_inner(mut self) -> Option<W> {
        self.sink.take()
    }
}

impl<W: Write> Drop for SessionLog<W> {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.flush();
        }
    }
}
