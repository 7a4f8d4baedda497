//! External command execution
//!
//! [`CommandRunner`] is the only way the tool launches processes. The
//! production [`SystemRunner`] spawns each child in its own process group,
//! registers it with the [`ChildRegistry`], and honours dry-run mode by
//! skipping anything that mutates the system. Tests substitute a recording
//! runner.

use crate::command_args::Invocation;
use crate::error::{OperationStatus, ProvisionError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup, kill_group};
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::thread;

/// Output from one external command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    /// Whether the command exited with code 0
    pub success: bool,
    /// True if the command was skipped by dry-run mode
    pub dry_run: bool,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: Some(0),
            success: true,
            ..Self::default()
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            success: false,
            ..Self::default()
        }
    }

    /// Placeholder output for a command skipped by dry-run mode
    pub fn skipped(command_line: &str) -> Self {
        Self {
            stdout: format!("[DRY RUN] Skipped: {}\n", command_line),
            exit_code: Some(0),
            success: true,
            dry_run: true,
            ..Self::default()
        }
    }

    /// Stdout split into lines
    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout.lines().map(str::to_string).collect()
    }

    /// Last `n` non-empty lines of stderr
    pub fn stderr_tail(&self, n: usize) -> Vec<&str> {
        let lines: Vec<&str> = self
            .stderr
            .lines()
            .filter(|l| !l.trim().is_empty())
            .collect();
        lines[lines.len().saturating_sub(n)..].to_vec()
    }

    pub fn status(&self) -> OperationStatus {
        match self.exit_code {
            Some(code) => OperationStatus::Exited(code),
            None => OperationStatus::Signaled,
        }
    }

    /// Classify the result, returning `PackageOperation` on failure
    pub fn ensure_success(&self, operation: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(ProvisionError::package_operation(operation, self.status()))
        }
    }
}

/// Executes invocations.
pub trait CommandRunner {
    /// Run to completion. `Err` means the process could not be launched.
    fn run(&mut self, invocation: &Invocation) -> std::io::Result<CommandOutput>;

    /// Whether system-mutating commands are being skipped
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Runs real processes.
#[derive(Debug, Default)]
pub struct SystemRunner {
    dry_run: bool,
}

impl SystemRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    fn spawn(invocation: &Invocation) -> std::io::Result<Child> {
        Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group()
            .spawn()
    }

    /// Stream stdout to the console line by line while collecting it.
    /// Stderr is drained on a separate thread so neither pipe can fill up.
    /// Output is read as bytes; invalid UTF-8 is replaced, never an error.
    fn wait_streaming(mut child: Child) -> std::io::Result<(String, String, std::process::ExitStatus)> {
        let stderr_handle = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                if let Err(e) = stderr.read_to_end(&mut buf) {
                    tracing::debug!("stderr drain stopped: {}", e);
                }
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let mut stdout = String::new();
        if let Some(pipe) = child.stdout.take() {
            let mut reader = BufReader::new(pipe);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        let text = text.trim_end_matches(['\n', '\r']);
                        println!("{}", text);
                        stdout.push_str(text);
                        stdout.push('\n');
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // Nobody reads stdout any more; the group must not outlive us
                        tracing::warn!("Lost stdout of PID {}: {}", child.id(), e);
                        kill_group(child.id());
                        let _ = child.wait();
                        return Err(e);
                    }
                }
            }
        }

        let status = child.wait()?;
        let stderr = stderr_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        Ok((stdout, stderr, status))
    }
}

impl CommandRunner for SystemRunner {
    fn run(&mut self, invocation: &Invocation) -> std::io::Result<CommandOutput> {
        let command_line = invocation.command_line();

        if self.dry_run && invocation.mutating {
            tracing::info!("[DRY RUN] Skipping: {}", command_line);
            return Ok(CommandOutput::skipped(&command_line));
        }

        tracing::info!("Running: {}", command_line);
        let child = Self::spawn(invocation)?;
        let pid = child.id();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid);
        }

        let result = if invocation.echo {
            Self::wait_streaming(child)
        } else {
            child.wait_with_output().map(|output| {
                (
                    String::from_utf8_lossy(&output.stdout).to_string(),
                    String::from_utf8_lossy(&output.stderr).to_string(),
                    output.status,
                )
            })
        };

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(pid);
        }

        let (stdout, stderr, status) = result?;
        let exit_code = status.code();
        tracing::debug!("{} finished with {:?}", invocation.program, exit_code);

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
            success: status.success(),
            dry_run: false,
        })
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(program: &str, args: &[&str], mutating: bool) -> Invocation {
        Invocation {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: Vec::new(),
            mutating,
            echo: false,
        }
    }

    #[test]
    fn test_output_helpers() {
        let out = CommandOutput::ok("a\nb\n");
        assert_eq!(out.stdout_lines(), ["a", "b"]);
        assert!(out.ensure_success("update").is_ok());

        let out = CommandOutput::failed(100, "W: one\n\nE: two\nE: three\n");
        assert_eq!(out.stderr_tail(2), ["E: two", "E: three"]);
        let err = out.ensure_success("upgrade").unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::PackageOperation {
                status: OperationStatus::Exited(100),
                ..
            }
        ));
    }

    #[test]
    fn test_signal_terminated_status() {
        let out = CommandOutput {
            exit_code: None,
            ..CommandOutput::default()
        };
        assert_eq!(out.status(), OperationStatus::Signaled);
    }

    #[test]
    fn test_system_runner_captures_stdout() {
        let mut runner = SystemRunner::new(false);
        let out = runner
            .run(&invocation("echo", &["hello"], false))
            .unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_system_runner_reports_exit_code() {
        let mut runner = SystemRunner::new(false);
        let out = runner
            .run(&invocation("sh", &["-c", "echo oops >&2; exit 3"], false))
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert!(out.stderr.contains("oops"));
    }

    #[test]
    fn test_system_runner_streaming() {
        let mut runner = SystemRunner::new(false);
        let mut inv = invocation("sh", &["-c", "echo one; echo two; echo err >&2"], false);
        inv.echo = true;
        let out = runner.run(&inv).unwrap();
        assert_eq!(out.stdout_lines(), ["one", "two"]);
        assert_eq!(out.stderr.trim(), "err");
    }

    #[test]
    fn test_streaming_survives_invalid_utf8_and_large_output() {
        let mut runner = SystemRunner::new(false);
        let mut inv = invocation(
            "sh",
            &[
                "-c",
                "printf 'ok\\n\\377\\n'; head -c 300000 /dev/zero | tr '\\0' a; \
                 printf '\\377' >&2; head -c 300000 /dev/zero | tr '\\0' b >&2; exit 7",
            ],
            false,
        );
        inv.echo = true;

        let out = runner.run(&inv).unwrap();
        assert_eq!(out.exit_code, Some(7));
        let lines = out.stdout_lines();
        assert_eq!(lines[0], "ok");
        assert_eq!(lines[1], "\u{FFFD}");
        assert_eq!(lines[2].len(), 300_000);
        assert!(out.stderr.starts_with('\u{FFFD}'));
        assert_eq!(out.stderr.matches('b').count(), 300_000);
    }

    #[test]
    fn test_missing_program_is_launch_error() {
        let mut runner = SystemRunner::new(false);
        let result = runner.run(&invocation("this_binary_does_not_exist_12345", &[], false));
        assert!(result.is_err());
    }

    #[test]
    fn test_dry_run_skips_mutating_commands() {
        let mut runner = SystemRunner::new(true);
        assert!(runner.is_dry_run());

        let out = runner
            .run(&invocation("this_binary_does_not_exist_12345", &["install"], true))
            .unwrap();
        assert!(out.dry_run);
        assert!(out.success);
        assert!(out.stdout.contains("[DRY RUN]"));

        // Read-only commands still execute
        let out = runner.run(&invocation("echo", &["query"], false)).unwrap();
        assert!(!out.dry_run);
        assert_eq!(out.stdout.trim(), "query");
    }
}
