// End-to-end provisioning runs against a temporary project tree.
//
// Package commands never reach the real system: a recording CommandRunner
// answers every invocation and remembers the command lines it was given.

use std::cell::RefCell;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::rc::Rc;

use pilomar_setup::command_args::{Invocation, Privilege};
use pilomar_setup::command_runner::{CommandOutput, CommandRunner};
use pilomar_setup::config::SetupConfig;
use pilomar_setup::console::{Console, MANUAL_STEPS};
use pilomar_setup::orchestrator::{Orchestrator, RunSummary};
use pilomar_setup::provision_state::ProvisionStage;
use tempfile::TempDir;

#[derive(Default)]
struct RecordingRunner {
    calls: Vec<String>,
    /// Any command line containing one of these fails with exit status 100
    fail_matching: Vec<&'static str>,
    dry_run: bool,
}

impl RecordingRunner {
    fn failing(patterns: &[&'static str]) -> Self {
        Self {
            fail_matching: patterns.to_vec(),
            ..Self::default()
        }
    }

    fn calls_containing(&self, needle: &str) -> Vec<&str> {
        self.calls
            .iter()
            .filter(|c| c.contains(needle))
            .map(String::as_str)
            .collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&mut self, invocation: &Invocation) -> io::Result<CommandOutput> {
        let line = invocation.command_line();
        self.calls.push(line.clone());

        if self.dry_run && invocation.mutating {
            return Ok(CommandOutput::skipped(&line));
        }
        if self.fail_matching.iter().any(|p| line.contains(p)) {
            return Ok(CommandOutput::failed(100, "E: Unable to locate package"));
        }
        match invocation.program.as_str() {
            "dpkg" => Ok(CommandOutput::ok("ii  bash  5.2.15\nii  python3  3.11.2\n")),
            "pip3" => Ok(CommandOutput::ok("numpy 1.24.2\n")),
            "apt" => Ok(CommandOutput::ok("bash/stable,now 5.2.15 arm64 [installed]\n")),
            _ => Ok(CommandOutput::ok("")),
        }
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Console sink the test can read back after the run
#[derive(Clone, Default)]
struct CapturedConsole(Rc<RefCell<Vec<u8>>>);

impl CapturedConsole {
    fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.borrow())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for CapturedConsole {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Pilomar checkout with the four permission targets and a file in each
fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    for (sub, file) in [
        ("src", "pilomar.py"),
        ("setup", "setup.sh"),
        ("circuitpython", "code.py"),
        ("circuitpython/tiny2350", "code.py"),
    ] {
        let sub = dir.path().join(sub);
        fs::create_dir_all(&sub).unwrap();
        let path = sub.join(file);
        fs::write(&path, "# pilomar\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
    }
    dir
}

fn run(dir: &TempDir, runner: &mut RecordingRunner) -> RunSummary {
    let config = SetupConfig::default();
    let mut orchestrator =
        Orchestrator::new(&config, runner, Console::plain()).with_privilege(Privilege::Direct);
    orchestrator.run(&dir.path().join("setup")).unwrap()
}

fn log_text(dir: &TempDir) -> String {
    fs::read_to_string(dir.path().join("log/setup.log")).unwrap()
}

fn mode(path: &Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o777
}

/// Assert that every marker appears in `text`, in the given order
fn assert_in_order(text: &str, markers: &[&str]) {
    let mut from = 0;
    for marker in markers {
        match text[from..].find(marker) {
            Some(pos) => from += pos + marker.len(),
            None => panic!("'{}' not found after byte {} in log:\n{}", marker, from, text),
        }
    }
}

#[test]
fn test_log_sections_appear_in_order() {
    let dir = project();
    let mut runner = RecordingRunner::default();
    let summary = run(&dir, &mut runner);

    assert!(summary.is_clean(), "{:?}", summary.failure_messages());
    assert_eq!(summary.final_stage, Some(ProvisionStage::Done));

    assert_in_order(
        &log_text(&dir),
        &[
            "Starting new log",
            "Making source codes and scripts executable",
            "Initial packages installed",
            "dpkg packages (dpkg -l):",
            "ii  bash  5.2.15",
            "pip packages (pip3 list):",
            "numpy 1.24.2",
            "apt packages (apt list --installed):",
            "Updating the operating system",
            "Running: apt-get update",
            "Installing python3-skyfield",
            "Installing python3-opencv",
            "Installing python3-astroalign",
            "Installing python3-pandas",
            "Installing python3-astropy",
            "Running: apt-get -y autoremove",
            "Running: apt-get clean",
            "Final packages installed",
            "dpkg packages (dpkg -l):",
            "pip packages (pip3 list):",
            "apt packages (apt list --installed):",
            "Provisioning finished",
            "Provisioning session finished",
        ],
    );
}

#[test]
fn test_every_log_line_is_timestamped() {
    let dir = project();
    run(&dir, &mut RecordingRunner::default());

    for line in log_text(&dir).lines() {
        // "YYYY-MM-DD HH:MM:SS "
        assert!(line.len() >= 20, "short line: {:?}", line);
        assert_eq!(&line[4..5], "-");
        assert_eq!(&line[10..11], " ");
        assert_eq!(&line[16..17], ":");
    }
}

#[test]
fn test_files_are_made_executable() {
    let dir = project();
    let summary = run(&dir, &mut RecordingRunner::default());

    assert_eq!(summary.files_marked, 4);
    assert_eq!(mode(&dir.path().join("src/pilomar.py")), 0o755);
    assert_eq!(mode(&dir.path().join("setup/setup.sh")), 0o755);
    assert_eq!(mode(&dir.path().join("circuitpython/tiny2350/code.py")), 0o755);
}

#[test]
fn test_installs_each_package_once_in_order_despite_failures() {
    let dir = project();
    let mut runner = RecordingRunner::failing(&["install"]);
    let summary = run(&dir, &mut runner);

    assert_eq!(
        runner.calls_containing(" install "),
        [
            "apt-get -y install python3-skyfield",
            "apt-get -y install python3-opencv",
            "apt-get -y install python3-astroalign",
            "apt-get -y install python3-pandas",
            "apt-get -y install python3-astropy",
        ]
    );
    assert_eq!(summary.failures.len(), 5);
    assert!(
        summary
            .failures
            .iter()
            .all(|f| f.stage == ProvisionStage::DependenciesInstalled)
    );
    assert!(log_text(&dir).contains("Failed: install python3-opencv (exit status 100)"));
}

#[test]
fn test_done_is_reached_when_every_package_operation_fails() {
    let dir = project();
    let mut runner = RecordingRunner::failing(&["apt-get"]);
    let summary = run(&dir, &mut runner);

    assert_eq!(summary.final_stage, Some(ProvisionStage::Done));
    assert!(summary.installed.is_empty());
    // cleanup runs both steps even after autoremove fails
    assert_eq!(runner.calls_containing("apt-get clean").len(), 1);
    assert!(log_text(&dir).contains("Provisioning session finished"));
}

#[test]
fn test_second_run_appends_to_log() {
    let dir = project();
    run(&dir, &mut RecordingRunner::default());
    let first = log_text(&dir);

    run(&dir, &mut RecordingRunner::default());
    let second = log_text(&dir);

    assert!(second.len() > first.len());
    assert!(second.starts_with(&first));
    assert!(second[first.len()..].contains("Appending to existing log"));
}

#[test]
fn test_missing_target_does_not_stop_the_run() {
    let dir = project();
    fs::remove_dir_all(dir.path().join("circuitpython")).unwrap();

    let summary = run(&dir, &mut RecordingRunner::default());

    // circuitpython and circuitpython/tiny2350
    assert_eq!(summary.failures.len(), 2);
    assert!(
        summary
            .failures
            .iter()
            .all(|f| f.stage == ProvisionStage::PermissionsSet)
    );
    assert_eq!(mode(&dir.path().join("src/pilomar.py")), 0o755);
    assert_eq!(summary.installed.len(), 5);
}

#[test]
fn test_wrong_launch_directory_is_fatal() {
    let dir = project();
    let config = SetupConfig::default();
    let mut runner = RecordingRunner::default();
    let mut orchestrator = Orchestrator::new(&config, &mut runner, Console::plain());

    let err = orchestrator.run(&dir.path().join("src")).unwrap_err();
    assert!(err.is_fatal());
    assert!(!dir.path().join("log").exists());
}

#[test]
fn test_dry_run_changes_nothing() {
    let dir = project();
    let mut runner = RecordingRunner {
        dry_run: true,
        ..RecordingRunner::default()
    };
    let summary = run(&dir, &mut runner);

    assert!(summary.dry_run);
    assert!(summary.is_clean());
    assert_eq!(mode(&dir.path().join("src/pilomar.py")), 0o644);

    let log = log_text(&dir);
    assert!(log.contains("Dry run"));
    assert!(log.contains("Skipped (dry run): install python3-astropy"));
    // inventory queries still run
    assert!(log.contains("ii  bash  5.2.15"));
}

#[test]
fn test_sudo_prefixes_package_commands_only() {
    let dir = project();
    let config = SetupConfig::default();
    let mut runner = RecordingRunner::default();
    let mut orchestrator =
        Orchestrator::new(&config, &mut runner, Console::plain()).with_privilege(Privilege::Sudo);
    orchestrator.run(&dir.path().join("setup")).unwrap();

    assert!(
        runner
            .calls
            .contains(&"sudo -n DEBIAN_FRONTEND=noninteractive apt-get update".to_string())
    );
    assert!(runner.calls.contains(&"dpkg -l".to_string()));
    assert!(runner.calls_containing("sudo dpkg").is_empty());
}

#[test]
fn test_banner_is_printed_last_after_summary() {
    let dir = project();
    let config = SetupConfig::default();
    let captured = CapturedConsole::default();
    let mut runner = RecordingRunner::failing(&["python3-pandas"]);
    let mut orchestrator =
        Orchestrator::new(&config, &mut runner, Console::with_writer(false, captured.clone()))
            .with_privilege(Privilege::Direct);
    orchestrator.run(&dir.path().join("setup")).unwrap();

    let lines = captured.lines();
    let position = |needle: &str| {
        lines
            .iter()
            .position(|l| l.contains(needle))
            .unwrap_or_else(|| panic!("'{}' not printed: {:#?}", needle, lines))
    };

    let summary = position("1 step(s) reported problems:");
    let failure = position("  - Installing dependencies: Package operation 'install python3-pandas'");
    let banner = position("Pilomar setup complete");
    assert!(position("==> Making source codes and scripts executable") < summary);
    assert!(summary < failure);
    assert!(failure < banner);

    let last_step = MANUAL_STEPS[MANUAL_STEPS.len() - 1];
    assert!(lines.last().unwrap().ends_with(last_step));
}

#[test]
fn test_unmarkable_file_is_reported_and_siblings_still_marked() {
    let dir = project();
    let src = dir.path().join("src");
    std::os::unix::fs::symlink(src.join("missing.py"), src.join("dangling.py")).unwrap();
    fs::write(src.join("zeta.py"), "# pilomar\n").unwrap();
    fs::set_permissions(src.join("zeta.py"), fs::Permissions::from_mode(0o644)).unwrap();

    let summary = run(&dir, &mut RecordingRunner::default());

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].stage, ProvisionStage::PermissionsSet);
    assert!(summary.failures[0].to_string().contains("dangling.py"));
    assert_eq!(mode(&src.join("pilomar.py")), 0o755);
    assert_eq!(mode(&src.join("zeta.py")), 0o755);
    assert_eq!(summary.files_marked, 5);
    assert!(log_text(&dir).contains("dangling.py"));
}
