//! Provisioning run orchestration
//!
//! Drives one run through the stages of [`ProvisionStage`]: resolve the
//! session, open the log, mark files executable, snapshot the inventory,
//! refresh/upgrade/install/clean through apt, snapshot again, report.
//!
//! Only session resolution can abort a run. Every later problem is written to
//! the log, shown inline on the console, collected in the [`RunSummary`], and
//! the run moves on to the next stage.

use crate::command_args::Privilege;
use crate::command_runner::CommandRunner;
use crate::config::{PackageRequirement, PermissionTarget, SetupConfig};
use crate::console::Console;
use crate::error::{ProvisionError, Result};
use crate::inventory::{InventorySnapshot, InventorySnapshotter};
use crate::logger::SessionLog;
use crate::package_manager::{OperationRecord, PackageManager};
use crate::permissions::PermissionSetter;
use crate::provision_state::{ProvisionContext, ProvisionStage};
use crate::sanity;
use crate::session::ProvisioningSession;
use std::fmt;
use std::io::Write;
use std::path::Path;

/// Log marker preceding the pre-run inventory
pub const INITIAL_INVENTORY_MARKER: &str = "Initial packages installed";
/// Log marker preceding the post-run inventory
pub const FINAL_INVENTORY_MARKER: &str = "Final packages installed";

/// Number of stderr lines copied into the log for a failed operation
const STDERR_TAIL_LINES: usize = 5;

/// A recoverable problem and the stage it happened in
#[derive(Debug)]
pub struct Failure {
    pub stage: ProvisionStage,
    pub error: ProvisionError,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.error)
    }
}

/// Outcome of a completed run
#[derive(Debug, Default)]
pub struct RunSummary {
    pub failures: Vec<Failure>,
    /// Files visited by the permission phase
    pub files_marked: usize,
    /// Requirements whose install succeeded
    pub installed: Vec<String>,
    pub dry_run: bool,
    /// Log writes that failed after the first warning
    pub log_write_failures: usize,
    pub final_stage: Option<ProvisionStage>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure_messages(&self) -> Vec<String> {
        self.failures.iter().map(Failure::to_string).collect()
    }

    fn record(&mut self, stage: ProvisionStage, error: ProvisionError) {
        self.failures.push(Failure { stage, error });
    }
}

/// Mutable state of one run in progress
struct Run<'s, W: Write> {
    session: &'s ProvisioningSession,
    log: SessionLog<W>,
    ctx: ProvisionContext,
    summary: RunSummary,
}

/// Sequences a provisioning run.
pub struct Orchestrator<'a> {
    config: &'a SetupConfig,
    runner: &'a mut dyn CommandRunner,
    console: Console,
    privilege: Privilege,
    targets: Vec<PermissionTarget>,
    requirements: Vec<PackageRequirement>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a SetupConfig, runner: &'a mut dyn CommandRunner, console: Console) -> Self {
        let privilege = Privilege::resolve(config.use_sudo, sanity::is_running_as_root());
        Self {
            config,
            runner,
            console,
            privilege,
            targets: PermissionTarget::defaults(),
            requirements: PackageRequirement::defaults(),
        }
    }

    /// Override the escalation decision made from the effective user
    pub fn with_privilege(mut self, privilege: Privilege) -> Self {
        self.privilege = privilege;
        self
    }

    /// Replace the permission target list
    pub fn with_targets(mut self, targets: Vec<PermissionTarget>) -> Self {
        self.targets = targets;
        self
    }

    /// Run from the process working directory
    pub fn run_from_current_dir(&mut self) -> Result<RunSummary> {
        let session = ProvisioningSession::from_current_dir(self.config)?;
        Ok(self.run_with_file_log(&session))
    }

    /// Run as if launched from `launch_dir`.
    ///
    /// # Errors
    ///
    /// Only `Configuration`, when the session cannot be resolved.
    pub fn run(&mut self, launch_dir: &Path) -> Result<RunSummary> {
        let session = ProvisioningSession::resolve(launch_dir, self.config)?;
        Ok(self.run_with_file_log(&session))
    }

    fn run_with_file_log(&mut self, session: &ProvisioningSession) -> RunSummary {
        match SessionLog::open(session) {
            Ok(log) => self.run_session(session, log),
            Err(e) => {
                self.console.warning(&format!(
                    "Cannot open log {}: {}; continuing without a log file",
                    session.log_path().display(),
                    e
                ));
                let mut summary = self.new_summary();
                summary.record(ProvisionStage::Init, e);
                self.drive(session, SessionLog::<std::fs::File>::disabled(), summary)
            }
        }
    }

    /// Run every stage against an already-open log. Always reaches `Done`.
    pub fn run_session<W: Write>(
        &mut self,
        session: &ProvisioningSession,
        log: SessionLog<W>,
    ) -> RunSummary {
        let summary = self.new_summary();
        self.drive(session, log, summary)
    }

    fn new_summary(&self) -> RunSummary {
        RunSummary {
            dry_run: self.runner.is_dry_run(),
            ..RunSummary::default()
        }
    }

    fn drive<W: Write>(
        &mut self,
        session: &ProvisioningSession,
        log: SessionLog<W>,
        summary: RunSummary,
    ) -> RunSummary {
        let mut run = Run {
            session,
            log,
            ctx: ProvisionContext::new(),
            summary,
        };

        self.preflight(&mut run);
        self.set_permissions(&mut run);
        self.refresh_index(&mut run);
        self.upgrade(&mut run);
        self.install_dependencies(&mut run);
        self.cleanup(&mut run);
        self.report(&mut run);
        self.finish(run)
    }

    fn preflight<W: Write>(&mut self, run: &mut Run<'_, W>) {
        self.console.phase(&format!(
            "Pilomar setup (root {})",
            run.session.root_path().display()
        ));
        if !run.log.is_enabled() {
            self.console.info("Session log disabled for this run");
        } else if let Some(path) = run.log.path() {
            self.console.info(&format!("Logging to {}", path.display()));
        }
        if run.summary.dry_run {
            self.console
                .warning("Dry run: packages and file permissions will not be changed");
            self.log(run, "Dry run: packages and file permissions will not be changed");
        }

        let report = sanity::verify_environment(self.config);
        if report.is_ok(self.privilege) {
            self.log(run, "Preflight checks passed");
        }
        for warning in report.warnings(self.privilege) {
            self.console.warning(&warning);
            self.log(run, format!("WARNING: {}", warning));
        }
    }

    fn set_permissions<W: Write>(&mut self, run: &mut Run<'_, W>) {
        let stage = ProvisionStage::PermissionsSet;
        self.begin(run, stage);

        let setter = PermissionSetter::new(run.summary.dry_run);
        let report = setter.apply(run.session.root_path(), &self.targets);

        run.summary.files_marked = report.file_count();
        if report.is_clean() {
            tracing::info!("All permission targets processed");
        }

        for outcome in report.applied {
            let message = format!(
                "{}: {} file(s), {} changed",
                outcome.target.display(),
                outcome.files.len(),
                outcome.changed
            );
            self.console.info(&message);
            self.log(run, message);
            for file in &outcome.files {
                self.log(run, format!("  {}", file.display()));
            }
            for error in outcome.failures {
                self.fail(run, stage, error);
            }
        }

        for error in report.failures {
            self.fail(run, stage, error);
        }

        self.complete(run, stage);
    }

    fn refresh_index<W: Write>(&mut self, run: &mut Run<'_, W>) {
        let stage = ProvisionStage::IndexRefreshed;

        self.console.phase(INITIAL_INVENTORY_MARKER);
        self.write_inventory(run, INITIAL_INVENTORY_MARKER);

        self.begin(run, stage);
        let mut pm = PackageManager::new(&mut *self.runner, self.privilege);
        let result = pm.refresh_index();
        let records = pm.take_records();
        self.log_records(run, records);
        if let Err(error) = result {
            self.fail(run, stage, error);
        }

        self.complete(run, stage);
    }

    fn upgrade<W: Write>(&mut self, run: &mut Run<'_, W>) {
        let stage = ProvisionStage::Upgraded;
        self.begin(run, stage);

        let mut pm = PackageManager::new(&mut *self.runner, self.privilege);
        let result = pm.upgrade_all();
        let records = pm.take_records();
        self.log_records(run, records);
        if let Err(error) = result {
            self.fail(run, stage, error);
        }

        self.complete(run, stage);
    }

    fn install_dependencies<W: Write>(&mut self, run: &mut Run<'_, W>) {
        let stage = ProvisionStage::DependenciesInstalled;
        self.begin(run, stage);

        let requirements = self.requirements.clone();
        for requirement in &requirements {
            let marker = format!("Installing {}", requirement.name);
            self.console.info(&marker);
            self.log(run, &marker);

            let mut pm = PackageManager::new(&mut *self.runner, self.privilege);
            let result = pm.install_named(requirement);
            let records = pm.take_records();
            self.log_records(run, records);

            match result {
                Ok(()) => run.summary.installed.push(requirement.name.clone()),
                Err(error) => self.fail(run, stage, error),
            }
        }

        self.complete(run, stage);
    }

    fn cleanup<W: Write>(&mut self, run: &mut Run<'_, W>) {
        let stage = ProvisionStage::CleanedUp;
        self.begin(run, stage);

        let mut pm = PackageManager::new(&mut *self.runner, self.privilege);
        let result = pm.cleanup();
        let records = pm.take_records();
        self.log_records(run, records);
        if let Err(error) = result {
            self.fail(run, stage, error);
        }

        self.complete(run, stage);
    }

    fn report<W: Write>(&mut self, run: &mut Run<'_, W>) {
        let stage = ProvisionStage::Reported;
        self.begin(run, stage);
        self.write_inventory(run, FINAL_INVENTORY_MARKER);

        let totals = format!(
            "Provisioning finished: {} file(s) made executable, {} of {} dependencies installed, {} problem(s)",
            run.summary.files_marked,
            run.summary.installed.len(),
            self.requirements.len(),
            run.summary.failures.len()
        );
        self.log(run, totals);
        let messages = run.summary.failure_messages();
        for message in messages {
            self.log(run, format!("  {}", message));
        }
        self.log(run, "==== Provisioning session finished ====");

        self.complete(run, stage);
    }

    fn finish<W: Write>(&mut self, mut run: Run<'_, W>) -> RunSummary {
        self.complete(&mut run, ProvisionStage::Done);

        let Run {
            log,
            ctx,
            mut summary,
            ..
        } = run;

        if let Err(e) = log.close() {
            self.console.warning(&e.to_string());
            summary.log_write_failures += 1;
        }

        if !ctx.is_done() {
            tracing::error!("Run ended at stage {}", ctx.current_stage());
        }
        summary.final_stage = Some(ctx.current_stage());
        self.console.summary(&summary.failure_messages());
        self.console.banner();
        summary
    }

    /// Capture all three inventories under a marker line
    fn write_inventory<W: Write>(&mut self, run: &mut Run<'_, W>, marker: &str) {
        let snapshots: Vec<InventorySnapshot> =
            InventorySnapshotter::new(&mut *self.runner, &self.config.pip_command).capture_all();

        self.log(run, marker);
        for snapshot in snapshots {
            self.console
                .info(&format!("{}: {} line(s)", snapshot.header(), snapshot.lines.len()));
            if let Err(e) = run.log.write_section(&snapshot.header(), &snapshot.lines) {
                self.log_failed(run, e);
            }
        }
    }

    fn log_records<W: Write>(&mut self, run: &mut Run<'_, W>, records: Vec<OperationRecord>) {
        for record in records {
            self.log(run, format!("Running: {}", record.command_line));
            match (&record.output, &record.launch_error) {
                (Some(output), _) if output.dry_run => {
                    self.log(run, format!("Skipped (dry run): {}", record.operation));
                }
                (Some(_), _) if record.succeeded() => {
                    self.log(run, format!("Completed: {}", record.operation));
                }
                (Some(output), _) => {
                    self.log(
                        run,
                        format!("Failed: {} ({})", record.operation, output.status()),
                    );
                    for line in output.stderr_tail(STDERR_TAIL_LINES) {
                        self.log(run, format!("  {}", line));
                    }
                }
                (None, reason) => {
                    self.log(
                        run,
                        format!(
                            "Could not launch {}: {}",
                            record.operation,
                            reason.as_deref().unwrap_or("unknown error")
                        ),
                    );
                }
            }
        }
    }

    fn begin<W: Write>(&mut self, run: &mut Run<'_, W>, stage: ProvisionStage) {
        self.console.phase(stage.description());
        self.log(run, stage.description());
    }

    fn complete<W: Write>(&mut self, run: &mut Run<'_, W>, stage: ProvisionStage) {
        if let Err(e) = run.ctx.transition_to(stage) {
            tracing::error!("Stage transition rejected: {}", e);
        }
    }

    /// Record a recoverable failure on console, log and summary
    fn fail<W: Write>(&mut self, run: &mut Run<'_, W>, stage: ProvisionStage, error: ProvisionError) {
        self.console.warning(&error.to_string());
        self.log(run, format!("WARNING: {}", error));
        run.summary.record(stage, error);
    }

    /// Write to the session log; a failure warns once and never stops the run
    fn log<W: Write>(&mut self, run: &mut Run<'_, W>, text: impl AsRef<str>) {
        if let Err(e) = run.log.write(text) {
            self.log_failed(run, e);
        }
    }

    fn log_failed<W: Write>(&mut self, run: &mut Run<'_, W>, error: ProvisionError) {
        if run.summary.log_write_failures == 0 {
            self.console.warning(&error.to_string());
            let stage = run.ctx.current_stage();
            run.summary.record(stage, error);
        } else {
            tracing::debug!("Further log write failure: {}", error);
        }
        run.summary.log_write_failures += 1;
    }
}
