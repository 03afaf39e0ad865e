// src/exec/executor.rs

//! Lifecycle of one locally executed test unit.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::model::ConfigSection;
use crate::errors::{Result, VvexecError};
use crate::exec::classify::classify_exit;
use crate::exec::clean::{clean_dir, KeepList, BASELINE_LOG, EXECUTE_LOG};
use crate::exec::staging::StagingPlan;
use crate::proc::{
    timeout_env_hint, EscalationState, KillGrace, Output, ProcessGroup, ProcessInspector,
};
use crate::queue::{RunState, TestResult, TestUnit, UnitId};

/// Harness-wide knobs that shape how each unit is run.
#[derive(Debug, Clone)]
pub struct ExecSettings {
    pub test_root: PathBuf,
    pub logfile: bool,
    pub preclean: bool,
    pub postclean: bool,
    pub baseline: bool,
    pub analyze: bool,
    pub mpi_opts: Option<String>,
    pub interrupt_to_kill: Duration,
}

impl ExecSettings {
    pub fn from_config(cfg: &ConfigSection) -> Self {
        Self {
            test_root: cfg.test_root.clone(),
            logfile: cfg.logfile,
            preclean: cfg.preclean,
            postclean: cfg.postclean,
            baseline: cfg.baseline,
            analyze: cfg.analyze,
            mpi_opts: cfg.mpi_opts.clone().filter(|s| !s.trim().is_empty()),
            interrupt_to_kill: cfg.interrupt_to_kill,
        }
    }

    pub fn log_name(&self) -> &'static str {
        if self.baseline {
            BASELINE_LOG
        } else {
            EXECUTE_LOG
        }
    }
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self::from_config(&ConfigSection::default())
    }
}

/// Full argument vector for a unit under the given settings.
pub fn command_line(unit: &TestUnit, settings: &ExecSettings) -> Vec<String> {
    let mut argv = unit.command.clone();
    if settings.baseline {
        argv.push("--baseline".to_string());
    }
    if settings.analyze && unit.is_parent() {
        argv.push("--analyze".to_string());
    }
    if let Some(opts) = &settings.mpi_opts {
        argv.push("--mpirun_opts".to_string());
        argv.push(opts.clone());
    }
    argv
}

/// Runs one unit: `init` once, `start` once, then `poll` until it reports
/// done. The unit record itself stays in the arena and is passed in.
#[derive(Debug)]
pub struct LocalExecutor {
    id: UnitId,
    xdir: String,
    exec_dir: PathBuf,
    command: Vec<String>,
    timeout: Duration,
    is_child: bool,
    staging: StagingPlan,
    keep: KeepList,
    settings: Arc<ExecSettings>,
    inspector: Arc<dyn ProcessInspector>,
    handle: Option<ProcessGroup>,
    started_at: Option<Instant>,
    timed_out: bool,
}

impl LocalExecutor {
    /// Create the execute directory, resolve staging and build the command
    /// line. Nothing is launched.
    pub fn init(
        id: UnitId,
        unit: &TestUnit,
        settings: Arc<ExecSettings>,
        inspector: Arc<dyn ProcessInspector>,
    ) -> Result<Self> {
        let exec_dir = std::path::absolute(settings.test_root.join(&unit.xdir))?;
        fs::create_dir_all(&exec_dir)?;

        let base = unit.source_dir.clone().unwrap_or_else(|| exec_dir.clone());
        let staging = StagingPlan::resolve(unit, &base).map_err(|reason| VvexecError::Staging {
            xdir: unit.xdir.clone(),
            reason,
        })?;

        let keep = match unit.command.first() {
            Some(program) => KeepList::standard().with_script(program),
            None => KeepList::standard(),
        };

        Ok(Self {
            id,
            xdir: unit.xdir.clone(),
            exec_dir,
            command: command_line(unit, &settings),
            timeout: unit.timeout,
            is_child: unit.parent().is_some(),
            staging,
            keep,
            settings,
            inspector,
            handle: None,
            started_at: None,
            timed_out: false,
        })
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn exec_dir(&self) -> &Path {
        &self.exec_dir
    }

    pub fn command_line(&self) -> &[String] {
        &self.command
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.settings
            .logfile
            .then(|| self.exec_dir.join(self.settings.log_name()))
    }

    pub fn escalation(&self) -> Option<EscalationState> {
        self.handle.as_ref().map(ProcessGroup::escalation)
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Pre-clean (unless baseline/analyze) and materialize staged files.
    pub fn prepare(&self) -> Result<()> {
        if self.settings.preclean && !self.settings.baseline && !self.settings.analyze {
            clean_dir(&self.exec_dir, &self.keep)?;
        }
        self.staging.apply(&self.exec_dir).map_err(|e| VvexecError::Staging {
            xdir: self.xdir.clone(),
            reason: format!("{e:#}"),
        })
    }

    /// Prepare the directory and launch the command. A failure marks the
    /// unit done with `fail` and is returned for logging; the error text
    /// is also written to the unit's log.
    pub fn start(&mut self, unit: &mut TestUnit) -> Result<()> {
        unit.mark_started();
        self.started_at = Some(Instant::now());

        let res = self.prepare().and_then(|()| self.spawn());
        if let Err(err) = &res {
            error!(unit = %self.xdir, error = %err, "unit failed to start");
            self.append_to_log(&format!("\nvvexec: {err}\n"));
            unit.mark_done(TestResult::Fail, Duration::ZERO);
        }
        res
    }

    fn spawn(&mut self) -> Result<()> {
        let output = match self.log_path() {
            Some(path) => {
                let mut file = File::create(&path)?;
                self.write_header(&mut file)?;
                Output::File(file)
            }
            None => Output::Inherit,
        };

        let hint = timeout_env_hint(self.timeout);
        let handle = ProcessGroup::launch(&self.command, &self.exec_dir, hint, output)
            .map_err(|source| VvexecError::Launch {
                xdir: self.xdir.clone(),
                source,
            })?;

        info!(
            unit = %self.xdir,
            pid = handle.pid(),
            timeout_secs = self.timeout.as_secs(),
            "started test"
        );
        self.handle = Some(handle);
        Ok(())
    }

    fn write_header(&self, file: &mut File) -> std::io::Result<()> {
        writeln!(file, "Starting test: {}", self.xdir)?;
        writeln!(file, "Directory: {}", self.exec_dir.display())?;
        writeln!(file, "Command: {}", shell_words::join(&self.command))?;
        writeln!(file, "Timeout: {}", self.timeout.as_secs())?;
        writeln!(file)?;
        file.flush()
    }

    /// Append to the unit log, if logging is enabled. Failures are only logged.
    pub fn append_to_log(&self, text: &str) {
        let Some(path) = self.log_path() else {
            return;
        };
        let res = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(text.as_bytes()));
        if let Err(e) = res {
            warn!(unit = %self.xdir, error = %e, "could not write to unit log");
        }
    }

    /// Non-blocking check of the unit's process.
    pub async fn poll(&mut self, unit: &mut TestUnit) -> Result<bool> {
        self.poll_at(unit, Instant::now()).await
    }

    /// [`poll`](Self::poll) with an explicit clock reading.
    ///
    /// Returns `Ok(true)` once the unit is done; later calls leave the
    /// recorded result and elapsed time untouched.
    pub async fn poll_at(&mut self, unit: &mut TestUnit, now: Instant) -> Result<bool> {
        match unit.state {
            RunState::Done => return Ok(true),
            RunState::NotRun => return Err(VvexecError::UnitNotStarted(self.xdir.clone())),
            RunState::NotDone => {}
        }
        let (Some(handle), Some(started)) = (self.handle.as_mut(), self.started_at) else {
            return Err(VvexecError::UnitNotStarted(self.xdir.clone()));
        };
        let elapsed = now.saturating_duration_since(started);

        match handle.try_wait() {
            Ok(Some(status)) => {
                let result = classify_exit(status, self.timed_out);
                self.finish(unit, result, elapsed);
                Ok(true)
            }
            Ok(None) => {
                self.check_timeout(now, elapsed).await;
                Ok(false)
            }
            Err(e) => {
                warn!(unit = %self.xdir, error = %e, "wait on test process failed");
                let result = if self.timed_out {
                    TestResult::Timeout
                } else {
                    TestResult::Fail
                };
                self.finish(unit, result, elapsed);
                Ok(true)
            }
        }
    }

    async fn check_timeout(&mut self, now: Instant, elapsed: Duration) {
        if self.timeout.is_zero() || elapsed <= self.timeout {
            return;
        }
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        match handle.escalation() {
            EscalationState::None => {
                self.timed_out = true;
                handle.interrupt(&*self.inspector, now).await;
                warn!(
                    unit = %self.xdir,
                    pid = handle.pid(),
                    timeout_secs = self.timeout.as_secs(),
                    "timeout exceeded; sent SIGINT"
                );
            }
            EscalationState::Interrupted { at }
                if now.saturating_duration_since(at) > self.settings.interrupt_to_kill =>
            {
                handle.kill(&*self.inspector, now).await;
                warn!(
                    unit = %self.xdir,
                    pid = handle.pid(),
                    "still running after interrupt window; sent SIGKILL"
                );
            }
            _ => {}
        }
    }

    fn finish(&mut self, unit: &mut TestUnit, result: TestResult, elapsed: Duration) {
        unit.mark_done(result, elapsed);
        info!(
            unit = %self.xdir,
            result = ?result,
            elapsed_secs = elapsed.as_secs_f64(),
            "test finished"
        );

        if self.settings.postclean && result == TestResult::Pass && !self.is_child {
            if let Err(e) = clean_dir(&self.exec_dir, &self.keep) {
                warn!(unit = %self.xdir, error = %e, "post-clean failed");
            }
        }
    }

    /// Cancel a running unit with the bounded two-phase kill. The unit is
    /// marked done if its process could be reaped.
    pub async fn kill(&mut self, unit: &mut TestUnit, grace: KillGrace) -> Result<()> {
        if unit.state != RunState::NotDone {
            return Ok(());
        }
        let (Some(handle), Some(started)) = (self.handle.as_mut(), self.started_at) else {
            return Ok(());
        };
        let status = handle.escalate(&*self.inspector, grace).await?;
        if let Some(status) = status {
            let elapsed = started.elapsed();
            let result = classify_exit(status, self.timed_out);
            self.finish(unit, result, elapsed);
        } else {
            warn!(unit = %self.xdir, "process did not exit after SIGKILL");
        }
        Ok(())
    }
}
