// src/exec/batch.rs

//! Backend that packs units into batch jobs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::batch::{compute_num_nodes, BatchInterface, BatchJob, SubmitOutcome};
use crate::batch::script::{parse_exit_statuses, unit_payload};
use crate::batch::job::WALL_TIME_SLACK;
use crate::config::model::BatchSection;
use crate::exec::backend::{BackendFuture, ExecutionBackend, PollReport};
use crate::exec::classify::classify_batch_code;
use crate::exec::executor::{ExecSettings, LocalExecutor};
use crate::fs::FileSystem;
use crate::proc::{timeout_env_hint, ProcessInspector};
use crate::queue::unit::DEFAULT_TIMEOUT;
use crate::queue::{TestResult, TestUnit, UnitArena, UnitId};

/// Sizing and placement of generated jobs.
#[derive(Debug, Clone)]
pub struct JobLayout {
    pub scripts_dir: PathBuf,
    pub units_per_job: usize,
    pub ppn: u32,
    pub queue: Option<String>,
    pub account: Option<String>,
}

impl JobLayout {
    pub fn from_config(batch: &BatchSection, processors: u32) -> Self {
        Self {
            scripts_dir: batch.scripts_dir.clone(),
            units_per_job: batch.units_per_job.max(1),
            ppn: batch.ppn.unwrap_or(processors).max(1),
            queue: batch.queue.clone(),
            account: batch.account.clone(),
        }
    }
}

/// A unit that was prepared and placed in a job.
#[derive(Debug, Clone)]
struct Member {
    id: UnitId,
    xdir: String,
    log: PathBuf,
}

#[derive(Debug)]
pub struct BatchBackend {
    settings: Arc<ExecSettings>,
    inspector: Arc<dyn ProcessInspector>,
    fs: Arc<dyn FileSystem>,
    interface: BatchInterface,
    layout: JobLayout,
    /// Job name to the units it carries.
    members: BTreeMap<String, Vec<Member>>,
    failed_early: Vec<UnitId>,
    next_job: usize,
}

impl BatchBackend {
    pub fn new(
        settings: ExecSettings,
        inspector: Arc<dyn ProcessInspector>,
        fs: Arc<dyn FileSystem>,
        interface: BatchInterface,
        layout: JobLayout,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            inspector,
            fs,
            interface,
            layout,
            members: BTreeMap::new(),
            failed_early: Vec::new(),
            next_job: 0,
        }
    }

    pub fn interface(&self) -> &BatchInterface {
        &self.interface
    }

    fn fail_unit(&mut self, unit: &mut TestUnit, id: UnitId, log: Option<&PathBuf>, text: &str) {
        if unit.start.is_none() {
            unit.mark_started();
        }
        unit.mark_done(TestResult::Fail, Duration::ZERO);
        if let Some(log) = log {
            if let Err(e) = self.fs.append(log, text.as_bytes()) {
                warn!(unit = %unit.xdir, error = %format!("{e:#}"), "could not write to unit log");
            }
        }
        self.failed_early.push(id);
    }

    /// Init and prepare one unit; returns its payload lines on success.
    fn stage(&mut self, units: &mut UnitArena, id: UnitId) -> Option<(Member, Vec<String>, Duration)> {
        let unit = &mut units[id];
        let executor = match LocalExecutor::init(
            id,
            unit,
            Arc::clone(&self.settings),
            Arc::clone(&self.inspector),
        ) {
            Ok(executor) => executor,
            Err(err) => {
                error!(unit = %unit.xdir, error = %err, "unit init failed");
                self.fail_unit(unit, id, None, "");
                return None;
            }
        };

        let log = executor.exec_dir().join(self.settings.log_name());
        if let Err(err) = executor.prepare() {
            error!(unit = %unit.xdir, error = %err, "unit failed to stage");
            self.fail_unit(unit, id, Some(&log), &format!("vvexec: {err}\n"));
            return None;
        }

        let timeout = executor.timeout();
        let payload = unit_payload(
            &unit.xdir,
            executor.exec_dir(),
            executor.command_line(),
            timeout,
            self.settings.interrupt_to_kill,
            self.settings.log_name(),
        );
        unit.mark_started();
        let member = Member {
            id,
            xdir: unit.xdir.clone(),
            log,
        };
        Some((member, payload, timeout))
    }

    fn next_name(&mut self) -> String {
        let name = format!("vvexec_{:04}", self.next_job);
        self.next_job += 1;
        name
    }

    async fn launch_chunk(&mut self, units: &mut UnitArena, ids: &[UnitId]) {
        let mut members = Vec::new();
        let mut commands = Vec::new();
        let mut wall_time = WALL_TIME_SLACK;
        let mut np = 1;
        for &id in ids {
            let Some((member, payload, timeout)) = self.stage(units, id) else {
                continue;
            };
            let budget = if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout };
            wall_time += timeout_env_hint(budget).map(Duration::from_secs).unwrap_or(budget);
            np = np.max(units[id].np);
            commands.extend(payload);
            members.push(member);
        }
        if members.is_empty() {
            return;
        }

        let name = self.next_name();
        let dir = std::path::absolute(&self.layout.scripts_dir)
            .unwrap_or_else(|_| self.layout.scripts_dir.clone());
        let mut job = BatchJob::new(&name, dir.join(format!("{name}.sh")), dir.join(format!("{name}.log")));
        job.commands = commands;
        job.num_cores = np;
        job.num_nodes = compute_num_nodes(np, self.layout.ppn);
        job.wall_time = wall_time;
        job.queue = self.layout.queue.clone();
        job.account = self.layout.account.clone();

        if let Err(err) = self.interface.write_job(&job) {
            error!(job = %name, error = %format!("{err:#}"), "could not write job script");
            let text = format!("vvexec: could not write job script: {err:#}\n");
            for m in &members {
                self.fail_unit(&mut units[m.id], m.id, Some(&m.log), &text);
            }
            return;
        }

        match self.interface.submit(job).await {
            SubmitOutcome::Accepted { job_id } => {
                info!(job = %name, job_id = %job_id, units = members.len(), "units submitted");
                self.members.insert(name, members);
            }
            SubmitOutcome::Rejected(job) => {
                let text = format!(
                    "vvexec: batch submission failed\nsubmit stdout:\n{}\nsubmit stderr:\n{}\n",
                    job.submit_out, job.submit_err
                );
                for m in &members {
                    self.fail_unit(&mut units[m.id], m.id, Some(&m.log), &text);
                }
            }
        }
    }

    /// Classify every unit of a finished job from its `EXIT STATUS` lines.
    fn collect(&mut self, units: &mut UnitArena, job: &BatchJob, finished: &mut Vec<UnitId>) {
        let Some(members) = self.members.remove(&job.name) else {
            return;
        };
        let text = match self.fs.read_to_string(&job.log) {
            Ok(text) => text,
            Err(err) => {
                warn!(job = %job.name, error = %format!("{err:#}"), "job log unreadable");
                String::new()
            }
        };
        let statuses: BTreeMap<String, i32> = parse_exit_statuses(&text).into_iter().collect();

        for m in members {
            let unit = &mut units[m.id];
            let result = match statuses.get(&m.xdir) {
                Some(&code) => classify_batch_code(code, !unit.timeout.is_zero()),
                None => {
                    warn!(unit = %m.xdir, job = %job.name, "no exit status in job log");
                    TestResult::Fail
                }
            };
            let elapsed = unit
                .start
                .and_then(|s| s.elapsed().ok())
                .unwrap_or_default();
            unit.mark_done(result, elapsed);
            info!(unit = %m.xdir, result = ?result, "test finished");
            finished.push(m.id);
        }
    }
}

impl ExecutionBackend for BatchBackend {
    fn launch<'a>(&'a mut self, units: &'a mut UnitArena, ids: Vec<UnitId>) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let per_job = self.layout.units_per_job;
            for chunk in ids.chunks(per_job) {
                self.launch_chunk(units, chunk).await;
            }
            Ok(())
        })
    }

    fn poll<'a>(&'a mut self, units: &'a mut UnitArena) -> BackendFuture<'a, PollReport> {
        Box::pin(async move {
            let mut report = PollReport {
                finished: std::mem::take(&mut self.failed_early),
                jobs: Vec::new(),
            };
            for job in self.interface.poll().await {
                self.collect(units, &job, &mut report.finished);
                report.jobs.push(job.record());
            }
            Ok(report)
        })
    }

    fn cancel<'a>(&'a mut self, _units: &'a mut UnitArena) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.interface.cancel(None).await;
            Ok(())
        })
    }

    fn in_flight(&self) -> usize {
        self.members.values().map(Vec::len).sum::<usize>() + self.failed_early.len()
    }
}
