// src/exec/local.rs

//! Backend that runs each unit as a child process tree on this machine.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, warn};

use crate::exec::backend::{BackendFuture, ExecutionBackend, PollReport};
use crate::exec::executor::{ExecSettings, LocalExecutor};
use crate::proc::{KillGrace, ProcessInspector};
use crate::queue::{TestResult, UnitArena, UnitId};

#[derive(Debug)]
pub struct LocalBackend {
    settings: Arc<ExecSettings>,
    inspector: Arc<dyn ProcessInspector>,
    grace: KillGrace,
    running: BTreeMap<UnitId, LocalExecutor>,
    /// Units that failed before an executor existed.
    failed_early: Vec<UnitId>,
}

impl LocalBackend {
    pub fn new(settings: ExecSettings, inspector: Arc<dyn ProcessInspector>) -> Self {
        Self {
            settings: Arc::new(settings),
            inspector,
            grace: KillGrace::default(),
            running: BTreeMap::new(),
            failed_early: Vec::new(),
        }
    }

    pub fn with_kill_grace(mut self, grace: KillGrace) -> Self {
        self.grace = grace;
        self
    }

    fn launch_one(&mut self, units: &mut UnitArena, id: UnitId) {
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
                unit.mark_started();
                unit.mark_done(TestResult::Fail, Default::default());
                self.failed_early.push(id);
                return;
            }
        };

        let mut executor = executor;
        // Start failures are already recorded on the unit; its next poll
        // reports it done.
        let _ = executor.start(unit);
        self.running.insert(id, executor);
    }
}

impl ExecutionBackend for LocalBackend {
    fn launch<'a>(
        &'a mut self,
        units: &'a mut UnitArena,
        ids: Vec<UnitId>,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            for id in ids {
                self.launch_one(units, id);
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

            for (&id, executor) in self.running.iter_mut() {
                let unit = &mut units[id];
                match executor.poll(unit).await {
                    Ok(true) => report.finished.push(id),
                    Ok(false) => {}
                    Err(err) => {
                        error!(unit = %unit.xdir, error = %err, "poll failed; marking unit failed");
                        unit.mark_done(TestResult::Fail, Default::default());
                        report.finished.push(id);
                    }
                }
            }
            for id in &report.finished {
                self.running.remove(id);
            }
            Ok(report)
        })
    }

    fn cancel<'a>(&'a mut self, units: &'a mut UnitArena) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let grace = self.grace;
            for (&id, executor) in self.running.iter_mut() {
                let unit = &mut units[id];
                if let Err(err) = executor.kill(unit, grace).await {
                    warn!(unit = %unit.xdir, error = %err, "failed to kill unit");
                }
            }
            Ok(())
        })
    }

    fn in_flight(&self) -> usize {
        self.running.len() + self.failed_early.len()
    }
}
