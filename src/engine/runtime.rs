// src/engine/runtime.rs

use std::fmt;
use std::future::Future;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::exec::{ExecutionBackend, PollReport};
use crate::queue::UnitId;
use crate::results::{ResultsSink, RunSummary, UnitRecord};

use super::core::CoreRuntime;
use super::{CoreCommand, CoreStep, RuntimeEvent, RuntimeOptions};

/// Drives the run queue on a fixed tick and delegates execution to an
/// [`ExecutionBackend`].
///
/// This is a pure IO shell around [`CoreRuntime`], which holds all the
/// scheduling semantics. Every tick is one non-blocking poll of the
/// backend followed by one core step.
pub struct Runtime<B: ExecutionBackend> {
    core: CoreRuntime,
    backend: B,
    sink: Box<dyn ResultsSink>,
    options: RuntimeOptions,
}

impl<B: ExecutionBackend> fmt::Debug for Runtime<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<B: ExecutionBackend> Runtime<B> {
    pub fn new(
        core: CoreRuntime,
        backend: B,
        sink: Box<dyn ResultsSink>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            core,
            backend,
            sink,
            options,
        }
    }

    /// Run until every unit is finished or Ctrl-C arrives.
    pub async fn run(self) -> Result<RunSummary> {
        self.run_until(ctrl_c()).await
    }

    /// Run until every unit is finished or `shutdown` resolves.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        info!(
            units = self.core.units().len(),
            poll_interval = ?self.options.poll_interval,
            "vvexec runtime started"
        );
        tokio::pin!(shutdown);

        let mut ticker = interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let step = self.core.step(RuntimeEvent::Tick);
        let mut keep_running = self.execute(step).await?;

        while keep_running {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.backend.poll(self.core.units_mut()).await?;
                    let event = self.absorb(report);
                    let step = self.core.step(event);
                    keep_running = self.execute(step).await?;
                }
                _ = &mut shutdown => {
                    warn!(in_flight = self.backend.in_flight(), "shutdown requested; cancelling");
                    let step = self.core.step(RuntimeEvent::ShutdownRequested);
                    self.execute(step).await?;
                    keep_running = false;
                }
            }
        }

        if let Err(e) = self.sink.flush() {
            warn!(error = %format!("{e:#}"), "flushing results failed");
        }
        info!("runtime exiting");
        Ok(self.core.finish())
    }

    /// Record finished batch jobs and turn the report into an event.
    fn absorb(&mut self, report: PollReport) -> RuntimeEvent {
        for job in &report.jobs {
            if let Err(e) = self.sink.record_job(job) {
                warn!(job = %job.name, error = %format!("{e:#}"), "recording job failed");
            }
        }
        if report.finished.is_empty() {
            RuntimeEvent::Tick
        } else {
            RuntimeEvent::UnitsFinished(report.finished)
        }
    }

    /// Execute the commands of one step; returns whether to keep running.
    async fn execute(&mut self, step: CoreStep) -> Result<bool> {
        for command in step.commands {
            match command {
                CoreCommand::Dispatch(ids) => {
                    debug!(units = ?ids, "launching");
                    self.backend.launch(self.core.units_mut(), ids).await?;
                }
                CoreCommand::Record(ids) => self.record(&ids),
                CoreCommand::CancelAll => self.cancel_all().await?,
            }
        }
        Ok(step.keep_running)
    }

    fn record(&mut self, ids: &[UnitId]) {
        for &id in ids {
            let record = UnitRecord::from(&self.core.units()[id]);
            if let Err(e) = self.sink.record_unit(&record) {
                warn!(unit = %record.xdir, error = %format!("{e:#}"), "recording result failed");
            }
        }
    }

    /// Cancel the backend, then collect whatever the cancel finished.
    async fn cancel_all(&mut self) -> Result<()> {
        self.backend.cancel(self.core.units_mut()).await?;
        let report = self.backend.poll(self.core.units_mut()).await?;
        let event = self.absorb(report);
        let step = self.core.step(event);
        for command in step.commands {
            if let CoreCommand::Record(ids) = command {
                self.record(&ids);
            }
        }
        Ok(())
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
