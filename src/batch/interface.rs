// src/batch/interface.rs

//! One interface manages every in-flight job of a run.
//!
//! All methods take `&mut self`, so two poll cycles can never overlap.
//! Callers that share an interface between tasks wrap it in a
//! `tokio::sync::Mutex` that is held across whole `poll`/`cancel` calls.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::batch::job::BatchJob;
use crate::batch::queue_system::{QueueSnapshot, QueueSystem};
use crate::batch::runner::CommandRunner;
use crate::batch::script::{parse_log_markers, render_job_script};
use crate::batch::state::{apply_observation, BatchTimeouts, Observation, Timestamp};
use crate::fs::FileSystem;

/// Result of handing a job to the queue manager.
#[derive(Debug)]
pub enum SubmitOutcome {
    Accepted { job_id: String },
    /// The job never entered in-flight tracking; its `submit_out` and
    /// `submit_err` hold whatever the submit command printed.
    Rejected(Box<BatchJob>),
}

#[derive(Debug)]
pub struct BatchInterface {
    system: Box<dyn QueueSystem>,
    runner: Arc<dyn CommandRunner>,
    fs: Arc<dyn FileSystem>,
    timeouts: BatchTimeouts,
    /// Per-call limit on queue commands and log reads.
    call_timeout: Duration,
    in_flight: BTreeMap<String, BatchJob>,
}

impl BatchInterface {
    pub fn new(
        system: Box<dyn QueueSystem>,
        runner: Arc<dyn CommandRunner>,
        fs: Arc<dyn FileSystem>,
        timeouts: BatchTimeouts,
        call_timeout: Duration,
    ) -> Self {
        Self {
            system,
            runner,
            fs,
            timeouts,
            call_timeout,
            in_flight: BTreeMap::new(),
        }
    }

    pub fn system(&self) -> &dyn QueueSystem {
        &*self.system
    }

    pub fn timeouts(&self) -> &BatchTimeouts {
        &self.timeouts
    }

    pub fn num_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn get(&self, name: &str) -> Option<&BatchJob> {
        self.in_flight.get(name)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &BatchJob> {
        self.in_flight.values()
    }

    /// Render the job's script and write it to `job.script`.
    pub fn write_job(&self, job: &BatchJob) -> anyhow::Result<()> {
        let header = self.system.header(job);
        let text = render_job_script(job, &header);
        self.fs
            .write(&job.script, text.as_bytes())
            .with_context(|| format!("writing job script for {}", job.name))
    }

    pub async fn submit(&mut self, job: BatchJob) -> SubmitOutcome {
        self.submit_at(job, Utc::now()).await
    }

    /// Submit with an explicit clock reading.
    pub async fn submit_at(&mut self, mut job: BatchJob, now: Timestamp) -> SubmitOutcome {
        let argv = self.system.submit_command(&job.script);
        let job_id = match self.runner.run(&argv, self.call_timeout).await {
            Ok(out) => {
                let id = self.system.parse_submit_output(&out.stdout, &out.stderr);
                job.submit_out = out.stdout;
                job.submit_err = out.stderr;
                id
            }
            Err(err) => {
                job.submit_err = format!("{err:#}");
                None
            }
        };

        let Some(job_id) = job_id else {
            warn!(
                job = %job.name,
                system = self.system.name(),
                stderr = %job.submit_err.trim(),
                "batch submission failed"
            );
            job.state = apply_observation(job.state, &Observation::SubmitFailed { at: now }, &self.timeouts);
            return SubmitOutcome::Rejected(Box::new(job));
        };

        info!(job = %job.name, job_id = %job_id, "submitted batch job");
        job.job_id = Some(job_id.clone());
        job.state = apply_observation(job.state, &Observation::Submitted { at: now }, &self.timeouts);
        self.in_flight.insert(job.name.clone(), job);
        SubmitOutcome::Accepted { job_id }
    }

    pub async fn poll(&mut self) -> Vec<BatchJob> {
        self.poll_at(Utc::now()).await
    }

    /// One pass over every in-flight job. Jobs that became finished are
    /// removed and returned.
    pub async fn poll_at(&mut self, now: Timestamp) -> Vec<BatchJob> {
        if self.in_flight.is_empty() {
            return Vec::new();
        }

        let snapshot = self.query().await;

        let due: Vec<(String, PathBuf)> = self
            .in_flight
            .values()
            .filter(|job| job.state.log_check_due(now, self.timeouts.logcheck))
            .map(|job| (job.name.clone(), job.log.clone()))
            .collect();
        for (name, log) in due {
            let (start, stop) = self.read_markers(log, now).await;
            if let Some(job) = self.in_flight.get_mut(&name) {
                job.state = apply_observation(
                    job.state,
                    &Observation::Log { at: now, start, stop },
                    &self.timeouts,
                );
            }
        }

        // Without a snapshot nothing may be marked finished this cycle.
        let Some(snapshot) = snapshot else {
            return Vec::new();
        };

        let mut finished = Vec::new();
        for (name, job) in self.in_flight.iter_mut() {
            let entry = job.job_id.as_ref().and_then(|id| snapshot.get(id)).copied();
            for obs in [Observation::Queue { at: now, entry }, Observation::Tick { at: now }] {
                job.state = apply_observation(job.state, &obs, &self.timeouts);
            }
            if job.is_finished() {
                finished.push(name.clone());
            }
        }

        finished
            .into_iter()
            .filter_map(|name| self.in_flight.remove(&name))
            .inspect(|job| {
                info!(job = %job.name, exit = ?job.state.exit, "batch job finished");
            })
            .collect()
    }

    async fn query(&self) -> Option<QueueSnapshot> {
        let argv = self.system.query_command();
        match self.runner.run(&argv, self.call_timeout).await {
            Ok(out) if out.success() => {
                let snapshot = self.system.parse_query_output(&out.stdout);
                debug!(rows = snapshot.len(), "queue snapshot");
                Some(snapshot)
            }
            Ok(out) => {
                warn!(code = ?out.code, stderr = %out.stderr.trim(), "queue query failed");
                None
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "queue query failed");
                None
            }
        }
    }

    /// Markers currently in a job log. A missing, unreadable or slow log
    /// yields no markers.
    async fn read_markers(&self, log: PathBuf, now: Timestamp) -> (Option<Timestamp>, Option<Timestamp>) {
        let fs = Arc::clone(&self.fs);
        let read = tokio::task::spawn_blocking(move || fs.read_to_string(&log));
        match tokio::time::timeout(self.call_timeout, read).await {
            Ok(Ok(Ok(text))) => parse_log_markers(&text, now),
            Ok(Ok(Err(err))) => {
                debug!(error = %format!("{err:#}"), "job log not readable yet");
                (None, None)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "job log read task failed");
                (None, None)
            }
            Err(_) => {
                warn!(timeout = ?self.call_timeout, "job log read timed out");
                (None, None)
            }
        }
    }

    /// Best-effort cancel of the named jobs, or of every in-flight job.
    pub async fn cancel(&mut self, names: Option<&[String]>) {
        self.cancel_at(names, Utc::now()).await
    }

    pub async fn cancel_at(&mut self, names: Option<&[String]>, now: Timestamp) {
        let targets: Vec<String> = match names {
            Some(names) => names
                .iter()
                .filter(|n| self.in_flight.contains_key(*n))
                .cloned()
                .collect(),
            None => self.in_flight.keys().cloned().collect(),
        };
        let ids: Vec<String> = targets
            .iter()
            .filter_map(|n| self.in_flight.get(n).and_then(|j| j.job_id.clone()))
            .collect();
        if ids.is_empty() {
            return;
        }

        let argv = self.system.cancel_command(&ids);
        match self.runner.run(&argv, self.call_timeout).await {
            Ok(out) if out.success() => info!(jobs = ids.len(), "cancelled batch jobs"),
            Ok(out) => warn!(code = ?out.code, stderr = %out.stderr.trim(), "batch cancel failed"),
            Err(err) => warn!(error = %format!("{err:#}"), "batch cancel failed"),
        }

        for name in &targets {
            if let Some(job) = self.in_flight.get_mut(name) {
                job.state = apply_observation(job.state, &Observation::Cancelled { at: now }, &self.timeouts);
            }
        }
    }
}
