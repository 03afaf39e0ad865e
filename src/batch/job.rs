// src/batch/job.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::batch::state::{JobExit, JobState, QueueState, Timestamp};

/// Slack added to a job's wall time on top of its units' timeouts.
pub const WALL_TIME_SLACK: Duration = Duration::from_secs(120);

/// One unit of work handed to the queue manager.
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Unique name; also the stem of the script and log file names.
    pub name: String,
    pub script: PathBuf,
    pub log: PathBuf,
    /// Directory the script changes into before its payload.
    pub work_dir: Option<PathBuf>,
    /// Payload shell lines.
    pub commands: Vec<String>,
    pub num_nodes: u32,
    pub num_cores: u32,
    pub wall_time: Duration,
    pub queue: Option<String>,
    pub account: Option<String>,

    /// Set only after a successful submit.
    pub job_id: Option<String>,
    pub submit_out: String,
    pub submit_err: String,
    pub state: JobState,
}

impl BatchJob {
    pub fn new(name: impl Into<String>, script: PathBuf, log: PathBuf) -> Self {
        Self {
            name: name.into(),
            script,
            log,
            work_dir: None,
            commands: Vec::new(),
            num_nodes: 1,
            num_cores: 1,
            wall_time: WALL_TIME_SLACK,
            queue: None,
            account: None,
            job_id: None,
            submit_out: String::new(),
            submit_err: String::new(),
            state: JobState::default(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Snapshot for the results collaborator.
    pub fn record(&self) -> BatchJobRecord {
        let s = &self.state;
        BatchJobRecord {
            name: self.name.clone(),
            job_id: self.job_id.clone(),
            log: self.log.clone(),
            submit: s.submitted,
            pending: s.pending,
            queue_start: s.queue_start,
            queue_complete: s.queue_complete,
            queue_done: s.queue_done(),
            script_start: s.script_start,
            script_stop: s.script_stop,
            queue_state: s.queue_state,
            exit: s.exit,
        }
    }
}

/// Queue dates, script dates and exit classification of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchJobRecord {
    pub name: String,
    pub job_id: Option<String>,
    pub log: PathBuf,
    pub submit: Option<Timestamp>,
    pub pending: Option<Timestamp>,
    pub queue_start: Option<Timestamp>,
    pub queue_complete: Option<Timestamp>,
    pub queue_done: Option<Timestamp>,
    pub script_start: Option<Timestamp>,
    pub script_stop: Option<Timestamp>,
    pub queue_state: Option<QueueState>,
    pub exit: Option<JobExit>,
}

/// Nodes needed for `np` processors at `ppn` cores per node.
pub fn compute_num_nodes(np: u32, ppn: u32) -> u32 {
    np.max(1).div_ceil(ppn.max(1))
}

/// `H:MM:SS`, rounding sub-second durations up.
pub fn format_wall_time(d: Duration) -> String {
    let mut secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs += 1;
    }
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
