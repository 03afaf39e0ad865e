// src/batch/state.rs

//! Per-job state machine reconciling queue snapshots with log markers.
//!
//! Everything here is pure: [`apply_observation`] folds one observation
//! into a [`JobState`] and is the only way job dates change.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::model::BatchTimeoutsSection;

pub type Timestamp = DateTime<Utc>;

/// Queue state as reported by (or inferred from) a queue snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Pending,
    Running,
    Complete,
    Absent,
}

/// One row of a queue snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub state: QueueState,
    /// When the queue says the job started, if it says.
    pub start: Option<Timestamp>,
    /// Run time used so far, if reported.
    pub used: Option<Duration>,
}

impl QueueEntry {
    pub fn new(state: QueueState) -> Self {
        Self {
            state,
            start: None,
            used: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobExit {
    /// The stop marker was seen.
    Success,
    Fail,
    /// Never seen by the queue nor in the log.
    Missing,
    /// Cancelled by the harness.
    Killed,
}

/// Grace periods used to decide that a job is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchTimeouts {
    /// After queue-done, how long to wait for the stop marker.
    pub script: Duration,
    /// After submit, how long to wait for any sign of the job.
    pub missing: Duration,
    /// After the stop marker, how long to wait for the queue to agree.
    pub complete: Duration,
    /// Minimum interval between re-reads of a job's log.
    pub logcheck: Duration,
}

impl From<BatchTimeoutsSection> for BatchTimeouts {
    fn from(s: BatchTimeoutsSection) -> Self {
        Self {
            script: s.script,
            missing: s.missing,
            complete: s.complete,
            logcheck: s.logcheck,
        }
    }
}

impl Default for BatchTimeouts {
    fn default() -> Self {
        BatchTimeoutsSection::default().into()
    }
}

/// Something the poll cycle learned about a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Submitted { at: Timestamp },
    SubmitFailed { at: Timestamp },
    /// The job's row in a snapshot, `None` if the snapshot lacks it.
    Queue { at: Timestamp, entry: Option<QueueEntry> },
    /// Result of (re)parsing the job log.
    Log {
        at: Timestamp,
        start: Option<Timestamp>,
        stop: Option<Timestamp>,
    },
    Cancelled { at: Timestamp },
    /// Evaluate the finished-ness policy.
    Tick { at: Timestamp },
}

/// Everything known about one job. Dates are set once and never cleared;
/// the only retractable value is the absence-based done guess.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobState {
    pub submitted: Option<Timestamp>,
    pub pending: Option<Timestamp>,
    pub queue_start: Option<Timestamp>,
    pub queue_complete: Option<Timestamp>,
    queue_done_reported: Option<Timestamp>,
    done_guess: Option<Timestamp>,
    pub script_start: Option<Timestamp>,
    pub script_stop: Option<Timestamp>,
    /// When the stop marker was first observed.
    pub script_done: Option<Timestamp>,
    pub last_pending_seen: Option<Timestamp>,
    pub last_log_check: Option<Timestamp>,
    pub queue_state: Option<QueueState>,
    pub exit: Option<JobExit>,
    pub cancelled: bool,
    pub finished: bool,
}

impl JobState {
    /// Queue-done date: reported completion, else the time the job was
    /// first found missing from the queue.
    pub fn queue_done(&self) -> Option<Timestamp> {
        self.queue_done_reported.or(self.done_guess)
    }

    pub fn seen_in_queue(&self) -> bool {
        self.pending.is_some() || self.queue_start.is_some() || self.queue_complete.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the log is due for another read at `now`.
    pub fn log_check_due(&self, now: Timestamp, interval: Duration) -> bool {
        if self.script_stop.is_some() {
            return false;
        }
        match self.last_log_check {
            None => true,
            Some(last) => elapsed(now, last) >= interval,
        }
    }
}

fn set_once(slot: &mut Option<Timestamp>, value: Timestamp) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

/// `now - since`, clamped at zero.
pub fn elapsed(now: Timestamp, since: Timestamp) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// Fold one observation into `state`. Finished jobs are frozen.
pub fn apply_observation(state: JobState, obs: &Observation, timeouts: &BatchTimeouts) -> JobState {
    let mut s = state;
    if s.finished {
        return s;
    }

    match *obs {
        Observation::Submitted { at } => set_once(&mut s.submitted, at),
        Observation::SubmitFailed { at } => {
            set_once(&mut s.submitted, at);
            s.exit = Some(JobExit::Fail);
            s.finished = true;
        }
        Observation::Queue { at, entry: Some(entry) } => {
            s.queue_state = Some(entry.state);
            match entry.state {
                QueueState::Pending => {
                    set_once(&mut s.pending, at);
                    s.last_pending_seen = Some(at);
                }
                QueueState::Running => {
                    set_once(&mut s.queue_start, entry.start.unwrap_or(at));
                    s.done_guess = None;
                }
                QueueState::Complete => {
                    let completed = match (entry.start, entry.used) {
                        (Some(start), Some(used)) => chrono::TimeDelta::from_std(used)
                            .ok()
                            .and_then(|d| start.checked_add_signed(d))
                            .unwrap_or(at),
                        _ => at,
                    };
                    set_once(&mut s.queue_complete, completed);
                    set_once(&mut s.queue_done_reported, at);
                }
                QueueState::Absent => mark_absent(&mut s, at),
            }
        }
        Observation::Queue { at, entry: None } => mark_absent(&mut s, at),
        Observation::Log { at, start, stop } => {
            s.last_log_check = Some(at);
            if let Some(start) = start {
                set_once(&mut s.script_start, start);
            }
            if let Some(stop) = stop {
                set_once(&mut s.script_stop, stop);
                set_once(&mut s.script_done, at);
            }
        }
        Observation::Cancelled { at } => {
            s.cancelled = true;
            set_once(&mut s.done_guess, at);
        }
        Observation::Tick { at } => evaluate_finished(&mut s, at, timeouts),
    }
    s
}

fn mark_absent(s: &mut JobState, at: Timestamp) {
    if s.seen_in_queue() {
        s.queue_state = Some(QueueState::Absent);
        set_once(&mut s.done_guess, at);
    }
}

fn finish(s: &mut JobState, exit: JobExit) {
    s.exit = Some(exit);
    s.finished = true;
}

fn evaluate_finished(s: &mut JobState, now: Timestamp, t: &BatchTimeouts) {
    if let Some(script_done) = s.script_done {
        if s.queue_done().is_some() || elapsed(now, script_done) >= t.complete {
            finish(s, JobExit::Success);
        }
        return;
    }

    let failed = if s.cancelled {
        JobExit::Killed
    } else {
        JobExit::Fail
    };

    if let Some(done) = s.queue_done() {
        if elapsed(now, done) >= t.script {
            finish(s, failed);
        }
        return;
    }

    if !s.seen_in_queue() {
        let anchor = match (s.submitted, s.script_start) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if let Some(anchor) = anchor {
            if elapsed(now, anchor) > t.missing {
                let exit = if s.script_start.is_some() {
                    failed
                } else {
                    JobExit::Missing
                };
                finish(s, exit);
            }
        }
    }
}
