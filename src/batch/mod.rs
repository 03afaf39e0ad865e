// src/batch/mod.rs

//! Batch Job Interface.
//!
//! Jobs are observed through two unreliable channels, the queue manager's
//! own listing and the markers the job script writes into its log. The
//! [`state`] reducer reconciles them; [`interface`] drives the poll cycle.
//!
//! - [`job`] holds the job record and its resource sizing.
//! - [`script`] renders job scripts and parses log markers.
//! - [`queue_system`] contains the SLURM and LSF flavors.
//! - [`runner`] runs queue commands with a per-call timeout.

pub mod interface;
pub mod job;
pub mod queue_system;
pub mod runner;
pub mod script;
pub mod state;

pub use interface::{BatchInterface, SubmitOutcome};
pub use job::{compute_num_nodes, BatchJob, BatchJobRecord};
pub use queue_system::{for_kind, Lsf, QueueSnapshot, QueueSystem, Slurm};
pub use runner::{CommandOutput, CommandRunner, RunFuture, ShellRunner};
pub use state::{
    apply_observation, BatchTimeouts, JobExit, JobState, Observation, QueueEntry, QueueState,
    Timestamp,
};
