// src/exec/backend.rs

//! Pluggable execution backend abstraction.
//!
//! The runtime talks to an `ExecutionBackend` instead of spawning processes
//! or submitting jobs itself. Production code uses
//! [`LocalBackend`](super::local::LocalBackend) or
//! [`BatchBackend`](super::batch::BatchBackend); tests can provide a fake
//! that completes units with scripted results.

use std::future::Future;
use std::pin::Pin;

use crate::batch::BatchJobRecord;
use crate::errors::Result;
use crate::queue::{UnitArena, UnitId};

/// Boxed future returned by backend methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// What one poll pass found.
#[derive(Debug, Default)]
pub struct PollReport {
    /// Units that reached `done` since the previous poll.
    pub finished: Vec<UnitId>,
    /// Batch jobs that finished since the previous poll.
    pub jobs: Vec<BatchJobRecord>,
}

/// Trait abstracting how dequeued units are executed.
///
/// Implementations own the per-unit execution state; the unit records
/// themselves live in the arena passed to each call. No method may block
/// on a unit finishing.
pub trait ExecutionBackend: Send {
    /// Start the given units. Per-unit failures mark that unit done and are
    /// reported by the next [`poll`](Self::poll); they are not returned here.
    fn launch<'a>(&'a mut self, units: &'a mut UnitArena, ids: Vec<UnitId>)
    -> BackendFuture<'a, ()>;

    /// Non-blocking check of everything in flight.
    fn poll<'a>(&'a mut self, units: &'a mut UnitArena) -> BackendFuture<'a, PollReport>;

    /// Best-effort abort of everything in flight.
    fn cancel<'a>(&'a mut self, units: &'a mut UnitArena) -> BackendFuture<'a, ()>;

    /// Number of units currently in flight.
    fn in_flight(&self) -> usize;
}
