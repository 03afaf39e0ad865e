// src/engine/mod.rs

//! Driver loop.
//!
//! The pure core state machine lives in [`core`]: it owns the run queue and
//! the capacity budget and turns [`RuntimeEvent`]s into commands. The async
//! shell in [`runtime`] ticks, polls the execution backend, and carries
//! the commands out.

use std::time::Duration;

use crate::queue::UnitId;

/// Events fed into the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// Periodic tick with nothing new finished.
    Tick,
    /// The backend reported these units done.
    UnitsFinished(Vec<UnitId>),
    /// Ctrl-C or an embedding program asked the run to stop.
    ShutdownRequested,
}

/// Options used by the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Interval between backend polls.
    pub poll_interval: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
