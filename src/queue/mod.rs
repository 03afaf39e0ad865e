// src/queue/mod.rs

//! Run queue and admission control.
//!
//! - [`unit`] holds the [`TestUnit`] record and the arena that owns all units.
//! - [`run_queue`] bins pending units by processor count and decides which
//!   unit to dequeue next.
//! - [`capacity`] provides processor and job-slot budgets.
//! - [`step`] defines the result type of a retirement.

pub mod capacity;
pub mod run_queue;
pub mod step;
pub mod unit;

pub use capacity::{CapacityProvider, JobSlots, ProcessorPool};
pub use run_queue::RunQueue;
pub use step::RetireStep;
pub use unit::{RunState, TestResult, TestUnit, UnitArena, UnitId};
