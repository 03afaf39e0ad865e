// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! Consumes [`RuntimeEvent`]s and produces the commands the IO shell should
//! carry out. It has no Tokio types and performs no IO, so the scheduling
//! semantics can be tested without processes or a batch system.

use crate::engine::event_handlers::{handle_tick, handle_units_finished, CoreCommand, CoreStep};
use crate::engine::RuntimeEvent;
use crate::queue::{CapacityProvider, RunQueue, UnitArena};
use crate::results::RunSummary;

#[derive(Debug)]
pub struct CoreRuntime {
    queue: RunQueue,
    capacity: Box<dyn CapacityProvider>,
    cancelled: bool,
}

impl CoreRuntime {
    pub fn new(queue: RunQueue, capacity: Box<dyn CapacityProvider>) -> Self {
        Self {
            queue,
            capacity,
            cancelled: false,
        }
    }

    pub fn queue(&self) -> &RunQueue {
        &self.queue
    }

    pub fn units(&self) -> &UnitArena {
        self.queue.units()
    }

    pub fn units_mut(&mut self) -> &mut UnitArena {
        self.queue.units_mut()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Handle a single event.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::Tick if self.cancelled => CoreStep {
                commands: Vec::new(),
                keep_running: false,
            },
            RuntimeEvent::Tick => handle_tick(&mut self.queue, &mut *self.capacity),
            RuntimeEvent::UnitsFinished(ids) => {
                handle_units_finished(&mut self.queue, &mut *self.capacity, ids, !self.cancelled)
            }
            RuntimeEvent::ShutdownRequested => {
                self.cancelled = true;
                CoreStep {
                    commands: vec![CoreCommand::CancelAll],
                    keep_running: false,
                }
            }
        }
    }

    /// Drain what never ran and tally the run.
    pub fn finish(mut self) -> RunSummary {
        let leftovers = self.queue.pop_remaining();
        RunSummary::collect(&self.queue, &leftovers, self.cancelled)
    }
}
