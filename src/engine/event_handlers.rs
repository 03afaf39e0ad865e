// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::{debug, info};

use crate::queue::{CapacityProvider, RunQueue, UnitId};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Hand these units to the backend.
    Dispatch(Vec<UnitId>),
    /// Persist the final records of these units.
    Record(Vec<UnitId>),
    /// Abort everything in flight.
    CancelAll,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer loop should keep running.
    pub keep_running: bool,
}

/// Dequeue while capacity lasts, committing each unit's processors.
pub fn fill(queue: &mut RunQueue, capacity: &mut dyn CapacityProvider) -> Vec<UnitId> {
    let mut ids = Vec::new();
    while let Some(id) = queue.dequeue(&*capacity) {
        capacity.obtain(queue.units()[id].np);
        ids.push(id);
    }
    ids
}

/// Fill, then decide whether the run is over: nothing running and nothing
/// dequeueable, which also covers parents blocked forever.
pub fn handle_tick(queue: &mut RunQueue, capacity: &mut dyn CapacityProvider) -> CoreStep {
    let dispatched = fill(queue, capacity);
    let mut commands = Vec::new();
    if !dispatched.is_empty() {
        info!(units = dispatched.len(), running = queue.num_running(), "dispatching");
        commands.push(CoreCommand::Dispatch(dispatched));
    }

    let keep_running = queue.num_running() > 0;
    if !keep_running {
        debug!(pending = queue.num_pending(), "nothing running and nothing dequeueable");
    }
    CoreStep {
        commands,
        keep_running,
    }
}

/// Release capacity and retire every unit that finished, then refill.
pub fn handle_units_finished(
    queue: &mut RunQueue,
    capacity: &mut dyn CapacityProvider,
    ids: Vec<UnitId>,
    refill: bool,
) -> CoreStep {
    let retired = retire_all(queue, capacity, ids);

    let mut step = if refill {
        handle_tick(queue, capacity)
    } else {
        CoreStep {
            commands: Vec::new(),
            keep_running: false,
        }
    };
    if !retired.is_empty() {
        step.commands.insert(0, CoreCommand::Record(retired));
    }
    step
}

fn retire_all(queue: &mut RunQueue, capacity: &mut dyn CapacityProvider, ids: Vec<UnitId>) -> Vec<UnitId> {
    let mut retired = Vec::with_capacity(ids.len());
    let mut woken = Vec::new();
    for id in ids {
        let np = queue.units()[id].np;
        let step = queue.retire(id);
        let Some(done) = step.retired else {
            continue;
        };
        capacity.release(np);
        retired.push(done);
        woken.extend(step.parent_now_eligible);
    }
    if !woken.is_empty() {
        let names: Vec<&str> = woken.iter().map(|&p| queue.units()[p].xdir.as_str()).collect();
        debug!(parents = ?names, "parents ready for dispatch");
    }
    retired
}
