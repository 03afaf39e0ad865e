// src/queue/capacity.rs

//! Admission control for the run queue.

use std::fmt::Debug;

use tracing::debug;

/// Answers "can `np` processors be granted right now" and keeps the
/// committed/available bookkeeping.
pub trait CapacityProvider: Send + Debug {
    fn admits(&self, np: u32) -> bool;
    fn obtain(&mut self, np: u32);
    fn release(&mut self, np: u32);
}

/// A request of zero processors still occupies one.
fn effective(np: u32) -> u32 {
    np.max(1)
}

/// Fixed processor budget of the local machine.
#[derive(Debug, Clone)]
pub struct ProcessorPool {
    total: u32,
    free: u32,
}

impl ProcessorPool {
    pub fn new(total: u32) -> Self {
        let total = total.max(1);
        Self { total, free: total }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn free(&self) -> u32 {
        self.free
    }
}

impl CapacityProvider for ProcessorPool {
    fn admits(&self, np: u32) -> bool {
        effective(np) <= self.free
    }

    fn obtain(&mut self, np: u32) {
        self.free = self.free.saturating_sub(effective(np));
        debug!(np, free = self.free, "processors obtained");
    }

    fn release(&mut self, np: u32) {
        self.free = (self.free + effective(np)).min(self.total);
        debug!(np, free = self.free, "processors released");
    }
}

/// Batch-mode budget: a cap on units in flight, regardless of size.
#[derive(Debug, Clone)]
pub struct JobSlots {
    max: usize,
    in_use: usize,
}

impl JobSlots {
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            in_use: 0,
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }
}

impl CapacityProvider for JobSlots {
    fn admits(&self, _np: u32) -> bool {
        self.in_use < self.max
    }

    fn obtain(&mut self, _np: u32) {
        self.in_use += 1;
    }

    fn release(&mut self, _np: u32) {
        self.in_use = self.in_use.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processor_pool_bookkeeping() {
        let mut pool = ProcessorPool::new(4);
        assert!(pool.admits(4));
        assert!(!pool.admits(5));
        pool.obtain(3);
        assert!(pool.admits(1));
        assert!(pool.admits(0));
        assert!(!pool.admits(2));
        pool.obtain(0);
        assert_eq!(pool.free(), 0);
        pool.release(3);
        pool.release(0);
        pool.release(8);
        assert_eq!(pool.free(), 4);
    }

    #[test]
    fn job_slots_ignore_size() {
        let mut slots = JobSlots::new(2);
        assert!(slots.admits(64));
        slots.obtain(64);
        slots.obtain(1);
        assert!(!slots.admits(1));
        slots.release(64);
        assert!(slots.admits(1));
    }
}
