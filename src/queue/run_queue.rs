// src/queue/run_queue.rs

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::queue::capacity::CapacityProvider;
use crate::queue::step::RetireStep;
use crate::queue::unit::{RunState, UnitArena, UnitId};
use crate::types::DequeuePolicy;

/// Processor-binned queue of pending units plus the running and finished
/// sets.
///
/// Each unit moves pending -> running -> finished exactly once.
#[derive(Debug)]
pub struct RunQueue {
    units: UnitArena,
    /// Processor count -> pending units, fast units first.
    bins: BTreeMap<u32, Vec<UnitId>>,
    running: BTreeSet<UnitId>,
    finished: Vec<UnitId>,
    policy: DequeuePolicy,
    oversubscribe_when_idle: bool,
}

/// Which units a scan pass may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    All,
    NonFast,
}

impl RunQueue {
    /// Bin every not-yet-run unit of the arena.
    pub fn new(units: UnitArena, policy: DequeuePolicy) -> Self {
        let mut bins: BTreeMap<u32, Vec<UnitId>> = BTreeMap::new();
        for (id, unit) in units.iter() {
            if unit.state == RunState::NotRun {
                bins.entry(unit.np).or_default().push(id);
            }
        }
        for list in bins.values_mut() {
            // Stable: keeps arena order within the fast and non-fast groups.
            list.sort_by_key(|&id| !units[id].is_fast());
        }

        Self {
            units,
            bins,
            running: BTreeSet::new(),
            finished: Vec::new(),
            policy,
            oversubscribe_when_idle: false,
        }
    }

    pub fn with_oversubscribe_when_idle(mut self, enabled: bool) -> Self {
        self.oversubscribe_when_idle = enabled;
        self
    }

    pub fn units(&self) -> &UnitArena {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut UnitArena {
        &mut self.units
    }

    pub fn policy(&self) -> DequeuePolicy {
        self.policy
    }

    pub fn num_pending(&self) -> usize {
        self.bins.values().map(Vec::len).sum()
    }

    pub fn num_running(&self) -> usize {
        self.running.len()
    }

    pub fn running(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.running.iter().copied()
    }

    pub fn finished(&self) -> &[UnitId] {
        &self.finished
    }

    /// Pending units in the order a fully-available machine would see them.
    pub fn pending_in_order(&self) -> Vec<UnitId> {
        self.bins.values().rev().flatten().copied().collect()
    }

    /// Whether `id` is pending and would pass the parent gate.
    pub fn is_dequeue_eligible(&self, id: UnitId) -> bool {
        self.bins.values().any(|list| list.contains(&id)) && self.units.bad_child(id).is_none()
    }

    /// Take the next admissible unit and move it to the running set.
    ///
    /// Bins are scanned from the largest processor count down; a bin is
    /// only considered if `capacity` admits its count, and parents whose
    /// children have not all passed are skipped. With idle oversubscription
    /// enabled, a scan that finds nothing while nothing is running is
    /// repeated without the capacity check, so units larger than the
    /// machine still get their turn.
    pub fn dequeue<C: CapacityProvider + ?Sized>(&mut self, capacity: &C) -> Option<UnitId> {
        let found = match self.policy {
            DequeuePolicy::FastFirst => self.scan(Some(capacity), Pass::All),
            DequeuePolicy::LargeNonFastFirst => self
                .scan(Some(capacity), Pass::NonFast)
                .or_else(|| self.scan(Some(capacity), Pass::All)),
        };

        let found = found.or_else(|| {
            if self.running.is_empty() && self.oversubscribe_when_idle {
                self.scan(None::<&C>, Pass::All)
            } else {
                None
            }
        });

        let (np, pos) = found?;
        let list = self.bins.get_mut(&np)?;
        let id = list.remove(pos);
        if list.is_empty() {
            self.bins.remove(&np);
        }
        self.running.insert(id);

        debug!(unit = %self.units[id].xdir, np, "dequeued");
        Some(id)
    }

    fn scan<C: CapacityProvider + ?Sized>(
        &self,
        capacity: Option<&C>,
        pass: Pass,
    ) -> Option<(u32, usize)> {
        for (&np, list) in self.bins.iter().rev() {
            if let Some(cap) = capacity {
                if !cap.admits(np) {
                    continue;
                }
            }
            for (pos, &id) in list.iter().enumerate() {
                if pass == Pass::NonFast && self.units[id].is_fast() {
                    continue;
                }
                if self.units.bad_child(id).is_some() {
                    continue;
                }
                return Some((np, pos));
            }
        }
        None
    }

    /// Move a running unit to the finished set.
    ///
    /// Reports the parent if this retirement made it eligible.
    pub fn retire(&mut self, id: UnitId) -> RetireStep {
        if !self.running.remove(&id) {
            debug!(unit = %self.units[id].xdir, "retire of a unit that is not running; ignoring");
            return RetireStep::default();
        }
        self.finished.push(id);

        let parent = self.units[id].parent();
        let parent_now_eligible = parent.filter(|&p| {
            self.units[p].state == RunState::NotRun && self.units.bad_child(p).is_none()
        });
        if let Some(p) = parent_now_eligible {
            info!(parent = %self.units[p].xdir, "all children finished; parent is eligible");
        }

        RetireStep {
            retired: Some(id),
            parent_now_eligible,
        }
    }

    /// Drain everything still pending, e.g. parents blocked by a child that
    /// will never pass.
    pub fn pop_remaining(&mut self) -> Vec<UnitId> {
        let remaining = self.pending_in_order();
        self.bins.clear();
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::capacity::ProcessorPool;
    use crate::queue::unit::{TestResult, TestUnit};
    use std::time::Duration;

    fn unit(name: &str, np: u32) -> TestUnit {
        TestUnit::new(name, vec!["true".into()]).with_np(np)
    }

    #[test]
    fn fast_units_lead_their_bin() {
        let mut arena = UnitArena::new();
        let slow = arena.push(unit("slow", 1));
        let fast = arena.push(unit("fast", 1).with_keyword("fast"));
        let mut q = RunQueue::new(arena, DequeuePolicy::FastFirst);
        let pool = ProcessorPool::new(4);

        assert_eq!(q.dequeue(&pool), Some(fast));
        assert_eq!(q.dequeue(&pool), Some(slow));
        assert_eq!(q.dequeue(&pool), None);
    }

    #[test]
    fn large_non_fast_policy_skips_fast_units_first() {
        let mut arena = UnitArena::new();
        let big_fast = arena.push(unit("big_fast", 4).with_keyword("fast"));
        let small = arena.push(unit("small", 2));
        let mut q = RunQueue::new(arena, DequeuePolicy::LargeNonFastFirst);
        let pool = ProcessorPool::new(4);

        assert_eq!(q.dequeue(&pool), Some(small));
        assert_eq!(q.dequeue(&pool), Some(big_fast));
    }

    #[test]
    fn oversized_unit_runs_alone_when_idle() {
        let mut arena = UnitArena::new();
        let huge = arena.push(unit("huge", 16));
        let mut q = RunQueue::new(arena, DequeuePolicy::FastFirst).with_oversubscribe_when_idle(true);
        let pool = ProcessorPool::new(4);
        assert_eq!(q.dequeue(&pool), Some(huge));

        let mut arena = UnitArena::new();
        arena.push(unit("huge", 16));
        let mut q = RunQueue::new(arena, DequeuePolicy::FastFirst);
        assert_eq!(q.dequeue(&pool), None);
    }

    #[test]
    fn retire_reports_parent_once_all_children_pass() {
        let mut arena = UnitArena::new();
        let c1 = arena.push(unit("c1", 1));
        let c2 = arena.push(unit("c2", 1));
        let p = arena.push(unit("p", 1));
        arena.link(c1, p);
        arena.link(c2, p);
        let mut q = RunQueue::new(arena, DequeuePolicy::FastFirst);
        let pool = ProcessorPool::new(8);

        let a = q.dequeue(&pool).unwrap();
        let b = q.dequeue(&pool).unwrap();
        assert_eq!(q.dequeue(&pool), None);
        assert!(!q.is_dequeue_eligible(p));

        q.units_mut()[a].mark_done(TestResult::Pass, Duration::ZERO);
        assert_eq!(q.retire(a).parent_now_eligible, None);
        q.units_mut()[b].mark_done(TestResult::Diff, Duration::ZERO);
        assert_eq!(q.retire(b).parent_now_eligible, Some(p));
        assert_eq!(q.dequeue(&pool), Some(p));
        assert_eq!(q.num_pending(), 0);
    }

    #[test]
    fn pop_remaining_drains_blocked_parents() {
        let mut arena = UnitArena::new();
        let c = arena.push(unit("c", 1));
        let p = arena.push(unit("p", 1));
        arena.link(c, p);
        let mut q = RunQueue::new(arena, DequeuePolicy::FastFirst);
        let pool = ProcessorPool::new(2);

        let got = q.dequeue(&pool).unwrap();
        q.units_mut()[got].mark_done(TestResult::Fail, Duration::ZERO);
        q.retire(got);

        assert_eq!(q.num_running(), 0);
        assert_eq!(q.dequeue(&pool), None);
        assert_eq!(q.pop_remaining(), vec![p]);
        assert_eq!(q.num_pending(), 0);
    }
}
