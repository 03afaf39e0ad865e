// tests/property/main.rs

use std::time::Duration;

use proptest::prelude::*;
use vvexec::engine::{CoreCommand, CoreRuntime, CoreStep, RuntimeEvent};
use vvexec::queue::{ProcessorPool, RunQueue, RunState, TestResult, TestUnit, UnitArena, UnitId};
use vvexec::types::DequeuePolicy;

#[derive(Debug, Clone)]
struct Spec {
    np: u32,
    fast: bool,
    /// Raw parent pick; only parents with a higher index are kept, which
    /// keeps the links acyclic.
    parent: Option<usize>,
    result: TestResult,
}

fn result_strategy() -> impl Strategy<Value = TestResult> {
    prop_oneof![
        4 => Just(TestResult::Pass),
        1 => Just(TestResult::Diff),
        1 => Just(TestResult::Fail),
        1 => Just(TestResult::Timeout),
    ]
}

fn spec_strategy() -> impl Strategy<Value = Spec> {
    (0..=6u32, any::<bool>(), proptest::option::of(any::<usize>()), result_strategy())
        .prop_map(|(np, fast, parent, result)| Spec { np, fast, parent, result })
}

fn build(specs: &[Spec]) -> UnitArena {
    let mut arena = UnitArena::new();
    let ids: Vec<UnitId> = specs
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let mut unit = TestUnit::new(format!("t{i}"), vec!["true".into()]).with_np(s.np);
            if s.fast {
                unit = unit.with_keyword("fast");
            }
            arena.push(unit)
        })
        .collect();
    for (i, s) in specs.iter().enumerate() {
        let above = specs.len() - i - 1;
        if let (Some(raw), true) = (s.parent, above > 0) {
            arena.link(ids[i], ids[i + 1 + raw % above]);
        }
    }
    arena
}

fn dispatched(step: &CoreStep) -> Vec<UnitId> {
    step.commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::Dispatch(ids) => Some(ids.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

/// Index of a unit named `t<i>`.
fn spec_index(xdir: &str) -> usize {
    xdir[1..].parse().unwrap_or(usize::MAX)
}

proptest! {
    #[test]
    fn admission_respects_capacity_and_parent_gate(
        specs in proptest::collection::vec(spec_strategy(), 1..16),
        processors in 1..=8u32,
        large_first in any::<bool>(),
        oversubscribe in any::<bool>(),
    ) {
        let policy = if large_first {
            DequeuePolicy::LargeNonFastFirst
        } else {
            DequeuePolicy::FastFirst
        };
        let queue = RunQueue::new(build(&specs), policy).with_oversubscribe_when_idle(oversubscribe);
        let mut core = CoreRuntime::new(queue, Box::new(ProcessorPool::new(processors)));
        let mut running: Vec<UnitId> = Vec::new();

        let mut step = core.step(RuntimeEvent::Tick);
        for _ in 0..=specs.len() {
            for id in dispatched(&step) {
                let units = core.units();
                for &child in units[id].children() {
                    let c = &units[child];
                    prop_assert!(
                        c.state == RunState::Done && c.result.satisfies_parent(),
                        "{} dispatched before child {} passed", units[id].xdir, c.xdir
                    );
                }
                core.units_mut()[id].mark_started();
                running.push(id);
            }

            let committed: u32 = running.iter().map(|&id| core.units()[id].np.max(1)).sum();
            prop_assert!(
                committed <= processors || (oversubscribe && running.len() == 1),
                "{} processors committed of {} across {} units",
                committed, processors, running.len()
            );
            prop_assert_eq!(step.keep_running, !running.is_empty());

            if running.is_empty() {
                break;
            }
            let id = running.remove(0);
            let result = specs[id.index()].result;
            core.units_mut()[id].mark_done(result, Duration::from_secs(1));
            step = core.step(RuntimeEvent::UnitsFinished(vec![id]));
        }
        prop_assert!(running.is_empty(), "driver did not terminate");

        let summary = core.finish();
        prop_assert_eq!(summary.total_done() + summary.notrun.len(), specs.len());
        for n in &summary.notrun {
            let np = specs[spec_index(&n.xdir)].np.max(1);
            prop_assert!(
                n.blocked_by.is_some() || (!oversubscribe && np > processors),
                "{} left pending without a reason", n.xdir
            );
        }
    }
}
