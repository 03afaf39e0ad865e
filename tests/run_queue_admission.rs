// tests/run_queue_admission.rs

use std::time::Duration;

use vvexec::engine::{CoreCommand, CoreRuntime, CoreStep, RuntimeEvent};
use vvexec::queue::{ProcessorPool, RunQueue, TestResult, TestUnit, UnitArena, UnitId};
use vvexec::types::DequeuePolicy;

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

fn finish(core: &mut CoreRuntime, ids: &[UnitId], result: TestResult) -> CoreStep {
    for &id in ids {
        core.units_mut()[id].mark_done(result, Duration::from_secs(1));
    }
    core.step(RuntimeEvent::UnitsFinished(ids.to_vec()))
}

fn start(core: &mut CoreRuntime, ids: &[UnitId]) {
    for &id in ids {
        core.units_mut()[id].mark_started();
    }
}

fn mixed_sizes() -> (UnitArena, [UnitId; 4]) {
    let mut arena = UnitArena::new();
    let np8 = arena.push(TestUnit::new("np8", vec!["true".into()]).with_np(8));
    let np4 = arena.push(TestUnit::new("np4", vec!["true".into()]).with_np(4));
    let np2a = arena.push(TestUnit::new("np2a", vec!["true".into()]).with_np(2));
    let np2b = arena.push(TestUnit::new("np2b", vec!["true".into()]).with_np(2));
    (arena, [np8, np4, np2a, np2b])
}

#[test]
fn four_processors_admit_largest_fitting_bin_and_never_the_oversized_unit() {
    let (arena, [_, np4, np2a, np2b]) = mixed_sizes();
    let queue = RunQueue::new(arena, DequeuePolicy::FastFirst);
    let mut core = CoreRuntime::new(queue, Box::new(ProcessorPool::new(4)));

    let step = core.step(RuntimeEvent::Tick);
    assert_eq!(dispatched(&step), vec![np4]);
    assert!(step.keep_running);
    start(&mut core, &[np4]);

    // Full machine: ticks dispatch nothing.
    assert!(dispatched(&core.step(RuntimeEvent::Tick)).is_empty());

    let step = finish(&mut core, &[np4], TestResult::Pass);
    assert_eq!(step.commands[0], CoreCommand::Record(vec![np4]));
    assert_eq!(dispatched(&step), vec![np2a, np2b]);
    start(&mut core, &[np2a, np2b]);

    let step = finish(&mut core, &[np2a], TestResult::Pass);
    assert!(dispatched(&step).is_empty());
    assert!(step.keep_running);

    let step = finish(&mut core, &[np2b], TestResult::Diff);
    assert!(dispatched(&step).is_empty());
    assert!(!step.keep_running);

    let summary = core.finish();
    assert_eq!((summary.pass, summary.diff), (2, 1));
    assert_eq!(summary.notrun.len(), 1);
    assert_eq!(summary.notrun[0].xdir, "np8");
    assert!(summary.notrun[0].blocked_by.is_none());
    let text = summary.to_string();
    assert!(text.contains("notrun: np8\n"));
    assert!(text.ends_with("summary: 3 done, diff=1, notrun=1, pass=2"));
}

#[test]
fn idle_oversubscription_runs_the_oversized_unit_alone_last() {
    let (arena, [np8, np4, np2a, np2b]) = mixed_sizes();
    let queue = RunQueue::new(arena, DequeuePolicy::FastFirst).with_oversubscribe_when_idle(true);
    let mut core = CoreRuntime::new(queue, Box::new(ProcessorPool::new(4)));

    assert_eq!(dispatched(&core.step(RuntimeEvent::Tick)), vec![np4]);
    start(&mut core, &[np4]);
    assert_eq!(dispatched(&finish(&mut core, &[np4], TestResult::Pass)), vec![np2a, np2b]);
    start(&mut core, &[np2a, np2b]);

    // Something is still running, so no oversubscription yet.
    assert!(dispatched(&finish(&mut core, &[np2a], TestResult::Pass)).is_empty());

    let step = finish(&mut core, &[np2b], TestResult::Pass);
    assert_eq!(dispatched(&step), vec![np8]);
    start(&mut core, &[np8]);

    let step = finish(&mut core, &[np8], TestResult::Fail);
    assert!(!step.keep_running);
    let summary = core.finish();
    assert_eq!((summary.pass, summary.fail), (3, 1));
    assert!(summary.notrun.is_empty());
}

#[test]
fn parent_waits_for_children_and_is_blocked_by_a_failure() {
    let mut arena = UnitArena::new();
    let c1 = arena.push(TestUnit::new("c1", vec!["true".into()]));
    let c2 = arena.push(TestUnit::new("c2", vec!["true".into()]));
    let parent = arena.push(TestUnit::new("parent", vec!["true".into()]));
    arena.link(c1, parent);
    arena.link(c2, parent);

    let queue = RunQueue::new(arena, DequeuePolicy::FastFirst);
    let mut core = CoreRuntime::new(queue, Box::new(ProcessorPool::new(8)));

    let step = core.step(RuntimeEvent::Tick);
    assert_eq!(dispatched(&step), vec![c1, c2]);
    start(&mut core, &[c1, c2]);

    let step = finish(&mut core, &[c1], TestResult::Pass);
    assert!(dispatched(&step).is_empty());

    let step = finish(&mut core, &[c2], TestResult::Timeout);
    assert!(dispatched(&step).is_empty());
    assert!(!step.keep_running);

    let summary = core.finish();
    assert_eq!(summary.notrun.len(), 1);
    assert_eq!(summary.notrun[0].xdir, "parent");
    assert_eq!(summary.notrun[0].blocked_by.as_deref(), Some("c2"));
    assert!(!summary.all_passed());
    assert!(summary.to_string().contains("notrun due to dependency: parent (blocked by c2)"));
}
