use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vvexec::exec::{BackendFuture, ExecutionBackend, PollReport};
use vvexec::queue::{RunState, TestResult, UnitArena, UnitId};

/// What the fake backend did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Launched(String),
    Finished(String),
    Cancelled,
}

/// A fake backend that:
/// - records every launch and completion
/// - finishes each unit `polls_to_finish` polls after its launch with the
///   result scripted for its execute directory (default `pass`)
/// - on cancel, marks everything in flight `fail` and reports it on the
///   next poll, like the local backend does after a kill.
#[derive(Debug, Clone)]
pub struct FakeBackend {
    results: HashMap<String, TestResult>,
    polls_to_finish: usize,
    running: BTreeMap<UnitId, usize>,
    events: Arc<Mutex<Vec<BackendEvent>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            results: HashMap::new(),
            polls_to_finish: 1,
            running: BTreeMap::new(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_result(mut self, xdir: &str, result: TestResult) -> Self {
        self.results.insert(xdir.to_string(), result);
        self
    }

    pub fn with_polls_to_finish(mut self, polls: usize) -> Self {
        self.polls_to_finish = polls.max(1);
        self
    }

    /// Handle to the event log that stays valid after the backend is moved
    /// into a runtime.
    pub fn events(&self) -> Arc<Mutex<Vec<BackendEvent>>> {
        Arc::clone(&self.events)
    }

    fn push(&self, event: BackendEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionBackend for FakeBackend {
    fn launch<'a>(&'a mut self, units: &'a mut UnitArena, ids: Vec<UnitId>) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            for id in ids {
                units[id].mark_started();
                self.push(BackendEvent::Launched(units[id].xdir.clone()));
                self.running.insert(id, self.polls_to_finish);
            }
            Ok(())
        })
    }

    fn poll<'a>(&'a mut self, units: &'a mut UnitArena) -> BackendFuture<'a, PollReport> {
        Box::pin(async move {
            let mut report = PollReport::default();
            for (&id, left) in self.running.iter_mut() {
                *left -= 1;
                if *left == 0 {
                    report.finished.push(id);
                }
            }
            for id in &report.finished {
                self.running.remove(id);
                let unit = &mut units[*id];
                if unit.state == RunState::Done {
                    continue;
                }
                let result = self
                    .results
                    .get(&unit.xdir)
                    .copied()
                    .unwrap_or(TestResult::Pass);
                unit.mark_done(result, Duration::from_millis(10));
                self.push(BackendEvent::Finished(unit.xdir.clone()));
            }
            Ok(report)
        })
    }

    fn cancel<'a>(&'a mut self, units: &'a mut UnitArena) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.events.lock().unwrap().push(BackendEvent::Cancelled);
            for (&id, left) in self.running.iter_mut() {
                units[id].mark_done(TestResult::Fail, Duration::ZERO);
                self.events
                    .lock()
                    .unwrap()
                    .push(BackendEvent::Finished(units[id].xdir.clone()));
                *left = 1;
            }
            Ok(())
        })
    }

    fn in_flight(&self) -> usize {
        self.running.len()
    }
}
