// src/results/summary.rs

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::queue::{RunQueue, RunState, TestResult, UnitId};

/// A unit that was never dequeued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotRun {
    pub xdir: String,
    /// First child that kept it from running, if it is a blocked parent.
    pub blocked_by: Option<String>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub pass: usize,
    pub diff: usize,
    pub fail: usize,
    pub timeout: usize,
    /// Dequeued but never reached `done` (cancelled runs).
    pub notdone: Vec<String>,
    pub notrun: Vec<NotRun>,
    pub cancelled: bool,
}

impl RunSummary {
    /// Tally the arena after the driver loop ended. `leftovers` are the
    /// units drained from the queue without running.
    pub fn collect(queue: &RunQueue, leftovers: &[UnitId], cancelled: bool) -> Self {
        let units = queue.units();
        let mut summary = RunSummary {
            cancelled,
            ..Default::default()
        };

        for (_, unit) in units.iter() {
            match (unit.state, unit.result) {
                (RunState::Done, TestResult::Pass) => summary.pass += 1,
                (RunState::Done, TestResult::Diff) => summary.diff += 1,
                (RunState::Done, TestResult::Timeout) => summary.timeout += 1,
                (RunState::Done, _) => summary.fail += 1,
                (RunState::NotDone, _) => summary.notdone.push(unit.xdir.clone()),
                (RunState::NotRun, _) => {}
            }
        }

        for &id in leftovers {
            let blocked_by = units.bad_child(id).map(|c| units[c].xdir.clone());
            let xdir = units[id].xdir.clone();
            match &blocked_by {
                Some(child) => warn!(unit = %xdir, blocked_by = %child, "notrun due to dependency"),
                None => warn!(unit = %xdir, "notrun"),
            }
            summary.notrun.push(NotRun { xdir, blocked_by });
        }
        summary
    }

    pub fn total_done(&self) -> usize {
        self.pass + self.diff + self.fail + self.timeout
    }

    /// Every unit ran and passed or diffed.
    pub fn all_passed(&self) -> bool {
        self.fail == 0
            && self.timeout == 0
            && self.notdone.is_empty()
            && self.notrun.is_empty()
            && !self.cancelled
    }

    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        BTreeMap::from([
            ("pass", self.pass),
            ("diff", self.diff),
            ("fail", self.fail),
            ("timeout", self.timeout),
            ("notdone", self.notdone.len()),
            ("notrun", self.notrun.len()),
        ])
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for n in &self.notrun {
            match &n.blocked_by {
                Some(child) => writeln!(f, "notrun due to dependency: {} (blocked by {child})", n.xdir)?,
                None => writeln!(f, "notrun: {}", n.xdir)?,
            }
        }
        for xdir in &self.notdone {
            writeln!(f, "notdone: {xdir}")?;
        }
        if self.cancelled {
            writeln!(f, "run cancelled")?;
        }
        let parts: Vec<String> = self
            .counts()
            .into_iter()
            .filter(|&(_, n)| n > 0)
            .map(|(name, n)| format!("{name}={n}"))
            .collect();
        write!(f, "summary: {} done", self.total_done())?;
        if !parts.is_empty() {
            write!(f, ", {}", parts.join(", "))?;
        }
        Ok(())
    }
}
