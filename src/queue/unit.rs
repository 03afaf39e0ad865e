// src/queue/unit.rs

//! Test units and the arena that owns them.

use std::collections::{BTreeSet, HashMap};
use std::ops::{Index, IndexMut};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::config::model::{ConfigFile, FileSpec};

/// Keyword that moves a unit ahead of its processor bin.
pub const FAST_KEYWORD: &str = "fast";

/// Timeout used when neither the test nor `[default]` sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Handle into a [`UnitArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UnitId(usize);

impl UnitId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    NotRun,
    NotDone,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    Pass,
    Diff,
    Fail,
    Timeout,
    Unknown,
}

impl TestResult {
    /// Results a child may finish with for its parent to run.
    pub fn satisfies_parent(self) -> bool {
        matches!(self, TestResult::Pass | TestResult::Diff)
    }
}

/// One runnable instance of a test.
///
/// The execute directory is the display key; the arena index is the
/// identity used by the scheduler.
#[derive(Debug, Clone)]
pub struct TestUnit {
    pub xdir: String,
    pub np: u32,
    /// Zero means no timeout.
    pub timeout: Duration,
    pub keywords: BTreeSet<String>,
    pub command: Vec<String>,
    pub source_dir: Option<PathBuf>,
    pub link_files: Vec<FileSpec>,
    pub copy_files: Vec<FileSpec>,

    parent: Option<UnitId>,
    children: Vec<UnitId>,

    pub state: RunState,
    pub result: TestResult,
    pub start: Option<SystemTime>,
    pub elapsed: Option<Duration>,
}

impl TestUnit {
    pub fn new(xdir: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            xdir: xdir.into(),
            np: 1,
            timeout: DEFAULT_TIMEOUT,
            keywords: BTreeSet::new(),
            command,
            source_dir: None,
            link_files: Vec::new(),
            copy_files: Vec::new(),
            parent: None,
            children: Vec::new(),
            state: RunState::NotRun,
            result: TestResult::Unknown,
            start: None,
            elapsed: None,
        }
    }

    pub fn with_np(mut self, np: u32) -> Self {
        self.np = np;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.insert(keyword.into());
        self
    }

    pub fn is_fast(&self) -> bool {
        self.keywords.contains(FAST_KEYWORD)
    }

    pub fn is_parent(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn parent(&self) -> Option<UnitId> {
        self.parent
    }

    pub fn children(&self) -> &[UnitId] {
        &self.children
    }

    pub fn mark_started(&mut self) {
        self.state = RunState::NotDone;
        self.start = Some(SystemTime::now());
    }

    pub fn mark_done(&mut self, result: TestResult, elapsed: Duration) {
        self.state = RunState::Done;
        self.result = result;
        self.elapsed = Some(elapsed);
    }

    /// Seconds since the epoch at which the unit started, if it did.
    pub fn start_epoch(&self) -> Option<f64> {
        self.start
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
    }
}

/// Owner of every [`TestUnit`] for one invocation.
#[derive(Debug, Clone, Default)]
pub struct UnitArena {
    units: Vec<TestUnit>,
    by_xdir: HashMap<String, UnitId>,
}

impl UnitArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the arena from a validated config. Units keep the config's
    /// key order; parent links are resolved after all units exist.
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let mut arena = Self::new();
        let default_np = cfg.default.np.unwrap_or(1);
        let default_timeout = cfg.default.timeout.unwrap_or(DEFAULT_TIMEOUT);

        for (xdir, tc) in cfg.test.iter() {
            let mut unit = TestUnit::new(xdir.clone(), tc.command.clone())
                .with_np(tc.np.unwrap_or(default_np))
                .with_timeout(tc.timeout.unwrap_or(default_timeout));
            unit.keywords = tc.keywords.iter().cloned().collect();
            unit.source_dir = tc.source_dir.clone();
            unit.link_files = tc.link_files.clone();
            unit.copy_files = tc.copy_files.clone();
            arena.push(unit);
        }

        for (xdir, tc) in cfg.test.iter() {
            let Some(parent) = tc.parent.as_deref() else {
                continue;
            };
            if let (Some(child), Some(parent)) = (arena.find(xdir), arena.find(parent)) {
                arena.link(child, parent);
            }
        }

        arena
    }

    pub fn push(&mut self, unit: TestUnit) -> UnitId {
        let id = UnitId(self.units.len());
        self.by_xdir.insert(unit.xdir.clone(), id);
        self.units.push(unit);
        id
    }

    /// Record `child` as a prerequisite of `parent`.
    pub fn link(&mut self, child: UnitId, parent: UnitId) {
        self.units[child.0].parent = Some(parent);
        if !self.units[parent.0].children.contains(&child) {
            self.units[parent.0].children.push(child);
        }
    }

    pub fn find(&self, xdir: &str) -> Option<UnitId> {
        self.by_xdir.get(xdir).copied()
    }

    pub fn get(&self, id: UnitId) -> Option<&TestUnit> {
        self.units.get(id.0)
    }

    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut TestUnit> {
        self.units.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = UnitId> + '_ {
        (0..self.units.len()).map(UnitId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (UnitId, &TestUnit)> {
        self.units.iter().enumerate().map(|(i, u)| (UnitId(i), u))
    }

    /// First child of `id` that is not done, or done with a result other
    /// than pass/diff. `None` for leaves and for parents that may run.
    pub fn bad_child(&self, id: UnitId) -> Option<UnitId> {
        self.units[id.0].children.iter().copied().find(|&child| {
            let c = &self.units[child.0];
            c.state != RunState::Done || !c.result.satisfies_parent()
        })
    }
}

impl Index<UnitId> for UnitArena {
    type Output = TestUnit;

    fn index(&self, id: UnitId) -> &TestUnit {
        &self.units[id.0]
    }
}

impl IndexMut<UnitId> for UnitArena {
    fn index_mut(&mut self, id: UnitId) -> &mut TestUnit {
        &mut self.units[id.0]
    }
}
