// src/results/mod.rs

//! Hand-off of finished units and jobs to the results collaborator.
//!
//! The driver loop is the only writer, so sinks need no locking.

pub mod jsonl;
pub mod summary;

use std::fmt::Debug;

use anyhow::Result;
use serde::Serialize;

use crate::batch::BatchJobRecord;
use crate::queue::{RunState, TestResult, TestUnit};

pub use jsonl::JsonLinesSink;
pub use summary::{NotRun, RunSummary};

/// Final record of one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitRecord {
    pub xdir: String,
    pub state: RunState,
    pub result: TestResult,
    /// Seconds.
    pub elapsed: Option<f64>,
    pub start_epoch: Option<f64>,
}

impl From<&TestUnit> for UnitRecord {
    fn from(unit: &TestUnit) -> Self {
        Self {
            xdir: unit.xdir.clone(),
            state: unit.state,
            result: unit.result,
            elapsed: unit.elapsed.map(|d| d.as_secs_f64()),
            start_epoch: unit.start_epoch(),
        }
    }
}

/// Append-only destination for results.
pub trait ResultsSink: Send + Debug {
    fn record_unit(&mut self, record: &UnitRecord) -> Result<()>;

    fn record_job(&mut self, record: &BatchJobRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ResultsSink for NullSink {
    fn record_unit(&mut self, _record: &UnitRecord) -> Result<()> {
        Ok(())
    }

    fn record_job(&mut self, _record: &BatchJobRecord) -> Result<()> {
        Ok(())
    }
}
