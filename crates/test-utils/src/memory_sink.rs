use std::sync::{Arc, Mutex};

use vvexec::batch::BatchJobRecord;
use vvexec::results::{ResultsSink, UnitRecord};

/// Keeps every record in memory; clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    units: Arc<Mutex<Vec<UnitRecord>>>,
    jobs: Arc<Mutex<Vec<BatchJobRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn units(&self) -> Vec<UnitRecord> {
        self.units.lock().unwrap().clone()
    }

    pub fn jobs(&self) -> Vec<BatchJobRecord> {
        self.jobs.lock().unwrap().clone()
    }

    /// Execute directories in the order they were recorded.
    pub fn recorded_xdirs(&self) -> Vec<String> {
        self.units().into_iter().map(|r| r.xdir).collect()
    }
}

impl ResultsSink for MemorySink {
    fn record_unit(&mut self, record: &UnitRecord) -> anyhow::Result<()> {
        self.units.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn record_job(&mut self, record: &BatchJobRecord) -> anyhow::Result<()> {
        self.jobs.lock().unwrap().push(record.clone());
        Ok(())
    }
}
