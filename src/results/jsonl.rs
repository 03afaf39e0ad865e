// src/results/jsonl.rs

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use super::{ResultsSink, UnitRecord};
use crate::batch::BatchJobRecord;

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Line<'a> {
    Unit(&'a UnitRecord),
    Job(&'a BatchJobRecord),
}

/// One JSON object per line, appended as units finish.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening results file {:?}", path))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&mut self, line: &Line<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.writer, line)
            .with_context(|| format!("writing to {:?}", self.path))?;
        self.writer.write_all(b"\n")?;
        // Each record is flushed so a killed run still leaves complete lines.
        self.writer.flush()?;
        Ok(())
    }
}

impl ResultsSink for JsonLinesSink {
    fn record_unit(&mut self, record: &UnitRecord) -> Result<()> {
        self.write_line(&Line::Unit(record))
    }

    fn record_job(&mut self, record: &BatchJobRecord) -> Result<()> {
        self.write_line(&Line::Job(record))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{RunState, TestResult};

    #[test]
    fn appends_tagged_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out/results.jsonl");
        let mut sink = JsonLinesSink::create(&path).unwrap();

        let record = UnitRecord {
            xdir: "a/b".to_string(),
            state: RunState::Done,
            result: TestResult::Diff,
            elapsed: Some(1.5),
            start_epoch: Some(100.0),
        };
        sink.record_unit(&record).unwrap();
        sink.record_unit(&record).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "unit");
        assert_eq!(lines[0]["xdir"], "a/b");
        assert_eq!(lines[0]["state"], "done");
        assert_eq!(lines[0]["result"], "diff");
        assert_eq!(lines[0]["elapsed"], 1.5);
    }
}
