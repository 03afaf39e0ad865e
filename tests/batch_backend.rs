// tests/batch_backend.rs

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use vvexec::batch::{BatchInterface, BatchTimeouts, CommandOutput, JobExit, Slurm};
use vvexec::exec::{BatchBackend, ExecSettings, ExecutionBackend, JobLayout};
use vvexec::fs::MockFileSystem;
use vvexec::proc::PsInspector;
use vvexec::queue::{RunState, TestResult, TestUnit, UnitArena, UnitId};
use vvexec_test_utils::{init_tracing, FakeRunner};

type TestResultBox = Result<(), Box<dyn Error>>;

struct Harness {
    tmp: TempDir,
    runner: FakeRunner,
    fs: MockFileSystem,
    backend: BatchBackend,
    units: UnitArena,
    ids: Vec<UnitId>,
}

impl Harness {
    fn new(xdirs: &[&str], units_per_job: usize) -> Result<Self, Box<dyn Error>> {
        let tmp = tempfile::tempdir()?;
        let runner = FakeRunner::new();
        let fs = MockFileSystem::new();

        let timeouts = BatchTimeouts {
            script: Duration::from_secs(3600),
            missing: Duration::from_secs(3600),
            complete: Duration::ZERO,
            logcheck: Duration::from_millis(1),
        };
        let interface = BatchInterface::new(
            Box::new(Slurm),
            Arc::new(runner.clone()),
            Arc::new(fs.clone()),
            timeouts,
            Duration::from_secs(5),
        );
        let settings = ExecSettings {
            test_root: tmp.path().to_path_buf(),
            ..ExecSettings::default()
        };
        let layout = JobLayout {
            scripts_dir: tmp.path().join("batch"),
            units_per_job,
            ppn: 4,
            queue: Some("debug".to_string()),
            account: None,
        };
        let backend = BatchBackend::new(
            settings,
            Arc::new(PsInspector::new()),
            Arc::new(fs.clone()),
            interface,
            layout,
        );

        let mut units = UnitArena::new();
        let ids = xdirs
            .iter()
            .map(|x| units.push(TestUnit::new(*x, vec!["./run".into(), "--fast".into()])))
            .collect();

        Ok(Self {
            tmp,
            runner,
            fs,
            backend,
            units,
            ids,
        })
    }

    fn job_path(&self, name: &str, ext: &str) -> PathBuf {
        self.tmp.path().join("batch").join(format!("{name}.{ext}"))
    }

    fn unit_log(&self, xdir: &str) -> PathBuf {
        self.tmp.path().join(xdir).join("execute.log")
    }

    fn accept_submissions(&self, job_id: &str) {
        self.runner
            .set_stdout("sbatch", &format!("Submitted batch job {job_id}\n"));
        self.runner.set_stdout("squeue", "");
    }

    fn write_job_log(&self, name: &str, statuses: &[(&str, i32)]) {
        let now = Utc::now().timestamp();
        let mut text = format!("START DATE: {now}\n");
        for (xdir, code) in statuses {
            text.push_str(&format!("EXIT STATUS: {code} {xdir}\n"));
        }
        text.push_str(&format!("STOP DATE: {now}\n"));
        self.fs.add_file(self.job_path(name, "log"), text);
    }
}

fn contents(fs: &MockFileSystem, path: &Path) -> Result<String, Box<dyn Error>> {
    fs.contents(path)
        .ok_or_else(|| format!("{} was not written", path.display()).into())
}

#[tokio::test]
async fn units_share_a_job_and_are_classified_from_exit_status_lines() -> TestResultBox {
    init_tracing();
    let mut h = Harness::new(&["a", "b"], 2)?;
    h.accept_submissions("42");

    let ids = h.ids.clone();
    h.backend.launch(&mut h.units, ids.clone()).await?;
    assert_eq!(h.backend.in_flight(), 2);
    assert!(ids.iter().all(|&id| h.units[id].state == RunState::NotDone));
    assert!(h.tmp.path().join("a").is_dir());

    let script = contents(&h.fs, &h.job_path("vvexec_0000", "sh"))?;
    assert!(script.contains("#SBATCH --partition=debug"));
    assert!(script.contains("#SBATCH --nodes=1"));
    assert!(script.contains("EXIT STATUS: $? a"));
    assert!(script.contains("EXIT STATUS: $? b"));
    assert!(script.contains("./run --fast > execute.log 2>&1"));
    assert_eq!(h.runner.calls_to("sbatch"), 1);

    let report = h.backend.poll(&mut h.units).await?;
    assert!(report.finished.is_empty());

    h.write_job_log("vvexec_0000", &[("a", 0), ("b", 64)]);
    tokio::time::sleep(Duration::from_millis(5)).await;
    let report = h.backend.poll(&mut h.units).await?;
    assert_eq!(report.finished, ids);
    assert_eq!(h.units[ids[0]].result, TestResult::Pass);
    assert_eq!(h.units[ids[1]].result, TestResult::Diff);

    assert_eq!(report.jobs.len(), 1);
    let job = &report.jobs[0];
    assert_eq!(job.name, "vvexec_0000");
    assert_eq!(job.job_id.as_deref(), Some("42"));
    assert_eq!(job.exit, Some(JobExit::Success));
    assert!(job.script_start.is_some());
    assert_eq!(h.backend.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn overrunning_unit_is_limited_in_the_job_and_reported_as_timeout() -> TestResultBox {
    init_tracing();
    let mut h = Harness::new(&["hung", "unlimited"], 2)?;
    h.accept_submissions("9");

    let ids = h.ids.clone();
    h.units[ids[0]].timeout = Duration::from_secs(10);
    h.units[ids[1]].timeout = Duration::ZERO;
    h.backend.launch(&mut h.units, ids.clone()).await?;

    let script = contents(&h.fs, &h.job_path("vvexec_0000", "sh"))?;
    assert!(script.contains("TIMEOUT=60 timeout -s INT -k 30 10 ./run --fast > execute.log"));
    let unlimited = script
        .lines()
        .find(|l| l.contains("/unlimited"))
        .ok_or("no payload for the unlimited unit")?;
    assert!(!unlimited.contains("timeout -s"), "{unlimited}");

    h.write_job_log("vvexec_0000", &[("hung", 124), ("unlimited", 124)]);
    h.backend.poll(&mut h.units).await?;
    assert_eq!(h.units[ids[0]].result, TestResult::Timeout);
    assert_eq!(h.units[ids[1]].result, TestResult::Fail);
    Ok(())
}

#[tokio::test]
async fn unit_without_exit_status_fails() -> TestResultBox {
    init_tracing();
    let mut h = Harness::new(&["ok", "lost"], 2)?;
    h.accept_submissions("7");

    let ids = h.ids.clone();
    h.backend.launch(&mut h.units, ids.clone()).await?;
    h.write_job_log("vvexec_0000", &[("ok", 0)]);

    let report = h.backend.poll(&mut h.units).await?;
    assert_eq!(report.finished.len(), 2);
    assert_eq!(h.units[ids[0]].result, TestResult::Pass);
    assert_eq!(h.units[ids[1]].result, TestResult::Fail);
    Ok(())
}

#[tokio::test]
async fn one_unit_per_job_splits_the_dispatch() -> TestResultBox {
    let mut h = Harness::new(&["x", "y", "z"], 1)?;
    h.accept_submissions("1");

    let ids = h.ids.clone();
    h.backend.launch(&mut h.units, ids).await?;
    assert_eq!(h.runner.calls_to("sbatch"), 3);
    for name in ["vvexec_0000", "vvexec_0001", "vvexec_0002"] {
        contents(&h.fs, &h.job_path(name, "sh"))?;
    }
    Ok(())
}

#[tokio::test]
async fn rejected_submission_fails_units_and_logs_submit_output() -> TestResultBox {
    init_tracing();
    let mut h = Harness::new(&["a", "b"], 2)?;
    h.runner.push_output(
        "sbatch",
        CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "sbatch: error: Batch job submission failed: Invalid account\n".to_string(),
        },
    );

    let ids = h.ids.clone();
    h.backend.launch(&mut h.units, ids.clone()).await?;
    assert!(ids.iter().all(|&id| h.units[id].state == RunState::Done));
    assert!(ids.iter().all(|&id| h.units[id].result == TestResult::Fail));

    let log = contents(&h.fs, &h.unit_log("b"))?;
    assert!(log.contains("vvexec: batch submission failed"));
    assert!(log.contains("Invalid account"));

    // Reported once, on the next poll, without touching the queue.
    let report = h.backend.poll(&mut h.units).await?;
    assert_eq!(report.finished, ids);
    assert!(report.jobs.is_empty());
    assert_eq!(h.runner.calls_to("squeue"), 0);
    assert!(h.backend.poll(&mut h.units).await?.finished.is_empty());
    Ok(())
}

#[tokio::test]
async fn cancel_forwards_every_job_to_the_queue_manager() -> TestResultBox {
    let mut h = Harness::new(&["a", "b"], 1)?;
    h.runner.push_output(
        "sbatch",
        CommandOutput {
            code: Some(0),
            stdout: "Submitted batch job 100\n".to_string(),
            stderr: String::new(),
        },
    );
    h.runner.push_output(
        "sbatch",
        CommandOutput {
            code: Some(0),
            stdout: "Submitted batch job 101\n".to_string(),
            stderr: String::new(),
        },
    );

    let ids = h.ids.clone();
    h.backend.launch(&mut h.units, ids).await?;
    h.backend.cancel(&mut h.units).await?;

    let cancels: Vec<Vec<String>> = h
        .runner
        .calls()
        .into_iter()
        .filter(|argv| argv[0] == "scancel")
        .collect();
    assert_eq!(cancels, vec![vec!["scancel", "100", "101"]]);
    assert!(h.backend.interface().jobs().all(|j| j.state.cancelled));
    Ok(())
}
