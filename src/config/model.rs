// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{BatchSystemKind, DequeuePolicy};

/// Configuration exactly as deserialized from TOML, before validation.
///
/// ```toml
/// [config]
/// processors = 8
/// dequeue_policy = "fast-first"
///
/// [default]
/// timeout = "1h"
///
/// [test."mesh/refine.np=4"]
/// command = ["./run_test.sh"]
/// np = 4
/// keywords = ["fast"]
/// parent = "mesh/analyze"
/// ```
///
/// All sections are optional and have reasonable defaults; an empty
/// `[test]` table is rejected by validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub default: DefaultSection,

    #[serde(default)]
    pub batch: BatchSection,

    /// Keys are execute directories, the identity of each test unit.
    #[serde(default)]
    pub test: BTreeMap<String, TestConfig>,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub default: DefaultSection,
    pub batch: BatchSection,
    pub test: BTreeMap<String, TestConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            config: raw.config,
            default: raw.default,
            batch: raw.batch,
            test: raw.test,
        }
    }
}

/// `[config]` section: harness-wide behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Processor budget for local runs. Defaults to the machine's
    /// available parallelism.
    #[serde(default)]
    pub processors: Option<u32>,

    #[serde(default)]
    pub dequeue_policy: DequeuePolicy,

    /// Interval between driver ticks.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// How long a timed-out unit gets between SIGINT and SIGKILL.
    #[serde(default = "default_interrupt_to_kill", with = "humantime_serde")]
    pub interrupt_to_kill: Duration,

    /// Redirect test output into a log file in the execute directory.
    #[serde(default = "default_true")]
    pub logfile: bool,

    #[serde(default = "default_true")]
    pub preclean: bool,

    #[serde(default)]
    pub postclean: bool,

    #[serde(default)]
    pub baseline: bool,

    #[serde(default)]
    pub analyze: bool,

    /// Passed through to tests as `--mpirun_opts <opts>`.
    #[serde(default)]
    pub mpi_opts: Option<String>,

    /// Allow a unit larger than the whole budget to run once nothing else
    /// is. Off by default: such units are reported as not run.
    #[serde(default)]
    pub oversubscribe_when_idle: bool,

    /// Directory that execute directories are relative to.
    #[serde(default = "default_test_root")]
    pub test_root: PathBuf,

    /// JSON-lines results file.
    #[serde(default)]
    pub results: Option<PathBuf>,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_interrupt_to_kill() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_test_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            processors: None,
            dequeue_policy: DequeuePolicy::default(),
            poll_interval: default_poll_interval(),
            interrupt_to_kill: default_interrupt_to_kill(),
            logfile: true,
            preclean: true,
            postclean: false,
            baseline: false,
            analyze: false,
            mpi_opts: None,
            oversubscribe_when_idle: false,
            test_root: default_test_root(),
            results: None,
        }
    }
}

impl ConfigSection {
    /// Configured processor count, or what the machine reports.
    pub fn effective_processors(&self) -> u32 {
        self.processors.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1)
        })
    }
}

/// `[default]` section: values applied to tests that omit them.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DefaultSection {
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub np: Option<u32>,
}

/// `[batch]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSection {
    /// Submit units to the batch system instead of running them locally.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub system: BatchSystemKind,

    #[serde(default)]
    pub queue: Option<String>,

    #[serde(default)]
    pub account: Option<String>,

    /// Cores per node; falls back to `[config].processors`.
    #[serde(default)]
    pub ppn: Option<u32>,

    /// Maximum number of jobs in flight at once.
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,

    #[serde(default = "default_units_per_job")]
    pub units_per_job: usize,

    /// Driver tick in batch mode; falls back to `[config].poll_interval`.
    #[serde(default, with = "humantime_serde")]
    pub poll_interval: Option<Duration>,

    /// Per-call limit on queue submit/query/cancel commands.
    #[serde(default = "default_query_timeout", with = "humantime_serde")]
    pub query_timeout: Duration,

    /// Where job scripts and job logs are written.
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    #[serde(default)]
    pub timeouts: BatchTimeoutsSection,
}

fn default_max_jobs() -> usize {
    5
}

fn default_units_per_job() -> usize {
    1
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("batchset")
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            enabled: false,
            system: BatchSystemKind::default(),
            queue: None,
            account: None,
            ppn: None,
            max_jobs: default_max_jobs(),
            units_per_job: default_units_per_job(),
            poll_interval: None,
            query_timeout: default_query_timeout(),
            scripts_dir: default_scripts_dir(),
            timeouts: BatchTimeoutsSection::default(),
        }
    }
}

/// `[batch.timeouts]`: the three finished-ness grace periods plus the log
/// re-read interval.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BatchTimeoutsSection {
    #[serde(default = "default_script_timeout", with = "humantime_serde")]
    pub script: Duration,

    #[serde(default = "default_missing_timeout", with = "humantime_serde")]
    pub missing: Duration,

    #[serde(default = "default_complete_timeout", with = "humantime_serde")]
    pub complete: Duration,

    #[serde(default = "default_logcheck", with = "humantime_serde")]
    pub logcheck: Duration,
}

fn default_script_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_missing_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_complete_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_logcheck() -> Duration {
    Duration::from_secs(15)
}

impl Default for BatchTimeoutsSection {
    fn default() -> Self {
        Self {
            script: default_script_timeout(),
            missing: default_missing_timeout(),
            complete: default_complete_timeout(),
            logcheck: default_logcheck(),
        }
    }
}

/// `[test.<xdir>]` section: one runnable test unit.
#[derive(Debug, Clone, Deserialize)]
pub struct TestConfig {
    /// Resolved launch command (program + arguments).
    pub command: Vec<String>,

    #[serde(default)]
    pub np: Option<u32>,

    /// Zero disables the timeout.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub keywords: Vec<String>,

    /// Execute directory of the analyze unit that waits on this one.
    #[serde(default)]
    pub parent: Option<String>,

    /// Directory link/copy sources are relative to. Defaults to the
    /// directory holding the config file.
    #[serde(default)]
    pub source_dir: Option<PathBuf>,

    #[serde(default)]
    pub link_files: Vec<FileSpec>,

    #[serde(default)]
    pub copy_files: Vec<FileSpec>,
}

/// A file to stage into the execute directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileSpec {
    /// Literal path or glob.
    pub src: String,

    /// Name inside the execute directory; defaults to the source's file name.
    #[serde(default)]
    pub dest: Option<String>,
}
