// src/batch/queue_system.rs

//! Queue-manager flavors: directive headers, command lines and output
//! parsing for SLURM and LSF.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::batch::job::{format_wall_time, BatchJob};
use crate::batch::script::parse_date;
use crate::batch::state::{QueueEntry, QueueState};
use crate::types::BatchSystemKind;

/// Job id to its row in one queue snapshot.
pub type QueueSnapshot = HashMap<String, QueueEntry>;

/// A batch queue manager driven through its command-line tools.
pub trait QueueSystem: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Directive lines placed right after the shebang.
    fn header(&self, job: &BatchJob) -> Vec<String>;

    fn submit_command(&self, script: &Path) -> Vec<String>;

    /// Job id from the submit command's output, if it was accepted.
    fn parse_submit_output(&self, stdout: &str, stderr: &str) -> Option<String>;

    /// One command that lists every job of interest.
    fn query_command(&self) -> Vec<String>;

    fn parse_query_output(&self, stdout: &str) -> QueueSnapshot;

    fn cancel_command(&self, job_ids: &[String]) -> Vec<String>;
}

pub fn for_kind(kind: BatchSystemKind) -> Box<dyn QueueSystem> {
    match kind {
        BatchSystemKind::Slurm => Box::new(Slurm),
        BatchSystemKind::Lsf => Box::new(Lsf),
    }
}

static SLURM_SUBMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Submitted batch job\s+(\d+)").expect("valid regex"));

static LSF_SUBMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Job\s+<(\d+)>\s+is submitted").expect("valid regex"));

/// Field separator used in the `squeue` format string.
const SLURM_SEP: &str = " _ ";

#[derive(Debug, Clone, Copy, Default)]
pub struct Slurm;

impl QueueSystem for Slurm {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn header(&self, job: &BatchJob) -> Vec<String> {
        let log = job.log.display();
        let mut lines = vec![
            format!("#SBATCH --job-name={}", job.name),
            format!("#SBATCH --nodes={}", job.num_nodes),
            format!("#SBATCH --time={}", format_wall_time(job.wall_time)),
            format!("#SBATCH --output={log}"),
            format!("#SBATCH --error={log}"),
        ];
        if let Some(queue) = &job.queue {
            lines.push(format!("#SBATCH --partition={queue}"));
        }
        if let Some(account) = &job.account {
            lines.push(format!("#SBATCH --account={account}"));
        }
        lines
    }

    fn submit_command(&self, script: &Path) -> Vec<String> {
        vec!["sbatch".to_string(), script.display().to_string()]
    }

    fn parse_submit_output(&self, stdout: &str, _stderr: &str) -> Option<String> {
        SLURM_SUBMIT_RE
            .captures(stdout)
            .map(|caps| caps[1].to_string())
    }

    fn query_command(&self) -> Vec<String> {
        vec![
            "squeue".to_string(),
            "--noheader".to_string(),
            "-o".to_string(),
            ["%i", "%t", "%V", "%S", "%M"].join(SLURM_SEP),
        ]
    }

    fn parse_query_output(&self, stdout: &str) -> QueueSnapshot {
        let mut snapshot = QueueSnapshot::new();
        for line in stdout.lines() {
            let cols: Vec<&str> = line.split(SLURM_SEP).map(str::trim).collect();
            let [id, state, _submit, start, used] = cols.as_slice() else {
                continue;
            };
            if id.is_empty() {
                continue;
            }
            let state = match *state {
                "PD" | "CF" => QueueState::Pending,
                "R" => QueueState::Running,
                _ => QueueState::Complete,
            };
            snapshot.insert(
                id.to_string(),
                QueueEntry {
                    state,
                    start: parse_date(start),
                    used: parse_slurm_elapsed(used),
                },
            );
        }
        snapshot
    }

    fn cancel_command(&self, job_ids: &[String]) -> Vec<String> {
        std::iter::once("scancel".to_string())
            .chain(job_ids.iter().cloned())
            .collect()
    }
}

/// `M:SS`, `H:MM:SS` or `D-HH:MM:SS`.
pub fn parse_slurm_elapsed(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (days, clock) = match s.split_once('-') {
        Some((d, rest)) => (d.parse::<u64>().ok()?, rest),
        None => (0, s),
    };
    let parts = clock
        .split(':')
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<u64>>>()?;
    let (h, m, sec) = match parts.as_slice() {
        [m, s] => (0, *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };
    Some(Duration::from_secs(((days * 24 + h) * 60 + m) * 60 + sec))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Lsf;

impl QueueSystem for Lsf {
    fn name(&self) -> &'static str {
        "lsf"
    }

    fn header(&self, job: &BatchJob) -> Vec<String> {
        let minutes = job.wall_time.as_secs().div_ceil(60).max(1);
        let mut lines = vec![
            format!("#BSUB -J {}", job.name),
            format!("#BSUB -nnodes {}", job.num_nodes),
            format!("#BSUB -W {minutes}"),
            format!("#BSUB -o {}", job.log.display()),
        ];
        if let Some(queue) = &job.queue {
            lines.push(format!("#BSUB -q {queue}"));
        }
        if let Some(account) = &job.account {
            lines.push(format!("#BSUB -G {account}"));
        }
        lines
    }

    fn submit_command(&self, script: &Path) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("bsub < {}", shell_words::quote(&script.to_string_lossy())),
        ]
    }

    fn parse_submit_output(&self, stdout: &str, stderr: &str) -> Option<String> {
        LSF_SUBMIT_RE
            .captures(stdout)
            .or_else(|| LSF_SUBMIT_RE.captures(stderr))
            .map(|caps| caps[1].to_string())
    }

    fn query_command(&self) -> Vec<String> {
        ["bjobs", "-a", "-w", "-noheader"]
            .map(String::from)
            .to_vec()
    }

    fn parse_query_output(&self, stdout: &str) -> QueueSnapshot {
        let mut snapshot = QueueSnapshot::new();
        for line in stdout.lines() {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let (Some(id), Some(stat)) = (cols.first(), cols.get(2)) else {
                continue;
            };
            if !id.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            let state = match *stat {
                "PEND" => QueueState::Pending,
                "RUN" => QueueState::Running,
                s if s.ends_with("SUSP") => QueueState::Running,
                "DONE" | "EXIT" => QueueState::Complete,
                _ => continue,
            };
            snapshot.insert(id.to_string(), QueueEntry::new(state));
        }
        snapshot
    }

    fn cancel_command(&self, job_ids: &[String]) -> Vec<String> {
        std::iter::once("bkill".to_string())
            .chain(job_ids.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn slurm_submit_and_query() {
        let q = Slurm;
        assert_eq!(
            q.parse_submit_output("Submitted batch job 4242\n", ""),
            Some("4242".to_string())
        );
        assert_eq!(q.parse_submit_output("sbatch: error: invalid account", ""), None);

        let out = "\
101 _ PD _ 2018-04-24T13:00:00 _ N/A _ 0:00
102 _ R _ 2018-04-24T13:00:00 _ 2018-04-24T13:01:00 _ 1:02:03
103 _ CG _ 2018-04-24T13:00:00 _ 2018-04-24T13:01:00 _ 1-00:00:05
garbage line
";
        let snap = q.parse_query_output(out);
        assert_eq!(snap.len(), 3);
        assert_eq!(snap["101"].state, QueueState::Pending);
        assert_eq!(snap["101"].start, None);
        assert_eq!(snap["102"].state, QueueState::Running);
        assert!(snap["102"].start.is_some());
        assert_eq!(snap["102"].used, Some(Duration::from_secs(3723)));
        assert_eq!(snap["103"].state, QueueState::Complete);
        assert_eq!(snap["103"].used, Some(Duration::from_secs(86_405)));
    }

    #[test]
    fn slurm_elapsed_forms() {
        assert_eq!(parse_slurm_elapsed("0:07"), Some(Duration::from_secs(7)));
        assert_eq!(parse_slurm_elapsed("12:34"), Some(Duration::from_secs(754)));
        assert_eq!(parse_slurm_elapsed("INVALID"), None);
    }

    #[test]
    fn slurm_header_carries_resources() {
        let mut job = BatchJob::new("job_3", PathBuf::from("/b/job_3.sh"), PathBuf::from("/b/job_3.log"));
        job.num_nodes = 2;
        job.wall_time = Duration::from_secs(3720);
        job.queue = Some("short".to_string());
        let header = Slurm.header(&job);
        assert!(header.contains(&"#SBATCH --nodes=2".to_string()));
        assert!(header.contains(&"#SBATCH --time=1:02:00".to_string()));
        assert!(header.contains(&"#SBATCH --partition=short".to_string()));
        assert!(header.contains(&"#SBATCH --output=/b/job_3.log".to_string()));
        assert!(!header.iter().any(|l| l.contains("--account")));
    }

    #[test]
    fn lsf_submit_and_query() {
        let q = Lsf;
        assert_eq!(
            q.parse_submit_output("Job <77> is submitted to queue <pbatch>.", ""),
            Some("77".to_string())
        );
        assert_eq!(q.submit_command(Path::new("/b/j.sh"))[2], "bsub < /b/j.sh");

        let out = "\
77 user PEND pbatch host - job_0 Apr 24 13:00
78 user RUN pbatch host n1 job_1 Apr 24 13:00
79 user USUSP pbatch host n1 job_2 Apr 24 13:00
80 user DONE pbatch host n1 job_3 Apr 24 13:00
JOBID USER STAT
";
        let snap = q.parse_query_output(out);
        assert_eq!(snap.len(), 4);
        assert_eq!(snap["77"].state, QueueState::Pending);
        assert_eq!(snap["78"].state, QueueState::Running);
        assert_eq!(snap["79"].state, QueueState::Running);
        assert_eq!(snap["80"].state, QueueState::Complete);
    }

    #[test]
    fn cancel_commands_list_ids() {
        let ids = vec!["1".to_string(), "2".to_string()];
        assert_eq!(Slurm.cancel_command(&ids), vec!["scancel", "1", "2"]);
        assert_eq!(Lsf.cancel_command(&ids), vec!["bkill", "1", "2"]);
    }
}
