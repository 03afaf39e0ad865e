// src/batch/script.rs

//! Job script rendering and log marker parsing.
//!
//! A job log is only ever inspected through the three marker strings
//! below, each written by an `echo` in the generated script.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

use crate::batch::job::BatchJob;
use crate::batch::state::Timestamp;
use crate::proc::timeout_env_hint;

pub const START_MARKER: &str = "START DATE:";
pub const STOP_MARKER: &str = "STOP DATE:";
pub const EXIT_STATUS_MARKER: &str = "EXIT STATUS:";

/// Render the full job script: shebang, directive header, start marker,
/// optional `cd`, payload, stop marker.
pub fn render_job_script(job: &BatchJob, header: &[String]) -> String {
    let mut out = String::from("#!/bin/bash\n");
    for line in header {
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(&format!("echo \"{START_MARKER} $(date)\"\n"));
    if let Some(dir) = &job.work_dir {
        out.push_str(&format!("cd {} || exit 1\n", quote_path(dir)));
    }
    for cmd in &job.commands {
        out.push_str(cmd);
        out.push('\n');
    }
    out.push_str(&format!("echo \"{STOP_MARKER} $(date)\"\n"));
    out
}

/// Shell lines that run one unit inside a job and report its exit status.
///
/// A non-zero `timeout` runs the command under `timeout(1)`: SIGINT at the
/// limit, SIGKILL `interrupt_to_kill` later. The wrapper then exits with
/// [`TIMEOUT_EXIT_CODE`] or [`KILLED_EXIT_CODE`].
pub fn unit_payload(
    xdir: &str,
    exec_dir: &Path,
    argv: &[String],
    timeout: Duration,
    interrupt_to_kill: Duration,
    log_name: &str,
) -> Vec<String> {
    let env = timeout_env_hint(timeout)
        .map(|hint| format!("TIMEOUT={hint} "))
        .unwrap_or_default();
    let limit = if timeout.is_zero() {
        String::new()
    } else {
        format!(
            "timeout -s INT -k {} {} ",
            whole_secs(interrupt_to_kill),
            whole_secs(timeout)
        )
    };
    vec![
        format!(
            "(cd {} && {}{}{} > {} 2>&1)",
            quote_path(exec_dir),
            env,
            limit,
            shell_words::join(argv),
            shell_words::quote(log_name),
        ),
        format!("echo {EXIT_STATUS_MARKER} $? {}", shell_words::quote(xdir)),
    ]
}

/// Exit status of `timeout(1)` when the limit fired.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit status of `timeout(1)` when the command needed SIGKILL.
pub const KILLED_EXIT_CODE: i32 = 128 + 9;

/// Seconds rounded up, at least one.
fn whole_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

fn quote_path(p: &Path) -> String {
    shell_words::quote(&p.to_string_lossy()).into_owned()
}

/// Start and stop dates found in a job log. A marker whose date cannot be
/// parsed still counts as seen and is stamped with `fallback`.
pub fn parse_log_markers(text: &str, fallback: Timestamp) -> (Option<Timestamp>, Option<Timestamp>) {
    let mut start = None;
    let mut stop = None;
    for line in text.lines() {
        if start.is_none() {
            if let Some(rest) = after_marker(line, START_MARKER) {
                start = Some(parse_date(rest).unwrap_or(fallback));
                continue;
            }
        }
        if stop.is_none() {
            if let Some(rest) = after_marker(line, STOP_MARKER) {
                stop = Some(parse_date(rest).unwrap_or(fallback));
            }
        }
    }
    (start, stop)
}

fn after_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.find(marker).map(|i| line[i + marker.len()..].trim())
}

/// `(xdir, exit status)` pairs reported by [`unit_payload`] lines.
pub fn parse_exit_statuses(text: &str) -> Vec<(String, i32)> {
    text.lines()
        .filter_map(|line| {
            let rest = after_marker(line, EXIT_STATUS_MARKER)?;
            let (code, xdir) = rest.split_once(char::is_whitespace)?;
            let code = code.parse().ok()?;
            Some((xdir.trim().to_string(), code))
        })
        .collect()
}

/// Parse a date as printed by `date`, RFC 3339, `YYYY-MM-DDTHH:MM:SS`
/// (local time) or epoch seconds.
pub fn parse_date(s: &str) -> Option<Timestamp> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let numeric = s.bytes().all(|b| b.is_ascii_digit() || b == b'.');
    if let Some(secs) = numeric.then(|| s.parse::<f64>().ok()).flatten() {
        let whole = secs.trunc() as i64;
        let nanos = (secs.fract() * 1e9).round() as u32;
        return Utc.timestamp_opt(whole, nanos.min(999_999_999)).single();
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return local_to_utc(naive);
    }

    // `Tue Apr 24 13:21:43 MDT 2018`, with or without the zone name. The
    // zone abbreviation is ambiguous, so the wall time is read as local.
    let tokens: Vec<&str> = s.split_whitespace().collect();
    let picked = match tokens.as_slice() {
        [_, mon, day, time, _, year] | [_, mon, day, time, year] => {
            format!("{mon} {day} {time} {year}")
        }
        _ => return None,
    };
    NaiveDateTime::parse_from_str(&picked, "%b %d %H:%M:%S %Y")
        .ok()
        .and_then(local_to_utc)
}

fn local_to_utc(naive: NaiveDateTime) -> Option<Timestamp> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}
