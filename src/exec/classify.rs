// src/exec/classify.rs

//! Exit status -> test result.

use std::process::ExitStatus;

use crate::batch::script::{KILLED_EXIT_CODE, TIMEOUT_EXIT_CODE};
use crate::queue::TestResult;

/// Exit code a test uses to report "ran, but differs from the baseline".
pub const DIFF_EXIT_CODE: i32 = 64;

/// Classify a normal exit code.
pub fn classify_code(code: i32) -> TestResult {
    match code {
        0 => TestResult::Pass,
        DIFF_EXIT_CODE => TestResult::Diff,
        _ => TestResult::Fail,
    }
}

/// Classify the status a batch job reported for one unit. With a limit in
/// force the `timeout(1)` wrapper's codes mean the unit timed out.
pub fn classify_batch_code(code: i32, limited: bool) -> TestResult {
    match code {
        TIMEOUT_EXIT_CODE | KILLED_EXIT_CODE if limited => TestResult::Timeout,
        _ => classify_code(code),
    }
}

/// Classify a raw exit status. A unit that ever timed out is reported as
/// `timeout` whatever it exited with.
pub fn classify_exit(status: ExitStatus, timed_out: bool) -> TestResult {
    if timed_out {
        return TestResult::Timeout;
    }
    match status.code() {
        Some(code) => classify_code(code),
        // Signalled or stopped.
        None => TestResult::Fail,
    }
}
