// src/proc/timeout.rs

use std::time::Duration;

/// Shortest `TIMEOUT` ever exported to a child.
pub const MIN_TIMEOUT_HINT: u64 = 60;

/// Value for the child's `TIMEOUT` environment variable: the harness
/// timeout bumped so the child can stop itself before the harness does.
///
/// `None` when the unit has no timeout.
pub fn timeout_env_hint(timeout: Duration) -> Option<u64> {
    if timeout.is_zero() {
        return None;
    }
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    let bumped = if secs < 120 {
        (secs * 14).div_ceil(10).max(MIN_TIMEOUT_HINT)
    } else {
        (secs * 12).div_ceil(10)
    };
    Some(bumped)
}
