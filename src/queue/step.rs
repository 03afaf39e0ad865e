// src/queue/step.rs

//! Result type for a single run-queue retirement.

use crate::queue::unit::UnitId;

/// What changed when a unit was retired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetireStep {
    /// The unit that moved to the finished set, `None` if it was not running.
    pub retired: Option<UnitId>,
    /// Parent whose last outstanding child just finished with pass/diff.
    pub parent_now_eligible: Option<UnitId>,
}
