// src/proc/mod.rs

//! Process-group control: launching a test command in its own group,
//! discovering its descendants and signalling the whole tree.

pub mod group;
pub mod inspector;
pub mod timeout;

pub use group::{EscalationState, KillGrace, Output, ProcessGroup, signal, signal_tree};
pub use inspector::{InspectFuture, ProcessInspector, ProcessTable, PsFlavor, PsInspector, PS_TIMEOUT};
pub use timeout::timeout_env_hint;
