// src/exec/mod.rs

//! Test execution layer.
//!
//! - [`executor`] owns one locally run unit: staging, launch, poll, classify.
//! - [`staging`] and [`clean`] manage the contents of execute directories.
//! - [`classify`] maps exit statuses to results.
//! - [`backend`] is the seam the driver loop talks to; [`local`] and
//!   [`batch`] are the production implementations, and tests provide fakes.

pub mod backend;
pub mod batch;
pub mod classify;
pub mod clean;
pub mod executor;
pub mod local;
pub mod staging;

pub use backend::{BackendFuture, ExecutionBackend, PollReport};
pub use batch::{BatchBackend, JobLayout};
pub use executor::{command_line, ExecSettings, LocalExecutor};
pub use local::LocalBackend;
