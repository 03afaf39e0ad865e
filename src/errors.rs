// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VvexecError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// A link/copy source is missing or ambiguous.
    #[error("staging error in {xdir}: {reason}")]
    Staging { xdir: String, reason: String },

    /// The test command could not be spawned.
    #[error("failed to launch {xdir}: {source}")]
    Launch {
        xdir: String,
        #[source]
        source: std::io::Error,
    },

    /// `poll()` on a unit that was never started.
    #[error("unit {0} polled before it was started")]
    UnitNotStarted(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, VvexecError>;
