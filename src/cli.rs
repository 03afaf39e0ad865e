// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::types::DequeuePolicy;

/// Command-line arguments for `vvexec`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "vvexec",
    version,
    about = "Run a test suite under processor-count admission control, locally or through a batch queue.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `vvexec.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "vvexec.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `VVEXEC_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the run queue in dequeue order, but don't
    /// run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Processor budget; overrides `[config].processors`.
    #[arg(short = 'n', long, value_name = "N")]
    pub processors: Option<u32>,

    /// Submit units to the batch system configured in `[batch]`.
    #[arg(long)]
    pub batch: bool,

    /// Append JSON-lines results to this file.
    #[arg(long, value_name = "PATH")]
    pub results: Option<PathBuf>,

    /// `fast-first` or `large-non-fast-first`.
    #[arg(long, value_name = "POLICY")]
    pub dequeue_policy: Option<DequeuePolicy>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides() {
        let args = CliArgs::try_parse_from([
            "vvexec",
            "--config",
            "suite.toml",
            "-n",
            "16",
            "--batch",
            "--dequeue-policy",
            "large-non-fast-first",
        ])
        .unwrap();
        assert_eq!(args.config, "suite.toml");
        assert_eq!(args.processors, Some(16));
        assert!(args.batch);
        assert_eq!(args.dequeue_policy, Some(DequeuePolicy::LargeNonFastFirst));
        assert!(!args.dry_run);
    }
}
