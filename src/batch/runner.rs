// src/batch/runner.rs

//! Runs queue-manager commands with a per-call time limit.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::process::Command;
use tracing::debug;

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub type RunFuture<'a> = Pin<Box<dyn Future<Output = Result<CommandOutput>> + Send + 'a>>;

/// Runs an argument vector and captures its output. An error means the
/// command could not be run or did not finish in time; a non-zero exit is
/// reported through [`CommandOutput::code`].
pub trait CommandRunner: Send + Sync + Debug {
    fn run<'a>(&'a self, argv: &'a [String], timeout: Duration) -> RunFuture<'a>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run<'a>(&'a self, argv: &'a [String], timeout: Duration) -> RunFuture<'a> {
        Box::pin(async move {
            let Some((program, args)) = argv.split_first() else {
                bail!("empty command");
            };
            debug!(command = %shell_words::join(argv), "running queue command");

            let child = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("spawning {program:?}"))?;

            let output = tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| anyhow!("{program:?} did not finish within {timeout:?}"))?
                .with_context(|| format!("waiting for {program:?}"))?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_output_and_code() {
        let out = ShellRunner
            .run(&argv(&["sh", "-c", "echo hi; echo oops >&2; exit 3"]), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.stderr, "oops\n");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn times_out() {
        let err = ShellRunner
            .run(&argv(&["sleep", "5"]), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not finish"));
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        assert!(ShellRunner
            .run(&argv(&["/definitely/not/here"]), Duration::from_secs(1))
            .await
            .is_err());
    }
}
