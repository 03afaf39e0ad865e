// tests/local_end_to_end.rs

use std::error::Error;
use std::fs;
use std::time::Duration;

use clap::Parser;
use vvexec::cli::CliArgs;
use vvexec_test_utils::{init_tracing, with_timeout_of};

type TestResult = Result<(), Box<dyn Error>>;

const SUITE: &str = r#"
[config]
processors = 2
poll_interval = "20ms"
test_root = "runs"
results = "results.jsonl"

[test.leaf_pass]
command = ["sh", "-c", "echo ok"]
parent = "analyze"

[test.leaf_diff]
command = ["sh", "-c", "exit 64"]
parent = "analyze"

[test.analyze]
command = ["sh", "-c", "ls ../leaf_pass/execute.log"]

[test.broken]
command = ["sh", "-c", "exit 3"]
np = 2
"#;

#[tokio::test]
async fn suite_runs_to_completion_and_writes_results() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let config = tmp.path().join("vvexec.toml");
    fs::write(&config, SUITE)?;

    let args = CliArgs::try_parse_from(["vvexec", "--config", config.to_str().ok_or("path")?])?;
    let summary = with_timeout_of(Duration::from_secs(30), vvexec::run(args))
        .await?
        .ok_or("no summary")?;

    assert_eq!((summary.pass, summary.diff, summary.fail), (2, 1, 1));
    assert!(summary.notrun.is_empty());
    assert!(!summary.all_passed());

    let log = fs::read_to_string(tmp.path().join("runs/leaf_pass/execute.log"))?;
    assert!(log.starts_with("Starting test: leaf_pass\n"));
    assert!(log.contains("\nok\n"));

    let results = fs::read_to_string(tmp.path().join("results.jsonl"))?;
    let lines: Vec<serde_json::Value> = results
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(lines.len(), 4);
    assert!(lines.iter().all(|l| l["kind"] == "unit" && l["state"] == "done"));

    let analyze_at = lines
        .iter()
        .position(|l| l["xdir"] == "analyze")
        .ok_or("analyze not recorded")?;
    assert_eq!(analyze_at, 3, "parent recorded before its children");
    Ok(())
}

#[tokio::test]
async fn dry_run_executes_nothing() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let config = tmp.path().join("vvexec.toml");
    fs::write(&config, SUITE)?;

    let args = CliArgs::try_parse_from([
        "vvexec",
        "--dry-run",
        "--config",
        config.to_str().ok_or("path")?,
    ])?;
    assert!(vvexec::run(args).await?.is_none());
    assert!(!tmp.path().join("runs").exists());
    assert!(!tmp.path().join("results.jsonl").exists());
    Ok(())
}

#[tokio::test]
async fn invalid_config_is_an_error() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let config = tmp.path().join("vvexec.toml");
    fs::write(
        &config,
        "[test.a]\ncommand = [\"true\"]\nparent = \"missing\"\n",
    )?;

    let args = CliArgs::try_parse_from(["vvexec", "--config", config.to_str().ok_or("path")?])?;
    let err = vvexec::run(args).await.err().ok_or("expected an error")?;
    assert!(format!("{err:#}").contains("missing"));
    Ok(())
}

#[tokio::test]
async fn staged_inputs_default_to_the_config_directory() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    fs::write(tmp.path().join("input.dat"), "precious\n")?;
    let config = tmp.path().join("vvexec.toml");
    fs::write(
        &config,
        r#"
[config]
poll_interval = "20ms"
test_root = "runs"

[test.reader]
command = ["sh", "-c", "test -L input.dat && grep -q precious input.dat"]
link_files = [{ src = "input.dat" }]
"#,
    )?;

    let args = CliArgs::try_parse_from(["vvexec", "--config", config.to_str().ok_or("path")?])?;
    let summary = with_timeout_of(Duration::from_secs(30), vvexec::run(args))
        .await?
        .ok_or("no summary")?;

    assert_eq!(summary.pass, 1);
    let source = tmp.path().join("input.dat");
    assert!(!fs::symlink_metadata(&source)?.file_type().is_symlink());
    assert_eq!(fs::read_to_string(source)?, "precious\n");
    Ok(())
}
