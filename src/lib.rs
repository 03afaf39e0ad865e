// src/lib.rs

pub mod batch;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod proc;
pub mod queue;
pub mod results;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::batch::{for_kind, BatchInterface, ShellRunner};
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::{CoreRuntime, Runtime, RuntimeOptions};
use crate::exec::{command_line, BatchBackend, ExecSettings, JobLayout, LocalBackend};
use crate::fs::{FileSystem, RealFileSystem};
use crate::proc::{ProcessInspector, PsInspector};
use crate::queue::{JobSlots, ProcessorPool, RunQueue, UnitArena};
use crate::results::{JsonLinesSink, NullSink, ResultsSink, RunSummary};

/// High-level entry point used by `main.rs`.
///
/// Loads the config, builds the run queue and the local or batch backend,
/// and drives the run to completion. Returns `None` for `--dry-run`.
pub async fn run(args: CliArgs) -> Result<Option<RunSummary>> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_and_validate(&config_path)?;
    resolve_paths(&mut cfg, &config_root_dir(&config_path));
    apply_overrides(&mut cfg, &args);

    let arena = UnitArena::from_config(&cfg);
    let queue = RunQueue::new(arena, cfg.config.dequeue_policy)
        .with_oversubscribe_when_idle(cfg.config.oversubscribe_when_idle);

    if args.dry_run {
        print_dry_run(&cfg, &queue);
        return Ok(None);
    }

    let sink: Box<dyn ResultsSink> = match &cfg.config.results {
        Some(path) => Box::new(JsonLinesSink::create(path)?),
        None => Box::new(NullSink),
    };
    let settings = ExecSettings::from_config(&cfg.config);
    let inspector: Arc<dyn ProcessInspector> = Arc::new(PsInspector::new());
    let processors = cfg.config.effective_processors();

    let summary = if cfg.batch.enabled {
        let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
        let interface = BatchInterface::new(
            for_kind(cfg.batch.system),
            Arc::new(ShellRunner),
            Arc::clone(&fs),
            cfg.batch.timeouts.into(),
            cfg.batch.query_timeout,
        );
        let layout = JobLayout::from_config(&cfg.batch, processors);
        let backend = BatchBackend::new(settings, inspector, fs, interface, layout);
        let slots = JobSlots::new(cfg.batch.max_jobs * cfg.batch.units_per_job);
        let options = RuntimeOptions {
            poll_interval: cfg.batch.poll_interval.unwrap_or(cfg.config.poll_interval),
        };
        info!(system = ?cfg.batch.system, max_jobs = cfg.batch.max_jobs, "running in batch mode");
        Runtime::new(CoreRuntime::new(queue, Box::new(slots)), backend, sink, options)
            .run()
            .await?
    } else {
        let backend = LocalBackend::new(settings, inspector);
        let options = RuntimeOptions {
            poll_interval: cfg.config.poll_interval,
        };
        info!(processors, "running locally");
        Runtime::new(
            CoreRuntime::new(queue, Box::new(ProcessorPool::new(processors))),
            backend,
            sink,
            options,
        )
        .run()
        .await?
    };

    Ok(Some(summary))
}

fn apply_overrides(cfg: &mut ConfigFile, args: &CliArgs) {
    if let Some(n) = args.processors {
        cfg.config.processors = Some(n.max(1));
    }
    if args.batch {
        cfg.batch.enabled = true;
    }
    if let Some(results) = &args.results {
        cfg.config.results = Some(results.clone());
    }
    if let Some(policy) = args.dequeue_policy {
        cfg.config.dequeue_policy = policy;
    }
}

/// Relative paths in the config file are taken relative to the directory
/// holding it. A test without `source_dir` stages from that directory.
///
/// Runs before the CLI overrides, so `--results` stays relative to the
/// working directory.
fn resolve_paths(cfg: &mut ConfigFile, root: &Path) {
    if cfg.config.test_root.is_relative() {
        cfg.config.test_root = root.join(&cfg.config.test_root);
    }
    if let Some(results) = cfg.config.results.as_mut().filter(|p| p.is_relative()) {
        *results = root.join(&*results);
    }
    for test in cfg.test.values_mut() {
        let dir = test.source_dir.get_or_insert_with(|| root.to_path_buf());
        if dir.is_relative() {
            *dir = root.join(&*dir);
        }
    }
}

/// Directory holding the config file, or the working directory for a bare
/// file name.
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Print the pending units in the order a free machine would dequeue them.
fn print_dry_run(cfg: &ConfigFile, queue: &RunQueue) {
    println!("vvexec dry-run");
    println!("  config.processors = {}", cfg.config.effective_processors());
    println!("  config.dequeue_policy = {:?}", queue.policy());
    println!("  batch.enabled = {}", cfg.batch.enabled);
    println!();

    let settings = ExecSettings::from_config(&cfg.config);
    let units = queue.units();
    println!("units ({}):", units.len());
    for id in queue.pending_in_order() {
        let unit = &units[id];
        let fast = if unit.is_fast() { " fast" } else { "" };
        println!("  - np={} {}{}", unit.np, unit.xdir, fast);
        println!("      cmd: {}", shell_words::join(command_line(unit, &settings)));
        if !unit.timeout.is_zero() {
            println!("      timeout: {}s", unit.timeout.as_secs());
        }
        if unit.is_parent() {
            let children: Vec<&str> = unit.children().iter().map(|&c| units[c].xdir.as_str()).collect();
            println!("      waits on: {}", children.join(", "));
        }
    }

    debug!("dry-run complete (no execution)");
}
