// src/proc/inspector.rs

//! Descendant discovery from a point-in-time `ps` snapshot.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Boxed future returned by [`ProcessInspector::descendants_of`].
pub type InspectFuture<'a> = Pin<Box<dyn Future<Output = Vec<u32>> + Send + 'a>>;

/// Capability to list a process and everything it spawned.
pub trait ProcessInspector: Send + Sync + Debug {
    /// `root` followed by its descendants, depth first. Never fails; an
    /// unreadable process table yields just `[root]`.
    fn descendants_of(&self, root: u32) -> InspectFuture<'_>;
}

/// Longest a single `ps` call may take.
pub const PS_TIMEOUT: Duration = Duration::from_secs(5);

/// `ps` invocations known to print pid and ppid in columns 2 and 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsFlavor {
    /// `ps -ef`
    Full,
    /// `ps -Ao user,pid,ppid`
    Portable,
}

impl PsFlavor {
    pub fn args(self) -> &'static [&'static str] {
        match self {
            PsFlavor::Full => &["-ef"],
            PsFlavor::Portable => &["-Ao", "user,pid,ppid"],
        }
    }
}

/// Inspector backed by the system `ps`. The working flavor is detected on
/// first use and cached for the lifetime of the inspector. Every call is
/// bounded by [`PS_TIMEOUT`].
#[derive(Debug, Default)]
pub struct PsInspector {
    flavor: OnceCell<Option<PsFlavor>>,
}

impl PsInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn flavor(&self) -> Option<PsFlavor> {
        *self.flavor.get_or_init(detect_flavor).await
    }

    async fn snapshot(&self) -> Option<ProcessTable> {
        let flavor = self.flavor().await?;
        match run_listing("ps", flavor.args(), PS_TIMEOUT).await {
            Some(text) => Some(ProcessTable::parse(&text)),
            None => {
                warn!(?flavor, "process table query failed; assuming no descendants");
                None
            }
        }
    }
}

impl ProcessInspector for PsInspector {
    fn descendants_of(&self, root: u32) -> InspectFuture<'_> {
        Box::pin(async move {
            match self.snapshot().await {
                Some(table) => table.descendants_of(root),
                None => vec![root],
            }
        })
    }
}

/// Stdout of `program args`, or `None` on failure or after `limit`. A
/// listing that overruns is killed.
async fn run_listing(program: &str, args: &[&str], limit: Duration) -> Option<String> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(limit, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(output)) => {
            debug!(program, status = ?output.status, "listing exited unsuccessfully");
            None
        }
        Ok(Err(e)) => {
            debug!(program, error = %e, "listing could not run");
            None
        }
        Err(_) => {
            warn!(program, limit = ?limit, "listing timed out");
            None
        }
    }
}

async fn detect_flavor() -> Option<PsFlavor> {
    for flavor in [PsFlavor::Full, PsFlavor::Portable] {
        if let Some(text) = run_listing("ps", flavor.args(), PS_TIMEOUT).await {
            if !ProcessTable::parse(&text).is_empty() {
                debug!(?flavor, "detected ps flavor");
                return Some(flavor);
            }
        }
    }
    warn!("no working ps flavor found; descendant discovery disabled");
    None
}

/// Parent -> children adjacency built from `ps` output.
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    children: HashMap<u32, Vec<u32>>,
}

impl ProcessTable {
    /// Parse `ps` output: a header line, then rows whose second and third
    /// columns are pid and ppid. Kernel roots (ppid 0) and unparsable rows
    /// are skipped.
    pub fn parse(text: &str) -> Self {
        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for line in text.lines().skip(1) {
            let mut cols = line.split_whitespace().skip(1);
            let (Some(pid), Some(ppid)) = (cols.next(), cols.next()) else {
                continue;
            };
            let (Ok(pid), Ok(ppid)) = (pid.parse::<u32>(), ppid.parse::<u32>()) else {
                continue;
            };
            if ppid == 0 {
                continue;
            }
            children.entry(ppid).or_default().push(pid);
        }
        Self { children }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// `root` first, then its descendants in depth-first order.
    pub fn descendants_of(&self, root: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(pid) = stack.pop() {
            if !seen.insert(pid) {
                continue;
            }
            out.push(pid);
            if let Some(kids) = self.children.get(&pid) {
                stack.extend(kids.iter().rev().copied());
            }
        }
        out
    }
}
