// src/proc/group.rs

//! A launched test command running in its own process group.

use std::fs::File;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::proc::inspector::ProcessInspector;

/// Forward-only record of how far timeout handling has gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    None,
    Interrupted { at: Instant },
    Killed { at: Instant },
}

impl EscalationState {
    /// Sticky: true from the first SIGINT on.
    pub fn timed_out(&self) -> bool {
        !matches!(self, EscalationState::None)
    }
}

/// Waits used by a blocking [`ProcessGroup::escalate`].
#[derive(Debug, Clone, Copy)]
pub struct KillGrace {
    pub interrupt: Duration,
    pub kill: Duration,
}

impl Default for KillGrace {
    fn default() -> Self {
        Self {
            interrupt: Duration::from_secs(2),
            kill: Duration::from_secs(5),
        }
    }
}

/// Where the child's stdout/stderr go.
#[derive(Debug)]
pub enum Output {
    Inherit,
    /// Both streams appended to this file.
    File(File),
}

#[derive(Debug)]
pub struct ProcessGroup {
    child: Child,
    pid: u32,
    started: Instant,
    argv: Vec<String>,
    workdir: PathBuf,
    escalation: EscalationState,
    exit: Option<ExitStatus>,
}

impl ProcessGroup {
    /// Spawn `argv` in `workdir` as the leader of a new process group.
    ///
    /// `timeout_hint` is exported as `TIMEOUT` (seconds) when present.
    pub fn launch(
        argv: &[String],
        workdir: &Path,
        timeout_hint: Option<u64>,
        output: Output,
    ) -> io::Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .process_group(0);

        if let Some(secs) = timeout_hint {
            cmd.env("TIMEOUT", secs.to_string());
        }

        match output {
            Output::Inherit => {}
            Output::File(file) => {
                let err = file.try_clone()?;
                cmd.stdout(Stdio::from(file)).stderr(Stdio::from(err));
            }
        }

        let child = cmd.spawn()?;
        let pid = child.id();
        debug!(pid, program = %program, dir = ?workdir, "launched process group");

        Ok(Self {
            child,
            pid,
            started: Instant::now(),
            argv: argv.to_vec(),
            workdir: workdir.to_path_buf(),
            escalation: EscalationState::None,
            exit: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn escalation(&self) -> EscalationState {
        self.escalation
    }

    /// Non-blocking wait. The exit status is cached once observed.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.exit.is_none() {
            self.exit = self.child.try_wait()?;
        }
        Ok(self.exit)
    }

    /// First phase: SIGINT to the group and every discovered descendant.
    /// Returns false if escalation had already begun.
    pub async fn interrupt(&mut self, inspector: &dyn ProcessInspector, now: Instant) -> bool {
        if self.escalation != EscalationState::None {
            return false;
        }
        signal_tree(self.pid, inspector, Signal::SIGINT).await;
        self.escalation = EscalationState::Interrupted { at: now };
        true
    }

    /// Second phase: SIGKILL. Only valid after [`interrupt`](Self::interrupt);
    /// returns false otherwise or if already killed.
    pub async fn kill(&mut self, inspector: &dyn ProcessInspector, now: Instant) -> bool {
        if !matches!(self.escalation, EscalationState::Interrupted { .. }) {
            return false;
        }
        signal_tree(self.pid, inspector, Signal::SIGKILL).await;
        self.escalation = EscalationState::Killed { at: now };
        true
    }

    /// Two-phase termination with bounded waits: SIGINT, wait, SIGKILL, wait.
    ///
    /// Returns the exit status if the process was reaped.
    pub async fn escalate(
        &mut self,
        inspector: &dyn ProcessInspector,
        grace: KillGrace,
    ) -> io::Result<Option<ExitStatus>> {
        if let Some(status) = self.try_wait()? {
            return Ok(Some(status));
        }

        if self.interrupt(inspector, Instant::now()).await {
            warn!(pid = self.pid, "sent SIGINT to process group");
        }
        if let Some(status) = self.wait_for(grace.interrupt).await? {
            return Ok(Some(status));
        }

        if self.kill(inspector, Instant::now()).await {
            warn!(pid = self.pid, "sent SIGKILL to process group");
        }
        self.wait_for(grace.kill).await
    }

    async fn wait_for(&mut self, limit: Duration) -> io::Result<Option<ExitStatus>> {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Signal the process group led by `root` and every descendant the
/// inspector can find (descendants may have left the group). The group
/// is signalled before the process table is read.
pub async fn signal_tree(root: u32, inspector: &dyn ProcessInspector, sig: Signal) {
    if let Ok(pgid) = i32::try_from(root) {
        match killpg(Pid::from_raw(pgid), sig) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => debug!(pgid, ?sig, error = %e, "killpg failed"),
        }
    }
    signal(&inspector.descendants_of(root).await, sig);
}

/// Best-effort per-pid signal. Vanished pids are ignored.
pub fn signal(pids: &[u32], sig: Signal) {
    for &pid in pids {
        let Ok(raw) = i32::try_from(pid) else {
            continue;
        };
        match kill(Pid::from_raw(raw), sig) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => debug!(pid, ?sig, error = %e, "signal failed"),
        }
    }
}
