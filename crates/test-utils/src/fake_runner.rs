use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use vvexec::batch::{CommandOutput, CommandRunner, RunFuture};

#[derive(Debug, Clone)]
enum Reply {
    Output(CommandOutput),
    Error(String),
}

#[derive(Debug, Default)]
struct State {
    /// One-shot replies per program, used before the sticky ones.
    queued: HashMap<String, VecDeque<Reply>>,
    sticky: HashMap<String, Reply>,
    calls: Vec<Vec<String>>,
}

/// A fake queue-command runner keyed by program name (`argv[0]`).
///
/// Unscripted programs succeed with empty output. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeRunner {
    state: Arc<Mutex<State>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to every future call of `program` with exit 0 and `stdout`.
    pub fn set_stdout(&self, program: &str, stdout: &str) {
        self.state.lock().unwrap().sticky.insert(
            program.to_string(),
            Reply::Output(CommandOutput {
                code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        );
    }

    /// Reply once with the given output.
    pub fn push_output(&self, program: &str, output: CommandOutput) {
        self.state
            .lock()
            .unwrap()
            .queued
            .entry(program.to_string())
            .or_default()
            .push_back(Reply::Output(output));
    }

    /// Fail the next call of `program` as if it could not be run.
    pub fn push_error(&self, program: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .queued
            .entry(program.to_string())
            .or_default()
            .push_back(Reply::Error(message.to_string()));
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, program: &str) -> usize {
        self.calls()
            .iter()
            .filter(|argv| argv.first().map(String::as_str) == Some(program))
            .count()
    }
}

impl CommandRunner for FakeRunner {
    fn run<'a>(&'a self, argv: &'a [String], _timeout: Duration) -> RunFuture<'a> {
        Box::pin(async move {
            let program = argv.first().cloned().unwrap_or_default();
            let reply = {
                let mut state = self.state.lock().unwrap();
                state.calls.push(argv.to_vec());
                let queued = state.queued.get_mut(&program).and_then(VecDeque::pop_front);
                queued.or_else(|| state.sticky.get(&program).cloned())
            };
            match reply {
                Some(Reply::Output(out)) => Ok(out),
                Some(Reply::Error(msg)) => Err(anyhow!(msg)),
                None => Ok(CommandOutput {
                    code: Some(0),
                    ..Default::default()
                }),
            }
        })
    }
}
