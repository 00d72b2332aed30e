// Shared fakes for the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use homelab_setup::config::ConfigStore;
use homelab_setup::error::{Result, SetupError};
use homelab_setup::markers::MarkerStore;
use homelab_setup::prompt::{NonInteractive, Prompter};
use homelab_setup::steps::{StepBody, StepContext};
use homelab_setup::system::{CommandExecutor, CommandOutput, FileSystem, Invocation, LocalFileSystem};
use homelab_setup::SetupContext;

type Responder = dyn Fn(&Invocation) -> CommandOutput + Send + Sync;

/// Records every invocation and answers from a closure instead of spawning.
#[derive(Clone)]
pub struct RecordingExecutor {
    calls: Arc<Mutex<Vec<Invocation>>>,
    respond: Arc<Responder>,
}

impl RecordingExecutor {
    /// Every command succeeds with empty output.
    pub fn new() -> Self {
        Self::with_responder(|_| CommandOutput::ok(""))
    }

    pub fn with_responder(respond: impl Fn(&Invocation) -> CommandOutput + Send + Sync + 'static) -> Self {
        RecordingExecutor {
            calls: Arc::new(Mutex::new(Vec::new())),
            respond: Arc::new(respond),
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Rendered command lines, e.g. `systemctl daemon-reload`.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }
}

impl CommandExecutor for RecordingExecutor {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.calls.lock().expect("calls lock").push(invocation.clone());
        Ok((self.respond)(invocation))
    }
}

pub fn failed(stderr: &str) -> CommandOutput {
    CommandOutput {
        stderr: stderr.to_string(),
        exit_code: Some(1),
        success: false,
        ..CommandOutput::default()
    }
}

/// Interactive prompter that replays canned answers.
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: &[&str]) -> Self {
        ScriptedPrompter {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
        }
    }

    fn next(&self) -> Result<String> {
        self.answers
            .lock()
            .expect("answers lock")
            .pop_front()
            .ok_or_else(|| SetupError::prompt("no scripted answer left"))
    }
}

impl Prompter for ScriptedPrompter {
    fn is_interactive(&self) -> bool {
        true
    }

    fn confirm(&self, _question: &str, _default: bool) -> Result<bool> {
        Ok(matches!(self.next()?.as_str(), "y" | "yes"))
    }

    fn input(&self, _question: &str, default: Option<&str>) -> Result<String> {
        let answer = self.next()?;
        if answer.is_empty() {
            return Ok(default.unwrap_or_default().to_string());
        }
        Ok(answer)
    }
}

/// Step body backed by a closure, counting its invocations.
pub struct FnBody<F> {
    pub calls: Arc<AtomicUsize>,
    f: F,
}

impl<F> FnBody<F>
where
    F: Fn(&StepContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        FnBody {
            calls: Arc::new(AtomicUsize::new(0)),
            f,
        }
    }
}

impl<F> StepBody for FnBody<F>
where
    F: Fn(&StepContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn run(&self, ctx: &StepContext<'_>) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.f)(ctx)
    }
}

/// Live (non dry-run) context rooted in `dir` with the given gateways.
pub fn context_in(
    dir: &Path,
    fs: Box<dyn FileSystem>,
    commands: Box<dyn CommandExecutor>,
    prompter: Box<dyn Prompter>,
    dry_run: bool,
) -> SetupContext {
    SetupContext::from_parts(
        ConfigStore::open(dir.join("homelab-setup.conf")).expect("open config"),
        MarkerStore::new(dir.join("markers")),
        fs,
        commands,
        prompter,
        dry_run,
    )
}

/// Context on the real filesystem with a recording executor, never prompting.
pub fn live_context(dir: &Path, executor: &RecordingExecutor) -> SetupContext {
    context_in(
        dir,
        Box::new(LocalFileSystem::new()),
        Box::new(executor.clone()),
        Box::new(NonInteractive),
        false,
    )
}

/// uid/gid of the test process, so chown succeeds without root.
pub fn current_owner() -> (String, String) {
    (
        nix::unistd::getuid().as_raw().to_string(),
        nix::unistd::getgid().as_raw().to_string(),
    )
}
