//! External command execution.
//!
//! Every call is a program name plus an argument vector; nothing is ever passed
//! through a shell. Step bodies build an [`Invocation`] and hand it to a
//! [`CommandExecutor`], which lets the dry-run layer and tests substitute their
//! own implementation.

use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::error::{Result, SetupError};
use crate::process_guard::{with_children, CommandProcessGroup};

/// A single external command: program, arguments and how to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Data written to the child's stdin; `None` connects stdin to /dev/null
    pub stdin: Option<String>,
    /// Changes system state. Read-only invocations run even in dry-run mode.
    pub mutates: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            mutates: true,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Mark as a query that does not change the system
    pub fn read_only(mut self) -> Self {
        self.mutates = false;
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of an invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    pub success: bool,
    /// The command was logged instead of executed
    pub dry_run: bool,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: Some(0),
            success: true,
            ..Self::default()
        }
    }

    /// Placeholder result for a command skipped by dry-run
    pub fn simulated() -> Self {
        Self {
            dry_run: true,
            ..Self::ok("")
        }
    }

    /// Turn a non-zero exit into `SetupError::ExternalCommand`.
    pub fn ensure_success(self, invocation: &Invocation) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        let status = match self.exit_code {
            Some(code) => format!("exit code {}", code),
            None => "killed by signal".to_string(),
        };
        Err(SetupError::ExternalCommand {
            command: invocation.to_string(),
            status,
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// Runs external commands on behalf of step bodies.
pub trait CommandExecutor: Send + Sync {
    /// Run `invocation` and capture its output. A non-zero exit is reported in
    /// the returned [`CommandOutput`], not as an error; errors mean the command
    /// could not be started at all.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Run and require a zero exit status.
    fn run_checked(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.run(invocation)?.ensure_success(invocation)
    }

    /// Whether `program` resolves on `PATH`.
    fn binary_exists(&self, program: &str) -> bool {
        let probe = Invocation::new("which").arg(program).read_only();
        self.run(&probe).map(|out| out.success).unwrap_or(false)
    }
}

impl<T: CommandExecutor + ?Sized> CommandExecutor for Box<T> {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        (**self).run(invocation)
    }

    fn binary_exists(&self, program: &str) -> bool {
        (**self).binary_exists(program)
    }
}

/// Spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandExecutor;

impl SystemCommandExecutor {
    pub fn new() -> Self {
        Self
    }

    fn build(invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group();
        cmd
    }
}

impl CommandExecutor for SystemCommandExecutor {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        info!(command = %invocation, "Running command");

        let mut child = Self::build(invocation).spawn().map_err(|e| SetupError::ExternalCommand {
            command: invocation.to_string(),
            status: "failed to start".to_string(),
            stderr: e.to_string(),
        })?;
        let pid = child.id();
        with_children(|children| children.register(pid));

        if let (Some(input), Some(mut pipe)) = (&invocation.stdin, child.stdin.take()) {
            // Dropping the pipe afterwards closes the child's stdin
            if let Err(e) = pipe.write_all(input.as_bytes()) {
                debug!(command = %invocation, error = %e, "Child closed stdin early");
            }
        }

        let waited = child.wait_with_output();
        with_children(|children| children.unregister(pid));
        let output = waited.map_err(|e| SetupError::ExternalCommand {
            command: invocation.to_string(),
            status: "wait failed".to_string(),
            stderr: e.to_string(),
        })?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            success: output.status.success(),
            dry_run: false,
        };
        debug!(
            command = %invocation,
            exit_code = ?result.exit_code,
            "Command finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_builder_and_display() {
        let inv = Invocation::new("systemctl")
            .args(["enable", "--now"])
            .arg("mnt-nas.mount");
        assert!(inv.mutates);
        assert_eq!(inv.to_string(), "systemctl enable --now mnt-nas.mount");

        let query = Invocation::new("echo").arg("two words").read_only();
        assert!(!query.mutates);
        assert_eq!(query.to_string(), "echo \"two words\"");
    }

    #[test]
    fn test_runs_real_command() {
        let out = SystemCommandExecutor::new()
            .run(&Invocation::new("echo").arg("hello"))
            .expect("run echo");
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
        assert!(!out.dry_run);
    }

    #[test]
    fn test_stdin_is_forwarded() {
        let out = SystemCommandExecutor::new()
            .run(&Invocation::new("cat").stdin("piped input"))
            .expect("run cat");
        assert_eq!(out.stdout, "piped input");
    }

    #[test]
    fn test_non_zero_exit_is_reported_not_raised() {
        let inv = Invocation::new("false");
        let out = SystemCommandExecutor::new().run(&inv).expect("run false");
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(1));

        let err = out.ensure_success(&inv).unwrap_err();
        assert!(matches!(err, SetupError::ExternalCommand { .. }));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn test_missing_program_is_external_command_error() {
        let err = SystemCommandExecutor::new()
            .run(&Invocation::new("definitely-not-a-real-binary-xyz"))
            .unwrap_err();
        assert!(matches!(err, SetupError::ExternalCommand { .. }));
    }

    #[test]
    fn test_binary_exists() {
        let exec = SystemCommandExecutor::new();
        assert!(exec.binary_exists("sh"));
        assert!(!exec.binary_exists("definitely-not-a-real-binary-xyz"));
    }
}
