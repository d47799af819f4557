//! External process execution.
//!
//! Every process the pipeline starts goes through a [`CommandExecutor`], so
//! the orchestrator can be driven against a recorder in tests.

use crate::context::Secret;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

/// A fully described process launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable
    pub program: PathBuf,
    /// Arguments, without the program
    pub args: Vec<String>,
    /// Extra environment for the child; values are redacted in `Debug`
    pub env: BTreeMap<String, Secret>,
    /// Working directory, inherited when `None`
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    /// Create an invocation with no arguments
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            current_dir: None,
        }
    }

    /// Append one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable for the child
    #[must_use]
    pub fn env(mut self, name: impl Into<String>, value: Secret) -> Self {
        let _ = self.env.insert(name.into(), value);
        self
    }

    /// Run the child in `dir`
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Whether `flag` appears among the arguments
    #[must_use]
    pub fn has_arg(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// The argument following `flag`, if any
    #[must_use]
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// How a finished process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code; `None` when terminated by a signal
    pub code: Option<i32>,
    /// Wall-clock duration
    pub duration: Duration,
}

impl ProcessOutcome {
    /// An outcome with the given exit code
    #[must_use]
    pub const fn exited(code: i32, duration: Duration) -> Self {
        Self {
            code: Some(code),
            duration,
        }
    }

    /// Whether the process exited with status zero
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human description of the exit status
    #[must_use]
    pub fn describe(&self) -> String {
        self.code.map_or_else(
            || "termination by signal".to_string(),
            |code| format!("exit code {code}"),
        )
    }
}

/// Runs processes to completion
#[async_trait]
pub trait CommandExecutor: Send + Sync + fmt::Debug {
    /// Run `invocation` and wait for it to exit
    ///
    /// # Errors
    ///
    /// Returns error if the process cannot be started
    async fn execute(&self, invocation: &Invocation) -> std::io::Result<ProcessOutcome>;
}

/// Executes real processes with inherited stdout/stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, invocation: &Invocation) -> std::io::Result<ProcessOutcome> {
        let mut cmd = tokio::process::Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for (name, value) in &invocation.env {
            cmd.env(name, value.expose());
        }
        if let Some(dir) = &invocation.current_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(command = %invocation, "spawning");
        let start = Instant::now();
        let status = cmd.status().await?;
        let outcome = ProcessOutcome {
            code: status.code(),
            duration: start.elapsed(),
        };
        tracing::debug!(
            command = %invocation,
            status = %outcome.describe(),
            elapsed_ms = outcome.duration.as_millis() as u64,
            "process finished"
        );
        Ok(outcome)
    }
}

/// Whether `path` looks runnable on this platform
#[must_use]
pub fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
