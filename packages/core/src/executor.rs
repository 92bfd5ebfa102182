//! Command execution for the external mount helper.
//!
//! Commands are described as a [`Invocation`] first and run second, so the
//! exact argument vector can be inspected (and logged) without launching
//! anything. Environment values are never logged.

use std::ffi::OsString;
use std::process::{Command, ExitStatus, Output, Stdio};

use crate::error::{IoResultExt, Result};

/// A fully described external command.
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Creates an invocation without arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable for the child only.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Human readable form for logs and errors. Environment values are omitted.
    pub fn describe(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }

    /// Runs the command capturing stdout and stderr.
    pub fn output(&self) -> Result<Output> {
        tracing::debug!("running {}", self.describe());
        self.command()
            .stdin(Stdio::null())
            .output()
            .command_context(self.describe())
    }

    /// Runs the command detached from any pipes and waits for it to exit.
    ///
    /// Use this for commands that leave background children behind: those
    /// children would otherwise hold captured pipes open.
    pub fn run_detached(&self) -> Result<ExitStatus> {
        tracing::debug!("launching {}", self.describe());
        self.command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .command_context(self.describe())
    }
}

// Hand-written so environment values never reach a log line.
impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field(
                "env",
                &self.env.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Quotes a string for safe inclusion in a `bash -c` script.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
