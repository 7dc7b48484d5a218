//! External command execution.
//!
//! Every external tool this crate drives (`skopeo`, `docker`, `gh`, `gum`,
//! `useradd`, ...) is described by a [`Cmd`] and executed through a
//! [`Runner`]. Production code uses [`SystemRunner`]; tests substitute a
//! recording fake so that no host state is touched.

use anyhow::{bail, Context, Result};
use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// How the child's stdout/stderr are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Output {
    /// Collect stdout/stderr into [`CmdOutput`].
    #[default]
    Capture,
    /// Attach to the parent's terminal (prompts, styled output, passwd).
    Inherit,
}

/// Builder for an external command invocation.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    stdin: Option<String>,
    output: Output,
    allow_fail: bool,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            output: Output::Capture,
            allow_fail: false,
            error_msg: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    /// Feed `text` to the child's stdin.
    pub fn stdin_text(mut self, text: impl Into<String>) -> Self {
        self.stdin = Some(text.into());
        self
    }

    pub fn interactive(mut self) -> Self {
        self.output = Output::Inherit;
        self
    }

    /// Return the output instead of failing on a non-zero exit.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Extra hint appended to the error when the command fails.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Shell-like rendering for logs and error messages.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    /// Execute through `runner`, failing on a non-zero exit unless
    /// [`Cmd::allow_fail`] was set.
    pub fn run(&self, runner: &dyn Runner) -> Result<CmdOutput> {
        tracing::debug!(command = %self.display(), "running");
        let output = runner.run(self)?;
        if output.success() || self.allow_fail {
            return Ok(output);
        }

        let combined = output.combined();
        let mut msg = format!(
            "command failed (exit {}): {}",
            output
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            self.display()
        );
        if !combined.trim().is_empty() {
            msg.push('\n');
            msg.push_str(combined.trim());
        }
        if let Some(hint) = &self.error_msg {
            msg.push('\n');
            msg.push_str(hint);
        }
        bail!(msg)
    }
}

/// Result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    /// Exit code, `None` if terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Executes [`Cmd`]s. Implementations must not interpret the exit code.
pub trait Runner {
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput>;
}

/// Runs commands on the host via `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        command.stdin(if cmd.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        match cmd.output {
            Output::Capture => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            Output::Inherit => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("spawning '{}'", cmd.display()))?;

        if let Some(text) = &cmd.stdin {
            let mut stdin = child
                .stdin
                .take()
                .with_context(|| format!("opening stdin of '{}'", cmd.program))?;
            stdin
                .write_all(text.as_bytes())
                .with_context(|| format!("writing stdin of '{}'", cmd.program))?;
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("waiting for '{}'", cmd.display()))?;

        Ok(CmdOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Check whether `program` resolves on `PATH`.
pub fn exists(program: &str) -> bool {
    which::which(program).is_ok()
}
