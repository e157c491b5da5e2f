use std::{
    ffi::OsString,
    fmt,
    io::{self, Write},
    process::{Command, ExitStatus, Stdio},
};

use crate::error::Error;

/// An external program plus arguments that always go first, e.g. `sudo --`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    program: OsString,
    leading_args: Vec<OsString>,
}

impl Tool {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args);
        cmd
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())
    }
}

/// Whether a tool ran at all, and how it ended if it did
#[derive(Debug)]
pub enum ToolOutcome {
    /// Ran to completion. `stdout` is empty unless it was captured.
    Exited { status: ExitStatus, stdout: Vec<u8> },
    /// Could not be started (not found, not executable), or waiting on it failed
    FailedToStart(io::Error),
}

impl ToolOutcome {
    /// `Exited(0)` gives the captured stdout, a start failure becomes
    /// [`Error::ToolNotStarted`], a non-zero exit whatever `on_failure` makes of it.
    pub fn into_result(
        self,
        tool: impl fmt::Display,
        on_failure: impl FnOnce(ExitStatus) -> Error,
    ) -> Result<Vec<u8>, Error> {
        match self {
            Self::Exited { status, stdout } if status.success() => Ok(stdout),
            Self::Exited { status, .. } => Err(on_failure(status)),
            Self::FailedToStart(source) => Err(Error::ToolNotStarted {
                tool: tool.to_string(),
                source,
            }),
        }
    }
}

/// Runs `cmd` with whatever stdio it was set up with and waits for it
pub fn run(cmd: &mut Command) -> ToolOutcome {
    log::trace!("RUN: {:?}", cmd);
    let res = match cmd.status() {
        Ok(status) => ToolOutcome::Exited {
            status,
            stdout: Vec::new(),
        },
        Err(e) => ToolOutcome::FailedToStart(e),
    };
    log::trace!("RES: {:?}", res);
    res
}

/// Runs `cmd` capturing stdout; stderr goes straight to the user
pub fn run_captured(cmd: &mut Command) -> ToolOutcome {
    log::trace!("RUN: {:?}", cmd);
    let res = match cmd.stdout(Stdio::piped()).stderr(Stdio::inherit()).output() {
        Ok(out) => ToolOutcome::Exited {
            status: out.status,
            stdout: out.stdout,
        },
        Err(e) => ToolOutcome::FailedToStart(e),
    };
    log::trace!("RES: {:?}", res);
    res
}

/// Runs `cmd` with `input` written to its stdin, which is closed afterwards. stdout is returned
/// only if `cmd` was set up to pipe it.
pub fn run_with_input(cmd: &mut Command, input: &[u8]) -> ToolOutcome {
    log::trace!("RUN: {:?} (with input)", cmd);
    let mut child = match cmd.stdin(Stdio::piped()).spawn() {
        Ok(child) => child,
        Err(e) => return ToolOutcome::FailedToStart(e),
    };
    if let Some(mut stdin) = child.stdin.take() {
        // a child that exits without reading gives EPIPE here, its exit status says more
        if let Err(e) = stdin.write_all(input) {
            log::debug!("writing to stdin of {:?}: {}", cmd.get_program(), e);
        }
    }
    let res = match child.wait_with_output() {
        Ok(out) => ToolOutcome::Exited {
            status: out.status,
            stdout: out.stdout,
        },
        Err(e) => ToolOutcome::FailedToStart(e),
    };
    log::trace!("RES: {:?}", res);
    res
}
