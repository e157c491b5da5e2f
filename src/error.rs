use std::{io, path::PathBuf, process::ExitStatus};

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::generations::Generation;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The distinguished `<name>` link of a profile is missing or does not name a generation.
    #[error("{link} points to an invalid generation ({reason}), is your system broken?")]
    BrokenState { link: Utf8PathBuf, reason: String },

    #[error(
        "looking for a generation {requested} before the current ({current}), but there are only {available} left"
    )]
    OutOfRange {
        requested: usize,
        current: Generation,
        available: usize,
    },

    #[error("current generation {0} was not found among the scanned generations")]
    CurrentMissing(Generation),

    /// The tool never ran: not found, not executable, or its wait failed.
    #[error("failed to run {tool}: {source}")]
    ToolNotStarted {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} build failed ({status})")]
    BuildFailed { tool: String, status: ExitStatus },

    #[error("{tool} did not print an output path")]
    MalformedOutput { tool: String },

    #[error("{step}: non-zero exit ({status})")]
    ActivationFailed { step: String, status: ExitStatus },

    #[error("{tool}: non-zero exit ({status})")]
    ToolFailed { tool: String, status: ExitStatus },

    #[error(
        "{} could not be removed ({source}), which is a major security risk. Remove it as soon as possible!",
        path.display()
    )]
    CleanupFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("missing {0}, pass it once on the command line and it will be remembered")]
    MissingSetting(&'static str),

    #[error("malformed attribute: {0:?}")]
    InvalidAttribute(String),

    #[error("settings file {path}: {source}")]
    Settings {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// Wraps an `io::Error` with a description of what was being accessed.
    ///
    /// Use as `.map_err(Error::io(format!("reading {dir}")))`.
    pub fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }
}
