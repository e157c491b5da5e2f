use std::{
    fmt,
    io::{self, BufRead, Write},
};

use nix::sys::termios::{self, LocalFlags, SetArg};

use crate::{
    error::{Error, Result},
    exit_hook,
};

/// A captured credential. Never printed, zeroed on drop.
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.fill(0);
    }
}

/// Prints `prompt` to stderr and reads one line from the terminal with echo turned off.
///
/// The terminal mode is restored on return, and by the exit hooks if interrupted while typing.
pub fn read_from_terminal(prompt: &str) -> Result<Secret> {
    let original = termios::tcgetattr(io::stdin())
        .map_err(|e| Error::io("stdin is not a terminal")(e.into()))?;

    let mut silent = original.clone();
    silent.local_flags.remove(LocalFlags::ECHO);
    silent.local_flags.insert(LocalFlags::ECHONL);

    let _restore = exit_hook::register(move || {
        if let Err(e) = termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &original) {
            log::warn!("Could not restore terminal echo: {}", e);
        }
    });
    termios::tcsetattr(io::stdin(), SetArg::TCSAFLUSH, &silent)
        .map_err(|e| Error::io("disabling terminal echo")(e.into()))?;

    let mut stderr = io::stderr();
    write!(stderr, "{prompt}")
        .and_then(|()| stderr.flush())
        .map_err(Error::io("writing password prompt"))?;

    let mut line = Vec::new();
    io::stdin()
        .lock()
        .read_until(b'\n', &mut line)
        .map_err(Error::io("reading password"))?;
    Ok(Secret::new(trim_line_ending(line)))
}

fn trim_line_ending(mut line: Vec<u8>) -> Vec<u8> {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    line
}
