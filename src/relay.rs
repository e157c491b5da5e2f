//! Hands a password to `ssh` through `SSH_ASKPASS` without it appearing in an argument list or
//! a file that outlives the command.
use std::{
    ffi::OsStr,
    fs::{File, Permissions},
    io::{self, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::Command,
};

use tempfile::TempPath;

use crate::{
    error::{Error, Result},
    exit_hook::{self, ExitHook},
    secret::Secret,
};

pub const ASKPASS: &str = "SSH_ASKPASS";
pub const ASKPASS_REQUIRE: &str = "SSH_ASKPASS_REQUIRE";

/// owner read/write/execute, nothing for group and other
const SCRIPT_MODE: u32 = 0o700;

/// A one-shot askpass script printing a captured secret. Deleted when dropped, or by the exit
/// hooks on interrupt.
#[derive(Debug)]
pub struct RelayScript {
    path: PathBuf,
    _cleanup: ExitHook,
}

impl RelayScript {
    fn create_in(dir: &Path, secret: &Secret) -> Result<Self> {
        Self::create_with(dir, |file| {
            file.write_all(&script_body(secret.expose()))?;
            file.sync_all()
        })
    }

    /// Creates the script file in `dir` and has `fill` write its contents. If anything fails,
    /// nothing is left behind.
    fn create_with(dir: &Path, fill: impl FnOnce(&mut File) -> io::Result<()>) -> Result<Self> {
        let (mut file, temp_path) = tempfile::Builder::new()
            .prefix("rsctl-askpass.")
            .tempfile_in(dir)
            .map_err(Error::io(format!("creating askpass script in {}", dir.display())))?
            .into_parts();
        let path = temp_path.to_path_buf();
        log::trace!("askpass script: {}", path.display());

        // from here on every exit path deletes the file, including the `?`s below
        let script = Self {
            path,
            _cleanup: exit_hook::register(move || remove_script(temp_path)),
        };
        let context = || format!("writing askpass script {}", script.path.display());
        file.set_permissions(Permissions::from_mode(SCRIPT_MODE))
            .map_err(Error::io(context()))?;
        fill(&mut file).map_err(Error::io(context()))?;
        // closed before anything gets to exec it
        drop(file);
        Ok(script)
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The variables that make `ssh` (and `nix copy` through it) ask this script instead of the
    /// terminal.
    pub fn env(&self) -> [(&OsStr, &OsStr); 2] {
        [
            (OsStr::new(ASKPASS), self.path.as_os_str()),
            (OsStr::new(ASKPASS_REQUIRE), OsStr::new("force")),
        ]
    }

    pub fn apply<'c>(&self, cmd: &'c mut Command) -> &'c mut Command {
        cmd.envs(self.env())
    }
}

/// Writes `secret` into a fresh askpass script and runs `remote_command` with it. The script is
/// gone by the time this returns, whatever `remote_command` did.
pub fn with_relayed_secret<T>(
    secret: &Secret,
    remote_command: impl FnOnce(&RelayScript) -> Result<T>,
) -> Result<T> {
    with_relayed_secret_in(&std::env::temp_dir(), secret, remote_command)
}

/// [`with_relayed_secret`] with the script placed in `dir`. `remote_command` never runs if the
/// script could not be written.
pub fn with_relayed_secret_in<T>(
    dir: &Path,
    secret: &Secret,
    remote_command: impl FnOnce(&RelayScript) -> Result<T>,
) -> Result<T> {
    let script = RelayScript::create_in(dir, secret)?;
    remote_command(&script)
}

fn remove_script(path: TempPath) {
    let display = path.to_path_buf();
    match path.close() {
        Ok(()) => log::trace!("removed askpass script {}", display.display()),
        Err(source) => log::error!(
            "{}",
            Error::CleanupFailed {
                path: display,
                source
            }
        ),
    }
}

/// `#!/bin/sh` + `printf '%s' '<secret>'`, single quotes in the secret spliced as `'\''`
fn script_body(secret: &[u8]) -> Vec<u8> {
    let mut body = b"#!/bin/sh\nprintf '%s' ".to_vec();
    body.extend_from_slice(&single_quote(secret));
    body.push(b'\n');
    body
}

/// Quotes `raw` for a POSIX shell. Inside single quotes nothing is special except the quote
/// itself, which has to close the string, be escaped, and reopen it.
pub fn single_quote(raw: &[u8]) -> Vec<u8> {
    let mut quoted = Vec::with_capacity(raw.len() + 2);
    quoted.push(b'\'');
    for &b in raw {
        if b == b'\'' {
            quoted.extend_from_slice(b"'\\''");
        } else {
            quoted.push(b);
        }
    }
    quoted.push(b'\'');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit_hook::test_lock;
    use tempfile::TempDir;

    /// Runs the script through `sh` rather than exec'ing it, which avoids ETXTBSY races with
    /// other tests forking.
    fn run_script(path: &Path) -> Vec<u8> {
        let out = Command::new("/bin/sh").arg(path).output().unwrap();
        assert!(out.status.success());
        out.stdout
    }

    #[test]
    fn quoting() {
        assert_eq!(single_quote(b"abc"), b"'abc'");
        assert_eq!(single_quote(b"it's"), b"'it'\\''s'");
        assert_eq!(single_quote(b""), b"''");
    }

    #[test]
    fn script_reproduces_secret_exactly() {
        let _lock = test_lock();
        let raw = b"p'a\"ss w$(id)`x`\\n%s\\'".to_vec();
        let secret = Secret::new(raw.clone());
        let printed = with_relayed_secret(&secret, |script| Ok(run_script(script.path()))).unwrap();
        assert_eq!(printed, raw);
    }

    #[test]
    fn script_is_private_while_in_use() {
        let _lock = test_lock();
        let secret = Secret::new("pw");
        with_relayed_secret(&secret, |script| {
            let mode = std::fs::metadata(script.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, SCRIPT_MODE);
            let env: Vec<_> = script.env().into_iter().collect();
            assert_eq!(env[0], (OsStr::new(ASKPASS), script.path().as_os_str()));
            assert_eq!(env[1], (OsStr::new(ASKPASS_REQUIRE), OsStr::new("force")));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn removed_after_success() {
        let _lock = test_lock();
        let secret = Secret::new("pw");
        let path = with_relayed_secret(&secret, |script| {
            assert!(script.path().exists());
            Ok(script.path().to_path_buf())
        })
        .unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn removed_after_error() {
        let _lock = test_lock();
        let secret = Secret::new("pw");
        let mut seen = None;
        let res: Result<()> = with_relayed_secret(&secret, |script| {
            seen = Some(script.path().to_path_buf());
            Err(Error::MissingSetting("flake"))
        });
        assert!(res.is_err());
        assert!(!seen.unwrap().exists());
    }

    #[test]
    fn removed_on_interrupt() {
        let _lock = test_lock();
        let secret = Secret::new("pw");
        with_relayed_secret(&secret, |script| {
            // what the signal listener does before exiting
            exit_hook::run_all();
            assert!(!script.path().exists());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn missing_dir_never_runs_command() {
        let _lock = test_lock();
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        let mut ran = false;
        let res = with_relayed_secret_in(&missing, &Secret::new("pw"), |_| {
            ran = true;
            Ok(())
        });
        assert!(matches!(res, Err(Error::Io { .. })));
        assert!(!ran);
    }

    #[test]
    fn failed_write_leaves_nothing_behind() {
        let _lock = test_lock();
        let dir = TempDir::new().unwrap();
        let res = RelayScript::create_with(dir.path(), |file| {
            file.write_all(b"#!/bin/sh\nprintf '%s' 'half")?;
            Err(io::Error::other("disk full"))
        });
        assert!(matches!(res, Err(Error::Io { .. })));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn script_lands_in_given_dir() {
        let _lock = test_lock();
        let dir = TempDir::new().unwrap();
        let secret = Secret::new("pw");
        with_relayed_secret_in(dir.path(), &secret, |script| {
            assert_eq!(script.path().parent(), Some(dir.path()));
            Ok(())
        })
        .unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn env_reaches_subprocess() {
        let _lock = test_lock();
        let secret = Secret::new("pw");
        with_relayed_secret(&secret, |script| {
            let mut cmd = Command::new("/bin/sh");
            cmd.args(["-c", "printf '%s %s' \"$SSH_ASKPASS\" \"$SSH_ASKPASS_REQUIRE\""]);
            let out = script.apply(&mut cmd).output().unwrap();
            let expected = format!("{} force", script.path().display());
            assert_eq!(String::from_utf8(out.stdout).unwrap(), expected);
            Ok(())
        })
        .unwrap();
    }
}
