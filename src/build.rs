use camino::Utf8PathBuf;
use std::ffi::OsString;

use crate::{
    error::{Error, Result},
    flake::FlakeRef,
    process::{self, Tool, ToolOutcome},
};

/// Builds a flake output with `nom`, or with `nix` when `nom` cannot be started.
#[derive(Debug, Clone)]
pub struct BuildDriver {
    primary: Tool,
    fallback: Tool,
}

impl Default for BuildDriver {
    fn default() -> Self {
        Self::new(Tool::new("nom"), Tool::new("nix"))
    }
}

impl BuildDriver {
    pub fn new(primary: Tool, fallback: Tool) -> Self {
        Self { primary, fallback }
    }

    /// `<tool> build <flake_ref> --no-link --print-out-paths [extra_args]`, returning the printed
    /// output path.
    ///
    /// The fallback only runs if the primary tool never started. A build that ran and failed is
    /// reported as is: the fallback would fail the same way.
    pub fn build(&self, flake_ref: &FlakeRef, extra_args: &[String]) -> Result<Utf8PathBuf> {
        let args = build_args(flake_ref, extra_args);

        let (tool, outcome) = match process::run_captured(self.primary.command().args(&args)) {
            ToolOutcome::FailedToStart(e) => {
                log::warn!(
                    "Failed to run {}: {}. Falling back to {}",
                    self.primary,
                    e,
                    self.fallback
                );
                let outcome = process::run_captured(self.fallback.command().args(&args));
                (&self.fallback, outcome)
            }
            exited @ ToolOutcome::Exited { .. } => (&self.primary, exited),
        };

        let stdout = outcome.into_result(tool, |status| Error::BuildFailed {
            tool: tool.to_string(),
            status,
        })?;
        parse_out_path(tool, stdout)
    }
}

fn build_args(flake_ref: &FlakeRef, extra_args: &[String]) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "build".into(),
        flake_ref.to_string().into(),
        "--no-link".into(),
        "--print-out-paths".into(),
    ];
    args.extend(extra_args.iter().map(OsString::from));
    args
}

/// Strips the one trailing newline `--print-out-paths` leaves
fn parse_out_path(tool: &Tool, stdout: Vec<u8>) -> Result<Utf8PathBuf> {
    let malformed = || Error::MalformedOutput {
        tool: tool.to_string(),
    };
    let text = String::from_utf8(stdout).map_err(|_| malformed())?;
    let path = text.strip_suffix('\n').unwrap_or(&text);
    if path.is_empty() {
        return Err(malformed());
    }
    log::trace!("outlink: {}", path);
    Ok(Utf8PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// A fake build tool: records its arguments to `<dir>/<name>.args`, then runs `body`.
    /// Run through `sh` so nothing is exec'd straight after being written.
    fn fake_tool(dir: &Path, name: &str, body: &str) -> Tool {
        let script = dir.join(format!("{name}.sh"));
        let args_file = dir.join(format!("{name}.args"));
        std::fs::write(
            &script,
            format!(
                "printf '%s\\n' \"$@\" > '{}'\n{}\n",
                args_file.display(),
                body
            ),
        )
        .unwrap();
        Tool::new("/bin/sh").arg(script)
    }

    fn recorded_args(dir: &Path, name: &str) -> Option<Vec<String>> {
        std::fs::read_to_string(dir.join(format!("{name}.args")))
            .ok()
            .map(|s| s.lines().map(String::from).collect())
    }

    fn flake() -> FlakeRef {
        FlakeRef::toplevel("/etc/nixos", "box").unwrap()
    }

    fn expected_args() -> Vec<String> {
        vec![
            "build".to_string(),
            "/etc/nixos#nixosConfigurations.box.config.system.build.toplevel".to_string(),
            "--no-link".to_string(),
            "--print-out-paths".to_string(),
            "--impure".to_string(),
        ]
    }

    #[test]
    fn primary_success_skips_fallback() {
        let dir = TempDir::new().unwrap();
        let driver = BuildDriver::new(
            fake_tool(dir.path(), "nom", "echo /nix/store/aaa-nixos-system"),
            fake_tool(dir.path(), "nix", "exit 0"),
        );
        let out = driver.build(&flake(), &["--impure".to_string()]).unwrap();
        assert_eq!(out, Utf8PathBuf::from("/nix/store/aaa-nixos-system"));
        assert_eq!(recorded_args(dir.path(), "nom"), Some(expected_args()));
        assert_eq!(recorded_args(dir.path(), "nix"), None);
    }

    #[test]
    fn missing_primary_falls_back_with_same_args() {
        let dir = TempDir::new().unwrap();
        let driver = BuildDriver::new(
            Tool::new("/nonexistent/rsctl/nom"),
            fake_tool(dir.path(), "nix", "echo /nix/store/bbb-nixos-system"),
        );
        let out = driver.build(&flake(), &["--impure".to_string()]).unwrap();
        assert_eq!(out, Utf8PathBuf::from("/nix/store/bbb-nixos-system"));
        assert_eq!(recorded_args(dir.path(), "nix"), Some(expected_args()));
    }

    #[test]
    fn failed_build_does_not_fall_back() {
        let dir = TempDir::new().unwrap();
        let driver = BuildDriver::new(
            fake_tool(dir.path(), "nom", "exit 1"),
            fake_tool(dir.path(), "nix", "echo /nix/store/ccc"),
        );
        let err = driver.build(&flake(), &[]).unwrap_err();
        match err {
            Error::BuildFailed { status, .. } => assert_eq!(status.code(), Some(1)),
            other => panic!("expected BuildFailed, got {other:?}"),
        }
        assert_eq!(recorded_args(dir.path(), "nix"), None);
    }

    #[test]
    fn both_missing_is_not_started() {
        let driver = BuildDriver::new(
            Tool::new("/nonexistent/rsctl/nom"),
            Tool::new("/nonexistent/rsctl/nix"),
        );
        assert!(matches!(
            driver.build(&flake(), &[]),
            Err(Error::ToolNotStarted { .. })
        ));
    }

    #[test]
    fn empty_output_is_malformed() {
        let dir = TempDir::new().unwrap();
        let driver = BuildDriver::new(
            fake_tool(dir.path(), "nom", "echo"),
            fake_tool(dir.path(), "nix", "exit 0"),
        );
        assert!(matches!(
            driver.build(&flake(), &[]),
            Err(Error::MalformedOutput { .. })
        ));
    }

    #[test]
    fn only_one_newline_is_trimmed() {
        let tool = Tool::new("nix");
        assert_eq!(
            parse_out_path(&tool, b"/nix/store/x\n".to_vec()).unwrap(),
            Utf8PathBuf::from("/nix/store/x")
        );
        assert_eq!(
            parse_out_path(&tool, b"/nix/store/x\n\n".to_vec()).unwrap(),
            Utf8PathBuf::from("/nix/store/x\n")
        );
        assert!(parse_out_path(&tool, Vec::new()).is_err());
    }
}
