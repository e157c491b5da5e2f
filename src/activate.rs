//! Diff-then-activate, on this machine or on a remote one.
//!
//! Activation is always the same two steps, registration first:
//!
//! 1. point the profile at the new generation (`nix-env --set` for a fresh build,
//!    `nix-env --switch-generation` for a rollback)
//! 2. `<out>/bin/switch-to-configuration switch`
//!
//! Interrupted between the two, the profile (and so the next boot) already points at the new
//! generation while the running system is still the old one. Running the same command again, or
//! a rollback, brings both back in line.

use camino::{Utf8Path, Utf8PathBuf};
use std::process::Command;

use crate::{
    error::{Error, Result},
    generations::{Generation, Profile},
    process::{self, Tool, ToolOutcome},
    relay::{self, RelayScript},
    secret::{self, Secret},
    utils::CURRENT_SYSTEM,
};

/// Where the new generation gets activated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Local,
    /// anything `ssh` accepts as a destination
    Remote(String),
}

impl From<Option<String>> for Target {
    fn from(host: Option<String>) -> Self {
        host.filter(|h| !h.is_empty())
            .map_or(Self::Local, Self::Remote)
    }
}

/// Tool showing the package-level changes between two system closures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum DiffTool {
    /// `dix <old> <new>`
    #[default]
    Dix,
    /// `nvd diff <old> <new>`
    Nvd,
}

impl DiffTool {
    fn tool(self) -> Tool {
        match self {
            Self::Dix => Tool::new("dix"),
            Self::Nvd => Tool::new("nvd").arg("diff"),
        }
    }

    fn command(self, baseline: &Utf8Path, new: &Utf8Path) -> Command {
        let mut cmd = self.tool().command();
        cmd.arg(baseline).arg(new);
        cmd
    }

    /// The same invocation as one line for a remote shell
    fn shell_line(self, baseline: &Utf8Path, new: &Utf8Path) -> String {
        match self {
            Self::Dix => format!("dix {baseline} {new}"),
            Self::Nvd => format!("nvd diff {baseline} {new}"),
        }
    }
}

/// How the profile gets pointed at the new generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// a fresh build becomes a new generation
    SetOutput,
    /// an existing generation becomes current again
    SwitchGeneration(Generation),
}

/// The two-step activation command for one output path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationPlan {
    profile: Utf8PathBuf,
    out: Utf8PathBuf,
    registration: Registration,
}

impl ActivationPlan {
    pub fn switch(profile: &Profile, out: Utf8PathBuf) -> Self {
        Self {
            profile: profile.path(),
            out,
            registration: Registration::SetOutput,
        }
    }

    pub fn rollback(profile: &Profile, generation: Generation, out: Utf8PathBuf) -> Self {
        Self {
            profile: profile.path(),
            out,
            registration: Registration::SwitchGeneration(generation),
        }
    }

    pub fn out(&self) -> &Utf8Path {
        &self.out
    }

    /// The command line run under `sudo -- /bin/sh -c`
    pub fn command(&self) -> String {
        let register = match self.registration {
            Registration::SetOutput => {
                format!("nix-env --profile {} --set {}", self.profile, self.out)
            }
            Registration::SwitchGeneration(generation) => format!(
                "nix-env --profile {} --switch-generation {}",
                self.profile, generation
            ),
        };
        format!(
            "{} && {}/bin/switch-to-configuration switch",
            register, self.out
        )
    }

    /// The argument `ssh` runs on the remote host. `sudo` reads the password from stdin and
    /// prints no prompt.
    pub fn remote_command(&self) -> String {
        let quoted = relay::single_quote(self.command().as_bytes());
        format!(
            "sudo --prompt= --stdin -- /bin/sh -c {}",
            String::from_utf8_lossy(&quoted)
        )
    }
}

#[derive(Debug, Clone)]
pub struct Activator {
    elevate: Tool,
    /// runs `nix copy` for remote targets
    nix: Tool,
    ssh: Tool,
    diff_tool: DiffTool,
    remote_diff: bool,
}

impl Default for Activator {
    fn default() -> Self {
        Self::new(DiffTool::default(), false)
    }
}

impl Activator {
    pub fn new(diff_tool: DiffTool, remote_diff: bool) -> Self {
        Self {
            elevate: Tool::new("sudo").arg("--"),
            nix: Tool::new("nix"),
            ssh: Tool::new("ssh"),
            diff_tool,
            remote_diff,
        }
    }

    /// Replaces `sudo --` as the local elevation prefix
    #[cfg(test)]
    #[must_use]
    pub fn with_elevation(mut self, elevate: Tool) -> Self {
        self.elevate = elevate;
        self
    }

    /// Replaces the `nix` and `ssh` used for remote targets
    #[cfg(test)]
    #[must_use]
    pub fn with_remote_tools(mut self, nix: Tool, ssh: Tool) -> Self {
        self.nix = nix;
        self.ssh = ssh;
        self
    }

    /// Diffs against `baseline` and activates `plan`, here or on `target`.
    ///
    /// Remote activation prompts for the remote password first; `baseline` only applies
    /// locally, a remote diff (if enabled) always compares against the remote
    /// `/run/current-system`.
    pub fn deploy(
        &self,
        target: &Target,
        baseline: &Utf8Path,
        plan: &ActivationPlan,
    ) -> Result<()> {
        match target {
            Target::Local => {
                log::info!("Comparing changes");
                self.diff(baseline, plan.out());
                log::info!("Activating configuration");
                self.activate_local(plan)
            }
            Target::Remote(host) => {
                let secret = secret::read_from_terminal(&format!("({host}) Password: "))?;
                self.deploy_remote(host, plan, &secret)
            }
        }
    }

    /// Runs the diff tool. Its failure is reported and otherwise ignored.
    pub fn diff(&self, baseline: &Utf8Path, new: &Utf8Path) {
        match process::run(&mut self.diff_tool.command(baseline, new)) {
            ToolOutcome::Exited { status, .. } if status.success() => {}
            ToolOutcome::Exited { status, .. } => {
                log::warn!("{}: non-zero exit code ({})", self.diff_tool, status);
            }
            ToolOutcome::FailedToStart(e) => {
                log::warn!("Failed to run {}: {}", self.diff_tool, e);
            }
        }
    }

    pub fn activate_local(&self, plan: &ActivationPlan) -> Result<()> {
        let mut cmd = self.elevate.command();
        cmd.arg("/bin/sh").arg("-c").arg(plan.command());
        process::run(&mut cmd)
            .into_result(&self.elevate, |status| Error::ActivationFailed {
                step: "switch-to-configuration/nix-env".to_string(),
                status,
            })
            .map(drop)
    }

    fn deploy_remote(&self, host: &str, plan: &ActivationPlan, secret: &Secret) -> Result<()> {
        relay::with_relayed_secret(secret, |relay| {
            log::info!("Copying configuration to {}", host);
            self.copy_closure(host, plan.out(), relay)?;

            if self.remote_diff {
                log::info!("Comparing changes on {}", host);
                self.remote_diff(host, plan.out(), relay);
            }

            log::info!("Activating configuration on {}", host);
            self.activate_remote(host, plan, secret, relay)
        })
    }

    fn remote_diff(&self, host: &str, new: &Utf8Path, relay: &RelayScript) {
        let mut cmd = self.ssh.command();
        cmd.arg(host)
            .arg(self.diff_tool.shell_line(Utf8Path::new(CURRENT_SYSTEM), new));
        relay.apply(&mut cmd);
        match process::run(&mut cmd) {
            ToolOutcome::Exited { status, .. } if status.success() => {}
            ToolOutcome::Exited { status, .. } => {
                log::warn!("{} on {}: non-zero exit code ({})", self.diff_tool, host, status);
            }
            ToolOutcome::FailedToStart(e) => log::warn!("Failed to run ssh: {}", e),
        }
    }
}

/// `<nix> copy --to ssh-ng://<host> --no-check-sigs <out>`
fn copy_command(nix: &Tool, host: &str, out: &Utf8Path) -> Command {
    let mut cmd = nix.command();
    cmd.arg("copy")
        .arg("--to")
        .arg(format!("ssh-ng://{host}"))
        .arg("--no-check-sigs")
        .arg(out);
    cmd
}

impl Activator {
    fn copy_closure(&self, host: &str, out: &Utf8Path, relay: &RelayScript) -> Result<()> {
        let mut cmd = copy_command(&self.nix, host, out);
        relay.apply(&mut cmd);
        process::run(&mut cmd)
            .into_result(&self.nix, |status| Error::ActivationFailed {
                step: "nix copy".to_string(),
                status,
            })
            .map(drop)
    }

    /// The password goes to the remote `sudo` on stdin, followed by a newline.
    fn activate_remote(
        &self,
        host: &str,
        plan: &ActivationPlan,
        secret: &Secret,
        relay: &RelayScript,
    ) -> Result<()> {
        let mut cmd = self.ssh.command();
        cmd.arg(host).arg(plan.remote_command());
        relay.apply(&mut cmd);

        let mut input = secret.expose().to_vec();
        input.push(b'\n');
        let outcome = process::run_with_input(&mut cmd, &input);
        input.fill(0);

        outcome
            .into_result(&self.ssh, |status| Error::ActivationFailed {
                step: "ssh/switch-to-configuration/nix-env".to_string(),
                status,
            })
            .map(drop)
    }
}
