use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

use crate::{activate::DiffTool, utils::SYSTEM_PROFILES};

mod parsers;
/// Implementations for carrying out the various tasks
mod handlers;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: SubCommand,
}

#[derive(Subcommand, Debug)]
pub enum SubCommand {
    /// Build a configuration, show what changes, and activate it. Here, or on a remote host.
    Switch(SwitchArgs),
    /// Activate an older generation of the system profile.
    Rollback {
        /// Generation to go to. Negative values count back from the current one.
        #[arg(long, short, alias = "profile", allow_negative_numbers = true)]
        to: Option<i64>,
        /// List the available generations instead of rolling back
        #[arg(long, short)]
        list: bool,
        #[arg(long, value_enum, default_value_t)]
        diff_tool: DiffTool,
    },
    /// List the generations of a profile.
    List {
        #[arg(long)]
        /// Outputs generations in json format
        json: bool,
        #[arg(long, default_value = SYSTEM_PROFILES)]
        profile_dir: Utf8PathBuf,
        #[arg(long, default_value = "system", value_parser = parsers::profile_name_parse)]
        profile_name: String,
    },
    /// Delete all but the current and previous generation of the system, user and home-manager
    /// profiles, drop `result`/`.direnv` GC roots, then run `nix store gc`.
    Clean,
}

#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct SwitchArgs {
    /// Saved profile to act on. Defaults to the last one saved as default.
    #[arg(value_parser = parsers::profile_name_parse)]
    pub profile: Option<String>,
    /// Use this profile by default on subsequent runs
    #[arg(long, short)]
    pub save_default: bool,
    /// Path or url of the flake. `<flake>#<name>` also sets the configuration.
    #[arg(long, short)]
    pub flake: Option<String>,
    /// The `nixosConfigurations` entry to build. Falls back to the hostname.
    #[arg(long, short, value_parser = parsers::configuration_parse)]
    pub configuration: Option<String>,
    /// Deploy to this host over ssh instead of activating locally
    #[arg(long, short)]
    pub target_host: Option<String>,
    #[arg(long, value_enum, default_value_t)]
    pub diff_tool: DiffTool,
    /// Also diff on the target host before activating there
    #[arg(long)]
    pub remote_diff: bool,
    /// Open `nix repl` with the configuration loaded instead of building it
    #[arg(long, short)]
    pub repl: bool,
    /// Passed through to `nom build`/`nix build`
    #[arg(last = true)]
    pub extra_args: Vec<String>,
}

impl SubCommand {
    /// The elevated half of `clean` re-runs this program as root
    pub fn may_run_as_root(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> SubCommand {
        Cli::try_parse_from(std::iter::once("nixos-rsctl").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn rollback_takes_negative_target() {
        match parse(&["rollback", "--to", "-2"]) {
            SubCommand::Rollback { to, list, .. } => {
                assert_eq!(to, Some(-2));
                assert!(!list);
            }
            other => panic!("{other:?}"),
        }
        assert!(matches!(
            parse(&["rollback"]),
            SubCommand::Rollback { to: None, .. }
        ));
    }

    #[test]
    fn switch_args() {
        let SubCommand::Switch(args) = parse(&[
            "switch", "laptop", "-f", "/etc/nixos", "-t", "root@box", "--diff-tool", "nvd", "--",
            "--impure",
        ]) else {
            panic!("not a switch");
        };
        assert_eq!(args.profile.as_deref(), Some("laptop"));
        assert_eq!(args.flake.as_deref(), Some("/etc/nixos"));
        assert_eq!(args.target_host.as_deref(), Some("root@box"));
        assert_eq!(args.diff_tool, DiffTool::Nvd);
        assert_eq!(args.extra_args, vec!["--impure".to_string()]);
    }

    #[test]
    fn bad_configuration_is_rejected() {
        assert!(Cli::try_parse_from(["nixos-rsctl", "switch", "-c", "a#b"]).is_err());
    }
}
