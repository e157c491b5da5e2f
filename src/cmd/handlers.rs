use std::io;

use camino::Utf8Path;

use super::{SubCommand, SwitchArgs};
use crate::{
    activate::{ActivationPlan, Activator, Target},
    build::BuildDriver,
    clean,
    error::{Error, Result},
    flake::{self, FlakeRef},
    generations::{listing, Profile},
    process::{self, Tool},
    rollback,
    settings::{self, Overrides, Resolved, Settings},
    utils::CURRENT_SYSTEM,
};

impl SubCommand {
    pub fn run(self) -> Result<()> {
        match self {
            Self::Switch(args) => args.run(),
            Self::Rollback {
                to,
                list: true,
                ..
            } => {
                if to.is_some() {
                    log::warn!("--to is ignored when listing");
                }
                listing::print(&Profile::system(), false, io::stdout().lock())
            }
            Self::Rollback { to, diff_tool, .. } => {
                rollback::rollback(&Profile::system(), to, &Activator::new(diff_tool, false))
            }
            Self::List {
                json,
                profile_dir,
                profile_name,
            } => listing::print(
                &Profile::new(profile_dir, profile_name),
                json,
                io::stdout().lock(),
            ),
            Self::Clean => clean::run(),
        }
    }
}

impl SwitchArgs {
    fn run(self) -> Result<()> {
        let resolved = self.resolve_settings()?;
        log::trace!("resolved settings: {:?}", resolved);

        if self.repl {
            return open_repl(&resolved);
        }

        let flake_ref = FlakeRef::toplevel(&resolved.flake, &resolved.configuration)?;
        log::info!("Building {}#{}", resolved.flake, resolved.configuration);
        let out = BuildDriver::default().build(&flake_ref, &self.extra_args)?;
        println!("{out}");

        let plan = ActivationPlan::switch(&Profile::system(), out);
        Activator::new(self.diff_tool, self.remote_diff).deploy(
            &Target::from(resolved.target_host),
            Utf8Path::new(CURRENT_SYSTEM),
            &plan,
        )
    }

    /// Folds the command line into the saved settings, writing them back when they changed.
    /// Failing to write is not fatal to the run.
    fn resolve_settings(&self) -> Result<Resolved> {
        let (flake, flake_configuration) = match self.flake.as_deref() {
            Some(raw) => {
                let (flake, configuration) = flake::split_flake_arg(raw);
                (Some(flake), configuration)
            }
            None => (None, None),
        };
        if let (Some(from_flake), Some(given)) = (&flake_configuration, &self.configuration) {
            if from_flake != given {
                log::warn!(
                    "--flake names configuration {}, using {} from --configuration",
                    from_flake,
                    given
                );
            }
        }
        let overrides = Overrides {
            profile: self.profile.clone(),
            save_default: self.save_default,
            flake,
            configuration: self.configuration.clone().or(flake_configuration),
            target_host: self.target_host.clone(),
        };

        let path = settings::default_path()?;
        let mut settings = Settings::load(&path);
        let (resolved, changed) = settings.resolve(overrides, local_hostname)?;
        if changed {
            match settings.save(&path) {
                Ok(()) => log::debug!("saved settings to {}", path),
                Err(e) => log::error!("Failed to save settings: {}", e),
            }
        }
        Ok(resolved)
    }
}

fn local_hostname() -> Option<String> {
    hostname::get().ok().and_then(|h| h.into_string().ok())
}

fn open_repl(resolved: &Resolved) -> Result<()> {
    let flake_ref = FlakeRef::configuration(&resolved.flake, &resolved.configuration)?;
    let mut cmd = Tool::new("nix").arg("repl").arg(flake_ref.to_string()).command();
    process::run(&mut cmd)
        .into_result("nix repl", |status| Error::ToolFailed {
            tool: "nix repl".to_string(),
            status,
        })
        .map(drop)
}
