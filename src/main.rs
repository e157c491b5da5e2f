#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_name_repetitions)]
use clap::Parser;
use cmd::{Cli, SubCommand};
use std::{error::Error, io::Write, process::ExitCode};

mod activate;
mod build;
mod clean;
mod cmd;
mod error;
mod exit_hook;
mod flake;
mod generations;
mod process;
mod relay;
mod rollback;
mod secret;
mod settings;
pub mod utils;

fn main() -> ExitCode {
    init_logger();
    let res = initial_init().and_then(|cmd| cmd.run().map_err(Into::into));
    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Progress goes out as `> message`, problems as `[LEVEL] message`. Debug and trace keep the
/// source location. `RUST_LOG` overrides the default `info` level.
fn init_logger() {
    env_logger::Builder::new()
        .format(|buf, rec| {
            let level = rec.level();
            let style = buf.default_level_style(level);
            match level {
                log::Level::Info => writeln!(buf, "{style}>{style:#} {}", rec.args()),
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "{style}[{}]{style:#} {}", level, rec.args())
                }
                log::Level::Debug | log::Level::Trace => writeln!(
                    buf,
                    "{}:{} [{}]\t{}",
                    rec.file().unwrap_or("unknown"),
                    rec.line().unwrap_or(0),
                    level,
                    rec.args()
                ),
            }
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// Sanatises arg[0]
/// Parses cli, returning the subcommand of the result
/// Ensures not run as root, unless it is the elevated half of `clean`
fn initial_init() -> Result<SubCommand, Box<dyn Error>> {
    // sanatise executable name
    let args = std::env::args();
    let mut args = args.peekable();
    let Some(fst) = args.peek() else {
        return Err("No args present in invocation".into());
    };
    if !fst.ends_with("nixos-rsctl") {
        return Err("Cli args did not begin with a path to file named 'nixos-rsctl'".into());
    };

    // parse out cli args into a structured encapsulation
    let cli = Cli::parse_from(args);
    log::trace!("parsed cli: {:?}", cli);

    if nix::unistd::Uid::current().is_root() && !cli.command.may_run_as_root() {
        return Err("This program should not be run as root!".into());
    };
    Ok(cli.command)
}
