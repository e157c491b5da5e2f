use camino::Utf8Path;
use chrono::{DateTime, Local};
use semver::Version;
use serde::Serialize;
use std::io::{self, ErrorKind, Write};

use super::{Generation, Profile};
use crate::error::{Error, Result};

/// What `list` shows for one generation. Fields that cannot be read stay `None`.
#[derive(Debug, Serialize)]
pub struct GenerationInfo {
    pub generation: Generation,
    pub current: bool,
    pub build_date: Option<DateTime<Local>>,
    pub out_path: Option<camino::Utf8PathBuf>,
    pub nixos_version: Option<String>,
    pub kernel_version: Option<Version>,
}

impl GenerationInfo {
    fn gather(profile: &Profile, generation: Generation, current: Generation) -> Self {
        let build_date = profile
            .build_date(generation)
            .map_err(|e| log::warn!("{}", e))
            .ok();
        let out_path = profile
            .out_path(generation)
            .map_err(|e| log::warn!("{}", e))
            .ok();
        let (nixos_version, kernel_version) = match &out_path {
            Some(out) => (
                nixos_version(out)
                    .map_err(|e| log::debug!("nixos-version of {}: {}", out, e))
                    .ok(),
                kernel_version(out)
                    .map_err(|e| log::debug!("kernel version of {}: {}", out, e))
                    .ok(),
            ),
            None => (None, None),
        };
        Self {
            generation,
            current: generation == current,
            build_date,
            out_path,
            nixos_version,
            kernel_version,
        }
    }

    /// `14 - 2024/10/01 12:34:56 - /nix/store/...-nixos-system-...`
    fn line(&self) -> String {
        let date = self
            .build_date
            .map(|d| d.format("%Y/%m/%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "????/??/?? ??:??:??".to_string());
        let out = self
            .out_path
            .as_ref()
            .map_or("<unknown>", |p| p.as_str());
        let marker = if self.current { " (current)" } else { "" };
        format!("{} - {} - {}{}", self.generation, date, out, marker)
    }
}

/// Scans `profile` and collects the listing, oldest first.
pub fn collect(profile: &Profile) -> Result<Vec<GenerationInfo>> {
    let mut gens = profile.populate()?;
    gens.sort_ascending();
    let current = profile.current()?;
    Ok(gens
        .iter()
        .map(|g| GenerationInfo::gather(profile, g, current))
        .collect())
}

/// Writes the listing to `out`, one line per generation or as a json array.
pub fn print(profile: &Profile, json: bool, mut out: impl Write) -> Result<()> {
    let infos = collect(profile)?;
    let written = if json {
        serde_json::to_writer_pretty(&mut out, &infos)
            .map_err(io::Error::from)
            .and_then(|()| writeln!(out))
    } else {
        infos
            .iter()
            .try_for_each(|info| writeln!(out, "{}", info.line()))
    };
    written.map_err(Error::io("writing generation listing"))
}

fn nixos_version(out: &Utf8Path) -> io::Result<String> {
    let ver_file = out.join("nixos-version");
    log::trace!("ver-file: {}", ver_file);
    crate::utils::read_fst_line(ver_file.as_std_path()).map(|l| l.trim_end().to_string())
}

/// `<out>/kernel` links to `<kernel>/bzImage`; the version is the single directory name under
/// `<kernel>/lib/modules/`.
fn kernel_version(out: &Utf8Path) -> io::Result<Version> {
    let mut kern_dir = std::fs::canonicalize(out.join("kernel"))?;

    // only directories
    if !kern_dir.is_dir() {
        kern_dir = kern_dir
            .parent()
            .ok_or(io::Error::new(ErrorKind::NotFound, "kernel has no parent dir"))?
            .to_path_buf();
    }

    // `lib/modules/<kernel-version/`
    let kernel_ver_dir = std::fs::read_dir(kern_dir.join("lib/modules"))?
        .next()
        .ok_or(io::Error::new(
            ErrorKind::NotFound,
            "could not find semverdir",
        ))??;

    let name = kernel_ver_dir.file_name();
    let name = name
        .to_str()
        .ok_or(io::Error::new(ErrorKind::InvalidData, "non-utf8 kernel dir"))?;
    Version::parse(name).map_err(|e| {
        io::Error::new(
            ErrorKind::InvalidData,
            format!("could not parse semver from dirname: {}", e),
        )
    })
}
