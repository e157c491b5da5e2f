//! Per-profile build settings remembered between runs.
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, ffi::OsString, io};

use crate::error::{Error, Result};

const FILE_NAME: &str = "nixos-rsctl/profiles.json";

/// What is remembered for one named profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSettings {
    pub flake: Option<String>,
    pub configuration: Option<String>,
    pub target_host: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub default_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileSettings>,
}

/// Values given on the command line for this run
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub profile: Option<String>,
    pub save_default: bool,
    pub flake: Option<String>,
    pub configuration: Option<String>,
    pub target_host: Option<String>,
}

/// The settings a run actually uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub profile: String,
    pub flake: String,
    pub configuration: String,
    pub target_host: Option<String>,
}

/// `$XDG_DATA_HOME/nixos-rsctl/profiles.json`, or under `~/.local/share` without it
pub fn default_path() -> Result<Utf8PathBuf> {
    let utf8 = |var: &str, value: OsString| {
        Utf8PathBuf::from_path_buf(value.into()).map_err(|p| Error::Io {
            context: format!("reading ${var}"),
            source: io::Error::new(
                io::ErrorKind::InvalidData,
                format!("non-utf8 path {}", p.display()),
            ),
        })
    };
    if let Some(data) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(utf8("XDG_DATA_HOME", data)?.join(FILE_NAME));
    }
    let home = std::env::var_os("HOME").ok_or_else(|| Error::Io {
        context: "locating settings file".to_string(),
        source: io::Error::new(io::ErrorKind::NotFound, "neither XDG_DATA_HOME nor HOME is set"),
    })?;
    Ok(utf8("HOME", home)?.join(".local/share").join(FILE_NAME))
}

impl Settings {
    /// A missing file is an empty record. An unreadable or corrupt one is warned about and
    /// treated as empty.
    pub fn load(path: &Utf8Path) -> Self {
        match Self::try_load(path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Ignoring saved settings: {}", e);
                Self::default()
            }
        }
    }

    fn try_load(path: &Utf8Path) -> Result<Self> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::io(format!("reading {path}"))(e)),
        };
        serde_json::from_slice(&raw).map_err(|source| Error::Settings {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::io(format!("creating {parent}")))?;
        }
        let raw = serde_json::to_vec_pretty(self).map_err(|source| Error::Settings {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, raw).map_err(Error::io(format!("writing {path}")))
    }

    /// Merges `overrides` into the stored record and says whether anything changed.
    ///
    /// The profile named on the command line becomes the default if there is none yet or
    /// `save_default` is set. A missing configuration falls back to `fallback_configuration`,
    /// which is not stored.
    pub fn resolve(
        &mut self,
        overrides: Overrides,
        fallback_configuration: impl FnOnce() -> Option<String>,
    ) -> Result<(Resolved, bool)> {
        let mut changed = false;

        let profile = match overrides.profile {
            Some(profile) => {
                if self.default_profile.is_none() || overrides.save_default {
                    changed |= self.default_profile.as_ref() != Some(&profile);
                    self.default_profile = Some(profile.clone());
                }
                profile
            }
            None => self
                .default_profile
                .clone()
                .ok_or(Error::MissingSetting("profile"))?,
        };

        let stored = self.profiles.entry(profile.clone()).or_default();
        for (slot, new) in [
            (&mut stored.flake, overrides.flake),
            (&mut stored.configuration, overrides.configuration),
            (&mut stored.target_host, overrides.target_host),
        ] {
            if let Some(new) = new.filter(|n| !n.is_empty()) {
                changed |= slot.as_ref() != Some(&new);
                *slot = Some(new);
            }
        }

        let flake = stored.flake.clone().ok_or(Error::MissingSetting("flake"))?;
        let configuration = match stored.configuration.clone() {
            Some(configuration) => configuration,
            None => {
                let fallback =
                    fallback_configuration().ok_or(Error::MissingSetting("configuration"))?;
                log::info!("No configuration given, using {}", fallback);
                fallback
            }
        };
        let target_host = stored.target_host.clone();

        Ok((
            Resolved {
                profile,
                flake,
                configuration,
                target_host,
            },
            changed,
        ))
    }
}
