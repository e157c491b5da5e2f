//! Discovery and addressing of the numbered `<name>-<N>-link` entries of a nix profile.
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::{fmt, path::Path};

use crate::error::{Error, Result};
use crate::utils::{SYSTEM_PROFILES, USER_PROFILES};

pub mod listing;

/// One numbered build registered under a profile, e.g. the `42` of `system-42-link`
#[derive(Debug, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash, Copy, Clone)]
#[serde(transparent)]
pub struct Generation {
    pub num: u64,
}

impl From<u64> for Generation {
    fn from(num: u64) -> Self {
        Self { num }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.num)
    }
}

/// A directory-scoped set of generations sharing one name prefix, with a `<name>` link marking
/// the current one.
#[derive(Debug, Clone)]
pub struct Profile {
    dir: Utf8PathBuf,
    name: String,
}

impl Profile {
    pub fn new(dir: impl Into<Utf8PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    /// `/nix/var/nix/profiles/system`
    pub fn system() -> Self {
        Self::new(SYSTEM_PROFILES, "system")
    }

    /// Per-user profiles live under `$HOME/.local/state/nix/profiles`, e.g. `profile` or
    /// `home-manager`.
    pub fn user(home: &Utf8Path, name: &str) -> Self {
        Self::new(home.join(USER_PROFILES), name)
    }

    /// The link marking the current generation, e.g. `/nix/var/nix/profiles/system`
    pub fn path(&self) -> Utf8PathBuf {
        self.dir.join(&self.name)
    }

    /// e.g. `/nix/var/nix/profiles/system-14-link`
    pub fn link_path(&self, generation: Generation) -> Utf8PathBuf {
        self.dir.join(format!("{}-{}-link", self.name, generation))
    }

    /// `system-14-link` -> 14. Anything not of that exact shape is `None`.
    pub fn parse_entry(&self, entry: &str) -> Option<Generation> {
        let num = entry
            .strip_prefix(self.name.as_str())?
            .strip_prefix('-')?
            .strip_suffix("-link")?;
        // `u64::from_str` would also take "+5", and "05" would not round-trip through
        // `link_path`.
        if num.is_empty()
            || !num.bytes().all(|b| b.is_ascii_digit())
            || (num.len() > 1 && num.starts_with('0'))
        {
            return None;
        }
        num.parse::<u64>().ok().map(Generation::from)
    }

    /// Scans the profile directory. Unrelated entries are skipped, an empty result is not an
    /// error.
    pub fn populate(&self) -> Result<Generations> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(Error::io(format!("reading profile directory {}", self.dir)))?;

        let mut gens = Vec::new();
        for entry in entries {
            let entry = entry.map_err(Error::io(format!("reading entry of {}", self.dir)))?;
            // non-utf8 names cannot match the pattern anyway
            if let Some(generation) = entry.file_name().to_str().and_then(|n| self.parse_entry(n))
            {
                gens.push(generation);
            }
        }
        log::trace!("{}: found {} generations", self.path(), gens.len());
        Ok(Generations(gens))
    }

    /// Resolves the `<name>` link. Any failure here means the profile is inconsistent.
    pub fn current(&self) -> Result<Generation> {
        let link = self.path();
        let target = std::fs::read_link(&link).map_err(|e| Error::BrokenState {
            link: link.clone(),
            reason: e.to_string(),
        })?;

        // the link is usually relative (`system-42-link`), but accept an absolute one as well
        let parsed = target
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| self.parse_entry(n));
        parsed.ok_or_else(|| Error::BrokenState {
            link,
            reason: format!("target {}", target.display()),
        })
    }

    /// The build output a generation link points at. Calling it does not touch the link.
    pub fn out_path(&self, generation: Generation) -> Result<Utf8PathBuf> {
        let link = self.link_path(generation);
        let target = std::fs::read_link(&link).map_err(Error::io(format!("reading {link}")))?;
        Utf8PathBuf::from_path_buf(target).map_err(|p| Error::Io {
            context: format!("reading {link}"),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("non-utf8 target {}", p.display()),
            ),
        })
    }

    /// The modification time of the link itself (not of its target)
    pub fn build_date(&self, generation: Generation) -> Result<DateTime<Local>> {
        let link = self.link_path(generation);
        modified_time(link.as_std_path()).map_err(Error::io(format!("reading metadata of {link}")))
    }
}

fn modified_time(link: &Path) -> std::io::Result<DateTime<Local>> {
    std::fs::symlink_metadata(link)?
        .modified()
        .map(DateTime::<Local>::from)
}

/// The generations found by [`Profile::populate`], in scan order until sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generations(Vec<Generation>);

impl Generations {
    /// Oldest first, for display
    pub fn sort_ascending(&mut self) {
        self.0.sort_unstable();
    }

    /// Newest first, the order [`Generations::previous`] expects
    pub fn sort_descending(&mut self) {
        self.0.sort_unstable_by(|a, b| b.cmp(a));
    }

    /// The generation `n` steps older than `current`, on a newest-first list.
    ///
    /// Linear scan from the head, the list is only ordered once
    /// [`Generations::sort_descending`] ran. `n == 0` yields `current` itself.
    pub fn previous(&self, current: Generation, n: usize) -> Result<Generation> {
        let idx = self
            .0
            .iter()
            .position(|g| *g == current)
            .ok_or(Error::CurrentMissing(current))?;
        let available = self.0.len() - 1 - idx;
        if available < n {
            return Err(Error::OutOfRange {
                requested: n,
                current,
                available,
            });
        }
        Ok(self.0[idx + n])
    }

    pub fn iter(&self) -> impl Iterator<Item = Generation> + '_ {
        self.0.iter().copied()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Generation>> for Generations {
    fn from(gens: Vec<Generation>) -> Self {
        Self(gens)
    }
}
