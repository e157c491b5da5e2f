//! Deleting old generations and stale GC roots, then collecting garbage.
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use crate::{
    error::{Error, Result},
    generations::Profile,
    process::{self, Tool},
    utils::GCROOTS_AUTO,
};

/// Removes every generation link of `profile` except the current one and the one before it.
/// Links that fail to go are logged and skipped.
pub fn remove_old_generations(profile: &Profile) -> Result<Vec<Utf8PathBuf>> {
    let mut gens = profile.populate()?;
    gens.sort_descending();
    let current = profile.current()?;
    let previous = match gens.previous(current, 1) {
        Ok(previous) => Some(previous),
        Err(Error::OutOfRange { .. }) => None,
        Err(e) => return Err(e),
    };

    let mut removed = Vec::new();
    for generation in gens
        .iter()
        .filter(|g| *g != current && Some(*g) != previous)
    {
        let link = profile.link_path(generation);
        match std::fs::remove_file(&link) {
            Ok(()) => removed.push(link),
            Err(e) => log::error!("Failed to remove {}, skipping: {}", link, e),
        }
    }
    Ok(removed)
}

/// Out-links (`result`, `result-*`) and anything inside a `.direnv` directory
pub fn is_sweepable(target: &Path) -> bool {
    let out_link = target
        .file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|n| n == "result" || n.starts_with("result-"));
    out_link || target.components().any(|c| c.as_os_str() == ".direnv")
}

/// Deletes the sweepable targets of the roots in `dir`, returning what was deleted.
pub fn sweep_gc_roots(dir: &Utf8Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(Error::io(format!("reading {dir}")))?;

    let mut removed = Vec::new();
    for entry in entries {
        let link = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                log::error!("Failed to read an entry of {}, skipping: {}", dir, e);
                continue;
            }
        };
        let target = match std::fs::read_link(&link) {
            Ok(target) => target,
            Err(e) => {
                log::error!("Failed to read link {}, skipping: {}", link.display(), e);
                continue;
            }
        };
        if !is_sweepable(&target) {
            continue;
        }
        match std::fs::remove_file(&target) {
            Ok(()) => removed.push(target),
            Err(e) => log::error!("Failed to remove {}, skipping: {}", target.display(), e),
        }
    }
    Ok(removed)
}

fn clean_profile(profile: &Profile, display_name: &str) {
    match remove_old_generations(profile) {
        Ok(removed) => {
            for link in removed {
                println!("{link}");
            }
        }
        Err(e) => log::error!("Skipping {} profiles: {}", display_name, e),
    }
}

/// As root: cleans the system profile only. Otherwise: re-runs itself under `sudo` for the
/// system profile, then cleans the user and home-manager profiles and the GC roots, and runs
/// `nix store gc`.
pub fn run() -> Result<()> {
    if nix::unistd::Uid::effective().is_root() {
        log::info!("Cleaning system profiles");
        clean_profile(&Profile::system(), "system");
        return Ok(());
    }

    match std::env::current_exe() {
        Ok(exe) => {
            let mut cmd = Tool::new("sudo").arg("--").arg(exe).command();
            cmd.arg("clean");
            if let Err(e) = process::run(&mut cmd).into_result("sudo", |status| {
                Error::ToolFailed {
                    tool: "sudo".to_string(),
                    status,
                }
            }) {
                log::error!("Failed to clean system profiles: {}", e);
            }
        }
        Err(e) => log::error!("Failed to locate own executable, skipping system profiles: {}", e),
    }

    match std::env::var("HOME") {
        Ok(home) => {
            let home = Utf8PathBuf::from(home);
            log::info!("Cleaning user profiles");
            clean_profile(&Profile::user(&home, "profile"), "user");
            log::info!("Cleaning home-manager profiles");
            clean_profile(&Profile::user(&home, "home-manager"), "home-manager");
        }
        Err(e) => log::error!("HOME is not usable, skipping user profiles: {}", e),
    }

    log::info!("Cleaning gcroots (.direnv, result)");
    match sweep_gc_roots(Utf8Path::new(GCROOTS_AUTO)) {
        Ok(removed) => {
            for target in removed {
                println!("{}", target.display());
            }
        }
        Err(e) => log::error!("Skipping gcroots: {}", e),
    }

    log::info!("Running nix store gc");
    cmd_lib::run_cmd!(nix store gc).map_err(Error::io("nix store gc"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generations::{tests::fake_profile, Generation};
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    #[test]
    fn keeps_current_and_previous() {
        let (_dir, profile) = fake_profile(&[1, 2, 3, 4, 5], Some(4));
        let mut removed = remove_old_generations(&profile).unwrap();
        removed.sort();
        let expected: Vec<_> = [1, 2, 5]
            .into_iter()
            .map(|n| profile.link_path(Generation::from(n)))
            .collect();
        assert_eq!(removed, expected);

        let mut left = profile.populate().unwrap();
        left.sort_ascending();
        assert_eq!(left.iter().map(|g| g.num).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(profile.current().unwrap(), Generation::from(4));
    }

    #[test]
    fn single_generation_is_kept() {
        let (_dir, profile) = fake_profile(&[1], Some(1));
        assert!(remove_old_generations(&profile).unwrap().is_empty());
        assert_eq!(profile.populate().unwrap().len(), 1);
    }

    #[test]
    fn broken_profile_is_an_error() {
        let (_dir, profile) = fake_profile(&[1, 2], None);
        assert!(remove_old_generations(&profile).is_err());
        assert_eq!(profile.populate().unwrap().len(), 2);
    }

    #[test]
    fn dangling_current_removes_nothing() {
        let (_dir, profile) = fake_profile(&[1, 2, 3], None);
        symlink("system-9-link", profile.path()).unwrap();
        assert!(matches!(
            remove_old_generations(&profile),
            Err(Error::CurrentMissing(g)) if g == Generation::from(9)
        ));
        assert_eq!(profile.populate().unwrap().len(), 3);
    }

    #[test]
    fn sweepable_targets() {
        assert!(is_sweepable(Path::new("/home/me/proj/result")));
        assert!(is_sweepable(Path::new("/home/me/proj/result-man")));
        assert!(is_sweepable(Path::new(
            "/home/me/proj/.direnv/flake-profile-1-link"
        )));
        assert!(!is_sweepable(Path::new("/home/me/proj/myresult")));
        assert!(!is_sweepable(Path::new("/home/me/proj/.direnvrc")));
        assert!(!is_sweepable(Path::new("/home/me/proj/out")));
    }

    #[test]
    fn sweep_removes_only_sweepable_targets() {
        let dir = TempDir::new().unwrap();
        let proj = dir.path().join("proj");
        let roots = dir.path().join("roots");
        std::fs::create_dir_all(proj.join(".direnv")).unwrap();
        std::fs::create_dir_all(&roots).unwrap();

        let result = proj.join("result");
        let direnv = proj.join(".direnv/flake-profile-1-link");
        let keep = proj.join("keep-me");
        for (i, target) in [&result, &direnv, &keep].into_iter().enumerate() {
            symlink("/nix/store/fake", target).unwrap();
            symlink(target, roots.join(format!("root-{i}"))).unwrap();
        }

        let roots = Utf8PathBuf::from_path_buf(roots).unwrap();
        let mut removed = sweep_gc_roots(&roots).unwrap();
        removed.sort();
        let mut expected = vec![result.clone(), direnv.clone()];
        expected.sort();
        assert_eq!(removed, expected);
        assert!(result.symlink_metadata().is_err());
        assert!(direnv.symlink_metadata().is_err());
        assert!(keep.symlink_metadata().is_ok());
    }
}
