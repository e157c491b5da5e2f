use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

/// Directory holding the system profile and its `system-N-link` generations
pub const SYSTEM_PROFILES: &str = "/nix/var/nix/profiles";
/// Per-user profile directory, relative to `$HOME`
pub const USER_PROFILES: &str = ".local/state/nix/profiles";
pub const GCROOTS_AUTO: &str = "/nix/var/nix/gcroots/auto";
/// Baseline for diffs before a fresh activation
pub const CURRENT_SYSTEM: &str = "/run/current-system";

/// Reads the first line of a file. Useful for files such as `<out>/nixos-version`
///
/// # Errors
///
/// This function will return a file-open or `read_line` error
pub fn read_fst_line(file_path: &Path) -> io::Result<String> {
    let mut reader = io::BufReader::new(File::open(file_path)?);
    let mut line_buf = String::new();
    reader.read_line(&mut line_buf)?;
    Ok(line_buf)
}
