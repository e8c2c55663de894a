//! Discovery of gpg-related binaries and the agent socket.
//!
//! Lookup order is the `PATH` variable first, then the handful of prefixes
//! gpg installers actually use. Everything here returns `Option`; a missing
//! binary is an ordinary condition the caller turns into its own error.

use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

const STANDARD_DIRS: &[&str] = &[
    "/usr/local/bin",
    "/usr/local/MacGPG2/bin",
    "/usr/bin",
    "/bin",
    "/opt/homebrew/bin",
    "/opt/local/bin",
    "/opt/gnupg/bin",
];

fn is_executable_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Searches an explicit list of directories for an executable `name`.
pub fn find_executable_at<I, P>(name: &str, dirs: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    for dir in dirs {
        let candidate = dir.as_ref().join(name);
        if is_executable_file(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Searches `PATH` and then the standard install prefixes for `name`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    if let Some(path_var) = env::var_os("PATH")
        && let Some(found) = find_executable_at(name, env::split_paths(&path_var))
    {
        return Some(found);
    }
    find_executable_at(name, STANDARD_DIRS.iter().map(Path::new))
}

/// The gpg binary to run when none is configured: `gpg2` wins over `gpg`
/// when both are installed.
pub fn default_gpg_path() -> Option<PathBuf> {
    let found = find_executable("gpg2").or_else(|| find_executable("gpg"));
    match &found {
        Some(path) => debug!(path = %path.display(), "resolved gpg binary"),
        None => debug!("no gpg binary found on PATH or standard prefixes"),
    }
    found
}

fn gnupg_home() -> Option<PathBuf> {
    if let Some(home) = env::var_os("GNUPGHOME") {
        return Some(PathBuf::from(home));
    }
    env::var_os("HOME").map(|home| PathBuf::from(home).join(".gnupg"))
}

/// Path of the gpg-agent socket, if one exists in the active home
/// directory.
pub fn agent_socket() -> Option<PathBuf> {
    let socket = gnupg_home()?.join("S.gpg-agent");
    socket.exists().then_some(socket)
}

/// The pinentry binary the agent would use: the `pinentry-program` line of
/// `gpg-agent.conf` when present, otherwise the first pinentry flavour on
/// the search path.
pub fn pinentry_path() -> Option<PathBuf> {
    if let Some(home) = gnupg_home()
        && let Ok(conf) = fs::read_to_string(home.join("gpg-agent.conf"))
    {
        for line in conf.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("pinentry-program") {
                let path = PathBuf::from(rest.trim());
                if is_executable_file(&path) {
                    return Some(path);
                }
            }
        }
    }
    ["pinentry-mac", "pinentry-gnome3", "pinentry-curses", "pinentry"]
        .iter()
        .find_map(|name| find_executable(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn finds_sh_on_standard_paths() {
        let path = find_executable("sh").unwrap();
        assert!(path.ends_with("sh"));
        assert!(is_executable_file(&path));
    }

    #[test]
    fn missing_binary_resolves_to_none() {
        assert_eq!(find_executable("definitely-not-a-real-binary-0x42"), None);
    }

    #[test]
    fn explicit_dirs_respect_the_executable_bit() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fakebin");
        let mut file = fs::File::create(&script).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        drop(file);

        // Not executable yet.
        assert_eq!(find_executable_at("fakebin", [dir.path()]), None);

        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(find_executable_at("fakebin", [dir.path()]), Some(script));
    }
}
