// External tools we lean on: mpv plays, yt-dlp (or youtube-dl) turns watch URLs into streams
// Just a PATH lookup, nothing gets executed

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const EXTRACTORS: &[&str] = &["yt-dlp", "youtube-dl"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyReport {
    pub mpv: Option<PathBuf>,
    /// (name, location) of the first extractor found
    pub extractor: Option<(String, PathBuf)>,
}

impl DependencyReport {
    pub fn all_present(&self) -> bool {
        self.mpv.is_some() && self.extractor.is_some()
    }

    /// What to install and how, for whatever is missing
    pub fn install_instructions(&self) -> String {
        if self.all_present() {
            return "All dependencies are installed!".to_string();
        }

        let mut out = String::from("\n⚠️  Missing Dependencies:\n\n");

        if self.mpv.is_none() {
            out.push_str("❌ MPV media player not found\n");
            if cfg!(target_os = "macos") {
                out.push_str("   Install: brew install mpv\n\n");
            } else if cfg!(windows) {
                out.push_str("   Install: choco install mpv\n");
                out.push_str("   Or download: https://mpv.io/installation/\n\n");
            } else {
                out.push_str("   Install: sudo apt install mpv (Debian/Ubuntu)\n");
                out.push_str("           sudo dnf install mpv (Fedora)\n\n");
            }
        }

        if self.extractor.is_none() {
            out.push_str("❌ yt-dlp/youtube-dl not found (required for YouTube streaming)\n");
            if cfg!(target_os = "macos") {
                out.push_str("   Install: brew install yt-dlp\n   Or: pip install yt-dlp\n\n");
            } else if cfg!(windows) {
                out.push_str("   Install: choco install yt-dlp\n   Or: pip install yt-dlp\n\n");
            } else {
                out.push_str("   Install: pip install yt-dlp\n");
                out.push_str("   Or: sudo apt install yt-dlp (Debian/Ubuntu)\n\n");
            }
        }

        out
    }
}

/// Look for mpv and an extractor on the current PATH
pub fn check() -> DependencyReport {
    let path = std::env::var_os("PATH").unwrap_or_default();
    check_in(&path)
}

pub fn check_in(path_var: &OsStr) -> DependencyReport {
    let mpv = find_in_path("mpv", path_var);
    match &mpv {
        Some(p) => debug!("Found mpv at {}", p.display()),
        None => warn!("mpv not found in PATH"),
    }

    let extractor = EXTRACTORS
        .iter()
        .find_map(|name| find_in_path(name, path_var).map(|p| (name.to_string(), p)));
    match &extractor {
        Some((name, p)) => debug!("Found {} at {}", name, p.display()),
        None => warn!("Neither yt-dlp nor youtube-dl found in PATH"),
    }

    DependencyReport { mpv, extractor }
}

pub fn find_in_path(program: &str, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .flat_map(|dir| candidates(&dir, program))
        .find(|p| is_executable(p))
}

fn candidates(dir: &Path, program: &str) -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![dir.join(format!("{program}.exe")), dir.join(program)]
    } else {
        vec![dir.join(program)]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn tool(dir: &Path, name: &str, mode: u32) {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    fn test_finds_tools_across_dirs() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        tool(a.path(), "mpv", 0o755);
        tool(b.path(), "youtube-dl", 0o755);

        let path = std::env::join_paths([a.path(), b.path()]).unwrap();
        let report = check_in(&path);

        assert_eq!(report.mpv, Some(a.path().join("mpv")));
        assert_eq!(report.extractor.as_ref().map(|(n, _)| n.as_str()), Some("youtube-dl"));
        assert!(report.all_present());
        assert_eq!(report.install_instructions(), "All dependencies are installed!");
    }

    #[test]
    fn test_prefers_yt_dlp() {
        let dir = tempfile::tempdir().unwrap();
        tool(dir.path(), "youtube-dl", 0o755);
        tool(dir.path(), "yt-dlp", 0o755);

        let report = check_in(dir.path().as_os_str());
        assert_eq!(report.extractor.unwrap().0, "yt-dlp");
    }

    #[test]
    fn test_non_executable_ignored() {
        let dir = tempfile::tempdir().unwrap();
        tool(dir.path(), "mpv", 0o644);

        let report = check_in(dir.path().as_os_str());
        assert!(report.mpv.is_none());
        assert!(!report.all_present());

        let help = report.install_instructions();
        assert!(help.contains("MPV media player not found"));
        assert!(help.contains("yt-dlp/youtube-dl not found"));
    }
}
