//! Kernel-enforced denial of shell re-spawning
//!
//! The sandbox is an execute allowlist: every file on `PATH` except the
//! shell interpreters, plus the configured library directories (the dynamic
//! loader is exec-checked too). Read, write and network access are not
//! restricted.
//!
//! Two Landlock layers stack. The trampoline applies the first, which also
//! allows the runner so it can be exec'd at all. The preload library applies
//! the second from inside the runner before its `main`, without the runner,
//! so nothing the runner starts can exec it again.
//!
//! Once applied, a layer holds for the calling process and every descendant
//! and cannot be lifted. It must only be applied in a process that is about
//! to become the runner, never in the interactive front end.

#[cfg(target_os = "linux")]
mod linux;

use crate::error::Result;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Base names of interpreters that must never be exec'd under the sandbox
pub const DENIED_SHELLS: &[&str] = &[
    "bash", "sh", "dash", "zsh", "ksh", "ksh93", "mksh", "pdksh", "oksh", "yash", "fish", "csh",
    "tcsh", "ash", "busybox", "rbash", "posh", "elvish", "nu", "xonsh", "screen", "tmux",
];

/// Absolute locations checked even when they are not on `PATH`
pub const DENIED_SHELL_PATHS: &[&str] = &[
    "/bin/sh",
    "/bin/bash",
    "/bin/dash",
    "/bin/zsh",
    "/bin/ksh",
    "/bin/csh",
    "/bin/tcsh",
    "/bin/fish",
    "/bin/busybox",
    "/usr/bin/sh",
    "/usr/bin/bash",
    "/usr/bin/dash",
    "/usr/bin/zsh",
    "/usr/bin/ksh",
    "/usr/bin/csh",
    "/usr/bin/tcsh",
    "/usr/bin/fish",
    "/usr/bin/busybox",
    "/usr/local/bin/bash",
    "/usr/local/bin/zsh",
    "/usr/local/bin/fish",
];

/// Prefix reserved for variables the sandbox layers hand to each other
pub const INTERNAL_VAR_PREFIX: &str = "__AEGISH_";
/// Set by the preload layer once its ruleset is in place
pub const LAYER_MARKER_VAR: &str = "__AEGISH_LAYER";
/// Value of [`LAYER_MARKER_VAR`] after the second layer
pub const LAYER_MARKER: &str = "2";
/// Library directories passed from the trampoline to the preload layer
pub const LIBRARY_DIRS_VAR: &str = "__AEGISH_LIBRARY_DIRS";

/// Information about sandbox support on this platform
#[derive(Debug, Clone)]
pub struct SupportInfo {
    pub is_supported: bool,
    pub platform: &'static str,
    pub details: String,
}

/// Whether a sandbox was actually put in place
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxStatus {
    Enforced,
    /// The kernel lacks the capability; the command runs unenforced
    Unavailable(String),
}

/// Files and directories allowed to be exec'd
#[derive(Debug, Clone, Default)]
pub struct ExecAllowlist {
    files: BTreeSet<PathBuf>,
    dirs: BTreeSet<PathBuf>,
}

impl ExecAllowlist {
    /// Build the allowlist from a `PATH` value, library directories and the
    /// runner. Missing entries are skipped.
    pub fn build(path_var: &str, library_dirs: &[PathBuf], runner: &Path) -> Self {
        let mut list = Self::scan(path_var, library_dirs);
        // The runner is the one shell left executable
        match runner.canonicalize() {
            Ok(resolved) => {
                list.files.insert(resolved);
            }
            Err(e) => warn!("Runner {} not resolvable: {e}", runner.display()),
        }
        list
    }

    /// The allowlist for what the runner starts: the runner is left out even
    /// when it sits in a `PATH` directory under a name that is not a shell.
    pub fn build_without_runner(path_var: &str, library_dirs: &[PathBuf], runner: &Path) -> Self {
        let mut list = Self::scan(path_var, library_dirs);
        if let Ok(resolved) = runner.canonicalize() {
            if list.files.remove(&resolved) {
                debug!("exec denied: runner {}", resolved.display());
            }
            if list.dirs.iter().any(|d| resolved.starts_with(d)) {
                warn!(
                    "Runner {} is inside a library directory and stays executable",
                    resolved.display()
                );
            }
        }
        list
    }

    fn scan(path_var: &str, library_dirs: &[PathBuf]) -> Self {
        let denied = denied_targets();
        let mut list = Self::default();

        for dir in std::env::split_paths(path_var) {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Ok(resolved) = path.canonicalize() else {
                    continue;
                };
                if !resolved.is_file() {
                    continue;
                }
                if is_denied_shell(&path) || is_denied_shell(&resolved) || denied.contains(&resolved)
                {
                    debug!("exec denied: {}", path.display());
                    continue;
                }
                list.files.insert(resolved);
            }
        }

        for dir in library_dirs {
            if let Ok(resolved) = dir.canonicalize() {
                if resolved.is_dir() {
                    list.dirs.insert(resolved);
                }
            }
        }
        list
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(PathBuf::as_path)
    }

    pub fn dirs(&self) -> impl Iterator<Item = &Path> {
        self.dirs.iter().map(PathBuf::as_path)
    }

    pub fn allows(&self, path: &Path) -> bool {
        let Ok(resolved) = path.canonicalize() else {
            return false;
        };
        self.files.contains(&resolved) || self.dirs.iter().any(|d| resolved.starts_with(d))
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether the file name of `path` is a known shell interpreter
pub fn is_denied_shell(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| DENIED_SHELLS.contains(&name))
}

/// Canonical targets of the fixed shell paths present on this system
fn denied_targets() -> BTreeSet<PathBuf> {
    DENIED_SHELL_PATHS
        .iter()
        .filter_map(|p| Path::new(p).canonicalize().ok())
        .collect()
}

/// Apply the execute allowlist to the current process.
///
/// Irreversible. When the kernel lacks the capability this logs a warning
/// and returns [`SandboxStatus::Unavailable`] instead of failing.
pub fn apply(allowlist: &ExecAllowlist) -> Result<SandboxStatus> {
    #[cfg(target_os = "linux")]
    {
        if !linux::is_supported() {
            let info = linux::support_info();
            warn!("{}; commands run without exec denial", info.details);
            return Ok(SandboxStatus::Unavailable(info.details));
        }
        linux::apply(allowlist)
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = allowlist;
        let details =
            crate::error::AegishError::UnsupportedPlatform(std::env::consts::OS.to_string())
                .to_string();
        warn!("{details}; commands run without exec denial");
        Ok(SandboxStatus::Unavailable(details))
    }
}

/// Stack the second layer from inside the runner.
///
/// Meant for the preload library's constructor, which runs before the
/// runner's `main`. `PATH` and [`LIBRARY_DIRS_VAR`] come from the
/// environment and the current executable is left out. Afterwards
/// [`LAYER_MARKER_VAR`] is set and `LD_PRELOAD` and [`LIBRARY_DIRS_VAR`] are
/// removed, so programs the runner starts do not load the library again.
pub fn apply_runner_layer() -> Result<SandboxStatus> {
    let runner = std::env::current_exe()?;
    let path_var = std::env::var("PATH").unwrap_or_default();
    let library_dirs: Vec<PathBuf> = std::env::var_os(LIBRARY_DIRS_VAR)
        .map(|dirs| std::env::split_paths(&dirs).collect())
        .unwrap_or_default();
    let allowlist = ExecAllowlist::build_without_runner(&path_var, &library_dirs, &runner);
    let status = apply(&allowlist)?;

    std::env::remove_var("LD_PRELOAD");
    std::env::remove_var(LIBRARY_DIRS_VAR);
    std::env::set_var(LAYER_MARKER_VAR, LAYER_MARKER);
    Ok(status)
}

/// Check if sandboxing is supported on this platform
pub fn is_supported() -> bool {
    #[cfg(target_os = "linux")]
    {
        linux::is_supported()
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Get information about sandbox support on this platform
pub fn support_info() -> SupportInfo {
    #[cfg(target_os = "linux")]
    {
        linux::support_info()
    }

    #[cfg(not(target_os = "linux"))]
    {
        SupportInfo {
            is_supported: false,
            platform: std::env::consts::OS,
            details: format!("Platform '{}' is not supported", std::env::consts::OS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::{symlink, PermissionsExt};
    use tempfile::tempdir;

    fn executable(path: &Path) {
        fs::write(path, "#!/bin/true\n").unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_denied_shell_names() {
        assert!(is_denied_shell(Path::new("/usr/bin/bash")));
        assert!(is_denied_shell(Path::new("/opt/x/zsh")));
        assert!(!is_denied_shell(Path::new("/usr/bin/bashful")));
        assert!(!is_denied_shell(Path::new("/usr/bin/ls")));
    }

    #[test]
    fn test_allowlist_skips_shells_and_symlinks_to_them() {
        let dir = tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir(&bin).unwrap();
        executable(&bin.join("ls"));
        executable(&bin.join("dash"));
        symlink(bin.join("dash"), bin.join("innocent")).unwrap();
        let runner = dir.path().join("runner");
        executable(&runner);

        let list = ExecAllowlist::build(bin.to_str().unwrap(), &[], &runner);
        assert!(list.allows(&bin.join("ls")));
        assert!(!list.allows(&bin.join("dash")));
        assert!(!list.allows(&bin.join("innocent")));
        assert!(list.allows(&runner));
    }

    #[test]
    fn test_runner_left_out_of_second_layer() {
        let dir = tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir(&bin).unwrap();
        executable(&bin.join("ls"));
        executable(&bin.join("runner"));
        symlink(bin.join("runner"), bin.join("alias")).unwrap();

        let outer = ExecAllowlist::build(bin.to_str().unwrap(), &[], &bin.join("runner"));
        assert!(outer.allows(&bin.join("runner")));

        let inner =
            ExecAllowlist::build_without_runner(bin.to_str().unwrap(), &[], &bin.join("runner"));
        assert!(inner.allows(&bin.join("ls")));
        assert!(!inner.allows(&bin.join("runner")));
        assert!(!inner.allows(&bin.join("alias")));
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn test_library_dirs_allow_everything_below() {
        let dir = tempdir().unwrap();
        let lib = dir.path().join("lib");
        fs::create_dir(&lib).unwrap();
        executable(&lib.join("ld.so"));
        let list = ExecAllowlist::build("", &[lib.clone()], Path::new("/nonexistent/runner"));
        assert!(list.allows(&lib.join("ld.so")));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_missing_path_entries_ignored() {
        let list = ExecAllowlist::build("/nonexistent-a:/nonexistent-b", &[], Path::new("/nonexistent"));
        assert!(list.is_empty());
    }

    #[test]
    fn test_support_info_is_consistent() {
        let info = support_info();
        assert_eq!(info.is_supported, is_supported());
        assert!(!info.details.is_empty());
    }
}
