//! Install resolver: locate tool executables without trusting ambient `PATH`.
//!
//! Lookup order:
//!   1. The private runtime prefix (`<root>/venv/bin`)
//!   2. Well-known system locations (Homebrew, `~/.local/bin`, `/usr/bin`, ...)
//!   3. A `which` lookup on `PATH`
//!
//! A miss is `None`, never an error; the caller decides whether the tool is
//! required.

use std::path::{Path, PathBuf};

use super::layout::{executable_name, RuntimeLayout};

/// Resolves logical tool names to executable paths.
#[derive(Debug, Clone)]
pub struct InstallResolver {
    prefix_bin: PathBuf,
    system_dirs: Vec<PathBuf>,
    path_lookup: bool,
}

impl InstallResolver {
    /// Resolver for a layout using the platform's well-known locations.
    pub fn new(layout: &RuntimeLayout) -> Self {
        Self {
            prefix_bin: layout.venv_bin(),
            system_dirs: well_known_dirs(),
            path_lookup: true,
        }
    }

    /// Replace the well-known system locations.
    pub fn with_system_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.system_dirs = dirs;
        self
    }

    /// Enable or disable the trailing `PATH` lookup.
    pub fn with_path_lookup(mut self, enabled: bool) -> Self {
        self.path_lookup = enabled;
        self
    }

    /// Resolve a tool, checking the private prefix first.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let found = candidate_in(&self.prefix_bin, name).or_else(|| self.resolve_system(name));
        match &found {
            Some(path) => tracing::debug!(tool = name, path = %path.display(), "resolved tool"),
            None => tracing::debug!(tool = name, "tool not found"),
        }
        found
    }

    /// Resolve a tool outside the private prefix.
    pub fn resolve_system(&self, name: &str) -> Option<PathBuf> {
        for dir in &self.system_dirs {
            if let Some(path) = candidate_in(dir, name) {
                return Some(path);
            }
        }
        if self.path_lookup {
            return which::which(name).ok().filter(|p| is_executable(p));
        }
        None
    }

    /// Return the first of `names` that resolves, with the matching name.
    pub fn resolve_first<'a>(&self, names: &[&'a str]) -> Option<(&'a str, PathBuf)> {
        names
            .iter()
            .find_map(|name| self.resolve(name).map(|path| (*name, path)))
    }
}

fn candidate_in(dir: &Path, name: &str) -> Option<PathBuf> {
    let path = dir.join(executable_name(name));
    is_executable(&path).then_some(path)
}

/// True if `path` is a regular file the current user may execute.
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Locations checked before `PATH`, most specific first.
fn well_known_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/opt/homebrew/bin"),
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/home/linuxbrew/.linuxbrew/bin"),
    ];
    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join(".local/bin"));
        dirs.push(home.join(".cargo/bin"));
    }
    dirs.push(PathBuf::from("/usr/bin"));
    dirs.push(PathBuf::from("/bin"));
    dirs
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn touch(path: &Path, mode: u32) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    fn isolated(tmp: &TempDir) -> (RuntimeLayout, PathBuf, InstallResolver) {
        let layout = RuntimeLayout::at(tmp.path().join("root"));
        let sys = tmp.path().join("sysbin");
        std::fs::create_dir_all(&sys).unwrap();
        let resolver = InstallResolver::new(&layout)
            .with_system_dirs(vec![sys.clone()])
            .with_path_lookup(false);
        (layout, sys, resolver)
    }

    #[test]
    fn test_prefix_wins_over_system() {
        let tmp = TempDir::new().unwrap();
        let (layout, sys, resolver) = isolated(&tmp);
        touch(&sys.join("tool"), 0o755);
        touch(&layout.venv_executable("tool"), 0o755);
        assert_eq!(resolver.resolve("tool"), Some(layout.venv_executable("tool")));
        assert_eq!(resolver.resolve_system("tool"), Some(sys.join("tool")));
    }

    #[test]
    fn test_missing_tool_is_none() {
        let tmp = TempDir::new().unwrap();
        let (_, _, resolver) = isolated(&tmp);
        assert!(resolver.resolve("definitely-not-installed").is_none());
    }

    #[test]
    fn test_non_executable_file_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let (_, sys, resolver) = isolated(&tmp);
        touch(&sys.join("plain"), 0o644);
        assert!(resolver.resolve("plain").is_none());
    }

    #[test]
    fn test_resolve_first_follows_candidate_order() {
        let tmp = TempDir::new().unwrap();
        let (_, sys, resolver) = isolated(&tmp);
        touch(&sys.join("whisper"), 0o755);
        touch(&sys.join("whisper-cpp"), 0o755);
        let (name, path) = resolver
            .resolve_first(&["whisper-cli", "whisper-cpp", "whisper"])
            .unwrap();
        assert_eq!(name, "whisper-cpp");
        assert_eq!(path, sys.join("whisper-cpp"));
    }
}
