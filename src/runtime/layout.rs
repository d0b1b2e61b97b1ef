//! Filesystem layout of the private runtime root.
//!
//! Every path the supervisor touches is a deterministic child of one root
//! directory. The tree is created lazily via [`RuntimeLayout::ensure`] and is
//! never deleted by this crate.
//!
//! ```text
//! <root>/
//!   config.yaml
//!   bootstrap-state.json
//!   venv/            private interpreter prefix
//!   models/          downloaded weights
//!   adapters/        training artifacts
//!   datasets/        scaffolded training data
//!   logs/
//! ```

use std::path::{Path, PathBuf};

use super::errors::LayoutError;

/// Env var that overrides the runtime root.
pub const ROOT_ENV_VAR: &str = "LOCALFORGE_HOME";

/// Return the platform-specific venv binary subdirectory name.
pub fn venv_bin_dir() -> &'static str {
    if cfg!(target_os = "windows") {
        "Scripts"
    } else {
        "bin"
    }
}

/// Append the platform executable suffix to a bare tool name.
pub fn executable_name(name: &str) -> String {
    if cfg!(target_os = "windows") && !name.ends_with(".exe") {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Resolved paths for one runtime root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    root: PathBuf,
}

impl RuntimeLayout {
    /// Build a layout anchored at an explicit root.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the default runtime root.
    ///
    /// 1. `LOCALFORGE_HOME` if set and non-empty.
    /// 2. Platform data dir (`~/Library/Application Support`, `$XDG_DATA_HOME`, ...) + `localforge`.
    /// 3. `~/.localforge`.
    pub fn resolve() -> Result<Self, LayoutError> {
        if let Ok(custom) = std::env::var(ROOT_ENV_VAR) {
            if !custom.trim().is_empty() {
                return Ok(Self::at(custom));
            }
        }
        if let Some(dir) = dirs::data_dir() {
            return Ok(Self::at(dir.join("localforge")));
        }
        dirs::home_dir()
            .map(|home| Self::at(home.join(".localforge")))
            .ok_or_else(|| LayoutError::Unresolvable {
                reason: "neither a data directory nor a home directory is available".into(),
            })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("bootstrap-state.json")
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.root.join("venv")
    }

    /// Directory holding the private environment's entry points.
    pub fn venv_bin(&self) -> PathBuf {
        self.venv_dir().join(venv_bin_dir())
    }

    /// Path of a named entry point inside the private environment.
    pub fn venv_executable(&self, name: &str) -> PathBuf {
        self.venv_bin().join(executable_name(name))
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    /// Root of the training artifact store.
    pub fn adapters_dir(&self) -> PathBuf {
        self.root.join("adapters")
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.root.join("datasets")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create the directory tree. Safe to call repeatedly.
    ///
    /// The venv directory itself is left to the bootstrapper, since its
    /// absence is how a missing environment is detected.
    pub fn ensure(&self) -> Result<(), LayoutError> {
        for dir in [
            self.root.clone(),
            self.models_dir(),
            self.adapters_dir(),
            self.datasets_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .map_err(|source| LayoutError::CreateDir { path: dir.clone(), source })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_children_are_under_root() {
        let layout = RuntimeLayout::at("/opt/forge");
        for path in [
            layout.config_file(),
            layout.state_file(),
            layout.venv_bin(),
            layout.models_dir(),
            layout.adapters_dir(),
            layout.datasets_dir(),
            layout.logs_dir(),
        ] {
            assert!(path.starts_with("/opt/forge"), "{} escaped root", path.display());
        }
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let layout = RuntimeLayout::at(tmp.path().join("root"));
        layout.ensure().unwrap();
        layout.ensure().unwrap();
        assert!(layout.adapters_dir().is_dir());
        assert!(layout.models_dir().is_dir());
        assert!(!layout.venv_dir().exists());
    }

    #[test]
    fn test_ensure_reports_path_on_failure() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let layout = RuntimeLayout::at(blocker.join("root"));
        let err = layout.ensure().unwrap_err();
        assert!(err.to_string().contains("root"));
    }

    #[test]
    fn test_venv_executable_platform_suffix() {
        let layout = RuntimeLayout::at("/r");
        let pip = layout.venv_executable("pip");
        if cfg!(target_os = "windows") {
            assert!(pip.ends_with("Scripts/pip.exe"));
        } else {
            assert_eq!(pip, PathBuf::from("/r/venv/bin/pip"));
        }
    }
}
