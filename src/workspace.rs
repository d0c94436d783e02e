//! Disposable per-object workspaces.
//!
//! A workspace is one uniquely-named directory owned by exactly one image
//! object for one generation of its artifacts:
//!
//! ```text
//! <root>/imgbundle-XXXXXX/
//! ├── source/<base name>      # fetched source (link or download)
//! ├── unpacked/               # archive members, or a link to the source
//! ├── logs/                   # <tool>.stdout / <tool>.stderr per invocation
//! └── image.nii.gz ...        # derived artifacts
//! ```
//!
//! [`Workspace::release`] removes the tree and is idempotent. Dropping an
//! unreleased workspace releases it unless it was acquired with
//! `keep = true`. Teardown errors are logged and swallowed so they never
//! mask the caller's result.

use crate::config::WorkspaceConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory holding the fetched source, apart from members and artifacts.
pub const SOURCE_DIR: &str = "source";
/// Directory holding archive members and linked sources.
pub const UNPACKED_DIR: &str = "unpacked";
/// Directory holding captured tool output.
pub const LOGS_DIR: &str = "logs";

#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    keep: bool,
    released: bool,
}

impl Workspace {
    /// Create a fresh workspace directory with its `source/`, `unpacked/`
    /// and `logs/` subdirectories.
    pub fn acquire(config: &WorkspaceConfig) -> io::Result<Self> {
        let parent = match &config.root {
            Some(root) => {
                fs::create_dir_all(root)?;
                root.clone()
            }
            None => std::env::temp_dir(),
        };
        // Ownership of the directory moves to Workspace; TempDir must not delete it.
        let dir = tempfile::Builder::new()
            .prefix(&config.prefix)
            .keep(true)
            .tempdir_in(&parent)?;
        let root = dir.path().to_path_buf();
        drop(dir);

        let workspace = Self {
            root,
            keep: config.keep,
            released: false,
        };
        fs::create_dir(workspace.source_dir())?;
        fs::create_dir(workspace.unpacked_dir())?;
        fs::create_dir(workspace.logs_dir())?;
        info!(workspace = %workspace.root.display(), "acquired workspace");
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.join(SOURCE_DIR)
    }

    /// Where the fetched source lands. Any base name is safe here, including
    /// `logs`, `unpacked` or an artifact name.
    pub fn fetched_path(&self, name: &str) -> PathBuf {
        self.source_dir().join(name)
    }

    pub fn unpacked_dir(&self) -> PathBuf {
        self.root.join(UNPACKED_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    /// Path of a classified member, given its name relative to `unpacked/`.
    pub fn member_path(&self, name: &str) -> PathBuf {
        self.unpacked_dir().join(name)
    }

    /// Path of a file written directly in the workspace root.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Capture files for one tool invocation: `(stdout, stderr)`.
    pub fn log_paths(&self, tool: &str) -> (PathBuf, PathBuf) {
        let logs = self.logs_dir();
        (
            logs.join(format!("{tool}.stdout")),
            logs.join(format!("{tool}.stderr")),
        )
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Recursively remove the workspace. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_dir_all(&self.root) {
            Ok(()) => info!(workspace = %self.root.display(), "released workspace"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(workspace = %self.root.display(), "workspace already gone");
            }
            Err(e) => warn!(
                workspace = %self.root.display(),
                error = %e,
                "failed to remove workspace"
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.keep && !self.released {
            info!(workspace = %self.root.display(), "keeping workspace");
            return;
        }
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(parent: &Path) -> WorkspaceConfig {
        WorkspaceConfig {
            root: Some(parent.to_path_buf()),
            ..WorkspaceConfig::default()
        }
    }

    #[test]
    fn acquire_creates_layout() {
        let parent = TempDir::new().unwrap();
        let ws = Workspace::acquire(&config_in(parent.path())).unwrap();

        assert!(ws.root().starts_with(parent.path()));
        assert!(ws.source_dir().is_dir());
        assert!(ws.unpacked_dir().is_dir());
        assert!(ws.logs_dir().is_dir());
        let name = ws.root().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("imgbundle-"));
    }

    #[test]
    fn acquire_twice_gives_distinct_directories() {
        let parent = TempDir::new().unwrap();
        let a = Workspace::acquire(&config_in(parent.path())).unwrap();
        let b = Workspace::acquire(&config_in(parent.path())).unwrap();
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn release_is_idempotent() {
        let parent = TempDir::new().unwrap();
        let mut ws = Workspace::acquire(&config_in(parent.path())).unwrap();
        let root = ws.root().to_path_buf();
        fs::write(ws.member_path("a.nii"), b"x").unwrap();

        ws.release();
        assert!(!root.exists());
        assert!(ws.is_released());
        ws.release();
        assert!(!root.exists());
    }

    #[test]
    fn release_tolerates_external_removal() {
        let parent = TempDir::new().unwrap();
        let mut ws = Workspace::acquire(&config_in(parent.path())).unwrap();
        fs::remove_dir_all(ws.root()).unwrap();
        ws.release();
        assert!(ws.is_released());
    }

    #[test]
    fn drop_removes_directory() {
        let parent = TempDir::new().unwrap();
        let root = {
            let ws = Workspace::acquire(&config_in(parent.path())).unwrap();
            ws.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[test]
    fn keep_survives_drop_but_not_release() {
        let parent = TempDir::new().unwrap();
        let config = WorkspaceConfig {
            keep: true,
            ..config_in(parent.path())
        };

        let root = {
            let ws = Workspace::acquire(&config).unwrap();
            ws.root().to_path_buf()
        };
        assert!(root.exists());

        let mut ws = Workspace::acquire(&config).unwrap();
        let second = ws.root().to_path_buf();
        ws.release();
        assert!(!second.exists());
    }

    #[test]
    fn log_paths_are_per_tool() {
        let parent = TempDir::new().unwrap();
        let ws = Workspace::acquire(&config_in(parent.path())).unwrap();
        let (out, err) = ws.log_paths("mri_convert");
        assert_eq!(out, ws.logs_dir().join("mri_convert.stdout"));
        assert_eq!(err, ws.logs_dir().join("mri_convert.stderr"));
    }
}
