//! Trial workspaces: isolated directories seeded from a scaffold.
//!
//! A [`TrialWorkspace`] is owned by exactly one trial. It is removed when
//! it goes out of scope unless it was created with
//! [`WorkspacePolicy::Retain`], in which case it is kept for audit and for
//! later re-scoring.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::command::{run_shell, truncate_chars, CommandOutput};
use crate::error::WorkspaceError;

/// Name of a retained workspace directory inside its trial directory.
pub const RETAINED_WORKSPACE_DIR: &str = "workspace";

/// Where a trial workspace lives and what happens to it after scoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspacePolicy {
    /// Fresh temporary directory, removed on teardown.
    Ephemeral,
    /// Directory at the given path, kept after the trial.
    Retain(PathBuf),
}

impl Default for WorkspacePolicy {
    fn default() -> Self {
        Self::Ephemeral
    }
}

enum Location {
    Temp(Option<TempDir>),
    Retained,
}

/// An isolated working directory for one trial.
pub struct TrialWorkspace {
    path: PathBuf,
    location: Location,
}

impl TrialWorkspace {
    /// Provisions a workspace by deep-copying `scaffold`.
    ///
    /// `label` is used as the temporary directory prefix so stray
    /// directories can be traced back to their trial.
    pub fn prepare(
        scaffold: &Path,
        policy: &WorkspacePolicy,
        label: &str,
    ) -> Result<Self, WorkspaceError> {
        if !scaffold.is_dir() {
            return Err(WorkspaceError::ScaffoldMissing(scaffold.to_path_buf()));
        }

        let workspace = match policy {
            WorkspacePolicy::Ephemeral => {
                let dir = tempfile::Builder::new()
                    .prefix(&format!("langbench-{}-", label))
                    .tempdir()?;
                Self {
                    path: dir.path().to_path_buf(),
                    location: Location::Temp(Some(dir)),
                }
            }
            WorkspacePolicy::Retain(path) => {
                if path.exists() {
                    debug!(path = %path.display(), "Clearing previous workspace");
                    fs::remove_dir_all(path)?;
                }
                fs::create_dir_all(path)?;
                Self {
                    path: path.clone(),
                    location: Location::Retained,
                }
            }
        };

        let copied = copy_scaffold(scaffold, &workspace.path)?;
        info!(
            workspace = %workspace.path.display(),
            files = copied,
            "Workspace prepared from {}",
            scaffold.display()
        );
        Ok(workspace)
    }

    /// Path of the workspace directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the workspace is kept after teardown.
    pub fn is_retained(&self) -> bool {
        matches!(self.location, Location::Retained)
    }

    /// Runs the pre-session setup command inside the workspace.
    ///
    /// A non-zero exit or a timeout is an error; the caller must not start
    /// a session on this workspace afterwards.
    pub async fn run_setup(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, WorkspaceError> {
        info!(workspace = %self.path.display(), "Running setup: {}", command);
        let output = run_shell(command, &self.path, None, timeout).await?;
        if !output.success() {
            return Err(WorkspaceError::SetupExit {
                code: output.code(),
                output: truncate_chars(output.diagnostic().trim(), 2000),
            });
        }
        Ok(output)
    }

    /// Removes the workspace (or leaves it in place when retained).
    pub fn teardown(mut self) -> Result<(), WorkspaceError> {
        match &mut self.location {
            Location::Temp(dir) => {
                if let Some(dir) = dir.take() {
                    let path = dir.path().to_path_buf();
                    dir.close()
                        .map_err(|source| WorkspaceError::Teardown { path, source })?;
                }
            }
            Location::Retained => {
                debug!(path = %self.path.display(), "Workspace retained");
            }
        }
        Ok(())
    }
}

impl Drop for TrialWorkspace {
    fn drop(&mut self) {
        if let Location::Temp(dir) = &mut self.location {
            if let Some(dir) = dir.take() {
                let path = dir.path().to_path_buf();
                if let Err(e) = dir.close() {
                    warn!(path = %path.display(), error = %e, "Failed to remove workspace");
                }
            }
        }
    }
}

/// Recursively copies `src` into `dst`, preserving relative structure.
///
/// Symlinks are resolved and their targets copied, so the workspace never
/// writes through into the scaffold. Dangling links and links to an
/// enclosing directory are recreated as links.
///
/// Returns the number of files copied.
pub fn copy_scaffold(src: &Path, dst: &Path) -> Result<usize, WorkspaceError> {
    let copy_failed = |reason: String| WorkspaceError::CopyFailed {
        dest: dst.to_path_buf(),
        reason,
    };

    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| copy_failed(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| copy_failed(e.to_string()))?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| copy_failed(format!("{}: {}", target.display(), e)))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| copy_failed(format!("{}: {}", parent.display(), e)))?;
        }
        if entry.file_type().is_symlink() {
            copied += copy_link(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)
                .map_err(|e| copy_failed(format!("{}: {}", entry.path().display(), e)))?;
            copied += 1;
        }
    }
    Ok(copied)
}

fn copy_link(link: &Path, target: &Path) -> Result<usize, WorkspaceError> {
    let copy_failed = |e: std::io::Error| WorkspaceError::CopyFailed {
        dest: target.to_path_buf(),
        reason: format!("{}: {}", link.display(), e),
    };

    match fs::canonicalize(link) {
        Ok(real) if real.is_file() => {
            fs::copy(&real, target).map_err(copy_failed)?;
            Ok(1)
        }
        Ok(real) if real.is_dir() && !encloses(&real, link) => copy_scaffold(&real, target),
        _ => {
            let points_to = fs::read_link(link).map_err(copy_failed)?;
            debug!(link = %link.display(), target = %points_to.display(), "Recreating symlink");
            #[cfg(unix)]
            std::os::unix::fs::symlink(&points_to, target).map_err(copy_failed)?;
            #[cfg(not(unix))]
            warn!(link = %link.display(), "Skipping symlink");
            Ok(0)
        }
    }
}

/// True when `dir` contains `link` itself; following it would never end.
fn encloses(dir: &Path, link: &Path) -> bool {
    link.parent()
        .and_then(|parent| fs::canonicalize(parent).ok())
        .map_or(false, |parent| parent.starts_with(dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::command::COMMAND_TIMEOUT;

    fn scaffold() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("run.sh"), "echo hi").unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("src/nested/lib.txt"), "lib").unwrap();
        dir
    }

    #[test]
    fn test_prepare_copies_tree() {
        let src = scaffold();
        let ws = TrialWorkspace::prepare(src.path(), &WorkspacePolicy::Ephemeral, "t").unwrap();
        assert!(ws.path().join("run.sh").is_file());
        assert_eq!(
            fs::read_to_string(ws.path().join("src/nested/lib.txt")).unwrap(),
            "lib"
        );
        assert!(!ws.is_retained());
    }

    #[test]
    fn test_teardown_removes_ephemeral() {
        let src = scaffold();
        let ws = TrialWorkspace::prepare(src.path(), &WorkspacePolicy::Ephemeral, "t").unwrap();
        let path = ws.path().to_path_buf();
        ws.teardown().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_ephemeral() {
        let src = scaffold();
        let path = {
            let ws =
                TrialWorkspace::prepare(src.path(), &WorkspacePolicy::Ephemeral, "t").unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_retained_workspace_survives_and_is_reusable() {
        let src = scaffold();
        let out = TempDir::new().unwrap();
        let target = out.path().join("workspace");
        let policy = WorkspacePolicy::Retain(target.clone());

        let ws = TrialWorkspace::prepare(src.path(), &policy, "t").unwrap();
        fs::write(ws.path().join("agent.txt"), "written by agent").unwrap();
        ws.teardown().unwrap();
        assert!(target.join("agent.txt").exists());

        // Reuse starts from a clean copy.
        let ws = TrialWorkspace::prepare(src.path(), &policy, "t").unwrap();
        assert!(!ws.path().join("agent.txt").exists());
        assert!(ws.path().join("run.sh").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_resolves_directory_symlinks() {
        use std::os::unix::fs::symlink;

        let src = scaffold();
        symlink("src/nested", src.path().join("lib")).unwrap();
        symlink("run.sh", src.path().join("main.sh")).unwrap();
        symlink("missing.txt", src.path().join("dangling")).unwrap();
        symlink(".", src.path().join("src/self")).unwrap();

        let ws = TrialWorkspace::prepare(src.path(), &WorkspacePolicy::Ephemeral, "t").unwrap();
        let lib = ws.path().join("lib");
        assert!(!fs::symlink_metadata(&lib).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(lib.join("lib.txt")).unwrap(), "lib");
        assert_eq!(fs::read_to_string(ws.path().join("main.sh")).unwrap(), "echo hi");
        assert!(fs::symlink_metadata(ws.path().join("dangling"))
            .unwrap()
            .file_type()
            .is_symlink());
        assert!(fs::symlink_metadata(ws.path().join("src/self"))
            .unwrap()
            .file_type()
            .is_symlink());

        // Edits in the workspace stay out of the scaffold.
        fs::write(lib.join("lib.txt"), "changed").unwrap();
        assert_eq!(
            fs::read_to_string(src.path().join("src/nested/lib.txt")).unwrap(),
            "lib"
        );
    }

    #[test]
    fn test_missing_scaffold() {
        let err = TrialWorkspace::prepare(
            Path::new("/definitely/not/here"),
            &WorkspacePolicy::Ephemeral,
            "t",
        )
        .err()
        .unwrap();
        assert!(matches!(err, WorkspaceError::ScaffoldMissing(_)));
    }

    #[tokio::test]
    async fn test_setup_failure_is_error() {
        let src = scaffold();
        let ws = TrialWorkspace::prepare(src.path(), &WorkspacePolicy::Ephemeral, "t").unwrap();
        let err = ws
            .run_setup("echo broken >&2; exit 1", COMMAND_TIMEOUT)
            .await
            .unwrap_err();
        match err {
            WorkspaceError::SetupExit { code, output } => {
                assert_eq!(code, 1);
                assert_eq!(output, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_setup_timeout_is_error() {
        let src = scaffold();
        let ws = TrialWorkspace::prepare(src.path(), &WorkspacePolicy::Ephemeral, "t").unwrap();
        let err = ws
            .run_setup("sleep 5", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::SetupCommand(_)));
    }
}
