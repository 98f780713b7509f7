//! Per-task scratch copies of a repository.
//!
//! Indexing a revision needs a working tree checked out at that revision,
//! but every revision of a repository shares one clone. A [`Workspace`] is a
//! private copy of that clone in a fresh temporary directory, owned by a
//! single index task. Copying and removal run on the blocking pool since a
//! workspace holds a full repository. [`Workspace::release`] removes it and
//! waits; a workspace dropped without release (a cancelled task) is removed
//! in the background.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::error::{PipelineError, Result};

/// Name prefix of every workspace directory (the janitor keys on it).
pub const WORKSPACE_PREFIX: &str = "ws-";

#[derive(Debug)]
pub struct Workspace {
    /// `None` only after release.
    dir: Option<TempDir>,
    checkout: PathBuf,
}

impl Workspace {
    /// Copy the clone at `source` into a new uniquely named directory under
    /// `parent`. The copy lands at `<tempdir>/<name>`.
    pub async fn acquire(parent: &Path, source: &Path, name: &str) -> Result<Self> {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            PipelineError::io(format!("creating workspace parent {}", parent.display()), e)
        })?;

        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(parent)
            .map_err(|e| PipelineError::io(format!("creating workspace in {}", parent.display()), e))?;
        let checkout = dir.path().join(name);

        // A failed copy drops `dir` on the blocking thread, removing the
        // partial tree there.
        let src = source.to_path_buf();
        let dst = checkout.clone();
        let dir = tokio::task::spawn_blocking(move || copy_tree(&src, &dst).map(|_| dir)).await??;

        tracing::debug!(workspace = %dir.path().display(), "workspace ready");
        Ok(Self {
            dir: Some(dir),
            checkout,
        })
    }

    /// The working tree inside the workspace.
    pub fn path(&self) -> &Path {
        &self.checkout
    }

    /// The temporary directory that holds the working tree.
    pub fn root(&self) -> &Path {
        self.checkout.parent().unwrap_or(&self.checkout)
    }

    /// Remove the workspace and wait for it to be gone.
    pub async fn release(mut self) -> Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        let root = dir.path().to_path_buf();
        tokio::task::spawn_blocking(move || dir.close())
            .await?
            .map_err(|e| PipelineError::io(format!("removing workspace {}", root.display()), e))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || drop(dir));
            }
            Err(_) => drop(dir),
        }
    }
}

/// Recursively copy `src` to `dst`, preserving symlinks on unix.
fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| PipelineError::io(format!("creating {}", target.display()), e))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| {
                PipelineError::io(format!("copying {}", entry.path().display()), e)
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    let pointee = fs::read_link(link)
        .map_err(|e| PipelineError::io(format!("reading link {}", link.display()), e))?;
    std::os::unix::fs::symlink(&pointee, target)
        .map_err(|e| PipelineError::io(format!("linking {}", target.display()), e))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    fs::copy(link, target)
        .map(|_| ())
        .map_err(|e| PipelineError::io(format!("copying {}", link.display()), e))
}
