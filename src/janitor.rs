//! Periodic cleanup of leftovers from interrupted runs.
//!
//! Workspaces and partial artifacts are removed by the task that created
//! them, but a killed process leaves them behind. The janitor sweeps:
//!
//! - `ws-*` directories under `paths.workspace_dir`
//! - `.*.dump.tmp-*` files under `paths.indexes_dir`
//!
//! Only entries older than `janitor.max_age` are touched, so a sweep running
//! next to a live pipeline leaves that pipeline's fresh entries alone.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::pipeline::PARTIAL_ARTIFACT_MARKER;
use crate::workspace::WORKSPACE_PREFIX;

#[derive(Debug, Clone)]
pub struct Janitor {
    workspace_dir: PathBuf,
    indexes_dir: PathBuf,
    max_age: Duration,
}

/// What one sweep removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Sweep {
    pub workspaces: usize,
    pub partial_artifacts: usize,
}

impl Janitor {
    pub fn new(workspace_dir: impl Into<PathBuf>, indexes_dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            indexes_dir: indexes_dir.into(),
            max_age,
        }
    }

    pub async fn run_once(&self) -> Result<Sweep> {
        let now = SystemTime::now();
        let mut sweep = Sweep::default();

        for path in self.stale(&self.workspace_dir, now, is_workspace).await? {
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => sweep.workspaces += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove workspace"),
            }
        }
        for path in self.stale(&self.indexes_dir, now, is_partial_artifact).await? {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => sweep.partial_artifacts += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial index"),
            }
        }

        if sweep != Sweep::default() {
            info!(
                workspaces = sweep.workspaces,
                partial_artifacts = sweep.partial_artifacts,
                "janitor sweep"
            );
        }
        Ok(sweep)
    }

    /// Sweep every `interval` until the future is dropped. Failed sweeps are
    /// logged and retried on the next tick.
    pub async fn run(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "janitor sweep failed");
            }
        }
    }

    async fn stale(
        &self,
        dir: &Path,
        now: SystemTime,
        matches: fn(&str, bool) -> bool,
    ) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PipelineError::io(format!("reading {}", dir.display()), e)),
        };

        let mut stale = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::io(format!("reading {}", dir.display()), e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "skipping entry");
                    continue;
                }
            };
            if !matches(&name, metadata.is_dir()) {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .unwrap_or(Duration::ZERO);
            if age >= self.max_age {
                stale.push(entry.path());
            }
        }
        Ok(stale)
    }
}

fn is_workspace(name: &str, is_dir: bool) -> bool {
    is_dir && name.starts_with(WORKSPACE_PREFIX)
}

fn is_partial_artifact(name: &str, is_dir: bool) -> bool {
    !is_dir && name.starts_with('.') && name.contains(PARTIAL_ARTIFACT_MARKER)
}
