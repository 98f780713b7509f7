//! Clone → index → upload orchestration.
//!
//! The pipeline drives the corpus through three strictly ordered phases.
//! Each phase fans out over its units of work with [`fanout::run_all`] and
//! waits for all of them before reporting; a failed phase stops the run, so
//! nothing is uploaded unless every revision indexed cleanly.
//!
//! | Phase | Unit of work | Skipped when |
//! |-------|--------------|--------------|
//! | clone | one repository | `repos_dir/<name>` exists |
//! | index | one `(repo, rev)` | `indexes_dir/<name>.<rev>.dump` exists |
//! | upload | one `(repo, rev)` | never; the remote service handles duplicates |
//!
//! Index tasks run in a private [`Workspace`]. The indexer writes to a
//! hidden temporary file next to the final artifact, which is renamed into
//! place only after the indexer exits cleanly, so an artifact that exists is
//! always complete.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Config, GitConfig, IndexerConfig, PathsConfig};
use crate::error::{PipelineError, Result};
use crate::fanout;
use crate::models::{artifact_file_name, artifact_path, Corpus, Repo, RevisionTask};
use crate::progress::{NoProgress, Outcome, Phase, ProgressEvent, ProgressReporter};
use crate::runner::CommandRunner;
use crate::upload::Uploader;
use crate::workspace::Workspace;

/// Marker inside the name of an in-progress artifact.
pub const PARTIAL_ARTIFACT_MARKER: &str = ".dump.tmp-";

/// `.<name>.<rev>.dump.tmp-<uuid>`: hidden, unique, and recognisable by the
/// janitor.
pub fn partial_file_name(name: &str, rev: &str) -> String {
    format!(
        ".{}.tmp-{}",
        artifact_file_name(name, rev),
        uuid::Uuid::new_v4()
    )
}

pub struct Pipeline {
    shared: Arc<Shared>,
}

#[derive(Clone)]
struct Shared {
    corpus: Corpus,
    paths: PathsConfig,
    git: GitConfig,
    indexer: IndexerConfig,
    runner: Arc<dyn CommandRunner>,
    uploader: Arc<dyn Uploader>,
    progress: Arc<dyn ProgressReporter>,
}

impl Pipeline {
    pub fn new(config: &Config, runner: Arc<dyn CommandRunner>, uploader: Arc<dyn Uploader>) -> Self {
        Self {
            shared: Arc::new(Shared {
                corpus: config.corpus(),
                paths: config.paths.clone(),
                git: config.git.clone(),
                indexer: config.indexer.clone(),
                runner,
                uploader,
                progress: Arc::new(NoProgress),
            }),
        }
    }

    /// Replace the progress reporter.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        Arc::make_mut(&mut self.shared).progress = progress;
        self
    }

    pub fn corpus(&self) -> &Corpus {
        &self.shared.corpus
    }

    /// Run all three phases in order, stopping at the first failed phase.
    pub async fn run(&self) -> Result<()> {
        self.clone_all().await?;
        self.index_all().await?;
        self.upload_all().await?;
        Ok(())
    }

    /// Make sure every repository has a local clone.
    pub async fn clone_all(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        create_dir(&shared.paths.repos_dir).await?;

        let repos = shared.corpus.repos().to_vec();
        let total = repos.len() as u64;
        shared.progress.report(ProgressEvent::Started {
            phase: Phase::Clone,
            total,
        });
        let counter = Arc::new(AtomicU64::new(0));

        fanout::run_all(repos, move |repo| {
            let shared = Arc::clone(&shared);
            let counter = Arc::clone(&counter);
            async move {
                let item = repo.slug();
                let result = shared.ensure_cloned(&repo).await;
                shared.finish(Phase::Clone, &item, &result, &counter, total);
                result.map(|_| ()).map_err(|e| e.for_item(item))
            }
        })
        .await
    }

    /// Index every revision of every repository.
    pub async fn index_all(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        create_dir(&shared.paths.indexes_dir).await?;

        let total = shared.corpus.revision_count() as u64;
        shared.progress.report(ProgressEvent::Started {
            phase: Phase::Index,
            total,
        });
        let counter = Arc::new(AtomicU64::new(0));
        let repos = shared.corpus.repos().to_vec();

        fanout::run_all(repos, move |repo| {
            let shared = Arc::clone(&shared);
            let counter = Arc::clone(&counter);
            async move {
                let repo = Arc::new(repo);
                let revs = repo.revs.clone();
                fanout::run_all(revs, move |rev| {
                    let shared = Arc::clone(&shared);
                    let counter = Arc::clone(&counter);
                    let repo = Arc::clone(&repo);
                    async move {
                        let item = format!("{}@{}", repo.slug(), rev);
                        let result = shared.ensure_indexed(&repo, &rev).await;
                        shared.finish(Phase::Index, &item, &result, &counter, total);
                        result.map(|_| ()).map_err(|e| e.for_item(item))
                    }
                })
                .await
            }
        })
        .await
    }

    /// Upload every revision's artifact.
    pub async fn upload_all(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let tasks = shared.corpus.revision_tasks();
        let total = tasks.len() as u64;
        shared.progress.report(ProgressEvent::Started {
            phase: Phase::Upload,
            total,
        });
        let counter = Arc::new(AtomicU64::new(0));

        fanout::run_all(tasks, move |task| {
            let shared = Arc::clone(&shared);
            let counter = Arc::clone(&counter);
            async move {
                let item = format!("{}@{}", task.slug(), task.rev);
                let result = shared.upload(&task).await;
                shared.finish(Phase::Upload, &item, &result, &counter, total);
                result.map(|_| ()).map_err(|e| e.for_item(item))
            }
        })
        .await
    }
}

impl Shared {
    async fn ensure_cloned(&self, repo: &Repo) -> Result<Outcome> {
        let dir = repo.clone_dir(&self.paths.repos_dir);
        if exists(&dir).await? {
            debug!(repo = %repo.slug(), "already cloned");
            return Ok(Outcome::Skipped);
        }

        info!(repo = %repo.slug(), "cloning");
        let args = vec![
            "clone".to_string(),
            self.git.remote_url(repo),
            repo.name.clone(),
        ];
        self.runner
            .run(Some(&self.paths.repos_dir), &self.git.program, &args)
            .await?;
        Ok(Outcome::Done)
    }

    async fn ensure_indexed(&self, repo: &Repo, rev: &str) -> Result<Outcome> {
        let indexes_dir = absolute(&self.paths.indexes_dir)?;
        let artifact = artifact_path(&indexes_dir, &repo.name, rev);
        if exists(&artifact).await? {
            debug!(repo = %repo.slug(), rev, "already indexed");
            return Ok(Outcome::Skipped);
        }

        let clone_dir = repo.clone_dir(&self.paths.repos_dir);
        let workspace = Workspace::acquire(&self.paths.workspace_dir, &clone_dir, &repo.name).await?;

        info!(repo = %repo.slug(), rev, "indexing");
        let result = self.index_in(&workspace, &indexes_dir, &artifact, repo, rev).await;

        if let Err(e) = workspace.release().await {
            warn!(error = %e, "failed to remove workspace");
        }
        result.map(|_| Outcome::Done)
    }

    async fn index_in(
        &self,
        workspace: &Workspace,
        indexes_dir: &Path,
        artifact: &Path,
        repo: &Repo,
        rev: &str,
    ) -> Result<()> {
        self.runner
            .run(
                Some(workspace.path()),
                &self.git.program,
                &["checkout".to_string(), rev.to_string()],
            )
            .await?;

        for command in &self.indexer.prepare {
            if let Some((program, args)) = command.split_first() {
                self.runner.run(Some(workspace.path()), program, args).await?;
            }
        }

        let partial = indexes_dir.join(partial_file_name(&repo.name, rev));
        let mut args = self.indexer.args.clone();
        args.push(self.indexer.output_flag.clone());
        args.push(partial.to_string_lossy().into_owned());

        let indexed = self
            .runner
            .run(Some(workspace.path()), &self.indexer.program, &args)
            .await;
        if let Err(e) = indexed {
            discard(&partial).await;
            return Err(e);
        }

        if !exists(&partial).await? {
            return Err(PipelineError::MissingArtifact(partial));
        }
        if let Err(e) = tokio::fs::rename(&partial, artifact).await {
            discard(&partial).await;
            return Err(PipelineError::io(
                format!("moving index into place at {}", artifact.display()),
                e,
            ));
        }
        Ok(())
    }

    async fn upload(&self, task: &RevisionTask) -> Result<Outcome> {
        let artifact = artifact_path(&self.paths.indexes_dir, &task.name, &task.rev);
        info!(repo = %task.slug(), rev = %task.rev, bundle_id = %task.bundle_id, "uploading");
        self.uploader.upload(task, &artifact).await?;
        Ok(Outcome::Done)
    }

    fn finish(
        &self,
        phase: Phase,
        item: &str,
        result: &Result<Outcome>,
        counter: &AtomicU64,
        total: u64,
    ) {
        let outcome = match result {
            Ok(outcome) => *outcome,
            Err(e) => {
                warn!(%phase, item, error = %e, "task failed");
                Outcome::Failed
            }
        };
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress.report(ProgressEvent::Finished {
            phase,
            item: item.to_string(),
            outcome,
            n,
            total,
        });
    }
}

/// Existence check that surfaces every error other than "not found".
async fn exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| PipelineError::io(format!("checking {}", path.display()), e))
}

async fn create_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| PipelineError::io(format!("creating {}", path.display()), e))
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove partial index");
        }
    }
}

/// The indexer runs inside the workspace, so its output path must not be
/// relative to the current directory.
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| PipelineError::io("resolving current directory", e))?;
    Ok(cwd.join(path))
}
