//! Delivery of index artifacts to the remote service.
//!
//! The upload phase hands each `(repo, rev)` artifact to an [`Uploader`].
//! [`BundleUploader`] streams the dump straight to the bundle manager via
//! [`Client::send_upload`]; [`SrcCliUploader`] shells out to the `src` CLI
//! the way a developer would upload by hand.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::client::Client;
use crate::config::UploadConfig;
use crate::error::{PipelineError, Result};
use crate::models::RevisionTask;
use crate::runner::CommandRunner;

#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload the artifact at `artifact` for `task`.
    async fn upload(&self, task: &RevisionTask, artifact: &Path) -> Result<()>;
}

/// Uploads through the bundle client, keyed by the task's bundle id.
pub struct BundleUploader {
    client: Arc<dyn Client>,
}

impl BundleUploader {
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Uploader for BundleUploader {
    async fn upload(&self, task: &RevisionTask, artifact: &Path) -> Result<()> {
        let file = match tokio::fs::File::open(artifact).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::MissingArtifact(artifact.to_path_buf()));
            }
            Err(e) => {
                return Err(PipelineError::io(
                    format!("opening {}", artifact.display()),
                    e,
                ))
            }
        };

        self.client
            .send_upload(task.bundle_id, Box::new(file))
            .await?;
        Ok(())
    }
}

/// Uploads with `src lsif upload`, run from the artifact's directory.
pub struct SrcCliUploader {
    runner: Arc<dyn CommandRunner>,
    program: String,
    endpoint: String,
    repo_host: String,
}

impl SrcCliUploader {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &UploadConfig) -> Self {
        Self {
            runner,
            program: config.src_program.clone(),
            endpoint: config.src_endpoint.clone(),
            repo_host: config.repo_host.clone(),
        }
    }

    fn args(&self, task: &RevisionTask, file_name: &str) -> Vec<String> {
        vec![
            format!("-endpoint={}", self.endpoint),
            "lsif".to_string(),
            "upload".to_string(),
            "-root=/".to_string(),
            format!("-repo={}/{}/{}", self.repo_host, task.owner, task.name),
            format!("-commit={}", task.rev),
            format!("-file={}", file_name),
        ]
    }
}

#[async_trait]
impl Uploader for SrcCliUploader {
    async fn upload(&self, task: &RevisionTask, artifact: &Path) -> Result<()> {
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::MissingArtifact(artifact.to_path_buf()))?;
        let dir = artifact.parent().filter(|p| !p.as_os_str().is_empty());

        self.runner
            .run(dir, &self.program, &self.args(task, &file_name))
            .await
    }
}
