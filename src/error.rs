//! Error types for the bundle client and the indexing pipeline.

use std::io;
use std::path::PathBuf;

/// Errors returned by every [`Client`](crate::client::Client) operation.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The bundle manager answered with a non-2xx status.
    #[error("unexpected status code {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid bundle manager url: {0}")]
    InvalidUrl(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("request limiter closed")]
    LimiterClosed,
}

impl ClientError {
    /// HTTP status carried by a [`ClientError::Status`].
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status(code) => Some(*code),
            _ => None,
        }
    }
}

/// Errors produced by the clone, index, and upload phases.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A subprocess exited non-zero. `output` holds its combined stdout/stderr.
    #[error("error running '{command}':\n{output}")]
    Command { command: String, output: String },
    #[error("failed to execute '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("walking workspace source: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("upload failed: {0}")]
    Client(#[from] ClientError),
    #[error("task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("index artifact missing: {}", .0.display())]
    MissingArtifact(PathBuf),
    /// Any of the above, tagged with the repository or revision it hit.
    #[error("{item}: {source}")]
    Item {
        item: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        PipelineError::Io {
            context: context.into(),
            source,
        }
    }

    /// Tag this error with the unit of work (`owner/name` or
    /// `owner/name@rev`) it belongs to.
    pub fn for_item(self, item: impl Into<String>) -> Self {
        PipelineError::Item {
            item: item.into(),
            source: Box::new(self),
        }
    }

    /// The unit of work this error is tagged with, if any.
    pub fn item(&self) -> Option<&str> {
        match self {
            PipelineError::Item { item, .. } => Some(item),
            _ => None,
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
