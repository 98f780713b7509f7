//! Core data models shared by the orchestrator and the bundle client.
//!
//! The corpus types ([`Repo`], [`Corpus`]) describe *what* gets cloned,
//! indexed, and uploaded. [`BundleId`] is the key the remote bundle manager
//! knows an upload by. The query result shapes at the bottom mirror the JSON
//! bodies the bundle manager returns from `GET /dbs/{id}/{op}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Opaque identifier of one bundle (raw upload + converted database) on the
/// bundle manager. Never generated by the client itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(pub u64);

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BundleId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// One repository of the static corpus. Identity is `(owner, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Repo {
    pub owner: String,
    pub name: String,
    /// Commits to index, in the order they were declared.
    pub revs: Vec<String>,
}

impl Repo {
    pub fn new(owner: &str, name: &str, revs: &[&str]) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            revs: revs.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// `owner/name`, used in log lines and progress output.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Directory the shared clone lives in, under `repos_dir`.
    pub fn clone_dir(&self, repos_dir: &Path) -> PathBuf {
        repos_dir.join(&self.name)
    }
}

/// File name of the index artifact for one revision: `<name>.<rev>.dump`.
pub fn artifact_file_name(name: &str, rev: &str) -> String {
    format!("{}.{}.dump", name, rev)
}

/// Full path of the index artifact for one revision.
pub fn artifact_path(indexes_dir: &Path, name: &str, rev: &str) -> PathBuf {
    indexes_dir.join(artifact_file_name(name, rev))
}

/// A single unit of index or upload work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionTask {
    pub owner: String,
    pub name: String,
    pub rev: String,
    pub bundle_id: BundleId,
}

impl RevisionTask {
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// The static corpus of repositories processed by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    repos: Vec<Repo>,
    first_bundle_id: u64,
}

impl Corpus {
    pub fn new(repos: Vec<Repo>, first_bundle_id: u64) -> Self {
        Self {
            repos,
            first_bundle_id,
        }
    }

    pub fn repos(&self) -> &[Repo] {
        &self.repos
    }

    /// Total number of `(repo, rev)` pairs.
    pub fn revision_count(&self) -> usize {
        self.repos.iter().map(|r| r.revs.len()).sum()
    }

    /// Every `(repo, rev)` pair in declaration order.
    ///
    /// Bundle ids are assigned sequentially from `first_bundle_id`, so the
    /// same corpus always maps a revision to the same bundle.
    pub fn revision_tasks(&self) -> Vec<RevisionTask> {
        let mut next = self.first_bundle_id;
        let mut tasks = Vec::with_capacity(self.revision_count());
        for repo in &self.repos {
            for rev in &repo.revs {
                tasks.push(RevisionTask {
                    owner: repo.owner.clone(),
                    name: repo.name.clone(),
                    rev: rev.clone(),
                    bundle_id: BundleId(next),
                });
                next += 1;
            }
        }
        tasks
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Bundle query result shapes
// ═══════════════════════════════════════════════════════════════════════

/// Zero-based line/character position inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// A range inside a path of the indexed bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub range: Range,
}

/// Hover text plus the range it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hover {
    pub text: String,
    pub range: Range,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_name_is_name_dot_rev() {
        assert_eq!(artifact_file_name("zap", "a6015e1"), "zap.a6015e1.dump");
        assert_eq!(
            artifact_path(Path::new("indexes"), "etcd", "fb77f9b"),
            PathBuf::from("indexes/etcd.fb77f9b.dump")
        );
    }

    #[test]
    fn revision_tasks_number_bundles_in_corpus_order() {
        let corpus = Corpus::new(
            vec![
                Repo::new("uber-go", "zap", &["r1", "r2"]),
                Repo::new("etcd-io", "etcd", &["r3"]),
            ],
            10,
        );
        let tasks = corpus.revision_tasks();
        assert_eq!(corpus.revision_count(), 3);
        let ids: Vec<u64> = tasks.iter().map(|t| t.bundle_id.0).collect();
        assert_eq!(ids, vec![10, 11, 12]);
        assert_eq!(tasks[2].name, "etcd");
        assert_eq!(tasks[2].rev, "r3");
        assert_eq!(tasks[0].slug(), "uber-go/zap");
    }

    #[test]
    fn bundle_id_serializes_as_plain_integer() {
        let json = serde_json::to_string(&BundleId(42)).unwrap();
        assert_eq!(json, "42");
        assert_eq!(BundleId(42).to_string(), "42");
    }
}
