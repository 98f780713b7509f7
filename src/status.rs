//! Local clone and index state of the corpus.
//!
//! Reads only the filesystem: a repository counts as cloned when its clone
//! directory exists, and a revision as indexed when its artifact does.

use anyhow::{Context, Result};
use std::io::Write;

use crate::config::Config;
use crate::models::artifact_path;

/// Local state of one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoStatus {
    pub slug: String,
    pub cloned: bool,
    pub indexed: usize,
    pub revisions: usize,
}

pub async fn collect_status(config: &Config) -> Result<Vec<RepoStatus>> {
    let mut rows = Vec::with_capacity(config.repos.len());
    for repo in &config.repos {
        let clone_dir = repo.clone_dir(&config.paths.repos_dir);
        let cloned = tokio::fs::try_exists(&clone_dir)
            .await
            .with_context(|| format!("checking {}", clone_dir.display()))?;

        let mut indexed = 0;
        for rev in &repo.revs {
            let artifact = artifact_path(&config.paths.indexes_dir, &repo.name, rev);
            if tokio::fs::try_exists(&artifact)
                .await
                .with_context(|| format!("checking {}", artifact.display()))?
            {
                indexed += 1;
            }
        }

        rows.push(RepoStatus {
            slug: repo.slug(),
            cloned,
            indexed,
            revisions: repo.revs.len(),
        });
    }
    Ok(rows)
}

pub fn write_status(rows: &[RepoStatus], out: &mut impl Write) -> Result<()> {
    writeln!(out, "{:<32} {:<8} INDEXED", "REPOSITORY", "CLONED")?;
    for row in rows {
        writeln!(
            out,
            "{:<32} {:<8} {}/{}",
            row.slug,
            if row.cloned { "yes" } else { "no" },
            row.indexed,
            row.revisions
        )?;
    }
    Ok(())
}

pub async fn print_status(config: &Config) -> Result<()> {
    let rows = collect_status(config).await?;
    write_status(&rows, &mut std::io::stdout().lock())
}
