//! Subprocess execution.
//!
//! The pipeline talks to git, the dependency vendoring step, the external
//! indexer, and (optionally) the `src` CLI only through [`CommandRunner`],
//! so tests can script those collaborators without installing them.

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use crate::error::{PipelineError, Result};

/// Runs an external program to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program args...` inside `dir` (or the current directory when
    /// `None`). A non-zero exit is a [`PipelineError::Command`] carrying the
    /// program's combined output.
    async fn run(&self, dir: Option<&Path>, program: &str, args: &[String]) -> Result<()>;
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, dir: Option<&Path>, program: &str, args: &[String]) -> Result<()> {
        let command_line = render_command(program, args);

        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(command = %command_line, dir = ?dir, "running command");
        let output = cmd.output().await.map_err(|source| PipelineError::Spawn {
            command: command_line.clone(),
            source,
        })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(PipelineError::Command {
                command: command_line,
                output: combined,
            });
        }

        Ok(())
    }
}

/// `program arg1 arg2 ...` for error messages and logs.
pub fn render_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
