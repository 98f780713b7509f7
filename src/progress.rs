//! Pipeline progress reporting.
//!
//! Reports what each phase is doing so users can follow a long run: how many
//! clones, index runs, or uploads have finished and which were skipped.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::fmt;
use std::io::Write;

/// Phase of the pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Clone,
    Index,
    Upload,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Clone => "clone",
            Phase::Index => "index",
            Phase::Upload => "upload",
        })
    }
}

/// How a single unit of work ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    Done,
    /// Already cloned or indexed.
    Skipped,
    Failed,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Done => "done",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "failed",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A phase is starting with `total` units of work.
    Started { phase: Phase, total: u64 },
    /// One unit finished; `n` units of `total` are now finished.
    Finished {
        phase: Phase,
        item: String,
        outcome: Outcome,
        n: u64,
        total: u64,
    },
}

/// Reports pipeline progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called concurrently from phase tasks.
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "index  uber-go/zap@a6015e1  done  3 / 14".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Started { phase, total } => {
                format!("{}  starting  {} items\n", phase, total)
            }
            ProgressEvent::Finished {
                phase,
                item,
                outcome,
                n,
                total,
            } => format!("{}  {}  {}  {} / {}\n", phase, item, outcome.as_str(), n, total),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Started { phase, total } => serde_json::json!({
                "event": "progress",
                "phase": phase.to_string(),
                "state": "started",
                "total": total
            }),
            ProgressEvent::Finished {
                phase,
                item,
                outcome,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": phase.to_string(),
                "item": item,
                "state": outcome.as_str(),
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
