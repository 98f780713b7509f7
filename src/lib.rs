//! # Codeintel Bundles
//!
//! Builds LSIF indexes for a fixed corpus of Go repositories and ships them
//! to a remote bundle manager, plus the typed client used to talk to that
//! service.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐       ┌────────────────┐
//! │  clone   │──▶│   index   │──▶│  upload  │──────▶│ bundle manager │
//! │  (git)   │   │ (lsif-go) │   │ Uploader │ HTTP  │  /uploads /dbs │
//! └──────────┘   └───────────┘   └──────────┘       └────────────────┘
//!                 Workspace per     ObservedClient<HttpClient>
//!                 (repo, rev)       + Limiter
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Corpus, bundle ids, query result shapes |
//! | [`error`] | Client and pipeline error types |
//! | [`limiter`] | Bound on in-flight requests |
//! | [`client`] | `Client` trait and HTTP transport |
//! | [`bundle`] | Per-bundle query facade |
//! | [`metrics`] | Prometheus metrics per client operation |
//! | [`observed`] | Metrics and tracing decorator for any `Client` |
//! | [`fanout`] | Run-all, first-error concurrency helper |
//! | [`runner`] | Subprocess execution |
//! | [`workspace`] | Temporary per-task repository copies |
//! | [`upload`] | Artifact uploaders |
//! | [`pipeline`] | Clone → index → upload orchestration |
//! | [`progress`] | Phase progress on stderr |
//! | [`status`] | Local clone/index state |
//! | [`janitor`] | Cleanup of stale workspaces and partial artifacts |
//! | [`logging`] | tracing subscriber setup |

pub mod bundle;
pub mod client;
pub mod config;
pub mod error;
pub mod fanout;
pub mod janitor;
pub mod limiter;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod observed;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod status;
pub mod upload;
pub mod workspace;
