//! # Bundles CLI (`bundles`)
//!
//! Drives the clone → index → upload pipeline over the configured corpus and
//! exposes the bundle manager operations for manual use.
//!
//! ## Usage
//!
//! ```bash
//! bundles --config ./config/bundles.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bundles run` | Clone, index, and upload every revision |
//! | `bundles clone` | Clone missing repositories only |
//! | `bundles index` | Index revisions that have no artifact yet |
//! | `bundles upload` | Upload every artifact |
//! | `bundles status` | Show what is cloned and indexed |
//! | `bundles send-upload <id> <file>` | Send a raw upload |
//! | `bundles get-upload <id> <dir>` | Download a raw upload |
//! | `bundles send-db <id> <file>` | Send a converted database |
//! | `bundles query <id> <op>` | Query a bundle |
//! | `bundles janitor` | Remove stale workspaces and partial artifacts |

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use codeintel_bundles::bundle::BundleClient;
use codeintel_bundles::client::{Client, HttpClient};
use codeintel_bundles::config::{self, Config, UploadMode};
use codeintel_bundles::janitor::Janitor;
use codeintel_bundles::logging;
use codeintel_bundles::metrics::{self, ClientMetrics};
use codeintel_bundles::models::BundleId;
use codeintel_bundles::observed::ObservedClient;
use codeintel_bundles::pipeline::Pipeline;
use codeintel_bundles::progress::ProgressMode;
use codeintel_bundles::runner::{CommandRunner, ProcessRunner};
use codeintel_bundles::status;
use codeintel_bundles::upload::{BundleUploader, SrcCliUploader, Uploader};

/// Index a corpus of Go repositories with lsif-go and ship the dumps to a
/// bundle manager.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/bundles.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "bundles", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/bundles.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a terminal.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    /// Log level when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone, index, and upload the whole corpus.
    ///
    /// Phases run in order; a failed phase stops the run.
    Run {
        /// Print client metrics in Prometheus text format to stderr when done.
        #[arg(long)]
        print_metrics: bool,
    },

    /// Clone repositories that are not cloned yet.
    Clone,

    /// Index every revision that has no artifact yet.
    Index,

    /// Upload every revision's artifact.
    Upload,

    /// Show clone and index state per repository.
    Status,

    /// Send a raw upload to the bundle manager.
    SendUpload {
        id: u64,
        file: PathBuf,
    },

    /// Download a raw upload into a directory.
    GetUpload {
        id: u64,
        dir: PathBuf,
    },

    /// Send a converted database to the bundle manager.
    SendDb {
        id: u64,
        file: PathBuf,
    },

    /// Run a query against one bundle and print the JSON result.
    Query {
        id: u64,
        /// Operation name, e.g. `exists`, `definitions`, `references`, `hover`.
        op: String,
        /// Query parameter as `key=value`. Repeatable.
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },

    /// Remove stale workspaces and partial artifacts.
    Janitor {
        /// Sweep once and exit instead of every `janitor.interval`.
        #[arg(long)]
        once: bool,
    },
}

/// Parse a `key=value` pair for `--param` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// The bundle manager client every command shares, with its metrics
/// registered in `registry`.
fn bundle_client(cfg: &Config, registry: &prometheus::Registry) -> anyhow::Result<Arc<dyn Client>> {
    let metrics = ClientMetrics::new(&cfg.bundle_manager.metrics_subsystem, registry)
        .context("registering client metrics")?;
    let http = HttpClient::from_config(&cfg.bundle_manager)?;
    Ok(Arc::new(ObservedClient::new(http, metrics)))
}

fn uploader(cfg: &Config, client: Arc<dyn Client>, runner: Arc<dyn CommandRunner>) -> Arc<dyn Uploader> {
    match cfg.upload.mode {
        UploadMode::BundleManager => Arc::new(BundleUploader::new(client)),
        UploadMode::SrcCli => Arc::new(SrcCliUploader::new(runner, &cfg.upload)),
    }
}

async fn open(path: &std::path::Path) -> anyhow::Result<Box<tokio::fs::File>> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(Box::new(file))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level);

    let cfg = config::load_config(&cli.config)?;
    let registry = prometheus::Registry::new();
    let client = bundle_client(&cfg, &registry)?;
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    let pipeline = || {
        Pipeline::new(&cfg, Arc::clone(&runner), uploader(&cfg, Arc::clone(&client), Arc::clone(&runner)))
            .with_progress(Arc::from(progress.reporter()))
    };

    match cli.command {
        Commands::Run { print_metrics } => {
            let result = pipeline().run().await;
            if print_metrics {
                eprint!("{}", metrics::render(&registry)?);
            }
            result?;
        }
        Commands::Clone => pipeline().clone_all().await?,
        Commands::Index => pipeline().index_all().await?,
        Commands::Upload => pipeline().upload_all().await?,
        Commands::Status => status::print_status(&cfg).await?,
        Commands::SendUpload { id, file } => {
            client.send_upload(BundleId(id), open(&file).await?).await?;
        }
        Commands::GetUpload { id, dir } => {
            let path = client.get_upload(BundleId(id), &dir).await?;
            println!("{}", path.display());
        }
        Commands::SendDb { id, file } => {
            client.send_db(BundleId(id), open(&file).await?).await?;
        }
        Commands::Query { id, op, params } => {
            let params: BTreeMap<String, String> = params.into_iter().collect();
            let bundle = BundleClient::new(Arc::clone(&client), BundleId(id));
            let value: serde_json::Value = bundle.query(&op, &params).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Janitor { once } => {
            let janitor = Janitor::new(
                &cfg.paths.workspace_dir,
                &cfg.paths.indexes_dir,
                cfg.janitor.max_age()?,
            );
            if once {
                let sweep = janitor.run_once().await?;
                println!(
                    "Removed {} workspaces and {} partial artifacts.",
                    sweep.workspaces, sweep.partial_artifacts
                );
            } else {
                janitor.run(cfg.janitor.interval()?).await;
            }
        }
    }

    Ok(())
}
