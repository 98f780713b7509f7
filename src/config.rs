//! TOML configuration.
//!
//! Every section is optional except the `[[repos]]` corpus; defaults match a
//! local development setup (`lsif-go` indexer, GitHub remotes, bundle manager
//! on `localhost:3187`).
//!
//! Two environment variables override the file:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `PRECISE_CODE_INTEL_BUNDLE_MANAGER_URL` | `bundle_manager.url` |
//! | `PRECISE_CODE_INTEL_JANITOR_INTERVAL` | `janitor.interval` |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::limiter::DEFAULT_CAPACITY;
use crate::models::{Corpus, Repo};

pub const BUNDLE_MANAGER_URL_ENV: &str = "PRECISE_CODE_INTEL_BUNDLE_MANAGER_URL";
pub const JANITOR_INTERVAL_ENV: &str = "PRECISE_CODE_INTEL_JANITOR_INTERVAL";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub bundle_manager: BundleManagerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub janitor: JanitorConfig,
    #[serde(default)]
    pub repos: Vec<Repo>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BundleManagerConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_capacity")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_capacity")]
    pub max_idle_per_host: usize,
    /// Per-request deadline in seconds; 0 disables it.
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default = "default_metrics_subsystem")]
    pub metrics_subsystem: String,
}

impl Default for BundleManagerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_concurrent_requests: DEFAULT_CAPACITY,
            max_idle_per_host: DEFAULT_CAPACITY,
            timeout_secs: 0,
            metrics_subsystem: default_metrics_subsystem(),
        }
    }
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_metrics_subsystem() -> String {
    "orchestrator".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_repos_dir")]
    pub repos_dir: PathBuf,
    #[serde(default = "default_indexes_dir")]
    pub indexes_dir: PathBuf,
    /// Parent directory of the per-task workspaces.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            repos_dir: default_repos_dir(),
            indexes_dir: default_indexes_dir(),
            workspace_dir: default_workspace_dir(),
        }
    }
}

fn default_repos_dir() -> PathBuf {
    PathBuf::from("repos")
}
fn default_indexes_dir() -> PathBuf {
    PathBuf::from("indexes")
}
fn default_workspace_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    #[serde(default = "default_git_program")]
    pub program: String,
    /// Clone URL with `{owner}` and `{name}` placeholders.
    #[serde(default = "default_remote_template")]
    pub remote_template: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            program: default_git_program(),
            remote_template: default_remote_template(),
        }
    }
}

impl GitConfig {
    pub fn remote_url(&self, repo: &Repo) -> String {
        self.remote_template
            .replace("{owner}", &repo.owner)
            .replace("{name}", &repo.name)
    }
}

fn default_git_program() -> String {
    "git".to_string()
}
fn default_remote_template() -> String {
    "https://github.com/{owner}/{name}.git".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    #[serde(default = "default_indexer_program")]
    pub program: String,
    /// Flag placed before the output path, e.g. `-o`.
    #[serde(default = "default_output_flag")]
    pub output_flag: String,
    /// Extra arguments placed before the output flag.
    #[serde(default)]
    pub args: Vec<String>,
    /// Commands run in the workspace after checkout, before the indexer
    /// (dependency resolution). Each entry is `[program, args...]`.
    #[serde(default = "default_prepare")]
    pub prepare: Vec<Vec<String>>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            program: default_indexer_program(),
            output_flag: default_output_flag(),
            args: Vec::new(),
            prepare: default_prepare(),
        }
    }
}

fn default_indexer_program() -> String {
    "lsif-go".to_string()
}
fn default_output_flag() -> String {
    "-o".to_string()
}
fn default_prepare() -> Vec<Vec<String>> {
    vec![vec!["go".to_string(), "mod".to_string(), "vendor".to_string()]]
}

/// How the upload phase delivers artifacts.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum UploadMode {
    /// `POST /uploads/{id}` through the bundle client.
    #[default]
    BundleManager,
    /// Shell out to `src lsif upload` against a frontend endpoint.
    SrcCli,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default)]
    pub mode: UploadMode,
    #[serde(default = "default_first_bundle_id")]
    pub first_bundle_id: u64,
    #[serde(default = "default_src_program")]
    pub src_program: String,
    #[serde(default = "default_src_endpoint")]
    pub src_endpoint: String,
    /// Code host prefix of the `-repo` flag, e.g. `github.com`.
    #[serde(default = "default_repo_host")]
    pub repo_host: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            mode: UploadMode::default(),
            first_bundle_id: default_first_bundle_id(),
            src_program: default_src_program(),
            src_endpoint: default_src_endpoint(),
            repo_host: default_repo_host(),
        }
    }
}

fn default_first_bundle_id() -> u64 {
    1
}
fn default_src_program() -> String {
    "src".to_string()
}
fn default_src_endpoint() -> String {
    "http://localhost:3080".to_string()
}
fn default_repo_host() -> String {
    "github.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct JanitorConfig {
    #[serde(default = "default_janitor_interval")]
    pub interval: String,
    #[serde(default = "default_janitor_max_age")]
    pub max_age: String,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval: default_janitor_interval(),
            max_age: default_janitor_max_age(),
        }
    }
}

impl JanitorConfig {
    pub fn interval(&self) -> Result<Duration> {
        parse_interval(&self.interval)
            .with_context(|| format!("invalid duration {:?} for janitor.interval", self.interval))
    }

    pub fn max_age(&self) -> Result<Duration> {
        parse_interval(&self.max_age)
            .with_context(|| format!("invalid duration {:?} for janitor.max_age", self.max_age))
    }
}

fn default_janitor_interval() -> String {
    "1m".to_string()
}
fn default_janitor_max_age() -> String {
    "1h".to_string()
}

impl Config {
    /// The repositories to process, with bundle ids numbered from
    /// `upload.first_bundle_id`.
    pub fn corpus(&self) -> Corpus {
        Corpus::new(self.repos.clone(), self.upload.first_bundle_id)
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in
    /// production.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(BUNDLE_MANAGER_URL_ENV) {
            self.bundle_manager.url = url;
        }
        if let Some(interval) = lookup(JANITOR_INTERVAL_ENV) {
            self.janitor.interval = interval;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload.mode == UploadMode::BundleManager && self.bundle_manager.url.trim().is_empty() {
            bail!(
                "bundle_manager.url must be set (or {} exported) when upload.mode is bundle-manager",
                BUNDLE_MANAGER_URL_ENV
            );
        }
        if self.bundle_manager.max_concurrent_requests == 0 {
            bail!("bundle_manager.max_concurrent_requests must be >= 1");
        }
        if self.indexer.program.trim().is_empty() {
            bail!("indexer.program must not be empty");
        }
        if self.indexer.prepare.iter().any(|cmd| cmd.is_empty()) {
            bail!("indexer.prepare entries must name a program");
        }

        let mut names = HashSet::new();
        for repo in &self.repos {
            if repo.owner.is_empty() || repo.name.is_empty() {
                bail!("every [[repos]] entry needs an owner and a name");
            }
            if repo.revs.is_empty() {
                bail!("repository {} has no revisions", repo.slug());
            }
            if !is_path_component(&repo.name) {
                bail!("repository name '{}' must be a single path component", repo.name);
            }
            if let Some(rev) = repo.revs.iter().find(|rev| !is_path_component(rev)) {
                bail!(
                    "revision '{}' of {} must not contain path separators or '..'",
                    rev,
                    repo.slug()
                );
            }
            // Clone directories and artifact names are keyed on the name alone.
            if !names.insert(repo.name.as_str()) {
                bail!("repository name '{}' appears more than once", repo.name);
            }
        }

        self.janitor.interval()?;
        self.janitor.max_age()?;
        Ok(())
    }
}

/// Repo names and revisions are joined into `repos_dir` and `indexes_dir`
/// and must stay inside them.
fn is_path_component(value: &str) -> bool {
    !value.is_empty() && !value.contains(['/', '\\']) && !value.contains("..") && value != "."
}

/// Parse configuration text without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Parse an interval such as `1s`, `1m`, `500ms`, or `1h30m`.
pub fn parse_interval(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("empty duration");
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            bail!("expected a number in {:?}", raw);
        }
        let value: u64 = rest[..digits].parse()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(3600).map(Duration::from_secs),
            "" => bail!("missing unit in {:?}", raw),
            other => bail!("unknown unit {:?} in {:?}", other, raw),
        };
        total = match part.and_then(|p| total.checked_add(p)) {
            Some(total) => total,
            None => bail!("duration out of range: {:?}", raw),
        };
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[bundle_manager]
url = "http://localhost:3187"

[[repos]]
owner = "uber-go"
name = "zap"
revs = ["a6015e13", "2aa9fa25"]
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.bundle_manager.max_concurrent_requests, 500);
        assert_eq!(config.bundle_manager.max_idle_per_host, 500);
        assert_eq!(config.paths.indexes_dir, PathBuf::from("indexes"));
        assert_eq!(config.indexer.program, "lsif-go");
        assert_eq!(config.indexer.prepare, vec![vec!["go", "mod", "vendor"]]);
        assert_eq!(config.upload.mode, UploadMode::BundleManager);
        assert_eq!(config.corpus().revision_count(), 2);
    }

    #[test]
    fn remote_url_fills_placeholders() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(
            config.git.remote_url(&config.repos[0]),
            "https://github.com/uber-go/zap.git"
        );
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = parse_config(MINIMAL).unwrap();
        config.apply_env(|key| match key {
            BUNDLE_MANAGER_URL_ENV => Some("http://bundle-manager:3187".to_string()),
            JANITOR_INTERVAL_ENV => Some("30s".to_string()),
            _ => None,
        });
        assert_eq!(config.bundle_manager.url, "http://bundle-manager:3187");
        assert_eq!(config.janitor.interval().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn missing_url_is_rejected_for_bundle_manager_uploads() {
        let config = parse_config("[[repos]]\nowner = \"a\"\nname = \"b\"\nrevs = [\"r\"]\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn src_cli_mode_does_not_need_a_url() {
        let config = parse_config(
            "[upload]\nmode = \"src-cli\"\n[[repos]]\nowner = \"a\"\nname = \"b\"\nrevs = [\"r\"]\n",
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.upload.mode, UploadMode::SrcCli);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let content = format!(
            "{}\n[[repos]]\nowner = \"someone-else\"\nname = \"zap\"\nrevs = [\"r\"]\n",
            MINIMAL
        );
        let err = parse_config(&content).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn empty_revisions_are_rejected() {
        let content = "[bundle_manager]\nurl = \"http://x\"\n[[repos]]\nowner = \"a\"\nname = \"b\"\nrevs = []\n";
        assert!(parse_config(content).unwrap().validate().is_err());
    }

    #[test]
    fn intervals_parse() {
        assert_eq!(parse_interval("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_interval("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_interval("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_interval("1h30m").unwrap(), Duration::from_secs(5400));
        assert!(parse_interval("").is_err());
        assert!(parse_interval("10").is_err());
        assert!(parse_interval("5d").is_err());
        assert!(parse_interval("m").is_err());
    }

    #[test]
    fn oversized_intervals_are_rejected() {
        let err = parse_interval("9999999999999999999h").unwrap_err();
        assert!(err.to_string().contains("out of range"), "{}", err);
        let err = parse_interval("18446744073709551615s1s").unwrap_err();
        assert!(err.to_string().contains("out of range"), "{}", err);
        assert_eq!(
            parse_interval("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn env_interval_overflow_fails_validation() {
        let mut config = parse_config(MINIMAL).unwrap();
        config.apply_env(|key| (key == JANITOR_INTERVAL_ENV).then(|| "9999999999999999999h".to_string()));
        assert!(config.validate().is_err());
    }

    fn with_repo(name: &str, rev: &str) -> Config {
        parse_config(&format!(
            "[bundle_manager]\nurl = \"http://x\"\n[[repos]]\nowner = \"a\"\nname = {:?}\nrevs = [{:?}]\n",
            name, rev
        ))
        .unwrap()
    }

    #[test]
    fn names_and_revisions_must_stay_inside_their_directories() {
        with_repo("zap", "a6015e13").validate().unwrap();
        with_repo("zap", "v1.14.1").validate().unwrap();

        let err = with_repo("../../etc", "a6015e13").validate().unwrap_err();
        assert!(err.to_string().contains("single path component"), "{}", err);
        assert!(with_repo("..", "r").validate().is_err());
        assert!(with_repo("a\\b", "r").validate().is_err());

        let err = with_repo("proj", "release/v1").validate().unwrap_err();
        assert!(err.to_string().contains("release/v1"), "{}", err);
        assert!(with_repo("proj", "../../../tmp/pwn").validate().is_err());
        assert!(with_repo("proj", "..").validate().is_err());
    }
}
