//! Pipeline tests with a scripted command runner standing in for git and
//! the indexer.

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use codeintel_bundles::config::{parse_config, Config};
use codeintel_bundles::error::{PipelineError, Result};
use codeintel_bundles::models::{BundleId, RevisionTask};
use codeintel_bundles::pipeline::Pipeline;
use codeintel_bundles::progress::{Outcome, Phase, ProgressEvent, ProgressReporter};
use codeintel_bundles::runner::CommandRunner;
use codeintel_bundles::upload::Uploader;

#[derive(Debug, Clone)]
struct Call {
    dir: Option<PathBuf>,
    program: String,
    args: Vec<String>,
}

/// Clones create the target directory, the indexer writes its output file.
/// Any command whose arguments contain a `fail_on` needle exits non-zero.
#[derive(Default)]
struct ScriptedRunner {
    calls: Mutex<Vec<Call>>,
    fail_on: Vec<String>,
    slow_on: Vec<String>,
}

impl ScriptedRunner {
    fn failing(needles: &[&str]) -> Self {
        Self {
            fail_on: needles.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    fn calls_to(&self, program: &str, first_arg: &str) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.program == program && c.args.first().map(String::as_str) == Some(first_arg))
            .cloned()
            .collect()
    }

    fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, dir: Option<&Path>, program: &str, args: &[String]) -> Result<()> {
        self.calls.lock().unwrap().push(Call {
            dir: dir.map(Path::to_path_buf),
            program: program.to_string(),
            args: args.to_vec(),
        });

        let joined = args.join(" ");
        if self.slow_on.iter().any(|n| joined.contains(n.as_str())) {
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        if self.fail_on.iter().any(|n| joined.contains(n.as_str())) {
            return Err(PipelineError::Command {
                command: format!("{} {}", program, joined),
                output: "exit status 1".to_string(),
            });
        }

        match (program, args.first().map(String::as_str)) {
            ("git", Some("clone")) => {
                let dir = dir.expect("clone runs in repos dir");
                fs::create_dir_all(dir.join(&args[2]).join(".git")).unwrap();
                fs::write(dir.join(&args[2]).join("go.mod"), "module x\n").unwrap();
            }
            ("lsif-go", _) => {
                let out = args.last().unwrap();
                fs::write(out, "{\"label\":\"metaData\"}\n").unwrap();
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingUploader {
    uploads: Mutex<Vec<(RevisionTask, PathBuf)>>,
}

#[async_trait]
impl Uploader for RecordingUploader {
    async fn upload(&self, task: &RevisionTask, artifact: &Path) -> Result<()> {
        assert!(artifact.exists(), "uploading missing artifact {}", artifact.display());
        self.uploads
            .lock()
            .unwrap()
            .push((task.clone(), artifact.to_path_buf()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn config(root: &Path, repos: &str) -> Config {
    let mut config = parse_config(&format!(
        "[bundle_manager]\nurl = \"http://127.0.0.1:9\"\n{}",
        repos
    ))
    .unwrap();
    config.paths.repos_dir = root.join("repos");
    config.paths.indexes_dir = root.join("indexes");
    config.paths.workspace_dir = root.join("work");
    config.validate().unwrap();
    config
}

const TWO_REPOS: &str = r#"
[[repos]]
owner = "a"
name = "x"
revs = ["r1"]

[[repos]]
owner = "b"
name = "y"
revs = ["r1", "r2"]
"#;

fn pipeline(config: &Config, runner: &Arc<ScriptedRunner>, uploader: &Arc<RecordingUploader>) -> Pipeline {
    Pipeline::new(config, runner.clone(), uploader.clone())
}

#[tokio::test]
async fn clone_runs_only_for_missing_directories() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path(), TWO_REPOS);
    fs::create_dir_all(tmp.path().join("repos/y")).unwrap();

    let runner = Arc::new(ScriptedRunner::default());
    let uploader = Arc::new(RecordingUploader::default());
    let pipeline = pipeline(&config, &runner, &uploader);

    pipeline.clone_all().await.unwrap();
    let clones = runner.calls_to("git", "clone");
    assert_eq!(clones.len(), 1);
    assert_eq!(clones[0].dir.as_deref(), Some(tmp.path().join("repos").as_path()));
    assert_eq!(clones[0].args, vec!["clone", "https://github.com/a/x.git", "x"]);

    pipeline.clone_all().await.unwrap();
    assert_eq!(runner.calls_to("git", "clone").len(), 1);
}

#[tokio::test]
async fn existing_artifact_skips_every_subprocess() {
    let tmp = TempDir::new().unwrap();
    let config = config(
        tmp.path(),
        "[[repos]]\nowner = \"a\"\nname = \"x\"\nrevs = [\"r1\"]\n",
    );
    fs::create_dir_all(tmp.path().join("repos/x")).unwrap();
    fs::create_dir_all(tmp.path().join("indexes")).unwrap();
    fs::write(tmp.path().join("indexes/x.r1.dump"), "{}").unwrap();

    let runner = Arc::new(ScriptedRunner::default());
    let uploader = Arc::new(RecordingUploader::default());
    let progress = Arc::new(RecordingProgress::default());
    let pipeline = pipeline(&config, &runner, &uploader).with_progress(progress.clone());

    pipeline.index_all().await.unwrap();
    assert_eq!(runner.count(), 0);
    assert!(!tmp.path().join("work").exists());

    let events = progress.events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Finished {
            phase: Phase::Index,
            outcome: Outcome::Skipped,
            n: 1,
            total: 1,
            ..
        }
    )));
}

#[tokio::test]
async fn full_run_indexes_in_workspaces_and_uploads_everything() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path(), TWO_REPOS);

    let runner = Arc::new(ScriptedRunner::default());
    let uploader = Arc::new(RecordingUploader::default());
    pipeline(&config, &runner, &uploader).run().await.unwrap();

    for name in ["x.r1.dump", "y.r1.dump", "y.r2.dump"] {
        assert!(tmp.path().join("indexes").join(name).exists(), "{} missing", name);
    }
    assert_eq!(fs::read_dir(tmp.path().join("indexes")).unwrap().count(), 3);
    assert_eq!(fs::read_dir(tmp.path().join("work")).unwrap().count(), 0);

    // Every checkout ran inside a workspace, never in the shared clone.
    let checkouts = runner.calls_to("git", "checkout");
    assert_eq!(checkouts.len(), 3);
    for call in &checkouts {
        let dir = call.dir.as_ref().unwrap();
        assert!(dir.starts_with(tmp.path().join("work")), "{}", dir.display());
    }
    assert_eq!(runner.calls_to("go", "mod").len(), 3);

    let mut uploads: Vec<_> = uploader
        .uploads
        .lock()
        .unwrap()
        .iter()
        .map(|(t, _)| (t.slug(), t.rev.clone(), t.bundle_id))
        .collect();
    uploads.sort();
    assert_eq!(
        uploads,
        vec![
            ("a/x".to_string(), "r1".to_string(), BundleId(1)),
            ("b/y".to_string(), "r1".to_string(), BundleId(2)),
            ("b/y".to_string(), "r2".to_string(), BundleId(3)),
        ]
    );
}

#[tokio::test]
async fn failed_revision_stops_before_upload() {
    let tmp = TempDir::new().unwrap();
    let config = config(
        tmp.path(),
        "[[repos]]\nowner = \"org\"\nname = \"proj\"\nrevs = [\"r1\", \"r2\"]\n",
    );

    let runner = Arc::new(ScriptedRunner::failing(&[".proj.r2.dump.tmp-"]));
    let uploader = Arc::new(RecordingUploader::default());
    let err = pipeline(&config, &runner, &uploader).run().await.unwrap_err();

    assert_eq!(err.item(), Some("org/proj@r2"));
    assert!(err.to_string().contains("proj@r2"), "{}", err);

    let indexes = tmp.path().join("indexes");
    assert!(indexes.join("proj.r1.dump").exists());
    assert!(!indexes.join("proj.r2.dump").exists());
    assert_eq!(fs::read_dir(&indexes).unwrap().count(), 1);
    assert_eq!(fs::read_dir(tmp.path().join("work")).unwrap().count(), 0);
    assert!(uploader.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn a_failed_clone_waits_for_its_siblings() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path(), TWO_REPOS);

    let runner = Arc::new(ScriptedRunner {
        fail_on: vec!["a/x.git".to_string()],
        slow_on: vec!["b/y.git".to_string()],
        ..ScriptedRunner::default()
    });
    let uploader = Arc::new(RecordingUploader::default());
    let err = pipeline(&config, &runner, &uploader).clone_all().await.unwrap_err();

    assert_eq!(err.item(), Some("a/x"));
    assert!(tmp.path().join("repos/y/.git").exists());
    assert!(!tmp.path().join("repos/x").exists());
}

#[tokio::test]
async fn missing_artifact_fails_upload() {
    let tmp = TempDir::new().unwrap();
    let config = config(
        tmp.path(),
        "[[repos]]\nowner = \"a\"\nname = \"x\"\nrevs = [\"r1\"]\n",
    );
    let client = Arc::new(NeverCalled);
    let uploader: Arc<dyn Uploader> = Arc::new(codeintel_bundles::upload::BundleUploader::new(client));
    let runner = Arc::new(ScriptedRunner::default());
    let pipeline = Pipeline::new(&config, runner, uploader);

    let err = pipeline.upload_all().await.unwrap_err();
    assert_eq!(err.item(), Some("a/x@r1"));
    match err {
        PipelineError::Item { source, .. } => {
            assert!(matches!(*source, PipelineError::MissingArtifact(_)))
        }
        other => panic!("unexpected error {other}"),
    }
}

struct NeverCalled;

#[async_trait]
impl codeintel_bundles::client::Client for NeverCalled {
    async fn send_upload(
        &self,
        _: BundleId,
        _: codeintel_bundles::client::ByteStream,
    ) -> std::result::Result<(), codeintel_bundles::error::ClientError> {
        panic!("no artifact, no upload")
    }
    async fn get_upload(
        &self,
        _: BundleId,
        _: &Path,
    ) -> std::result::Result<PathBuf, codeintel_bundles::error::ClientError> {
        unreachable!()
    }
    async fn send_db(
        &self,
        _: BundleId,
        _: codeintel_bundles::client::ByteStream,
    ) -> std::result::Result<(), codeintel_bundles::error::ClientError> {
        unreachable!()
    }
    async fn query_bundle(
        &self,
        _: BundleId,
        _: &str,
        _: &codeintel_bundles::client::QueryParams,
    ) -> std::result::Result<serde_json::Value, codeintel_bundles::error::ClientError> {
        unreachable!()
    }
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_directories_fail_instead_of_counting_as_absent() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    let locked = tmp.path().join("locked");
    fs::create_dir_all(&locked).unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(&locked).is_ok() {
        // Privileged users bypass permission bits.
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let mut config = config(
        tmp.path(),
        "[[repos]]\nowner = \"a\"\nname = \"x\"\nrevs = [\"r1\"]\n",
    );
    config.paths.repos_dir = locked.clone();
    config.paths.indexes_dir = locked.clone();

    let runner = Arc::new(ScriptedRunner::default());
    let uploader = Arc::new(RecordingUploader::default());
    let pipeline = pipeline(&config, &runner, &uploader);

    let clone_err = pipeline.clone_all().await.unwrap_err();
    let index_err = pipeline.index_all().await.unwrap_err();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    for (err, item) in [(clone_err, "a/x"), (index_err, "a/x@r1")] {
        assert_eq!(err.item(), Some(item));
        match err {
            PipelineError::Item { source, .. } => match *source {
                PipelineError::Io { source, .. } => {
                    assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied)
                }
                other => panic!("unexpected error {other}"),
            },
            other => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(runner.count(), 0);
    assert!(!tmp.path().join("work").exists());
}
