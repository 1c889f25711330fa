use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::pipeline::naming::{background_removed_target, final_composite_target, NamingError};
use crate::pipeline::outcome::interpret_outcome;
use crate::pipeline::runtime::{CommandSpec, SharedProcessInvoker};
use crate::settings::{AppSettings, GenerateMode, RoutineSettings};
use crate::storage::{ArtifactStore, ArtifactStoreError};

pub const MISSING_UPLOAD_MESSAGE: &str = "No image uploaded.";
pub const MISSING_IMAGE_URL_MESSAGE: &str = "Missing image URL.";
pub const NOT_BACKGROUND_REMOVED_MESSAGE: &str = "Image is not a background-removed artifact.";
pub const IMAGE_NOT_FOUND_MESSAGE: &str = "Image not found.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOperation {
    RemoveBackground,
    GenerateScene,
}

impl JobOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RemoveBackground => "remove_background",
            Self::GenerateScene => "generate_scene",
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    /// Missing or malformed input; nothing was spawned.
    #[error("{0}")]
    BadRequest(String),
    /// The referenced artifact is not in the store; nothing was spawned.
    #[error("{0}")]
    NotFound(String),
    #[error("external routine failed (exit code {exit_code:?}): {stderr}")]
    ProcessingFailed {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("artifact store error: {0}")]
    Storage(#[from] ArtifactStoreError),
}

/// Runs the two jobs of the request layer. Each call is one attempt and
/// spawns at most one process; nothing is retried or cached.
#[derive(Clone)]
pub struct JobOrchestrator {
    store: ArtifactStore,
    invoker: SharedProcessInvoker,
    remove_background: RoutineSettings,
    generate_scene: RoutineSettings,
    generate_mode: GenerateMode,
    echo_delay: Duration,
    default_prompt: String,
}

impl JobOrchestrator {
    pub fn new(store: ArtifactStore, invoker: SharedProcessInvoker, settings: &AppSettings) -> Self {
        Self {
            store,
            invoker,
            remove_background: settings.remove_background.clone(),
            generate_scene: settings.generate_scene.routine(),
            generate_mode: settings.generate_scene.mode,
            echo_delay: settings.generate_scene.echo_delay(),
            default_prompt: settings.default_prompt.clone(),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn generate_mode(&self) -> GenerateMode {
        self.generate_mode
    }

    pub async fn remove_background(
        &self,
        upload: Option<UploadedFile>,
        base_url: &Url,
    ) -> Result<String, JobError> {
        let job_id = Uuid::new_v4();
        let Some(upload) = upload else {
            return Err(JobError::BadRequest(String::from(MISSING_UPLOAD_MESSAGE)));
        };

        let stored = self
            .store
            .put(upload.bytes.as_slice(), upload.file_name.as_str())
            .await?;
        let target = background_removed_target(stored.as_path())
            .map_err(|error| JobError::BadRequest(error.to_string()))?;
        info!(
            %job_id,
            operation = JobOperation::RemoveBackground.as_str(),
            input = %stored.display(),
            "job started"
        );

        let spec = command_for(
            &self.remove_background,
            [stored.to_string_lossy().to_string()],
        );
        self.run(job_id, &self.remove_background, &spec, target.derived_path.as_path(), base_url)
            .await
    }

    pub async fn generate_scene(
        &self,
        image_url: Option<&str>,
        prompt: Option<&str>,
        base_url: &Url,
    ) -> Result<String, JobError> {
        let job_id = Uuid::new_v4();
        let Some(image_url) = image_url.map(str::trim).filter(|v| !v.is_empty()) else {
            return Err(JobError::BadRequest(String::from(MISSING_IMAGE_URL_MESSAGE)));
        };
        let clean_url = strip_query(image_url);

        let file_name = clean_url.rsplit('/').next().unwrap_or_default();
        let source = Path::new(file_name);
        final_composite_target(source).map_err(|error| match error {
            NamingError::NotBackgroundRemoved(_) | NamingError::NoFileName(_) => {
                JobError::BadRequest(String::from(NOT_BACKGROUND_REMOVED_MESSAGE))
            }
        })?;
        let local = self.store.resolve(file_name).map_err(|error| match error {
            ArtifactStoreError::NotFound(_) => {
                JobError::NotFound(String::from(IMAGE_NOT_FOUND_MESSAGE))
            }
            ArtifactStoreError::InvalidName(_) => {
                JobError::BadRequest(String::from(NOT_BACKGROUND_REMOVED_MESSAGE))
            }
            other => JobError::Storage(other),
        })?;
        let target = final_composite_target(local.as_path())
            .map_err(|error| JobError::BadRequest(error.to_string()))?;

        if self.generate_mode == GenerateMode::Echo {
            warn!(
                %job_id,
                delay_ms = self.echo_delay.as_millis() as u64,
                "scene generation is in echo mode; returning the input image"
            );
            tokio::time::sleep(self.echo_delay).await;
            return Ok(clean_url.to_string());
        }

        let prompt = prompt
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(self.default_prompt.as_str());
        info!(
            %job_id,
            operation = JobOperation::GenerateScene.as_str(),
            input = %local.display(),
            prompt,
            "job started"
        );

        let spec = command_for(
            &self.generate_scene,
            [local.to_string_lossy().to_string(), prompt.to_string()],
        );
        self.run(job_id, &self.generate_scene, &spec, target.derived_path.as_path(), base_url)
            .await
    }

    async fn run(
        &self,
        job_id: Uuid,
        routine: &RoutineSettings,
        spec: &CommandSpec,
        expected: &Path,
        base_url: &Url,
    ) -> Result<String, JobError> {
        let outcome = match self.invoker.invoke(spec).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(%job_id, program = %spec.program, error = %error, "routine could not be spawned");
                return Err(JobError::ProcessingFailed {
                    exit_code: None,
                    stderr: error.to_string(),
                });
            }
        };

        match interpret_outcome(&outcome, routine.convention, expected, &self.store) {
            Ok(artifact) => {
                let url = self.store.url_for(artifact.as_path(), base_url)?;
                info!(%job_id, artifact = %artifact.display(), "job succeeded");
                Ok(url.to_string())
            }
            Err(failure) => {
                warn!(
                    %job_id,
                    program = %spec.program,
                    exit_code = ?failure.exit_code,
                    convention = routine.convention.as_str(),
                    details = %failure.details,
                    "job failed"
                );
                Err(JobError::ProcessingFailed {
                    exit_code: failure.exit_code,
                    stderr: failure.details,
                })
            }
        }
    }
}

fn command_for<const N: usize>(routine: &RoutineSettings, job_args: [String; N]) -> CommandSpec {
    CommandSpec {
        program: routine.program.clone(),
        args: routine.args.iter().cloned().chain(job_args).collect(),
        cwd: routine.cwd.clone(),
    }
}

/// Drops the cache-buster query and any fragment.
pub fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::pipeline::outcome::ReportingConvention;
    use crate::pipeline::runtime::{InvokerError, ProcessInvoker, ProcessOutcome};

    enum Script {
        /// Writes the predicted artifact and exits 0.
        Succeed,
        /// Exits 1 with the given stderr.
        Fail(String),
        /// The program cannot be started at all.
        SpawnError,
    }

    struct ScriptedInvoker {
        seen: Mutex<Vec<CommandSpec>>,
        script: Script,
    }

    impl ScriptedInvoker {
        fn with(script: Script) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                script,
            }
        }

        fn succeeding() -> Self {
            Self::with(Script::Succeed)
        }

        fn failing(stderr: &str) -> Self {
            Self::with(Script::Fail(String::from(stderr)))
        }

        fn seen(&self) -> Vec<CommandSpec> {
            self.seen.lock().expect("scripted invoker mutex poisoned").clone()
        }
    }

    #[async_trait]
    impl ProcessInvoker for ScriptedInvoker {
        async fn invoke(&self, spec: &CommandSpec) -> Result<ProcessOutcome, InvokerError> {
            self.seen
                .lock()
                .expect("scripted invoker mutex poisoned")
                .push(spec.clone());
            match &self.script {
                Script::Fail(stderr) => {
                    return Ok(ProcessOutcome {
                        exit_code: Some(1),
                        stdout: String::new(),
                        stderr: stderr.clone(),
                    })
                }
                Script::SpawnError => {
                    return Err(InvokerError::Spawn {
                        program: spec.program.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "No such file or directory",
                        ),
                    })
                }
                Script::Succeed => {}
            }
            let input = Path::new(spec.args[0].as_str());
            let output = match spec.args.len() {
                1 => background_removed_target(input).expect("removal target").derived_path,
                _ => final_composite_target(input).expect("composite target").derived_path,
            };
            std::fs::write(output.as_path(), b"png").expect("fake routine output");
            Ok(ProcessOutcome {
                exit_code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    fn orchestrator(invoker: Arc<ScriptedInvoker>, mode: GenerateMode) -> JobOrchestrator {
        let root = std::env::temp_dir().join(format!("adcraft_jobs_test_{}", Uuid::new_v4()));
        let mut settings = AppSettings::default();
        settings.remove_background.program = String::from("fake-remove");
        settings.remove_background.args = Vec::new();
        settings.remove_background.convention = ReportingConvention::FileExistence;
        settings.generate_scene.program = String::from("fake-generate");
        settings.generate_scene.args = Vec::new();
        settings.generate_scene.convention = ReportingConvention::FileExistence;
        settings.generate_scene.mode = mode;
        settings.generate_scene.echo_delay_ms = 5;
        JobOrchestrator::new(ArtifactStore::new(root), invoker, &settings)
    }

    fn base() -> Url {
        Url::parse("http://localhost:5000/").expect("base url")
    }

    fn upload(name: &str) -> Option<UploadedFile> {
        Some(UploadedFile {
            file_name: String::from(name),
            bytes: b"jpeg".to_vec(),
        })
    }

    #[test]
    fn strip_query_drops_cache_buster_and_fragment() {
        assert_eq!(strip_query("http://h/uploads/a_no_bg.png?t=123"), "http://h/uploads/a_no_bg.png");
        assert_eq!(strip_query("/uploads/a.png#top"), "/uploads/a.png");
        assert_eq!(strip_query("a.png"), "a.png");
    }

    #[tokio::test]
    async fn remove_background_returns_url_sharing_the_upload_token() {
        let invoker = Arc::new(ScriptedInvoker::succeeding());
        let jobs = orchestrator(invoker.clone(), GenerateMode::Process);

        let url = jobs
            .remove_background(upload("shoe.jpg"), &base())
            .await
            .expect("removal should succeed");

        let seen = invoker.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].program, "fake-remove");
        let stored = Path::new(seen[0].args[0].as_str());
        let stored_name = stored.file_name().and_then(|v| v.to_str()).expect("name");
        let token = stored_name.strip_suffix("_shoe.jpg").expect("stored name shape");
        assert!(token.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(url, format!("http://localhost:5000/uploads/{token}_shoe_no_bg.png"));
        let _ = std::fs::remove_dir_all(jobs.store().root());
    }

    #[tokio::test]
    async fn missing_upload_is_rejected_without_spawning() {
        let invoker = Arc::new(ScriptedInvoker::succeeding());
        let jobs = orchestrator(invoker.clone(), GenerateMode::Process);

        let err = jobs
            .remove_background(None, &base())
            .await
            .expect_err("missing upload must fail");
        assert!(matches!(err, JobError::BadRequest(ref m) if m == MISSING_UPLOAD_MESSAGE));
        assert!(invoker.seen().is_empty());
    }

    #[tokio::test]
    async fn malformed_generate_inputs_never_spawn() {
        for mode in [GenerateMode::Process, GenerateMode::Echo] {
            let invoker = Arc::new(ScriptedInvoker::succeeding());
            let jobs = orchestrator(invoker.clone(), mode);

            for (image_url, expected) in [
                (None, MISSING_IMAGE_URL_MESSAGE),
                (Some("   "), MISSING_IMAGE_URL_MESSAGE),
                (Some("http://h/uploads/169_shoe.jpg?t=1"), NOT_BACKGROUND_REMOVED_MESSAGE),
                (Some("http://h/uploads/169_shoe_final_ad.png"), NOT_BACKGROUND_REMOVED_MESSAGE),
                (Some("http://h/uploads/"), NOT_BACKGROUND_REMOVED_MESSAGE),
            ] {
                let err = jobs
                    .generate_scene(image_url, Some("beach"), &base())
                    .await
                    .expect_err("malformed input must fail");
                assert!(
                    matches!(err, JobError::BadRequest(ref m) if m == expected),
                    "{mode:?} {image_url:?} -> {err:?}"
                );
            }

            let err = jobs
                .generate_scene(Some("http://h/uploads/404_shoe_no_bg.png"), None, &base())
                .await
                .expect_err("unknown artifact must fail");
            assert!(matches!(err, JobError::NotFound(_)), "{mode:?} -> {err:?}");
            assert!(invoker.seen().is_empty());
        }
    }

    #[tokio::test]
    async fn upload_named_like_a_derived_artifact_cannot_skip_removal() {
        let invoker = Arc::new(ScriptedInvoker::succeeding());
        let jobs = orchestrator(invoker.clone(), GenerateMode::Process);
        let raw = jobs
            .store()
            .put(b"raw", "shoe_no_bg.png")
            .await
            .expect("put");
        let raw_name = raw.file_name().and_then(|v| v.to_str()).expect("name");
        assert!(!raw_name.ends_with("_no_bg.png"), "{raw_name}");

        let err = jobs
            .generate_scene(Some(format!("http://h/uploads/{raw_name}").as_str()), None, &base())
            .await
            .expect_err("raw upload is not background-removed");
        assert!(matches!(err, JobError::BadRequest(ref m) if m == NOT_BACKGROUND_REMOVED_MESSAGE));
        assert!(invoker.seen().is_empty());
        let _ = std::fs::remove_dir_all(jobs.store().root());
    }

    #[tokio::test]
    async fn generate_scene_defaults_prompt_and_repeats_independently() {
        let invoker = Arc::new(ScriptedInvoker::succeeding());
        let jobs = orchestrator(invoker.clone(), GenerateMode::Process);
        let removed = jobs
            .remove_background(upload("shoe.jpg"), &base())
            .await
            .expect("removal");
        let busted = format!("{removed}?t=123");

        let first = jobs
            .generate_scene(Some(busted.as_str()), Some("  "), &base())
            .await
            .expect("first generate");
        let second = jobs
            .generate_scene(Some(busted.as_str()), Some("  "), &base())
            .await
            .expect("second generate");

        assert!(first.ends_with("_shoe_final_ad.png"));
        assert_eq!(first, second);
        let seen = invoker.seen();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1].args[1], "studio lighting");
        assert_eq!(seen[2].args[1], "studio lighting");
        let _ = std::fs::remove_dir_all(jobs.store().root());
    }

    #[tokio::test]
    async fn routine_failure_surfaces_stderr_as_processing_failed() {
        let invoker = Arc::new(ScriptedInvoker::failing("model load error"));
        let jobs = orchestrator(invoker.clone(), GenerateMode::Process);

        let err = jobs
            .remove_background(upload("shoe.jpg"), &base())
            .await
            .expect_err("failing routine must fail the job");
        match err {
            JobError::ProcessingFailed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(1));
                assert_eq!(stderr, "model load error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let _ = std::fs::remove_dir_all(jobs.store().root());
    }

    #[tokio::test]
    async fn spawn_error_becomes_processing_failed_without_exit_code() {
        let invoker = Arc::new(ScriptedInvoker::with(Script::SpawnError));
        let jobs = orchestrator(invoker.clone(), GenerateMode::Process);

        let err = jobs
            .remove_background(upload("shoe.jpg"), &base())
            .await
            .expect_err("unstartable routine must fail the job");
        match err {
            JobError::ProcessingFailed { exit_code, stderr } => {
                assert_eq!(exit_code, None);
                assert!(stderr.contains("failed to spawn 'fake-remove'"), "{stderr}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(invoker.seen().len(), 1);
        let _ = std::fs::remove_dir_all(jobs.store().root());
    }

    #[tokio::test]
    async fn echo_mode_returns_input_without_spawning() {
        let invoker = Arc::new(ScriptedInvoker::succeeding());
        let jobs = orchestrator(invoker.clone(), GenerateMode::Echo);
        jobs.store().ensure_root().expect("store root");
        std::fs::write(jobs.store().root().join("1_a_no_bg.png"), b"png").expect("seed artifact");

        let url = jobs
            .generate_scene(Some("http://h/uploads/1_a_no_bg.png?t=9"), Some("beach"), &base())
            .await
            .expect("echo should succeed");
        assert_eq!(url, "http://h/uploads/1_a_no_bg.png");
        assert!(invoker.seen().is_empty());
        let _ = std::fs::remove_dir_all(jobs.store().root());
    }
}
