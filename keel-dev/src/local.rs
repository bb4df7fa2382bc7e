//! The runner `keel dev` uses: prebuilt images, manifest deployers from
//! `keel.yaml`, and config-change detection by file digest.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use keel_core::{config, Artifact, DevOptions, Phase, PipelineConfig};
use keel_deploy::{ApplyDeployer, Deployer, DeployerMux, ManifestSources, StaticLabels};
use keel_event::StateStore;

use crate::error::{io_err, DevError};
use crate::runner::{ArtifactBuilder, PipelineRunner, PrebuiltBuilder, RunnerFactory};
use crate::trigger::{ChangeProbe, Intent};

/// SHA-256 of the config file's bytes.
pub fn config_digest(path: &Path) -> Result<String, DevError> {
    let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

pub struct LocalRunnerFactory {
    config_path: PathBuf,
    options: DevOptions,
}

impl LocalRunnerFactory {
    pub fn new(config_path: impl Into<PathBuf>, options: DevOptions) -> Self {
        Self {
            config_path: config_path.into(),
            options,
        }
    }
}

impl RunnerFactory for LocalRunnerFactory {
    fn create(&self, store: &StateStore) -> Result<Box<dyn PipelineRunner>, DevError> {
        let runner = LocalRunner::load(&self.config_path, self.options.clone(), store.clone())?;
        Ok(Box::new(runner))
    }
}

pub struct LocalRunner {
    config_path: PathBuf,
    config_digest: String,
    config: PipelineConfig,
    options: DevOptions,
    builder: Arc<PrebuiltBuilder>,
    deployer: Arc<DeployerMux>,
    artifacts: Vec<Artifact>,
    iterations: u64,
    has_built: bool,
    has_deployed: bool,
}

impl LocalRunner {
    pub fn load(config_path: &Path, options: DevOptions, store: StateStore) -> Result<Self, DevError> {
        let digest = config_digest(config_path)?;
        let config = config::load_at(config_path)?;
        let deployers = config
            .deploy
            .iter()
            .map(|deploy| {
                Box::new(ApplyDeployer::from_config(&config, deploy, store.clone()))
                    as Box<dyn Deployer>
            })
            .collect();
        tracing::info!(
            config = %config_path.display(),
            artifacts = config.artifacts.len(),
            deployers = config.deploy.len(),
            "pipeline loaded"
        );
        Ok(Self {
            config_path: config_path.to_path_buf(),
            config_digest: digest,
            config,
            options,
            builder: Arc::new(PrebuiltBuilder),
            deployer: Arc::new(DeployerMux::new(deployers)),
            artifacts: Vec::new(),
            iterations: 0,
            has_built: false,
            has_deployed: false,
        })
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    fn config_changed(&self) -> bool {
        match config_digest(&self.config_path) {
            Ok(digest) => digest != self.config_digest,
            Err(err) => {
                tracing::warn!(error = %err, "config unreadable; treating as changed");
                true
            }
        }
    }

    async fn build(&mut self, store: &StateStore) -> Result<(), DevError> {
        store.reset_for_new_build();
        self.has_built = true;

        for artifact in &self.config.artifacts {
            if self.iterations > 1 && !self.options.is_watched(&artifact.image) {
                tracing::debug!(image = %artifact.image, "not watched; keeping previous build");
                continue;
            }

            store.build_in_progress(&artifact.image);
            let builder = self.builder.clone();
            let config = artifact.clone();
            let built = tokio::task::spawn_blocking(move || builder.build(&config))
                .await
                .map_err(|err| DevError::Protocol(format!("build task join failure: {err}")))?;

            match built {
                Ok(built) => {
                    store.build_complete(&artifact.image);
                    tracing::info!(image = %built.image_name, tag = %built.tag, "built");
                    match self
                        .artifacts
                        .iter_mut()
                        .find(|a| a.image_name == built.image_name)
                    {
                        Some(existing) => *existing = built,
                        None => self.artifacts.push(built),
                    }
                }
                Err(err) => {
                    store.build_failed(&artifact.image, &err);
                    return Err(DevError::Phase {
                        phase: Phase::Build,
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn deploy(&mut self, store: &StateStore, built: bool) -> Result<(), DevError> {
        if !built {
            store.reset_for_new_deploy();
        }
        self.has_deployed = true;

        let deployer = self.deployer.clone();
        let artifacts = self.artifacts.clone();
        let result = tokio::task::spawn_blocking(move || {
            let labels = StaticLabels::managed_by();
            deployer.deploy(&artifacts, &[&labels])
        })
        .await
        .map_err(|err| DevError::Protocol(format!("deploy task join failure: {err}")))?;

        match result {
            Ok(result) => {
                tracing::info!(namespaces = ?result.namespaces, "deployed");
                Ok(())
            }
            Err(err) => Err(DevError::Phase {
                phase: Phase::Deploy,
                message: err.to_string(),
            }),
        }
    }
}

#[async_trait]
impl PipelineRunner for LocalRunner {
    async fn run_iteration(&mut self, intent: Intent, store: &StateStore) -> Result<(), DevError> {
        if self.iterations > 0 && self.config_changed() {
            return Err(DevError::ConfigurationChanged);
        }
        self.iterations += 1;

        if intent.build {
            self.build(store).await?;
        }
        if intent.sync {
            tracing::debug!("no file sync configured");
        }
        if intent.deploy {
            self.deploy(store, intent.build).await?;
        }
        Ok(())
    }

    fn deployer(&self) -> Option<Arc<dyn Deployer>> {
        self.has_deployed
            .then(|| self.deployer.clone() as Arc<dyn Deployer>)
    }

    fn builder(&self) -> Option<Arc<dyn ArtifactBuilder>> {
        self.has_built
            .then(|| self.builder.clone() as Arc<dyn ArtifactBuilder>)
    }
}

/// Fingerprints the config file and every manifest file it names.
pub struct InputProbe {
    config_path: PathBuf,
}

impl InputProbe {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }
}

impl ChangeProbe for InputProbe {
    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        match std::fs::read(&self.config_path) {
            Ok(bytes) => hasher.update(&bytes),
            Err(_) => hasher.update(b"<missing>"),
        }

        if let Ok(config) = config::load_at(&self.config_path) {
            for deploy in &config.deploy {
                let sources = ManifestSources::new(
                    deploy.manifests.iter().map(|p| config.resolve(p)).collect(),
                );
                let Ok(files) = sources.files() else {
                    hasher.update(b"<unreadable>");
                    continue;
                };
                for file in files {
                    hasher.update(file.to_string_lossy().as_bytes());
                    if let Ok(bytes) = std::fs::read(&file) {
                        hasher.update(&bytes);
                    }
                }
            }
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use keel_core::{AutoTriggers, Status};
    use tempfile::TempDir;

    use super::*;

    const CONFIG: &str = "artifacts:
  - image: web
    tag: web:v1
deploy:
  - manifests: [k8s]
    target: applied
    default_namespace: dev
";

    const MANIFEST: &str = "kind: Deployment
metadata:
  name: web
spec:
  template:
    spec:
      containers:
      - image: web
";

    fn project() -> TempDir {
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir(dir.path().join("k8s")).expect("k8s dir");
        fs::write(dir.path().join("k8s/web.yaml"), MANIFEST).expect("manifest");
        fs::write(dir.path().join("keel.yaml"), CONFIG).expect("config");
        dir
    }

    fn store() -> StateStore {
        StateStore::new(["web"], AutoTriggers::default())
    }

    #[tokio::test]
    async fn full_iteration_builds_and_deploys() {
        let dir = project();
        let store = store();
        let mut runner =
            LocalRunner::load(&dir.path().join("keel.yaml"), DevOptions::default(), store.clone())
                .expect("load");
        assert!(runner.deployer().is_none());
        assert!(runner.builder().is_none());

        runner.run_iteration(Intent::all(), &store).await.expect("iteration");

        let state = store.snapshot();
        assert_eq!(state.build.artifacts["web"], Status::Complete);
        assert_eq!(state.deploy.status, Status::Complete);
        let applied = fs::read_to_string(dir.path().join("applied/dev/deployment--web.yaml"))
            .expect("applied manifest");
        assert!(applied.contains("image: web:v1"));
        assert!(applied.contains("app.kubernetes.io/managed-by: keel"));
        assert!(runner.deployer().is_some());
        assert!(runner.builder().is_some());
    }

    #[tokio::test]
    async fn config_edit_reports_configuration_changed() {
        let dir = project();
        let config_path = dir.path().join("keel.yaml");
        let store = store();
        let mut runner =
            LocalRunner::load(&config_path, DevOptions::default(), store.clone()).expect("load");
        runner.run_iteration(Intent::all(), &store).await.expect("first");

        fs::write(&config_path, CONFIG.replace("web:v1", "web:v2")).expect("edit config");
        let err = runner.run_iteration(Intent::all(), &store).await.unwrap_err();
        assert!(matches!(err, DevError::ConfigurationChanged), "got: {err}");
    }

    #[tokio::test]
    async fn deploy_failure_is_a_phase_error() {
        let dir = project();
        fs::write(dir.path().join("k8s/web.yaml"), "kind: [unclosed").expect("corrupt");
        let store = store();
        let mut runner =
            LocalRunner::load(&dir.path().join("keel.yaml"), DevOptions::default(), store.clone())
                .expect("load");

        let err = runner.run_iteration(Intent::all(), &store).await.unwrap_err();
        assert!(
            matches!(err, DevError::Phase { phase: Phase::Deploy, .. }),
            "got: {err}"
        );
        assert_eq!(store.snapshot().deploy.status, Status::Failed);
        assert!(runner.deployer().is_some(), "a failed deploy still needs cleanup");
    }

    #[tokio::test]
    async fn unwatched_artifacts_are_skipped_after_first_iteration() {
        let dir = project();
        let store = store();
        let options = DevOptions {
            watch_images: vec!["api".to_string()],
            ..DevOptions::default()
        };
        let mut runner =
            LocalRunner::load(&dir.path().join("keel.yaml"), options, store.clone()).expect("load");

        runner.run_iteration(Intent::all(), &store).await.expect("first");
        assert_eq!(store.snapshot().build.artifacts["web"], Status::Complete);

        let build = Intent::for_phase("build").expect("build");
        runner.run_iteration(build, &store).await.expect("second");
        assert_eq!(store.snapshot().build.artifacts["web"], Status::NotStarted);
        assert_eq!(runner.artifacts(), &[Artifact::new("web", "web:v1")]);
    }

    #[test]
    fn probe_tracks_config_and_manifests() {
        let dir = project();
        let probe = InputProbe::new(dir.path().join("keel.yaml"));
        let first = probe.fingerprint();
        assert_eq!(first, probe.fingerprint());

        fs::write(dir.path().join("k8s/extra.yml"), "kind: ConfigMap\n").expect("manifest");
        let second = probe.fingerprint();
        assert_ne!(first, second);

        fs::write(dir.path().join("k8s/notes.txt"), "ignored").expect("notes");
        assert_eq!(second, probe.fingerprint());
    }

    #[test]
    fn factory_surfaces_missing_config() {
        let dir = TempDir::new().expect("tempdir");
        let factory = LocalRunnerFactory::new(dir.path().join("keel.yaml"), DevOptions::default());
        assert!(matches!(factory.create(&store()), Err(DevError::Io { .. })));
    }
}
