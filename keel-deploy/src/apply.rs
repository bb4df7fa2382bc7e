//! Diff-based apply and the manifest-file deployer built on it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use keel_core::{Artifact, DeployConfig, PipelineConfig};
use keel_event::StateStore;

use crate::deployer::{merge_labels, DeployResult, Deployer, Labeller, DEPLOYER_LABEL};
use crate::error::DeployError;
use crate::manifest::ManifestSet;
use crate::source::ManifestSources;
use crate::target::{ApplyTool, DirectoryTarget};
use crate::transform::{DefaultNamespace, ManifestTransform};

// ---------------------------------------------------------------------------
// DiffApplier
// ---------------------------------------------------------------------------

/// Sends an [`ApplyTool`] only the manifests that changed since the last
/// apply.
///
/// The baseline is replaced by every apply attempt, before the tool runs,
/// so a failed apply is not retried for unchanged manifests.
pub struct DiffApplier<T> {
    tool: T,
    previous_apply: Mutex<ManifestSet>,
}

impl<T: ApplyTool> DiffApplier<T> {
    pub fn new(tool: T) -> Self {
        Self {
            tool,
            previous_apply: Mutex::new(ManifestSet::new()),
        }
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }

    fn baseline(&self) -> MutexGuard<'_, ManifestSet> {
        self.previous_apply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply the new or changed subset of `manifests`. Returns how many
    /// documents were sent to the tool.
    pub fn apply(&self, manifests: &ManifestSet) -> Result<usize, DeployError> {
        let updated = {
            let mut previous = self.baseline();
            let updated = previous.diff(manifests);
            *previous = manifests.clone();
            updated
        };
        tracing::debug!(
            total = manifests.len(),
            updated = updated.len(),
            "manifests to deploy"
        );
        if updated.is_empty() {
            return Ok(0);
        }
        self.tool.apply(&updated)?;
        Ok(updated.len())
    }

    /// Delete `manifests` and forget the baseline.
    pub fn delete(&self, manifests: &ManifestSet) -> Result<(), DeployError> {
        self.tool.delete(manifests)?;
        self.reset();
        Ok(())
    }

    /// Forget the baseline; the next apply sends everything.
    pub fn reset(&self) {
        *self.baseline() = ManifestSet::new();
    }
}

// ---------------------------------------------------------------------------
// ApplyDeployer
// ---------------------------------------------------------------------------

/// Deploys manifest files through an [`ApplyTool`].
///
/// Render pipeline: read sources → substitute images → transforms →
/// labels.
pub struct ApplyDeployer<T> {
    sources: ManifestSources,
    transforms: Vec<Box<dyn ManifestTransform>>,
    labels: BTreeMap<String, String>,
    applier: DiffApplier<T>,
    store: StateStore,
}

impl<T: ApplyTool> ApplyDeployer<T> {
    pub fn new(sources: ManifestSources, tool: T, store: StateStore) -> Self {
        Self {
            sources,
            transforms: Vec::new(),
            labels: BTreeMap::from([(DEPLOYER_LABEL.to_string(), "apply".to_string())]),
            applier: DiffApplier::new(tool),
            store,
        }
    }

    pub fn with_transform(mut self, transform: impl ManifestTransform + 'static) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    /// Extra labels of this back end. They override the deployer label.
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels.extend(labels);
        self
    }

    pub fn applier(&self) -> &DiffApplier<T> {
        &self.applier
    }

    fn transformed(&self, artifacts: &[Artifact]) -> Result<ManifestSet, DeployError> {
        let mut manifests = self.sources.read()?;
        if manifests.is_empty() {
            return Ok(manifests);
        }
        manifests.replace_images(artifacts);
        for transform in &self.transforms {
            transform.transform(&mut manifests, artifacts)?;
        }
        Ok(manifests)
    }

    /// Rendered, labelled manifests.
    pub fn render_manifests(
        &self,
        artifacts: &[Artifact],
        labellers: &[&dyn Labeller],
    ) -> Result<ManifestSet, DeployError> {
        let mut manifests = self.transformed(artifacts)?;
        manifests.set_labels(&merge_labels(self.labels.clone(), labellers))?;
        Ok(manifests)
    }
}

impl ApplyDeployer<DirectoryTarget> {
    /// A deployer for one `deploy` entry of `keel.yaml`.
    pub fn from_config(config: &PipelineConfig, deploy: &DeployConfig, store: StateStore) -> Self {
        let sources = ManifestSources::new(
            deploy
                .manifests
                .iter()
                .map(|path| config.resolve(path))
                .collect(),
        );
        let target = DirectoryTarget::new(config.resolve(&deploy.target));
        let mut deployer = Self::new(sources, target, store).with_labels(deploy.labels.clone());
        if let Some(ns) = &deploy.default_namespace {
            deployer = deployer.with_transform(DefaultNamespace(ns.clone()));
        }
        deployer
    }
}

impl<T: ApplyTool> Deployer for ApplyDeployer<T> {
    fn labels(&self) -> BTreeMap<String, String> {
        self.labels.clone()
    }

    fn dependencies(&self) -> Result<Vec<PathBuf>, DeployError> {
        self.sources.files()
    }

    fn render(
        &self,
        artifacts: &[Artifact],
        labellers: &[&dyn Labeller],
    ) -> Result<String, DeployError> {
        self.render_manifests(artifacts, labellers)?.to_yaml()
    }

    fn deploy(
        &self,
        artifacts: &[Artifact],
        labellers: &[&dyn Labeller],
    ) -> Result<DeployResult, DeployError> {
        self.store.deploy_in_progress();

        let manifests = match self.render_manifests(artifacts, labellers) {
            Ok(manifests) => manifests,
            Err(err) => {
                self.store.deploy_failed(&err);
                return Err(err);
            }
        };

        if manifests.is_empty() {
            self.store.deploy_complete();
            return Ok(DeployResult::default());
        }

        let namespaces = manifests.collect_namespaces().unwrap_or_else(|err| {
            self.store.deploy_info(format!(
                "could not fetch deployed resource namespace. \
                 This might cause port-forward and health checks to fail: {err}"
            ));
            Vec::new()
        });

        match self.applier.apply(&manifests) {
            Ok(sent) => tracing::info!(sent, total = manifests.len(), "deploy complete"),
            Err(err) => {
                self.store.deploy_failed(&err);
                return Err(err);
            }
        }

        self.store.deploy_complete();
        Ok(DeployResult { namespaces })
    }

    fn cleanup(&self) -> Result<(), DeployError> {
        let manifests = self.transformed(&[])?;
        self.applier.delete(&manifests)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
