//! The deployer and labeller seams.

use std::collections::BTreeMap;
use std::path::PathBuf;

use keel_core::Artifact;

use crate::error::DeployError;

/// Label every deployed object carries so tooling can find it.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Label naming the back end that applied an object.
pub const DEPLOYER_LABEL: &str = "keel.dev/deployer";

/// Outcome of a successful deploy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployResult {
    /// Namespaces the deployed objects live in, sorted and deduplicated.
    pub namespaces: Vec<String>,
}

/// Contributes labels to rendered manifests.
pub trait Labeller: Send + Sync {
    fn labels(&self) -> BTreeMap<String, String>;
}

/// A deployment back end.
///
/// Implementations are shared between the dev loop and its shutdown path,
/// so every method takes `&self`; state that changes between calls lives
/// behind interior mutability.
pub trait Deployer: Send + Sync {
    /// Labels this back end adds to everything it deploys.
    fn labels(&self) -> BTreeMap<String, String>;

    /// Files whose change should trigger a redeploy.
    fn dependencies(&self) -> Result<Vec<PathBuf>, DeployError>;

    /// Render manifests for `artifacts` without deploying them.
    fn render(
        &self,
        artifacts: &[Artifact],
        labellers: &[&dyn Labeller],
    ) -> Result<String, DeployError>;

    fn deploy(
        &self,
        artifacts: &[Artifact],
        labellers: &[&dyn Labeller],
    ) -> Result<DeployResult, DeployError>;

    /// Remove what `deploy` created.
    fn cleanup(&self) -> Result<(), DeployError>;
}

/// A fixed set of labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticLabels(pub BTreeMap<String, String>);

impl StaticLabels {
    /// `app.kubernetes.io/managed-by: keel`.
    pub fn managed_by() -> Self {
        Self(BTreeMap::from([(
            MANAGED_BY_LABEL.to_string(),
            "keel".to_string(),
        )]))
    }
}

impl Labeller for StaticLabels {
    fn labels(&self) -> BTreeMap<String, String> {
        self.0.clone()
    }
}

/// Merge `own` with every labeller's labels. Later entries win.
pub fn merge_labels(
    own: BTreeMap<String, String>,
    labellers: &[&dyn Labeller],
) -> BTreeMap<String, String> {
    labellers.iter().fold(own, |mut merged, labeller| {
        merged.extend(labeller.labels());
        merged
    })
}
