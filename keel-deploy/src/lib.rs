//! # keel-deploy
//!
//! Deployment coordination: manifest rendering, composite deployers and
//! diff-based apply.
//!
//! An [`ApplyDeployer`] renders manifest files (image substitution,
//! [`ManifestTransform`]s, labels) and hands the changed subset to an
//! [`ApplyTool`] through a [`DiffApplier`]. Several back ends are combined
//! with [`DeployerMux`]. [`diff::diff_against_target`] previews what an
//! apply into a [`DirectoryTarget`] would change.

pub mod apply;
pub mod deployer;
pub mod diff;
pub mod error;
pub mod manifest;
pub mod mux;
pub mod source;
pub mod target;
pub mod transform;

pub use apply::{ApplyDeployer, DiffApplier};
pub use deployer::{merge_labels, DeployResult, Deployer, Labeller, StaticLabels};
pub use error::DeployError;
pub use manifest::{Manifest, ManifestKey, ManifestSet};
pub use mux::DeployerMux;
pub use source::ManifestSources;
pub use target::{ApplyTool, DirectoryTarget, WriteResult};
pub use transform::{DefaultNamespace, ManifestTransform};
