//! The seams the dev loop drives: runners, their factory, and builders.

use std::sync::Arc;

use async_trait::async_trait;

use keel_core::{Artifact, ArtifactConfig};
use keel_deploy::Deployer;
use keel_event::StateStore;

use crate::error::DevError;
use crate::trigger::Intent;

/// Produces images for configured artifacts.
///
/// Calls are blocking; runners invoke them off the async executor.
pub trait ArtifactBuilder: Send + Sync {
    fn build(&self, artifact: &ArtifactConfig) -> Result<Artifact, DevError>;

    /// Remove images this builder produced.
    fn prune(&self) -> Result<(), DevError>;
}

/// A builder for images that already exist: each artifact resolves to its
/// configured tag, or `<image>:latest`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrebuiltBuilder;

impl ArtifactBuilder for PrebuiltBuilder {
    fn build(&self, artifact: &ArtifactConfig) -> Result<Artifact, DevError> {
        let tag = artifact.resolved_tag().map_err(|err| DevError::Build {
            image: artifact.image.clone(),
            reason: err.to_string(),
        })?;
        Ok(Artifact::new(artifact.image.clone(), tag))
    }

    fn prune(&self) -> Result<(), DevError> {
        tracing::debug!("prebuilt images are never pruned");
        Ok(())
    }
}

/// One pipeline built from one version of the configuration.
#[async_trait]
pub trait PipelineRunner: Send {
    /// Run the phases `intent` asks for.
    ///
    /// Returns [`DevError::ConfigurationChanged`] when the configuration
    /// this runner was built from is stale, and [`DevError::Phase`] when a
    /// phase failed.
    async fn run_iteration(&mut self, intent: Intent, store: &StateStore) -> Result<(), DevError>;

    /// The deployer, once this runner has deployed something.
    fn deployer(&self) -> Option<Arc<dyn Deployer>>;

    /// The builder, once this runner has built something.
    fn builder(&self) -> Option<Arc<dyn ArtifactBuilder>>;
}

/// Builds a fresh runner from the current configuration.
pub trait RunnerFactory: Send + Sync {
    fn create(&self, store: &StateStore) -> Result<Box<dyn PipelineRunner>, DevError>;
}
