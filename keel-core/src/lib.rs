//! keel core library: domain types, configuration, errors.
//!
//! - [`types`]: pipeline state and status enums
//! - [`artifact`]: built artifacts and image references
//! - [`config`]: `keel.yaml` and dev-loop options
//! - [`error`]: [`ConfigError`], [`ImageRefError`]

pub mod artifact;
pub mod config;
pub mod error;
pub mod types;

pub use artifact::{Artifact, ImageRef};
pub use config::{ArtifactConfig, DeployConfig, DevOptions, PipelineConfig, TriggerMode};
pub use error::{ConfigError, ImageRefError};
pub use types::{
    AutoTriggers, BuildState, DebuggingContainer, DeployState, FileSyncState, Phase,
    PipelineState, PortForward, Status, StatusCheckState,
};
