//! Error types for keel-deploy.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while rendering, applying or cleaning up
/// manifests.
#[derive(Debug, Error)]
pub enum DeployError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A manifest path pattern that is not a valid glob.
    #[error("invalid manifest pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    /// Manifest text that is not valid YAML.
    #[error("failed to parse manifests from {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// A manifest document could not be printed back to YAML.
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] serde_yaml::Error),

    /// A document that parses but has the wrong shape.
    #[error("invalid manifest {key}: {reason}")]
    Manifest { key: String, reason: String },

    /// A manifest transform refused the set.
    #[error("transform '{name}' failed: {reason}")]
    Transform { name: &'static str, reason: String },

    /// The external apply tool reported a failure.
    #[error("apply tool error: {0}")]
    Tool(String),
}

/// Convenience constructor for [`DeployError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DeployError {
    DeployError::Io {
        path: path.into(),
        source,
    }
}
