use std::path::PathBuf;

use thiserror::Error;

use keel_core::{ConfigError, Phase};
use keel_deploy::DeployError;

/// Error surface for the dev loop, its runtime and the control protocol.
#[derive(Debug, Error)]
pub enum DevError {
    /// The pipeline configuration changed; the runner must be rebuilt.
    #[error("configuration changed")]
    ConfigurationChanged,

    /// A pipeline phase failed. The failure is already recorded in the
    /// state store; the dev loop keeps running.
    #[error("{phase} failed: {message}")]
    Phase { phase: Phase, message: String },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("deploy error: {0}")]
    Deploy(#[from] DeployError),

    #[error("build of {image} failed: {reason}")]
    Build { image: String, reason: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("dev protocol error: {0}")]
    Protocol(String),

    #[error("dev session is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

impl DevError {
    /// Whether the dev loop survives this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DevError::Phase { .. } | DevError::ConfigurationChanged)
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DevError {
    DevError::Io {
        path: path.into(),
        source,
    }
}
