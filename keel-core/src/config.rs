//! Pipeline configuration and dev-loop options.
//!
//! # File layout
//!
//! ```yaml
//! artifacts:
//!   - image: gcr.io/acme/api
//!     tag: gcr.io/acme/api:dev     # optional, defaults to :latest
//! deploy:
//!   - manifests: [k8s/]
//!     target: .keel/applied
//!     default_namespace: default   # optional
//!     labels: { team: payments }   # optional
//! ```
//!
//! Relative paths are resolved against the directory holding the config
//! file. The dev-loop options ([`DevOptions`]) come from the command line,
//! not from this file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::artifact::ImageRef;
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "keel.yaml";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// Pipeline config
// ---------------------------------------------------------------------------

/// An artifact entry: the image name manifests refer to, plus an optional
/// pre-resolved reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl ArtifactConfig {
    /// The reference the image resolves to when nothing overrides it.
    pub fn resolved_tag(&self) -> Result<String, crate::error::ImageRefError> {
        let reference = self.tag.as_deref().unwrap_or(&self.image);
        Ok(ImageRef::parse(reference)?.fully_qualified())
    }
}

/// One manifest-file deployment back end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Manifest files or directories.
    pub manifests: Vec<PathBuf>,
    /// Directory the rendered documents are applied into.
    pub target: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub artifacts: Vec<ArtifactConfig>,
    #[serde(default)]
    pub deploy: Vec<DeployConfig>,
    /// Directory relative paths resolve against; set on load.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl PipelineConfig {
    /// Resolve `path` against the config's base directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn image_names(&self) -> Vec<String> {
        self.artifacts.iter().map(|a| a.image.clone()).collect()
    }
}

/// Load a pipeline config from `path`.
///
/// Returns `ConfigError::NotFound` if absent and `ConfigError::Parse`
/// (with path + line context) if malformed YAML.
pub fn load_at(path: &Path) -> Result<PipelineConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: PipelineConfig =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    Ok(config)
}

// ---------------------------------------------------------------------------
// Dev-loop options
// ---------------------------------------------------------------------------

/// How a new iteration of the dev loop is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    Polling,
    #[default]
    Notify,
    Manual,
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerMode::Polling => write!(f, "polling"),
            TriggerMode::Notify => write!(f, "notify"),
            TriggerMode::Manual => write!(f, "manual"),
        }
    }
}

impl FromStr for TriggerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "polling" => Ok(TriggerMode::Polling),
            "notify" => Ok(TriggerMode::Notify),
            "manual" => Ok(TriggerMode::Manual),
            other => Err(ConfigError::Invalid {
                field: "trigger",
                reason: format!("unknown trigger '{other}'; expected: polling, notify, manual"),
            }),
        }
    }
}

/// Options for `keel dev`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevOptions {
    pub trigger: TriggerMode,
    pub auto_build: bool,
    pub auto_sync: bool,
    pub auto_deploy: bool,
    pub watch_poll_interval_ms: u64,
    /// Only artifacts whose image name contains one of these are rebuilt
    /// on later iterations. Empty means all.
    #[serde(default)]
    pub watch_images: Vec<String>,
    /// Undeploy on exit.
    pub cleanup: bool,
    /// Prune built images on exit.
    pub prune: bool,
}

impl Default for DevOptions {
    fn default() -> Self {
        Self {
            trigger: TriggerMode::default(),
            auto_build: true,
            auto_sync: true,
            auto_deploy: true,
            watch_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            watch_images: Vec::new(),
            cleanup: true,
            prune: true,
        }
    }
}

impl DevOptions {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.watch_poll_interval_ms.max(1))
    }

    /// Whether `image` passes the watch-image filter.
    pub fn is_watched(&self, image: &str) -> bool {
        self.watch_images.is_empty() || self.watch_images.iter().any(|expr| image.contains(expr))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
