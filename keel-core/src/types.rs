//! Domain types for pipeline status bookkeeping.
//!
//! Everything here is plain data: the state store in `keel-event` owns the
//! only mutable instance of [`PipelineState`] and hands out clones.
//! All types serialize with serde so a status API can marshal a snapshot
//! at any time.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a pipeline phase, an artifact build, or a checked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Status {
    #[default]
    #[serde(rename = "Not Started")]
    NotStarted,
    #[serde(rename = "In Progress")]
    InProgress,
    Complete,
    Failed,
    Succeeded,
    Started,
}

impl Status {
    /// `true` for `Complete`, `Succeeded` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Complete | Status::Succeeded | Status::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::NotStarted => write!(f, "Not Started"),
            Status::InProgress => write!(f, "In Progress"),
            Status::Complete => write!(f, "Complete"),
            Status::Failed => write!(f, "Failed"),
            Status::Succeeded => write!(f, "Succeeded"),
            Status::Started => write!(f, "Started"),
        }
    }
}

/// A pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Build,
    Sync,
    Deploy,
    StatusCheck,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Build => write!(f, "build"),
            Phase::Sync => write!(f, "sync"),
            Phase::Deploy => write!(f, "deploy"),
            Phase::StatusCheck => write!(f, "status-check"),
        }
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "build" => Ok(Phase::Build),
            "sync" => Ok(Phase::Sync),
            "deploy" => Ok(Phase::Deploy),
            "status-check" | "status_check" => Ok(Phase::StatusCheck),
            other => Err(format!(
                "unknown phase '{other}'; expected: build, sync, deploy, status-check"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-phase state
// ---------------------------------------------------------------------------

/// Build phase: one status per artifact image name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BuildState {
    #[serde(default)]
    pub artifacts: BTreeMap<String, Status>,
    pub auto_trigger: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeployState {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub auto_trigger: bool,
}

/// Health checking of deployed resources, keyed by `namespace:kind/name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StatusCheckState {
    pub status: Status,
    #[serde(default)]
    pub resources: BTreeMap<String, Status>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileSyncState {
    pub status: Status,
    pub auto_trigger: bool,
}

/// Metadata for one active port forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForward {
    pub local_port: u16,
    pub remote_port: u16,
    pub pod_name: String,
    pub container_name: String,
    pub namespace: String,
    pub port_name: String,
    pub resource_type: String,
    pub resource_name: String,
    pub address: String,
}

/// A container running under a language debugger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebuggingContainer {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
    pub artifact: String,
    pub runtime: String,
    pub working_dir: String,
    #[serde(default)]
    pub debug_ports: BTreeMap<String, u16>,
}

impl DebuggingContainer {
    /// Two records describe the same container when namespace, pod and
    /// container name agree.
    pub fn same_container(&self, other: &DebuggingContainer) -> bool {
        self.namespace == other.namespace
            && self.pod_name == other.pod_name
            && self.container_name == other.container_name
    }
}

/// Initial auto-trigger flags for the phases that support manual gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoTriggers {
    pub build: bool,
    pub sync: bool,
    pub deploy: bool,
}

impl Default for AutoTriggers {
    fn default() -> Self {
        Self {
            build: true,
            sync: true,
            deploy: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline state
// ---------------------------------------------------------------------------

/// The canonical snapshot of a dev session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PipelineState {
    pub build: BuildState,
    pub deploy: DeployState,
    pub status_check: StatusCheckState,
    pub file_sync: FileSyncState,
    #[serde(default)]
    pub forwarded_ports: BTreeMap<u16, PortForward>,
    #[serde(default)]
    pub debugging_containers: Vec<DebuggingContainer>,
}

impl PipelineState {
    /// Fresh state: every artifact `NotStarted`, auto-trigger flags as given.
    pub fn new<I, S>(artifacts: I, triggers: AutoTriggers) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            build: BuildState {
                artifacts: artifacts
                    .into_iter()
                    .map(|name| (name.into(), Status::NotStarted))
                    .collect(),
                auto_trigger: triggers.build,
            },
            deploy: DeployState {
                status: Status::NotStarted,
                message: None,
                auto_trigger: triggers.deploy,
            },
            status_check: StatusCheckState::default(),
            file_sync: FileSyncState {
                status: Status::NotStarted,
                auto_trigger: triggers.sync,
            },
            forwarded_ports: BTreeMap::new(),
            debugging_containers: Vec::new(),
        }
    }

    /// Current auto-trigger flags.
    pub fn auto_triggers(&self) -> AutoTriggers {
        AutoTriggers {
            build: self.build.auto_trigger,
            sync: self.file_sync.auto_trigger,
            deploy: self.deploy.auto_trigger,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_matches_wire_names() {
        assert_eq!(Status::NotStarted.to_string(), "Not Started");
        assert_eq!(Status::InProgress.to_string(), "In Progress");
        let json = serde_json::to_string(&Status::InProgress).expect("serialize");
        assert_eq!(json, "\"In Progress\"");
    }

    #[test]
    fn terminal_statuses() {
        assert!(Status::Complete.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(!Status::Started.is_terminal());
        assert!(!Status::NotStarted.is_terminal());
    }

    #[test]
    fn new_state_marks_every_artifact_not_started() {
        let state = PipelineState::new(["img1", "img2"], AutoTriggers::default());
        assert_eq!(state.build.artifacts.len(), 2);
        assert!(state
            .build
            .artifacts
            .values()
            .all(|s| *s == Status::NotStarted));
        assert!(state.build.auto_trigger);
        assert_eq!(state.deploy.status, Status::NotStarted);
    }

    #[test]
    fn phase_parses_from_cli_strings() {
        assert_eq!("Deploy".parse::<Phase>(), Ok(Phase::Deploy));
        assert_eq!("status-check".parse::<Phase>(), Ok(Phase::StatusCheck));
        assert!("ship".parse::<Phase>().is_err());
    }

    #[test]
    fn same_container_ignores_artifact_and_runtime() {
        let a = DebuggingContainer {
            namespace: "ns".into(),
            pod_name: "pod".into(),
            container_name: "c".into(),
            artifact: "a".into(),
            runtime: "jvm".into(),
            working_dir: "/".into(),
            debug_ports: BTreeMap::new(),
        };
        let mut b = a.clone();
        b.runtime = "go".into();
        assert!(a.same_container(&b));
    }
}
