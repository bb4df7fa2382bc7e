//! State transitions and how each one folds into a [`PipelineState`].

use serde::{Deserialize, Serialize};

use keel_core::{DebuggingContainer, Phase, PipelineState, PortForward, Status};

/// A free-form log line recorded in the event log without touching the
/// snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Producer of the line, e.g. an artifact or pod name.
    pub source: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

/// One recorded change. Every [`Event`](crate::Event) carries exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    BuildStatus {
        artifact: String,
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Deploy {
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Non-fatal deploy information, e.g. namespace discovery failing.
    DeployInfo { message: String },
    StatusCheck {
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    ResourceStatusCheck {
        resource: String,
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    FileSync {
        file_count: usize,
        image: String,
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    PortForwarded(PortForward),
    DebuggingContainerStarted(DebuggingContainer),
    DebuggingContainerTerminated(DebuggingContainer),
    ResetForNewBuild,
    ResetForNewDeploy,
    AutoTrigger { phase: Phase, enabled: bool },
    DevLoop {
        iteration: u64,
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Log(LogEntry),
    /// End of the log. Subscribers stop after reading it.
    Terminated,
}

impl Transition {
    /// Fold this transition into `state`.
    ///
    /// Pure with respect to everything but `state`; the store calls it
    /// under its lock so readers never see a half-applied change.
    pub fn apply(&self, state: &mut PipelineState) {
        match self {
            Transition::BuildStatus {
                artifact, status, ..
            } => {
                state.build.artifacts.insert(artifact.clone(), *status);
            }
            Transition::Deploy { status, message } => {
                state.deploy.status = *status;
                state.deploy.message = message.clone();
            }
            Transition::DeployInfo { message } => {
                state.deploy.message = Some(message.clone());
            }
            Transition::StatusCheck { status, .. } => {
                state.status_check.status = *status;
            }
            Transition::ResourceStatusCheck {
                resource, status, ..
            } => {
                state
                    .status_check
                    .resources
                    .insert(resource.clone(), *status);
            }
            Transition::FileSync { status, .. } => {
                state.file_sync.status = *status;
            }
            Transition::PortForwarded(pf) => {
                state.forwarded_ports.insert(pf.local_port, pf.clone());
            }
            Transition::DebuggingContainerStarted(dc) => {
                if !state
                    .debugging_containers
                    .iter()
                    .any(|existing| existing.same_container(dc))
                {
                    state.debugging_containers.push(dc.clone());
                }
            }
            Transition::DebuggingContainerTerminated(dc) => {
                state
                    .debugging_containers
                    .retain(|existing| !existing.same_container(dc));
            }
            Transition::ResetForNewBuild => {
                for status in state.build.artifacts.values_mut() {
                    *status = Status::NotStarted;
                }
                reset_deploy(state);
                state.file_sync.status = Status::NotStarted;
            }
            Transition::ResetForNewDeploy => reset_deploy(state),
            Transition::AutoTrigger { phase, enabled } => match phase {
                Phase::Build => state.build.auto_trigger = *enabled,
                Phase::Sync => state.file_sync.auto_trigger = *enabled,
                Phase::Deploy => state.deploy.auto_trigger = *enabled,
                Phase::StatusCheck => {}
            },
            Transition::DevLoop { .. } | Transition::Log(_) | Transition::Terminated => {}
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Transition::Terminated)
    }
}

/// Deploy, status-check and port forwards go back to a fresh start.
fn reset_deploy(state: &mut PipelineState) {
    state.deploy.status = Status::NotStarted;
    state.deploy.message = None;
    state.status_check.status = Status::NotStarted;
    state.status_check.resources.clear();
    state.forwarded_ports.clear();
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use keel_core::AutoTriggers;
    use rstest::rstest;

    use super::*;

    fn port(local: u16) -> PortForward {
        PortForward {
            local_port: local,
            remote_port: 2001,
            pod_name: "test/pod".into(),
            container_name: "c".into(),
            namespace: "default".into(),
            port_name: "http".into(),
            resource_type: "pod".into(),
            resource_name: "test".into(),
            address: "127.0.0.1".into(),
        }
    }

    fn finished_state() -> PipelineState {
        let mut state = PipelineState::new(["image1"], AutoTriggers::default());
        state.build.artifacts.insert("image1".into(), Status::Complete);
        state.deploy.status = Status::Complete;
        state.status_check.status = Status::Complete;
        state
            .status_check
            .resources
            .insert("ns:pod/foo".into(), Status::Succeeded);
        state.file_sync.status = Status::Succeeded;
        state.forwarded_ports.insert(2000, port(2000));
        state
    }

    #[test]
    fn reset_for_new_build_clears_everything_downstream() {
        let mut state = finished_state();
        state.build.auto_trigger = false;
        Transition::ResetForNewBuild.apply(&mut state);

        assert_eq!(state.build.artifacts["image1"], Status::NotStarted);
        assert_eq!(state.deploy.status, Status::NotStarted);
        assert_eq!(state.status_check.status, Status::NotStarted);
        assert!(state.status_check.resources.is_empty());
        assert_eq!(state.file_sync.status, Status::NotStarted);
        assert!(state.forwarded_ports.is_empty());
        assert!(!state.build.auto_trigger, "auto flags survive a reset");
    }

    #[test]
    fn reset_for_new_deploy_keeps_build_and_sync() {
        let mut state = finished_state();
        Transition::ResetForNewDeploy.apply(&mut state);

        assert_eq!(state.build.artifacts["image1"], Status::Complete);
        assert_eq!(state.file_sync.status, Status::Succeeded);
        assert_eq!(state.deploy.status, Status::NotStarted);
        assert_eq!(state.status_check.status, Status::NotStarted);
        assert!(state.status_check.resources.is_empty());
        assert!(state.forwarded_ports.is_empty());
    }

    #[rstest]
    #[case(Phase::Build)]
    #[case(Phase::Sync)]
    #[case(Phase::Deploy)]
    fn auto_trigger_touches_only_its_phase(#[case] phase: Phase) {
        let mut state = finished_state();
        Transition::AutoTrigger {
            phase,
            enabled: false,
        }
        .apply(&mut state);

        let flags = state.auto_triggers();
        assert_eq!(flags.build, phase != Phase::Build);
        assert_eq!(flags.sync, phase != Phase::Sync);
        assert_eq!(flags.deploy, phase != Phase::Deploy);
        assert_eq!(state.deploy.status, Status::Complete);
    }

    #[test]
    fn debugging_containers_behave_as_a_set() {
        let dc = DebuggingContainer {
            namespace: "ns".into(),
            pod_name: "pod".into(),
            container_name: "container".into(),
            artifact: "artifact".into(),
            runtime: "runtime".into(),
            working_dir: "/".into(),
            debug_ports: BTreeMap::new(),
        };
        let mut state = PipelineState::default();

        Transition::DebuggingContainerStarted(dc.clone()).apply(&mut state);
        Transition::DebuggingContainerStarted(dc.clone()).apply(&mut state);
        assert_eq!(state.debugging_containers.len(), 1);

        Transition::DebuggingContainerTerminated(dc).apply(&mut state);
        assert!(state.debugging_containers.is_empty());
    }

    #[test]
    fn log_and_dev_loop_leave_snapshot_untouched() {
        let before = finished_state();
        let mut state = before.clone();
        Transition::Log(LogEntry::new("img", "step 1/3")).apply(&mut state);
        Transition::DevLoop {
            iteration: 3,
            status: Status::InProgress,
            error: None,
        }
        .apply(&mut state);
        assert_eq!(state, before);
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(Transition::Deploy {
            status: Status::Failed,
            message: Some("boom".into()),
        })
        .expect("serialize");
        assert_eq!(json["type"], "deploy");
        assert_eq!(json["status"], "Failed");

        let pill = serde_json::to_value(Transition::Terminated).expect("serialize");
        assert_eq!(pill["type"], "terminated");
    }
}
