//! The concurrent state store.
//!
//! One mutex guards both the [`PipelineState`] and the event log, so a
//! mutation's state change and its event become visible together. Waiting
//! subscribers park on a condvar that every append wakes.

use std::fmt::Display;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keel_core::{AutoTriggers, DebuggingContainer, Phase, PipelineState, PortForward, Status};

use crate::transition::{LogEntry, Transition};

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An entry in the event log. `seq` is the entry's index in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub transition: Transition,
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

struct Inner {
    state: PipelineState,
    events: Vec<Event>,
    // Seq of the poison pill once the store is closed.
    pill: Option<u64>,
}

struct Shared {
    inner: Mutex<Inner>,
    appended: Condvar,
}

/// Handle to a dev session's state. Clones share the same store.
#[derive(Clone)]
pub struct StateStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("StateStore")
            .field("events", &inner.events.len())
            .field("pill", &inner.pill)
            .finish()
    }
}

impl StateStore {
    /// A store whose artifacts all start `NotStarted`.
    pub fn new<I, S>(artifacts: I, triggers: AutoTriggers) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: PipelineState::new(artifacts, triggers),
                    events: Vec::new(),
                    pill: None,
                }),
                appended: Condvar::new(),
            }),
        }
    }

    // Every critical section leaves `Inner` consistent, so a poisoned lock
    // still guards valid data.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `transition` and append its event. Returns the event's `seq`.
    pub fn mutate(&self, transition: Transition) -> u64 {
        let mut inner = self.lock();
        transition.apply(&mut inner.state);
        let seq = append(&mut inner, transition);
        drop(inner);
        self.shared.appended.notify_all();
        seq
    }

    /// A consistent copy of the current state.
    pub fn snapshot(&self) -> PipelineState {
        self.lock().state.clone()
    }

    /// Follow the log from `from` onward.
    pub fn subscribe(&self, from: u64) -> EventStream {
        EventStream {
            store: self.clone(),
            cursor: from,
            finished: false,
        }
    }

    /// Events with `seq >= from` recorded so far, without waiting.
    pub fn events_since(&self, from: u64) -> Vec<Event> {
        let inner = self.lock();
        let start = usize::try_from(from).unwrap_or(usize::MAX);
        inner.events.get(start..).map(<[Event]>::to_vec).unwrap_or_default()
    }

    /// Number of events recorded so far.
    pub fn len(&self) -> u64 {
        self.lock().events.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().pill.is_some()
    }

    pub fn reset_for_new_build(&self) -> u64 {
        self.mutate(Transition::ResetForNewBuild)
    }

    pub fn reset_for_new_deploy(&self) -> u64 {
        self.mutate(Transition::ResetForNewDeploy)
    }

    pub fn toggle_auto_trigger(&self, phase: Phase, enabled: bool) -> u64 {
        self.mutate(Transition::AutoTrigger { phase, enabled })
    }

    /// Record a log line. The snapshot is unchanged.
    pub fn log(&self, entry: LogEntry) -> u64 {
        self.mutate(Transition::Log(entry))
    }

    /// Append the poison pill. Calling it again is a no-op.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.pill.is_some() {
            return;
        }
        let seq = append(&mut inner, Transition::Terminated);
        inner.pill = Some(seq);
        drop(inner);
        tracing::debug!(seq, "state store closed");
        self.shared.appended.notify_all();
    }

    // -- build ------------------------------------------------------------

    pub fn build_in_progress(&self, artifact: &str) -> u64 {
        self.build_status(artifact, Status::InProgress, None)
    }

    pub fn build_complete(&self, artifact: &str) -> u64 {
        self.build_status(artifact, Status::Complete, None)
    }

    pub fn build_failed(&self, artifact: &str, err: impl Display) -> u64 {
        self.build_status(artifact, Status::Failed, Some(err.to_string()))
    }

    fn build_status(&self, artifact: &str, status: Status, error: Option<String>) -> u64 {
        self.mutate(Transition::BuildStatus {
            artifact: artifact.to_string(),
            status,
            error,
        })
    }

    // -- deploy -----------------------------------------------------------

    pub fn deploy_in_progress(&self) -> u64 {
        self.mutate(Transition::Deploy {
            status: Status::InProgress,
            message: None,
        })
    }

    pub fn deploy_complete(&self) -> u64 {
        self.mutate(Transition::Deploy {
            status: Status::Complete,
            message: None,
        })
    }

    pub fn deploy_failed(&self, err: impl Display) -> u64 {
        self.mutate(Transition::Deploy {
            status: Status::Failed,
            message: Some(err.to_string()),
        })
    }

    pub fn deploy_info(&self, message: impl Into<String>) -> u64 {
        self.mutate(Transition::DeployInfo {
            message: message.into(),
        })
    }

    // -- status check -----------------------------------------------------

    pub fn status_check_started(&self) -> u64 {
        self.status_check(Status::Started, None)
    }

    pub fn status_check_in_progress(&self, message: impl Into<String>) -> u64 {
        self.status_check(Status::InProgress, Some(message.into()))
    }

    pub fn status_check_succeeded(&self) -> u64 {
        self.status_check(Status::Succeeded, None)
    }

    pub fn status_check_failed(&self, err: impl Display) -> u64 {
        self.status_check(Status::Failed, Some(err.to_string()))
    }

    fn status_check(&self, status: Status, message: Option<String>) -> u64 {
        self.mutate(Transition::StatusCheck { status, message })
    }

    pub fn resource_status_check_updated(&self, resource: &str, message: impl Into<String>) -> u64 {
        self.resource_status(resource, Status::InProgress, Some(message.into()))
    }

    pub fn resource_status_check_succeeded(&self, resource: &str) -> u64 {
        self.resource_status(resource, Status::Succeeded, None)
    }

    pub fn resource_status_check_failed(&self, resource: &str, err: impl Display) -> u64 {
        self.resource_status(resource, Status::Failed, Some(err.to_string()))
    }

    fn resource_status(&self, resource: &str, status: Status, message: Option<String>) -> u64 {
        self.mutate(Transition::ResourceStatusCheck {
            resource: resource.to_string(),
            status,
            message,
        })
    }

    // -- file sync --------------------------------------------------------

    pub fn file_sync_in_progress(&self, file_count: usize, image: &str) -> u64 {
        self.file_sync(file_count, image, Status::InProgress, None)
    }

    pub fn file_sync_succeeded(&self, file_count: usize, image: &str) -> u64 {
        self.file_sync(file_count, image, Status::Succeeded, None)
    }

    pub fn file_sync_failed(&self, file_count: usize, image: &str, err: impl Display) -> u64 {
        self.file_sync(file_count, image, Status::Failed, Some(err.to_string()))
    }

    fn file_sync(
        &self,
        file_count: usize,
        image: &str,
        status: Status,
        error: Option<String>,
    ) -> u64 {
        self.mutate(Transition::FileSync {
            file_count,
            image: image.to_string(),
            status,
            error,
        })
    }

    // -- port forwards and debugging ---------------------------------------

    pub fn port_forwarded(&self, forward: PortForward) -> u64 {
        self.mutate(Transition::PortForwarded(forward))
    }

    pub fn debugging_container_started(&self, container: DebuggingContainer) -> u64 {
        self.mutate(Transition::DebuggingContainerStarted(container))
    }

    pub fn debugging_container_terminated(&self, container: DebuggingContainer) -> u64 {
        self.mutate(Transition::DebuggingContainerTerminated(container))
    }

    // -- dev loop ---------------------------------------------------------

    pub fn dev_loop_in_progress(&self, iteration: u64) -> u64 {
        self.dev_loop(iteration, Status::InProgress, None)
    }

    pub fn dev_loop_complete(&self, iteration: u64) -> u64 {
        self.dev_loop(iteration, Status::Complete, None)
    }

    pub fn dev_loop_failed(&self, iteration: u64, err: impl Display) -> u64 {
        self.dev_loop(iteration, Status::Failed, Some(err.to_string()))
    }

    fn dev_loop(&self, iteration: u64, status: Status, error: Option<String>) -> u64 {
        self.mutate(Transition::DevLoop {
            iteration,
            status,
            error,
        })
    }
}

fn append(inner: &mut Inner, transition: Transition) -> u64 {
    let seq = inner.events.len() as u64;
    tracing::trace!(seq, ?transition, "event");
    inner.events.push(Event {
        seq,
        at: Utc::now(),
        transition,
    });
    seq
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// A blocking cursor over the event log.
///
/// Yields events in `seq` order, waits when caught up, and ends after the
/// poison pill has been yielded.
pub struct EventStream {
    store: StateStore,
    cursor: u64,
    finished: bool,
}

impl EventStream {
    /// `seq` of the next event this stream will yield.
    pub fn position(&self) -> u64 {
        self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Like [`Iterator::next`] but gives up after `timeout`.
    ///
    /// Returns `None` on timeout and once the stream is finished.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Event> {
        self.wait_next(Some(Instant::now() + timeout))
    }

    fn wait_next(&mut self, deadline: Option<Instant>) -> Option<Event> {
        if self.finished {
            return None;
        }
        let mut inner = self.store.lock();
        loop {
            let next = usize::try_from(self.cursor)
                .ok()
                .and_then(|i| inner.events.get(i));
            if let Some(event) = next {
                let event = event.clone();
                self.cursor += 1;
                self.finished = event.transition.is_terminated();
                return Some(event);
            }
            // A cursor beyond the pill has nothing left to wait for.
            if inner.pill.is_some_and(|pill| self.cursor > pill) {
                self.finished = true;
                return None;
            }
            inner = match deadline {
                None => self
                    .store
                    .shared
                    .appended
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.store
                        .shared
                        .appended
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

impl Iterator for EventStream {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        self.wait_next(None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
