//! What starts the next dev-loop iteration.
//!
//! A [`TriggerSource`] turns two inputs into [`Intent`]s: a poll ticker
//! (polling and notify modes) gated by the store's auto-trigger flags, and
//! explicit requests sent through its [`mpsc`] handle by the control
//! socket.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};

use keel_core::{AutoTriggers, Phase, TriggerMode};
use keel_event::StateStore;

/// Which phases an iteration should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub build: bool,
    pub sync: bool,
    pub deploy: bool,
}

impl Intent {
    pub fn all() -> Self {
        Self {
            build: true,
            sync: true,
            deploy: true,
        }
    }

    pub fn none() -> Self {
        Self {
            build: false,
            sync: false,
            deploy: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.build || self.sync || self.deploy)
    }

    /// Parse `build`, `sync`, `deploy` or `all`.
    pub fn for_phase(phase: &str) -> Result<Self, String> {
        if phase.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }
        let mut intent = Self::none();
        match phase.parse::<Phase>()? {
            Phase::Build => intent.build = true,
            Phase::Sync => intent.sync = true,
            Phase::Deploy => intent.deploy = true,
            Phase::StatusCheck => {
                return Err("status-check cannot be executed on demand".to_string())
            }
        }
        Ok(intent)
    }
}

impl From<AutoTriggers> for Intent {
    fn from(flags: AutoTriggers) -> Self {
        Self {
            build: flags.build,
            sync: flags.sync,
            deploy: flags.deploy,
        }
    }
}

/// Fingerprint of the inputs a poll tick should react to.
pub trait ChangeProbe: Send + Sync {
    fn fingerprint(&self) -> String;
}

#[async_trait]
pub trait Trigger: Send {
    /// Wait for the next iteration request. `None` means no further
    /// request can arrive.
    async fn next_intent(&mut self, store: &StateStore) -> Option<Intent>;
}

/// Sender half used to request iterations explicitly.
pub type IntentSender = mpsc::Sender<Intent>;

pub struct TriggerSource {
    mode: TriggerMode,
    ticker: Interval,
    requests: mpsc::Receiver<Intent>,
    requests_open: bool,
    probe: Option<Box<dyn ChangeProbe>>,
    last_fingerprint: Option<String>,
}

impl TriggerSource {
    pub fn new(mode: TriggerMode, poll_interval: Duration) -> (Self, IntentSender) {
        let (tx, rx) = mpsc::channel(16);
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let source = Self {
            mode,
            ticker,
            requests: rx,
            requests_open: true,
            probe: None,
            last_fingerprint: None,
        };
        (source, tx)
    }

    /// Only fire ticks when `probe`'s fingerprint has changed.
    pub fn with_probe(mut self, probe: impl ChangeProbe + 'static) -> Self {
        self.last_fingerprint = Some(probe.fingerprint());
        self.probe = Some(Box::new(probe));
        self
    }

    /// Whether this tick should start an iteration.
    fn tick_changed(&mut self) -> bool {
        let Some(probe) = &self.probe else {
            return true;
        };
        let fingerprint = probe.fingerprint();
        if self.last_fingerprint.as_deref() == Some(fingerprint.as_str()) {
            return false;
        }
        self.last_fingerprint = Some(fingerprint);
        true
    }
}

#[async_trait]
impl Trigger for TriggerSource {
    async fn next_intent(&mut self, store: &StateStore) -> Option<Intent> {
        if self.mode == TriggerMode::Manual {
            return self.requests.recv().await;
        }
        loop {
            tokio::select! {
                request = self.requests.recv(), if self.requests_open => match request {
                    Some(intent) => return Some(intent),
                    None => self.requests_open = false,
                },
                _ = self.ticker.tick() => {
                    if !self.tick_changed() {
                        continue;
                    }
                    let intent = Intent::from(store.snapshot().auto_triggers());
                    if intent.is_empty() {
                        tracing::debug!("change detected; waiting for a manual trigger");
                        continue;
                    }
                    tracing::debug!(?intent, "change detected");
                    return Some(intent);
                }
            }
        }
    }
}
