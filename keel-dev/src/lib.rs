//! The dev loop: trigger → build → sync → deploy, repeated until stopped,
//! plus the session runtime and its control socket.

pub mod controller;
mod error;
pub mod local;
pub mod paths;
pub mod protocol;
pub mod runner;
mod runtime;
pub mod trigger;

pub use controller::DevLoop;
pub use error::DevError;
pub use local::{InputProbe, LocalRunner, LocalRunnerFactory};
pub use protocol::{
    request_auto, request_events, request_execute, request_state, request_stop, send_request,
    DevRequest, DevResponse,
};
pub use runner::{ArtifactBuilder, PipelineRunner, PrebuiltBuilder, RunnerFactory};
pub use runtime::{run, start_blocking, DevSession};
pub use trigger::{ChangeProbe, Intent, IntentSender, Trigger, TriggerSource};
