//! # keel-event
//!
//! The pipeline state store.
//!
//! A [`StateStore`] owns the one mutable [`PipelineState`](keel_core::PipelineState)
//! of a dev session together with an append-only event log. Producers call
//! [`StateStore::mutate`] (or one of its convenience emitters), readers take
//! [`StateStore::snapshot`]s or follow the log with [`StateStore::subscribe`].

pub mod store;
pub mod transition;

pub use store::{Event, EventStream, StateStore};
pub use transition::{LogEntry, Transition};
