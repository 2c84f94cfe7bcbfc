//! Client-side orchestration of the backend pipeline.
//!
//! This module owns the shared pipeline state, the recurring status poller, trigger
//! dispatch, and the session controller. CLI layers call into it and render what it
//! emits.

mod controller;
mod dispatcher;
mod poller;
mod reconciler;
mod state;

pub(crate) use controller::{
    run_controller, watch, ConsoleSettings, Session, SessionEvent, Trigger, UiCommand,
    WatchUntil, CONSOLE_HELP,
};
pub use reconciler::{PhaseView, PipelineView};

#[cfg(test)]
pub(crate) use reconciler::Reconciler;
