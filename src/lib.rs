#![doc = include_str!("../README.md")]

mod bootstrap;
mod fd;
mod handoff;
mod listener;
mod orchestrator;
mod supervisor;

// reexports
pub use crate::{
    bootstrap::{acquire, Inheritance},
    handoff::{duplicate_listener, HandoffError, HandoffToken},
    listener::ListenerHandle,
    orchestrator::{HandoffReport, Orchestrator},
    supervisor::GuardedListener,
};
pub use tokio::signal::unix::SignalKind;
