//! # Conveyor Worker
//!
//! The consuming side of the Conveyor task queue: the handler registry, the
//! [`Worker`] run-loop with its heartbeat/schedule-poll/reaper companions,
//! graceful shutdown plumbing, and the [`Producer`] submission surface.

pub mod producer;
pub mod registry;
pub mod shutdown;
pub mod worker;

// Re-exports for convenience
pub use producer::Producer;
pub use registry::{RegisteredTask, TaskHandler, TaskRegistry};
pub use shutdown::{listen_for_signals, ShutdownController};
pub use worker::Worker;
