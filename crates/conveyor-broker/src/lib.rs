//! # Conveyor Broker
//!
//! The broker protocol for the Conveyor task queue: the wire-format
//! [`Message`], the worker-local [`Delivery`] reservation, the [`Broker`]
//! contract over the ready/processing/scheduled/dead collections, the
//! Redis and in-memory implementations, and the [`Reaper`] that recovers
//! visibility-expired reservations.

pub mod broker;
pub mod clock;
pub mod delivery;
pub mod memory;
pub mod message;
pub mod reaper;
pub mod redis;

// Re-exports for convenience
pub use broker::{Broker, Keys, QueueName};
pub use crate::redis::RedisBroker;
pub use delivery::Delivery;
pub use memory::MemoryBroker;
pub use message::Message;
pub use reaper::Reaper;
