//! Worker-local reservation of a message.

use crate::message::Message;

/// A reserved message paired with the raw payload it was stored under.
///
/// Created by `Broker::reserve`, consumed by `ack`, `dead`, or `restore`;
/// never persisted. `raw` is the exact string popped from the ready queue
/// and is the removal key for the reserved set, so it must be carried
/// through unchanged even when the message itself is re-encoded for a retry.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub raw: String,
    pub message: Message,
    /// Local reservation time as epoch seconds
    pub reserved_at: f64,
}
