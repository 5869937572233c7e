//! The wire-format unit of work.

use crate::clock;
use conveyor_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A self-describing unit of work.
///
/// Immutable in transit except for `retries` and `eta`, which the worker
/// bumps on a copy before re-scheduling a failed attempt. The encoded form
/// must round-trip byte-for-byte: the raw string is the key used to remove a
/// message from the reserved and scheduled sets, so field order is fixed by
/// declaration order and no re-encoding happens between reserve and ack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Time-ordered globally unique identifier, assigned at construction
    pub id: String,
    /// Key into a worker's handler registry
    pub task: String,
    /// Positional arguments to the handler
    pub args: Vec<Value>,
    /// Named arguments to the handler
    pub kwargs: Map<String, Value>,
    /// Count of previous failed attempts
    #[serde(default)]
    pub retries: u32,
    /// Earliest execution time as epoch seconds, if delayed
    #[serde(default)]
    pub eta: Option<f64>,
    /// Wall-clock creation time as epoch seconds
    pub ts: f64,
}

impl Message {
    pub fn new(task: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            task: task.into(),
            args,
            kwargs,
            retries: 0,
            eta: None,
            ts: clock::now_secs(),
        }
    }

    /// Attach an earliest-execution time.
    pub fn with_eta(mut self, eta: f64) -> Self {
        self.eta = Some(eta);
        self
    }

    /// Encode to the canonical compact JSON wire form.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::serialization(format!("failed to encode message: {}", e)))
    }

    /// Decode from the wire form.
    ///
    /// Records missing `retries` or `eta` decode with their defaults so
    /// older producers stay compatible.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::serialization(format!("failed to decode message: {}", e)))
    }
}
