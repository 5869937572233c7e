//! The broker contract.
//!
//! A broker moves messages through four store-side collections — ready,
//! processing (reserved), scheduled, dead — and tracks worker liveness in a
//! fifth. Implementations are swappable behind the [`Broker`] trait; the
//! production target is an ordered-set + list store (see [`crate::redis`]).

use crate::delivery::Delivery;
use crate::message::Message;
use async_trait::async_trait;
use conveyor_core::error::Result;
use std::time::Duration;

/// The five logical collections a broker maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueName {
    /// FIFO list of messages eligible for execution
    Ready,
    /// Reservations keyed by reservation time, for visibility recovery
    Reserved,
    /// Delayed messages keyed by earliest-delivery time
    Scheduled,
    /// Messages that exhausted retries or referenced unknown handlers
    Dead,
    /// Worker heartbeats keyed by beat time
    Workers,
}

impl QueueName {
    /// The fixed store identifier, shared by all producers and workers.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Ready => "ready",
            QueueName::Reserved => "processing",
            QueueName::Scheduled => "scheduled",
            QueueName::Dead => "dead",
            QueueName::Workers => "workers",
        }
    }
}

/// Resolved store key names, optionally namespace-prefixed.
#[derive(Debug, Clone)]
pub struct Keys {
    ready: String,
    reserved: String,
    scheduled: String,
    dead: String,
    workers: String,
}

impl Keys {
    pub fn new(namespace: Option<&str>) -> Self {
        let resolve = |name: QueueName| match namespace {
            Some(ns) => format!("{}:{}", ns, name.as_str()),
            None => name.as_str().to_string(),
        };
        Self {
            ready: resolve(QueueName::Ready),
            reserved: resolve(QueueName::Reserved),
            scheduled: resolve(QueueName::Scheduled),
            dead: resolve(QueueName::Dead),
            workers: resolve(QueueName::Workers),
        }
    }

    pub fn ready(&self) -> &str {
        &self.ready
    }

    pub fn reserved(&self) -> &str {
        &self.reserved
    }

    pub fn scheduled(&self) -> &str {
        &self.scheduled
    }

    pub fn dead(&self) -> &str {
        &self.dead
    }

    pub fn workers(&self) -> &str {
        &self.workers
    }

    pub fn resolve(&self, queue: QueueName) -> &str {
        match queue {
            QueueName::Ready => self.ready(),
            QueueName::Reserved => self.reserved(),
            QueueName::Scheduled => self.scheduled(),
            QueueName::Dead => self.dead(),
            QueueName::Workers => self.workers(),
        }
    }
}

/// Broker trait
///
/// A message lives in exactly one of ready/reserved/scheduled/dead at any
/// quiescent point; every transition here is atomic at the per-message
/// granularity. Delivery is at-least-once: callers must tolerate duplicate
/// execution after crash recovery.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a message to the tail of the ready queue.
    async fn send(&self, msg: &Message) -> Result<()>;

    /// Insert a message into the scheduled set keyed by its eta.
    ///
    /// A message without an eta is logged and dropped rather than enqueued
    /// at a bogus time.
    async fn schedule(&self, msg: &Message) -> Result<()>;

    /// Blocking pop from the head of the ready queue for up to `timeout`.
    ///
    /// On success the raw payload is recorded in the reserved set with the
    /// reservation wall-clock time as score. Returns `None` on timeout.
    /// Payloads that fail to decode are moved straight to the dead queue and
    /// the wait continues with the remaining budget.
    async fn reserve(&self, timeout: Duration) -> Result<Option<Delivery>>;

    /// Settle a delivery by removing its reservation.
    ///
    /// A no-op if the reservation no longer exists (the reaper may have
    /// recovered it first).
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Remove the reservation and append the payload to the dead queue.
    async fn dead(&self, delivery: &Delivery) -> Result<()>;

    /// Remove the reservation and return the payload to the tail of the
    /// ready queue, making it immediately eligible again.
    async fn restore(&self, delivery: &Delivery) -> Result<()>;

    /// Return every reservation older than `visibility_timeout` to the
    /// ready queue. Returns the number of messages recovered.
    async fn recover_expired(&self, visibility_timeout: Duration) -> Result<u64>;

    /// Promote every scheduled message whose eta has passed into the ready
    /// queue. Returns the number of messages promoted.
    async fn poll_schedule(&self) -> Result<u64>;

    /// Upsert a worker's liveness record. `ts` defaults to now.
    async fn send_heartbeat(&self, worker: &str, ts: Option<f64>) -> Result<()>;

    /// Names of workers that heartbeat within the last `timeout`.
    ///
    /// Stale records are left in the store; absence from the window is the
    /// only signal.
    async fn list_alive_workers(&self, timeout: Duration) -> Result<Vec<String>>;

    /// Number of entries in one collection.
    async fn depth(&self, queue: QueueName) -> Result<u64>;

    /// Delete every entry in one collection, returning how many were removed.
    async fn purge(&self, queue: QueueName) -> Result<u64>;
}
