//! In-process broker.
//!
//! Implements the same collection discipline as the Redis broker over
//! mutex-guarded state: lists for ready/dead, score maps for the reserved,
//! scheduled, and workers sets. Score-map members are unique, matching
//! sorted-set semantics. Used by the integration tests and for embedding the
//! queue in a single process.

use crate::broker::{Broker, QueueName};
use crate::clock;
use crate::delivery::Delivery;
use crate::message::Message;
use async_trait::async_trait;
use conveyor_core::error::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct State {
    ready: VecDeque<String>,
    reserved: Vec<(String, f64)>,
    scheduled: Vec<(String, f64)>,
    dead: VecDeque<String>,
    workers: Vec<(String, f64)>,
}

fn upsert(set: &mut Vec<(String, f64)>, member: &str, score: f64) {
    match set.iter_mut().find(|(m, _)| m == member) {
        Some(entry) => entry.1 = score,
        None => set.push((member.to_string(), score)),
    }
}

fn remove(set: &mut Vec<(String, f64)>, member: &str) -> bool {
    let before = set.len();
    set.retain(|(m, _)| m != member);
    set.len() < before
}

/// Broker over process-local state.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop one ready payload, dead-lettering anything that fails to decode.
    fn try_pop(&self) -> Option<Delivery> {
        let mut state = self.state.lock();
        while let Some(raw) = state.ready.pop_front() {
            match Message::decode(&raw) {
                Ok(message) => {
                    let reserved_at = clock::now_secs();
                    upsert(&mut state.reserved, &raw, reserved_at);
                    return Some(Delivery {
                        raw,
                        message,
                        reserved_at,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "dead-lettering undecodable payload");
                    state.dead.push_back(raw);
                }
            }
        }
        None
    }

    fn promote_due(&self, queue: QueueName, cutoff: f64) -> u64 {
        let mut state = self.state.lock();
        let set = match queue {
            QueueName::Reserved => &mut state.reserved,
            QueueName::Scheduled => &mut state.scheduled,
            _ => return 0,
        };

        let due: Vec<String> = set
            .iter()
            .filter(|(_, score)| *score <= cutoff)
            .map(|(raw, _)| raw.clone())
            .collect();
        set.retain(|(_, score)| *score > cutoff);

        let moved = due.len() as u64;
        state.ready.extend(due);
        moved
    }

    fn settle(&self, delivery: &Delivery, target: Option<QueueName>) {
        let mut state = self.state.lock();
        if remove(&mut state.reserved, &delivery.raw) {
            match target {
                Some(QueueName::Dead) => state.dead.push_back(delivery.raw.clone()),
                Some(QueueName::Ready) => state.ready.push_back(delivery.raw.clone()),
                _ => {}
            }
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn send(&self, msg: &Message) -> Result<()> {
        let raw = msg.encode()?;
        self.state.lock().ready.push_back(raw);
        Ok(())
    }

    async fn schedule(&self, msg: &Message) -> Result<()> {
        let Some(eta) = msg.eta else {
            warn!(id = %msg.id, task = %msg.task, "schedule called without eta; dropping");
            return Ok(());
        };
        let raw = msg.encode()?;
        upsert(&mut self.state.lock().scheduled, &raw, eta);
        Ok(())
    }

    async fn reserve(&self, timeout: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.try_pop() {
                return Ok(Some(delivery));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(timeout)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.settle(delivery, None);
        Ok(())
    }

    async fn dead(&self, delivery: &Delivery) -> Result<()> {
        self.settle(delivery, Some(QueueName::Dead));
        Ok(())
    }

    async fn restore(&self, delivery: &Delivery) -> Result<()> {
        self.settle(delivery, Some(QueueName::Ready));
        Ok(())
    }

    async fn recover_expired(&self, visibility_timeout: Duration) -> Result<u64> {
        let cutoff = clock::now_secs() - visibility_timeout.as_secs_f64();
        Ok(self.promote_due(QueueName::Reserved, cutoff))
    }

    async fn poll_schedule(&self) -> Result<u64> {
        Ok(self.promote_due(QueueName::Scheduled, clock::now_secs()))
    }

    async fn send_heartbeat(&self, worker: &str, ts: Option<f64>) -> Result<()> {
        let ts = ts.unwrap_or_else(clock::now_secs);
        upsert(&mut self.state.lock().workers, worker, ts);
        Ok(())
    }

    async fn list_alive_workers(&self, timeout: Duration) -> Result<Vec<String>> {
        let now = clock::now_secs();
        let floor = now - timeout.as_secs_f64();
        Ok(self
            .state
            .lock()
            .workers
            .iter()
            .filter(|(_, ts)| *ts >= floor && *ts <= now)
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn depth(&self, queue: QueueName) -> Result<u64> {
        let state = self.state.lock();
        let count = match queue {
            QueueName::Ready => state.ready.len(),
            QueueName::Reserved => state.reserved.len(),
            QueueName::Scheduled => state.scheduled.len(),
            QueueName::Dead => state.dead.len(),
            QueueName::Workers => state.workers.len(),
        };
        Ok(count as u64)
    }

    async fn purge(&self, queue: QueueName) -> Result<u64> {
        let mut state = self.state.lock();
        let count = match queue {
            QueueName::Ready => std::mem::take(&mut state.ready).len(),
            QueueName::Reserved => std::mem::take(&mut state.reserved).len(),
            QueueName::Scheduled => std::mem::take(&mut state.scheduled).len(),
            QueueName::Dead => std::mem::take(&mut state.dead).len(),
            QueueName::Workers => std::mem::take(&mut state.workers).len(),
        };
        Ok(count as u64)
    }
}
