//! Producer surface.
//!
//! Builds messages and routes them to the broker: immediate dispatch goes
//! to the ready queue, delayed dispatch to the scheduled set.

use conveyor_broker::{clock, Broker, Message};
use conveyor_core::error::Result;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Handle for submitting work to the queue.
#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn Broker>,
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Dispatch a task for immediate execution.
    pub async fn dispatch(
        &self,
        task: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Message> {
        let msg = Message::new(task, args, kwargs);
        self.broker.send(&msg).await?;
        debug!(id = %msg.id, task = %msg.task, "dispatched");
        Ok(msg)
    }

    /// Dispatch a task after a countdown.
    pub async fn dispatch_in(
        &self,
        task: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        countdown: Duration,
    ) -> Result<Message> {
        self.dispatch_at(task, args, kwargs, clock::now_secs() + countdown.as_secs_f64())
            .await
    }

    /// Dispatch a task at an absolute time (epoch seconds).
    pub async fn dispatch_at(
        &self,
        task: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        eta: f64,
    ) -> Result<Message> {
        let msg = Message::new(task, args, kwargs).with_eta(eta);
        self.broker.schedule(&msg).await?;
        debug!(id = %msg.id, task = %msg.task, eta, "dispatched delayed");
        Ok(msg)
    }
}
