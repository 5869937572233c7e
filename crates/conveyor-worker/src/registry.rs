//! Handler registry.
//!
//! Maps task names to handlers with their retry policy. The registry is
//! built once at worker startup and never mutated afterwards; there is no
//! dynamic registration.

use async_trait::async_trait;
use conveyor_core::error::Result;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A callable task implementation.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn call(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<()>;
}

/// A handler plus its retry policy.
#[derive(Clone)]
pub struct RegisteredTask {
    pub handler: Arc<dyn TaskHandler>,
    /// Attempts beyond the first before the message is dead-lettered
    pub max_retries: u32,
    /// Delay before a failed attempt is rescheduled
    pub default_retry_delay: Duration,
}

/// Task-name lookup table, fully populated before the worker starts.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, RegisteredTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a task name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        max_retries: u32,
        default_retry_delay: Duration,
        handler: Arc<dyn TaskHandler>,
    ) -> &mut Self {
        self.tasks.insert(
            name.into(),
            RegisteredTask {
                handler,
                max_retries,
                default_retry_delay,
            },
        );
        self
    }

    /// Register an async closure under a task name.
    pub fn register_fn<F, Fut>(
        &mut self,
        name: impl Into<String>,
        max_retries: u32,
        default_retry_delay: Duration,
        f: F,
    ) -> &mut Self
    where
        F: Fn(Vec<Value>, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(name, max_retries, default_retry_delay, Arc::new(FnHandler(f)))
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTask> {
        self.tasks.get(name)
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Adapter that lets plain async closures act as handlers.
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Vec<Value>, Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn call(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<()> {
        (self.0)(args.to_vec(), kwargs.clone()).await
    }
}
