//! The worker run-loop.
//!
//! One worker hosts four cooperative loops: the main consumption loop plus
//! heartbeat, schedule-poll, and reaper ticks. They share the broker handle
//! and a shutdown controller, nothing else. Handlers run one at a time on
//! the main loop; `prefetch` bounds buffered reservations, it does not add
//! parallelism.

use crate::registry::TaskRegistry;
use crate::shutdown::{shutdown_aware_sleep, ShutdownController};
use conveyor_broker::{clock, Broker, Delivery, Reaper};
use conveyor_core::config::WorkerConfig;
use conveyor_core::error::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A message-consuming worker process.
pub struct Worker {
    config: WorkerConfig,
    broker: Arc<dyn Broker>,
    registry: Arc<TaskRegistry>,
    shutdown: ShutdownController,
}

impl Worker {
    pub fn new(config: WorkerConfig, broker: Arc<dyn Broker>, registry: TaskRegistry) -> Self {
        Self {
            config,
            broker,
            registry: Arc::new(registry),
            shutdown: ShutdownController::new(),
        }
    }

    /// Controller used to stop this worker, from a signal listener or test.
    pub fn shutdown_controller(&self) -> ShutdownController {
        self.shutdown.clone()
    }

    /// Run until shutdown, then drain.
    ///
    /// Spawns the heartbeat, schedule-poll, and reaper loops, consumes
    /// messages on the calling task, and returns once every loop has
    /// observed the shutdown signal and unstarted deliveries are back in
    /// the ready queue.
    pub async fn run(&self) -> Result<()> {
        info!(
            worker = %self.config.name,
            tasks = ?self.registry.task_names(),
            "worker started"
        );

        let heartbeat = tokio::spawn(heartbeat_loop(
            self.broker.clone(),
            self.config.name.clone(),
            self.config.heartbeat_interval(),
            self.shutdown.clone(),
        ));
        let poller = tokio::spawn(schedule_poll_loop(
            self.broker.clone(),
            self.config.schedule_poll_interval(),
            self.shutdown.clone(),
        ));
        let reaper = tokio::spawn(reaper_loop(
            self.broker.clone(),
            self.config.visibility_timeout(),
            self.config.reaper_interval(),
            self.shutdown.clone(),
        ));

        self.main_loop().await;

        let _ = tokio::join!(heartbeat, poller, reaper);
        info!(worker = %self.config.name, "worker shut down");
        Ok(())
    }

    async fn main_loop(&self) {
        let mut buffer: VecDeque<Delivery> = VecDeque::new();

        while !self.shutdown.is_shutting_down() {
            // Top up the prefetch buffer.
            while buffer.len() < self.config.prefetch && !self.shutdown.is_shutting_down() {
                match self.broker.reserve(self.config.reserve_timeout()).await {
                    Ok(Some(delivery)) => buffer.push_back(delivery),
                    Ok(None) => break,
                    Err(e) => {
                        // Transient broker trouble reads as an empty queue.
                        warn!(error = %e, "reserve failed");
                        break;
                    }
                }
            }

            let Some(delivery) = buffer.pop_front() else {
                shutdown_aware_sleep(self.config.sleep_on_empty(), &self.shutdown).await;
                continue;
            };
            self.process_delivery(delivery).await;
        }

        self.drain(&mut buffer).await;
    }

    /// Return prefetched-but-unstarted deliveries to the ready queue.
    ///
    /// A failed restore leaves the reservation in place, where the reaper
    /// recovers it after the visibility timeout.
    async fn drain(&self, buffer: &mut VecDeque<Delivery>) {
        if buffer.is_empty() {
            return;
        }
        info!(
            count = buffer.len(),
            "returning unstarted deliveries to the ready queue"
        );
        while let Some(delivery) = buffer.pop_front() {
            if let Err(e) = self.broker.restore(&delivery).await {
                warn!(
                    id = %delivery.message.id,
                    error = %e,
                    "restore failed; reservation left for the reaper"
                );
            }
        }
    }

    async fn process_delivery(&self, delivery: Delivery) {
        let msg = &delivery.message;
        debug!(task = %msg.task, id = %msg.id, "running task");

        let Some(task) = self.registry.get(&msg.task) else {
            warn!(task = %msg.task, id = %msg.id, "unknown task; dead-lettering");
            if let Err(e) = self.broker.dead(&delivery).await {
                error!(id = %msg.id, error = %e, "dead-letter failed");
            }
            return;
        };

        match task.handler.call(&msg.args, &msg.kwargs).await {
            Ok(()) => {
                if let Err(e) = self.broker.ack(&delivery).await {
                    error!(id = %msg.id, error = %e, "ack failed");
                } else {
                    debug!(id = %msg.id, "acknowledged");
                }
            }
            Err(e) => {
                let mut retry = msg.clone();
                retry.retries += 1;

                if retry.retries > task.max_retries {
                    warn!(
                        id = %msg.id,
                        task = %msg.task,
                        retries = retry.retries,
                        error = %e,
                        "retries exhausted; dead-lettering"
                    );
                    if let Err(e) = self.broker.dead(&delivery).await {
                        error!(id = %msg.id, error = %e, "dead-letter failed");
                    }
                    return;
                }

                let delay = task.default_retry_delay;
                retry.eta = Some(clock::now_secs() + delay.as_secs_f64());

                // The retry is a new scheduled record; the original raw
                // payload is acked only once the replacement is stored.
                match self.broker.schedule(&retry).await {
                    Ok(()) => {
                        if let Err(e) = self.broker.ack(&delivery).await {
                            error!(id = %msg.id, error = %e, "ack failed");
                        }
                        info!(
                            id = %msg.id,
                            task = %msg.task,
                            attempt = retry.retries,
                            max_retries = task.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retry scheduled"
                        );
                    }
                    Err(schedule_err) => {
                        error!(
                            id = %msg.id,
                            error = %schedule_err,
                            "retry schedule failed; reservation left for the reaper"
                        );
                    }
                }
            }
        }
    }
}

async fn heartbeat_loop(
    broker: Arc<dyn Broker>,
    name: String,
    interval: Duration,
    shutdown: ShutdownController,
) {
    while !shutdown.is_shutting_down() {
        if let Err(e) = broker.send_heartbeat(&name, None).await {
            warn!(worker = %name, error = %e, "heartbeat failed");
        }
        if shutdown_aware_sleep(interval, &shutdown).await {
            break;
        }
    }
}

async fn schedule_poll_loop(
    broker: Arc<dyn Broker>,
    interval: Duration,
    shutdown: ShutdownController,
) {
    while !shutdown.is_shutting_down() {
        match broker.poll_schedule().await {
            Ok(moved) if moved > 0 => {
                debug!(moved, "promoted scheduled messages");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "schedule poll failed");
            }
        }
        if shutdown_aware_sleep(interval, &shutdown).await {
            break;
        }
    }
}

async fn reaper_loop(
    broker: Arc<dyn Broker>,
    visibility_timeout: Duration,
    interval: Duration,
    shutdown: ShutdownController,
) {
    let reaper = Reaper::new(broker, visibility_timeout);
    while !shutdown.is_shutting_down() {
        if let Err(e) = reaper.reap().await {
            warn!(error = %e, "reaper tick failed");
        }
        if shutdown_aware_sleep(interval, &shutdown).await {
            break;
        }
    }
}
