//! Redis-backed broker.
//!
//! The ready and dead queues are lists; reservations, the schedule, and
//! worker heartbeats are sorted sets scored by epoch seconds. Reserve is the
//! blocking-pop-then-insert pair (`BLPOP` + `ZADD`): the window between the
//! two is recovered by the reaper under at-least-once semantics.

use crate::broker::{Broker, Keys, QueueName};
use crate::clock;
use crate::delivery::Delivery;
use crate::message::Message;
use async_trait::async_trait;
use conveyor_core::config::BrokerConfig;
use conveyor_core::error::{Error, Result};
use redis::AsyncCommands;
use std::time::{Duration, Instant};
use tracing::warn;

/// Broker over a shared Redis instance.
pub struct RedisBroker {
    pool: deadpool_redis::Pool,
    keys: Keys,
}

impl RedisBroker {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let mut cfg = deadpool_redis::Config::from_url(config.url.clone());
        cfg.pool = Some(deadpool_redis::PoolConfig::new(config.pool_size));
        let pool = cfg
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| Error::pool(format!("failed to create Redis pool: {}", e)))?;

        Ok(Self {
            pool,
            keys: Keys::new(config.namespace.as_deref()),
        })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::pool(format!("failed to get Redis connection: {}", e)))
    }

    /// Health check.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| Error::broker_with_source("PING failed", e))?;
        Ok(())
    }

    /// Move every member of `from` with score at most `cutoff` to the tail
    /// of the ready queue. The ZREM result guards against another process
    /// draining the same snapshot concurrently.
    async fn promote_due(&self, from: &str, cutoff: f64) -> Result<u64> {
        let mut conn = self.connection().await?;
        let due: Vec<String> = conn
            .zrangebyscore(from, "-inf", cutoff)
            .await
            .map_err(|e| Error::broker_with_source("ZRANGEBYSCORE failed", e))?;

        let mut moved = 0;
        for raw in due {
            let removed: i64 = conn
                .zrem(from, &raw)
                .await
                .map_err(|e| Error::broker_with_source("ZREM failed", e))?;
            if removed > 0 {
                let _: i64 = conn
                    .rpush(self.keys.ready(), &raw)
                    .await
                    .map_err(|e| Error::broker_with_source("RPUSH failed", e))?;
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// Remove a reservation; append the raw payload to `target` only when
    /// the reservation was still present, preserving single-location
    /// ownership when racing the reaper.
    async fn settle(&self, delivery: &Delivery, target: Option<&str>) -> Result<()> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn
            .zrem(self.keys.reserved(), &delivery.raw)
            .await
            .map_err(|e| Error::broker_with_source("ZREM failed", e))?;

        if removed > 0 {
            if let Some(target) = target {
                let _: i64 = conn
                    .rpush(target, &delivery.raw)
                    .await
                    .map_err(|e| Error::broker_with_source("RPUSH failed", e))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn send(&self, msg: &Message) -> Result<()> {
        let raw = msg.encode()?;
        let mut conn = self.connection().await?;
        let _: i64 = conn
            .rpush(self.keys.ready(), raw)
            .await
            .map_err(|e| Error::broker_with_source("RPUSH failed", e))?;
        Ok(())
    }

    async fn schedule(&self, msg: &Message) -> Result<()> {
        let Some(eta) = msg.eta else {
            warn!(id = %msg.id, task = %msg.task, "schedule called without eta; dropping");
            return Ok(());
        };
        let raw = msg.encode()?;
        let mut conn = self.connection().await?;
        let _: i64 = conn
            .zadd(self.keys.scheduled(), raw, eta)
            .await
            .map_err(|e| Error::broker_with_source("ZADD failed", e))?;
        Ok(())
    }

    async fn reserve(&self, timeout: Duration) -> Result<Option<Delivery>> {
        let mut conn = self.connection().await?;
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            // BLPOP takes whole seconds; round up so the budget is an
            // upper bound rather than zero.
            let block_secs = remaining.as_secs_f64().ceil() as u64;
            let popped: Option<(String, String)> = redis::cmd("BLPOP")
                .arg(self.keys.ready())
                .arg(block_secs)
                .query_async(&mut *conn)
                .await
                .map_err(|e| Error::broker_with_source("BLPOP failed", e))?;

            let Some((_, raw)) = popped else {
                return Ok(None);
            };

            match Message::decode(&raw) {
                Ok(message) => {
                    let reserved_at = clock::now_secs();
                    let _: i64 = conn
                        .zadd(self.keys.reserved(), &raw, reserved_at)
                        .await
                        .map_err(|e| Error::broker_with_source("ZADD failed", e))?;
                    return Ok(Some(Delivery {
                        raw,
                        message,
                        reserved_at,
                    }));
                }
                Err(e) => {
                    warn!(error = %e, "dead-lettering undecodable payload");
                    let _: i64 = conn
                        .rpush(self.keys.dead(), &raw)
                        .await
                        .map_err(|e| Error::broker_with_source("RPUSH failed", e))?;
                }
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.settle(delivery, None).await
    }

    async fn dead(&self, delivery: &Delivery) -> Result<()> {
        self.settle(delivery, Some(self.keys.dead())).await
    }

    async fn restore(&self, delivery: &Delivery) -> Result<()> {
        self.settle(delivery, Some(self.keys.ready())).await
    }

    async fn recover_expired(&self, visibility_timeout: Duration) -> Result<u64> {
        let cutoff = clock::now_secs() - visibility_timeout.as_secs_f64();
        self.promote_due(self.keys.reserved(), cutoff).await
    }

    async fn poll_schedule(&self) -> Result<u64> {
        self.promote_due(self.keys.scheduled(), clock::now_secs())
            .await
    }

    async fn send_heartbeat(&self, worker: &str, ts: Option<f64>) -> Result<()> {
        let ts = ts.unwrap_or_else(clock::now_secs);
        let mut conn = self.connection().await?;
        let _: i64 = conn
            .zadd(self.keys.workers(), worker, ts)
            .await
            .map_err(|e| Error::broker_with_source("ZADD failed", e))?;
        Ok(())
    }

    async fn list_alive_workers(&self, timeout: Duration) -> Result<Vec<String>> {
        let now = clock::now_secs();
        let mut conn = self.connection().await?;
        conn.zrangebyscore(self.keys.workers(), now - timeout.as_secs_f64(), now)
            .await
            .map_err(|e| Error::broker_with_source("ZRANGEBYSCORE failed", e))
    }

    async fn depth(&self, queue: QueueName) -> Result<u64> {
        let key = self.keys.resolve(queue);
        let mut conn = self.connection().await?;
        let count: i64 = match queue {
            QueueName::Ready | QueueName::Dead => conn
                .llen(key)
                .await
                .map_err(|e| Error::broker_with_source("LLEN failed", e))?,
            QueueName::Reserved | QueueName::Scheduled | QueueName::Workers => conn
                .zcard(key)
                .await
                .map_err(|e| Error::broker_with_source("ZCARD failed", e))?,
        };
        Ok(count as u64)
    }

    async fn purge(&self, queue: QueueName) -> Result<u64> {
        let depth = self.depth(queue).await?;
        let mut conn = self.connection().await?;
        let _: i64 = conn
            .del(self.keys.resolve(queue))
            .await
            .map_err(|e| Error::broker_with_source("DEL failed", e))?;
        Ok(depth)
    }
}
