//! Visibility-timeout recovery.

use crate::broker::Broker;
use conveyor_core::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Sweeps reservations that outlived the visibility timeout back into the
/// ready queue. Holds no state beyond the broker handle and the timeout.
pub struct Reaper {
    broker: Arc<dyn Broker>,
    visibility_timeout: Duration,
}

impl Reaper {
    pub fn new(broker: Arc<dyn Broker>, visibility_timeout: Duration) -> Self {
        Self {
            broker,
            visibility_timeout,
        }
    }

    /// Run one sweep, returning how many reservations were recovered.
    pub async fn reap(&self) -> Result<u64> {
        let recovered = self.broker.recover_expired(self.visibility_timeout).await?;
        if recovered > 0 {
            info!(recovered, "recovered expired reservations");
        }
        Ok(recovered)
    }
}
