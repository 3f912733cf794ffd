//! Engine tuning parameters.

use std::time::Duration;

/// Tuning for the engine's control loop.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Sleep between poller ticks. Requests are observed within one tick, so
    /// this bounds control latency as well as refill cadence.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
        }
    }
}
