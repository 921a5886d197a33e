//! Configuration of the offload engine.
//!
//! These knobs encode the physical accelerator's concurrency limits, e.g.
//! "parallel execution slots per endpoint x number of endpoints", and are
//! read once when the context is acquired.
//!
//! # Example
//!
//! ```rust
//! use offload::OffloadConfig;
//!
//! let config = OffloadConfig::default().with_instances(2).with_max_pending(64);
//! config.validate().expect("valid config");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, OffloadResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Hardware instances opened at acquire time. Acquire fails if the
    /// service exposes fewer.
    pub instances: usize,
    /// Capacity `N` of every outstanding queue.
    pub queue_capacity: usize,
    /// Capacity of the shared ready queue. Must hold one full outstanding
    /// queue.
    pub ready_capacity: usize,
    /// Number `K` of outstanding queues callers can check out.
    pub outstanding_queues: usize,
    /// Busy retries per request before it is failed.
    pub max_retry: usize,
    /// Sleep between busy retries.
    pub retry_interval: Duration,
    /// Upper bound on jobs submitted to hardware and not yet retired.
    pub max_pending: usize,
    /// Minimum free window before the dispatcher resumes submitting.
    pub restart_threshold: usize,
    /// Sleep while the backpressure window is below the restart threshold.
    pub backpressure_interval: Duration,
    /// Sleep between two polls of an instance.
    pub poll_interval: Duration,
    /// Ceiling on one `drain` or `release_batch_queue` call, shared by every
    /// request it collects.
    pub wait_timeout: Duration,
    /// Ceiling on the wait for in-flight jobs during release.
    pub shutdown_timeout: Duration,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            instances: 8,
            queue_capacity: 1024,
            ready_capacity: 1024,
            outstanding_queues: 8,
            max_retry: 100,
            retry_interval: Duration::from_micros(50),
            max_pending: 256,
            restart_threshold: 48,
            backpressure_interval: Duration::from_micros(20),
            poll_interval: Duration::from_micros(10),
            wait_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl OffloadConfig {
    pub fn with_instances(mut self, instances: usize) -> Self {
        self.instances = instances;
        self
    }

    /// Sets both the outstanding queue and the ready queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self.ready_capacity = capacity;
        self
    }

    pub fn with_outstanding_queues(mut self, queues: usize) -> Self {
        self.outstanding_queues = queues;
        self
    }

    pub fn with_max_retry(mut self, max_retry: usize) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Sets `max_pending`, clamping `restart_threshold` into range.
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self.restart_threshold = self.restart_threshold.clamp(1, max_pending.max(1));
        self
    }

    pub fn with_restart_threshold(mut self, threshold: usize) -> Self {
        self.restart_threshold = threshold;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn validate(&self) -> OffloadResult<()> {
        let non_zero = [
            ("instances", self.instances),
            ("queue_capacity", self.queue_capacity),
            ("ready_capacity", self.ready_capacity),
            ("outstanding_queues", self.outstanding_queues),
            ("max_pending", self.max_pending),
            ("restart_threshold", self.restart_threshold),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(Error::InvalidConfig(format!("{name} must be > 0")));
        }
        if self.restart_threshold > self.max_pending {
            return Err(Error::InvalidConfig(format!(
                "restart_threshold={} exceeds max_pending={}",
                self.restart_threshold, self.max_pending
            )));
        }
        if self.ready_capacity < self.queue_capacity {
            return Err(Error::InvalidConfig(format!(
                "ready_capacity={} cannot hold a full outstanding queue of {}",
                self.ready_capacity, self.queue_capacity
            )));
        }
        if self.wait_timeout.is_zero() {
            return Err(Error::InvalidConfig("wait_timeout must be non-zero".into()));
        }
        Ok(())
    }
}
