//! # Bus Configuration
//!
//! All limits and timeouts have defaults that can be overridden from the
//! environment.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `COURIER_BUS_ID` | random UUID | Bus identity stamped on envelopes |
//! | `COURIER_POOL_THREADS` | CPU count | Shared pool size |
//! | `COURIER_WORKER_THREADS` | `2` | Shared dedicated workers for `on_worker()` |
//! | `COURIER_QUEUE_CAPACITY` | unbounded | Dedicated worker queue bound |
//! | `COURIER_REQUEST_TIMEOUT_MS` | `10000` | Default `request_wait` timeout |
//! | `COURIER_GATHER_TIMEOUT_MS` | `10000` | Default gather timeout |
//! | `COURIER_DRAIN_TIMEOUT_MS` | `2000` | Pool drain budget at disposal |
//! | `COURIER_DEAD_LETTERS` | `true` | Re-publish subscriber failures on the DLQ topic |

use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A bus must have at least one shared worker thread.
    #[error("worker_threads must be at least 1")]
    NoWorkerThreads,

    /// A bounded queue of zero can never accept work.
    #[error("dedicated_queue_capacity must be greater than 0 when set")]
    ZeroQueueCapacity,

    /// Timeouts must be non-zero.
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Message bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Bus identity. A random UUID is used when absent.
    pub bus_id: Option<String>,
    /// Shared pool size. `0` lets the pool pick one thread per CPU.
    pub pool_threads: usize,
    /// Number of shared dedicated workers serving `on_worker()` registrations.
    pub worker_threads: usize,
    /// Bound for each dedicated worker queue. `None` means unbounded.
    pub dedicated_queue_capacity: Option<usize>,
    /// Default timeout for `request_wait` and `PendingResponse::wait`.
    pub request_timeout: Duration,
    /// Default timeout for blocking gather operations.
    pub gather_timeout: Duration,
    /// How long disposal waits for queued pool work.
    pub drain_timeout: Duration,
    /// Re-publish failed subscriber invocations as dead letters.
    pub dead_letters: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus_id: None,
            pool_threads: 0,
            worker_threads: 2,
            dedicated_queue_capacity: None,
            request_timeout: Duration::from_secs(10),
            gather_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(2),
            dead_letters: true,
        }
    }
}

impl BusConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("COURIER_BUS_ID") {
            if !id.is_empty() {
                config.bus_id = Some(id);
            }
        }
        if let Some(n) = parse_env("COURIER_POOL_THREADS") {
            config.pool_threads = n;
        }
        if let Some(n) = parse_env("COURIER_WORKER_THREADS") {
            config.worker_threads = n;
        }
        if let Some(n) = parse_env("COURIER_QUEUE_CAPACITY") {
            config.dedicated_queue_capacity = Some(n);
        }
        if let Some(ms) = parse_env("COURIER_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env("COURIER_GATHER_TIMEOUT_MS") {
            config.gather_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env("COURIER_DRAIN_TIMEOUT_MS") {
            config.drain_timeout = Duration::from_millis(ms);
        }
        if let Ok(val) = std::env::var("COURIER_DEAD_LETTERS") {
            config.dead_letters = val == "1" || val.to_lowercase() == "true";
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::NoWorkerThreads);
        }
        if self.dedicated_queue_capacity == Some(0) {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("request_timeout"));
        }
        if self.gather_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("gather_timeout"));
        }
        Ok(())
    }
}

fn parse_env<N: std::str::FromStr>(key: &str) -> Option<N> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}
