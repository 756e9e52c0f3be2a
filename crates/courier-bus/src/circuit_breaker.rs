//! Circuit breakers for participant fault isolation.
//!
//! A breaker gates invocation of one participant. While it is open, the
//! dispatch engine skips the participant and synthesizes an empty response.
//!
//! ## States
//!
//! ```text
//!            failures >= threshold
//!  ┌────────┐ ──────────────────────► ┌────────┐
//!  │ CLOSED │                         │  OPEN  │
//!  └────────┘ ◄────────────────────── └────────┘
//!       ▲      can_proceed() after         │
//!       │      cooldown expiry (lazy)      │
//!       └── success resets failures        │
//! ```
//!
//! There is no timer: the Open → Closed transition happens inside the first
//! `can_proceed()` call after the cooldown has passed. The closing caller
//! resets the failure count while the breaker still reads as open.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Invocations proceed.
    Closed,
    /// Invocations are skipped until the cooldown expires.
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

/// A fault-isolation gate for one participant.
pub trait CircuitBreaker: Send + Sync {
    /// Returns `true` if the participant may be invoked.
    ///
    /// Performs the lazy Open → Closed transition once the cooldown has passed.
    fn can_proceed(&self) -> bool;

    /// Record the outcome of one invocation.
    fn record_result(&self, success: bool);

    /// Current state, without triggering the lazy transition.
    fn state(&self) -> CircuitState;
}

/// Expiry value while the closing caller resets the failure count.
const CLOSING: u64 = u64::MAX;

/// Cooldown bookkeeping shared by both policies.
///
/// The expiry is stored as milliseconds since `epoch`, plus one, so that zero
/// can mean "closed".
#[derive(Debug)]
struct Cooldown {
    epoch: Instant,
    duration: Duration,
    expiry: AtomicU64,
}

impl Cooldown {
    fn new(duration: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            duration,
            expiry: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn trip(&self) -> bool {
        let expiry = self.now_ms() + self.duration.as_millis() as u64 + 1;
        self.expiry
            .compare_exchange(0, expiry, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Some(true)` if the cooldown just expired and this caller closed it.
    ///
    /// `reset` runs before the expiry is cleared, so a failure recorded
    /// meanwhile cannot trip a breaker that is about to close.
    fn check(&self, reset: impl FnOnce()) -> Option<bool> {
        let expiry = self.expiry.load(Ordering::Acquire);
        if expiry == 0 {
            return None;
        }
        if expiry == CLOSING || self.now_ms() + 1 < expiry {
            return Some(false);
        }
        if self
            .expiry
            .compare_exchange(expiry, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Some(false);
        }
        reset();
        self.expiry.store(0, Ordering::Release);
        Some(true)
    }

    fn is_open(&self) -> bool {
        self.expiry.load(Ordering::Acquire) != 0
    }
}

/// Trips after `threshold` consecutive failures since the last success.
#[derive(Debug)]
pub struct SequentialCircuitBreaker {
    threshold: u32,
    failures: AtomicU32,
    cooldown: Cooldown,
}

impl SequentialCircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: AtomicU32::new(0),
            cooldown: Cooldown::new(cooldown),
        }
    }

    /// Consecutive failures since the last success or reset.
    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }
}

impl CircuitBreaker for SequentialCircuitBreaker {
    fn can_proceed(&self) -> bool {
        match self.cooldown.check(|| self.failures.store(0, Ordering::Release)) {
            None => true,
            Some(false) if self.cooldown.is_open() => false,
            Some(closed_here) => {
                if closed_here {
                    info!(threshold = self.threshold, "Circuit breaker cooldown expired, closing");
                }
                true
            }
        }
    }

    fn record_result(&self, success: bool) {
        if success {
            self.failures.store(0, Ordering::Release);
            return;
        }
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.threshold && self.cooldown.trip() {
            warn!(
                failures,
                cooldown_ms = self.cooldown.duration.as_millis() as u64,
                "Circuit breaker opened after consecutive failures"
            );
        }
    }

    fn state(&self) -> CircuitState {
        if self.cooldown.is_open() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }
}

/// Trips after `threshold` failures among the most recent `window` invocations.
///
/// The window is a ring of atomic slots indexed by invocation count, so it is
/// independent of wall-clock time. The failure count is read from the slots
/// themselves and never drifts from them.
#[derive(Debug)]
pub struct WindowedCircuitBreaker {
    threshold: u32,
    slots: Box<[AtomicBool]>,
    cursor: AtomicUsize,
    cooldown: Cooldown,
}

impl WindowedCircuitBreaker {
    pub fn new(window: usize, threshold: u32, cooldown: Duration) -> Self {
        let window = window.max(1);
        Self {
            threshold: threshold.max(1),
            slots: (0..window).map(|_| AtomicBool::new(false)).collect(),
            cursor: AtomicUsize::new(0),
            cooldown: Cooldown::new(cooldown),
        }
    }

    /// Failures currently inside the window.
    pub fn failure_count(&self) -> u32 {
        let failures = self
            .slots
            .iter()
            .filter(|slot| slot.load(Ordering::Acquire))
            .count();
        u32::try_from(failures).unwrap_or(u32::MAX)
    }

    fn reset_window(&self) {
        for slot in self.slots.iter() {
            slot.store(false, Ordering::Release);
        }
    }
}

impl CircuitBreaker for WindowedCircuitBreaker {
    fn can_proceed(&self) -> bool {
        match self.cooldown.check(|| self.reset_window()) {
            None => true,
            Some(false) if self.cooldown.is_open() => false,
            Some(closed_here) => {
                if closed_here {
                    info!(window = self.slots.len(), "Circuit breaker cooldown expired, closing");
                }
                true
            }
        }
    }

    fn record_result(&self, success: bool) {
        let index = self.cursor.fetch_add(1, Ordering::AcqRel) % self.slots.len();
        let failed = !success;
        self.slots[index].store(failed, Ordering::Release);
        if !failed {
            return;
        }

        let failures = self.failure_count();
        if failures >= self.threshold && self.cooldown.trip() {
            warn!(
                failures,
                window = self.slots.len(),
                "Circuit breaker opened on windowed failure count"
            );
        }
    }

    fn state(&self) -> CircuitState {
        if self.cooldown.is_open() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }
}

/// Declarative breaker configuration for registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerPolicy {
    /// See [`SequentialCircuitBreaker`].
    Sequential { threshold: u32, cooldown: Duration },
    /// See [`WindowedCircuitBreaker`].
    Windowed {
        window: usize,
        threshold: u32,
        cooldown: Duration,
    },
}

impl CircuitBreakerPolicy {
    pub fn sequential(threshold: u32, cooldown: Duration) -> Self {
        Self::Sequential { threshold, cooldown }
    }

    pub fn windowed(window: usize, threshold: u32, cooldown: Duration) -> Self {
        Self::Windowed {
            window,
            threshold,
            cooldown,
        }
    }

    /// Build a fresh breaker for this policy.
    pub fn build(&self) -> Arc<dyn CircuitBreaker> {
        match *self {
            Self::Sequential { threshold, cooldown } => {
                Arc::new(SequentialCircuitBreaker::new(threshold, cooldown))
            }
            Self::Windowed {
                window,
                threshold,
                cooldown,
            } => Arc::new(WindowedCircuitBreaker::new(window, threshold, cooldown)),
        }
    }
}
