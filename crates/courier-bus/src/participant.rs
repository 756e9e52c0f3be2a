//! A registered callback plus everything that gates its invocation.

use crate::circuit_breaker::CircuitBreaker;
use crate::workers::ExecutionTarget;
use courier_types::{Envelope, ErrorInformation, Response};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

pub(crate) type HandlerFn<T, R> = Arc<dyn Fn(&Envelope<T>) -> anyhow::Result<R> + Send + Sync>;
pub(crate) type FilterFn<T> = Arc<dyn Fn(&Envelope<T>) -> bool + Send + Sync>;
pub(crate) type LeaseFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Outcome of claiming one invocation against the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    Granted { last: bool },
    Exhausted,
}

pub(crate) struct Participant<T, R> {
    pub(crate) id: u64,
    pub(crate) name: Option<String>,
    pub(crate) target: ExecutionTarget,
    pub(crate) handler: HandlerFn<T, R>,
    pub(crate) filter: Option<FilterFn<T>>,
    pub(crate) breaker: Option<Arc<dyn CircuitBreaker>>,
    pub(crate) limit: Option<u64>,
    pub(crate) invocations: AtomicU64,
    pub(crate) lease: Option<LeaseFn>,
}

impl<T, R> Participant<T, R> {
    /// False once the lease owner has been dropped.
    pub(crate) fn is_alive(&self) -> bool {
        self.lease.as_ref().map_or(true, |alive| alive())
    }

    /// Runs the filter. A panicking filter rejects the envelope.
    pub(crate) fn accepts(&self, envelope: &Envelope<T>) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        match catch_unwind(AssertUnwindSafe(|| filter(envelope))) {
            Ok(accepted) => accepted,
            Err(payload) => {
                let error = ErrorInformation::from_panic(payload.as_ref());
                warn!(participant = ?self.name, error = %error, "Filter panicked, envelope rejected");
                false
            }
        }
    }

    /// True if the breaker is closed (or absent).
    pub(crate) fn can_proceed(&self) -> bool {
        self.breaker.as_ref().map_or(true, |b| b.can_proceed())
    }

    pub(crate) fn claim(&self) -> Claim {
        let Some(limit) = self.limit else {
            self.invocations.fetch_add(1, Ordering::Relaxed);
            return Claim::Granted { last: false };
        };
        match self
            .invocations
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
        {
            Ok(previous) => Claim::Granted {
                last: previous + 1 == limit,
            },
            Err(_) => Claim::Exhausted,
        }
    }

    /// Invoke the callback, capturing errors and panics, and feed the breaker.
    pub(crate) fn invoke(&self, envelope: &Envelope<T>) -> Response<R> {
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.handler)(envelope)));
        let response = match outcome {
            Ok(Ok(value)) => Response::success(self.name.clone(), value),
            Ok(Err(error)) => Response::failure(
                self.name.clone(),
                ErrorInformation::from_error(&error).with_participant(self.name.clone()),
            ),
            Err(payload) => Response::failure(
                self.name.clone(),
                ErrorInformation::from_panic(payload.as_ref()).with_participant(self.name.clone()),
            ),
        };
        if let Some(breaker) = &self.breaker {
            breaker.record_result(response.is_success());
        }
        response
    }

    pub(crate) fn empty(&self) -> Response<R> {
        Response::empty(self.name.clone())
    }

    pub(crate) fn failed(&self, error: impl std::fmt::Display) -> Response<R> {
        Response::failure(
            self.name.clone(),
            ErrorInformation::new(error.to_string()).with_participant(self.name.clone()),
        )
    }
}
