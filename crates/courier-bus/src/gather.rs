//! # Response Aggregation
//!
//! Completion state for request/response (`PendingResponse`) and
//! scatter/gather (`ScatterGather`).
//!
//! ```text
//! Created ──► Dispatching ──► Complete
//!               │  each participant pushes exactly one Response
//!               └─ completed_participants() only grows
//! ```
//!
//! Waiters block on a `parking_lot::Condvar`; async waiters park on a
//! `tokio::sync::Notify`. Nothing polls.

use crate::error::BusError;
use courier_types::{AggregateError, Response};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Sink a dispatched participant delivers its response to.
pub(crate) type ResponseSink<R> = Arc<dyn Fn(Response<R>) + Send + Sync>;

// ============================================================================
// Request / Response
// ============================================================================

struct ResponseSlot<R> {
    value: Mutex<Option<Response<R>>>,
    ready: Condvar,
    notify: Notify,
}

/// The single response to a request, possibly still in flight.
#[must_use]
pub struct PendingResponse<R> {
    slot: Arc<ResponseSlot<R>>,
    topic: String,
    default_timeout: Duration,
}

impl<R: Send + 'static> PendingResponse<R> {
    pub(crate) fn new(topic: String, default_timeout: Duration) -> (Self, ResponseSink<R>) {
        let slot = Arc::new(ResponseSlot {
            value: Mutex::new(None),
            ready: Condvar::new(),
            notify: Notify::new(),
        });
        let sink_slot = slot.clone();
        let sink: ResponseSink<R> = Arc::new(move |response| {
            let mut value = sink_slot.value.lock();
            if value.is_none() {
                *value = Some(response);
            }
            drop(value);
            sink_slot.ready.notify_all();
            sink_slot.notify.notify_waiters();
        });
        (
            Self {
                slot,
                topic,
                default_timeout,
            },
            sink,
        )
    }
}

impl<R> PendingResponse<R> {
    /// Topic the request was sent to, after routing.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.slot.value.lock().is_some()
    }

    /// Take the response if it has arrived.
    pub fn try_response(&mut self) -> Option<Response<R>> {
        self.slot.value.lock().take()
    }

    /// Block for the configured request timeout.
    pub fn wait(self) -> Result<Response<R>, BusError> {
        let timeout = self.default_timeout;
        self.wait_timeout(timeout)
    }

    pub fn wait_timeout(self, timeout: Duration) -> Result<Response<R>, BusError> {
        let mut value = self.slot.value.lock();
        if value.is_none() {
            self.slot
                .ready
                .wait_while_for(&mut value, |v| v.is_none(), timeout);
        }
        value.take().ok_or(BusError::Timeout { waited: timeout })
    }

    /// Await the response. Has no timeout of its own; wrap it in one if needed.
    pub async fn response(self) -> Response<R> {
        loop {
            let notified = self.slot.notify.notified();
            let ready = self.slot.value.lock().take();
            if let Some(response) = ready {
                return response;
            }
            notified.await;
        }
    }

    /// Block and unwrap into the responder's value.
    pub(crate) fn into_value(self) -> Result<R, BusError> {
        let topic = self.topic.clone();
        let response = self.wait()?;
        match response.into_result() {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(BusError::EmptyResponse { topic }),
            Err(error) => Err(BusError::Participant(error)),
        }
    }
}

// ============================================================================
// Scatter / Gather
// ============================================================================

struct GatherInner<R> {
    responses: Vec<Response<R>>,
    cursor: usize,
}

struct GatherState<R> {
    total: usize,
    inner: Mutex<GatherInner<R>>,
    progressed: Condvar,
    notify: Notify,
}

impl<R> GatherState<R> {
    /// Wait until at least `count` responses are buffered or the deadline passes.
    fn wait_for(&self, count: usize, deadline: Instant) -> usize {
        let count = count.min(self.total);
        let mut inner = self.inner.lock();
        while inner.responses.len() < count {
            if self.progressed.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        inner.responses.len()
    }
}

/// Responses from every participant of one scatter, in completion order.
#[must_use]
pub struct ScatterGather<R> {
    state: Arc<GatherState<R>>,
    topic: String,
    default_timeout: Duration,
}

impl<R: Send + 'static> ScatterGather<R> {
    pub(crate) fn new(topic: String, total: usize, default_timeout: Duration) -> (Self, ResponseSink<R>) {
        let state = Arc::new(GatherState {
            total,
            inner: Mutex::new(GatherInner {
                responses: Vec::with_capacity(total),
                cursor: 0,
            }),
            progressed: Condvar::new(),
            notify: Notify::new(),
        });
        let sink_state = state.clone();
        let sink: ResponseSink<R> = Arc::new(move |response| {
            let mut inner = sink_state.inner.lock();
            if inner.responses.len() < sink_state.total {
                inner.responses.push(response);
            }
            drop(inner);
            sink_state.progressed.notify_all();
            sink_state.notify.notify_waiters();
        });
        (
            Self {
                state,
                topic,
                default_timeout,
            },
            sink,
        )
    }
}

impl<R> ScatterGather<R> {
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Participants dispatched to. Fixed at scatter time.
    #[must_use]
    pub fn total_participants(&self) -> usize {
        self.state.total
    }

    #[must_use]
    pub fn completed_participants(&self) -> usize {
        self.state.inner.lock().responses.len()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_participants() == self.state.total
    }

    /// Every failure buffered so far, or `None` if nothing failed.
    #[must_use]
    pub fn aggregate_errors(&self) -> Option<AggregateError> {
        let errors: Vec<_> = self
            .state
            .inner
            .lock()
            .responses
            .iter()
            .filter_map(|r| r.error_information().cloned())
            .collect();
        (!errors.is_empty()).then_some(AggregateError { errors })
    }
}

impl<R: Clone> ScatterGather<R> {
    /// Block until `count` responses (or all) have arrived, bounded by the
    /// configured gather timeout. On timeout, returns what has arrived.
    pub fn gather_responses(&self, count: usize) -> Vec<Response<R>> {
        self.gather_responses_timeout(count, self.default_timeout)
    }

    pub fn gather_responses_timeout(&self, count: usize, timeout: Duration) -> Vec<Response<R>> {
        let available = self.state.wait_for(count, Instant::now() + timeout);
        let inner = self.state.inner.lock();
        inner.responses[..available.min(count)].to_vec()
    }

    /// Await `count` responses (or all). No timeout of its own.
    pub async fn gather_responses_async(&self, count: usize) -> Vec<Response<R>> {
        let count = count.min(self.state.total);
        loop {
            let notified = self.state.notify.notified();
            {
                let inner = self.state.inner.lock();
                if inner.responses.len() >= count {
                    return inner.responses[..count].to_vec();
                }
            }
            notified.await;
        }
    }

    /// Lazily yield up to `count` responses in completion order.
    ///
    /// Each call starts over from the first response; already buffered
    /// responses are yielded without waiting. Stops early if the gather
    /// timeout passes.
    pub fn get_responses(&self, count: usize) -> Responses<'_, R> {
        Responses {
            gather: self,
            index: 0,
            limit: count.min(self.state.total),
            deadline: Instant::now() + self.default_timeout,
        }
    }

    /// The next response not yet returned by this method, waiting up to the
    /// gather timeout. `None` once every response has been consumed.
    pub fn get_next_response(&self) -> Option<Response<R>> {
        let deadline = Instant::now() + self.default_timeout;
        let mut inner = self.state.inner.lock();
        if inner.cursor >= self.state.total {
            return None;
        }
        while inner.responses.len() <= inner.cursor {
            if self.state.progressed.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        let response = inner.responses.get(inner.cursor).cloned()?;
        inner.cursor += 1;
        Some(response)
    }
}

/// Iterator returned by [`ScatterGather::get_responses`].
pub struct Responses<'a, R> {
    gather: &'a ScatterGather<R>,
    index: usize,
    limit: usize,
    deadline: Instant,
}

impl<R: Clone> Iterator for Responses<'_, R> {
    type Item = Response<R>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.limit {
            return None;
        }
        let available = self.gather.state.wait_for(self.index + 1, self.deadline);
        if available <= self.index {
            return None;
        }
        let response = self.gather.state.inner.lock().responses.get(self.index).cloned();
        self.index += 1;
        response
    }
}
