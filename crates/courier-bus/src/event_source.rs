//! # Event Sources
//!
//! Long-running producers that feed messages into the bus from their own
//! thread, e.g. polling a socket or a directory. Each source runs on a named
//! thread that shows up in the thread report, and is asked to stop through a
//! [`CancellationToken`] between iterations.

use crate::bus::{BusCore, BusHandle};
use crate::error::BusError;
use crate::workers::ManagedThreadToken;
use courier_types::ErrorInformation;
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Blocking and async views of one cancellation flag.
struct CancelSignal {
    cancelled: Mutex<bool>,
    wake: Condvar,
    notify: watch::Sender<bool>,
}

/// Cooperative cancellation flag, shared between the bus and one source.
#[derive(Clone)]
pub struct CancellationToken {
    signal: Arc<CancelSignal>,
    receiver: watch::Receiver<bool>,
}

impl CancellationToken {
    pub(crate) fn new() -> Self {
        let (notify, receiver) = watch::channel(false);
        Self {
            signal: Arc::new(CancelSignal {
                cancelled: Mutex::new(false),
                wake: Condvar::new(),
                notify,
            }),
            receiver,
        }
    }

    /// Request cancellation, waking every sleeper and awaiter.
    pub(crate) fn cancel(&self) {
        *self.signal.cancelled.lock() = true;
        self.signal.wake.notify_all();
        self.signal.notify.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.signal.cancelled.lock()
    }

    /// Sleep up to `duration`, waking early on cancellation.
    ///
    /// Returns `true` if cancellation was requested.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut cancelled = self.signal.cancelled.lock();
        if !*cancelled {
            self.signal
                .wake
                .wait_while_for(&mut cancelled, |cancelled| !*cancelled, duration);
        }
        *cancelled
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        while !*receiver.borrow_and_update() {
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

/// What an event source sees on every iteration.
pub struct EventSourceContext {
    name: String,
    bus: BusHandle,
    cancellation: CancellationToken,
}

impl EventSourceContext {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Weak handle for publishing into the bus.
    #[must_use]
    pub fn bus(&self) -> &BusHandle {
        &self.bus
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// A producer polled on its own thread until cancelled.
pub trait EventSource: Send + 'static {
    /// One iteration: check for new events and publish them.
    ///
    /// Errors are logged and the source keeps running.
    fn check_for_events(&mut self, ctx: &EventSourceContext) -> anyhow::Result<()>;

    /// Pause between iterations.
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(100)
    }
}

pub(crate) struct EventSourceRunner {
    name: String,
    cancellation: CancellationToken,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
    _registration: ManagedThreadToken,
}

impl EventSourceRunner {
    pub(crate) fn spawn<S: EventSource>(
        name: String,
        mut source: S,
        bus: BusHandle,
        register: impl FnOnce(ThreadId) -> ManagedThreadToken,
    ) -> Result<Self, BusError> {
        let cancellation = CancellationToken::new();
        let ctx = EventSourceContext {
            name: name.clone(),
            bus,
            cancellation: cancellation.clone(),
        };

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while !ctx.cancellation.is_cancelled() {
                    match catch_unwind(AssertUnwindSafe(|| source.check_for_events(&ctx))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            let error = ErrorInformation::from_error(&e);
                            warn!(source = %ctx.name, error = %error, "Event source iteration failed");
                        }
                        Err(payload) => {
                            let error = ErrorInformation::from_panic(payload.as_ref());
                            warn!(source = %ctx.name, error = %error, "Event source panicked");
                        }
                    }
                    if ctx.cancellation.sleep(source.poll_interval()) {
                        break;
                    }
                }
                debug!(source = %ctx.name, "Event source loop exited");
            })
            .map_err(|e| BusError::WorkerStart(format!("{name}: {e}")))?;

        let thread_id = handle.thread().id();
        info!(source = %name, "Event source started");
        Ok(Self {
            _registration: register(thread_id),
            name,
            cancellation,
            thread_id,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Signal cancellation and join, unless called from the source's own thread.
    pub(crate) fn stop(&self) {
        self.cancellation.cancel();
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if thread::current().id() == self.thread_id {
            return;
        }
        if handle.join().is_err() {
            warn!(source = %self.name, "Event source thread terminated abnormally");
        }
        info!(source = %self.name, "Event source stopped");
    }
}

/// Cancels an event source when disposed or dropped.
#[must_use = "the event source is cancelled when the token is dropped"]
pub struct EventSourceToken {
    id: u64,
    name: String,
    bus: Weak<BusCore>,
    disposed: AtomicBool,
}

impl EventSourceToken {
    pub(crate) fn new(id: u64, name: String, bus: Weak<BusCore>) -> Self {
        Self {
            id,
            name,
            bus,
            disposed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel the source and wait for its thread. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.stop_event_source(self.id);
        }
    }
}

impl Drop for EventSourceToken {
    fn drop(&mut self) {
        self.dispose();
    }
}
