//! A single named thread draining its own FIFO queue.

use super::{Job, WorkerId};
use crate::error::BusError;
use courier_types::ErrorInformation;
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, info, warn};

pub(crate) struct DedicatedWorker {
    id: WorkerId,
    name: String,
    thread_id: ThreadId,
    sender: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    processed: Arc<AtomicU64>,
}

impl DedicatedWorker {
    /// Spawn the worker thread. `capacity` bounds the queue when set.
    pub(crate) fn spawn(
        id: WorkerId,
        name: String,
        capacity: Option<usize>,
    ) -> Result<Self, BusError> {
        let (sender, receiver) = match capacity {
            Some(bound) => crossbeam_channel::bounded::<Job>(bound),
            None => crossbeam_channel::unbounded::<Job>(),
        };
        let processed = Arc::new(AtomicU64::new(0));
        let counter = processed.clone();
        let thread_name = name.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                // Ends once the sender is dropped and the queue is empty.
                for job in receiver.iter() {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                        let error = ErrorInformation::from_panic(payload.as_ref());
                        warn!(worker = %thread_name, error = %error, "Job panicked on dedicated worker");
                    }
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                debug!(worker = %thread_name, "Dedicated worker loop exited");
            })
            .map_err(|e| BusError::WorkerStart(format!("{name}: {e}")))?;

        info!(worker = %name, id = %id, bounded = capacity.is_some(), "Dedicated worker started");

        Ok(Self {
            id,
            name,
            thread_id: handle.thread().id(),
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            processed,
        })
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub(crate) fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub(crate) fn queued(&self) -> usize {
        self.sender.lock().as_ref().map_or(0, Sender::len)
    }

    /// Queue a job. Never blocks: a full bounded queue is an error.
    pub(crate) fn submit(&self, job: Job) -> Result<(), BusError> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(BusError::WorkerUnavailable(self.id));
        };
        sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => BusError::QueueFull(self.id),
            TrySendError::Disconnected(_) => BusError::WorkerUnavailable(self.id),
        })
    }

    /// Stop accepting work. The thread exits on its own once the queue drains.
    pub(crate) fn close(&self) {
        if self.sender.lock().take().is_some() {
            debug!(worker = %self.name, id = %self.id, "Dedicated worker closed");
        }
    }

    /// True once the worker thread has exited, or was already joined.
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.lock().as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the thread to exit. Call [`DedicatedWorker::close`] first.
    ///
    /// Called from the worker's own thread, the join is skipped and the
    /// thread exits on its own after the current job.
    pub(crate) fn join(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if thread::current().id() == self.thread_id {
            debug!(worker = %self.name, "Dedicated worker joined from its own thread, detaching");
            return;
        }
        if handle.join().is_err() {
            warn!(worker = %self.name, "Dedicated worker thread terminated abnormally");
        }
        info!(worker = %self.name, id = %self.id, processed = self.processed(), "Dedicated worker stopped");
    }

    /// Stop accepting work, let the queue drain, then join the thread.
    pub(crate) fn stop(&self) {
        self.close();
        self.join();
    }
}

impl Drop for DedicatedWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
