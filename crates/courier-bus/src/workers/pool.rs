//! # Worker Pool
//!
//! Owns every execution context of one bus: the shared rayon pool, the
//! shared dedicated worker set, per-registration dedicated workers, and the
//! registry of managed (externally spawned) threads.
//!
//! Dedicated workers are also indexed by their dotted names, so a group of
//! related workers can be found with a wildcard pattern:
//!
//! ```text
//! billing.invoices   ─┐
//! billing.refunds    ─┼── find_workers("billing.*")
//! shipping.labels       (not matched)
//! ```

use super::dedicated::DedicatedWorker;
use super::{Job, WorkerId};
use crate::config::BusConfig;
use crate::error::BusError;
use crate::trie::TopicTrie;
use courier_types::topic_segments;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A resolved execution context for one registration.
#[derive(Clone)]
pub(crate) enum ExecutionTarget {
    Immediate,
    Pool,
    AnyWorker,
    Worker(WorkerId),
    Group(Arc<WorkerGroup>),
}

/// Dedicated workers that take turns, owned by one registration.
pub(crate) struct WorkerGroup {
    ids: Vec<WorkerId>,
    next: AtomicUsize,
}

impl WorkerGroup {
    fn next(&self) -> Option<WorkerId> {
        if self.ids.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.ids.len();
        Some(self.ids[index])
    }

    pub(crate) fn ids(&self) -> &[WorkerId] {
        &self.ids
    }
}

/// Count of pool jobs not yet finished, for best-effort draining.
#[derive(Default)]
struct Outstanding {
    count: Mutex<usize>,
    idle: Condvar,
}

struct OutstandingGuard(Arc<Outstanding>);

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

struct ManagedThread {
    name: String,
    thread_id: ThreadId,
    description: String,
}

type ManagedThreads = RwLock<BTreeMap<u64, ManagedThread>>;

/// Removes a managed thread from the registry when disposed or dropped.
#[must_use = "the thread is unregistered when the token is dropped"]
pub struct ManagedThreadToken {
    key: u64,
    registry: Weak<ManagedThreads>,
}

impl ManagedThreadToken {
    pub fn dispose(&self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Some(thread) = registry.write().remove(&self.key) {
                debug!(thread = %thread.name, "Managed thread unregistered");
            }
        }
    }
}

impl Drop for ManagedThreadToken {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Snapshot of one dedicated worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub id: WorkerId,
    pub name: String,
    pub thread: String,
    pub shared: bool,
    pub queued: usize,
    pub processed: u64,
}

/// Snapshot of one managed thread.
#[derive(Debug, Clone, Serialize)]
pub struct ManagedThreadReport {
    pub name: String,
    pub thread: String,
    pub description: String,
}

/// Serializable snapshot of every thread the bus knows about.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadReport {
    pub pool_threads: usize,
    pub pool_outstanding: usize,
    pub workers: Vec<WorkerReport>,
    pub managed_threads: Vec<ManagedThreadReport>,
}

/// Execution contexts for one bus.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    outstanding: Arc<Outstanding>,
    workers: RwLock<BTreeMap<WorkerId, Arc<DedicatedWorker>>>,
    /// Closed workers still draining, joined on dispose.
    retired: Mutex<Vec<Arc<DedicatedWorker>>>,
    names: TopicTrie<(), Arc<Mutex<Vec<WorkerId>>>>,
    shared: Vec<WorkerId>,
    next_shared: AtomicUsize,
    next_worker_id: AtomicU32,
    managed: Arc<ManagedThreads>,
    next_managed: AtomicU64,
    queue_capacity: Option<usize>,
    disposed: AtomicBool,
}

impl WorkerPool {
    /// Build the shared pool and start `config.worker_threads` shared workers.
    pub(crate) fn new(config: &BusConfig) -> Result<Self, BusError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.pool_threads)
            .thread_name(|i| format!("courier-pool-{i}"))
            .panic_handler(|payload| {
                let error = courier_types::ErrorInformation::from_panic(payload.as_ref());
                warn!(error = %error, "Job panicked on shared pool");
            })
            .build()
            .map_err(|e| BusError::WorkerStart(e.to_string()))?;

        let mut workers = Self {
            pool,
            outstanding: Arc::new(Outstanding::default()),
            workers: RwLock::new(BTreeMap::new()),
            retired: Mutex::new(Vec::new()),
            names: TopicTrie::new(),
            shared: Vec::new(),
            next_shared: AtomicUsize::new(0),
            next_worker_id: AtomicU32::new(1),
            managed: Arc::new(RwLock::new(BTreeMap::new())),
            next_managed: AtomicU64::new(1),
            queue_capacity: config.dedicated_queue_capacity,
            disposed: AtomicBool::new(false),
        };

        let mut shared = Vec::with_capacity(config.worker_threads);
        for i in 0..config.worker_threads {
            shared.push(workers.start_dedicated_worker(&format!("courier.worker.{i}"))?);
        }
        workers.shared = shared;

        info!(
            pool_threads = workers.pool.current_num_threads(),
            shared_workers = workers.shared.len(),
            "Worker pool started"
        );
        Ok(workers)
    }

    /// Start a dedicated worker under a dotted name. Names may repeat.
    pub fn start_dedicated_worker(&self, name: &str) -> Result<WorkerId, BusError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(BusError::Disposed);
        }
        let slot = self
            .names
            .get_or_insert_with(&(), &topic_segments(name), || Arc::new(Mutex::new(Vec::new())))?;

        let id = WorkerId(self.next_worker_id.fetch_add(1, Ordering::Relaxed));
        let worker = DedicatedWorker::spawn(id, name.to_string(), self.queue_capacity)?;
        self.workers.write().insert(id, Arc::new(worker));
        slot.lock().push(id);
        Ok(id)
    }

    /// Stop a dedicated worker after its queue drains.
    pub fn stop_dedicated_worker(&self, id: WorkerId) -> Result<(), BusError> {
        let worker = self.detach_worker(id).ok_or(BusError::UnknownWorker(id))?;
        worker.stop();
        Ok(())
    }

    /// Remove a worker from the registry and the name index.
    fn detach_worker(&self, id: WorkerId) -> Option<Arc<DedicatedWorker>> {
        let worker = self.workers.write().remove(&id)?;
        if let Some(slot) = self.names.get(&(), &topic_segments(worker.name())) {
            slot.lock().retain(|w| *w != id);
        }
        Some(worker)
    }

    /// Ids of the shared workers used by `on_worker()` registrations.
    #[must_use]
    pub fn shared_workers(&self) -> &[WorkerId] {
        &self.shared
    }

    #[must_use]
    pub fn contains_worker(&self, id: WorkerId) -> bool {
        self.workers.read().contains_key(&id)
    }

    #[must_use]
    pub fn worker_name(&self, id: WorkerId) -> Option<String> {
        self.workers.read().get(&id).map(|w| w.name().to_string())
    }

    /// Live dedicated workers whose name matches a dotted pattern. `*`
    /// matches one segment.
    #[must_use]
    pub fn find_workers(&self, pattern: &str) -> Vec<WorkerId> {
        let workers = self.workers.read();
        let mut found: Vec<WorkerId> = self
            .names
            .lookup(&(), &topic_segments(pattern))
            .iter()
            .flat_map(|slot| slot.lock().clone())
            .filter(|id| workers.contains_key(id))
            .collect();
        found.sort_unstable();
        found.dedup();
        found
    }

    /// Record a thread the bus did not spawn itself so it shows up in reports.
    pub fn register_managed_thread(
        &self,
        name: impl Into<String>,
        thread_id: ThreadId,
        description: impl Into<String>,
    ) -> ManagedThreadToken {
        let key = self.next_managed.fetch_add(1, Ordering::Relaxed);
        let thread = ManagedThread {
            name: name.into(),
            thread_id,
            description: description.into(),
        };
        debug!(thread = %thread.name, "Managed thread registered");
        self.managed.write().insert(key, thread);
        ManagedThreadToken {
            key,
            registry: Arc::downgrade(&self.managed),
        }
    }

    #[must_use]
    pub fn thread_report(&self) -> ThreadReport {
        let workers = self
            .workers
            .read()
            .values()
            .map(|w| WorkerReport {
                id: w.id(),
                name: w.name().to_string(),
                thread: format!("{:?}", w.thread_id()),
                shared: self.shared.contains(&w.id()),
                queued: w.queued(),
                processed: w.processed(),
            })
            .collect();
        let managed_threads = self
            .managed
            .read()
            .values()
            .map(|t| ManagedThreadReport {
                name: t.name.clone(),
                thread: format!("{:?}", t.thread_id),
                description: t.description.clone(),
            })
            .collect();

        ThreadReport {
            pool_threads: self.pool.current_num_threads(),
            pool_outstanding: *self.outstanding.count.lock(),
            workers,
            managed_threads,
        }
    }

    pub(crate) fn start_group(&self, base: &str, size: usize) -> Result<Arc<WorkerGroup>, BusError> {
        let mut ids = Vec::with_capacity(size);
        for i in 0..size {
            let name = if size == 1 {
                base.to_string()
            } else {
                format!("{base}.{i}")
            };
            match self.start_dedicated_worker(&name) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        let _ = self.stop_dedicated_worker(id);
                    }
                    return Err(e);
                }
            }
        }
        Ok(Arc::new(WorkerGroup {
            ids,
            next: AtomicUsize::new(0),
        }))
    }

    pub(crate) fn stop_group(&self, group: &WorkerGroup) {
        for id in group.ids() {
            // Already gone if the whole pool was disposed first.
            let _ = self.stop_dedicated_worker(*id);
        }
    }

    /// Close a group's workers without waiting for their queues.
    ///
    /// Closed workers drain in the background and are joined on dispose;
    /// those that already exited are released here.
    pub(crate) fn retire_group(&self, group: &WorkerGroup) {
        let mut retired = self.retired.lock();
        for id in group.ids() {
            if let Some(worker) = self.detach_worker(*id) {
                worker.close();
                retired.push(worker);
            }
        }
        retired.retain(|worker| !worker.is_finished());
    }

    /// Run or queue a job. Never blocks the caller except for `Immediate`.
    pub(crate) fn execute(&self, target: &ExecutionTarget, job: Job) -> Result<(), BusError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(BusError::Disposed);
        }
        match target {
            ExecutionTarget::Immediate => {
                job();
                Ok(())
            }
            ExecutionTarget::Pool => {
                self.spawn_pooled(job);
                Ok(())
            }
            ExecutionTarget::AnyWorker => {
                if self.shared.is_empty() {
                    return Err(BusError::WorkerStart("no shared workers".into()));
                }
                let index = self.next_shared.fetch_add(1, Ordering::Relaxed) % self.shared.len();
                self.submit(self.shared[index], job)
            }
            ExecutionTarget::Worker(id) => self.submit(*id, job),
            ExecutionTarget::Group(group) => match group.next() {
                Some(id) => self.submit(id, job),
                None => Err(BusError::WorkerStart("empty worker group".into())),
            },
        }
    }

    fn submit(&self, id: WorkerId, job: Job) -> Result<(), BusError> {
        let worker = self
            .workers
            .read()
            .get(&id)
            .cloned()
            .ok_or(BusError::WorkerUnavailable(id))?;
        worker.submit(job)
    }

    fn spawn_pooled(&self, job: Job) {
        *self.outstanding.count.lock() += 1;
        let guard = OutstandingGuard(self.outstanding.clone());
        self.pool.spawn(move || {
            let _guard = guard;
            job();
        });
    }

    /// Stop every dedicated worker, then wait up to `drain_timeout` for
    /// queued pool jobs.
    pub(crate) fn dispose(&self, drain_timeout: Duration) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let workers = std::mem::take(&mut *self.workers.write());
        for worker in workers.values() {
            worker.stop();
        }
        for worker in std::mem::take(&mut *self.retired.lock()) {
            worker.join();
        }

        // A pool thread waiting for the pool to go idle would wait for itself.
        if self.pool.current_thread_index().is_some() {
            debug!("Worker pool disposed from a pool thread, skipping drain");
            return;
        }
        let mut count = self.outstanding.count.lock();
        if *count > 0 {
            let timed_out = self
                .outstanding
                .idle
                .wait_while_for(&mut count, |c| *c > 0, drain_timeout)
                .timed_out();
            if timed_out {
                warn!(outstanding = *count, "Worker pool drain timed out");
            }
        }
        info!(stopped_workers = workers.len(), "Worker pool disposed");
    }
}
