//! # Registrations
//!
//! Subscribers, responders and participants are all created through one
//! builder. The protocol is fixed by the bus method that created it
//! (`subscribe`, `listen`, `participate`); everything else is optional
//! except the callback.
//!
//! A registration lives until its [`SubscriptionToken`] is disposed or
//! dropped. A leased registration additionally ends once its lease owner is
//! dropped; it is removed by the first dispatch that notices.

use crate::bus::{BusCore, MessageBus, RegistrationEntry};
use crate::channel::Protocol;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerPolicy};
use crate::error::BusError;
use crate::participant::{FilterFn, HandlerFn, LeaseFn, Participant};
use crate::workers::{ExecutionStrategy, ExecutionTarget, WorkerGroup};
use courier_types::{canonical_topic, topic::has_wildcard, Envelope};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// A stateful callback object, as an alternative to closures.
pub trait Handler<T, R>: Send + Sync + 'static {
    fn handle(&self, envelope: &Envelope<T>) -> anyhow::Result<R>;
}

/// Builder for subscribers, responders and participants.
#[must_use = "nothing is registered until register() is called"]
pub struct RegistrationBuilder<'a, T, R> {
    bus: &'a MessageBus,
    protocol: Protocol,
    topic: String,
    name: Option<String>,
    handler: Option<HandlerFn<T, R>>,
    strategy: ExecutionStrategy,
    filter: Option<FilterFn<T>>,
    limit: Option<u64>,
    breaker: Option<Arc<dyn CircuitBreaker>>,
    lease: Option<LeaseFn>,
}

impl<'a, T, R> RegistrationBuilder<'a, T, R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    pub(crate) fn new(bus: &'a MessageBus, protocol: Protocol) -> Self {
        Self {
            bus,
            protocol,
            topic: canonical_topic(None),
            name: None,
            handler: None,
            strategy: ExecutionStrategy::default(),
            filter: None,
            limit: None,
            breaker: None,
            lease: None,
        }
    }

    /// Topic to register on. Defaults to the default topic `""`.
    pub fn topic(mut self, topic: impl AsRef<str>) -> Self {
        self.topic = canonical_topic(Some(topic.as_ref()));
        self
    }

    /// Name reported in responses, errors and dead letters.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Callback receiving the payload.
    pub fn invoke<F>(mut self, callback: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(move |envelope: &Envelope<T>| callback(envelope.payload())));
        self
    }

    /// Callback receiving the whole envelope.
    pub fn invoke_envelope<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Envelope<T>) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(callback));
        self
    }

    /// Stateful handler object.
    pub fn handler<H: Handler<T, R>>(mut self, handler: Arc<H>) -> Self {
        self.handler = Some(Arc::new(move |envelope: &Envelope<T>| handler.handle(envelope)));
        self
    }

    pub fn strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Run on the publishing thread (the default).
    pub fn immediate(self) -> Self {
        self.strategy(ExecutionStrategy::Immediate)
    }

    /// Run on the bus's shared dedicated workers.
    pub fn on_worker(self) -> Self {
        self.strategy(ExecutionStrategy::AnyWorker)
    }

    pub fn on_thread_pool(self) -> Self {
        self.strategy(ExecutionStrategy::ThreadPool)
    }

    /// Run on a new dedicated thread owned by this registration, in FIFO order.
    pub fn on_dedicated_worker(self) -> Self {
        self.strategy(ExecutionStrategy::DedicatedWorker)
    }

    /// Run on `count` new dedicated threads owned by this registration.
    pub fn on_dedicated_threads(self, count: usize) -> Self {
        self.strategy(ExecutionStrategy::DedicatedThreads(count))
    }

    /// Run on an existing dedicated worker.
    pub fn on_thread(self, worker: crate::workers::WorkerId) -> Self {
        self.strategy(ExecutionStrategy::Thread(worker))
    }

    /// Only envelopes passing the predicate are delivered.
    pub fn with_filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Envelope<T>) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }

    /// Stop invoking after `count` invocations.
    pub fn maximum_invocations(mut self, count: u64) -> Self {
        self.limit = Some(count);
        self
    }

    /// Give this registration its own breaker.
    pub fn with_circuit_breaker(mut self, policy: CircuitBreakerPolicy) -> Self {
        self.breaker = Some(policy.build());
        self
    }

    /// Share a breaker with other registrations.
    pub fn with_shared_circuit_breaker(mut self, breaker: Arc<dyn CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Keep the registration only as long as `owner` is alive.
    pub fn leased_to<O: Send + Sync + 'static>(mut self, owner: &Arc<O>) -> Self {
        let weak = Arc::downgrade(owner);
        self.lease = Some(Arc::new(move || weak.strong_count() > 0));
        self
    }

    pub fn register(self) -> Result<SubscriptionToken, BusError> {
        let core = &self.bus.core;
        core.ensure_live()?;

        let Some(handler) = self.handler else {
            return Err(BusError::InvalidRegistration(format!(
                "{} registration on '{}' has no callback",
                self.protocol.as_str(),
                self.topic
            )));
        };
        if has_wildcard(&self.topic) {
            return Err(BusError::InvalidOperation(format!(
                "cannot register on wildcard topic '{}'",
                self.topic
            )));
        }
        if self.limit == Some(0) {
            return Err(BusError::InvalidRegistration(
                "maximum_invocations must be at least 1".into(),
            ));
        }

        let id = core.next_id();
        let (target, owned_workers) = resolve_target(core, self.strategy, self.name.as_deref(), id)?;

        let channel = match core.channels.channel::<T, R>(self.protocol, &self.topic) {
            Ok(channel) => channel,
            Err(e) => {
                if let Some(group) = &owned_workers {
                    core.workers.stop_group(group);
                }
                return Err(e);
            }
        };

        channel.add(Arc::new(Participant {
            id,
            name: self.name.clone(),
            target,
            handler,
            filter: self.filter,
            breaker: self.breaker,
            limit: self.limit,
            invocations: AtomicU64::new(0),
            lease: self.lease,
        }));
        core.insert_registration(
            id,
            RegistrationEntry {
                protocol: self.protocol,
                topic: self.topic.clone(),
                remove: Box::new(move || {
                    channel.remove(id);
                }),
                owned_workers,
            },
        );

        debug!(
            registration = id,
            protocol = self.protocol.as_str(),
            topic = %self.topic,
            name = ?self.name,
            strategy = ?self.strategy,
            "Registered"
        );
        Ok(SubscriptionToken {
            id,
            bus: Arc::downgrade(core),
            disposed: AtomicBool::new(false),
        })
    }
}

fn resolve_target(
    core: &BusCore,
    strategy: ExecutionStrategy,
    name: Option<&str>,
    id: u64,
) -> Result<(ExecutionTarget, Option<Arc<WorkerGroup>>), BusError> {
    let base = match name {
        Some(name) => format!("courier.dedicated.{name}"),
        None => format!("courier.dedicated.{id}"),
    };
    match strategy {
        ExecutionStrategy::Immediate => Ok((ExecutionTarget::Immediate, None)),
        ExecutionStrategy::ThreadPool => Ok((ExecutionTarget::Pool, None)),
        ExecutionStrategy::AnyWorker => Ok((ExecutionTarget::AnyWorker, None)),
        ExecutionStrategy::DedicatedWorker => {
            let group = core.workers.start_group(&base, 1)?;
            Ok((ExecutionTarget::Group(group.clone()), Some(group)))
        }
        ExecutionStrategy::DedicatedThreads(0) => Err(BusError::InvalidRegistration(
            "on_dedicated_threads needs at least one thread".into(),
        )),
        ExecutionStrategy::DedicatedThreads(count) => {
            let group = core.workers.start_group(&base, count)?;
            Ok((ExecutionTarget::Group(group.clone()), Some(group)))
        }
        ExecutionStrategy::Thread(worker) => {
            if core.workers.contains_worker(worker) {
                Ok((ExecutionTarget::Worker(worker), None))
            } else {
                Err(BusError::UnknownWorker(worker))
            }
        }
    }
}

/// Keeps a registration alive. Disposing (or dropping) it unregisters.
#[must_use = "the registration is removed when the token is dropped"]
pub struct SubscriptionToken {
    id: u64,
    bus: Weak<BusCore>,
    disposed: AtomicBool,
}

impl SubscriptionToken {
    /// Registration id. Lower ids were registered earlier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Unregister. Idempotent, and a no-op once the bus is disposed.
    ///
    /// An invocation already in flight runs to completion.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.unregister(self.id);
        }
    }
}

impl Drop for SubscriptionToken {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SubscriptionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionToken")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
