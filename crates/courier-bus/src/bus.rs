//! # Message Bus
//!
//! The facade over channels, workers, routes, modules and event sources.
//!
//! `MessageBus` is the owner: dropping it disposes everything. Callbacks that
//! need to talk back to the bus capture a [`BusHandle`], which holds only a
//! weak reference and reports [`BusError::Disposed`] once the bus is gone.

use crate::channel::{ChannelStore, Protocol};
use crate::config::BusConfig;
use crate::error::BusError;
use crate::event_source::{EventSource, EventSourceRunner, EventSourceToken};
use crate::gather::{PendingResponse, ScatterGather};
use crate::module::{BusModule, ModuleEntry, ModuleToken};
use crate::registration::RegistrationBuilder;
use crate::routing::{RouteBuilder, RouteKey, RouteTable, RouteToken};
use crate::workers::{WorkerGroup, WorkerPool};
use courier_types::{Envelope, EnvelopeFactory};
use parking_lot::{Mutex, RwLock};
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Bookkeeping for one live registration.
pub(crate) struct RegistrationEntry {
    pub(crate) protocol: Protocol,
    pub(crate) topic: String,
    pub(crate) remove: Box<dyn Fn() + Send + Sync>,
    pub(crate) owned_workers: Option<Arc<WorkerGroup>>,
}

pub(crate) struct BusCore {
    pub(crate) id: String,
    pub(crate) config: BusConfig,
    pub(crate) factory: EnvelopeFactory,
    pub(crate) channels: ChannelStore,
    pub(crate) workers: WorkerPool,
    registrations: Mutex<HashMap<u64, RegistrationEntry>>,
    routes: RwLock<HashMap<RouteKey, Arc<dyn Any + Send + Sync>>>,
    modules: Mutex<Vec<ModuleEntry>>,
    event_sources: Mutex<HashMap<u64, EventSourceRunner>>,
    next_id: AtomicU64,
    disposing: AtomicBool,
    disposed: AtomicBool,
}

impl BusCore {
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn ensure_live(&self) -> Result<(), BusError> {
        if self.disposed.load(Ordering::Acquire) {
            Err(BusError::Disposed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn insert_registration(&self, id: u64, entry: RegistrationEntry) {
        self.registrations.lock().insert(id, entry);
    }

    /// Remove a registration from its channel and stop any workers it owns,
    /// waiting for their queues to drain.
    ///
    /// Returns `false` if it was already gone.
    pub(crate) fn unregister(&self, id: u64) -> bool {
        let Some(entry) = self.take_registration(id) else {
            return false;
        };
        if let Some(group) = &entry.owned_workers {
            self.workers.stop_group(group);
        }
        true
    }

    /// Like [`BusCore::unregister`], but owned workers are only closed.
    /// Used on the dispatch path, which must not wait on a worker.
    pub(crate) fn retire(&self, id: u64) -> bool {
        let Some(entry) = self.take_registration(id) else {
            return false;
        };
        if let Some(group) = &entry.owned_workers {
            self.workers.retire_group(group);
        }
        true
    }

    fn take_registration(&self, id: u64) -> Option<RegistrationEntry> {
        let entry = self.registrations.lock().remove(&id)?;
        (entry.remove)();
        debug!(
            registration = id,
            protocol = entry.protocol.as_str(),
            topic = %entry.topic,
            "Registration removed"
        );
        Some(entry)
    }

    pub(crate) fn route<T: 'static, R: 'static>(
        &self,
        protocol: Protocol,
        envelope: Envelope<T>,
    ) -> Envelope<T> {
        let table = self.routes.read().get(&RouteKey::of::<T, R>(protocol)).cloned();
        match table.and_then(|t| t.downcast::<RouteTable<T>>().ok()) {
            Some(table) => table.apply(&self.factory, envelope),
            None => envelope,
        }
    }

    fn add_route<T, R>(
        self: &Arc<Self>,
        protocol: Protocol,
        routes: RouteBuilder<T>,
    ) -> Result<RouteToken, BusError>
    where
        T: Send + Sync + 'static,
        R: 'static,
    {
        self.ensure_live()?;
        let key = RouteKey::of::<T, R>(protocol);
        let mut table = self.routes.write();
        if table.contains_key(&key) {
            return Err(BusError::DuplicateRegistration {
                kind: "route",
                key: format!("{} {}", protocol.as_str(), type_name::<T>()),
            });
        }
        table.insert(key, Arc::new(routes.build()));
        debug!(protocol = protocol.as_str(), payload = type_name::<T>(), "Route installed");
        Ok(RouteToken::new(key, Arc::downgrade(self)))
    }

    pub(crate) fn remove_route(&self, key: &RouteKey) {
        if self.routes.write().remove(key).is_some() {
            debug!(protocol = key.protocol.as_str(), "Route removed");
        }
    }

    pub(crate) fn remove_module(&self, id: u64) {
        let entry = {
            let mut modules = self.modules.lock();
            let Some(index) = modules.iter().position(|m| m.id == id) else {
                return;
            };
            modules.remove(index)
        };
        entry.module.stop();
        entry.module.unattach();
        debug!(module = entry.module.name(), "Module removed");
    }

    pub(crate) fn stop_event_source(&self, id: u64) {
        let runner = self.event_sources.lock().remove(&id);
        if let Some(runner) = runner {
            runner.stop();
        }
    }

    /// Tear everything down. Safe to call more than once, from any thread.
    pub(crate) fn dispose(&self) {
        if self.disposing.swap(true, Ordering::AcqRel) {
            return;
        }

        // Modules may still publish while stopping.
        let modules = std::mem::take(&mut *self.modules.lock());
        for entry in modules.iter().rev() {
            entry.module.stop();
        }
        for entry in modules.iter().rev() {
            entry.module.unattach();
        }

        self.disposed.store(true, Ordering::Release);

        let sources = std::mem::take(&mut *self.event_sources.lock());
        for runner in sources.values() {
            runner.stop();
        }

        let registrations = std::mem::take(&mut *self.registrations.lock());
        self.channels.clear();
        self.routes.write().clear();
        self.workers.dispose(self.config.drain_timeout);

        info!(
            bus_id = %self.id,
            modules = modules.len(),
            registrations = registrations.len(),
            "Message bus disposed"
        );
    }
}

/// An in-process message bus.
///
/// ```no_run
/// use courier_bus::{BusConfig, MessageBus};
///
/// let bus = MessageBus::new(BusConfig::default())?;
/// let _sub = bus
///     .subscribe::<String>()
///     .topic("greetings")
///     .invoke(|msg| {
///         println!("got {msg}");
///         Ok(())
///     })
///     .register()?;
/// bus.publish("greetings", "hello".to_string())?;
/// # Ok::<(), courier_bus::BusError>(())
/// ```
pub struct MessageBus {
    pub(crate) core: Arc<BusCore>,
}

impl MessageBus {
    /// Create a bus. Fails if the configuration is invalid or a worker
    /// thread cannot be started.
    pub fn new(config: BusConfig) -> Result<Self, BusError> {
        config.validate()?;
        let id = config
            .bus_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let workers = WorkerPool::new(&config)?;

        info!(bus_id = %id, "Message bus created");
        Ok(Self {
            core: Arc::new(BusCore {
                factory: EnvelopeFactory::new(id.clone()),
                id,
                config,
                channels: ChannelStore::default(),
                workers,
                registrations: Mutex::new(HashMap::new()),
                routes: RwLock::new(HashMap::new()),
                modules: Mutex::new(Vec::new()),
                event_sources: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                disposing: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.core.id
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.core.config
    }

    /// A weak, cloneable handle for use inside callbacks.
    #[must_use]
    pub fn handle(&self) -> BusHandle {
        BusHandle {
            core: Arc::downgrade(&self.core),
        }
    }

    #[must_use]
    pub fn envelope_factory(&self) -> &EnvelopeFactory {
        &self.core.factory
    }

    #[must_use]
    pub fn workers(&self) -> &WorkerPool {
        &self.core.workers
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.core.disposed.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a fire-and-forget subscriber.
    pub fn subscribe<T: Send + Sync + 'static>(&self) -> RegistrationBuilder<'_, T, ()> {
        RegistrationBuilder::new(self, Protocol::Publish)
    }

    /// Register a responder for `request`.
    pub fn listen<T, R>(&self) -> RegistrationBuilder<'_, T, R>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        RegistrationBuilder::new(self, Protocol::Request)
    }

    /// Register a participant for `scatter`.
    pub fn participate<T, R>(&self) -> RegistrationBuilder<'_, T, R>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        RegistrationBuilder::new(self, Protocol::Scatter)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Publish to every matching subscriber. Returns how many were dispatched to.
    pub fn publish<T: Send + Sync + 'static>(&self, topic: &str, payload: T) -> Result<usize, BusError> {
        let envelope = self.core.factory.create_for_topic(topic, payload);
        self.core.publish_envelope(envelope)
    }

    /// Publish a prepared envelope. Envelopes from another bus are re-issued
    /// under this bus first.
    pub fn publish_envelope<T: Send + Sync + 'static>(&self, envelope: Envelope<T>) -> Result<usize, BusError> {
        let envelope = self.core.factory.accept_foreign(envelope);
        self.core.publish_envelope(envelope)
    }

    pub fn request<T, R>(&self, topic: &str, payload: T) -> Result<PendingResponse<R>, BusError>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        let envelope = self.core.factory.create_for_topic(topic, payload);
        self.core.request_envelope(envelope)
    }

    pub fn request_envelope<T, R>(&self, envelope: Envelope<T>) -> Result<PendingResponse<R>, BusError>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        let envelope = self.core.factory.accept_foreign(envelope);
        self.core.request_envelope(envelope)
    }

    /// Request and block for the value, up to the configured request timeout.
    pub fn request_wait<T, R>(&self, topic: &str, payload: T) -> Result<R, BusError>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        self.request::<T, R>(topic, payload)?.into_value()
    }

    pub fn scatter<T, R>(&self, topic: &str, payload: T) -> Result<ScatterGather<R>, BusError>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        let envelope = self.core.factory.create_for_topic(topic, payload);
        self.core.scatter_envelope(envelope)
    }

    pub fn scatter_envelope<T, R>(&self, envelope: Envelope<T>) -> Result<ScatterGather<R>, BusError>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        let envelope = self.core.factory.accept_foreign(envelope);
        self.core.scatter_envelope(envelope)
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    pub fn setup_publish_routing<T>(&self, routes: RouteBuilder<T>) -> Result<RouteToken, BusError>
    where
        T: Send + Sync + 'static,
    {
        self.core.add_route::<T, ()>(Protocol::Publish, routes)
    }

    pub fn setup_request_routing<T, R>(&self, routes: RouteBuilder<T>) -> Result<RouteToken, BusError>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        self.core.add_route::<T, R>(Protocol::Request, routes)
    }

    pub fn setup_scatter_routing<T, R>(&self, routes: RouteBuilder<T>) -> Result<RouteToken, BusError>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        self.core.add_route::<T, R>(Protocol::Scatter, routes)
    }

    // ------------------------------------------------------------------
    // Modules and event sources
    // ------------------------------------------------------------------

    /// Attach and start a module. Module names are unique per bus.
    pub fn add_module<M: BusModule>(&self, module: Arc<M>) -> Result<ModuleToken, BusError> {
        self.core.ensure_live()?;
        let name = module.name().to_string();
        let duplicate = || BusError::DuplicateRegistration {
            kind: "module",
            key: name.clone(),
        };
        if self.module_names().contains(&name) {
            return Err(duplicate());
        }

        module.attach(self)?;
        if let Err(e) = module.start() {
            module.unattach();
            return Err(e);
        }

        let id = self.core.next_id();
        {
            let mut modules = self.core.modules.lock();
            if modules.iter().any(|m| m.module.name() == name) {
                drop(modules);
                module.stop();
                module.unattach();
                return Err(duplicate());
            }
            modules.push(ModuleEntry { id, module });
        }
        debug!(module = %name, "Module added");
        Ok(ModuleToken::new(id, name, Arc::downgrade(&self.core)))
    }

    /// Names of attached modules, in registration order.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        self.core
            .modules
            .lock()
            .iter()
            .map(|m| m.module.name().to_string())
            .collect()
    }

    /// Run an event source on its own named thread until the token is disposed.
    pub fn run_event_source<S: EventSource>(
        &self,
        name: impl Into<String>,
        source: S,
    ) -> Result<EventSourceToken, BusError> {
        self.core.ensure_live()?;
        let name = name.into();
        let id = self.core.next_id();
        let runner = EventSourceRunner::spawn(name.clone(), source, self.handle(), |thread_id| {
            self.core
                .workers
                .register_managed_thread(name.clone(), thread_id, "event source")
        })?;
        self.core.event_sources.lock().insert(id, runner);
        Ok(EventSourceToken::new(id, name, Arc::downgrade(&self.core)))
    }

    /// Dispose the bus. Idempotent; also runs on drop.
    pub fn dispose(&self) {
        self.core.dispose();
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.core.dispose();
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("id", &self.core.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Weak handle to a bus, safe to capture inside callbacks.
#[derive(Clone)]
pub struct BusHandle {
    core: Weak<BusCore>,
}

impl BusHandle {
    fn core(&self) -> Result<Arc<BusCore>, BusError> {
        let core = self.core.upgrade().ok_or(BusError::Disposed)?;
        core.ensure_live()?;
        Ok(core)
    }

    /// True while the bus is alive and not disposed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.core().is_ok()
    }

    pub fn publish<T: Send + Sync + 'static>(&self, topic: &str, payload: T) -> Result<usize, BusError> {
        let core = self.core()?;
        let envelope = core.factory.create_for_topic(topic, payload);
        core.publish_envelope(envelope)
    }

    pub fn publish_envelope<T: Send + Sync + 'static>(&self, envelope: Envelope<T>) -> Result<usize, BusError> {
        let core = self.core()?;
        let envelope = core.factory.accept_foreign(envelope);
        core.publish_envelope(envelope)
    }

    pub fn request<T, R>(&self, topic: &str, payload: T) -> Result<PendingResponse<R>, BusError>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        let core = self.core()?;
        let envelope = core.factory.create_for_topic(topic, payload);
        core.request_envelope(envelope)
    }

    pub fn scatter<T, R>(&self, topic: &str, payload: T) -> Result<ScatterGather<R>, BusError>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        let core = self.core()?;
        let envelope = core.factory.create_for_topic(topic, payload);
        core.scatter_envelope(envelope)
    }
}
