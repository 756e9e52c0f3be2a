//! # Lifecycle Scenarios
//!
//! Tokens, modules, event sources, named workers and bus disposal.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use courier_bus::{
        BusConfig, BusError, BusModule, ConfigError, EventSource, EventSourceContext, MessageBus,
    };
    use parking_lot::Mutex;

    use crate::support::{init_tracing, test_bus, wait_until};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Module that records every lifecycle call into a shared journal.
    struct Journaled {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
    }

    impl Journaled {
        fn new(name: &'static str, journal: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                journal: journal.clone(),
                fail_start: false,
            })
        }

        fn record(&self, step: &str) {
            self.journal.lock().push(format!("{step} {}", self.name));
        }
    }

    impl BusModule for Journaled {
        fn name(&self) -> &str {
            self.name
        }

        fn attach(&self, _bus: &MessageBus) -> Result<(), BusError> {
            self.record("attach");
            Ok(())
        }

        fn start(&self) -> Result<(), BusError> {
            self.record("start");
            if self.fail_start {
                return Err(BusError::InvalidOperation(format!("{} refused to start", self.name)));
            }
            Ok(())
        }

        fn stop(&self) {
            self.record("stop");
        }

        fn unattach(&self) {
            self.record("unattach");
        }
    }

    /// Publishes an increasing counter on every poll.
    struct Ticker {
        next: u32,
    }

    impl EventSource for Ticker {
        fn check_for_events(&mut self, ctx: &EventSourceContext) -> anyhow::Result<()> {
            ctx.bus().publish("ticks", self.next)?;
            self.next += 1;
            Ok(())
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_millis(5)
        }
    }

    // =============================================================================
    // TOKENS
    // =============================================================================

    #[test]
    fn test_subscription_token_double_dispose() {
        let bus = test_bus();
        let token = bus
            .subscribe::<u32>()
            .topic("t")
            .invoke(|_| Ok(()))
            .register()
            .unwrap();

        assert_eq!(bus.publish("t", 1u32).unwrap(), 1);
        token.dispose();
        assert!(token.is_disposed());
        token.dispose();
        assert_eq!(bus.publish("t", 2u32).unwrap(), 0);
    }

    #[test]
    fn test_dropping_token_unregisters() {
        let bus = test_bus();
        {
            let _token = bus
                .subscribe::<u32>()
                .topic("scoped")
                .invoke(|_| Ok(()))
                .register()
                .unwrap();
            assert_eq!(bus.publish("scoped", 1u32).unwrap(), 1);
        }
        assert_eq!(bus.publish("scoped", 2u32).unwrap(), 0);
    }

    // =============================================================================
    // MODULES
    // =============================================================================

    #[test]
    fn test_module_lifecycle_and_double_dispose() {
        let bus = test_bus();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let token = bus.add_module(Journaled::new("metrics", &journal)).unwrap();
        assert_eq!(bus.module_names(), vec!["metrics".to_string()]);
        assert_eq!(token.name(), "metrics");

        token.dispose();
        token.dispose();
        assert!(token.is_disposed());
        assert!(bus.module_names().is_empty());
        assert_eq!(
            *journal.lock(),
            vec!["attach metrics", "start metrics", "stop metrics", "unattach metrics"]
        );
    }

    #[test]
    fn test_duplicate_module_name_rejected() {
        let bus = test_bus();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let _first = bus.add_module(Journaled::new("audit", &journal)).unwrap();
        let second = bus.add_module(Journaled::new("audit", &journal));
        assert!(matches!(
            second,
            Err(BusError::DuplicateRegistration { kind: "module", .. })
        ));
        assert_eq!(bus.module_names().len(), 1);
    }

    #[test]
    fn test_failed_start_unattaches() {
        let bus = test_bus();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let module = Arc::new(Journaled {
            name: "grumpy",
            journal: journal.clone(),
            fail_start: true,
        });
        assert!(matches!(bus.add_module(module), Err(BusError::InvalidOperation(_))));
        assert!(bus.module_names().is_empty());
        assert_eq!(
            *journal.lock(),
            vec!["attach grumpy", "start grumpy", "unattach grumpy"]
        );
    }

    #[test]
    fn test_bus_dispose_stops_modules_in_reverse() {
        let bus = test_bus();
        let journal = Arc::new(Mutex::new(Vec::new()));
        let first = bus.add_module(Journaled::new("first", &journal)).unwrap();
        let _second = bus.add_module(Journaled::new("second", &journal)).unwrap();
        journal.lock().clear();

        bus.dispose();
        assert_eq!(
            *journal.lock(),
            vec!["stop second", "stop first", "unattach second", "unattach first"]
        );

        // Token disposal after bus disposal is a no-op.
        first.dispose();
        assert_eq!(journal.lock().len(), 4);
    }

    // =============================================================================
    // EVENT SOURCES
    // =============================================================================

    #[test]
    fn test_event_source_runs_until_disposed() {
        let bus = test_bus();
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = ticks.clone();
        let _sub = bus
            .subscribe::<u32>()
            .topic("ticks")
            .invoke(move |n| {
                sink.lock().push(*n);
                Ok(())
            })
            .register()
            .unwrap();

        let token = bus.run_event_source("ticker", Ticker { next: 0 }).unwrap();
        assert_eq!(token.name(), "ticker");
        assert!(wait_until(Duration::from_secs(5), || ticks.lock().len() >= 3));

        let report = bus.workers().thread_report();
        assert!(report.managed_threads.iter().any(|t| t.name == "ticker"));

        token.dispose();
        let after_stop = ticks.lock().len();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.lock().len(), after_stop);

        let seen = ticks.lock().clone();
        assert_eq!(seen, (0..after_stop as u32).collect::<Vec<_>>());
        assert!(bus.workers().thread_report().managed_threads.is_empty());
    }

    // =============================================================================
    // NAMED WORKERS
    // =============================================================================

    #[test]
    fn test_named_workers_and_pinned_registration() {
        let bus = test_bus();
        let workers = bus.workers();
        let eu = workers.start_dedicated_worker("billing.eu").unwrap();
        let us = workers.start_dedicated_worker("billing.us").unwrap();
        let _other = workers.start_dedicated_worker("shipping.eu").unwrap();

        assert_eq!(workers.find_workers("billing.*"), vec![eu, us]);
        assert_eq!(workers.find_workers("*.eu").len(), 2);
        assert_eq!(workers.worker_name(eu).as_deref(), Some("billing.eu"));

        let thread = Arc::new(Mutex::new(None));
        let sink = thread.clone();
        let _pinned = bus
            .subscribe::<u32>()
            .topic("invoices")
            .on_thread(eu)
            .invoke(move |_| {
                *sink.lock() = std::thread::current().name().map(String::from);
                Ok(())
            })
            .register()
            .unwrap();
        bus.publish("invoices", 1u32).unwrap();
        assert!(wait_until(Duration::from_secs(5), || thread.lock().is_some()));
        assert_eq!(thread.lock().as_deref(), Some("billing.eu"));

        let report = workers.thread_report();
        let entry = report.workers.iter().find(|w| w.id == eu).unwrap();
        assert_eq!(entry.name, "billing.eu");
        assert!(!entry.shared);
        assert!(wait_until(Duration::from_secs(5), || {
            workers.thread_report().workers.iter().any(|w| w.id == eu && w.processed == 1)
        }));

        workers.stop_dedicated_worker(us).unwrap();
        assert!(!workers.contains_worker(us));
        assert_eq!(workers.find_workers("billing.*"), vec![eu]);
        assert!(matches!(workers.stop_dedicated_worker(us), Err(BusError::UnknownWorker(_))));

        let orphan = bus.subscribe::<u32>().topic("x").on_thread(us).invoke(|_| Ok(())).register();
        assert!(matches!(orphan, Err(BusError::UnknownWorker(id)) if id == us));
    }

    // =============================================================================
    // DISPOSAL
    // =============================================================================

    #[test]
    fn test_disposed_bus_rejects_everything() {
        let bus = test_bus();
        let handle = bus.handle();
        let token = bus
            .subscribe::<u32>()
            .topic("t")
            .invoke(|_| Ok(()))
            .register()
            .unwrap();

        bus.dispose();
        bus.dispose();
        assert!(bus.is_disposed());
        assert!(!handle.is_alive());

        assert!(matches!(bus.publish("t", 1u32), Err(BusError::Disposed)));
        assert!(matches!(bus.request::<u32, u32>("t", 1), Err(BusError::Disposed)));
        assert!(matches!(bus.scatter::<u32, u32>("t", 1), Err(BusError::Disposed)));
        assert!(matches!(handle.publish("t", 1u32), Err(BusError::Disposed)));
        assert!(matches!(
            bus.subscribe::<u32>().topic("t").invoke(|_| Ok(())).register(),
            Err(BusError::Disposed)
        ));
        assert!(matches!(
            bus.run_event_source("late", Ticker { next: 0 }),
            Err(BusError::Disposed)
        ));

        token.dispose();
        assert!(token.is_disposed());
    }

    #[test]
    fn test_dropping_bus_invalidates_handles() {
        let bus = test_bus();
        let handle = bus.handle();
        assert!(handle.is_alive());
        drop(bus);
        assert!(!handle.is_alive());
        assert!(matches!(handle.publish("t", 1u32), Err(BusError::Disposed)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        init_tracing();
        let result = MessageBus::new(BusConfig {
            worker_threads: 0,
            ..BusConfig::default()
        });
        assert!(matches!(
            result,
            Err(BusError::Config(ConfigError::NoWorkerThreads))
        ));
    }

    #[test]
    fn test_disposal_drains_pending_pool_work() {
        let bus = test_bus();
        let done = Arc::new(AtomicUsize::new(0));
        let counter = done.clone();
        let _sub = bus
            .subscribe::<u32>()
            .topic("work")
            .on_thread_pool()
            .invoke(move |_| {
                std::thread::sleep(Duration::from_millis(10));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .register()
            .unwrap();

        for n in 0..4u32 {
            bus.publish("work", n).unwrap();
        }
        bus.dispose();
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }
}
