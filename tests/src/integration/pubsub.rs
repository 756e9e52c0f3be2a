//! # Publish/Subscribe Scenarios
//!
//! Fan-out delivery across execution strategies:
//!
//! 1. **Delivery**: every live, filter-passing subscriber sees a publish once
//! 2. **Ordering**: a dedicated worker runs its queue in FIFO order
//! 3. **Isolation**: a failing subscriber never affects the others; its
//!    failure is re-published on the dead letter topic

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use courier_bus::{BusConfig, CircuitBreakerPolicy, DeadLetter, DLQ_TOPIC};
    use parking_lot::Mutex;

    use crate::support::{test_bus, test_bus_with, wait_until};

    // =============================================================================
    // DELIVERY
    // =============================================================================

    fn counting(hits: &Arc<AtomicUsize>) -> impl Fn(&u32) -> anyhow::Result<()> + Send + Sync + 'static {
        let hits = hits.clone();
        move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_publish_reaches_every_subscriber_once() {
        let bus = test_bus();
        let hits: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let _tokens: Vec<_> = hits
            .iter()
            .map(|hit| {
                let hit = hit.clone();
                bus.subscribe::<String>()
                    .topic("greetings")
                    .invoke(move |_| {
                        hit.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .register()
                    .unwrap()
            })
            .collect();

        assert_eq!(bus.publish("greetings", "hi".to_string()).unwrap(), 3);
        for hit in &hits {
            assert_eq!(hit.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_filter_rejects_envelopes() {
        let bus = test_bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = bus
            .subscribe::<u32>()
            .topic("numbers")
            .with_filter(|envelope| *envelope.payload() % 2 == 0)
            .invoke(move |n| {
                sink.lock().push(*n);
                Ok(())
            })
            .register()
            .unwrap();

        let delivered: usize = (1..=6u32).map(|n| bus.publish("numbers", n).unwrap()).sum();
        assert_eq!(delivered, 3);
        assert_eq!(*seen.lock(), vec![2, 4, 6]);
    }

    #[test]
    fn test_multi_topic_envelope_delivers_once_per_subscriber() {
        let bus = test_bus();
        let eu = Arc::new(AtomicUsize::new(0));
        let us = Arc::new(AtomicUsize::new(0));
        let _eu = bus.subscribe::<u32>().topic("orders.eu").invoke(counting(&eu)).register().unwrap();
        let _us = bus.subscribe::<u32>().topic("orders.us").invoke(counting(&us)).register().unwrap();

        // "orders.eu" is matched both literally and by the wildcard.
        let envelope = bus.envelope_factory().create(["orders.eu", "orders.*"], 7u32);
        assert_eq!(bus.publish_envelope(envelope).unwrap(), 2);
        assert_eq!(eu.load(Ordering::SeqCst), 1);
        assert_eq!(us.load(Ordering::SeqCst), 1);

        assert_eq!(bus.publish("orders.*", 8u32).unwrap(), 2);
        assert_eq!(bus.publish("orders.asia", 9u32).unwrap(), 0);
    }

    #[test]
    fn test_reentrant_publish_from_handler() {
        let bus = test_bus();
        let handle = bus.handle();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();

        let _forward = bus
            .subscribe::<u32>()
            .topic("stage.one")
            .invoke(move |n| {
                handle.publish("stage.two", n + 1)?;
                Ok(())
            })
            .register()
            .unwrap();
        let _collect = bus
            .subscribe::<u32>()
            .topic("stage.two")
            .invoke(move |n| {
                sink.lock().push(*n);
                Ok(())
            })
            .register()
            .unwrap();

        bus.publish("stage.one", 41u32).unwrap();
        assert_eq!(*received.lock(), vec![42]);
    }

    #[test]
    fn test_subscriber_removed_after_invocation_cap() {
        let bus = test_bus();
        let _sub = bus
            .subscribe::<u32>()
            .topic("capped")
            .maximum_invocations(2)
            .invoke(|_| Ok(()))
            .register()
            .unwrap();

        assert_eq!(bus.publish("capped", 1u32).unwrap(), 1);
        assert_eq!(bus.publish("capped", 2u32).unwrap(), 1);
        assert_eq!(bus.publish("capped", 3u32).unwrap(), 0);
    }

    #[test]
    fn test_lease_expiry_removes_subscriber() {
        let bus = test_bus();
        let owner = Arc::new("view model".to_string());
        let _sub = bus
            .subscribe::<u32>()
            .topic("leased")
            .leased_to(&owner)
            .invoke(|_| Ok(()))
            .register()
            .unwrap();

        assert_eq!(bus.publish("leased", 1u32).unwrap(), 1);
        drop(owner);
        assert_eq!(bus.publish("leased", 2u32).unwrap(), 0);
    }

    // =============================================================================
    // EXECUTION STRATEGIES
    // =============================================================================

    #[test]
    fn test_dedicated_worker_preserves_fifo() {
        let bus = test_bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = bus
            .subscribe::<u32>()
            .topic("ordered")
            .on_dedicated_worker()
            .invoke(move |n| {
                sink.lock().push(*n);
                Ok(())
            })
            .register()
            .unwrap();

        for n in 0..200u32 {
            bus.publish("ordered", n).unwrap();
        }
        assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == 200));
        assert_eq!(*seen.lock(), (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_dedicated_threads_round_robin() {
        let bus = test_bus();
        let threads = Arc::new(Mutex::new(Vec::new()));
        let sink = threads.clone();
        let _sub = bus
            .subscribe::<u32>()
            .topic("spread")
            .name("rr")
            .on_dedicated_threads(3)
            .invoke(move |_| {
                let name = std::thread::current().name().unwrap_or_default().to_string();
                sink.lock().push(name);
                Ok(())
            })
            .register()
            .unwrap();

        assert_eq!(bus.workers().find_workers("courier.dedicated.rr.*").len(), 3);
        for n in 0..30u32 {
            bus.publish("spread", n).unwrap();
        }
        assert!(wait_until(Duration::from_secs(5), || threads.lock().len() == 30));

        let mut per_thread: HashMap<String, usize> = HashMap::new();
        for name in threads.lock().iter() {
            *per_thread.entry(name.clone()).or_default() += 1;
        }
        assert_eq!(per_thread.len(), 3);
        for i in 0..3 {
            assert_eq!(per_thread.get(&format!("courier.dedicated.rr.{i}")), Some(&10));
        }
    }

    fn sleepy(done: &Arc<AtomicUsize>) -> impl Fn(&u32) -> anyhow::Result<()> + Send + Sync + 'static {
        let done = done.clone();
        move |_| {
            std::thread::sleep(Duration::from_millis(800));
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_last_invocation_on_dedicated_worker_does_not_block_publish() {
        let bus = test_bus();
        let done = Arc::new(AtomicUsize::new(0));
        let _sub = bus
            .subscribe::<u32>()
            .topic("slow")
            .name("slow")
            .on_dedicated_worker()
            .maximum_invocations(1)
            .invoke(sleepy(&done))
            .register()
            .unwrap();

        let started = Instant::now();
        assert_eq!(bus.publish("slow", 1u32).unwrap(), 1);
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(bus.workers().find_workers("courier.dedicated.slow").is_empty());
        assert_eq!(bus.publish("slow", 2u32).unwrap(), 0);

        // The queued invocation still runs to completion.
        assert!(wait_until(Duration::from_secs(5), || done.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_expired_lease_on_dedicated_worker_does_not_block_publish() {
        let bus = test_bus();
        let done = Arc::new(AtomicUsize::new(0));
        let owner = Arc::new("screen".to_string());
        let _sub = bus
            .subscribe::<u32>()
            .topic("slow")
            .on_dedicated_threads(2)
            .leased_to(&owner)
            .invoke(sleepy(&done))
            .register()
            .unwrap();

        assert_eq!(bus.publish("slow", 1u32).unwrap(), 1);
        drop(owner);

        let started = Instant::now();
        assert_eq!(bus.publish("slow", 2u32).unwrap(), 0);
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(wait_until(Duration::from_secs(5), || done.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_shared_workers_serve_on_worker() {
        let bus = test_bus();
        let threads = Arc::new(Mutex::new(Vec::new()));
        let sink = threads.clone();
        let _sub = bus
            .subscribe::<u32>()
            .topic("shared")
            .on_worker()
            .invoke(move |_| {
                let name = std::thread::current().name().unwrap_or_default().to_string();
                sink.lock().push(name);
                Ok(())
            })
            .register()
            .unwrap();

        for n in 0..10u32 {
            bus.publish("shared", n).unwrap();
        }
        assert!(wait_until(Duration::from_secs(5), || threads.lock().len() == 10));
        assert!(threads.lock().iter().all(|name| name.starts_with("courier.worker.")));
    }

    #[test]
    fn test_pool_survives_panicking_subscriber() {
        let bus = test_bus();
        let completed = Arc::new(AtomicUsize::new(0));
        let letters = Arc::new(AtomicUsize::new(0));

        let done = completed.clone();
        let _work = bus
            .subscribe::<u32>()
            .topic("jobs")
            .name("half-broken")
            .on_thread_pool()
            .invoke(move |n| {
                if n % 2 == 1 {
                    panic!("odd job {n}");
                }
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .register()
            .unwrap();
        let dead = letters.clone();
        let _dlq = bus
            .subscribe::<DeadLetter>()
            .topic(DLQ_TOPIC)
            .invoke(move |letter| {
                assert!(letter.error.panicked);
                dead.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .register()
            .unwrap();

        for n in 0..20u32 {
            assert_eq!(bus.publish("jobs", n).unwrap(), 1);
        }
        assert!(wait_until(Duration::from_secs(5), || {
            completed.load(Ordering::SeqCst) == 10 && letters.load(Ordering::SeqCst) == 10
        }));
    }

    // =============================================================================
    // FAILURE ISOLATION
    // =============================================================================

    #[test]
    fn test_failure_becomes_dead_letter() {
        let bus = test_bus();
        let healthy = Arc::new(AtomicUsize::new(0));
        let letters = Arc::new(Mutex::new(Vec::new()));

        let _flaky = bus
            .subscribe::<String>()
            .topic("payments")
            .name("flaky")
            .invoke(|_| anyhow::bail!("gateway unreachable"))
            .register()
            .unwrap();
        let ok = healthy.clone();
        let _healthy = bus
            .subscribe::<String>()
            .topic("payments")
            .invoke(move |_| {
                ok.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .register()
            .unwrap();
        let sink = letters.clone();
        let _dlq = bus
            .subscribe::<DeadLetter>()
            .topic(DLQ_TOPIC)
            .invoke(move |letter| {
                sink.lock().push(letter.clone());
                Ok(())
            })
            .register()
            .unwrap();

        assert_eq!(bus.publish("payments", "charge".to_string()).unwrap(), 2);
        assert_eq!(healthy.load(Ordering::SeqCst), 1);

        let letters = letters.lock();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].participant.as_deref(), Some("flaky"));
        assert_eq!(letters[0].topic, "payments");
        assert!(letters[0].error.message.contains("gateway unreachable"));
        assert!(!letters[0].error.panicked);
    }

    #[test]
    fn test_failing_dead_letter_subscriber_does_not_loop() {
        let bus = test_bus();
        let attempts = Arc::new(AtomicUsize::new(0));
        let _flaky = bus
            .subscribe::<u32>()
            .topic("work")
            .invoke(|_| anyhow::bail!("boom"))
            .register()
            .unwrap();
        let seen = attempts.clone();
        let _dlq = bus
            .subscribe::<DeadLetter>()
            .topic(DLQ_TOPIC)
            .invoke(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("dead letter handler is broken too")
            })
            .register()
            .unwrap();

        bus.publish("work", 1u32).unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dead_letters_can_be_disabled() {
        let bus = test_bus_with(BusConfig {
            dead_letters: false,
            ..BusConfig::default()
        });
        let letters = Arc::new(AtomicUsize::new(0));
        let _flaky = bus
            .subscribe::<u32>()
            .topic("work")
            .invoke(|_| anyhow::bail!("boom"))
            .register()
            .unwrap();
        let seen = letters.clone();
        let _dlq = bus
            .subscribe::<DeadLetter>()
            .topic(DLQ_TOPIC)
            .invoke(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .register()
            .unwrap();

        bus.publish("work", 1u32).unwrap();
        assert_eq!(letters.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_open_breaker_skips_subscriber() {
        let bus = test_bus_with(BusConfig {
            dead_letters: false,
            ..BusConfig::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let _sub = bus
            .subscribe::<u32>()
            .topic("fragile")
            .with_circuit_breaker(CircuitBreakerPolicy::sequential(2, Duration::from_secs(60)))
            .invoke(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("always fails")
            })
            .register()
            .unwrap();

        assert_eq!(bus.publish("fragile", 1u32).unwrap(), 1);
        assert_eq!(bus.publish("fragile", 2u32).unwrap(), 1);
        assert_eq!(bus.publish("fragile", 3u32).unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
