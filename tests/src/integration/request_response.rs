//! # Request/Response Scenarios
//!
//! Exactly one responder answers each request. The earliest registration wins
//! when several match; a request with no admitted responder fails fast.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use courier_bus::{BusError, Handler};
    use courier_types::Envelope;

    use crate::support::test_bus;

    /// Stateful responder: running total of every amount seen.
    struct Ledger {
        total: AtomicU32,
    }

    impl Handler<u32, u32> for Ledger {
        fn handle(&self, envelope: &Envelope<u32>) -> anyhow::Result<u32> {
            Ok(self.total.fetch_add(*envelope.payload(), Ordering::SeqCst) + envelope.payload())
        }
    }

    #[test]
    fn test_request_round_trip() {
        let bus = test_bus();
        let _responder = bus
            .listen::<String, String>()
            .topic("echo")
            .invoke(|s| Ok(format!("{s}Responded")))
            .register()
            .unwrap();

        let reply: String = bus.request_wait("echo", "Request".to_string()).unwrap();
        assert_eq!(reply, "RequestResponded");
    }

    #[test]
    fn test_first_registered_responder_wins() {
        let bus = test_bus();
        let _first = bus
            .listen::<u32, &'static str>()
            .topic("who")
            .invoke(|_| Ok("first"))
            .register()
            .unwrap();
        let _second = bus
            .listen::<u32, &'static str>()
            .topic("who")
            .invoke(|_| Ok("second"))
            .register()
            .unwrap();

        for n in 0..5u32 {
            assert_eq!(bus.request_wait::<u32, &'static str>("who", n).unwrap(), "first");
        }
    }

    #[test]
    fn test_no_responder() {
        let bus = test_bus();
        let result = bus.request::<u32, u32>("nobody.home", 1);
        assert!(matches!(result, Err(BusError::NoResponder { topic }) if topic == "nobody.home"));
    }

    #[test]
    fn test_responder_error_is_captured() {
        let bus = test_bus();
        let _responder = bus
            .listen::<u32, u32>()
            .topic("divide")
            .name("divider")
            .invoke(|n| {
                anyhow::ensure!(*n != 0, "division by zero");
                Ok(100 / n)
            })
            .register()
            .unwrap();

        assert_eq!(bus.request_wait::<u32, u32>("divide", 4).unwrap(), 25);
        match bus.request_wait::<u32, u32>("divide", 0) {
            Err(BusError::Participant(info)) => {
                assert!(info.message.contains("division by zero"));
                assert_eq!(info.participant.as_deref(), Some("divider"));
            }
            other => panic!("expected participant error, got {other:?}"),
        }
    }

    #[test]
    fn test_responder_panic_is_captured() {
        let bus = test_bus();
        let _responder = bus
            .listen::<u32, u32>()
            .topic("explode")
            .on_thread_pool()
            .invoke(|_| panic!("responder exploded"))
            .register()
            .unwrap();

        let response = bus.request::<u32, u32>("explode", 1).unwrap().wait().unwrap();
        let info = response.error_information().expect("failure expected");
        assert!(info.panicked);
        assert!(info.message.contains("responder exploded"));
    }

    #[test]
    fn test_pooled_responder_with_handler() {
        let bus = test_bus();
        let ledger = Arc::new(Ledger {
            total: AtomicU32::new(0),
        });
        let _responder = bus
            .listen::<u32, u32>()
            .topic("ledger.add")
            .on_thread_pool()
            .handler(ledger.clone())
            .register()
            .unwrap();

        assert_eq!(bus.request_wait::<u32, u32>("ledger.add", 10).unwrap(), 10);
        assert_eq!(bus.request_wait::<u32, u32>("ledger.add", 5).unwrap(), 15);
        assert_eq!(ledger.total.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_wait_timeout_on_slow_responder() {
        let bus = test_bus();
        let _responder = bus
            .listen::<u32, u32>()
            .topic("slow")
            .on_dedicated_worker()
            .invoke(|n| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(*n)
            })
            .register()
            .unwrap();

        let pending = bus.request::<u32, u32>("slow", 1).unwrap();
        assert!(!pending.is_ready());
        let result = pending.wait_timeout(Duration::from_millis(20));
        assert!(matches!(result, Err(BusError::Timeout { .. })));
    }

    #[test]
    fn test_responder_sees_envelope_metadata() {
        let bus = test_bus();
        let _responder = bus
            .listen::<String, String>()
            .topic("whoami")
            .invoke_envelope(|envelope| {
                Ok(envelope.get_metadata("caller").unwrap_or("anonymous").to_string())
            })
            .register()
            .unwrap();

        let envelope = bus
            .envelope_factory()
            .create_for_topic("whoami", String::new())
            .with_metadata("caller", "billing");
        let response = bus
            .request_envelope::<String, String>(envelope)
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(response.value().map(String::as_str), Some("billing"));
    }

    #[test]
    fn test_exhausted_responder_returns_empty() {
        let bus = test_bus();
        let _responder = bus
            .listen::<u32, u32>()
            .topic("once")
            .maximum_invocations(1)
            .invoke(|n| Ok(*n))
            .register()
            .unwrap();

        assert_eq!(bus.request_wait::<u32, u32>("once", 7).unwrap(), 7);
        let result = bus.request_wait::<u32, u32>("once", 8);
        assert!(matches!(result, Err(BusError::EmptyResponse { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_response() {
        let bus = test_bus();
        let _responder = bus
            .listen::<u32, u32>()
            .topic("square")
            .on_worker()
            .invoke(|n| Ok(n * n))
            .register()
            .unwrap();

        let pending = bus.request::<u32, u32>("square", 12).unwrap();
        let response = tokio::time::timeout(Duration::from_secs(5), pending.response())
            .await
            .expect("response should arrive");
        assert_eq!(response.value(), Some(&144));
    }
}
