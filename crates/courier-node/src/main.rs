//! # Courier Node
//!
//! Hosts a single message bus and runs a short demonstration against it.
//!
//! ## Startup Sequence
//!
//! 1. Install the tracing subscriber (`RUST_LOG`, default `info`)
//! 2. Load `BusConfig` from `COURIER_*` environment variables
//! 3. Attach the `text` net and inject a payload
//! 4. Scatter a quote request to every pricing participant
//! 5. Print the worker thread report as JSON
//! 6. Dispose the bus

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use courier_bus::{BusConfig, DeadLetter, MessageBus, DLQ_TOPIC};
use courier_net::{NetBuilder, Source};

/// A pricing request fanned out to every quoting desk.
#[derive(Debug, Clone)]
struct QuoteRequest {
    symbol: String,
    quantity: u32,
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = BusConfig::from_env();
    let bus = MessageBus::new(config).context("failed to start message bus")?;

    info!("===========================================");
    info!("  Courier Node v{}", env!("CARGO_PKG_VERSION"));
    info!("  Bus: {}", bus.id());
    info!("===========================================");

    let _dead_letters = bus
        .subscribe::<DeadLetter>()
        .topic(DLQ_TOPIC)
        .name("node.dead-letters")
        .invoke(|letter| {
            warn!(topic = %letter.topic, error = %letter.error, "Dead letter");
            Ok(())
        })
        .register()?;

    run_net(&bus)?;
    run_scatter(&bus)?;

    let report = bus.workers().thread_report();
    println!("{}", serde_json::to_string_pretty(&report)?);

    bus.dispose();
    info!("Node stopped");
    Ok(())
}

/// Two-stage text pipeline; prints whatever reaches the last node.
fn run_net(bus: &MessageBus) -> Result<()> {
    let net = Arc::new(
        NetBuilder::<String>::new("text")
            .node("upper", Source::Input, |s: &String| Ok(s.to_uppercase()))
            .node("shout", Source::node("upper"), |s: &String| Ok(format!("{s}!!!")))
            .build()?,
    );
    let _module = bus.add_module(net.clone())?;

    let output = net
        .output_topic("shout")
        .context("net has no 'shout' node")?;
    let _printer = bus
        .subscribe::<String>()
        .topic(&output)
        .name("node.printer")
        .invoke(|s| {
            info!(output = %s, "Net produced");
            Ok(())
        })
        .register()?;

    net.inject(bus, "hello from courier".to_string())?;
    Ok(())
}

/// Each desk quotes on its own dedicated worker; one desk is always down.
fn run_scatter(bus: &MessageBus) -> Result<()> {
    let desks = [("north", 101u64), ("south", 99), ("east", 0)];
    let mut tokens = Vec::with_capacity(desks.len());
    for (desk, price) in desks {
        let token = bus
            .participate::<QuoteRequest, u64>()
            .topic("pricing.quote")
            .name(format!("desk.{desk}"))
            .on_dedicated_worker()
            .invoke(move |req| {
                anyhow::ensure!(price > 0, "desk {desk} is offline");
                Ok(price * u64::from(req.quantity))
            })
            .register()?;
        tokens.push(token);
    }

    let request = QuoteRequest {
        symbol: "ACME".to_string(),
        quantity: 10,
    };
    info!(symbol = %request.symbol, quantity = request.quantity, "Requesting quotes");
    let gather = bus.scatter::<QuoteRequest, u64>("pricing.quote", request)?;

    let responses = gather.gather_responses_timeout(gather.total_participants(), Duration::from_secs(5));
    for response in &responses {
        match response.value() {
            Some(total) => info!(desk = response.name().unwrap_or("?"), total, "Quote"),
            None => info!(desk = response.name().unwrap_or("?"), "No quote"),
        }
    }
    if let Some(errors) = gather.aggregate_errors() {
        warn!(failures = errors.errors.len(), "Some desks failed");
    }
    Ok(())
}
