//! # Courier Bus - In-Process Message Bus
//!
//! Components talk through topic-addressed messages instead of direct
//! references.
//!
//! ## Interaction Patterns
//!
//! | Pattern | Register with | Send with | Result |
//! |---------|---------------|-----------|--------|
//! | Publish/subscribe | `subscribe::<T>()` | `publish` | subscriber count |
//! | Request/response | `listen::<T, R>()` | `request`, `request_wait` | one `Response<R>` |
//! | Scatter/gather | `participate::<T, R>()` | `scatter` | every `Response<R>` |
//!
//! ## Dispatch Pipeline
//!
//! ```text
//! caller ──► route ──► topic trie ──► admit ──► breaker ──► cap ──► worker
//!                       (wildcards)   (lease,                         │
//!                                      filter)                        ▼
//!                                                  caller ◄── response sink
//! ```
//!
//! ## Failure Isolation
//!
//! - **Captured failures:** errors and panics inside callbacks become
//!   `ErrorInformation` and never unwind into the caller.
//! - **Circuit breakers:** an open breaker yields an empty response instead of
//!   an invocation.
//! - **Dead Letter Queue:** failed subscriber invocations are re-published as
//!   [`DeadLetter`] on [`DLQ_TOPIC`].

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
mod channel;
pub mod circuit_breaker;
pub mod config;
mod dispatch;
pub mod error;
pub mod event_source;
pub mod gather;
pub mod module;
mod participant;
pub mod registration;
pub mod routing;
pub mod trie;
pub mod workers;

// Re-export main types
pub use bus::{BusHandle, MessageBus};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerPolicy, CircuitState, SequentialCircuitBreaker,
    WindowedCircuitBreaker,
};
pub use config::{BusConfig, ConfigError};
pub use error::BusError;
pub use event_source::{CancellationToken, EventSource, EventSourceContext, EventSourceToken};
pub use gather::{PendingResponse, Responses, ScatterGather};
pub use module::{BusModule, ModuleToken};
pub use registration::{Handler, RegistrationBuilder, SubscriptionToken};
pub use routing::{RouteBuilder, RouteToken};
pub use workers::{ExecutionStrategy, ThreadReport, WorkerId, WorkerPool};

pub use courier_types::{AggregateError, Envelope, EnvelopeFactory, ErrorInformation, Response};

use serde::{Deserialize, Serialize};

/// Dead Letter Queue topic for failed subscriber invocations.
pub const DLQ_TOPIC: &str = "dlq.critical";

/// A subscriber invocation that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Name of the failing subscriber, if it had one.
    pub participant: Option<String>,
    /// Topic the original envelope was published to.
    pub topic: String,
    /// Id of the original envelope.
    pub envelope_id: u64,
    pub error: ErrorInformation,
}
