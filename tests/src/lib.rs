//! # Courier Test Suite
//!
//! Unified test crate for scenarios that span the bus, its workers and the
//! net layer.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── support.rs          # Tracing setup, polling helpers
//! └── integration/
//!     ├── pubsub.rs            # Fan-out, strategies, dead letters
//!     ├── request_response.rs  # Single responder round trips
//!     ├── scatter_gather.rs    # Fan-out with response collection
//!     ├── routing.rs           # Route tables, cross-bus envelopes
//!     ├── lifecycle.rs         # Tokens, modules, event sources, disposal
//!     └── net.rs               # Declarative pipelines
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p courier-tests
//! RUST_LOG=courier_bus=trace cargo test -p courier-tests integration::pubsub
//! ```

#![allow(dead_code)]

pub mod integration;
