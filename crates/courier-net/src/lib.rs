//! # Courier Net - Declarative Pipelines
//!
//! Composes transform nodes into a pipeline on top of a message bus. A net is
//! declared once, validated as a whole, and then attached to a bus as a
//! module; each node becomes an ordinary subscription.
//!
//! ```text
//!  inject("test")
//!       │
//!       ▼
//!  text.input ──► [upper] ──► text.upper ──► [shout] ──► text.shout
//!                  "TEST"                     "TEST!!!"
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let net = Arc::new(
//!     NetBuilder::<String>::new("text")
//!         .node("upper", Source::Input, |s: &String| Ok(s.to_uppercase()))
//!         .node("shout", Source::node("upper"), |s: &String| Ok(format!("{s}!!!")))
//!         .build()?,
//! );
//! let _module = bus.add_module(net.clone())?;
//! net.inject(&bus, "test".to_string())?;
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod builder;
pub mod error;
pub mod net;

pub use builder::{NetBuilder, Source, INPUT_NODE};
pub use error::NetError;
pub use net::Net;
