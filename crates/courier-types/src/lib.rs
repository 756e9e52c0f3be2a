//! # Courier Types
//!
//! Leaf data types shared by the bus and every collaborator built on it.
//!
//! ## Contents
//!
//! - **Envelope**: `Envelope<T>` and the `EnvelopeFactory` that assigns ids
//!   and tracks provenance across bus boundaries.
//! - **Topics**: canonicalization and path splitting for trie routing.
//! - **Responses**: `Response<T>` plus captured `ErrorInformation`.

pub mod envelope;
pub mod errors;
pub mod response;
pub mod topic;

pub use envelope::{Envelope, EnvelopeFactory, EnvelopeHop};
pub use errors::{AggregateError, ErrorInformation};
pub use response::Response;
pub use topic::{canonical_topic, canonical_topics, topic_segments, DEFAULT_TOPIC, WILDCARD};
