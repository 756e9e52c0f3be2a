//! # Envelope
//!
//! The immutable carrier for every message on the bus.
//!
//! ## Properties
//!
//! - **Identity**: `id` is unique among envelopes created by one
//!   [`EnvelopeFactory`]. Factories never coordinate with each other.
//! - **Provenance**: `origin_bus_id` names the bus that created the envelope;
//!   `history` records one hop per bus boundary crossing.
//! - **Append-only metadata**: a key, once set, keeps its first value.

use crate::topic::canonical_topics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// One bus boundary crossing: the envelope had `envelope_id` on `bus_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHop {
    /// Bus the envelope was on before the crossing.
    pub bus_id: String,
    /// Envelope id on that bus.
    pub envelope_id: u64,
}

/// Message wrapper: identity, topics, payload, metadata and provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "EnvelopeWire<T>")]
pub struct Envelope<T> {
    id: u64,
    origin_bus_id: String,
    topics: Vec<String>,
    payload: T,
    metadata: BTreeMap<String, String>,
    history: Vec<EnvelopeHop>,
}

/// Decoded form of an envelope, before its topics are canonicalized.
#[derive(Deserialize)]
struct EnvelopeWire<T> {
    id: u64,
    origin_bus_id: String,
    topics: Vec<String>,
    payload: T,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    history: Vec<EnvelopeHop>,
}

impl<T> From<EnvelopeWire<T>> for Envelope<T> {
    fn from(wire: EnvelopeWire<T>) -> Self {
        Self {
            id: wire.id,
            origin_bus_id: wire.origin_bus_id,
            topics: canonical_topics(wire.topics),
            payload: wire.payload,
            metadata: wire.metadata,
            history: wire.history,
        }
    }
}

impl<T> Envelope<T> {
    /// Envelope id, unique per factory.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Id of the bus that created this envelope.
    #[must_use]
    pub fn origin_bus_id(&self) -> &str {
        &self.origin_bus_id
    }

    /// Canonical topics this envelope is published under. Never empty.
    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// The first (usually only) topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.topics.first().map(String::as_str).unwrap_or_default()
    }

    #[must_use]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Take the payload, dropping the envelope.
    pub fn into_payload(self) -> T {
        self.payload
    }

    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Add a metadata entry. Existing keys are never overwritten.
    ///
    /// Returns `false` if the key was already present.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.metadata.contains_key(&key) {
            return false;
        }
        self.metadata.insert(key, value.into());
        true
    }

    /// Builder form of [`Envelope::add_metadata`].
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_metadata(key, value);
        self
    }

    /// Bus crossings, oldest first.
    #[must_use]
    pub fn history(&self) -> &[EnvelopeHop] {
        &self.history
    }
}

/// Creates envelopes for one bus.
///
/// Ids come from an atomically incremented counter, so a factory can be
/// shared freely between publishing threads.
#[derive(Debug)]
pub struct EnvelopeFactory {
    bus_id: String,
    next_id: AtomicU64,
}

impl EnvelopeFactory {
    /// Create a factory for the given bus id. The first envelope gets id 1.
    #[must_use]
    pub fn new(bus_id: impl Into<String>) -> Self {
        Self {
            bus_id: bus_id.into(),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn bus_id(&self) -> &str {
        &self.bus_id
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create an envelope published under a set of topics.
    pub fn create<T, I, S>(&self, topics: I, payload: T) -> Envelope<T>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Envelope {
            id: self.next_id(),
            origin_bus_id: self.bus_id.clone(),
            topics: canonical_topics(topics),
            payload,
            metadata: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    /// Create an envelope for a single topic.
    pub fn create_for_topic<T>(&self, topic: &str, payload: T) -> Envelope<T> {
        self.create([topic], payload)
    }

    /// Re-issue an envelope that was created by another bus.
    ///
    /// The result has a fresh id from this factory and this bus as its origin;
    /// the foreign `(origin_bus_id, id)` pair is appended to the history.
    /// Envelopes that already belong to this bus are returned unchanged.
    pub fn accept_foreign<T>(&self, envelope: Envelope<T>) -> Envelope<T> {
        if envelope.origin_bus_id == self.bus_id {
            return envelope;
        }
        let mut history = envelope.history;
        history.push(EnvelopeHop {
            bus_id: envelope.origin_bus_id,
            envelope_id: envelope.id,
        });
        Envelope {
            id: self.next_id(),
            origin_bus_id: self.bus_id.clone(),
            topics: envelope.topics,
            payload: envelope.payload,
            metadata: envelope.metadata,
            history,
        }
    }

    /// Move an envelope to a new set of topics, keeping its identity.
    pub fn redirect<T, I, S>(&self, envelope: Envelope<T>, topics: I) -> Envelope<T>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Envelope {
            topics: canonical_topics(topics),
            ..envelope
        }
    }
}
