//! # Routing Rules
//!
//! A route rewrites the topic of an outgoing envelope before dispatch. Rules
//! are evaluated in order and the first matching predicate wins. Without a
//! match and without a fallback the envelope keeps its topics.
//!
//! One route exists per `(protocol, payload type, response type)`; a route is
//! applied exactly once per dispatch, so a redirected envelope is never
//! routed again.

use crate::bus::BusCore;
use crate::channel::Protocol;
use courier_types::{Envelope, EnvelopeFactory};
use std::any::TypeId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

type Predicate<T> = Arc<dyn Fn(&Envelope<T>) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RouteKey {
    pub(crate) protocol: Protocol,
    payload: TypeId,
    response: TypeId,
}

impl RouteKey {
    pub(crate) fn of<T: 'static, R: 'static>(protocol: Protocol) -> Self {
        Self {
            protocol,
            payload: TypeId::of::<T>(),
            response: TypeId::of::<R>(),
        }
    }
}

/// Ordered topic rewrite rules for one payload type.
pub struct RouteBuilder<T> {
    rules: Vec<(Predicate<T>, String)>,
    otherwise: Option<String>,
}

impl<T> RouteBuilder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            otherwise: None,
        }
    }

    /// Send envelopes matching `predicate` to `topic`.
    #[must_use]
    pub fn when<F>(mut self, predicate: F, topic: impl Into<String>) -> Self
    where
        F: Fn(&Envelope<T>) -> bool + Send + Sync + 'static,
    {
        self.rules.push((Arc::new(predicate), topic.into()));
        self
    }

    /// Topic for envelopes that match no rule.
    #[must_use]
    pub fn otherwise(mut self, topic: impl Into<String>) -> Self {
        self.otherwise = Some(topic.into());
        self
    }

    pub(crate) fn build(self) -> RouteTable<T> {
        RouteTable {
            rules: self.rules,
            otherwise: self.otherwise,
        }
    }
}

impl<T> Default for RouteBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct RouteTable<T> {
    rules: Vec<(Predicate<T>, String)>,
    otherwise: Option<String>,
}

impl<T> RouteTable<T> {
    /// Destination topic for an envelope, if the table changes it.
    pub(crate) fn destination(&self, envelope: &Envelope<T>) -> Option<&str> {
        self.rules
            .iter()
            .find(|(predicate, _)| predicate(envelope))
            .map(|(_, topic)| topic.as_str())
            .or(self.otherwise.as_deref())
    }

    pub(crate) fn apply(&self, factory: &EnvelopeFactory, envelope: Envelope<T>) -> Envelope<T> {
        match self.destination(&envelope) {
            Some(topic) => {
                let topic = topic.to_string();
                factory.redirect(envelope, [topic])
            }
            None => envelope,
        }
    }
}

/// Removes a route when disposed or dropped.
#[must_use = "the route is removed when the token is dropped"]
pub struct RouteToken {
    key: RouteKey,
    bus: Weak<BusCore>,
    disposed: AtomicBool,
}

impl RouteToken {
    pub(crate) fn new(key: RouteKey, bus: Weak<BusCore>) -> Self {
        Self {
            key,
            bus,
            disposed: AtomicBool::new(false),
        }
    }

    /// Remove the route. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_route(&self.key);
        }
    }
}

impl Drop for RouteToken {
    fn drop(&mut self) {
        self.dispose();
    }
}
