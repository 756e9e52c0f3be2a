//! # Channels
//!
//! A channel is the participant list for one `(protocol, payload type,
//! response type, topic)`. All channels of a bus live in one [`TopicTrie`];
//! the root key separates protocols and types, the path is the topic.
//!
//! Lists are copy-on-write: dispatch clones an `Arc` snapshot and iterates it
//! without holding any lock, so registrations and removals during a dispatch
//! take effect from the next dispatch on.

use crate::error::BusError;
use crate::participant::Participant;
use crate::trie::TopicTrie;
use courier_types::topic_segments;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// The three dispatch protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Protocol {
    Publish,
    Request,
    Scatter,
}

impl Protocol {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Protocol::Publish => "publish",
            Protocol::Request => "request",
            Protocol::Scatter => "scatter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ChannelKey {
    protocol: Protocol,
    payload: TypeId,
    response: TypeId,
}

impl ChannelKey {
    pub(crate) fn of<T: 'static, R: 'static>(protocol: Protocol) -> Self {
        Self {
            protocol,
            payload: TypeId::of::<T>(),
            response: TypeId::of::<R>(),
        }
    }
}

pub(crate) type ParticipantList<T, R> = Arc<Vec<Arc<Participant<T, R>>>>;

pub(crate) struct Channel<T, R> {
    participants: RwLock<ParticipantList<T, R>>,
}

impl<T, R> Channel<T, R> {
    fn new() -> Self {
        Self {
            participants: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub(crate) fn snapshot(&self) -> ParticipantList<T, R> {
        self.participants.read().clone()
    }

    pub(crate) fn add(&self, participant: Arc<Participant<T, R>>) {
        let mut list = self.participants.write();
        let mut next = Vec::with_capacity(list.len() + 1);
        next.extend(list.iter().cloned());
        next.push(participant);
        *list = Arc::new(next);
    }

    /// Returns `false` if the participant was not in this channel.
    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut list = self.participants.write();
        if !list.iter().any(|p| p.id == id) {
            return false;
        }
        let next: Vec<_> = list.iter().filter(|p| p.id != id).cloned().collect();
        *list = Arc::new(next);
        true
    }
}

/// Every channel of one bus, type-erased behind `Any`.
///
/// The root key carries the `TypeId`s the channel was created with, so a
/// value found under a key always downcasts to that key's `Channel<T, R>`.
#[derive(Default)]
pub(crate) struct ChannelStore {
    trie: TopicTrie<ChannelKey, Arc<dyn Any + Send + Sync>>,
}

impl ChannelStore {
    /// The channel for an exact topic, created on first use.
    pub(crate) fn channel<T, R>(
        &self,
        protocol: Protocol,
        topic: &str,
    ) -> Result<Arc<Channel<T, R>>, BusError>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        let key = ChannelKey::of::<T, R>(protocol);
        let erased = self.trie.get_or_insert_with(&key, &topic_segments(topic), || {
            Arc::new(Channel::<T, R>::new()) as Arc<dyn Any + Send + Sync>
        })?;
        erased
            .downcast::<Channel<T, R>>()
            .map_err(|_| BusError::InvalidOperation(format!("channel type mismatch on '{topic}'")))
    }

    /// Channels matching a topic, where `*` segments match any one segment.
    pub(crate) fn resolve<T, R>(&self, protocol: Protocol, topic: &str) -> Vec<Arc<Channel<T, R>>>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        let key = ChannelKey::of::<T, R>(protocol);
        self.trie
            .lookup(&key, &topic_segments(topic))
            .into_iter()
            .filter_map(|erased| erased.downcast::<Channel<T, R>>().ok())
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.trie.clear();
    }
}
