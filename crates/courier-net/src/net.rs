//! A validated net, attachable to a bus as a module.

use crate::builder::{Source, TypeTag, INPUT_NODE};
use courier_bus::{BusError, BusModule, ExecutionStrategy, MessageBus, SubscriptionToken};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::marker::PhantomData;
use tracing::{debug, info};

/// Topics and options for one generated subscription.
pub(crate) struct Wiring {
    pub(crate) source_topic: String,
    pub(crate) output_topic: String,
    pub(crate) registration_name: String,
    pub(crate) strategy: ExecutionStrategy,
}

pub(crate) type WireFn =
    Box<dyn Fn(&MessageBus, &Wiring) -> Result<SubscriptionToken, BusError> + Send + Sync>;

pub(crate) struct NodeDef {
    pub(crate) name: String,
    pub(crate) source: Source,
    pub(crate) strategy: ExecutionStrategy,
    pub(crate) input: TypeTag,
    pub(crate) output: TypeTag,
    pub(crate) wire: WireFn,
}

/// A pipeline of transform nodes, fed through `"{net}.input"`.
///
/// Each node subscribes to its source's topic and publishes its result to
/// `"{net}.{node}"`.
pub struct Net<In> {
    name: String,
    nodes: Vec<NodeDef>,
    tokens: Mutex<Option<Vec<SubscriptionToken>>>,
    _input: PhantomData<fn(In)>,
}

impl<In: Send + Sync + 'static> Net<In> {
    pub(crate) fn new(name: String, nodes: Vec<NodeDef>) -> Self {
        Self {
            name,
            nodes,
            tokens: Mutex::new(None),
            _input: PhantomData,
        }
    }

    #[must_use]
    pub fn input_topic(&self) -> String {
        self.topic_for(INPUT_NODE)
    }

    /// Topic a node publishes its output to, if the node exists.
    #[must_use]
    pub fn output_topic(&self, node: &str) -> Option<String> {
        self.nodes
            .iter()
            .any(|n| n.name == node)
            .then(|| self.topic_for(node))
    }

    #[must_use]
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.tokens.lock().is_some()
    }

    /// Feed a payload into the net. Fails if the net is not attached.
    pub fn inject(&self, bus: &MessageBus, payload: In) -> Result<usize, BusError> {
        if !self.is_attached() {
            return Err(BusError::InvalidOperation(format!(
                "net '{}' is not attached",
                self.name
            )));
        }
        bus.publish(&self.input_topic(), payload)
    }

    fn topic_for(&self, node: &str) -> String {
        format!("{}.{}", self.name, node)
    }

    fn source_topic(&self, source: &Source) -> String {
        match source {
            Source::Input => self.input_topic(),
            Source::Node(node) => self.topic_for(node),
        }
    }

    /// Nodes ordered downstream first, so no node publishes before its
    /// consumers are subscribed.
    fn attach_order(&self) -> Vec<&NodeDef> {
        let by_name: HashMap<&str, &NodeDef> =
            self.nodes.iter().map(|n| (n.name.as_str(), n)).collect();

        let depth = |node: &NodeDef| {
            let mut depth = 1usize;
            let mut current = node;
            while let Source::Node(source) = &current.source {
                match by_name.get(source.as_str()) {
                    Some(next) if depth <= self.nodes.len() => {
                        depth += 1;
                        current = next;
                    }
                    _ => break,
                }
            }
            depth
        };

        let mut ordered: Vec<&NodeDef> = self.nodes.iter().collect();
        ordered.sort_by_key(|n| std::cmp::Reverse(depth(n)));
        ordered
    }
}

impl<In: Send + Sync + 'static> BusModule for Net<In> {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&self, bus: &MessageBus) -> Result<(), BusError> {
        let mut slot = self.tokens.lock();
        if slot.is_some() {
            return Err(BusError::InvalidOperation(format!(
                "net '{}' is already attached",
                self.name
            )));
        }

        let mut tokens = Vec::with_capacity(self.nodes.len());
        for node in self.attach_order() {
            let wiring = Wiring {
                source_topic: self.source_topic(&node.source),
                output_topic: self.topic_for(&node.name),
                registration_name: self.topic_for(&node.name),
                strategy: node.strategy,
            };
            // Tokens registered so far are disposed when dropped on error.
            let token = (node.wire)(bus, &wiring)?;
            debug!(
                net = %self.name,
                node = %node.name,
                from = %wiring.source_topic,
                to = %wiring.output_topic,
                input = node.input.name,
                output = node.output.name,
                "Net node wired"
            );
            tokens.push(token);
        }

        info!(net = %self.name, nodes = tokens.len(), "Net attached");
        *slot = Some(tokens);
        Ok(())
    }

    fn unattach(&self) {
        let Some(tokens) = self.tokens.lock().take() else {
            return;
        };
        for token in &tokens {
            token.dispose();
        }
        info!(net = %self.name, nodes = tokens.len(), "Net unattached");
    }
}
