//! # Net Builder
//!
//! Declares nodes and validates the whole topology in one pass at `build()`.
//!
//! ## Validation
//!
//! All problems are collected before failing, so one build reports every
//! mistake:
//!
//! - net and node names must be non-empty plain segments (no `.` or `*`)
//! - node names must be unique and must not be `input`
//! - every `Source::Node` must name a declared node
//! - a node's input type must equal its source's output type
//! - sources must not form a cycle

use crate::error::NetError;
use crate::net::{Net, NodeDef, WireFn, Wiring};
use courier_bus::{ExecutionStrategy, MessageBus};
use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;

/// Topic suffix for the net's own input.
pub const INPUT_NODE: &str = "input";

/// Where a node takes its input from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    /// Payloads injected into the net.
    Input,
    /// Output of another node.
    Node(String),
}

impl Source {
    pub fn node(name: impl Into<String>) -> Self {
        Self::Node(name.into())
    }
}

/// A value's type, remembered for validation messages.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TypeTag {
    pub(crate) id: TypeId,
    pub(crate) name: &'static str,
}

impl TypeTag {
    fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }
}

/// Builder for a [`Net`] whose input payload is `In`.
#[must_use]
pub struct NetBuilder<In> {
    name: String,
    nodes: Vec<NodeDef>,
    _input: PhantomData<fn(In)>,
}

impl<In: Send + Sync + 'static> NetBuilder<In> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            _input: PhantomData,
        }
    }

    /// Add a node that runs on the publishing thread.
    pub fn node<NIn, Out, F>(self, name: impl Into<String>, source: Source, transform: F) -> Self
    where
        NIn: Send + Sync + 'static,
        Out: Send + Sync + 'static,
        F: Fn(&NIn) -> anyhow::Result<Out> + Send + Sync + 'static,
    {
        self.node_with_strategy(name, source, ExecutionStrategy::Immediate, transform)
    }

    /// Add a node with an explicit execution strategy.
    pub fn node_with_strategy<NIn, Out, F>(
        mut self,
        name: impl Into<String>,
        source: Source,
        strategy: ExecutionStrategy,
        transform: F,
    ) -> Self
    where
        NIn: Send + Sync + 'static,
        Out: Send + Sync + 'static,
        F: Fn(&NIn) -> anyhow::Result<Out> + Send + Sync + 'static,
    {
        let transform = std::sync::Arc::new(transform);
        let wire: WireFn = Box::new(move |bus: &MessageBus, wiring: &Wiring| {
            let handle = bus.handle();
            let transform = transform.clone();
            let output_topic = wiring.output_topic.clone();
            bus.subscribe::<NIn>()
                .topic(&wiring.source_topic)
                .name(wiring.registration_name.clone())
                .strategy(wiring.strategy)
                .invoke(move |input| {
                    let output = transform(input)?;
                    handle.publish(&output_topic, output)?;
                    Ok(())
                })
                .register()
        });

        self.nodes.push(NodeDef {
            name: name.into(),
            source,
            strategy,
            input: TypeTag::of::<NIn>(),
            output: TypeTag::of::<Out>(),
            wire,
        });
        self
    }

    /// Validate the topology and produce an attachable [`Net`].
    pub fn build(self) -> Result<Net<In>, NetError> {
        let problems = self.validate();
        if !problems.is_empty() {
            return Err(NetError::Validation(problems));
        }
        Ok(Net::new(self.name, self.nodes))
    }

    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if let Err(reason) = check_segment(&self.name) {
            problems.push(format!("net name '{}' {reason}", self.name));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if let Err(reason) = check_segment(&node.name) {
                problems.push(format!("node name '{}' {reason}", node.name));
            }
            if node.name == INPUT_NODE {
                problems.push(format!("node name '{INPUT_NODE}' is reserved"));
            }
            if !seen.insert(node.name.as_str()) {
                problems.push(format!("duplicate node '{}'", node.name));
            }
        }

        let outputs: HashMap<&str, TypeTag> = self
            .nodes
            .iter()
            .map(|n| (n.name.as_str(), n.output))
            .collect();
        let input = TypeTag::of::<In>();

        for node in &self.nodes {
            if let ExecutionStrategy::DedicatedThreads(0) = node.strategy {
                problems.push(format!("node '{}' needs at least one dedicated thread", node.name));
            }
            let (source_name, produced) = match &node.source {
                Source::Input => (INPUT_NODE, Some(input)),
                Source::Node(source) => (source.as_str(), outputs.get(source.as_str()).copied()),
            };
            match produced {
                None => problems.push(format!(
                    "node '{}' reads from missing node '{source_name}'",
                    node.name
                )),
                Some(produced) if produced.id != node.input.id => problems.push(format!(
                    "node '{}' expects {} but '{source_name}' produces {}",
                    node.name, node.input.name, produced.name
                )),
                Some(_) => {}
            }
        }

        problems.extend(self.find_cycles());
        problems
    }

    /// Each node has one source, so following sources from any node either
    /// reaches the input or loops.
    fn find_cycles(&self) -> Vec<String> {
        let sources: HashMap<&str, &Source> = self
            .nodes
            .iter()
            .map(|n| (n.name.as_str(), &n.source))
            .collect();

        let mut reported: HashSet<Vec<&str>> = HashSet::new();
        let mut problems = Vec::new();
        for node in &self.nodes {
            let mut path = vec![node.name.as_str()];
            let mut current = node.name.as_str();
            while let Some(Source::Node(next)) = sources.get(current) {
                if let Some(start) = path.iter().position(|n| *n == next.as_str()) {
                    let mut cycle: Vec<&str> = path[start..].to_vec();
                    cycle.sort_unstable();
                    if reported.insert(cycle.clone()) {
                        problems.push(format!("cycle through nodes {}", cycle.join(", ")));
                    }
                    break;
                }
                path.push(next.as_str());
                current = next.as_str();
            }
        }
        problems
    }
}

fn check_segment(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("is empty");
    }
    if name.contains('.') || name == "*" {
        return Err("must be a single topic segment");
    }
    Ok(())
}
