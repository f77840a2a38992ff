//! Node -> load balancing weight

use ahash::AHashMap as HashMap;
use eds_controller_core::MAX_NODE_WEIGHT;
use eds_controller_k8s_api::{Event, Node, ResourceEvent, ResourceExt};
use parking_lot::RwLock;
use std::{collections::hash_map::Entry, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, warn};


pub type SharedNodeWeights = Arc<RwLock<NodeWeights>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeWeightConfig {
    /// The node annotation that holds a node's weight.
    pub annotation: String,

    /// Used for nodes that are not tracked or that do not have a valid weight annotation.
    pub default_weight: u32,
}

/// Published when a tracked node's weight is updated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeightChanged {
    pub node: String,
    pub weight: u32,
}

/// Tracks the load balancing weight of each node.
#[derive(Debug)]
pub struct NodeWeights {
    config: NodeWeightConfig,
    weights: HashMap<String, u32>,
    subscribers: Vec<mpsc::UnboundedSender<WeightChanged>>,
}

// === impl NodeWeights ===

impl NodeWeights {
    pub fn new(config: NodeWeightConfig) -> Self {
        Self {
            config,
            weights: HashMap::default(),
            subscribers: Vec::new(),
        }
    }

    pub fn shared(config: NodeWeightConfig) -> SharedNodeWeights {
        Arc::new(RwLock::new(Self::new(config)))
    }

    /// Returns the node's weight, or the default weight if the node is unknown.
    pub fn get_weight(&self, node: Option<&str>) -> u32 {
        node.and_then(|name| self.weights.get(name).copied())
            .unwrap_or(self.config.default_weight)
    }

    /// Receives a notice each time a tracked node's weight changes.
    ///
    /// Notices are sent without blocking while the index is being updated, so subscribers must
    /// not hold the index's lock while waiting on the receiver.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<WeightChanged> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Begins tracking a node. This does not notify subscribers.
    #[instrument(skip(self, node), fields(name = ?node.metadata.name))]
    pub fn on_add(&mut self, node: Node) {
        let Some(name) = node.metadata.name.clone() else {
            warn!("Ignoring node without a name");
            return;
        };
        let weight = self.weight_of(&node);
        debug!(weight, "Adding");
        self.weights.insert(name, weight);
    }

    /// Updates a tracked node's weight, notifying subscribers if it changed. Untracked nodes are
    /// ignored.
    #[instrument(skip(self, old, new), fields(name = ?old.metadata.name))]
    pub fn on_update(&mut self, old: Node, new: Node) {
        let Some(name) = old.metadata.name else {
            warn!("Ignoring node without a name");
            return;
        };
        self.update(name, &new);
    }

    /// Stops tracking a node. This does not notify subscribers.
    #[instrument(skip(self, node), fields(name = ?node.metadata.name))]
    pub fn on_delete(&mut self, node: Node) {
        self.remove(&node.name_any());
    }

    /// Applies a watch event. Events for other resource kinds are dropped.
    pub fn handle(&mut self, event: ResourceEvent) {
        match event {
            ResourceEvent::Node(Event::Add(node)) => self.on_add(node),
            ResourceEvent::Node(Event::Update { old, new }) => self.on_update(old, new),
            ResourceEvent::Node(Event::Delete(node))
            | ResourceEvent::Node(Event::DeleteFinalStateUnknown {
                last_known: node, ..
            }) => self.on_delete(node),
            event => warn!(kind = %event.kind(), "Ignoring event with unexpected resource kind"),
        }
    }

    /// The number of tracked nodes.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    fn update(&mut self, name: String, node: &Node) {
        let weight = self.weight_of(node);
        let Entry::Occupied(mut entry) = self.weights.entry(name) else {
            trace!("Not tracked");
            return;
        };
        if *entry.get() == weight {
            trace!(weight, "Unchanged");
            return;
        }

        debug!(weight, prior = *entry.get(), "Updating");
        entry.insert(weight);
        let change = WeightChanged {
            node: entry.key().clone(),
            weight,
        };
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    fn remove(&mut self, name: &str) {
        if self.weights.remove(name).is_some() {
            debug!("Deleted");
        } else {
            trace!("Not tracked");
        }
    }

    /// Reads the node's weight annotation, falling back to the default weight when the annotation
    /// is missing, malformed, or out of range.
    fn weight_of(&self, node: &Node) -> u32 {
        let Some(value) = node.annotations().get(&self.config.annotation) else {
            return self.config.default_weight;
        };
        match parse_weight(value) {
            Some(weight) => weight,
            None => {
                debug!(%value, "Invalid weight annotation");
                self.config.default_weight
            }
        }
    }
}

impl kubert::index::IndexClusterResource<Node> for NodeWeights {
    fn apply(&mut self, node: Node) {
        let name = node.name_any();
        if self.weights.contains_key(&name) {
            let _span = tracing::info_span!("update", %name).entered();
            self.update(name, &node);
        } else {
            self.on_add(node);
        }
    }

    fn delete(&mut self, name: String) {
        let _span = tracing::info_span!("delete", %name).entered();
        self.remove(&name);
    }
}

fn parse_weight(value: &str) -> Option<u32> {
    let weight = value.parse::<i64>().ok()?;
    u32::try_from(weight)
        .ok()
        .filter(|w| *w <= MAX_NODE_WEIGHT)
}
