use crate::{
    cluster_name::{ClusterNaming, PortGroups},
    node::SharedNodeWeights,
};
use ahash::AHashMap as HashMap;
use eds_controller_core::{ClusterLoadAssignment, LbEndpoint, Snapshot};
use eds_controller_k8s_api::{Endpoints, Event, ResourceEvent, ResourceExt};
use parking_lot::RwLock;
use std::{
    collections::{hash_map::Entry, BTreeMap, BTreeSet},
    net::SocketAddr,
    sync::Arc,
};
use tokio::sync::watch;
use tracing::{debug, instrument, trace, warn};


pub type SharedIndex = Arc<RwLock<EndpointsIndex>>;

/// Translates `Endpoints` resources into cluster load assignments.
///
/// Every mutation rebuilds the affected clusters in full while the caller holds the index's write
/// lock, so readers never observe a partially applied update.
#[derive(Debug)]
pub struct EndpointsIndex {
    naming: ClusterNaming,
    node_weights: SharedNodeWeights,

    /// The last observed state of each `Endpoints` resource, grouped by port.
    sources: HashMap<SourceRef, PortGroups>,

    /// The sources that contribute to each cluster. When sources share an address, the weight
    /// is taken from the first source in this order.
    contributors: HashMap<String, BTreeSet<SourceRef>>,

    /// Only clusters with at least one endpoint are present.
    assignments: HashMap<String, ClusterLoadAssignment>,

    /// Incremented each time `assignments` changes.
    version: watch::Sender<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceRef {
    pub namespace: String,
    pub name: String,
}

// === impl EndpointsIndex ===

impl EndpointsIndex {
    pub fn new(naming: ClusterNaming, node_weights: SharedNodeWeights) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            naming,
            node_weights,
            sources: HashMap::default(),
            contributors: HashMap::default(),
            assignments: HashMap::default(),
            version,
        }
    }

    pub fn shared(naming: ClusterNaming, node_weights: SharedNodeWeights) -> SharedIndex {
        Arc::new(RwLock::new(Self::new(naming, node_weights)))
    }

    pub fn on_add(&mut self, ep: Endpoints) {
        self.recompute(None, Some(ep))
    }

    pub fn on_update(&mut self, old: Endpoints, new: Endpoints) {
        self.recompute(Some(old), Some(new))
    }

    pub fn on_delete(&mut self, ep: Endpoints) {
        self.recompute(Some(ep), None)
    }

    /// Applies a watch event. Events for other resource kinds are dropped.
    pub fn handle(&mut self, event: ResourceEvent) {
        match event {
            ResourceEvent::Endpoints(Event::Add(ep)) => self.on_add(ep),
            ResourceEvent::Endpoints(Event::Update { old, new }) => self.on_update(old, new),
            ResourceEvent::Endpoints(Event::Delete(ep))
            | ResourceEvent::Endpoints(Event::DeleteFinalStateUnknown { last_known: ep, .. }) => {
                self.on_delete(ep)
            }
            event => warn!(kind = %event.kind(), "Ignoring event with unexpected resource kind"),
        }
    }

    /// Iterates over all cached assignments in no particular order.
    pub fn contents(&self) -> impl Iterator<Item = &ClusterLoadAssignment> + '_ {
        self.assignments.values()
    }

    /// Returns all cached assignments, ordered by cluster name.
    pub fn snapshot(&self) -> Snapshot {
        let mut resources = self.contents().cloned().collect::<Vec<_>>();
        resources.sort_by(|a, b| a.cluster_name.cmp(&b.cluster_name));
        Snapshot {
            version: *self.version.borrow(),
            resources,
        }
    }

    /// Observes the cache's version, which changes each time an assignment is updated.
    pub fn watch_version(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// The number of cached assignments.
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// The number of `Endpoints` resources currently tracked.
    pub fn sources_len(&self) -> usize {
        self.sources.len()
    }

    /// Rebuilds every cluster that has an endpoint on the given node so that it reflects the
    /// node's current weight.
    #[instrument(skip(self))]
    pub fn reweigh_node(&mut self, node: &str) {
        let clusters = self
            .sources
            .iter()
            .filter(|(_, groups)| groups.has_node(node))
            .flat_map(|(src, groups)| {
                groups.cluster_names(self.naming, &src.namespace, &src.name)
            })
            .collect::<BTreeSet<_>>();
        debug!(clusters = clusters.len(), "Reweighing");
        self.rebuild_all(clusters);
    }

    /// Changes how cluster names are derived and rebuilds the entire cache from the retained
    /// `Endpoints` state.
    #[instrument(skip(self))]
    pub fn set_naming(&mut self, naming: ClusterNaming) {
        if self.naming == naming {
            return;
        }
        self.naming = naming;

        let mut clusters = self.assignments.keys().cloned().collect::<BTreeSet<_>>();
        self.contributors.clear();
        for (src, groups) in self.sources.iter() {
            for cluster in groups.cluster_names(naming, &src.namespace, &src.name) {
                self.contributors
                    .entry(cluster.clone())
                    .or_default()
                    .insert(src.clone());
                clusters.insert(cluster);
            }
        }
        debug!(clusters = clusters.len(), "Renaming");
        self.rebuild_all(clusters);
    }

    #[instrument(
        skip(self, old, new),
        fields(
            old = ?old.as_ref().map(|ep| ep.name_any()),
            new = ?new.as_ref().map(|ep| ep.name_any()),
        )
    )]
    fn recompute(&mut self, old: Option<Endpoints>, new: Option<Endpoints>) {
        let mut clusters = BTreeSet::new();

        if let Some(old) = old {
            match SourceRef::from_endpoints(&old) {
                Some(src) => {
                    // The old resource may not match what was last indexed, so its clusters are
                    // rebuilt along with those of the retained state.
                    clusters.extend(PortGroups::from_endpoints(&old).cluster_names(
                        self.naming,
                        &src.namespace,
                        &src.name,
                    ));
                    if new.as_ref().and_then(SourceRef::from_endpoints).as_ref() != Some(&src) {
                        clusters.extend(self.remove_source(&src));
                    }
                }
                None => warn!("Ignoring prior Endpoints without a namespace"),
            }
        }

        if let Some(new) = new {
            let Some(src) = SourceRef::from_endpoints(&new) else {
                warn!("Ignoring Endpoints without a namespace");
                self.rebuild_all(clusters);
                return;
            };
            clusters.extend(self.remove_source(&src));
            let groups = PortGroups::from_endpoints(&new);
            for cluster in groups.cluster_names(self.naming, &src.namespace, &src.name) {
                self.contributors
                    .entry(cluster.clone())
                    .or_default()
                    .insert(src.clone());
                clusters.insert(cluster);
            }
            trace!(namespace = %src.namespace, name = %src.name, "Indexed");
            self.sources.insert(src, groups);
        }

        self.rebuild_all(clusters);
    }

    /// Drops a source's retained state, returning the clusters it contributed to.
    fn remove_source(&mut self, src: &SourceRef) -> Vec<String> {
        let Some(groups) = self.sources.remove(src) else {
            return vec![];
        };

        let clusters = groups
            .cluster_names(self.naming, &src.namespace, &src.name)
            .collect::<Vec<_>>();
        for cluster in &clusters {
            if let Entry::Occupied(mut entry) = self.contributors.entry(cluster.clone()) {
                entry.get_mut().remove(src);
                if entry.get().is_empty() {
                    entry.remove();
                }
            }
        }
        clusters
    }

    fn rebuild_all(&mut self, clusters: impl IntoIterator<Item = String>) {
        let mut changed = false;
        for cluster in clusters {
            changed |= self.rebuild(cluster);
        }
        if changed {
            self.version.send_modify(|v| *v += 1);
        }
    }

    /// Recomputes a cluster's endpoints from all of its contributing sources, removing the
    /// cluster if it has none. Returns true if the cached assignment changed.
    fn rebuild(&mut self, cluster: String) -> bool {
        let mut endpoints = BTreeMap::<SocketAddr, u32>::new();
        {
            let weights = self.node_weights.read();
            for src in self.contributors.get(&cluster).into_iter().flatten() {
                let Some(groups) = self.sources.get(src) else {
                    continue;
                };
                for member in groups.members(self.naming, &src.namespace, &src.name, &cluster) {
                    endpoints
                        .entry(member.addr)
                        .or_insert_with(|| weights.get_weight(member.node.as_deref()));
                }
            }
        }

        if endpoints.is_empty() {
            let removed = self.assignments.remove(&cluster).is_some();
            if removed {
                debug!(%cluster, "Removed");
            }
            return removed;
        }

        let cla = ClusterLoadAssignment::new(
            cluster.clone(),
            endpoints
                .into_iter()
                .map(|(addr, weight)| LbEndpoint::new(addr, weight)),
        );
        match self.assignments.entry(cluster) {
            Entry::Occupied(mut entry) => {
                if *entry.get() == cla {
                    trace!(cluster = %entry.key(), "Unchanged");
                    return false;
                }
                debug!(cluster = %entry.key(), endpoints = cla.lb_endpoints().count(), "Updated");
                entry.insert(cla);
            }
            Entry::Vacant(entry) => {
                debug!(cluster = %entry.key(), endpoints = cla.lb_endpoints().count(), "Added");
                entry.insert(cla);
            }
        }
        true
    }
}

impl kubert::index::IndexNamespacedResource<Endpoints> for EndpointsIndex {
    fn apply(&mut self, ep: Endpoints) {
        // The retained state stands in for the prior version of the resource.
        self.recompute(None, Some(ep))
    }

    fn delete(&mut self, namespace: String, name: String) {
        let src = SourceRef { namespace, name };
        let clusters = self.remove_source(&src);
        self.rebuild_all(clusters);
    }
}

// === impl SourceRef ===

impl SourceRef {
    fn from_endpoints(ep: &Endpoints) -> Option<Self> {
        Some(Self {
            namespace: ep.namespace()?,
            name: ep.name_any(),
        })
    }
}
