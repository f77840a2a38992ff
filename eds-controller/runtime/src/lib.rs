#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use eds_controller_core as core;
pub use eds_controller_discovery as discovery;
pub use eds_controller_k8s_api as k8s;
pub use eds_controller_k8s_index as index;

mod args;
pub use self::args::Args;

use futures::prelude::*;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Clone, Debug)]
struct EndpointsDiscover(index::SharedIndex);

impl EndpointsDiscover {
    pub fn new(index: index::SharedIndex) -> Self {
        Self(index)
    }
}

#[async_trait::async_trait]
impl core::DiscoverEndpoints for EndpointsDiscover {
    async fn get_snapshot(&self) -> anyhow::Result<core::Snapshot> {
        Ok(self.0.read().snapshot())
    }

    async fn watch_snapshots(&self) -> anyhow::Result<core::SnapshotStream> {
        let versions = self.0.read().watch_version();
        let index = self.0.clone();
        Ok(Box::pin(
            tokio_stream::wrappers::WatchStream::new(versions).map(move |_| index.read().snapshot()),
        ))
    }
}

/// Applies node weight changes to the endpoints index until the node index is dropped.
async fn reweigh(
    mut changes: mpsc::UnboundedReceiver<index::WeightChanged>,
    endpoints: index::SharedIndex,
) {
    while let Some(index::WeightChanged { node, weight }) = changes.recv().await {
        debug!(%node, weight, "Node weight changed");
        endpoints.write().reweigh_node(&node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    // `assert_pending!` expands to `core::task::Poll`; disambiguate from the re-exported `core` module.
    use ::core;
    use crate::{
        core::DiscoverEndpoints,
        index::{ClusterNaming, EndpointsIndex, NodeWeightConfig, NodeWeights},
        k8s::{EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Node, ObjectMeta},
    };
    use maplit::btreemap;
    use tokio_test::{assert_pending, task};

    const WEIGHT_ANNOTATION: &str = "eds.io/node-weight";

    fn mk_node(name: &str, weight: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: Some(btreemap! {
                    WEIGHT_ANNOTATION.to_string() => weight.to_string(),
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn mk_endpoints(ns: &str, name: &str, ip: &str, node: &str) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: ip.to_string(),
                    node_name: Some(node.to_string()),
                    ..Default::default()
                }]),
                ports: Some(vec![EndpointPort {
                    port: 8080,
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
        }
    }

    fn mk_indexes() -> (index::SharedNodeWeights, index::SharedIndex) {
        let node_weights = NodeWeights::shared(NodeWeightConfig {
            annotation: WEIGHT_ANNOTATION.to_string(),
            default_weight: 1,
        });
        let endpoints = EndpointsIndex::shared(ClusterNaming::default(), node_weights.clone());
        (node_weights, endpoints)
    }

    #[tokio::test]
    async fn snapshots_follow_index() {
        let (_, endpoints) = mk_indexes();
        let discover = EndpointsDiscover::new(endpoints.clone());

        let snapshot = discover.get_snapshot().await.unwrap();
        assert_eq!(snapshot.version, 0);
        assert!(snapshot.resources.is_empty());

        let mut snapshots = discover.watch_snapshots().await.unwrap();
        assert_eq!(snapshots.next().await.unwrap().version, 0);
        {
            let mut next = task::spawn(snapshots.next());
            assert_pending!(next.poll());
        }

        endpoints
            .write()
            .on_add(mk_endpoints("default", "simple", "10.0.0.1", "node1"));
        let snapshot = snapshots.next().await.unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.resources.len(), 1);
        assert_eq!(snapshot.resources[0].cluster_name, "default/simple");
        assert_eq!(discover.get_snapshot().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn weight_changes_reweigh_endpoints() {
        let (node_weights, endpoints) = mk_indexes();
        let mut changes = node_weights.write().subscribe();
        node_weights.write().on_add(mk_node("node1", "5"));
        endpoints
            .write()
            .on_add(mk_endpoints("default", "simple", "10.0.0.1", "node1"));
        endpoints
            .write()
            .on_add(mk_endpoints("default", "other", "10.0.0.2", "node2"));

        let weight = |cluster: &str| {
            endpoints
                .read()
                .contents()
                .find(|cla| cla.cluster_name == cluster)
                .and_then(|cla| cla.lb_endpoints().next().map(|ep| ep.weight()))
        };
        assert_eq!(weight("default/simple"), Some(5));

        node_weights
            .write()
            .on_update(mk_node("node1", "5"), mk_node("node1", "40"));
        assert_eq!(weight("default/simple"), Some(5));

        // Closing the receiver lets the task drain buffered changes and then stop.
        changes.close();
        reweigh(changes, endpoints.clone()).await;

        assert_eq!(weight("default/simple"), Some(40));
        assert_eq!(weight("default/other"), Some(1));
        assert_eq!(endpoints.read().snapshot().version, 3);
    }
}
