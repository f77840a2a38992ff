use crate::{
    discovery,
    index::{self, ClusterNaming, NodeWeightConfig},
    k8s, reweigh, EndpointsDiscover,
};
use anyhow::{bail, Result};
use clap::Parser;
use futures::prelude::*;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "eds", about = "An Envoy endpoint discovery controller")]
pub struct Args {
    #[clap(long, default_value = "eds=info,warn", env = "EDS_CONTROLLER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(long, default_value = "0.0.0.0:8001")]
    discovery_addr: SocketAddr,

    /// Names clusters `<service>[/<port>]` rather than `<namespace>/<service>[/<port>]`, so that
    /// same-named services in different namespaces share a cluster.
    #[clap(long)]
    exclude_namespace_from_cluster_name: bool,

    /// The node annotation that sets the load balancing weight of the node's endpoints.
    #[clap(long, default_value = "eds.io/node-weight")]
    node_weight_annotation: String,

    /// The weight of endpoints on nodes without a valid weight annotation.
    #[clap(
        long,
        default_value = "1",
        value_parser = clap::value_parser!(u32).range(0..=128),
    )]
    default_node_weight: u32,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            discovery_addr,
            exclude_namespace_from_cluster_name,
            node_weight_annotation,
            default_node_weight,
        } = self;

        let naming = if exclude_namespace_from_cluster_name {
            ClusterNaming::NamespaceExcluded
        } else {
            ClusterNaming::NamespaceQualified
        };

        // Build the index data structures which translate cluster resources into the load
        // assignments served by the discovery server.
        let node_weights = index::NodeWeights::shared(NodeWeightConfig {
            annotation: node_weight_annotation,
            default_weight: default_node_weight,
        });
        let weight_changes = node_weights.write().subscribe();
        let endpoints = index::EndpointsIndex::shared(naming, node_weights.clone());

        let mut prom = <Registry>::default();
        index::metrics::register(
            prom.sub_registry_with_prefix("eds_index"),
            endpoints.clone(),
            node_weights.clone(),
        );
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Spawn resource watches.

        let nodes = runtime.watch_all::<k8s::Node>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(node_weights, nodes).instrument(info_span!("nodes")),
        );

        let endpoints_watch = runtime.watch_all::<k8s::Endpoints>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(endpoints.clone(), endpoints_watch)
                .instrument(info_span!("endpoints")),
        );

        // Node weight changes are applied to the endpoints index outside of the node index's
        // lock.
        tokio::spawn(
            reweigh(weight_changes, endpoints.clone()).instrument(info_span!("node_weights")),
        );

        // Run the discovery server, serving results by looking up against the index handle.
        let server = discovery::EndpointDiscoveryServer::new(
            EndpointsDiscover::new(endpoints),
            runtime.shutdown_handle(),
        );
        info!(?naming, "Serving endpoints");
        tokio::spawn(
            discovery::serve(discovery_addr, server).map(|res| {
                if let Err(error) = res {
                    tracing::error!(%error, "Discovery server failed");
                }
            }),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
