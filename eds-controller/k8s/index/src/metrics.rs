use crate::{endpoints::SharedIndex, node::SharedNodeWeights};
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented {
    endpoints: SharedIndex,
    node_weights: SharedNodeWeights,
}

pub fn register(reg: &mut Registry, endpoints: SharedIndex, node_weights: SharedNodeWeights) {
    reg.register_collector(Box::new(Instrumented {
        endpoints,
        node_weights,
    }));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let (assignments, sources) = {
            let endpoints = self.endpoints.read();
            (endpoints.len(), endpoints.sources_len())
        };
        let nodes = self.node_weights.read().len();

        let assignments_encoder = encoder.encode_descriptor(
            "cluster_load_assignments",
            "The number of clusters with at least one endpoint",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(assignments as i64).encode(assignments_encoder)?;

        let sources_encoder = encoder.encode_descriptor(
            "endpoints_sources",
            "The number of Endpoints resources in the index",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(sources as i64).encode(sources_encoder)?;

        let nodes_encoder = encoder.encode_descriptor(
            "node_weights",
            "The number of nodes with a tracked weight",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(nodes as i64).encode(nodes_encoder)?;

        Ok(())
    }
}
