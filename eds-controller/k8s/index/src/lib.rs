//! EDS Index
//!
//! The index translates Kubernetes `Endpoints` into Envoy `ClusterLoadAssignment` resources and
//! holds them for the discovery server. It watches the following cluster resources:
//!
//! - Each `Endpoints` enumerates the ready addresses and ports of a service. A service's ports are
//!   fanned out into one cluster per named port (or a single cluster when the service has a lone
//!   unnamed port).
//! - Each `Node` may be annotated with a load balancing weight. Every address scheduled on that
//!   node is published with the node's weight.
//!
//! ```text
//! [ Node ] -> [ NodeWeights ] -> [ EndpointsIndex ] <- [ Endpoints ]
//! ```
//!
//! When cluster names exclude the namespace, services with the same name in different namespaces
//! share a cluster. The index retains each source `Endpoints`' contribution so that a shared
//! cluster can be rebuilt when any one of its sources changes.
//!
//! Node weight changes are published to subscribers of the `NodeWeights` index rather than
//! applied in place; the runtime feeds them back into `EndpointsIndex::reweigh_node`.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cluster_name;
pub mod endpoints;
pub mod metrics;
pub mod node;

pub use self::{
    cluster_name::ClusterNaming,
    endpoints::{EndpointsIndex, SharedIndex},
    node::{NodeWeightConfig, NodeWeights, SharedNodeWeights, WeightChanged},
};
