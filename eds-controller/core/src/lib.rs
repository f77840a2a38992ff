#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod assignment;
mod discover;

pub use self::{
    assignment::{
        Address, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints, Protocol,
        SocketAddress,
    },
    discover::{DiscoverEndpoints, Snapshot, SnapshotStream},
};

/// The weight a proxy assumes for an endpoint that does not carry one explicitly.
pub const DEFAULT_LB_WEIGHT: u32 = 1;

/// The largest weight that may be assigned to a node.
pub const MAX_NODE_WEIGHT: u32 = 128;
