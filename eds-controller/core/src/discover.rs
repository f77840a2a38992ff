use crate::ClusterLoadAssignment;
use anyhow::Result;
use futures::prelude::*;
use std::pin::Pin;

/// Models endpoint discovery.
#[async_trait::async_trait]
pub trait DiscoverEndpoints {
    async fn get_snapshot(&self) -> Result<Snapshot>;

    /// Yields the current snapshot and then a new snapshot each time the cache changes.
    async fn watch_snapshots(&self) -> Result<SnapshotStream>;
}

pub type SnapshotStream = Pin<Box<dyn Stream<Item = Snapshot> + Send + Sync + 'static>>;

/// A consistent view of every cached assignment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Incremented each time the cache changes.
    pub version: u64,

    /// Ordered by cluster name.
    pub resources: Vec<ClusterLoadAssignment>,
}
