//! Boundaries to the systems the topology resolvers consult but do not own.

use crate::{
    error::BackendError,
    types::{NodeHandle, StorageLocation},
};
use async_trait::async_trait;

/// Resolves kubernetes nodes into handles usable by the [`StorageLocator`].
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Find the node by its instance identifier.
    async fn node_by_uuid(&self, uuid: &str) -> Result<NodeHandle, BackendError>;
    /// Find the node by its name.
    async fn node_by_name(&self, name: &str) -> Result<NodeHandle, BackendError>;
}

/// Queries the storage backend for the locations which can host a volume.
#[async_trait]
pub trait StorageLocator: Send + Sync {
    /// The locations reachable from every one of the given nodes.
    async fn shared_locations_for_nodes(
        &self,
        nodes: &[NodeHandle],
    ) -> Result<Vec<StorageLocation>, BackendError>;

    /// The candidate locations of a storage cluster, as two pools: the shared
    /// locations and the locally attached ones.
    async fn candidate_locations_for_cluster(
        &self,
        cluster: &str,
    ) -> Result<(Vec<StorageLocation>, Vec<StorageLocation>), BackendError>;

    /// Every location which belongs to the storage cluster.
    async fn locations_in_cluster(&self, cluster: &str) -> Result<Vec<StorageLocation>, BackendError>;
}
