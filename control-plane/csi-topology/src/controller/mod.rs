//! Controller side topology resolution, in one of two flavors depending on how the
//! cluster is federated.

mod node_labels;
mod zones;

pub use node_labels::NodeLabelTopology;
pub use zones::ZoneTopology;

use crate::{
    error::Error,
    types::{StorageLocation, TopologyRequirement, TopologySegment},
};

/// Where a volume has been placed, as needed to compute its accessible topology.
#[derive(Debug, Clone, Copy)]
pub struct VolumePlacement<'a> {
    /// The storage location hosting the volume.
    pub location_id: &'a str,
    /// The nodes which can access the storage location.
    pub nodes: &'a [String],
    /// The requirement the volume was provisioned with.
    pub requirement: &'a TopologyRequirement,
    /// The storage topology type of the volume.
    pub placement: &'a str,
}

/// The controller topology service of the cluster.
#[derive(Debug, Clone)]
pub enum ControllerTopology {
    /// Every node reports its own topology labels.
    NodeLabels(NodeLabelTopology),
    /// Zones are served by storage clusters.
    Zones(ZoneTopology),
}

impl ControllerTopology {
    /// The storage locations which can serve a volume with the given requirement.
    pub async fn shared_storage_for_requirement(
        &self,
        requirement: &TopologyRequirement,
    ) -> Result<Vec<StorageLocation>, Error> {
        match self {
            Self::NodeLabels(topology) => topology.shared_storage_for_requirement(requirement).await,
            Self::Zones(topology) => topology.shared_storage_for_requirement(requirement).await,
        }
    }

    /// The topology segments a placed volume is accessible from.
    pub async fn accessible_segments(
        &self,
        volume: &VolumePlacement<'_>,
    ) -> Result<Vec<TopologySegment>, Error> {
        match self {
            Self::NodeLabels(topology) => {
                topology
                    .accessible_segments_for_nodes(volume.nodes, volume.location_id)
                    .await
            }
            Self::Zones(topology) => {
                topology
                    .accessible_segments_for_placement(
                        volume.requirement,
                        volume.location_id,
                        volume.placement,
                    )
                    .await
            }
        }
    }
}

impl From<NodeLabelTopology> for ControllerTopology {
    fn from(topology: NodeLabelTopology) -> Self {
        Self::NodeLabels(topology)
    }
}

impl From<ZoneTopology> for ControllerTopology {
    fn from(topology: ZoneTopology) -> Self {
        Self::Zones(topology)
    }
}
