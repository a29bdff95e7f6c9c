use crate::{
    cache::ZoneClusterCache,
    collaborators::StorageLocator,
    error::{Backend, CrossZonalUnsupported, Error, LocationUntraceable, ZoneNotFound},
    types::{LocationSet, PlacementMode, StorageLocation, TopologyRequirement, TopologySegment},
};
use rand::seq::SliceRandom;
use snafu::{OptionExt, ResultExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Controller topology for clusters federated into availability zones, each zone being
/// served by exactly one storage cluster.
#[derive(Clone)]
pub struct ZoneTopology {
    zones: Arc<ZoneClusterCache>,
    locator: Arc<dyn StorageLocator>,
}

impl std::fmt::Debug for ZoneTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneTopology")
            .field("zones", &self.zones.zones())
            .finish()
    }
}

impl ZoneTopology {
    /// Return a new `Self`.
    pub fn new(zones: Arc<ZoneClusterCache>, locator: Arc<dyn StorageLocator>) -> Self {
        Self { zones, locator }
    }

    fn cluster_of(&self, zone: &str) -> Result<String, Error> {
        self.zones.get(zone).context(ZoneNotFound { zone })
    }

    /// The clusters serving every zone of the segment.
    /// Any unknown zone fails the whole segment.
    pub fn clusters_in_segment(&self, segment: &TopologySegment) -> Result<Vec<String>, Error> {
        let clusters = segment
            .values()
            .into_iter()
            .map(|zone| self.cluster_of(zone))
            .collect::<Result<Vec<_>, _>>()?;
        info!(%segment, ?clusters, "Clusters matching the topology segment");
        Ok(clusters)
    }

    /// The candidate storage locations of the clusters serving the preferred segments.
    /// Requisite segments are not considered.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn shared_storage_for_requirement(
        &self,
        requirement: &TopologyRequirement,
    ) -> Result<Vec<StorageLocation>, Error> {
        requirement.scope()?;

        let mut shared = LocationSet::default();
        for segment in requirement.preferred() {
            let clusters = self.clusters_in_segment(segment)?;
            if clusters.is_empty() {
                warn!(%segment, "No clusters matched the topology segment");
                continue;
            }
            for cluster in clusters {
                // locally attached locations are not candidates
                let (locations, _) = self
                    .locator
                    .candidate_locations_for_cluster(&cluster)
                    .await
                    .context(Backend { resource: &cluster })?;
                debug!(cluster, locations = locations.len(), "Found candidate storage in cluster");
                shared.extend(locations);
            }
        }
        Ok(shared.into_vec())
    }

    /// The topology segments the volume placed on the storage location should be pinned
    /// to, for the given storage topology type.
    ///
    /// For `zonal` placement, a single preferred segment is returned as is. Otherwise each
    /// preferred zone is checked for the storage location, and when more than one zone
    /// holds it one of them is picked at random.
    #[tracing::instrument(level = "debug", skip(self, requirement), err)]
    pub async fn accessible_segments_for_placement(
        &self,
        requirement: &TopologyRequirement,
        location_id: &str,
        placement: &str,
    ) -> Result<Vec<TopologySegment>, Error> {
        let segments = match PlacementMode::parse(placement)? {
            PlacementMode::Zonal => self.zonal_segments(requirement, location_id).await?,
            PlacementMode::CrossZonal => return CrossZonalUnsupported {}.fail(),
        };
        info!(location = location_id, ?segments, "Topology of the provisioned volume");
        Ok(segments)
    }

    async fn zonal_segments(
        &self,
        requirement: &TopologyRequirement,
        location_id: &str,
    ) -> Result<Vec<TopologySegment>, Error> {
        if let [segment] = requirement.preferred() {
            return Ok(vec![segment.clone()]);
        }

        let mut matches = Vec::new();
        for segment in requirement.preferred() {
            for (label, zone) in segment.iter() {
                let cluster = self.cluster_of(zone)?;
                let locations = self
                    .locator
                    .locations_in_cluster(&cluster)
                    .await
                    .context(Backend { resource: &cluster })?;
                if locations.iter().any(|location| location.id == location_id) {
                    matches.push(TopologySegment::new([(label.as_str(), zone.as_str())]));
                }
            }
        }

        match matches.len() {
            0 => LocationUntraceable {
                storage_location: location_id,
            }
            .fail(),
            1 => Ok(matches),
            _ => {
                let selected = matches
                    .choose(&mut rand::thread_rng())
                    .cloned()
                    .context(LocationUntraceable {
                        storage_location: location_id,
                    })?;
                info!(
                    %selected,
                    candidates = ?matches,
                    "Storage location is accessible from multiple zones, selected one at random"
                );
                Ok(vec![selected])
            }
        }
    }
}
