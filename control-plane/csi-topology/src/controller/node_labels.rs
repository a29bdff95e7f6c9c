use crate::{
    cache::{DomainNodeCache, NodeRecordCache},
    collaborators::{NodeRegistry, StorageLocator},
    error::{Backend, Error, RecordNotFound, RecordNotReady},
    types::{LocationSet, NodeHandle, StorageLocation, TopologyRequirement, TopologySegment},
};
use snafu::{OptionExt, ResultExt};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info};

/// Controller topology for clusters where every node reports its own topology labels.
/// Storage is found by intersecting the label values of a segment into the set of
/// nodes it covers, and asking the backend for the locations those nodes share.
#[derive(Clone)]
pub struct NodeLabelTopology {
    domains: Arc<DomainNodeCache>,
    records: Arc<NodeRecordCache>,
    registry: Arc<dyn NodeRegistry>,
    locator: Arc<dyn StorageLocator>,
    /// Resolve nodes by the instance identifier recorded in their topology record.
    identity_mode: bool,
}

impl std::fmt::Debug for NodeLabelTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeLabelTopology")
            .field("domains", &self.domains.len())
            .field("records", &self.records.len())
            .field("identity_mode", &self.identity_mode)
            .finish()
    }
}

impl NodeLabelTopology {
    /// Return a new `Self`.
    pub fn new(
        domains: Arc<DomainNodeCache>,
        records: Arc<NodeRecordCache>,
        registry: Arc<dyn NodeRegistry>,
        locator: Arc<dyn StorageLocator>,
        identity_mode: bool,
    ) -> Self {
        Self {
            domains,
            records,
            registry,
            locator,
            identity_mode,
        }
    }

    /// The storage locations reachable for the requirement: the preferred segments
    /// are tried first and the requisite segments only if those yield nothing.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn shared_storage_for_requirement(
        &self,
        requirement: &TopologyRequirement,
    ) -> Result<Vec<StorageLocation>, Error> {
        let locations = self
            .shared_storage_for_segments(requirement.preferred())
            .await?;
        if !locations.is_empty() || requirement.requisite().is_empty() {
            return Ok(locations);
        }
        debug!("No shared storage found for the preferred segments, using the requisite segments");
        self.shared_storage_for_segments(requirement.requisite())
            .await
    }

    /// The union of the storage locations shared by the nodes of each segment.
    /// A segment which matches no node contributes nothing.
    pub async fn shared_storage_for_segments(
        &self,
        segments: &[TopologySegment],
    ) -> Result<Vec<StorageLocation>, Error> {
        let mut shared = LocationSet::default();
        for segment in segments {
            let nodes = self.nodes_in_segment(segment);
            if nodes.is_empty() {
                debug!(%segment, "No nodes found in the topology segment");
                continue;
            }
            let handles = self.node_handles(&nodes).await?;
            let locations = self
                .locator
                .shared_locations_for_nodes(&handles)
                .await
                .context(Backend {
                    resource: segment.to_string(),
                })?;
            debug!(%segment, ?nodes, locations = locations.len(), "Found shared storage for the topology segment");
            shared.extend(locations);
        }
        Ok(shared.into_vec())
    }

    /// The names of the nodes carrying every label value of the segment, sorted.
    pub fn nodes_in_segment(&self, segment: &TopologySegment) -> Vec<String> {
        let mut nodes = self
            .domains
            .nodes_matching_all(&segment.values())
            .into_iter()
            .collect::<Vec<_>>();
        nodes.sort();
        nodes
    }

    async fn node_handles(&self, nodes: &[String]) -> Result<Vec<NodeHandle>, Error> {
        let mut handles = Vec::with_capacity(nodes.len());
        for name in nodes {
            let handle = if self.identity_mode {
                let uuid = self
                    .records
                    .get(name)
                    .and_then(|record| record.node_uuid().map(ToString::to_string))
                    .context(RecordNotFound { node: name })?;
                self.registry
                    .node_by_uuid(&uuid)
                    .await
                    .context(Backend { resource: &uuid })?
            } else {
                self.registry
                    .node_by_name(name)
                    .await
                    .context(Backend { resource: name })?
            };
            handles.push(handle);
        }
        Ok(handles)
    }

    /// The topology segments from which the storage location can be accessed, given the
    /// nodes which can access it. A segment is only reported when every node in it is
    /// one of the given nodes.
    #[tracing::instrument(level = "debug", skip(self, nodes), fields(nodes = nodes.len()), err)]
    pub async fn accessible_segments_for_nodes(
        &self,
        nodes: &[String],
        location_id: &str,
    ) -> Result<Vec<TopologySegment>, Error> {
        let mut segments = Vec::<TopologySegment>::new();
        for name in nodes {
            let record = self
                .records
                .get(name)
                .context(RecordNotFound { node: name })?;
            if !record.is_success() {
                return RecordNotReady {
                    node: name,
                    status: record.state().to_string(),
                }
                .fail();
            }
            let labels = record.labels();
            if labels.is_empty() {
                debug!(node.name = %name, "Node has no topology labels");
                continue;
            }
            let segment = TopologySegment::from(labels);
            if !segments.contains(&segment) {
                segments.push(segment);
            }
        }

        let accessible = nodes.iter().map(String::as_str).collect::<HashSet<_>>();
        segments.retain(|segment| {
            let members = self.domains.nodes_matching_all(&segment.values());
            let covered = members.iter().all(|node| accessible.contains(node.as_str()));
            if !covered {
                info!(
                    %segment,
                    location = location_id,
                    "Not all nodes of the topology segment can access the storage location"
                );
            }
            covered
        });
        info!(location = location_id, ?segments, "Topology of the provisioned volume");
        Ok(segments)
    }
}
