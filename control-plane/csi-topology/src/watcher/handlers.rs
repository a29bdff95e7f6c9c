use super::ResourceEventHandler;
use crate::{
    cache::{DomainNodeCache, NodeRecordCache, ZoneClusterCache},
    crd::{AvailabilityZone, CsiNodeTopology},
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Keeps the domain/node index and the record cache in sync with the CsiNodeTopology
/// resources. Only records with a `Success` status contribute to the domain/node index.
#[derive(Debug, Clone)]
pub struct NodeTopologyHandler {
    domains: Arc<DomainNodeCache>,
    records: Arc<NodeRecordCache>,
}

impl NodeTopologyHandler {
    /// Return a new `Self` updating the given caches.
    pub fn new(domains: Arc<DomainNodeCache>, records: Arc<NodeRecordCache>) -> Self {
        Self { domains, records }
    }
}

impl ResourceEventHandler<CsiNodeTopology> for NodeTopologyHandler {
    fn added(&self, name: &str, record: &CsiNodeTopology) {
        self.records.insert(name, record.clone());
        if !record.is_success() {
            info!(
                node.name = name,
                status = %record.state(),
                "CsiNodeTopology instance not ready yet, not adding its labels"
            );
            return;
        }
        let labels = record.labels();
        self.domains.add_node(name, &labels);
        info!(node.name = name, ?labels, "Added node to the domain node cache");
    }

    fn updated(&self, name: &str, old: &CsiNodeTopology, new: &CsiNodeTopology) {
        self.records.insert(name, new.clone());

        let (old_labels, new_labels) = (old.labels(), new.labels());
        if old_labels == new_labels && old.is_success() == new.is_success() {
            debug!(node.name = name, "CsiNodeTopology instance topology unchanged");
            return;
        }

        if old.is_success() {
            warn!(
                node.name = name,
                old = ?old_labels,
                new = ?new_labels,
                status = %new.state(),
                "CsiNodeTopology instance updated after its status was set to Success"
            );
            let new_labels = new.is_success().then_some(&new_labels);
            self.domains.replace_node(name, &old_labels, new_labels);
        } else if new.is_success() {
            self.domains.add_node(name, &new_labels);
            info!(node.name = name, labels = ?new_labels, "Added node to the domain node cache");
        }
    }

    fn deleted(&self, name: &str, record: &CsiNodeTopology) {
        self.records.remove(name);
        if !record.is_success() {
            info!(
                node.name = name,
                status = %record.state(),
                "CsiNodeTopology instance deleted before it was ready"
            );
            return;
        }
        self.domains.remove_node(name, &record.labels());
        info!(node.name = name, "Removed node from the domain node cache");
    }
}

/// Keeps the zone/cluster index in sync with the AvailabilityZone resources.
#[derive(Debug, Clone)]
pub struct AvailabilityZoneHandler {
    zones: Arc<ZoneClusterCache>,
}

impl AvailabilityZoneHandler {
    /// Return a new `Self` updating the given cache.
    pub fn new(zones: Arc<ZoneClusterCache>) -> Self {
        Self { zones }
    }

    fn apply(&self, name: &str, zone: &AvailabilityZone) {
        let Some(cluster) = zone.cluster_id() else {
            error!(zone = name, "AvailabilityZone instance without a cluster, ignoring it");
            return;
        };
        match self.zones.set(name, cluster) {
            None => info!(zone = name, cluster, "Added zone to the zone cluster cache"),
            Some(previous) if previous != cluster => {
                info!(zone = name, cluster, previous, "Zone moved to a different cluster")
            }
            Some(_) => {}
        }
    }
}

impl ResourceEventHandler<AvailabilityZone> for AvailabilityZoneHandler {
    fn added(&self, name: &str, zone: &AvailabilityZone) {
        self.apply(name, zone);
    }

    fn updated(&self, name: &str, _old: &AvailabilityZone, new: &AvailabilityZone) {
        if new.cluster_id().is_some() {
            self.apply(name, new);
        } else if let Some(cluster) = self.zones.delete(name) {
            error!(
                zone = name,
                cluster, "AvailabilityZone instance lost its cluster, removed it from the cache"
            );
        }
    }

    fn deleted(&self, name: &str, _zone: &AvailabilityZone) {
        if let Some(cluster) = self.zones.delete(name) {
            info!(zone = name, cluster, "Removed zone from the zone cluster cache");
        }
    }
}
