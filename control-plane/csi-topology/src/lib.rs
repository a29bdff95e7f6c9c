//! Topology cache and resolution for the csi components.
//!
//! The topology of the cluster is learned from two custom resources: the per-node
//! `CsiNodeTopology` records and the per-zone `AvailabilityZone` resources. Their watches
//! feed in-memory caches which the controller resolvers query to find the storage
//! reachable for a volume's topology requirement, and the topology a placed volume is
//! accessible from. The node resolver makes sure the record of a node exists and waits
//! for its labels.

/// In-memory indexes of the watched topology resources.
pub mod cache;
/// Boundaries to the node registry and the storage backend.
pub mod collaborators;
/// Topology configuration.
pub mod config;
/// Controller side topology resolvers.
pub mod controller;
/// The topology custom resources.
pub mod crd;
/// Topology errors.
pub mod error;
/// Node side topology resolver.
pub mod node;
/// Lazily started topology services.
pub mod service;
/// Topology types.
pub mod types;
/// Watches of the topology resources.
pub mod watcher;

pub use config::{ClusterFlavor, TopologyConfig};
pub use controller::{ControllerTopology, NodeLabelTopology, VolumePlacement, ZoneTopology};
pub use error::{Error, ErrorKind};
pub use node::NodeTopologyResolver;
pub use service::{ControllerTopologyProvider, ControllerTopologyService, NodeTopologyProvider};
pub use types::{
    NodeHandle, NodeInfo, PlacementMode, RequirementScope, StorageLocation, TopologyLabels,
    TopologyRequirement, TopologySegment,
};
