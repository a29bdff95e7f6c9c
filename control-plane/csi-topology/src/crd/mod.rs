/// The AvailabilityZone custom resource definition.
pub mod availability_zone;
/// The CsiNodeTopology custom resource definition.
pub mod node_topology;

pub use availability_zone::{AvailabilityZone, AvailabilityZoneSpec};
pub use node_topology::{
    CsiNodeTopology, CsiNodeTopologySpec, CsiNodeTopologyStatus, TopologyLabel, TopologyState,
};
