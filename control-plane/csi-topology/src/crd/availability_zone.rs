use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
group = "topology.openebs.io",
version = "v1alpha1",
kind = "AvailabilityZone",
plural = "availabilityzones",
derive = "PartialEq",
derive = "Default",
shortname = "az",
printcolumn = r#"{ "name":"cluster", "type":"string", "description":"storage cluster of the zone", "jsonPath":".spec.clusterId"}"#
)]
#[serde(rename_all = "camelCase")]
/// The zone spec, the zone itself is the name of the resource.
pub struct AvailabilityZoneSpec {
    /// The storage cluster serving the zone.
    #[serde(default)]
    pub cluster_id: String,
}

impl AvailabilityZone {
    /// The storage cluster serving this zone, if set.
    pub fn cluster_id(&self) -> Option<&str> {
        Some(self.spec.cluster_id.as_str()).filter(|id| !id.is_empty())
    }
}
