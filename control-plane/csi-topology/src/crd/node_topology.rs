use crate::types::{NodeInfo, TopologyLabels};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{core::ObjectMeta, CustomResource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
group = "openebs.io",
version = "v1alpha1",
kind = "CsiNodeTopology",
plural = "csinodetopologies",
status = "CsiNodeTopologyStatus",
derive = "PartialEq",
derive = "Default",
shortname = "cnt",
printcolumn = r#"{ "name":"node", "type":"string", "description":"node name", "jsonPath":".spec.nodeID"}"#,
printcolumn = r#"{ "name":"status", "type":"string", "description":"topology status", "jsonPath":".status.status"}"#
)]
/// Identity of the node the topology record belongs to.
pub struct CsiNodeTopologySpec {
    /// The node name.
    #[serde(rename = "nodeID")]
    pub node_id: String,
    /// The node instance identifier.
    #[serde(rename = "nodeuuid", default, skip_serializing_if = "Option::is_none")]
    pub node_uuid: Option<String>,
}

/// State of the topology discovery for a node.
#[derive(Debug, Default, Clone, Copy, Display, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub enum TopologyState {
    /// The labels have not been discovered yet.
    #[default]
    #[serde(rename = "", alias = "Pending")]
    Pending,
    /// The labels were discovered, this is terminal.
    Success,
    /// The discovery failed, this is terminal.
    Error,
}

/// A single topology label of a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct TopologyLabel {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
/// Status of the topology record, written by the topology reconciler.
pub struct CsiNodeTopologyStatus {
    /// The discovery state.
    #[serde(default)]
    pub status: TopologyState,
    /// The reason of the failure when in the error state.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    /// The discovered topology of the node.
    #[serde(default)]
    pub topology_labels: Vec<TopologyLabel>,
}

impl CsiNodeTopology {
    /// A new record for the given node, owned by the kubernetes node object.
    /// The instance identifier is only recorded when `with_uuid` is set.
    pub fn for_node(node: &NodeInfo, with_uuid: bool, owner: Option<OwnerReference>) -> Self {
        let mut record = Self::new(
            &node.name,
            CsiNodeTopologySpec {
                node_id: node.name.clone(),
                node_uuid: if with_uuid { node.uuid.clone() } else { None },
            },
        );
        record.metadata = ObjectMeta {
            name: Some(node.name.clone()),
            owner_references: owner.map(|owner| vec![owner]),
            ..Default::default()
        };
        record
    }

    /// The discovery state, records without a status are pending.
    pub fn state(&self) -> TopologyState {
        self.status
            .as_ref()
            .map(|status| status.status)
            .unwrap_or_default()
    }

    /// Check if the topology discovery has succeeded.
    pub fn is_success(&self) -> bool {
        self.state() == TopologyState::Success
    }

    /// The discovered labels as a map, later duplicate keys override earlier ones.
    pub fn labels(&self) -> TopologyLabels {
        self.status
            .iter()
            .flat_map(|status| status.topology_labels.iter())
            .map(|label| (label.key.clone(), label.value.clone()))
            .collect()
    }

    /// The failure reason reported by the reconciler.
    pub fn error_message(&self) -> &str {
        self.status
            .as_ref()
            .map(|status| status.error_message.as_str())
            .unwrap_or_default()
    }

    /// The recorded node instance identifier, if any.
    pub fn node_uuid(&self) -> Option<&str> {
        self.spec.node_uuid.as_deref().filter(|uuid| !uuid.is_empty())
    }
}
