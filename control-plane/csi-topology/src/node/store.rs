use crate::{
    crd::CsiNodeTopology,
    error::{Error, Kube},
    types::NodeInfo,
};
use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use k8s_openapi::{api::core::v1::Node, apimachinery::pkg::apis::meta::v1::OwnerReference};
use kube::{
    api::{Api, Patch, PatchParams, PostParams, WatchEvent, WatchParams},
    Client, ResourceExt,
};
use snafu::ResultExt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Stream of the observed states of a single topology record.
pub type RecordStream = BoxStream<'static, Result<CsiNodeTopology, Error>>;

/// Access to the CsiNodeTopology records, as needed by the node topology resolver.
#[async_trait]
pub trait NodeTopologyStore: Send + Sync {
    /// Get the record of the node, if it exists.
    async fn get(&self, name: &str) -> Result<Option<CsiNodeTopology>, Error>;
    /// Create the record of the node, an already existing record is not an error.
    async fn create(&self, node: &NodeInfo, with_uuid: bool) -> Result<(), Error>;
    /// Set the node instance identifier of an existing record.
    async fn patch_uuid(&self, node: &NodeInfo) -> Result<(), Error>;
    /// Watch the record of the node, the server ends the stream after `timeout`.
    /// The current state of the record is the first item.
    async fn watch(&self, name: &str, timeout: Duration) -> Result<RecordStream, Error>;
}

/// A [`NodeTopologyStore`] backed by the kubernetes api-server.
#[derive(Clone)]
pub struct KubeTopologyStore {
    records: Api<CsiNodeTopology>,
    nodes: Api<Node>,
}

impl KubeTopologyStore {
    /// Return a new `Self` using the given client.
    pub fn new(client: Client) -> Self {
        Self {
            records: Api::all(client.clone()),
            nodes: Api::all(client),
        }
    }
}

/// The records are owned by their kubernetes node, so they are garbage collected with it.
/// Nodes without a uid yet cannot be referenced.
fn node_owner_reference(node: &Node) -> Option<OwnerReference> {
    Some(OwnerReference {
        api_version: "v1".to_string(),
        kind: "Node".to_string(),
        name: node.name_any(),
        uid: node.metadata.uid.clone()?,
        ..Default::default()
    })
}

#[async_trait]
impl NodeTopologyStore for KubeTopologyStore {
    async fn get(&self, name: &str) -> Result<Option<CsiNodeTopology>, Error> {
        self.records
            .get_opt(name)
            .await
            .context(Kube {
                operation: "get",
                name,
            })
    }

    async fn create(&self, node: &NodeInfo, with_uuid: bool) -> Result<(), Error> {
        let owner = match self.nodes.get_opt(&node.name).await.context(Kube {
            operation: "get node",
            name: &node.name,
        })? {
            Some(k8s_node) => node_owner_reference(&k8s_node),
            None => {
                warn!(node.name = %node.name, "Kubernetes node not found, creating an unowned CsiNodeTopology instance");
                None
            }
        };
        let record = CsiNodeTopology::for_node(node, with_uuid, owner);
        match self.records.create(&PostParams::default(), &record).await {
            Ok(_) => {
                info!(node.name = %node.name, "Successfully created a CsiNodeTopology instance");
                Ok(())
            }
            Err(kube::Error::Api(response)) if response.code == 409 => {
                debug!(node.name = %node.name, "CsiNodeTopology instance already exists");
                Ok(())
            }
            Err(source) => Err(Error::Kube {
                operation: "create".to_string(),
                name: node.name.clone(),
                source,
            }),
        }
    }

    async fn patch_uuid(&self, node: &NodeInfo) -> Result<(), Error> {
        let patch = serde_json::json!({
            "spec": {
                "nodeID": node.name,
                "nodeuuid": node.uuid,
            }
        });
        self.records
            .patch(&node.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .context(Kube {
                operation: "patch",
                name: &node.name,
            })?;
        info!(node.name = %node.name, node.uuid = ?node.uuid, "Patched the CsiNodeTopology instance with the node uuid");
        Ok(())
    }

    async fn watch(&self, name: &str, timeout: Duration) -> Result<RecordStream, Error> {
        let params = WatchParams::default()
            .fields(&format!("metadata.name={name}"))
            .timeout(timeout.as_secs().max(1) as u32);
        let events = self.records.watch(&params, "0").await.context(Kube {
            operation: "watch",
            name,
        })?;

        let name = name.to_string();
        let records = events.filter_map(move |event| {
            let name = name.clone();
            async move {
                match event {
                    Ok(WatchEvent::Added(record) | WatchEvent::Modified(record)) => Some(Ok(record)),
                    Ok(WatchEvent::Deleted(_) | WatchEvent::Bookmark(_)) => None,
                    Ok(WatchEvent::Error(response)) => Some(Err(Error::Kube {
                        operation: "watch".to_string(),
                        name,
                        source: kube::Error::Api(response),
                    })),
                    Err(source) => Some(Err(Error::Kube {
                        operation: "watch".to_string(),
                        name,
                        source,
                    })),
                }
            }
        });
        Ok(records.boxed())
    }
}
