//! Node side topology resolution: makes sure the topology record of the node exists and
//! waits, for a bounded time, for the topology reconciler to populate it.

mod store;

pub use store::{KubeTopologyStore, NodeTopologyStore, RecordStream};

use crate::{
    crd::TopologyState,
    error::{Error, ResolutionFailed, WatchTimeout},
    types::{NodeInfo, TopologyLabels},
};
use futures::StreamExt;
use snafu::OptionExt;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Resolves the topology labels of the node the plugin runs on.
#[derive(Clone)]
pub struct NodeTopologyResolver {
    store: Arc<dyn NodeTopologyStore>,
    /// Match records by node instance identifier as well as by name.
    identity_mode: bool,
    timeout: Duration,
}

impl std::fmt::Debug for NodeTopologyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTopologyResolver")
            .field("identity_mode", &self.identity_mode)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl NodeTopologyResolver {
    /// Return a new `Self`.
    pub fn new(store: Arc<dyn NodeTopologyStore>, identity_mode: bool, timeout: Duration) -> Self {
        Self {
            store,
            identity_mode,
            timeout,
        }
    }

    /// The bound on the wait for the record to be populated.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the topology labels of the node, creating its topology record if needed.
    /// Dropping the returned future releases the underlying watch.
    #[tracing::instrument(level = "info", skip(self, node), fields(node.name = %node.name), err)]
    pub async fn resolve(&self, node: &NodeInfo) -> Result<TopologyLabels, Error> {
        self.ensure_record(node).await?;
        self.wait_for_labels(&node.name).await
    }

    async fn ensure_record(&self, node: &NodeInfo) -> Result<(), Error> {
        if !self.identity_mode {
            return self.store.create(node, false).await;
        }
        let Some(record) = self.store.get(&node.name).await? else {
            return self.store.create(node, true).await;
        };
        match node.uuid.as_deref() {
            Some(uuid) if record.node_uuid() != Some(uuid) => {
                info!(
                    node.uuid = uuid,
                    record.uuid = ?record.node_uuid(),
                    "CsiNodeTopology instance is missing the node uuid"
                );
                self.store.patch_uuid(node).await
            }
            _ => {
                debug!("CsiNodeTopology instance already exists");
                Ok(())
            }
        }
    }

    async fn wait_for_labels(&self, name: &str) -> Result<TopologyLabels, Error> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut records = self.store.watch(name, self.timeout).await?;

        loop {
            let next = tokio::time::timeout_at(deadline, records.next()).await;
            let record = match next.ok().flatten().context(WatchTimeout {
                node: name,
                timeout: self.timeout,
            })? {
                Ok(record) => record,
                Err(error) => {
                    warn!(%error, "Failed to watch the CsiNodeTopology instance");
                    continue;
                }
            };

            match record.state() {
                TopologyState::Success => {
                    let labels = record.labels();
                    info!(?labels, "Topology labels received");
                    return Ok(labels);
                }
                TopologyState::Error => {
                    return ResolutionFailed {
                        node: name,
                        message: record.error_message(),
                    }
                    .fail();
                }
                TopologyState::Pending => {
                    debug!("Waiting for the CsiNodeTopology instance to be populated");
                }
            }
        }
    }
}
